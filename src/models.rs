use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    domain::{OrderError, OrderStatus, PaymentStatus},
    entity::{order_details, orders, products},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub price_sale: Option<i64>,
    pub is_on_sale: bool,
    pub effective_price: i64,
    pub quantity: Option<i32>,
    pub view: i32,
    pub status: bool,
    pub trash: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<products::Model> for Product {
    fn from(model: products::Model) -> Self {
        let effective_price = model.effective_price();
        Self {
            id: model.id,
            category_id: model.category_id,
            name: model.name,
            description: model.description,
            price: model.price,
            price_sale: model.price_sale,
            is_on_sale: model.is_on_sale,
            effective_price,
            quantity: model.quantity,
            view: model.view,
            status: model.status,
            trash: model.trash,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub order_date: DateTime<Utc>,
    pub total_amount: i64,
    pub shipping_address: String,
    pub shipping_phone: String,
    pub shipping_name: String,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub trash: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }
}

impl TryFrom<orders::Model> for Order {
    type Error = OrderError;

    fn try_from(model: orders::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            username: None,
            order_date: model.order_date.with_timezone(&Utc),
            total_amount: model.total_amount,
            shipping_address: model.shipping_address,
            shipping_phone: model.shipping_phone,
            shipping_name: model.shipping_name,
            payment_method: model.payment_method,
            payment_status: model.payment_status.parse()?,
            order_status: model.order_status.parse()?,
            tracking_number: model.tracking_number,
            notes: model.notes,
            trash: model.trash,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: i64,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub final_price: i64,
    pub trash: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<order_details::Model> for OrderDetail {
    fn from(model: order_details::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            quantity: model.quantity,
            unit_price: model.unit_price,
            subtotal: model.subtotal,
            discount_amount: model.discount_amount,
            final_price: model.final_price,
            trash: model.trash,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BestSeller {
    pub product_id: Uuid,
    pub total_sold: i64,
    pub product_name: Option<String>,
    pub price: Option<i64>,
    pub effective_price: Option<i64>,
}

/// Cart entry with the price captured when it was last added to.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub subtotal: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
