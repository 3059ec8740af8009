//! Order aggregate: an order plus the line items it exclusively owns.
//!
//! Every mutation is computed on a candidate copy of the line collection and
//! only swapped in once all arithmetic and legality checks have passed, so a
//! failed call leaves the aggregate exactly as it was. After every successful
//! call `total_amount == sum(final_price)` over the non-trashed lines.

use thiserror::Error;
use uuid::Uuid;

use super::status::{OrderStatus, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("order detail {0} not found")]
    LineNotFound(Uuid),
}

/// One product/quantity/price entry of an order.
///
/// Fields are private: prices are derived and may only change through the
/// owning [`OrderAggregate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    id: Uuid,
    product_id: Uuid,
    quantity: i32,
    unit_price: i64,
    subtotal: i64,
    discount_amount: i64,
    final_price: i64,
    trash: bool,
}

impl LineItem {
    fn new(product_id: Uuid, quantity: i32, unit_price: i64) -> Result<Self, OrderError> {
        Self::restore(Uuid::new_v4(), product_id, quantity, unit_price, 0, false)
    }

    /// Rebuild a line from stored columns. Subtotal and final price are
    /// recomputed rather than trusted.
    pub fn restore(
        id: Uuid,
        product_id: Uuid,
        quantity: i32,
        unit_price: i64,
        discount_amount: i64,
        trash: bool,
    ) -> Result<Self, OrderError> {
        if unit_price < 0 {
            return Err(OrderError::InvalidArgument(
                "unit price must not be negative".into(),
            ));
        }
        if discount_amount < 0 {
            return Err(OrderError::InvalidArgument(
                "discount must not be negative".into(),
            ));
        }
        let mut line = Self {
            id,
            product_id,
            quantity: 0,
            unit_price,
            subtotal: 0,
            discount_amount,
            final_price: 0,
            trash,
        };
        line.reprice(quantity)?;
        Ok(line)
    }

    fn reprice(&mut self, quantity: i32) -> Result<(), OrderError> {
        ensure_positive_quantity(quantity)?;
        let subtotal = self
            .unit_price
            .checked_mul(i64::from(quantity))
            .ok_or_else(|| OrderError::InvalidArgument("line subtotal overflows".into()))?;
        if subtotal < self.discount_amount {
            return Err(OrderError::InvalidArgument(format!(
                "subtotal {subtotal} would fall below discount {}",
                self.discount_amount
            )));
        }
        self.quantity = quantity;
        self.subtotal = subtotal;
        self.final_price = subtotal - self.discount_amount;
        Ok(())
    }

    fn with_quantity(&self, quantity: i32) -> Result<Self, OrderError> {
        let mut next = self.clone();
        next.reprice(quantity)?;
        Ok(next)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn product_id(&self) -> Uuid {
        self.product_id
    }

    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    pub fn unit_price(&self) -> i64 {
        self.unit_price
    }

    pub fn subtotal(&self) -> i64 {
        self.subtotal
    }

    pub fn discount_amount(&self) -> i64 {
        self.discount_amount
    }

    pub fn final_price(&self) -> i64 {
        self.final_price
    }

    pub fn is_trashed(&self) -> bool {
        self.trash
    }
}

/// Requested line at order creation, with its price already resolved.
#[derive(Debug, Clone, Copy)]
pub struct NewLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: i64,
}

/// What a line-item mutation did, so the caller can persist exactly that row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineChange {
    Added(LineItem),
    Updated(LineItem),
    Removed(LineItem),
}

impl LineChange {
    pub fn line(&self) -> &LineItem {
        match self {
            LineChange::Added(line) | LineChange::Updated(line) | LineChange::Removed(line) => {
                line
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAggregate {
    id: Uuid,
    status: OrderStatus,
    payment_status: PaymentStatus,
    tracking_number: Option<String>,
    trash: bool,
    total_amount: i64,
    lines: Vec<LineItem>,
}

impl OrderAggregate {
    /// Open a new pending order. Duplicate products are kept as separate lines.
    pub fn create(id: Uuid, items: &[NewLine]) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::InvalidArgument(
                "an order needs at least one item".into(),
            ));
        }
        let lines = items
            .iter()
            .map(|item| LineItem::new(item.product_id, item.quantity, item.unit_price))
            .collect::<Result<Vec<_>, _>>()?;
        let total_amount = total_of(&lines)?;
        Ok(Self {
            id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            tracking_number: None,
            trash: false,
            total_amount,
            lines,
        })
    }

    /// Rebuild from stored state. The total is recomputed from the lines.
    pub fn restore(
        id: Uuid,
        status: OrderStatus,
        payment_status: PaymentStatus,
        tracking_number: Option<String>,
        trash: bool,
        lines: Vec<LineItem>,
    ) -> Result<Self, OrderError> {
        let total_amount = total_of(&lines)?;
        Ok(Self {
            id,
            status,
            payment_status,
            tracking_number,
            trash,
            total_amount,
            lines,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn is_trashed(&self) -> bool {
        self.trash
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn live_lines(&self) -> impl Iterator<Item = &LineItem> {
        self.lines.iter().filter(|line| !line.trash)
    }

    pub fn line(&self, line_id: Uuid) -> Option<&LineItem> {
        self.lines.iter().find(|line| line.id == line_id)
    }

    /// Add `quantity` of a product, merging into an existing live line for the
    /// same product. `unit_price` is only used when a new line is created.
    pub fn add_item(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        unit_price: i64,
    ) -> Result<LineChange, OrderError> {
        ensure_positive_quantity(quantity)?;
        self.ensure_modifiable()?;

        let mut lines = self.lines.clone();
        let change = match lines
            .iter()
            .position(|line| !line.trash && line.product_id == product_id)
        {
            Some(idx) => {
                let merged = lines[idx].quantity.checked_add(quantity).ok_or_else(|| {
                    OrderError::InvalidArgument("line quantity overflows".into())
                })?;
                lines[idx] = lines[idx].with_quantity(merged)?;
                LineChange::Updated(lines[idx].clone())
            }
            None => {
                let line = LineItem::new(product_id, quantity, unit_price)?;
                lines.push(line.clone());
                LineChange::Added(line)
            }
        };

        self.commit_lines(lines)?;
        Ok(change)
    }

    pub fn update_item_quantity(
        &mut self,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<LineChange, OrderError> {
        ensure_positive_quantity(quantity)?;
        let idx = self.position(line_id)?;
        self.ensure_modifiable()?;

        let mut lines = self.lines.clone();
        lines[idx] = lines[idx].with_quantity(quantity)?;
        let change = LineChange::Updated(lines[idx].clone());

        self.commit_lines(lines)?;
        Ok(change)
    }

    /// Detach a line for good. This is a hard removal within an open order.
    pub fn remove_item(&mut self, line_id: Uuid) -> Result<LineChange, OrderError> {
        let idx = self.position(line_id)?;
        self.ensure_modifiable()?;

        let mut lines = self.lines.clone();
        let removed = lines.remove(idx);

        self.commit_lines(lines)?;
        Ok(LineChange::Removed(removed))
    }

    pub fn change_status(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::InvalidState(format!(
                "order is already {}",
                self.status
            )));
        }
        if next == OrderStatus::Cancelled && !self.status.can_cancel() {
            return Err(OrderError::InvalidState(format!(
                "cannot cancel an order that is {}",
                self.status
            )));
        }
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidState(format!(
                "cannot move order from {} to {next}",
                self.status
            )));
        }
        if next == OrderStatus::Shipped && self.tracking_number.is_none() {
            return Err(OrderError::InvalidState(
                "a tracking number must be recorded before shipping".into(),
            ));
        }

        self.status = next;
        if next == OrderStatus::Delivered {
            self.payment_status = PaymentStatus::Paid;
        }
        Ok(())
    }

    /// Record the carrier tracking number; the order becomes `SHIPPED`.
    /// Allowed while processing, or to correct the number once shipped.
    pub fn record_tracking(&mut self, tracking_number: &str) -> Result<(), OrderError> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(OrderError::InvalidArgument(
                "tracking number must not be empty".into(),
            ));
        }
        if !matches!(self.status, OrderStatus::Processing | OrderStatus::Shipped) {
            return Err(OrderError::InvalidState(format!(
                "cannot ship an order that is {}",
                self.status
            )));
        }

        self.tracking_number = Some(tracking_number.to_string());
        self.status = OrderStatus::Shipped;
        Ok(())
    }

    pub fn set_payment_status(&mut self, status: PaymentStatus) {
        self.payment_status = status;
    }

    pub fn move_to_trash(&mut self) {
        self.trash = true;
    }

    pub fn restore_from_trash(&mut self) {
        self.trash = false;
    }

    fn position(&self, line_id: Uuid) -> Result<usize, OrderError> {
        self.lines
            .iter()
            .position(|line| line.id == line_id)
            .ok_or(OrderError::LineNotFound(line_id))
    }

    fn ensure_modifiable(&self) -> Result<(), OrderError> {
        if self.status.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::InvalidState(format!(
                "order not modifiable: status is {}",
                self.status
            )))
        }
    }

    fn commit_lines(&mut self, lines: Vec<LineItem>) -> Result<(), OrderError> {
        let total = total_of(&lines)?;
        self.lines = lines;
        self.total_amount = total;
        Ok(())
    }
}

fn ensure_positive_quantity(quantity: i32) -> Result<(), OrderError> {
    if quantity <= 0 {
        return Err(OrderError::InvalidArgument(
            "quantity must be greater than 0".into(),
        ));
    }
    Ok(())
}

fn total_of(lines: &[LineItem]) -> Result<i64, OrderError> {
    lines
        .iter()
        .filter(|line| !line.trash)
        .try_fold(0_i64, |acc, line| acc.checked_add(line.final_price))
        .ok_or_else(|| OrderError::InvalidArgument("order total overflows".into()))
}
