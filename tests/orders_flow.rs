use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set, Statement};
use shop_backoffice::{
    db::{create_orm_conn, create_pool, run_migrations},
    domain::{OrderStatus, PaymentStatus},
    dto::orders::{
        AddItemRequest, CreateOrderRequest, OrderItemRequest, OrderWithItems,
        UpdateOrderStatusRequest, UpdatePaymentStatusRequest, UpdateQuantityRequest,
        UpdateTrackingRequest,
    },
    dto::cart::{AddToCartRequest, UpdateCartQuantityRequest},
    dto::products::{CreateProductRequest, UpdateProductRequest},
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    error::AppError,
    middleware::auth::AuthUser,
    routes::params::Pagination,
    services::{
        cart_service, order_detail_service, order_service, product_service, report_service,
    },
    state::AppState,
};
use uuid::Uuid;

// Order aggregate flows against a real database: creation, line edits,
// concurrent edits, status machine and the best-seller report.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn order_aggregate_flows() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(());
        }
    };

    let state = setup_state(&database_url).await?;

    line_items_keep_the_total_consistent(&state).await?;
    status_machine_guards_the_order(&state).await?;
    best_sellers_skip_cancelled_orders(&state).await?;
    trash_toggles_are_idempotent(&state).await?;
    missing_references_are_not_found(&state).await?;
    concurrent_adds_merge_under_the_order_lock(&state).await?;
    failed_line_change_keeps_the_stored_total(&state).await?;
    catalog_writes_report_constraint_conflicts(&state).await?;
    cart_entries_merge_and_deactivate(&state).await?;

    Ok(())
}

async fn line_items_keep_the_total_consistent(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, _) = actors(state).await?;
    let p1 = create_product(state, 1000, None, false).await?;
    let p2 = create_product(state, 500, None, false).await?;
    let x = create_product(state, 250, Some(200), true).await?;

    let created = order_service::create_order(
        state,
        &customer,
        order_request(customer.user_id, &[(p1, 2), (p2, 1)]),
    )
    .await?
    .data
    .expect("order");
    assert_eq!(created.order.total_amount, 2500);
    assert_eq!(created.order.order_status, OrderStatus::Pending);
    assert_eq!(created.order.payment_status, PaymentStatus::Pending);
    assert_consistent(&created);

    let order_id = created.order.id;
    let p2_line = line_for(&created, p2);
    let after_remove = order_detail_service::remove_item(state, &customer, p2_line)
        .await?
        .data
        .expect("order");
    assert_eq!(after_remove.order.total_amount, 2000);
    assert_eq!(after_remove.items.len(), 1);
    assert_consistent(&after_remove);

    order_detail_service::add_item(
        state,
        &customer,
        order_id,
        AddItemRequest {
            product_id: x,
            quantity: 2,
        },
    )
    .await?;
    let merged = order_detail_service::add_item(
        state,
        &customer,
        order_id,
        AddItemRequest {
            product_id: x,
            quantity: 3,
        },
    )
    .await?
    .data
    .expect("order");
    let x_lines: Vec<_> = merged.items.iter().filter(|i| i.product_id == x).collect();
    assert_eq!(x_lines.len(), 1);
    assert_eq!(x_lines[0].quantity, 5);
    assert_eq!(x_lines[0].unit_price, 200);
    assert_eq!(x_lines[0].subtotal, 1000);
    assert_eq!(merged.order.total_amount, 3000);
    assert_consistent(&merged);

    let p1_line = line_for(&merged, p1);
    let resized = order_detail_service::update_item_quantity(
        state,
        &customer,
        p1_line,
        UpdateQuantityRequest { quantity: 4 },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(resized.order.total_amount, 4000 + 1000);
    assert_consistent(&resized);

    let rejected = order_detail_service::update_item_quantity(
        state,
        &customer,
        p1_line,
        UpdateQuantityRequest { quantity: 0 },
    )
    .await;
    assert!(matches!(rejected, Err(AppError::InvalidArgument(_))));

    let stored = order_service::get_order(state, &customer, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(stored.order.total_amount, 5000);
    assert_eq!(stored.order.username.as_deref(), Some("customer"));
    assert_consistent(&stored);

    let stranger = AuthUser {
        user_id: Uuid::new_v4(),
        role: "user".into(),
    };
    let forbidden = order_detail_service::add_item(
        state,
        &stranger,
        order_id,
        AddItemRequest {
            product_id: x,
            quantity: 1,
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    Ok(())
}

async fn status_machine_guards_the_order(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, admin) = actors(state).await?;
    let p = create_product(state, 700, None, false).await?;
    let order_id = place_order(state, &customer, &[(p, 1)]).await?;

    let shipped_early = set_status(state, &admin, order_id, "SHIPPED").await;
    assert!(matches!(shipped_early, Err(AppError::InvalidState(_))));

    set_status(state, &admin, order_id, "PROCESSING").await?;

    let locked = order_detail_service::add_item(
        state,
        &customer,
        order_id,
        AddItemRequest {
            product_id: p,
            quantity: 1,
        },
    )
    .await;
    assert!(matches!(locked, Err(AppError::InvalidState(_))));

    let no_tracking = set_status(state, &admin, order_id, "SHIPPED").await;
    assert!(matches!(no_tracking, Err(AppError::InvalidState(_))));

    let shipped = order_service::update_tracking(
        state,
        &admin,
        order_id,
        UpdateTrackingRequest {
            tracking_number: "TRK-42".into(),
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(shipped.order_status, OrderStatus::Shipped);
    assert_eq!(shipped.tracking_number.as_deref(), Some("TRK-42"));

    let cancel = order_service::cancel_order(state, &admin, order_id).await;
    assert!(matches!(cancel, Err(AppError::InvalidState(_))));

    let delivered = set_status(state, &admin, order_id, "DELIVERED")
        .await?
        .data
        .expect("order");
    assert_eq!(delivered.order_status, OrderStatus::Delivered);
    assert_eq!(delivered.payment_status, PaymentStatus::Paid);

    let cancel = order_service::cancel_order(state, &admin, order_id).await;
    assert!(matches!(cancel, Err(AppError::InvalidState(_))));

    let unknown = set_status(state, &admin, order_id, "LOST").await;
    assert!(matches!(unknown, Err(AppError::InvalidArgument(_))));

    let not_admin = set_status(state, &customer, order_id, "CANCELLED").await;
    assert!(matches!(not_admin, Err(AppError::Forbidden)));

    let second = place_order(state, &customer, &[(p, 2)]).await?;
    let paid = order_service::update_payment_status(
        state,
        &admin,
        second,
        UpdatePaymentStatusRequest {
            status: "PAID".into(),
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.order_status, OrderStatus::Pending);

    let cancelled = order_service::cancel_order(state, &admin, second)
        .await?
        .data
        .expect("order");
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);

    Ok(())
}

async fn best_sellers_skip_cancelled_orders(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, admin) = actors(state).await?;
    let x = create_product(state, 1000, None, false).await?;
    let y = create_product(state, 300, None, false).await?;

    place_order(state, &customer, &[(x, 3), (y, 2)]).await?;
    place_order(state, &customer, &[(x, 5)]).await?;
    let cancelled = place_order(state, &customer, &[(y, 50)]).await?;
    order_service::cancel_order(state, &admin, cancelled).await?;

    let top = report_service::best_sellers(state, 1)
        .await?
        .data
        .expect("report");
    assert_eq!(top.items.len(), 1);
    assert_eq!(top.items[0].product_id, x);
    assert_eq!(top.items[0].total_sold, 8);
    assert_eq!(top.items[0].effective_price, Some(1000));

    let all = report_service::best_sellers(state, 10)
        .await?
        .data
        .expect("report");
    for entry in &all.items {
        let scalar = report_service::total_sold_for_product(state, entry.product_id)
            .await?
            .data
            .expect("report");
        assert_eq!(scalar.total_sold, entry.total_sold);
    }
    let y_sold = report_service::total_sold_for_product(state, y)
        .await?
        .data
        .expect("report");
    assert_eq!(y_sold.total_sold, 2);

    Ok(())
}

async fn trash_toggles_are_idempotent(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, admin) = actors(state).await?;
    let p = create_product(state, 400, None, false).await?;
    let order_id = place_order(state, &customer, &[(p, 3)]).await?;

    let trashed = order_service::move_to_trash(state, &admin, order_id)
        .await?
        .data
        .expect("order");
    assert!(trashed.trash);
    assert_eq!(trashed.total_amount, 1200);
    assert_eq!(trashed.order_status, OrderStatus::Pending);

    let listed = order_service::list_user_orders(state, &admin, customer.user_id)
        .await?
        .data
        .expect("orders");
    assert!(listed.items.iter().all(|o| o.id != order_id));
    let by_id = order_service::get_order(state, &admin, order_id)
        .await?
        .data
        .expect("order");
    assert!(by_id.order.trash);

    let once = order_service::restore_from_trash(state, &admin, order_id)
        .await?
        .data
        .expect("order");
    let twice = order_service::restore_from_trash(state, &admin, order_id)
        .await?
        .data
        .expect("order");
    assert!(!twice.trash);
    assert_eq!(once.updated_at, twice.updated_at);
    assert_eq!(once.total_amount, twice.total_amount);

    Ok(())
}

async fn missing_references_are_not_found(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, admin) = actors(state).await?;
    let p = create_product(state, 100, None, false).await?;

    let missing_product = order_service::create_order(
        state,
        &customer,
        order_request(customer.user_id, &[(p, 1), (Uuid::new_v4(), 1)]),
    )
    .await;
    assert!(matches!(missing_product, Err(AppError::NotFound(_))));

    let ghost = Uuid::new_v4();
    let missing_user =
        order_service::create_order(state, &admin, order_request(ghost, &[(p, 1)])).await;
    assert!(matches!(missing_user, Err(AppError::NotFound(_))));

    let missing_line = order_detail_service::update_item_quantity(
        state,
        &customer,
        Uuid::new_v4(),
        UpdateQuantityRequest { quantity: 2 },
    )
    .await;
    assert!(matches!(missing_line, Err(AppError::NotFound(_))));

    let empty = order_service::create_order(state, &customer, order_request(customer.user_id, &[]))
        .await;
    assert!(matches!(empty, Err(AppError::InvalidArgument(_))));

    let counts = order_service::status_counts(state, &admin)
        .await?
        .data
        .expect("counts");
    assert_eq!(counts.pending, 0);

    Ok(())
}

async fn concurrent_adds_merge_under_the_order_lock(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, _) = actors(state).await?;
    let base = create_product(state, 100, None, false).await?;
    let q = create_product(state, 15, None, false).await?;
    let order_id = place_order(state, &customer, &[(base, 1)]).await?;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let state = state.clone();
        let customer = customer.clone();
        tasks.push(tokio::spawn(async move {
            order_detail_service::add_item(
                &state,
                &customer,
                order_id,
                AddItemRequest {
                    product_id: q,
                    quantity: 1,
                },
            )
            .await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let stored = order_service::get_order(state, &customer, order_id)
        .await?
        .data
        .expect("order");
    let q_lines: Vec<_> = stored.items.iter().filter(|i| i.product_id == q).collect();
    assert_eq!(q_lines.len(), 1);
    assert_eq!(q_lines[0].quantity, 20);
    assert_eq!(stored.order.total_amount, 100 + 20 * 15);
    assert_consistent(&stored);

    Ok(())
}

async fn failed_line_change_keeps_the_stored_total(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, _) = actors(state).await?;
    let p = create_product(state, 1000, None, false).await?;
    let created = order_service::create_order(
        state,
        &customer,
        order_request(customer.user_id, &[(p, 2)]),
    )
    .await?
    .data
    .expect("order");
    let order_id = created.order.id;
    let line_id = line_for(&created, p);

    // Discounts are granted outside the order flow; store one directly.
    let backend = state.orm.get_database_backend();
    state
        .orm
        .execute(Statement::from_sql_and_values(
            backend,
            "UPDATE order_details SET discount_amount = 1500, final_price = 500 WHERE id = $1",
            [line_id.into()],
        ))
        .await?;
    state
        .orm
        .execute(Statement::from_sql_and_values(
            backend,
            "UPDATE orders SET total_amount = 500 WHERE id = $1",
            [order_id.into()],
        ))
        .await?;

    let below_discount = order_detail_service::update_item_quantity(
        state,
        &customer,
        line_id,
        UpdateQuantityRequest { quantity: 1 },
    )
    .await;
    assert!(matches!(below_discount, Err(AppError::InvalidArgument(_))));

    let stored = order_service::get_order(state, &customer, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(stored.order.total_amount, 500);
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.items[0].quantity, 2);
    assert_eq!(stored.items[0].discount_amount, 1500);
    assert_consistent(&stored);

    let missing_product = order_detail_service::add_item(
        state,
        &customer,
        order_id,
        AddItemRequest {
            product_id: Uuid::new_v4(),
            quantity: 1,
        },
    )
    .await;
    assert!(matches!(missing_product, Err(AppError::NotFound(_))));
    let stored = order_service::get_order(state, &customer, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(stored.order.total_amount, 500);

    Ok(())
}

async fn catalog_writes_report_constraint_conflicts(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, admin) = actors(state).await?;
    let ordered = create_product(state, 800, None, false).await?;
    place_order(state, &customer, &[(ordered, 1)]).await?;

    let blocked = product_service::delete_product(state, &admin, ordered).await;
    assert!(matches!(blocked, Err(AppError::InvalidState(_))));
    product_service::get_product(state, ordered).await?;

    let created = product_service::create_product(state, &admin, new_product("Ferris Cap"))
        .await?
        .data
        .expect("product");
    let duplicate = product_service::create_product(state, &admin, new_product("Ferris Cap")).await;
    assert!(matches!(duplicate, Err(AppError::InvalidArgument(_))));

    let other = product_service::create_product(state, &admin, new_product("Ferris Scarf"))
        .await?
        .data
        .expect("product");
    let renamed = product_service::update_product(
        state,
        &admin,
        other.id,
        UpdateProductRequest {
            name: Some("Ferris Cap".into()),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(renamed, Err(AppError::InvalidArgument(_))));

    let on_sale = product_service::update_product(
        state,
        &admin,
        created.id,
        UpdateProductRequest {
            price_sale: Some(Some(600)),
            is_on_sale: Some(true),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("product");
    assert_eq!(on_sale.effective_price, 600);

    let cleared = product_service::update_product(
        state,
        &admin,
        created.id,
        UpdateProductRequest {
            price_sale: Some(None),
            ..Default::default()
        },
    )
    .await?
    .data
    .expect("product");
    assert_eq!(cleared.price_sale, None);
    assert_eq!(cleared.effective_price, cleared.price);

    product_service::delete_product(state, &admin, created.id).await?;
    let gone = product_service::get_product(state, created.id).await;
    assert!(matches!(gone, Err(AppError::NotFound(_))));

    Ok(())
}

async fn cart_entries_merge_and_deactivate(state: &AppState) -> anyhow::Result<()> {
    reset(state).await?;
    let (customer, admin) = actors(state).await?;
    let mug = create_product(state, 1200, Some(900), true).await?;
    let tee = create_product(state, 1500, None, false).await?;
    let me = customer.user_id;

    let first = cart_service::add_to_cart(state, &customer, me, add(mug, 2))
        .await?
        .data
        .expect("entry");
    assert_eq!(first.unit_price, 900);
    assert_eq!(first.subtotal, 1800);

    let merged = cart_service::add_to_cart(state, &customer, me, add(mug, 3))
        .await?
        .data
        .expect("entry");
    assert_eq!(merged.id, first.id);
    assert_eq!(merged.quantity, 5);
    assert_eq!(merged.subtotal, 4500);

    let tee_entry = cart_service::add_to_cart(state, &customer, me, add(tee, 1))
        .await?
        .data
        .expect("entry");
    let count = cart_service::count_items(state, &customer, me)
        .await?
        .data
        .expect("count");
    assert_eq!(count.total_quantity, 6);

    let resized = cart_service::update_quantity(
        state,
        &customer,
        tee_entry.id,
        UpdateCartQuantityRequest { quantity: 4 },
    )
    .await?
    .data
    .expect("entry");
    assert_eq!(resized.quantity, 4);
    assert_eq!(resized.subtotal, 6000);

    let zero = cart_service::add_to_cart(state, &customer, me, add(tee, 0)).await;
    assert!(matches!(zero, Err(AppError::InvalidArgument(_))));
    let unknown = cart_service::add_to_cart(state, &customer, me, add(Uuid::new_v4(), 1)).await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
    let other_cart = cart_service::add_to_cart(state, &customer, admin.user_id, add(tee, 1)).await;
    assert!(matches!(other_cart, Err(AppError::Forbidden)));

    let hidden = cart_service::soft_delete(state, &customer, tee_entry.id)
        .await?
        .data
        .expect("entry");
    assert!(!hidden.active);
    let again = cart_service::soft_delete(state, &customer, tee_entry.id).await?;
    assert_eq!(again.message, "Unchanged");
    let member = cart_service::contains_product(state, &customer, me, tee)
        .await?
        .data
        .expect("membership");
    assert!(!member.in_cart);

    // A deactivated entry is history; adding again starts a fresh one.
    let fresh = cart_service::add_to_cart(state, &customer, me, add(tee, 2))
        .await?
        .data
        .expect("entry");
    assert_ne!(fresh.id, tee_entry.id);
    assert_eq!(fresh.quantity, 2);

    let listed = cart_service::list_cart(state, &admin, me, Pagination::new(1, 10))
        .await?
        .data
        .expect("cart");
    assert_eq!(listed.items.len(), 2);
    assert!(listed.items.iter().all(|item| item.active));

    let cleared = cart_service::clear_cart(state, &customer, me)
        .await?
        .data
        .expect("cleared");
    assert_eq!(cleared.cleared, 2);
    let count = cart_service::count_items(state, &customer, me)
        .await?
        .data
        .expect("count");
    assert_eq!(count.total_quantity, 0);

    cart_service::remove_entry(state, &customer, fresh.id).await?;
    let removed = cart_service::remove_entry(state, &customer, fresh.id).await;
    assert!(matches!(removed, Err(AppError::NotFound(_))));

    Ok(())
}

fn add(product_id: Uuid, quantity: i32) -> AddToCartRequest {
    AddToCartRequest {
        product_id,
        quantity,
    }
}

fn new_product(name: &str) -> CreateProductRequest {
    CreateProductRequest {
        name: name.into(),
        description: None,
        category_id: None,
        price: 900,
        price_sale: None,
        is_on_sale: None,
        quantity: Some(3),
        status: None,
    }
}

fn assert_consistent(order: &OrderWithItems) {
    let sum: i64 = order
        .items
        .iter()
        .filter(|item| !item.trash)
        .map(|item| item.final_price)
        .sum();
    assert_eq!(order.order.total_amount, sum);
    for item in &order.items {
        assert_eq!(item.subtotal, item.unit_price * i64::from(item.quantity));
        assert_eq!(item.final_price, item.subtotal - item.discount_amount);
    }
}

fn line_for(order: &OrderWithItems, product_id: Uuid) -> Uuid {
    order
        .items
        .iter()
        .find(|item| item.product_id == product_id)
        .map(|item| item.id)
        .expect("line for product")
}

fn order_request(user_id: Uuid, items: &[(Uuid, i32)]) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        shipping_address: "1 Crab Street".into(),
        shipping_phone: "555-0100".into(),
        shipping_name: "Ferris".into(),
        payment_method: "COD".into(),
        notes: None,
        items: items
            .iter()
            .map(|(product_id, quantity)| OrderItemRequest {
                product_id: *product_id,
                quantity: *quantity,
            })
            .collect(),
    }
}

async fn place_order(
    state: &AppState,
    user: &AuthUser,
    items: &[(Uuid, i32)],
) -> anyhow::Result<Uuid> {
    let resp = order_service::create_order(state, user, order_request(user.user_id, items)).await?;
    Ok(resp.data.expect("order").order.id)
}

async fn set_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    status: &str,
) -> Result<shop_backoffice::response::ApiResponse<shop_backoffice::models::Order>, AppError> {
    order_service::update_order_status(
        state,
        user,
        id,
        UpdateOrderStatusRequest {
            status: status.into(),
        },
    )
    .await
}

async fn setup_state(database_url: &str) -> anyhow::Result<AppState> {
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;
    let pool = create_pool(database_url).await?;
    Ok(AppState { pool, orm })
}

async fn reset(state: &AppState) -> anyhow::Result<()> {
    let backend = state.orm.get_database_backend();
    state
        .orm
        .execute(Statement::from_string(
            backend,
            "TRUNCATE TABLE cart_items, order_details, orders, audit_logs, products, categories, users CASCADE",
        ))
        .await?;
    Ok(())
}

async fn actors(state: &AppState) -> anyhow::Result<(AuthUser, AuthUser)> {
    let customer = create_user(state, "customer", "user").await?;
    let admin = create_user(state, "admin", "admin").await?;
    Ok((
        AuthUser {
            user_id: customer,
            role: "user".into(),
        },
        AuthUser {
            user_id: admin,
            role: "admin".into(),
        },
    ))
}

async fn create_user(state: &AppState, username: &str, role: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.com")),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn create_product(
    state: &AppState,
    price: i64,
    price_sale: Option<i64>,
    is_on_sale: bool,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    ProductActive {
        id: Set(id),
        category_id: Set(None),
        name: Set(format!("Product {id}")),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        price_sale: Set(price_sale),
        is_on_sale: Set(is_on_sale),
        quantity: Set(Some(10)),
        view: Set(0),
        status: Set(true),
        trash: Set(false),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(id)
}
