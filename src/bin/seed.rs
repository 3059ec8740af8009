use shop_backoffice::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;
    let pool = create_pool(&config.database_url).await?;

    let admin_id = ensure_user(&pool, "admin", "admin@example.com", "admin").await?;
    let user_id = ensure_user(&pool, "customer", "customer@example.com", "user").await?;
    let apparel = ensure_category(&pool, "Apparel").await?;
    let drinkware = ensure_category(&pool, "Drinkware").await?;
    seed_products(&pool, apparel, drinkware).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    username: &str,
    email: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, username, email, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(email)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {username} (role={role})");
    Ok(id)
}

async fn ensure_category(pool: &sqlx::PgPool, name: &str) -> anyhow::Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO categories (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn seed_products(pool: &sqlx::PgPool, apparel: Uuid, drinkware: Uuid) -> anyhow::Result<()> {
    // (category, name, description, price, sale price, on sale, quantity)
    let products = vec![
        (apparel, "Axum Hoodie", "Warm hoodie for Rustaceans", 550000_i64, Some(450000_i64), true, 50),
        (apparel, "Rust Sticker Pack", "Decorate your laptop", 50000, None, false, 200),
        (drinkware, "Ferris Mug", "Coffee tastes better with Ferris", 120000, Some(99000), false, 100),
        (drinkware, "Tokio Tumbler", "Keeps async coffee hot", 180000, None, false, 40),
    ];

    for (category_id, name, desc, price, price_sale, is_on_sale, quantity) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, category_id, name, description, price, price_sale, is_on_sale, quantity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(category_id)
        .bind(name)
        .bind(desc)
        .bind(price)
        .bind(price_sale)
        .bind(is_on_sale)
        .bind(quantity)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
