//! Seed script for local development and demos.
//!
//! Run with: cargo run --bin seed-data
//!
//! Creates the standard regional shipping options, a small catalog, and
//! (unless one exists) an admin account. Products and the admin are
//! skipped when already present; shipping options are replaced wholesale
//! so fee changes here take effect on re-run.

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tracing::info;
use uuid::Uuid;

use storefront_api::auth::AuthService;
use storefront_api::entities::{product, shipping_option, user};
use storefront_api::services::catalog::slugify;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cfg = storefront_api::config::load_config()?;
    if cfg.is_production() && std::env::var("ALLOW_PROD_SEED").as_deref() != Ok("true") {
        anyhow::bail!("Refusing to seed a production database. Set ALLOW_PROD_SEED=true to override.");
    }

    info!("Connecting to database");
    let db = storefront_api::db::establish_connection_from_app_config(&cfg).await?;
    storefront_api::db::run_migrations(&db).await?;

    let admin = seed_admin(&db, &cfg).await?;
    if admin {
        info!("Created admin account");
    }

    let products = seed_products(&db).await?;
    info!("Inserted {} products", products);

    let options = seed_shipping_options(&db).await?;
    info!("Seeded {} shipping options", options);

    info!("Seed complete. Browse the catalog at http://localhost:{}/api/product", cfg.port);
    Ok(())
}

async fn seed_admin(
    db: &sea_orm::DatabaseConnection,
    cfg: &storefront_api::config::AppConfig,
) -> anyhow::Result<bool> {
    let email = std::env::var("SEED_ADMIN_EMAIL").unwrap_or_else(|_| "admin@example.com".into());
    let password = std::env::var("SEED_ADMIN_PASSWORD").unwrap_or_else(|_| "Password123!".into());

    let existing = user::Entity::find()
        .filter(user::Column::Email.eq(email.clone()))
        .one(db)
        .await?;
    if existing.is_some() {
        info!("Admin account already exists: {}", email);
        return Ok(false);
    }

    let auth = AuthService::new(cfg.jwt_secret.clone(), cfg.jwt_expiration);
    let hash = auth
        .hash_password(&password)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;

    let now = Utc::now();
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Admin User".into()),
        email: Set(email.clone()),
        password_hash: Set(Some(hash)),
        role: Set(user::Role::Admin),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    info!("Admin login: {}", email);
    Ok(true)
}

async fn seed_products(db: &sea_orm::DatabaseConnection) -> anyhow::Result<usize> {
    let products_data = vec![
        (
            "Classic White Tee",
            "TEE-WHITE-001",
            dec!(2500),
            50,
            "menswear",
            "Comfortable classic white t-shirt made from 100% cotton.",
            serde_json::json!(["S", "M", "L", "XL"]),
            serde_json::json!(["#ffffff", "#000000"]),
        ),
        (
            "Slim Fit Jeans",
            "JEANS-SLIM-001",
            dec!(7500),
            40,
            "jeans",
            "Stylish slim fit denim with a comfortable stretch.",
            serde_json::json!(["30", "32", "34", "36"]),
            serde_json::json!(["Blue", "Black"]),
        ),
        (
            "Everyday Backpack",
            "BAG-001",
            dec!(10000),
            20,
            "bags",
            "Durable backpack for daily use with multiple compartments.",
            serde_json::json!([]),
            serde_json::json!(["Black", "Olive"]),
        ),
        (
            "Classic Heels",
            "HEELS-RED-001",
            dec!(15000),
            15,
            "heels",
            "Elegant heels perfect for an evening out.",
            serde_json::json!(["36", "37", "38", "39", "40"]),
            serde_json::json!(["Red", "Black"]),
        ),
        (
            "Signature Cap",
            "CAP-001",
            dec!(2000),
            80,
            "cap",
            "Classic cap with embroidered logo.",
            serde_json::json!([]),
            serde_json::json!(["Black", "White"]),
        ),
    ];

    let now = Utc::now();
    let mut inserted = 0;

    for (name, sku, price, quantity, category, description, sizes, colors) in products_data {
        let exists = product::Entity::find()
            .filter(product::Column::Sku.eq(sku))
            .one(db)
            .await?;
        if exists.is_some() {
            info!("Product exists, skipping: {}", sku);
            continue;
        }

        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(slugify(name)),
            sku: Set(sku.to_string()),
            description: Set(Some(description.to_string())),
            price: Set(price),
            stock_quantity: Set(quantity),
            is_available: Set(true),
            category: Set(Some(category.to_string())),
            image_url: Set(None),
            gallery: Set(None),
            sizes: Set(Some(sizes)),
            colors: Set(Some(colors)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
        inserted += 1;
    }

    Ok(inserted)
}

async fn seed_shipping_options(db: &sea_orm::DatabaseConnection) -> anyhow::Result<usize> {
    // (region, base, per_item, max_for_base, discount_pct, discount_active)
    let options = vec![
        ("Lagos", dec!(2500), dec!(500), 2, dec!(10), true),
        ("Abuja", dec!(3000), dec!(600), 2, dec!(5), true),
        ("Kano", dec!(3500), dec!(700), 1, dec!(0), false),
        ("Rivers", dec!(2800), dec!(550), 2, dec!(15), true),
        ("Oyo", dec!(2700), dec!(520), 2, dec!(8), true),
    ];

    shipping_option::Entity::delete_many().exec(db).await?;

    let now = Utc::now();
    for (region, base, per_item, max_for_base, discount, discount_active) in &options {
        shipping_option::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Standard Delivery".into()),
            region: Set(region.to_string()),
            base_price: Set(*base),
            price_per_item: Set(*per_item),
            max_items_for_base: Set(*max_for_base),
            discount_percentage: Set(*discount),
            discount_active: Set(*discount_active),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
    }

    Ok(options.len())
}
