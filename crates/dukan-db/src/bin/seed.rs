//! # Seed Data Generator
//!
//! Populates a fresh database with a working shop for development:
//! an admin account, the standard roles, staff, the parts catalog, and
//! opening stock.
//!
//! ## Usage
//! ```bash
//! cargo run -p dukan-db --bin seed
//!
//! # Specify database path
//! cargo run -p dukan-db --bin seed -- --db ./data/dukan.db
//! ```
//!
//! Refuses to run against a database that already has users, so it can
//! never scramble a live shop.

use std::env;

use dukan_core::PermissionSet;
use dukan_db::ledger::stock::NewProduct;
use dukan_db::{ledger_config_from_env, Database, DbConfig};
use tracing_subscriber::EnvFilter;

/// Categories with their starter parts: (sku, name, cost, price, opening).
const CATALOG: &[(&str, &[(&str, &str, i64, i64, i64)])] = &[
    (
        "Screens",
        &[
            ("SCREEN-A52", "Galaxy A52 screen assembly", 90_00, 150_00, 6),
            ("SCREEN-A13", "Galaxy A13 screen assembly", 70_00, 120_00, 4),
            ("SCREEN-IP11", "iPhone 11 screen assembly", 110_00, 180_00, 5),
            ("SCREEN-IP13", "iPhone 13 screen assembly", 160_00, 260_00, 3),
            ("SCREEN-RN10", "Redmi Note 10 screen", 65_00, 110_00, 4),
        ],
    ),
    (
        "Batteries",
        &[
            ("BAT-A52", "Galaxy A52 battery", 35_00, 65_00, 10),
            ("BAT-IP11", "iPhone 11 battery", 40_00, 75_00, 8),
            ("BAT-IP13", "iPhone 13 battery", 55_00, 95_00, 6),
            ("BAT-RN10", "Redmi Note 10 battery", 30_00, 55_00, 10),
        ],
    ),
    (
        "Charging",
        &[
            ("CHG-USBC-20W", "20W USB-C wall charger", 12_00, 25_00, 20),
            ("CHG-LIGHT-CAB", "Lightning cable 1m", 5_00, 12_00, 30),
            ("CHG-USBC-CAB", "USB-C cable 1m", 4_00, 10_00, 30),
            ("PORT-USBC", "USB-C charging port module", 8_00, 20_00, 12),
        ],
    ),
    (
        "Accessories",
        &[
            ("CASE-A52", "Galaxy A52 silicone case", 6_00, 15_00, 15),
            ("CASE-IP13", "iPhone 13 silicone case", 8_00, 20_00, 15),
            ("GLASS-UNI-65", "Tempered glass 6.5\"", 2_00, 8_00, 50),
            ("SIM-TOOL", "SIM eject tool", 50, 3_00, 40),
        ],
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./dukan_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Dukan POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./dukan_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Dukan POS Seed Data Generator");
    println!("=============================");
    println!("Database: {db_path}");
    println!();

    let config = DbConfig::new(&db_path).ledger(ledger_config_from_env());
    let db = Database::new(config).await?;
    println!("✓ Connected, migrations applied");

    let existing = db.users().list_users().await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} users", existing.len());
        println!("  Skipping seed to avoid scrambling a live shop.");
        return Ok(());
    }

    // Identity: admin, roles, staff
    let admin = db
        .users()
        .bootstrap_admin("admin", "Shop Owner", "change-me")
        .await?;
    let cashier_role = db
        .users()
        .create_role("cashier", PermissionSet::cashier(), &admin.id)
        .await?;
    let technician_role = db
        .users()
        .create_role("technician", PermissionSet::technician(), &admin.id)
        .await?;
    db.users()
        .create_user("sara", "Sara Hassan", "change-me", &cashier_role.id, &admin.id)
        .await?;
    db.users()
        .create_user("tarek", "Tarek Adel", "change-me", &technician_role.id, &admin.id)
        .await?;
    println!("✓ Admin, roles, and staff created (passwords: change-me)");

    // Suppliers
    let supplier = db
        .stock()
        .create_supplier("Downtown Parts Wholesale", Some("0223456789"), &admin.id)
        .await?;
    println!("✓ Supplier created");

    // Catalog with opening stock
    let start = std::time::Instant::now();
    let mut created = 0;
    for (category_name, parts) in CATALOG {
        let category = db.stock().create_category(category_name, &admin.id).await?;
        for (sku, name, cost_cents, price_cents, opening) in *parts {
            db.stock()
                .create_product(
                    NewProduct {
                        sku: (*sku).to_string(),
                        name: (*name).to_string(),
                        description: None,
                        category_id: category.id.clone(),
                        supplier_id: Some(supplier.id.clone()),
                        cost_cents: *cost_cents,
                        price_cents: *price_cents,
                        reorder_level: 3,
                        opening_quantity: *opening,
                    },
                    &admin.id,
                )
                .await?;
            created += 1;
        }
    }
    println!("✓ {created} products created in {:?}", start.elapsed());

    let low = db.stock().low_stock().await?;
    println!("  {} products already at reorder level", low.len());

    println!();
    println!("✓ Seed complete!");
    Ok(())
}
