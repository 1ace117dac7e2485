// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic mirror-engine usage example.
//!
//! Demonstrates:
//! 1. Registering entities backed by an in-memory primary source
//! 2. Live write-behind replication into a SQLite mirror
//! 3. Running the batch reconciliation job
//! 4. Querying the mirror
//! 5. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use chrono::Utc;
use mirror_engine::{EntityRegistry, InMemorySource, MirrorConfig, MirrorEngine, RawValue, RefId};

fn user(seed: u8, name: &str, department: &str) -> RawValue {
    RawValue::record([
        ("_id", RawValue::Reference(RefId([seed; 12]))),
        ("name", RawValue::String(name.into())),
        ("department", RawValue::String(department.into())),
        ("createdAt", RawValue::Date(Utc::now())),
        ("updatedAt", RawValue::Date(Utc::now())),
    ])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n=== mirror-engine: Basic Usage Example ===\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Register entities and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("Registering entities...");

    // Pre-existing primary-store data (reconciliation will pick these up)
    let users = Arc::new(InMemorySource::with_records(vec![
        user(1, "Alice", "Engineering"),
        user(2, "Bob", "Payroll"),
    ]));
    let orgs = Arc::new(InMemorySource::new());

    let mut registry = EntityRegistry::new();
    registry.register("User", users.clone())?;
    registry.register("Organization", orgs.clone())?;

    let config = MirrorConfig {
        sql_url: Some("sqlite:temp/basic_usage_mirror.db?mode=rwc".into()),
        reconcile_page_size: 100,
    };
    std::fs::create_dir_all("temp")?;

    let engine = MirrorEngine::start(config, registry).await?;
    println!("Engine started\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Live path: primary writes show up in the mirror shortly after
    // ─────────────────────────────────────────────────────────────────────────
    println!("Inserting a user through the live path...");
    users.insert(user(3, "Carol", "Recruitment"));
    engine.flush().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Batch path: reconcile everything (bootstrap + repair)
    // ─────────────────────────────────────────────────────────────────────────
    println!("Running reconciliation...");
    for report in engine.reconcile().await {
        match &report.error {
            None => println!("  {}: {} records mirrored", report.entity, report.processed),
            Some(err) => println!("  {}: aborted: {}", report.entity, err),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Query the mirror
    // ─────────────────────────────────────────────────────────────────────────
    let count = engine.store().count_entity("User").await?;
    println!("\nMirror now holds {} User rows:", count);
    for row in engine.store().list_entity("User", 10).await? {
        println!(
            "  [{}] {} -> {}",
            row.id,
            row.source_id,
            row.data["name"].as_str().unwrap_or("?")
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    engine.shutdown().await;
    println!("\nDone.");
    Ok(())
}
