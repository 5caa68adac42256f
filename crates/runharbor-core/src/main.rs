// Copyright (C) 2025 Runharbor contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runharbor Core - Run Lifecycle Engine
//!
//! The standalone service is responsible for:
//! - Expiry sweep (destroy workers and delete runs whose expiry has passed)
//! - Completion sweep (finish detection and one-shot notification)
//!
//! Note: run submission and the REST/SOAP surface are handled by the
//! adapter layer embedding this crate; this binary only keeps the record
//! base clean.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use runharbor_core::config::Config;
use runharbor_core::migrations;
use runharbor_core::persistence::PostgresRunStore;
use runharbor_core::remote::LocalProcessConnector;
use runharbor_core::runtime::HarborRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runharbor_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Runharbor Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        expiry_interval = ?config.expiry_sweep_interval,
        completion_interval = ?config.completion_sweep_interval,
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");

    // Verify connection
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running database migrations...");
    migrations::run_postgres(&pool).await?;
    info!("Migrations completed");

    let store = Arc::new(PostgresRunStore::new(pool.clone()));

    let runtime = HarborRuntime::builder()
        .store(store)
        .connector(Arc::new(LocalProcessConnector))
        .expiry_interval(config.expiry_sweep_interval)
        .completion_interval(config.completion_sweep_interval)
        .build()?
        .start()
        .await?;

    info!("Runharbor Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
