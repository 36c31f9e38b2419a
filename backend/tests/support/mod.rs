//! Shared helpers for backend integration tests against embedded PostgreSQL.
//!
//! Integration tests compile as separate crates under `backend/tests/`, so
//! the cluster skip policy, database provisioning, and seeding helpers live
//! here instead of being copied into every suite.

use postgres::{Client, NoTls};
use telematics_backend::outbound::persistence::run_pending_migrations;
use tokio::runtime::Runtime;
use uuid::Uuid;

/// Returns true when `SKIP_TEST_CLUSTER` is set to a truthy value.
///
/// Truthy values: "1", "true", "yes" (case-insensitive).
pub fn should_skip_test_cluster() -> bool {
    std::env::var("SKIP_TEST_CLUSTER")
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Handles embedded cluster setup failures consistently across suites.
///
/// When `SKIP_TEST_CLUSTER` is truthy, prints a skip marker and returns
/// `None`. Otherwise panics so CI breakage is not masked.
pub fn handle_cluster_setup_failure<T>(reason: impl std::fmt::Display) -> Option<T> {
    if should_skip_test_cluster() {
        eprintln!("SKIP-TEST-CLUSTER: {reason}");
        None
    } else {
        panic!("Test cluster setup failed: {reason}. Set SKIP_TEST_CLUSTER=1 to skip.");
    }
}

/// Render a `postgres` error with its SQLSTATE and detail when available.
pub fn format_postgres_error(error: &postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };
    let mut summary = format!(
        "postgres error {:?}: {}",
        db_error.code(),
        db_error.message()
    );
    if let Some(detail) = db_error.detail() {
        summary.push_str("; detail: ");
        summary.push_str(detail);
    }
    summary
}

/// Create a fresh database on the cluster and run the embedded migrations.
///
/// `admin_url` must point at an existing database (usually `postgres`);
/// `url_for` maps the new database name to its connection URL.
pub fn provision_database(
    runtime: &Runtime,
    admin_url: &str,
    url_for: impl FnOnce(&str) -> String,
) -> Result<String, String> {
    let name = format!("telematics_{}", Uuid::new_v4().simple());
    let mut client = Client::connect(admin_url, NoTls).map_err(|err| format_postgres_error(&err))?;
    client
        .batch_execute(&format!("CREATE DATABASE \"{name}\""))
        .map_err(|err| format_postgres_error(&err))?;
    let url = url_for(&name);
    runtime
        .block_on(run_pending_migrations(&url))
        .map_err(|err| err.to_string())?;
    Ok(url)
}

/// Insert a device definition, a device, and the named integrations.
pub fn seed_device(url: &str, device_id: &str, integration_ids: &[&str]) -> Result<(), String> {
    let mut client = Client::connect(url, NoTls).map_err(|err| format_postgres_error(&err))?;
    client
        .execute(
            "INSERT INTO device_definitions (id, make, model, year) \
             VALUES ('def-1', 'Ford', 'Escape', 2021) ON CONFLICT DO NOTHING",
            &[],
        )
        .map_err(|err| format_postgres_error(&err))?;
    client
        .execute(
            "INSERT INTO user_devices (id, user_id, device_definition_id) VALUES ($1, 'user-1', 'def-1')",
            &[&device_id],
        )
        .map_err(|err| format_postgres_error(&err))?;
    for integration_id in integration_ids {
        client
            .execute(
                "INSERT INTO integrations (id, vendor, integration_type, style) \
                 VALUES ($1, $1, 'API', 'Webhook') ON CONFLICT DO NOTHING",
                &[integration_id],
            )
            .map_err(|err| format_postgres_error(&err))?;
    }
    Ok(())
}
