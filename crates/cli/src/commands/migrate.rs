use serde_json::{json, Value};
use teamdesk_core::config::{AppConfig, LoadOptions};
use teamdesk_db::{connect_with_settings, ensure_data_dir, migrations};

use crate::commands::{CommandResult, ErrorClass};

type Failure = (ErrorClass, String);

/// Applies pending migrations and lists every known migration in `details.migrations`.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::failed("migrate", ErrorClass::ConfigValidation, error.to_string()),
    };

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| (ErrorClass::RuntimeInit, format!("async runtime: {error}")))
        .and_then(|runtime| runtime.block_on(apply(&config)));

    match outcome {
        Ok(known) => CommandResult::ok(
            "migrate",
            format!("schema is current ({} migrations)", known.len()),
            json!({ "database_url": config.database.url, "migrations": known }),
        ),
        Err((class, message)) => CommandResult::failed("migrate", class, message),
    }
}

async fn apply(config: &AppConfig) -> Result<Vec<Value>, Failure> {
    // File databases need their directory; `sqlite::memory:` does not.
    if config.database.url.starts_with("sqlite://") {
        ensure_data_dir(&config.storage.data_dir).await.map_err(|error| {
            (ErrorClass::DataDir, format!("{}: {error}", config.storage.data_dir.display()))
        })?;
    }

    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| (ErrorClass::DbConnectivity, error.to_string()))?;

    let applied = migrations::run_pending(&pool).await;
    pool.close().await;
    applied.map_err(|error| (ErrorClass::Migration, error.to_string()))?;

    Ok(migrations::MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .map(|migration| json!({ "version": migration.version, "description": migration.description }))
        .collect())
}
