//! ZK Datasource - demo driver.
//!
//! Builds a dynamic data source over a directory-backed configuration store,
//! reports the connected user, then re-queries every time a line is entered on
//! stdin. Edit the files under the configuration directory to watch the pool
//! being rebuilt.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use zk_datasource::config::Config;
use zk_datasource::db::{SqlxPool, SqlxPoolFactory};
use zk_datasource::store::DirectoryConfigStore;
use zk_datasource::{DataSourceResult, DynamicDataSource};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// Check out a connection and print who it is logged in as.
async fn test_connection(datasource: &DynamicDataSource<SqlxPool>) -> DataSourceResult<()> {
    let mut connection = datasource.get_connection().await?;
    connection.ping().await?;
    let generation = datasource.generation();

    match connection.current_user().await? {
        Some(user) => println!("Current login user: {} (pool generation {})", user, generation),
        None => println!(
            "Connected to {} (pool generation {})",
            connection.db_type(),
            generation
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        store_dir = ?config.store_dir,
        config_path = %config.config_path,
        "Starting ZK Datasource v{}",
        env!("CARGO_PKG_VERSION")
    );

    let store = Arc::new(DirectoryConfigStore::new(&config.store_dir));
    let datasource =
        DynamicDataSource::connect(store, SqlxPoolFactory::new(), config.data_source_options())
            .await
            .inspect_err(|e| error!(error = %e, suggestion = ?e.suggestion(), "Startup failed"))?;
    println!("Data source initialized");

    test_connection(&datasource).await?;

    // Wait for input; configuration changes are picked up in the background meanwhile
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(_) => {
                    let status = datasource.status();
                    if let Some(last_error) = &status.last_error {
                        warn!(
                            error = %last_error,
                            generation = status.generation,
                            "Last reload failed, serving an older configuration"
                        );
                    }
                    if let Err(e) = test_connection(&datasource).await {
                        error!(error = %e, suggestion = ?e.suggestion(), "Query failed");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}
