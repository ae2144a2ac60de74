//! FlightSurety ledger node
//!
//! Runs the ledger service together with the flight indexer read model and
//! a simulated oracle fleet that answers flight status requests.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flightsurety_ledger::config::{LedgerConfig, OracleFleetConfig};
use flightsurety_ledger::indexer::FlightIndexer;
use flightsurety_ledger::services::OracleFleet;
use flightsurety_ledger::storage::{JsonFileStore, LedgerStore, MemoryStore};
use flightsurety_ledger::{LedgerError, LedgerHandle, LedgerService};

const FLEET_SUPERVISOR_MAX_BACKOFF_SECONDS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    let fleet_config = OracleFleetConfig::from_env().context("invalid oracle fleet configuration")?;

    let store: Arc<dyn LedgerStore> = match &config.state_file {
        Some(path) => {
            info!(path = %path.display(), "using JSON snapshot store");
            Arc::new(JsonFileStore::new(path.clone()))
        }
        None => {
            warn!("LEDGER_STATE_FILE not set; ledger state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let (ledger, service_task) = LedgerService::spawn(&config, store)
        .await
        .context("failed to start ledger service")?;
    info!(
        operational = ledger.is_operational(),
        federation = ledger.federation_size(),
        flights = ledger.registered_flight_count(),
        "ledger ready"
    );

    let indexer = FlightIndexer::new(ledger.clone());
    let indexer_task = tokio::spawn(indexer.clone().run());

    // Start and supervise the oracle fleet.
    let fleet_task = tokio::spawn(supervise_fleet(ledger.clone(), fleet_config));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    fleet_task.abort();
    indexer_task.abort();
    let _ = fleet_task.await;
    let _ = indexer_task.await;

    info!(
        flights = indexer.flights().await.len(),
        pending = indexer.pending_flights().await.len(),
        cursor = indexer.cursor().await,
        "final read model"
    );

    drop(indexer);
    drop(ledger);
    if let Err(join_error) = service_task.await {
        error!(error = %join_error, "ledger service task failed");
    }

    Ok(())
}

async fn supervise_fleet(ledger: LedgerHandle, config: OracleFleetConfig) {
    if config.count == 0 {
        info!("Oracle fleet disabled: ORACLE_COUNT is 0");
        return;
    }

    let mut restart_count: u32 = 0;
    loop {
        let fleet_ledger = ledger.clone();
        let fleet_config = config.clone();
        // Dropping the set (when this supervisor is aborted) aborts the fleet too.
        let mut tasks = JoinSet::new();
        tasks.spawn(async move {
            let fleet = OracleFleet::register(fleet_ledger, &fleet_config).await?;
            fleet.run().await
        });
        let Some(outcome) = tasks.join_next().await else {
            break;
        };

        match outcome {
            Ok(Ok(())) => {
                info!("oracle fleet exited cleanly; stopping supervisor");
                break;
            }
            Ok(Err(LedgerError::ServiceUnavailable)) => {
                info!("ledger service is gone; stopping oracle fleet supervisor");
                break;
            }
            Ok(Err(err)) => {
                error!(error = %err, "oracle fleet failed; restarting");
            }
            Err(join_error) => {
                if join_error.is_panic() {
                    error!("oracle fleet panicked; restarting");
                } else {
                    error!(error = %join_error, "oracle fleet task failed; restarting");
                }
            }
        }

        restart_count = restart_count.saturating_add(1);
        let backoff_seconds =
            (2u64.saturating_pow(restart_count.min(5))).min(FLEET_SUPERVISOR_MAX_BACKOFF_SECONDS);
        warn!(restart_count, backoff_seconds, "oracle fleet restart backoff");
        sleep(Duration::from_secs(backoff_seconds)).await;
    }
}
