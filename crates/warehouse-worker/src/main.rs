use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use warehouse_core::cohort::calculate::{recalculate_exclusive, RecalculationOutcome};
use warehouse_core::cohort::pg::{CandidateFilter, PgCohortStore};
use warehouse_core::config::WorkerSettings;
use warehouse_core::store;

/// Periodic cohort refresher:
/// - select dynamic cohorts that are due (or whose calculation claim went stale)
/// - recalculate them one at a time, skipping any another run has claimed
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = WorkerSettings::from_env()?;
    let store = PgCohortStore::new(store::connect(&settings.database_url).await?);

    let filter = CandidateFilter {
        min_interval: settings.refresh_interval,
        stale_after: settings.stale_after,
        max_errors: settings.max_errors,
        limit: settings.batch_limit,
    };
    let stale_after = chrono::Duration::from_std(settings.stale_after)
        .context("COHORT_STALE_AFTER_SECONDS is out of range")?;

    loop {
        tokio::time::sleep(settings.refresh_interval).await;

        let candidates = match store.calculation_candidates(&filter).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!("Failed to load cohort candidates: {e}");
                continue;
            }
        };
        tracing::info!(candidates = candidates.len(), "cohort refresh tick");

        for mut cohort in candidates {
            let stale_before = Some(Utc::now() - stale_after);
            match recalculate_exclusive(&store, &mut cohort, stale_before).await {
                Ok(RecalculationOutcome::Recalculated { count }) => {
                    tracing::info!(cohort_id = cohort.id, count, "Recalculated cohort")
                }
                Ok(RecalculationOutcome::StaticUnchanged { .. }) => {}
                Ok(RecalculationOutcome::Skipped) => {
                    tracing::debug!(cohort_id = cohort.id, "Cohort claimed elsewhere")
                }
                Err(e) => tracing::error!(cohort_id = cohort.id, "Failed to recalculate cohort: {e}"),
            }
        }
    }
}
