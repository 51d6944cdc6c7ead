use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::{plugins::Plugin, prelude::*, state::AppState};

/// Periodic cache upkeep and ledger consistency check.
pub struct Reconcile;

#[async_trait]
impl Plugin for Reconcile {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = time::interval(app.config.reconcile_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      interval.tick().await;
      app.cache.purge_expired().await;

      match app.sv().ledger.reconcile().await {
        Ok(report) if report.drifted > 0 => error!(
          "Reconciliation: {} of {} balances drifted from the ledger",
          report.drifted, report.users
        ),
        Ok(report) => info!(
          "Reconciled {} balances, dropped {} stale cache entries",
          report.users, report.stale
        ),
        Err(err) => error!("Reconciliation failed: {err}"),
      }
    }
  }
}
