pub mod cron;
pub mod server;
pub mod telegram;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{prelude::*, state::AppState};

const RESTART_DELAY: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Plugin: Send + Sync {
  fn name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()>;
}

/// Runs every registered plugin and restarts the ones that stop.
pub struct App {
  plugins: Vec<Arc<dyn Plugin>>,
}

impl App {
  pub fn new() -> Self {
    Self { plugins: Vec::new() }
  }

  pub fn register<P: Plugin + 'static>(mut self, plugin: P) -> Self {
    self.plugins.push(Arc::new(plugin));
    self
  }

  pub fn spawn(self, app: Arc<AppState>) -> Vec<JoinHandle<()>> {
    self
      .plugins
      .into_iter()
      .map(|plugin| tokio::spawn(supervise(plugin, app.clone())))
      .collect()
  }
}

async fn supervise(plugin: Arc<dyn Plugin>, app: Arc<AppState>) {
  let name = plugin.name();
  info!("SYSTEM: Service `{name}` initialized");

  loop {
    let handle = tokio::spawn({
      let app = app.clone();
      let plugin = plugin.clone();
      async move { plugin.start(app).await }
    });

    match handle.await {
      Ok(Ok(())) => warn!("Service `{name}` stopped unexpectedly (Ok)."),
      Ok(Err(err)) => error!("Service `{name}` crashed with error: {err:#}."),
      Err(err) if err.is_cancelled() => {
        info!("Service `{name}` shutdown.");
        break;
      }
      Err(_) => error!("Service `{name}` PANICKED!"),
    }

    time::sleep(RESTART_DELAY).await;
    info!("SYSTEM: Restarting service `{name}`...");
  }
}
