use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use common::{Result, Settings, SettingsStore};

use crate::sync::PairSynchronizer;

/// Reads and writes the deployment's runtime settings.
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    synchronizer: Arc<PairSynchronizer>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>, synchronizer: Arc<PairSynchronizer>) -> Self {
        Self {
            store,
            synchronizer,
        }
    }

    /// Current settings. The first read on a fresh database persists and
    /// returns the defaults.
    pub async fn get(&self) -> Result<Settings> {
        match self.store.load().await? {
            Some(mut settings) => {
                settings.normalize();
                Ok(settings)
            }
            None => {
                let settings = Settings::default();
                self.store.save(&settings).await?;
                info!("No settings stored yet, defaults created");
                Ok(settings)
            }
        }
    }

    /// Persist `settings` and start a full trading-pair resync in the
    /// background. The returned handle completes when the resync does.
    pub async fn save(&self, mut settings: Settings) -> Result<JoinHandle<()>> {
        settings.normalize();
        self.store.save(&settings).await?;
        info!(
            mode = %settings.crypto_mode,
            frequency = settings.fetch_frequency,
            exchanges = ?settings.exchanges,
            proxies = settings.proxies.len(),
            "Settings saved, resyncing trading pairs"
        );

        let synchronizer = Arc::clone(&self.synchronizer);
        Ok(tokio::spawn(async move {
            if let Err(e) = synchronizer.sync_all(&settings).await {
                error!(error = %e, "Trading pair resync after settings change failed");
            }
        }))
    }
}
