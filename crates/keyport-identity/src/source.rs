//! Configuration sources
//!
//! The configuration store is external. Keyport only needs a current snapshot
//! of provider configurations and a way to be told when it changes.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use keyport_core::{ProviderConfig, Result};

use crate::settings::Settings;

/// Supplies provider configuration snapshots
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Current snapshot (pull)
    async fn snapshot(&self) -> Result<Vec<ProviderConfig>>;

    /// Receiver notified with every new snapshot (push)
    fn subscribe(&self) -> watch::Receiver<Vec<ProviderConfig>>;
}

// =============================================================================
// In-memory Source
// =============================================================================

/// Source fed programmatically, e.g. by an embedding application that
/// watches its own store.
pub struct StaticConfigSource {
    sender: watch::Sender<Vec<ProviderConfig>>,
}

impl StaticConfigSource {
    pub fn new(configs: Vec<ProviderConfig>) -> Self {
        let (sender, _) = watch::channel(configs);
        Self { sender }
    }

    /// Publish a new snapshot to all subscribers
    pub fn publish(&self, configs: Vec<ProviderConfig>) {
        self.sender.send_replace(configs);
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn snapshot(&self) -> Result<Vec<ProviderConfig>> {
        Ok(self.sender.borrow().clone())
    }

    fn subscribe(&self) -> watch::Receiver<Vec<ProviderConfig>> {
        self.sender.subscribe()
    }
}

// =============================================================================
// File Source
// =============================================================================

/// Source backed by the `providers` list of a settings file.
///
/// Call [`FileConfigSource::reload`] when the file may have changed; a new
/// snapshot is published only if its content differs.
pub struct FileConfigSource {
    path: PathBuf,
    sender: watch::Sender<Vec<ProviderConfig>>,
}

impl FileConfigSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let configs = Settings::from_file(&path)?.providers;
        info!(
            "Loaded {} provider configuration(s) from {}",
            configs.len(),
            path.display()
        );

        let (sender, _) = watch::channel(configs);
        Ok(Self { path, sender })
    }

    /// Re-read the file; returns whether a new snapshot was published.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn reload(&self) -> Result<bool> {
        let configs = Settings::from_file(&self.path)?.providers;

        let changed = self.sender.send_if_modified(|current| {
            if *current == configs {
                false
            } else {
                *current = configs;
                true
            }
        });

        if changed {
            info!("Provider configuration changed");
        } else {
            debug!("Provider configuration unchanged");
        }
        Ok(changed)
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn snapshot(&self) -> Result<Vec<ProviderConfig>> {
        Ok(self.sender.borrow().clone())
    }

    fn subscribe(&self) -> watch::Receiver<Vec<ProviderConfig>> {
        self.sender.subscribe()
    }
}
