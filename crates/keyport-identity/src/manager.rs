//! Provider Manager - keeps live providers in step with configuration
//!
//! The manager owns one provider instance per configured provider name. A
//! configuration snapshot is applied by building the next name→instance map
//! off to the side and publishing it with a single pointer swap, so readers
//! always see either the previous or the next complete set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use keyport_core::{KeyportError, OAuthProvider, ProviderConfig, Result};

use crate::registry::{ProviderContext, TypeRegistry};
use crate::source::ConfigSource;

#[derive(Clone)]
struct ProviderEntry {
    config: ProviderConfig,
    provider: Arc<dyn OAuthProvider>,
}

type ProviderMap = HashMap<String, ProviderEntry>;

/// Last rejected configuration per name, with the error it produced
type FailedConfigs = HashMap<String, (ProviderConfig, KeyportError)>;

/// A configuration problem isolated to one provider entry.
#[derive(Debug)]
pub struct ProviderConfigError {
    pub name: String,
    pub error: KeyportError,
}

/// Outcome of applying one configuration snapshot.
#[derive(Debug, Default)]
pub struct ConfigureReport {
    /// Providers built (or rebuilt) by this call
    pub constructed: Vec<String>,
    /// Providers whose configuration was unchanged and kept as-is
    pub reused: Vec<String>,
    /// Providers dropped because they left the configuration
    pub removed: Vec<String>,
    pub errors: Vec<ProviderConfigError>,
}

impl ConfigureReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse per-entry errors into one `Configuration` error.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }

        let details = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.name, e.error))
            .collect::<Vec<_>>()
            .join("; ");
        Err(KeyportError::configuration(format!(
            "{} provider(s) failed to configure: {}",
            self.errors.len(),
            details
        )))
    }
}

/// Holds the configured provider instances
pub struct ProviderManager {
    registry: Arc<TypeRegistry>,
    context: ProviderContext,
    providers: RwLock<Arc<ProviderMap>>,
    /// Serializes `configure` and remembers rejected entries between calls
    failed: Mutex<FailedConfigs>,
}

impl ProviderManager {
    pub fn new(registry: Arc<TypeRegistry>, context: ProviderContext) -> Self {
        Self {
            registry,
            context,
            providers: RwLock::new(Arc::new(HashMap::new())),
            failed: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Apply a configuration snapshot.
    ///
    /// Entries are processed independently: an unknown type or a failing
    /// factory is reported for that entry and any previous instance under the
    /// same name stays in service. Entries equal to the live configuration
    /// are not rebuilt, and an entry equal to the last rejected one reports
    /// the same error again without calling its factory. Names missing from
    /// the snapshot are dropped.
    #[instrument(skip(self, configs), fields(providers = configs.len()))]
    pub async fn configure(&self, configs: &[ProviderConfig]) -> ConfigureReport {
        let mut failed = self.failed.lock().await;
        let current = self.providers.read().await.clone();

        let mut report = ConfigureReport::default();
        let mut next: ProviderMap = HashMap::with_capacity(configs.len());
        let mut next_failed = FailedConfigs::new();
        let mut seen: HashSet<&str> = HashSet::with_capacity(configs.len());

        for config in configs {
            if !seen.insert(config.name.as_str()) {
                report.errors.push(ProviderConfigError {
                    name: config.name.clone(),
                    error: KeyportError::configuration(format!(
                        "duplicate provider name '{}'",
                        config.name
                    )),
                });
                continue;
            }

            let previous = current.get(&config.name);
            if let Some(entry) = previous.filter(|entry| entry.config == *config) {
                debug!("Provider {} unchanged, keeping instance", config.name);
                next.insert(config.name.clone(), entry.clone());
                report.reused.push(config.name.clone());
                continue;
            }

            let outcome = match failed.get(&config.name) {
                Some((rejected, error)) if rejected == config => {
                    debug!("Provider {} unchanged since last rejection", config.name);
                    Err(error.clone())
                }
                _ => self.build(config).await,
            };

            match outcome {
                Ok(provider) => {
                    info!(
                        "Configured identity provider: {} ({})",
                        config.name, config.provider_type
                    );
                    next.insert(
                        config.name.clone(),
                        ProviderEntry {
                            config: config.clone(),
                            provider,
                        },
                    );
                    report.constructed.push(config.name.clone());
                }
                Err(error) => {
                    if let Some(entry) = previous {
                        warn!(
                            provider = %config.name,
                            error = %error,
                            "Provider update rejected, keeping previous instance"
                        );
                        next.insert(config.name.clone(), entry.clone());
                    } else {
                        warn!(provider = %config.name, error = %error, "Provider not configured");
                    }
                    next_failed.insert(config.name.clone(), (config.clone(), error.clone()));
                    report.errors.push(ProviderConfigError {
                        name: config.name.clone(),
                        error,
                    });
                }
            }
        }

        report.removed = current
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();
        for name in &report.removed {
            info!("Removed identity provider: {}", name);
        }

        *self.providers.write().await = Arc::new(next);
        *failed = next_failed;

        debug!(
            constructed = report.constructed.len(),
            reused = report.reused.len(),
            removed = report.removed.len(),
            errors = report.errors.len(),
            "Applied provider configuration"
        );
        report
    }

    async fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn OAuthProvider>> {
        let factory = self
            .registry
            .lookup(&config.provider_type)
            .ok_or_else(|| KeyportError::unknown_provider_type(&config.provider_type))?;

        factory
            .create(&config.name, &config.options, &self.context)
            .await
    }

    /// Look up a live provider by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn OAuthProvider>> {
        self.providers
            .read()
            .await
            .get(name)
            .map(|entry| entry.provider.clone())
    }

    /// Look up a live provider by name, failing with `ProviderNotFound`
    pub async fn require(&self, name: &str) -> Result<Arc<dyn OAuthProvider>> {
        self.get(name)
            .await
            .ok_or_else(|| KeyportError::provider_not_found(name))
    }

    /// Names of all live providers, sorted
    pub async fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Apply the source's current snapshot, then every snapshot it publishes
    /// until the source goes away.
    pub fn watch(self: Arc<Self>, source: Arc<dyn ConfigSource>) -> JoinHandle<()> {
        let mut updates = source.subscribe();
        tokio::spawn(async move {
            loop {
                let snapshot = updates.borrow_and_update().clone();
                let report = self.configure(&snapshot).await;
                if !report.is_success() {
                    warn!(
                        "{} provider(s) failed to apply from configuration source",
                        report.errors.len()
                    );
                }

                if updates.changed().await.is_err() {
                    debug!("Configuration source closed, stopping watch");
                    break;
                }
            }
        })
    }
}
