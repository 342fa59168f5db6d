//! Provider type registry
//!
//! Maps a provider type name (`"generic-oauth2"`, `"oidc"`, ...) to the
//! factory that builds live providers of that type. The registry has a
//! one-way lifecycle:
//! - open: factories are registered during start-up
//! - sealed: the first lookup closes it; reads are lock-free from then on
//!
//! Registering the same type twice, or registering after sealing, is a
//! build-time defect and panics.

use async_trait::async_trait;
use once_cell::sync::{Lazy, OnceCell};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use keyport_core::{DynamicOptions, OAuthProvider, Result};

use crate::settings::Settings;
use crate::state::CallbackStateStore;

// =============================================================================
// Factory Capability
// =============================================================================

/// Shared resources handed to every factory at construction time.
#[derive(Clone)]
pub struct ProviderContext {
    pub state_store: Arc<CallbackStateStore>,
    /// Timeout applied to each upstream HTTP request
    pub http_timeout: Duration,
}

impl ProviderContext {
    pub fn new(state_store: Arc<CallbackStateStore>, http_timeout: Duration) -> Self {
        Self {
            state_store,
            http_timeout,
        }
    }

    /// Build the shared resources described by `settings`.
    ///
    /// Fails with `Configuration` when the state TTL is out of range.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            Arc::new(CallbackStateStore::new(settings.flow.state_ttl())?),
            settings.http.timeout(),
        ))
    }
}

/// Builds live providers of one type from untyped options.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Unique type name this factory is registered under
    fn provider_type(&self) -> &str;

    /// Decode `options` and build a provider named `name`.
    ///
    /// Invalid options must surface as a `Construction` error.
    async fn create(
        &self,
        name: &str,
        options: &DynamicOptions,
        context: &ProviderContext,
    ) -> Result<Arc<dyn OAuthProvider>>;
}

// =============================================================================
// Type Registry
// =============================================================================

type FactoryMap = HashMap<String, Arc<dyn ProviderFactory>>;

#[derive(Default)]
struct OpenRegistry {
    factories: FactoryMap,
    closed: bool,
}

static GLOBAL_REGISTRY: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::new()));

/// Registry of provider factories keyed by type name
pub struct TypeRegistry {
    open: Mutex<OpenRegistry>,
    sealed: OnceCell<FactoryMap>,
}

impl TypeRegistry {
    /// Create an empty, isolated registry
    pub fn new() -> Self {
        Self {
            open: Mutex::new(OpenRegistry::default()),
            sealed: OnceCell::new(),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<TypeRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register a factory under its type name.
    ///
    /// # Panics
    ///
    /// If the type is already registered or the registry has been sealed.
    pub fn register(&self, factory: Arc<dyn ProviderFactory>) {
        let provider_type = factory.provider_type().to_string();
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);

        if open.closed {
            panic!(
                "provider type '{}' registered after the type registry was sealed",
                provider_type
            );
        }
        if open.factories.contains_key(&provider_type) {
            panic!("provider type '{}' registered twice", provider_type);
        }

        info!("Registered identity provider type: {}", provider_type);
        open.factories.insert(provider_type, factory);
    }

    /// Look up the factory for a provider type. Seals the registry.
    pub fn lookup(&self, provider_type: &str) -> Option<Arc<dyn ProviderFactory>> {
        self.seal().get(provider_type).cloned()
    }

    /// Registered type names, sorted. Seals the registry.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.seal().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    fn seal(&self) -> &FactoryMap {
        self.sealed.get_or_init(|| {
            let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            open.closed = true;
            debug!(
                "Sealing type registry with {} provider types",
                open.factories.len()
            );
            std::mem::take(&mut open.factories)
        })
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
