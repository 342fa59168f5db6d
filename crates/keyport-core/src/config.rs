//! Provider configuration records
//!
//! A [`ProviderConfig`] is what the external configuration store hands us:
//! an operator-chosen name, the provider type that selects a factory, and an
//! opaque options blob the factory decodes into its own typed settings.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{KeyportError, Result};

/// One configured identity provider.
///
/// Equality compares name, type and options, which is how the provider
/// manager decides whether a live instance is still current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used in callback routing, unique per snapshot
    pub name: String,
    /// Selects the factory in the type registry
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Provider-specific settings
    #[serde(default)]
    pub options: DynamicOptions,
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        options: DynamicOptions,
    ) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
            options,
        }
    }
}

/// Untyped provider options.
///
/// `Debug` prints the keys only so secrets never end up in logs.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicOptions(Map<String, Value>);

impl DynamicOptions {
    pub fn new(options: Map<String, Value>) -> Self {
        Self(options)
    }

    /// Build from an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(KeyportError::configuration(format!(
                "provider options must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Decode into a factory's typed options.
    ///
    /// Failures become `Construction` errors attributed to `provider`.
    pub fn decode<T: DeserializeOwned>(&self, provider: &str) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|e| {
            KeyportError::construction(provider, format!("invalid options: {}", e))
        })
    }
}

impl fmt::Debug for DynamicOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl From<Map<String, Value>> for DynamicOptions {
    fn from(options: Map<String, Value>) -> Self {
        Self(options)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
