//! Strongly-typed identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlates the redirect, the callback and the log lines of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginAttemptId(Uuid);

impl LoginAttemptId {
    const PREFIX: &'static str = "login_";

    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Prefixed form used in log output, e.g. `login_0190...`.
    pub fn to_prefixed(&self) -> String {
        format!("{}{}", Self::PREFIX, self.0)
    }
}

impl Default for LoginAttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LoginAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LoginAttemptId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
        Uuid::parse_str(raw).map(Self)
    }
}
