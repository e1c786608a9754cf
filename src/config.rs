use std::time::Duration;

use serde::Deserialize;

use crate::queue::DiscardAction;

/// Settings shared by every writer regardless of destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub batch_delay_ms: u64,
    pub discard_threshold: usize,
    pub discard_action: DiscardAction,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: 2000,
            discard_threshold: 10_000,
            discard_action: DiscardAction::Oldest,
        }
    }
}

impl WriterConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Optional overrides for credentials and region. Blank values fall back to
/// the default provider chain and region lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ClientOptions {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (non_blank(&self.access_key), non_blank(&self.secret_key)) {
            (Some(access_key), Some(secret_key)) => Some((access_key, secret_key)),
            _ => None,
        }
    }

    pub fn region(&self) -> Option<&str> {
        non_blank(&self.region)
    }
}
