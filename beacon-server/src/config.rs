use std::{fmt::Display, net::SocketAddr, str::FromStr};

use beacon_core::store::DEFAULT_CAPACITY;
use thiserror::Error;
use tracing::info;

const DEFAULT_ADDR: &str = "0.0.0.0:3001";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Server settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub addr: SocketAddr,
    pub gemini_model: String,
    pub narrative_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            addr: try_load(&lookup, "BEACON_ADDR", DEFAULT_ADDR)?,
            gemini_model: try_load(&lookup, "GEMINI_MODEL", gemini::DEFAULT_MODEL)?,
            narrative_capacity: try_load(
                &lookup,
                "BEACON_NARRATIVE_CAPACITY",
                &DEFAULT_CAPACITY.to_string(),
            )?,
        })
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        });

    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}
