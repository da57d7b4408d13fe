use std::env;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key_gen::{DEFAULT_JITTER_DIGITS, MAX_JITTER_DIGITS};
use crate::retry::DEFAULT_MAX_ATTEMPTS;

pub const ENV_MAX_ATTEMPTS: &str = "TREERANK_MAX_ATTEMPTS";
pub const ENV_JITTER_DIGITS: &str = "TREERANK_JITTER_DIGITS";

/// Tunables of the ordering engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct EngineConfig {
    /// Attempts per operation, the first one included.
    pub max_attempts: u32,
    /// Random digits appended to generated keys.
    pub jitter_digits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter_digits: DEFAULT_JITTER_DIGITS,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `TREERANK_MAX_ATTEMPTS` / `TREERANK_JITTER_DIGITS` when set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            config.max_attempts = parse_var(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_JITTER_DIGITS) {
            config.jitter_digits = parse_var(ENV_JITTER_DIGITS, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if !(1..=MAX_JITTER_DIGITS).contains(&self.jitter_digits) {
            return Err(Error::Config(format!(
                "jitter_digits must be within 1..={MAX_JITTER_DIGITS}, got {}",
                self.jitter_digits
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_overrides_defaults() {
        let config = EngineConfig::from_lookup(|name| match name {
            ENV_MAX_ATTEMPTS => Some("5".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.jitter_digits, DEFAULT_JITTER_DIGITS);

        assert_eq!(EngineConfig::from_lookup(|_| None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let zero = EngineConfig::from_lookup(|name| {
            (name == ENV_MAX_ATTEMPTS).then(|| "0".to_string())
        });
        assert!(matches!(zero, Err(Error::Config(_))));

        let junk = EngineConfig::from_lookup(|name| {
            (name == ENV_JITTER_DIGITS).then(|| "lots".to_string())
        });
        assert!(matches!(junk, Err(Error::Config(_))));

        let wide = EngineConfig {
            jitter_digits: MAX_JITTER_DIGITS + 1,
            ..EngineConfig::default()
        };
        assert!(wide.validate().is_err());
    }
}
