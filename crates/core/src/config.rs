//! Queue and worker settings.

use std::str::FromStr;

use crate::bus::DEFAULT_BUS_CAPACITY;

pub const DEFAULT_QUEUE_NAME: &str = "documents";
pub const DEFAULT_CONCURRENCY: usize = 25;
pub const DEFAULT_ATTEMPTS: u32 = 1;
pub const DEFAULT_KEEP_FINISHED: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    /// Jobs a worker pool runs at the same time.
    pub concurrency: usize,
    /// Attempts per job, including the first one.
    pub attempts: u32,
    /// Events buffered per bus subscriber.
    pub bus_capacity: usize,
    /// Completed or failed job records kept for inspection. Older ones are
    /// evicted.
    pub keep_finished: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            attempts: DEFAULT_ATTEMPTS,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            keep_finished: DEFAULT_KEEP_FINISHED,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `DOCRUN_CONCURRENCY`, `DOCRUN_ATTEMPTS`,
    /// `DOCRUN_BUS_CAPACITY` and `DOCRUN_KEEP_FINISHED`. Zero or unparsable
    /// values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            name: defaults.name,
            concurrency: positive(&lookup, "DOCRUN_CONCURRENCY").unwrap_or(defaults.concurrency),
            attempts: positive(&lookup, "DOCRUN_ATTEMPTS").unwrap_or(defaults.attempts),
            bus_capacity: positive(&lookup, "DOCRUN_BUS_CAPACITY")
                .unwrap_or(defaults.bus_capacity),
            keep_finished: positive(&lookup, "DOCRUN_KEEP_FINISHED")
                .unwrap_or(defaults.keep_finished),
        }
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring invalid setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.name, "documents");
        assert_eq!(config.concurrency, 25);
        assert_eq!(config.attempts, 1);
        assert_eq!(config.bus_capacity, 256);
        assert_eq!(config.keep_finished, 1000);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let env: HashMap<&str, &str> = [
            ("DOCRUN_CONCURRENCY", "4"),
            ("DOCRUN_ATTEMPTS", "0"),
            ("DOCRUN_BUS_CAPACITY", "lots"),
            ("DOCRUN_KEEP_FINISHED", "50"),
        ]
        .into_iter()
        .collect();
        let config = QueueConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.attempts, 1);
        assert_eq!(config.bus_capacity, 256);
        assert_eq!(config.keep_finished, 50);
    }
}
