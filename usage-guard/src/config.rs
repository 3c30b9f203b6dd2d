use std::collections::BTreeMap;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

/// Ceiling used when no configured max-inflight value is usable.
pub const DEFAULT_MAX_INFLIGHT: NonZeroUsize = NonZeroUsize::new(8).unwrap();

/// Hint handed to refused callers when no configured retry-after value is usable.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_millis(1000);

/// Errors raised while building a guard configuration.
///
/// Bad *values* never end up here; they fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Guards are looked up by name, so the name must not be blank.
    #[error("guard name must not be empty")]
    EmptyName,
}

/// Somewhere configuration values can be looked up by key.
pub trait ConfigSource {
    /// Returns the raw value for `key`, or `None` if it is not set.
    fn value(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Env;

impl ConfigSource for Env {
    fn value(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<F> ConfigSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn value(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Resolved, immutable guard settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    name: String,
    max_inflight: NonZeroUsize,
    retry_after: Duration,
}

impl GuardConfig {
    /// Creates a configuration from already-known values.
    pub fn new(name: impl Into<String>, max_inflight: NonZeroUsize, retry_after: Duration) -> Self {
        Self {
            name: name.into(),
            max_inflight,
            retry_after,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_inflight(&self) -> NonZeroUsize {
        self.max_inflight
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }
}

/// Describes how to build a guard: its name, where to look for its limits, and
/// what to use when nothing usable is found.
#[derive(Debug, Clone)]
pub struct GuardOptions {
    name: String,
    max_inflight_keys: Vec<String>,
    default_max: NonZeroUsize,
    retry_after_keys: Vec<String>,
    default_retry_after: Duration,
}

impl GuardOptions {
    /// Creates options with no configuration keys and the crate defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_inflight_keys: Vec::new(),
            default_max: DEFAULT_MAX_INFLIGHT,
            retry_after_keys: Vec::new(),
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keys tried, in priority order, for the max-inflight ceiling.
    pub fn with_max_inflight_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.max_inflight_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Ceiling used when no key yields a positive integer.
    pub fn with_default_max(mut self, default_max: NonZeroUsize) -> Self {
        self.default_max = default_max;
        self
    }

    /// Keys tried, in priority order, for the retry hint (in milliseconds).
    pub fn with_retry_after_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.retry_after_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Retry hint used when no key yields a non-negative integer.
    pub fn with_default_retry_after(mut self, default_retry_after: Duration) -> Self {
        self.default_retry_after = default_retry_after;
        self
    }

    /// Resolves the options against `source`.
    ///
    /// The first key whose value parses wins. Missing, non-numeric, fractional,
    /// negative or out-of-range values are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyName` if the guard name is blank.
    pub fn resolve<C>(&self, source: &C) -> Result<GuardConfig, ConfigError>
    where
        C: ConfigSource + ?Sized,
    {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        let max_inflight = first_valid::<usize, _>(&self.name, source, &self.max_inflight_keys)
            .and_then(NonZeroUsize::new)
            .unwrap_or(self.default_max);

        let retry_after = first_valid::<u64, _>(&self.name, source, &self.retry_after_keys)
            .map(Duration::from_millis)
            .unwrap_or(self.default_retry_after);

        tracing::debug!(
            guard = %self.name,
            max_inflight = max_inflight.get(),
            retry_after_ms = retry_after.as_millis() as u64,
            "resolved guard configuration"
        );

        Ok(GuardConfig {
            name: self.name.clone(),
            max_inflight,
            retry_after,
        })
    }
}

/// Scans `keys` in order, returning the first value that parses as an in-range `T`.
fn first_valid<T, C>(guard: &str, source: &C, keys: &[String]) -> Option<T>
where
    T: FromStr + InRange,
    C: ConfigSource + ?Sized,
{
    keys.iter().find_map(|key| {
        let raw = source.value(key)?;
        match raw.trim().parse::<T>() {
            Ok(value) if value.in_range() => Some(value),
            _ => {
                tracing::warn!(guard, key = %key, value = %raw, "ignoring unusable guard setting");
                None
            }
        }
    })
}

/// Per-setting range check applied while scanning keys.
trait InRange {
    fn in_range(&self) -> bool;
}

// Max-inflight must be at least one.
impl InRange for usize {
    fn in_range(&self) -> bool {
        *self >= 1
    }
}

// Retry-after may be zero.
impl InRange for u64 {
    fn in_range(&self) -> bool {
        true
    }
}
