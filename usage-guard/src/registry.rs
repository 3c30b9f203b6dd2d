use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::RwLock;

use super::ConcurrencyGuard;
use super::ConfigError;
use super::ConfigSource;
use super::Env;
use super::GuardOptions;

static GLOBAL: OnceLock<GuardRegistry> = OnceLock::new();

/// Named guards, created once per name and shared from then on.
///
/// The first registration of a name fixes its configuration. Later lookups with
/// the same name hand back the same instance, so counters are never reset by
/// repeated construction.
///
/// The registry lock is only taken on lookup and creation; acquiring and
/// releasing slots on a guard never touches it.
pub struct GuardRegistry {
    source: Box<dyn ConfigSource + Send + Sync>,
    guards: RwLock<HashMap<String, Arc<ConcurrencyGuard>>>,
}

impl fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardRegistry")
            .field("guards", &self.names())
            .finish_non_exhaustive()
    }
}

impl Default for GuardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardRegistry {
    /// Creates an empty registry that resolves settings from the process environment.
    pub fn new() -> Self {
        Self::with_source(Env)
    }

    /// Creates an empty registry that resolves settings from `source`.
    pub fn with_source<C>(source: C) -> Self
    where
        C: ConfigSource + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
            guards: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry, created on first use from the environment.
    pub fn global() -> &'static GuardRegistry {
        GLOBAL.get_or_init(GuardRegistry::new)
    }

    /// Returns the guard registered under the options' name, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyName` if the guard name is blank.
    pub fn get_or_create(&self, options: &GuardOptions) -> Result<Arc<ConcurrencyGuard>, ConfigError> {
        if let Some(guard) = self.get(options.name()) {
            return Ok(guard);
        }

        // Resolve outside the write lock; losing a creation race just discards it.
        let candidate = ConcurrencyGuard::from_source(options, self.source.as_ref())?;

        let mut guards = self.guards.write().unwrap_or_else(PoisonError::into_inner);
        let guard = guards
            .entry(options.name().to_string())
            .or_insert_with(|| {
                tracing::info!(
                    guard = %candidate.config().name(),
                    max_inflight = candidate.config().max_inflight().get(),
                    retry_after_ms = candidate.config().retry_after().as_millis() as u64,
                    "registered concurrency guard"
                );
                Arc::new(candidate)
            });
        Ok(Arc::clone(guard))
    }

    /// Returns the guard registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<ConcurrencyGuard>> {
        self.guards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all registered guards, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .guards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.guards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::num::NonZeroUsize;

    use super::*;
    use crate::Admission;

    fn registry(pairs: &[(&str, &str)]) -> GuardRegistry {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GuardRegistry::with_source(source)
    }

    #[test]
    fn same_name_returns_same_instance() {
        let reg = registry(&[("INGEST_MAX", "2")]);
        let options = GuardOptions::new("ingest").with_max_inflight_keys(["INGEST_MAX"]);

        let first = reg.get_or_create(&options).unwrap();
        assert!(first.acquire().is_continue());

        let second = reg.get_or_create(&options).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // Counter was not reset by the second lookup.
        assert_eq!(second.inflight(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn first_registration_fixes_configuration() {
        let reg = registry(&[]);
        let a = reg
            .get_or_create(&GuardOptions::new("sync").with_default_max(NonZeroUsize::new(2).unwrap()))
            .unwrap();
        let b = reg
            .get_or_create(&GuardOptions::new("sync").with_default_max(NonZeroUsize::new(9).unwrap()))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().max_inflight().get(), 2);
    }

    #[test]
    fn names_are_independent() {
        let reg = registry(&[("A_MAX", "1"), ("B_MAX", "1")]);
        let a = reg
            .get_or_create(&GuardOptions::new("a").with_max_inflight_keys(["A_MAX"]))
            .unwrap();
        let b = reg
            .get_or_create(&GuardOptions::new("b").with_max_inflight_keys(["B_MAX"]))
            .unwrap();

        assert!(a.acquire().is_continue());
        assert!(a.acquire().is_break());
        assert!(b.acquire().is_continue());
        assert_eq!(reg.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn get_only_finds_registered() {
        let reg = registry(&[]);
        assert!(reg.is_empty());
        assert!(reg.get("missing").is_none());
        reg.get_or_create(&GuardOptions::new("present")).unwrap();
        assert!(reg.get("present").is_some());
    }

    #[test]
    fn empty_name_is_not_registered() {
        let reg = registry(&[]);
        assert_eq!(
            reg.get_or_create(&GuardOptions::new("")).unwrap_err(),
            ConfigError::EmptyName
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_creation_yields_one_instance() {
        let reg = Arc::new(registry(&[]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    reg.get_or_create(&GuardOptions::new("contended")).unwrap()
                })
            })
            .collect();

        let guards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(guards.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn global_is_a_singleton() {
        let a = GuardRegistry::global()
            .get_or_create(&GuardOptions::new("registry-global-test"))
            .unwrap();
        let b = GuardRegistry::global()
            .get("registry-global-test")
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(std::ptr::eq(GuardRegistry::global(), GuardRegistry::global()));
    }
}
