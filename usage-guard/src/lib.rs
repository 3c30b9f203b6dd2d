//! # usage-guard
//!
//! `usage-guard` bounds the number of in-flight operations that share a backend
//! resource, and tells rejected callers how long to wait before trying again.
//!
//! ## Core Philosophy
//!
//! Admission is a decision, not a queue. [`ConcurrencyGuard::acquire`] either grants
//! a slot or refuses with a retry hint, and it never blocks. The check and the
//! increment happen in a single Compare-And-Swap, so two callers can never both
//! claim the last slot.
//!
//! ## Key Concepts
//!
//! * **Lock-Free**: The hot path is one atomic counter. No `Mutex` or `RwLock`.
//! * **Forgiving Configuration**: Limits are resolved from an ordered list of keys
//!   (usually environment variables). Anything missing or malformed falls back to a
//!   default, so a bad setting can never take a service down.
//! * **Admission Trait**: A unified interface shared by real guards and the
//!   [`Unguarded`] null object.
//! * **Permits**: [`Permit`] and [`OwnedPermit`] release on drop, on every exit path.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//!
//! use usage_guard::Admission;
//! use usage_guard::ConcurrencyGuard;
//! use usage_guard::GuardOptions;
//!
//! let source: HashMap<String, String> =
//!     [("USAGE_MAX_INFLIGHT".to_string(), "2".to_string())].into();
//! let options = GuardOptions::new("usage-summary").with_max_inflight_keys(["USAGE_MAX_INFLIGHT"]);
//! let guard = ConcurrencyGuard::from_source(&options, &source).unwrap();
//!
//! if let Ok(_permit) = guard.try_permit() {
//!     // Protected work. The slot is released when `_permit` goes out of scope.
//! }
//! ```

use std::fmt::Debug;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

mod config;
mod guard;
mod permit;
mod registry;
mod unguarded;

pub use config::ConfigError;
pub use config::ConfigSource;
pub use config::DEFAULT_MAX_INFLIGHT;
pub use config::DEFAULT_RETRY_AFTER;
pub use config::Env;
pub use config::GuardConfig;
pub use config::GuardOptions;
pub use guard::Capacity;
pub use guard::ConcurrencyGuard;
pub use permit::OwnedPermit;
pub use permit::Permit;
pub use registry::GuardRegistry;
pub use unguarded::Unguarded;

/// Reasons why an acquire attempt might be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Every slot is taken. Callers should wait `retry_after` before trying again.
    Saturated { retry_after: Duration },
}

impl Reason {
    /// The advisory wait carried by this refusal.
    pub fn retry_after(&self) -> Duration {
        match self {
            Reason::Saturated { retry_after } => *retry_after,
        }
    }
}

/// The core trait for admission controllers.
///
/// Implementations must be `Send` and `Sync` to be shared across request handlers
/// via `Arc`.
pub trait Admission: Debug {
    /// The logical resource name, used in logs and metric labels.
    fn name(&self) -> &str;

    /// Attempts to claim one slot.
    ///
    /// This method never blocks and never suspends. A refusal is a normal outcome
    /// and leaves the state untouched.
    ///
    /// # Errors
    ///
    /// Returns `Reason` if no slot is free.
    fn acquire(&self) -> ControlFlow<Reason>;

    /// Gives back one slot.
    ///
    /// Calling this more often than `acquire` succeeded is tolerated: the count
    /// never drops below zero.
    fn release(&self);

    /// Claims a slot and wraps it in a [`Permit`] that releases on drop.
    fn try_permit(&self) -> Result<Permit<'_, Self>, Reason>
    where
        Self: Sized,
    {
        Permit::try_acquire(self)
    }

    /// Runs `f` while holding a slot.
    ///
    /// The slot is released when `f` returns or unwinds. `f` is not called at all
    /// when the guard refuses.
    fn run<T, F>(&self, f: F) -> Result<T, Reason>
    where
        Self: Sized,
        F: FnOnce() -> T,
    {
        let _permit = self.try_permit()?;
        Ok(f())
    }

    /// Drives `fut` to completion while holding a slot.
    ///
    /// The admission decision is made when this is called, not when the returned
    /// future is first polled. The slot is released when `fut` completes or the
    /// returned future is dropped.
    fn run_async<F>(&self, fut: F) -> impl Future<Output = Result<F::Output, Reason>>
    where
        Self: Sized,
        F: Future,
    {
        let permit = self.try_permit();
        async move {
            let _permit = permit?;
            Ok(fut.await)
        }
    }
}

/// A missing guard admits everything.
impl<A: Admission> Admission for Option<A> {
    fn name(&self) -> &str {
        match self {
            Some(guard) => guard.name(),
            None => Unguarded.name(),
        }
    }

    fn acquire(&self) -> ControlFlow<Reason> {
        match self {
            Some(guard) => guard.acquire(),
            None => ControlFlow::Continue(()),
        }
    }

    fn release(&self) {
        if let Some(guard) = self {
            guard.release();
        }
    }
}

impl<A: Admission + ?Sized> Admission for std::sync::Arc<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn acquire(&self) -> ControlFlow<Reason> {
        (**self).acquire()
    }

    fn release(&self) {
        (**self).release()
    }
}
