//! # Tower Usage Guard
//!
//! `tower-usage-guard` puts a [`usage_guard::ConcurrencyGuard`] in front of a
//! [Tower](https://github.com/tower-rs/tower) service, bounding how many requests
//! may be working against a shared backend at once.
//!
//! ## Fail Fast
//! The guard never queues. When every slot is taken, `poll_ready` returns
//! [`GuardError::Saturated`] carrying the guard's retry hint, and the inner
//! service is never called. Admitted requests hold their slot inside the response
//! future, so it is released on success, failure, or cancellation alike.
//!
//! ## The Managed Stack
//! [`ManagedGuardLayer`] adds a deadline on the protected work and maps every
//! failure into a unified, cloneable [`GuardError`].
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GuardError`], allowing automatic conversion
//!   to HTTP status codes (429 with `Retry-After`, 408, 500).

mod error;
mod layer;
mod managed_layer;
mod service;
mod utils;


pub use error::GuardError;
pub use error::RETRY_AFTER_MS;
pub use error::retry_after_secs;
pub use layer::GuardLayer;
pub use managed_layer::ManagedGuardLayer;
pub use service::GuardService;
pub use service::ResponseFuture;
pub use utils::ServiceBuilderExt;
pub use utils::make_guarded_svc;
