use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;
use usage_guard::Admission;

use crate::GuardError;
use crate::GuardService;

/// A fail-fast concurrency guard with a deadline on the protected work.
///
/// Requests that find the guard saturated are refused at once. Admitted requests
/// must finish within `max_duration`; if they do not, the response future is
/// dropped, which releases the slot, and the caller sees `GuardError::Timeout`.
///
/// ### Error Responsibilities:
/// - **Refusal (`GuardError::Saturated`)**: every slot is taken. Happens at the
///   `poll_ready` stage and carries the guard's retry hint.
/// - **Timeout (`GuardError::Timeout`)**: the *inner service* took too long.
/// - **Inner (`GuardError::Inner`)**: anything else the inner service returned.
pub struct ManagedGuardLayer<A, Req>
where
    A: ?Sized,
{
    guard: Arc<A>,
    max_duration: Duration,
    _phantom: PhantomData<fn(Req)>,
}

// Note: Deriving Clone would demand `Req: Clone`, which Axum request types are not.
impl<A, Req> Clone for ManagedGuardLayer<A, Req>
where
    A: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
            max_duration: self.max_duration,
            _phantom: PhantomData,
        }
    }
}

impl<S, A, Req> Layer<S> for ManagedGuardLayer<A, Req>
where
    A: Admission + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let guarded = GuardService::new(inner, Arc::clone(&self.guard));

        // Timeout is outer so the deadline drops the response future, and the slot with it.
        let svc = tower::ServiceBuilder::new()
            .timeout(self.max_duration)
            .service(guarded);

        // Map the mixed errors into GuardError
        let mapped_svc = tower::util::MapErr::new(svc, map_guard_error);

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<A, Req> ManagedGuardLayer<A, Req>
where
    A: Admission + ?Sized,
{
    pub fn new(guard: Arc<A>, max_duration: Duration) -> Self {
        Self {
            guard,
            max_duration,
            _phantom: PhantomData,
        }
    }
}

pub(crate) fn map_guard_error(err: BoxError) -> BoxError {
    if err.is::<tower::timeout::error::Elapsed>() {
        BoxError::from(GuardError::Timeout)
    } else if let Some(guard_err) = err.downcast_ref::<GuardError>() {
        // Propagate GuardError as is
        BoxError::from(guard_err.clone())
    } else {
        // Wrap any other inner service errors
        Box::from(GuardError::Inner(err.to_string()))
    }
}
