use std::sync::Arc;

use tower::Layer;
use usage_guard::Admission;

use crate::service::GuardService;

/// Applies a concurrency guard to requests.
///
/// Every service produced by this layer shares the same guard, so the ceiling
/// holds across clones and across routes that use the same layer.
#[derive(Debug)]
pub struct GuardLayer<A>
where
    A: Admission + ?Sized,
{
    guard: Arc<A>,
}

impl<A> Clone for GuardLayer<A>
where
    A: Admission + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<A> GuardLayer<A>
where
    A: Admission + ?Sized,
{
    /// Create a GuardLayer
    pub fn new(guard: Arc<A>) -> Self {
        GuardLayer { guard }
    }
}

impl<A, S> Layer<S> for GuardLayer<A>
where
    A: Admission + ?Sized,
{
    type Service = GuardService<A, S>;

    fn layer(&self, service: S) -> Self::Service {
        GuardService::new(service, Arc::clone(&self.guard))
    }
}
