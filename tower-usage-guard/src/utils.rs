use std::sync::Arc;
use std::time::Duration;

use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tower::util::BoxCloneSyncService;

use usage_guard::Admission;

use crate::GuardLayer;
use crate::ManagedGuardLayer;

/// Guard a service and put a deadline on the protected work.
pub fn make_guarded_svc<A, V, Req, Resp>(
    guard: Arc<A>,
    max_duration: Duration,
    svc: V,
) -> BoxCloneSyncService<Req, Resp, BoxError>
where
    A: Admission + ?Sized + Send + Sync + 'static,
    Req: Send + 'static,
    Resp: 'static,
    V: Service<Req, Response = Resp, Error = BoxError> + Clone + Send + Sync + 'static,
    <V as Service<Req>>::Future: Send + 'static,
{
    ServiceBuilder::new()
        .layer(ManagedGuardLayer::<A, Req>::new(guard, max_duration))
        .service(svc)
}

/// Service Builder Extension with additional useful functions for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a concurrency guard layer
    fn concurrency_guard(
        self,
        guard: Arc<dyn Admission + Send + Sync + 'static>,
    ) -> ServiceBuilder<Stack<GuardLayer<dyn Admission + Send + Sync + 'static>, L>>;

    /// Add a concurrency guard layer, or admit everything if no guard is configured
    fn optional_concurrency_guard(
        self,
        guard: Option<Arc<dyn Admission + Send + Sync + 'static>>,
    ) -> ServiceBuilder<Stack<GuardLayer<dyn Admission + Send + Sync + 'static>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn concurrency_guard(
        self,
        guard: Arc<dyn Admission + Send + Sync + 'static>,
    ) -> ServiceBuilder<Stack<GuardLayer<dyn Admission + Send + Sync + 'static>, L>> {
        self.layer(GuardLayer::new(guard))
    }

    fn optional_concurrency_guard(
        self,
        guard: Option<Arc<dyn Admission + Send + Sync + 'static>>,
    ) -> ServiceBuilder<Stack<GuardLayer<dyn Admission + Send + Sync + 'static>, L>> {
        let guard: Arc<dyn Admission + Send + Sync + 'static> = match guard {
            Some(guard) => guard,
            None => Arc::new(usage_guard::Unguarded),
        };
        self.layer(GuardLayer::new(guard))
    }
}
