use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use usage_guard::Admission;
use usage_guard::OwnedPermit;
use usage_guard::Reason;

use crate::error::GuardError;

#[derive(Clone, Debug)]
struct GuardServiceMetrics {
    granted: Counter<u64>,
    denied: Counter<u64>,
}

/// Admits requests through an [`Admission`] before handing them to `inner`.
///
/// The slot is claimed in `poll_ready` and travels with the response future, so
/// it is released when the response completes, fails, or is dropped. A refusal
/// is reported from `poll_ready` as [`GuardError::Saturated`] and the inner
/// service is never called.
#[derive(Debug)]
pub struct GuardService<A, S>
where
    A: Admission + ?Sized,
{
    inner: S,
    guard: Arc<A>,
    permit: Option<OwnedPermit<A>>,
    instruments: GuardServiceMetrics,
}

pin_project! {
    /// A future that holds a concurrency slot until the inner future finishes.
    pub struct ResponseFuture<F, P> {
        #[pin]
        inner: F,
        permit: Option<P>,
    }
}

impl<F, P, T, E> Future for ResponseFuture<F, P>
where
    F: Future<Output = Result<T, E>>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(res) => {
                // Give the slot back as soon as the work is done.
                *this.permit = None;
                Poll::Ready(res)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// Manually implement Clone: a held permit belongs to one in-flight call only
impl<A, S> Clone for GuardService<A, S>
where
    A: Admission + ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            guard: Arc::clone(&self.guard),
            // We start with no slot for the new clone
            permit: None,
            instruments: self.instruments.clone(),
        }
    }
}

impl<A, S, Req> Service<Req> for GuardService<A, S>
where
    A: Admission + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, OwnedPermit<A>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 1. Check inner service readiness FIRST so we never hold a slot while waiting
        match self.inner.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        // 2. Claim a slot if we don't already hold one
        if self.permit.is_none() {
            let label = [KeyValue::new("guard", self.guard.name().to_string())];
            match OwnedPermit::try_acquire(Arc::clone(&self.guard)) {
                Ok(permit) => {
                    self.instruments.granted.add(1, &label);
                    self.permit = Some(permit);
                }
                Err(Reason::Saturated { retry_after }) => {
                    self.instruments.denied.add(1, &label);
                    tracing::debug!(
                        guard = %self.guard.name(),
                        retry_after_ms = retry_after.as_millis() as u64,
                        "request refused by concurrency guard"
                    );
                    return Poll::Ready(Err(Box::new(GuardError::Saturated { retry_after })));
                }
            }
        }

        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let permit = self
            .permit
            .take()
            .expect("poll_ready must be called and return Ready(Ok) before call");

        ResponseFuture {
            inner: self.inner.call(req),
            permit: Some(permit),
        }
    }
}

impl<A, S> GuardService<A, S>
where
    A: Admission + ?Sized,
{
    pub fn new(inner: S, guard: Arc<A>) -> Self {
        let meter = global::meter("guard_service");
        let instruments = GuardServiceMetrics {
            granted: meter.u64_counter("guard_granted").build(),
            denied: meter.u64_counter("guard_denied").build(),
        };

        Self {
            inner,
            guard,
            permit: None,
            instruments,
        }
    }

    /// The guard this service admits through.
    pub fn guard(&self) -> &Arc<A> {
        &self.guard
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}
