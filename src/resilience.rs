//! Tower middleware for admission control and per-call deadlines
//!
//! The service-layer face of the same policies: [`AdmissionLayer`] gates
//! requests through a shared [`RateLimiter`] before they reach the inner
//! service, and [`DeadlineLayer`] bounds each call, surfacing an overrun as
//! [`FailureCause::Timeout`] so it classifies like any other failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tower::{BoxError, Layer, Service};

use crate::error::{FailureCause, PipelineError};
use crate::rate_limit::RateLimiter;

/// Layer applying fixed-window admission control to any service.
///
/// `extract` picks the caller identity out of the request (pair it with
/// [`client_identity`](crate::rate_limit::client_identity) for HTTP
/// headers). Denials short-circuit with [`PipelineError::RateLimited`]
/// before the inner service is invoked.
pub struct AdmissionLayer<X> {
    limiter: Arc<RateLimiter>,
    extract: X,
}

impl<X> AdmissionLayer<X> {
    pub fn new(limiter: Arc<RateLimiter>, extract: X) -> Self {
        Self { limiter, extract }
    }
}

pub struct Admission<S, X> {
    inner: S,
    limiter: Arc<RateLimiter>,
    extract: X,
}

impl<S, X> Layer<S> for AdmissionLayer<X>
where
    X: Clone,
{
    type Service = Admission<S, X>;
    fn layer(&self, inner: S) -> Self::Service {
        Admission {
            inner,
            limiter: self.limiter.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<S, X, Req> Service<Req> for Admission<S, X>
where
    S: Service<Req, Error = BoxError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    X: Fn(&Req) -> String,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let identity = (self.extract)(&req);
        let decision = self.limiter.check(&identity);
        if !decision.allowed {
            let denial = PipelineError::RateLimited {
                reset_after: decision.reset_after,
            };
            return Box::pin(async move { Err(denial.into()) });
        }
        Box::pin(self.inner.call(req))
    }
}

/// Layer bounding every call with a fixed deadline.
pub struct DeadlineLayer {
    deadline: Duration,
}

impl DeadlineLayer {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

pub struct Deadline<S> {
    inner: S,
    deadline: Duration,
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = Deadline<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Deadline {
            inner,
            deadline: self.deadline,
        }
    }
}

impl<S, Req> Service<Req> for Deadline<S>
where
    S: Service<Req, Error = BoxError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let deadline = self.deadline;
        let fut = self.inner.call(req);
        Box::pin(async move {
            let started = Instant::now();
            match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(FailureCause::Timeout {
                    elapsed: started.elapsed(),
                }
                .into()),
            }
        })
    }
}
