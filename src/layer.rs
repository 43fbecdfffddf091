//! Tower integration: wrap any `Service` whose request is `Clone` in a [`ResilientExecutor`].
//!
//! Each attempt clones the inner service, waits for it to become ready and calls it with a
//! clone of the request. Errors from the inner service, including readiness errors, are
//! classified like any other operation failure.
//!
//! ```rust
//! use backstop::{
//!     CircuitBreaker, CircuitBreakerConfig, InstantSleeper, OperationId, RemoteError,
//!     ResilientExecutor, ResilientLayer, RetryExecutor, RetryPolicy,
//! };
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let executor = ResilientExecutor::new(
//!     CircuitBreaker::new("echo", CircuitBreakerConfig::default()),
//!     RetryExecutor::new(RetryPolicy::default()).with_sleeper(InstantSleeper),
//! );
//! let svc = ServiceBuilder::new()
//!     .layer(ResilientLayer::new(executor, OperationId::new("POST", "/echo")))
//!     .service(service_fn(|req: String| async move { Ok::<_, RemoteError>(req) }));
//! let out = svc.oneshot("hi".to_string()).await.unwrap();
//! assert_eq!(out, "hi");
//! # });
//! ```

use crate::classify::{DefaultClassifier, ErrorClassifier};
use crate::error::{OperationId, TaggedError};
use crate::executor::ResilientExecutor;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Layer applying breaker-plus-retry to an inner service.
#[derive(Debug)]
pub struct ResilientLayer<C = DefaultClassifier> {
    executor: ResilientExecutor,
    operation: OperationId,
    classifier: Arc<C>,
}

impl<C> Clone for ResilientLayer<C> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            operation: self.operation.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl ResilientLayer {
    pub fn new(executor: ResilientExecutor, operation: OperationId) -> Self {
        Self { executor, operation, classifier: Arc::new(DefaultClassifier) }
    }
}

impl<C> ResilientLayer<C> {
    /// Swap the classifier deciding which inner errors are retried.
    pub fn with_classifier<C2>(self, classifier: C2) -> ResilientLayer<C2> {
        ResilientLayer {
            executor: self.executor,
            operation: self.operation,
            classifier: Arc::new(classifier),
        }
    }
}

impl<S, C> Layer<S> for ResilientLayer<C> {
    type Service = ResilientService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        ResilientService {
            inner,
            executor: self.executor.clone(),
            operation: self.operation.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

/// Service produced by [`ResilientLayer`].
#[derive(Debug)]
pub struct ResilientService<S, C = DefaultClassifier> {
    inner: S,
    executor: ResilientExecutor,
    operation: OperationId,
    classifier: Arc<C>,
}

impl<S: Clone, C> Clone for ResilientService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            executor: self.executor.clone(),
            operation: self.operation.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<S, C> ResilientService<S, C> {
    pub fn executor(&self) -> &ResilientExecutor {
        &self.executor
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, C, Request> Service<Request> for ResilientService<S, C>
where
    Request: Clone + Send + 'static,
    S: Service<Request> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    C: ErrorClassifier<S::Error> + 'static,
{
    type Response = S::Response;
    type Error = TaggedError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    // Readiness is awaited per attempt on a fresh clone of the inner service.
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let executor = self.executor.clone();
        let operation = self.operation.clone();
        let classifier = self.classifier.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let attempt = move || {
                let mut svc = inner.clone();
                let req = req.clone();
                async move {
                    futures::future::poll_fn(|cx| svc.poll_ready(cx)).await?;
                    svc.call(req).await
                }
            };
            executor.run(&operation, attempt, &*classifier, None).await
        })
    }
}
