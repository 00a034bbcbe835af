//! Tower layer that binds every HTTP request to a session.
//!
//! On ingress the service resolves the session cookie through the shared
//! [`SessionManager`] and stores the resulting [`SessionHandle`] in request
//! extensions. On egress it commits mutated state into the response's own
//! `Set-Cookie` header, so redirects carry their mutations themselves.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::error;

use crate::manager::SessionManager;

/// Applies [`SessionService`] to an inner service.
#[derive(Debug, Clone)]
pub struct SessionLayer {
    manager: Arc<SessionManager>,
}

impl SessionLayer {
    /// Wraps the shared manager.
    #[must_use]
    pub const fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            manager: Arc::clone(&self.manager),
        }
    }
}

/// The per-request session service; see the module docs.
#[derive(Debug, Clone)]
pub struct SessionService<S> {
    inner: S,
    manager: Arc<SessionManager>,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SessionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // The clone is the ready service; see tower's docs on Clone + swap.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let manager = Arc::clone(&self.manager);

        Box::pin(async move {
            let handle = match manager.resolve(req.headers()).await {
                Ok(handle) => handle,
                Err(err) => {
                    error!(error = %err, "session store unavailable on resolve");
                    return Ok(unavailable_response());
                },
            };

            req.extensions_mut().insert(handle.clone());
            let mut response = inner.call(req).await?;

            if let Err(err) = manager.commit(&handle, response.headers_mut()).await {
                error!(error = %err, "failed to commit session state");
                return Ok(unavailable_response());
            }
            Ok(response)
        })
    }
}

fn unavailable_response<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
}
