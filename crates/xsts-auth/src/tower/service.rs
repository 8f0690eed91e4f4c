//! Tower Service for XSTS authentication
//!
//! Works with any `http::Request<B>` stack (Axum, Tower-HTTP, hyper). The
//! `Authorization` header is validated with the current wall-clock time and the
//! resulting [`ClientClaims`] travel to the inner service as a request
//! extension.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use futures_util::future::BoxFuture;
use http::header::AUTHORIZATION;
use tower_service::Service;

use super::XstsLayerConfig;
use crate::claims::ClientClaims;
use crate::error::AuthError;
use crate::pipeline::TokenValidator;

/// Future type for XSTS auth service responses
pub type XstsAuthServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

/// Tower Service that validates XSTS tokens
#[derive(Debug, Clone)]
pub struct XstsAuthService<S> {
    inner: S,
    validator: Arc<TokenValidator>,
    config: XstsLayerConfig,
}

impl<S> XstsAuthService<S> {
    /// Create a new auth service
    pub fn new(inner: S, validator: Arc<TokenValidator>, config: XstsLayerConfig) -> Self {
        Self {
            inner,
            validator,
            config,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn rejection<ResBody: From<&'static str>>(error: &AuthError) -> http::Response<ResBody> {
    let (status, body) = error.rejection();
    let mut response = http::Response::new(ResBody::from(body));
    *response.status_mut() = status;
    response
}

impl<S, B, ResBody> Service<http::Request<B>> for XstsAuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: From<&'static str> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = XstsAuthServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let Some(authorization) = authorization else {
            let error = AuthError::MissingAuthorization;
            tracing::warn!(path = %req.uri().path(), "{error}");
            return Box::pin(async move { Ok(rejection(&error)) });
        };

        let validator = Arc::clone(&self.validator);
        Box::pin(async move {
            match validator.validate(&authorization, SystemTime::now()).await {
                Ok(claims) => {
                    req.extensions_mut().insert::<ClientClaims>(claims);
                    inner.call(req).await
                }
                Err(e) => Ok(rejection(&e)),
            }
        })
    }
}
