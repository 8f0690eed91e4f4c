//! Tower Layer for XSTS authentication

use std::sync::Arc;
use tower::Layer;

use super::XstsLayerConfig;
use super::service::XstsAuthService;
use crate::pipeline::TokenValidator;

/// Tower Layer that validates XSTS tokens before the inner service runs
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use xsts_auth::tower::XstsAuthLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(XstsAuthLayer::new(validator).bypass("/health"))
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct XstsAuthLayer {
    validator: Arc<TokenValidator>,
    config: XstsLayerConfig,
}

impl XstsAuthLayer {
    /// Create a layer over a shared validator
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self {
            validator,
            config: XstsLayerConfig::default(),
        }
    }

    /// Create a layer with custom configuration
    pub fn with_config(validator: Arc<TokenValidator>, config: XstsLayerConfig) -> Self {
        Self { validator, config }
    }

    /// Serve a path without a token
    #[must_use]
    pub fn bypass(mut self, path: impl Into<String>) -> Self {
        self.config = self.config.bypass(path);
        self
    }
}

impl<S> Layer<S> for XstsAuthLayer {
    type Service = XstsAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        XstsAuthService::new(inner, Arc::clone(&self.validator), self.config.clone())
    }
}
