//! # Tower Middleware for XSTS Authentication
//!
//! - [`XstsAuthLayer`] - Layer wrapping services with token validation
//! - [`XstsAuthService`] - Service validating the `Authorization` header
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use xsts_auth::tower::XstsAuthLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(XstsAuthLayer::new(validator))
//!     .service(my_inner_service);
//! ```
//!
//! ## Request Extensions
//!
//! On success the validated [`ClientClaims`](crate::ClientClaims) are inserted
//! into the request extensions:
//!
//! ```rust,ignore
//! if let Some(claims) = req.extensions().get::<ClientClaims>() {
//!     println!("Gamertag: {:?}", claims.selected_user().gamertag());
//! }
//! ```
//!
//! Rejected requests never reach the inner service. They receive a `403` or,
//! for lifetime failures, a `401` with a fixed body; the cause is logged.

mod layer;
mod service;

pub use layer::XstsAuthLayer;
pub use service::{XstsAuthService, XstsAuthServiceFuture};

/// Configuration for the XSTS auth layer
#[derive(Debug, Clone, Default)]
pub struct XstsLayerConfig {
    /// Request paths served without a token (e.g. health checks)
    pub bypass_paths: Vec<String>,
}

impl XstsLayerConfig {
    /// Add a path served without a token
    #[must_use]
    pub fn bypass(mut self, path: impl Into<String>) -> Self {
        self.bypass_paths.push(path.into());
        self
    }

    /// Whether a request path skips validation
    #[must_use]
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }
}
