//! HTTP exporters that publish AWS account data as JSON.
//!
//! Every exporter owns an [`ExporterState`]: a session factory bound to the
//! local SSO token cache, a response cache and the scoping settings given on
//! the command line. Handlers build a fresh scoped client per cache miss.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use aws_sdk_sso::error::ProvideErrorMetadata;
use aws_smithy_types::{DateTime, date_time::Format};
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    aws::{ExpiryGuard, SdkSsoPortal, ServiceClient, SessionFactory, SessionRequest, TokenCache, portal::api_error},
    error::{ApiError, EnumerationError, SessionError},
    secret::Secret,
};

pub mod cache;
pub mod freetier;
pub mod identity_center;
pub mod multi_acc_iam;
pub mod organizations;

pub use cache::TtlCache;

/// Failure of a single exporter request.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("Failed to retrieve {what}")]
    Session {
        what: &'static str,
        #[source]
        source: SessionError,
    },

    #[error("Failed to retrieve {what}")]
    Provider {
        what: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Failed to retrieve {what}")]
    Unavailable { what: &'static str, reason: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("Failed to retrieve account list")]
    Enumeration(#[from] EnumerationError),
}

impl ExporterError {
    /// The response message followed by the underlying cause, for logs.
    pub fn detailed(&self) -> String {
        match self {
            Self::Unavailable { reason, .. } => format!("{self}: {reason}"),
            _ => match std::error::Error::source(self) {
                Some(source) => format!("{self}: {source}"),
                None => self.to_string(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ExporterError {
    fn into_response(self) -> Response {
        // Session and enumeration failures were logged where they happened
        if matches!(self, Self::Provider { .. } | Self::Unavailable { .. }) {
            error!("{}", self.detailed());
        }

        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Map an SDK error onto [`ExporterError::Provider`].
pub(crate) fn provider<E>(what: &'static str) -> impl FnOnce(E) -> ExporterError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    move |err| ExporterError::Provider {
        what,
        source: api_error(err),
    }
}

pub(crate) fn timestamp(value: Option<&DateTime>) -> Option<String> {
    value.and_then(|t| t.fmt(Format::DateTime).ok())
}

/// Settings shared by every exporter, resolved from the command line and profile.
#[derive(Debug, Clone)]
pub struct ExporterSettings {
    pub account_id: Option<String>,
    pub permission_set_name: String,
    pub sso_region: String,
    pub port: u16,
    pub cache_expiry: Duration,
    pub access_token: Option<Secret>,
}

pub struct ExporterState {
    sessions: SessionFactory,
    cache: TtlCache,
    account_id: Option<String>,
    permission_set_name: String,
    sso_region: String,
    access_token: Option<Secret>,
}

impl ExporterState {
    pub fn new(sessions: SessionFactory, settings: &ExporterSettings) -> Self {
        Self {
            sessions,
            cache: TtlCache::new(settings.cache_expiry),
            account_id: settings.account_id.clone(),
            permission_set_name: settings.permission_set_name.clone(),
            sso_region: settings.sso_region.clone(),
            access_token: settings.access_token.clone(),
        }
    }

    /// Build state whose sessions exchange tokens through the AWS SSO portal.
    pub fn with_sso_portal(
        settings: &ExporterSettings,
        token_cache: TokenCache,
        expiry: Arc<ExpiryGuard>,
    ) -> Self {
        let sessions = SessionFactory::new(token_cache, expiry, Arc::new(SdkSsoPortal::new()));
        Self::new(sessions, settings)
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn sso_region(&self) -> &str {
        &self.sso_region
    }

    /// Client for the management account this exporter reports on.
    pub async fn client<C: ServiceClient>(&self, what: &'static str) -> Result<C, ExporterError> {
        let account_id = self
            .account_id
            .as_deref()
            .ok_or_else(|| ExporterError::Unavailable {
                what,
                reason: "no management account ID is configured".to_string(),
            })?;
        self.client_in::<C>(account_id, what).await
    }

    /// Client scoped to an arbitrary account under the configured permission set.
    pub async fn client_in<C: ServiceClient>(
        &self,
        account_id: &str,
        what: &'static str,
    ) -> Result<C, ExporterError> {
        let request = SessionRequest::new(account_id, &self.permission_set_name, &self.sso_region);
        self.sessions
            .client::<C>(&request, self.access_token.as_ref())
            .await
            .map_err(|source| ExporterError::Session { what, source })
    }

    /// Serve `key` from the cache, loading and storing it on a miss.
    pub async fn cached<F, Fut>(&self, key: &str, load: F) -> Result<Json<Value>, ExporterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ExporterError>>,
    {
        if let Some(value) = self.cache.get(key) {
            info!("Returning cached data for {key} to reduce API calls.");
            return Ok(Json(value));
        }

        let value = load().await?;
        self.cache.insert(key, value.clone());
        Ok(Json(value))
    }
}

/// Routes every exporter exposes regardless of what it reports.
pub fn common_routes<S>(service: &'static str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/health",
        get(move || async move {
            Json(json!({
                "status": "healthy",
                "service": service,
                "version": env!("CARGO_PKG_VERSION"),
            }))
        }),
    )
}

pub async fn serve(router: Router, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on http://{addr}");
    axum::serve(listener, router)
        .await
        .context("HTTP server terminated unexpectedly")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aws::portal::testing::{FakeSsoPortal, credentials},
        error::TokenError,
    };
    use axum::{body::Body, http::Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let router: Router = common_routes("organizations");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "organizations");
    }

    #[tokio::test]
    async fn test_error_responses() {
        let response = ExporterError::BadRequest("Invalid filter type".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"error": "Invalid filter type"}));

        let response = ExporterError::Session {
            what: "organization structure",
            source: SessionError::Token(TokenError::NoHomeDirectory),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Failed to retrieve organization structure"})
        );
    }

    #[test]
    fn test_detailed_includes_cause() {
        let err = ExporterError::Provider {
            what: "IAM details",
            source: ApiError::new(Some("AccessDenied"), "not authorized"),
        };
        assert_eq!(err.detailed(), "Failed to retrieve IAM details: not authorized");

        let err = ExporterError::Unavailable {
            what: "permission sets",
            reason: "no Identity Center instance found".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to retrieve permission sets");
        assert_eq!(
            err.detailed(),
            "Failed to retrieve permission sets: no Identity Center instance found"
        );
    }

    #[tokio::test]
    async fn test_cached_loads_once() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            dir.path(),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );

        let first = state
            .cached("organization", || async { Ok(json!({"loaded": 1})) })
            .await
            .unwrap();
        let second = state
            .cached("organization", || async {
                Err(ExporterError::BadRequest("should not load".to_string()))
            })
            .await
            .unwrap();

        assert_eq!(first.0, second.0);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            dir.path(),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );

        let failed = state
            .cached("policies", || async {
                Err(ExporterError::BadRequest("boom".to_string()))
            })
            .await;
        assert!(failed.is_err());
        assert!(state.cache().get("policies").is_none());
    }

    #[tokio::test]
    async fn test_client_without_session_is_session_error() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            &dir.path().join("missing"),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(Some("123456789012")),
        );

        let result = state
            .client::<aws_sdk_organizations::Client>("organization structure")
            .await;

        assert!(matches!(result, Err(ExporterError::Session { .. })));
    }

    #[tokio::test]
    async fn test_client_without_account_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let state = testing::state(
            dir.path(),
            FakeSsoPortal::issuing(credentials("A")),
            &testing::settings(None),
        );

        let result = state.client::<aws_sdk_iam::Client>("IAM details").await;

        assert!(matches!(result, Err(ExporterError::Unavailable { .. })));
    }
}
