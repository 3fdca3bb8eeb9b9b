use std::{sync::Arc, time::SystemTime};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use chrono::Utc;
use tracing::{error, info};

use super::{CredentialExchanger, ExpiryGuard, SsoPortal, TemporaryCredentials, TokenCache};
use crate::{constants::CREDENTIALS_PROVIDER_NAME, error::SessionError, secret::Secret};

/// The scoping triple for one credential exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub account_id: String,
    pub permission_set_name: String,
    pub region: String,
}

impl SessionRequest {
    pub fn new(
        account_id: impl Into<String>,
        permission_set_name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            permission_set_name: permission_set_name.into(),
            region: region.into(),
        }
    }
}

/// An AWS SDK client that can be built from a scoped configuration.
pub trait ServiceClient: Sized {
    /// Service name as used by the AWS CLI (`iam`, `sso-admin`, `ce`, ...)
    const SERVICE_NAME: &'static str;

    fn from_sdk_config(config: &SdkConfig) -> Self;
}

macro_rules! service_client {
    ($sdk:ident, $name:literal) => {
        impl ServiceClient for $sdk::Client {
            const SERVICE_NAME: &'static str = $name;

            fn from_sdk_config(config: &SdkConfig) -> Self {
                $sdk::Client::new(config)
            }
        }
    };
    // Global services are served from a single home region whatever the SSO region is
    ($sdk:ident, $name:literal, home_region = $region:literal) => {
        impl ServiceClient for $sdk::Client {
            const SERVICE_NAME: &'static str = $name;

            fn from_sdk_config(config: &SdkConfig) -> Self {
                let config = $sdk::config::Builder::from(config)
                    .region(Region::from_static($region))
                    .build();
                $sdk::Client::from_conf(config)
            }
        }
    };
}

service_client!(aws_sdk_iam, "iam", home_region = "us-east-1");
service_client!(aws_sdk_organizations, "organizations", home_region = "us-east-1");
service_client!(aws_sdk_ssoadmin, "sso-admin");
service_client!(aws_sdk_identitystore, "identitystore");
service_client!(aws_sdk_freetier, "freetier", home_region = "us-east-1");
service_client!(aws_sdk_costexplorer, "ce", home_region = "us-east-1");

/// A client configuration bound to one service, one account and one set of
/// temporary credentials. Built per request and never shared.
#[derive(Debug)]
pub struct ScopedClient {
    service_name: String,
    account_id: String,
    config: SdkConfig,
}

impl ScopedClient {
    async fn build(
        service_name: &str,
        request: &SessionRequest,
        credentials: TemporaryCredentials,
    ) -> Self {
        let provider = Credentials::new(
            credentials.access_key_id.expose(),
            credentials.secret_access_key.expose(),
            Some(credentials.session_token.expose().to_string()),
            credentials.expiration.map(SystemTime::from),
            CREDENTIALS_PROVIDER_NAME,
        );
        drop(credentials);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(request.region.clone()))
            .credentials_provider(provider)
            .load()
            .await;

        Self {
            service_name: service_name.to_string(),
            account_id: request.account_id.clone(),
            config,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn region(&self) -> Option<&Region> {
        self.config.region()
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Build the typed SDK client for the service this handle is scoped to.
    pub fn client<C: ServiceClient>(&self) -> Result<C, SessionError> {
        if C::SERVICE_NAME != self.service_name {
            return Err(SessionError::ServiceMismatch {
                scoped: self.service_name.clone(),
                requested: C::SERVICE_NAME.to_string(),
            });
        }

        Ok(C::from_sdk_config(&self.config))
    }
}

/// Produces scoped clients from the SSO token cache (or a supplied token).
///
/// Every failure is logged exactly once at error level and returned as a
/// [`SessionError`]; callers that only need to know whether a session exists
/// can use `.ok()`.
pub struct SessionFactory {
    token_cache: TokenCache,
    expiry: Arc<ExpiryGuard>,
    exchanger: CredentialExchanger,
}

impl SessionFactory {
    pub fn new(token_cache: TokenCache, expiry: Arc<ExpiryGuard>, portal: Arc<dyn SsoPortal>) -> Self {
        Self {
            token_cache,
            expiry,
            exchanger: CredentialExchanger::new(portal),
        }
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.token_cache
    }

    pub fn expiry_guard(&self) -> &Arc<ExpiryGuard> {
        &self.expiry
    }

    /// Create a session through AWS SSO and return a client scoped to `service_name`.
    pub async fn get_scoped_client(
        &self,
        request: &SessionRequest,
        service_name: &str,
        supplied_token: Option<&Secret>,
    ) -> Result<ScopedClient, SessionError> {
        let (access_token, expires_at) = match supplied_token {
            Some(token) => (token.clone(), None),
            None => match self.token_cache.read_latest_token().await {
                Ok(token) => {
                    self.expiry.record(token.expires_at);
                    (token.access_token, Some(token.expires_at))
                }
                Err(e) => {
                    error!("Failed to create session, no SSO access token: {e}");
                    return Err(e.into());
                }
            },
        };

        if self.expiry.is_expired(expires_at) {
            let expires_at = expires_at
                .or_else(|| self.expiry.last_known())
                .unwrap_or_else(Utc::now);
            error!("The access token is expired (expired at {expires_at})");
            return Err(SessionError::TokenExpired { expires_at });
        }

        // The exchanger logs its own classified failure
        let credentials = self
            .exchanger
            .exchange(
                &request.account_id,
                &request.permission_set_name,
                &request.region,
                access_token,
            )
            .await?;

        let client = ScopedClient::build(service_name, request, credentials).await;
        info!(
            "Created {} session for account {}",
            service_name, request.account_id
        );

        Ok(client)
    }

    /// Shorthand for a typed SDK client of service `C`.
    pub async fn client<C: ServiceClient>(
        &self,
        request: &SessionRequest,
        supplied_token: Option<&Secret>,
    ) -> Result<C, SessionError> {
        self.get_scoped_client(request, C::SERVICE_NAME, supplied_token)
            .await?
            .client::<C>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aws::portal::testing::{FakeSsoPortal, credentials},
        error::{ExchangeErrorKind, TokenError},
    };
    use chrono::Duration;
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tempfile::TempDir;
    use tracing::{Event, Level, Subscriber, subscriber::DefaultGuard};
    use tracing_subscriber::{
        Layer,
        layer::{Context, SubscriberExt},
    };

    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn capture_errors() -> (DefaultGuard, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(count.clone()));
        (tracing::subscriber::set_default(subscriber), count)
    }

    fn write_token(dir: &Path, token: &str, expires_at: chrono::DateTime<Utc>) {
        let body = format!(
            r#"{{"accessToken":"{token}","expiresAt":"{}"}}"#,
            expires_at.format("%Y-%m-%dT%H:%M:%SZ")
        );
        std::fs::write(dir.join("token.json"), body).unwrap();
    }

    fn build(dir: &Path, portal: FakeSsoPortal) -> (SessionFactory, Arc<FakeSsoPortal>) {
        let portal = Arc::new(portal);
        let factory = SessionFactory::new(
            TokenCache::new(dir),
            Arc::new(ExpiryGuard::new()),
            portal.clone(),
        );
        (factory, portal)
    }

    fn request() -> SessionRequest {
        SessionRequest::new("123456789012", "ReadOnlyAccess", "ap-northeast-1")
    }

    #[tokio::test]
    async fn test_missing_cache_directory_yields_one_logged_failure() {
        let (_guard, errors) = capture_errors();
        let dir = TempDir::new().unwrap();
        let (factory, portal) = build(
            &dir.path().join("missing"),
            FakeSsoPortal::issuing(credentials("A")),
        );

        let result = factory.get_scoped_client(&request(), "iam", None).await;

        assert!(matches!(
            result,
            Err(SessionError::Token(TokenError::CacheDirectoryMissing { .. }))
        ));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(portal.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_yields_one_logged_failure_without_exchange() {
        let (_guard, errors) = capture_errors();
        let dir = TempDir::new().unwrap();
        write_token(dir.path(), "stale", Utc::now() - Duration::minutes(5));
        let (factory, portal) = build(dir.path(), FakeSsoPortal::issuing(credentials("A")));

        let result = factory.get_scoped_client(&request(), "iam", None).await;

        assert!(matches!(result, Err(SessionError::TokenExpired { .. })));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(portal.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_exchange_yields_one_logged_failure() {
        let (_guard, errors) = capture_errors();
        let dir = TempDir::new().unwrap();
        write_token(dir.path(), "tok1", Utc::now() + Duration::hours(1));
        let (factory, portal) =
            build(dir.path(), FakeSsoPortal::failing("TooManyRequestsException"));

        let result = factory.get_scoped_client(&request(), "iam", None).await;

        match result {
            Err(SessionError::Exchange(e)) => assert_eq!(e.kind, ExchangeErrorKind::RateLimited),
            other => panic!("Expected exchange failure, got {other:?}"),
        }
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(portal.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_token_produces_scoped_client() {
        let dir = TempDir::new().unwrap();
        let expires_at = Utc::now() + Duration::hours(8);
        write_token(dir.path(), "tok1", expires_at);
        let (factory, portal) = build(dir.path(), FakeSsoPortal::issuing(credentials("A")));

        let client = factory
            .get_scoped_client(&request(), "iam", None)
            .await
            .unwrap();

        assert_eq!(client.service_name(), "iam");
        assert_eq!(client.account_id(), "123456789012");
        assert_eq!(client.region().map(|r| r.as_ref()), Some("ap-northeast-1"));
        assert_eq!(portal.seen_tokens.lock().as_slice(), ["tok1"]);
        assert!(factory.expiry_guard().last_known().is_some());
        assert!(client.client::<aws_sdk_iam::Client>().is_ok());
    }

    #[tokio::test]
    async fn test_supplied_token_skips_cache() {
        let dir = TempDir::new().unwrap();
        let (factory, portal) = build(
            &dir.path().join("missing"),
            FakeSsoPortal::issuing(credentials("A")),
        );
        let token = Secret::new("supplied");

        let client = factory
            .client::<aws_sdk_organizations::Client>(&request(), Some(&token))
            .await;

        assert!(client.is_ok());
        assert_eq!(portal.seen_tokens.lock().as_slice(), ["supplied"]);
        assert_eq!(token.expose(), "supplied");
    }

    #[tokio::test]
    async fn test_supplied_token_respects_last_known_expiry() {
        let dir = TempDir::new().unwrap();
        let (factory, portal) = build(dir.path(), FakeSsoPortal::issuing(credentials("A")));
        factory
            .expiry_guard()
            .record(Utc::now() - Duration::minutes(1));

        let result = factory
            .get_scoped_client(&request(), "iam", Some(&Secret::new("supplied")))
            .await;

        assert!(matches!(result, Err(SessionError::TokenExpired { .. })));
        assert_eq!(portal.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_scoped_client_refuses_other_services() {
        let dir = TempDir::new().unwrap();
        write_token(dir.path(), "tok1", Utc::now() + Duration::hours(1));
        let (factory, _) = build(dir.path(), FakeSsoPortal::issuing(credentials("A")));

        let client = factory
            .get_scoped_client(&request(), "iam", None)
            .await
            .unwrap();

        match client.client::<aws_sdk_organizations::Client>() {
            Err(SessionError::ServiceMismatch { scoped, requested }) => {
                assert_eq!(scoped, "iam");
                assert_eq!(requested, "organizations");
            }
            _ => panic!("Expected ServiceMismatch"),
        }
    }
}
