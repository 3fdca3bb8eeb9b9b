//! Provider-facing seams for AWS SSO and Organizations.
//!
//! The credential layer only needs three provider calls: SSO
//! `GetRoleCredentials`, SSO `ListAccounts` and Organizations `ListAccounts`.
//! They sit behind [`SsoPortal`] and [`OrganizationsDirectory`] so that the
//! session logic can be exercised without network access.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_organizations::Client as OrganizationsClient;
use aws_sdk_sso::{
    Client as SsoClient,
    error::{DisplayErrorContext, ProvideErrorMetadata},
};
use chrono::DateTime;

use super::TemporaryCredentials;
use crate::{constants::SSO_LIST_ACCOUNTS_PAGE_SIZE, error::ApiError, secret::Secret};

/// One page of account identifiers plus the continuation token, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPage {
    pub account_ids: Vec<String>,
    pub next_token: Option<String>,
}

/// The SSO portal API (`sso` service, bearer-token authenticated).
#[async_trait]
pub trait SsoPortal: Send + Sync {
    /// Issue role credentials. `Ok(None)` means the call succeeded without credentials.
    async fn get_role_credentials(
        &self,
        region: &str,
        account_id: &str,
        role_name: &str,
        access_token: &Secret,
    ) -> Result<Option<TemporaryCredentials>, ApiError>;

    /// List accounts assigned to the token's principal, one page at a time.
    async fn list_accounts(
        &self,
        region: &str,
        access_token: &Secret,
        next_token: Option<String>,
    ) -> Result<AccountPage, ApiError>;
}

/// Organization-wide account listing.
#[async_trait]
pub trait OrganizationsDirectory: Send + Sync {
    async fn list_accounts(&self, next_token: Option<String>) -> Result<AccountPage, ApiError>;
}

/// Reduce an SDK error to its code and full display context.
pub(crate) fn api_error<E>(err: E) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    ApiError::new(err.code(), DisplayErrorContext(&err).to_string())
}

/// [`SsoPortal`] backed by the AWS SDK.
///
/// A fresh client is built per call so that every request gets its own
/// provider round trip in the requested region.
#[derive(Debug, Clone, Default)]
pub struct SdkSsoPortal;

impl SdkSsoPortal {
    pub fn new() -> Self {
        Self
    }

    fn client(region: &str) -> SsoClient {
        // The SSO portal authenticates with the bearer token, no signing credentials
        let config = aws_sdk_sso::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .build();

        SsoClient::from_conf(config)
    }
}

#[async_trait]
impl SsoPortal for SdkSsoPortal {
    async fn get_role_credentials(
        &self,
        region: &str,
        account_id: &str,
        role_name: &str,
        access_token: &Secret,
    ) -> Result<Option<TemporaryCredentials>, ApiError> {
        let response = Self::client(region)
            .get_role_credentials()
            .account_id(account_id)
            .role_name(role_name)
            .access_token(access_token.expose())
            .send()
            .await
            .map_err(api_error)?;

        Ok(response.role_credentials.map(|creds| {
            // expiration is in milliseconds (epoch time)
            let expiration = (creds.expiration > 0)
                .then(|| DateTime::from_timestamp_millis(creds.expiration))
                .flatten();

            TemporaryCredentials {
                access_key_id: Secret::new(creds.access_key_id.unwrap_or_default()),
                secret_access_key: Secret::new(creds.secret_access_key.unwrap_or_default()),
                session_token: Secret::new(creds.session_token.unwrap_or_default()),
                expiration,
            }
        }))
    }

    async fn list_accounts(
        &self,
        region: &str,
        access_token: &Secret,
        next_token: Option<String>,
    ) -> Result<AccountPage, ApiError> {
        let response = Self::client(region)
            .list_accounts()
            .access_token(access_token.expose())
            .max_results(SSO_LIST_ACCOUNTS_PAGE_SIZE)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(api_error)?;

        Ok(AccountPage {
            account_ids: response
                .account_list
                .unwrap_or_default()
                .into_iter()
                .filter_map(|account| account.account_id)
                .collect(),
            next_token: response.next_token,
        })
    }
}

/// [`OrganizationsDirectory`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct SdkOrganizations {
    client: OrganizationsClient,
}

impl SdkOrganizations {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: OrganizationsClient::new(config),
        }
    }

    /// Use the ambient credential chain (environment, profile, instance metadata).
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::new(&config)
    }
}

#[async_trait]
impl OrganizationsDirectory for SdkOrganizations {
    async fn list_accounts(&self, next_token: Option<String>) -> Result<AccountPage, ApiError> {
        let response = self
            .client
            .list_accounts()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(api_error)?;

        Ok(AccountPage {
            account_ids: response
                .accounts
                .unwrap_or_default()
                .into_iter()
                .filter_map(|account| account.id)
                .collect(),
            next_token: response.next_token,
        })
    }
}
