use std::sync::Arc;

use tracing::{debug, error};

use super::{SsoPortal, TemporaryCredentials};
use crate::{
    error::{ExchangeError, ExchangeErrorKind},
    secret::Secret,
};

/// Exchanges an SSO access token for permission set credentials.
#[derive(Clone)]
pub struct CredentialExchanger {
    portal: Arc<dyn SsoPortal>,
}

impl CredentialExchanger {
    pub fn new(portal: Arc<dyn SsoPortal>) -> Self {
        Self { portal }
    }

    /// Get permission set credentials through AWS Identity Center.
    ///
    /// The access token is consumed: it is zeroed when this call returns,
    /// whatever the outcome.
    pub async fn exchange(
        &self,
        account_id: &str,
        permission_set_name: &str,
        region: &str,
        access_token: Secret,
    ) -> Result<TemporaryCredentials, ExchangeError> {
        debug!(
            "Requesting role credentials for account {} with permission set {} in {}",
            account_id, permission_set_name, region
        );

        let result = self
            .portal
            .get_role_credentials(region, account_id, permission_set_name, &access_token)
            .await;
        drop(access_token);

        let failure = match result {
            Ok(Some(credentials)) => return Ok(credentials),
            Ok(None) => ExchangeError::new(
                ExchangeErrorKind::Unknown,
                "AWS SSO returned no role credentials",
            ),
            Err(e) => ExchangeError::new(ExchangeErrorKind::from_code(e.code.as_deref()), e.message),
        };

        match failure.kind {
            ExchangeErrorKind::Unauthorized => error!(
                "Unauthorized for account {}: {}",
                account_id, failure.message
            ),
            ExchangeErrorKind::InvalidRequest => error!(
                "Invalid request for account {}: {}",
                account_id, failure.message
            ),
            ExchangeErrorKind::ResourceNotFound => error!(
                "Resource not found for account {} / {}: {}",
                account_id, permission_set_name, failure.message
            ),
            ExchangeErrorKind::RateLimited => error!(
                "Too many requests while exchanging credentials for account {}: {}",
                account_id, failure.message
            ),
            ExchangeErrorKind::Unknown => error!(
                "An unexpected error occurred while exchanging credentials for account {}: {}",
                account_id, failure.message
            ),
        }

        Err(failure)
    }
}
