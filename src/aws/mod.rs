use std::fmt;

use chrono::{DateTime, Utc};

use crate::secret::Secret;

pub mod accounts;
pub mod credentials;
pub mod expiry;
pub mod portal;
pub mod session;
pub mod token;

/// Temporary credentials issued for one (account, permission set, region) triple.
///
/// Every field holding key material is zeroed when the value is dropped.
#[derive(Debug, Clone)]
pub struct TemporaryCredentials {
    pub access_key_id: Secret,
    pub secret_access_key: Secret,
    pub session_token: Secret,
    pub expiration: Option<DateTime<Utc>>,
}

/// AWS account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// Re-export commonly used types (functions should be accessed via module path)
pub use accounts::AccountEnumerator;
pub use credentials::CredentialExchanger;
pub use expiry::ExpiryGuard;
pub use portal::{AccountPage, OrganizationsDirectory, SdkOrganizations, SdkSsoPortal, SsoPortal};
pub use session::{ScopedClient, ServiceClient, SessionFactory, SessionRequest};
pub use token::{SsoToken, TokenCache};
