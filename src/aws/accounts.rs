use std::{collections::HashSet, sync::Arc};

use tracing::{error, info, warn};

use super::{AccountId, ExpiryGuard, OrganizationsDirectory, SsoPortal, TokenCache};
use crate::error::EnumerationError;

/// Lists the accounts an exporter should iterate over.
///
/// The two strategies fail differently. Listing through SSO degrades to the
/// accounts collected so far, listing through Organizations fails outright.
pub struct AccountEnumerator {
    token_cache: TokenCache,
    expiry: Arc<ExpiryGuard>,
    portal: Arc<dyn SsoPortal>,
    directory: Arc<dyn OrganizationsDirectory>,
}

impl AccountEnumerator {
    pub fn new(
        token_cache: TokenCache,
        expiry: Arc<ExpiryGuard>,
        portal: Arc<dyn SsoPortal>,
        directory: Arc<dyn OrganizationsDirectory>,
    ) -> Self {
        Self {
            token_cache,
            expiry,
            portal,
            directory,
        }
    }

    /// Get all account IDs assigned to the cached SSO session.
    ///
    /// Never fails: an unusable token yields no accounts, and a provider error
    /// mid-listing yields the accounts gathered before it.
    pub async fn list_accounts_via_sso(&self, region: &str) -> Vec<AccountId> {
        let token = match self.token_cache.read_latest_token().await {
            Ok(token) => token,
            Err(e) => {
                error!("Failed to list accounts, no SSO access token: {e}");
                return Vec::new();
            }
        };
        self.expiry.record(token.expires_at);

        if self.expiry.is_expired(Some(token.expires_at)) {
            error!("The SSO access token is expired.");
            return Vec::new();
        }

        let mut accounts = Accounts::default();
        let mut next_token = None;

        loop {
            match self
                .portal
                .list_accounts(region, &token.access_token, next_token.take())
                .await
            {
                Ok(page) => {
                    accounts.extend(page.account_ids);
                    match page.next_token {
                        Some(next) => next_token = Some(next),
                        None => break,
                    }
                }
                Err(source) => {
                    let partial = EnumerationError::Partial {
                        collected: accounts.len(),
                        source,
                    };
                    warn!("{partial}");
                    break;
                }
            }
        }

        info!("Retrieved {} accounts from AWS Identity Center", accounts.len());
        accounts.into_vec()
    }

    /// Get all account IDs in the organization.
    pub async fn list_accounts_via_org(&self) -> Result<Vec<AccountId>, EnumerationError> {
        let mut accounts = Accounts::default();
        let mut next_token = None;

        loop {
            let page = self
                .directory
                .list_accounts(next_token.take())
                .await
                .map_err(|e| {
                    let failure = EnumerationError::Failed(e);
                    error!("{failure}");
                    failure
                })?;

            accounts.extend(page.account_ids);
            match page.next_token {
                Some(next) => next_token = Some(next),
                None => break,
            }
        }

        info!("Retrieved {} accounts from AWS Organizations", accounts.len());
        Ok(accounts.into_vec())
    }
}

/// Insertion-ordered, duplicate-free account list
#[derive(Default)]
struct Accounts {
    seen: HashSet<String>,
    ordered: Vec<AccountId>,
}

impl Accounts {
    fn extend(&mut self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.ordered.push(AccountId::new(id));
            }
        }
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    fn into_vec(self) -> Vec<AccountId> {
        self.ordered
    }
}
