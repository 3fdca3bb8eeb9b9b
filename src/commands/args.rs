use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Args;

use crate::{
    aws::{ExpiryGuard, TokenCache},
    config::{self, ProfileSettings},
    exporters::{ExporterSettings, ExporterState},
    secret::Secret,
};

/// Flags that scope the credential exchange, shared by every exporter.
#[derive(Debug, Clone, Default, Args)]
pub struct SessionArgs {
    #[arg(
        long,
        help = "Permission set to assume in the target account (defaults to the profile's sso_role_name)"
    )]
    pub permission_set_name: Option<String>,

    #[arg(long, help = "AWS SSO region (defaults to the profile's sso_region)")]
    pub sso_region: Option<String>,

    #[arg(long, help = "Valid SSO access token to use instead of the local token cache")]
    pub access_token: Option<String>,
}

impl SessionArgs {
    pub fn settings(
        self,
        profile: &ProfileSettings,
        account_id: Option<String>,
        port: u16,
        cache_expiry_secs: u64,
    ) -> Result<ExporterSettings> {
        let permission_set_name = config::require(
            self.permission_set_name,
            profile.sso_role_name.clone(),
            "--permission-set-name",
            "sso_role_name",
        )?;
        let sso_region = config::require(
            self.sso_region,
            profile.sso_region.clone(),
            "--sso-region",
            "sso_region",
        )?;

        Ok(ExporterSettings {
            account_id,
            permission_set_name,
            sso_region,
            port,
            cache_expiry: Duration::from_secs(cache_expiry_secs),
            access_token: self
                .access_token
                .filter(|token| !token.is_empty())
                .map(Secret::new),
        })
    }
}

/// Flags for exporters that report on a single management account.
#[derive(Debug, Clone, Default, Args)]
pub struct ManagementArgs {
    #[arg(
        long,
        help = "Management account ID (defaults to the profile's sso_account_id)"
    )]
    pub mgmt_account_id: Option<String>,

    #[command(flatten)]
    pub session: SessionArgs,
}

impl ManagementArgs {
    /// Resolve settings against `profile` and build the exporter state.
    pub async fn state(
        self,
        profile: &str,
        port: u16,
        cache_expiry_secs: u64,
    ) -> Result<(ExporterSettings, ExporterState)> {
        let profile_settings = config::load(profile).await?;
        let mgmt_account_id = config::require(
            self.mgmt_account_id,
            profile_settings.sso_account_id.clone(),
            "--mgmt-account-id",
            "sso_account_id",
        )?;

        let settings = self.session.settings(
            &profile_settings,
            Some(mgmt_account_id),
            port,
            cache_expiry_secs,
        )?;
        let state = ExporterState::with_sso_portal(
            &settings,
            token_cache()?,
            Arc::new(ExpiryGuard::new()),
        );

        Ok((settings, state))
    }
}

pub(crate) fn token_cache() -> Result<TokenCache> {
    TokenCache::from_env().context("Failed to locate the SSO token cache")
}
