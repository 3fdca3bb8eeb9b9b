use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{SessionArgs, args::token_cache};
use crate::{
    aws::{AccountEnumerator, ExpiryGuard, SdkOrganizations, SdkSsoPortal},
    config,
    constants::{MULTI_ACC_IAM_DEFAULT_CACHE_EXPIRY_SECS, MULTI_ACC_IAM_DEFAULT_PORT},
    exporters::{
        self, ExporterState,
        multi_acc_iam::{self, AccountSource, MultiAccountState},
    },
};

#[derive(Debug, Clone, Args)]
pub struct MultiAccIamCommand {
    #[command(flatten)]
    pub session: SessionArgs,

    #[arg(
        long,
        value_enum,
        default_value_t = AccountSource::Sso,
        help = "Where to list target accounts from"
    )]
    pub account_source: AccountSource,

    #[arg(long, default_value_t = MULTI_ACC_IAM_DEFAULT_PORT, help = "Port to listen on")]
    pub port: u16,

    #[arg(
        long,
        default_value_t = MULTI_ACC_IAM_DEFAULT_CACHE_EXPIRY_SECS,
        help = "Cache expiry time in seconds"
    )]
    pub cache_expiry: u64,
}

impl MultiAccIamCommand {
    pub async fn execute(self, profile: &str) -> Result<()> {
        let profile_settings = config::load(profile).await?;
        let settings = self
            .session
            .settings(&profile_settings, None, self.port, self.cache_expiry)?;

        // The enumerator and the session factory share one last-known expiry
        let expiry = Arc::new(ExpiryGuard::new());
        let token_cache = token_cache()?;
        let enumerator = AccountEnumerator::new(
            token_cache.clone(),
            expiry.clone(),
            Arc::new(SdkSsoPortal::new()),
            Arc::new(SdkOrganizations::from_env().await),
        );
        let exporter = ExporterState::with_sso_portal(&settings, token_cache, expiry);
        let state = MultiAccountState::new(exporter, enumerator, self.account_source);

        info!(
            "Starting multi-account IAM exporter with permission set {}",
            settings.permission_set_name
        );
        exporters::serve(multi_acc_iam::router(Arc::new(state)), settings.port).await
    }
}
