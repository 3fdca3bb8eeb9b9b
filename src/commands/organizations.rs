use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::ManagementArgs;
use crate::{
    constants::{ORGANIZATIONS_DEFAULT_CACHE_EXPIRY_SECS, ORGANIZATIONS_DEFAULT_PORT},
    exporters::{self, organizations},
};

#[derive(Debug, Clone, Args)]
pub struct OrganizationsCommand {
    #[command(flatten)]
    pub management: ManagementArgs,

    #[arg(long, default_value_t = ORGANIZATIONS_DEFAULT_PORT, help = "Port to listen on")]
    pub port: u16,

    #[arg(
        long,
        default_value_t = ORGANIZATIONS_DEFAULT_CACHE_EXPIRY_SECS,
        help = "Cache expiry time in seconds"
    )]
    pub cache_expiry: u64,
}

impl OrganizationsCommand {
    pub async fn execute(self, profile: &str) -> Result<()> {
        let (settings, state) = self
            .management
            .state(profile, self.port, self.cache_expiry)
            .await?;

        info!(
            "Starting Organizations exporter for account {}",
            settings.account_id.as_deref().unwrap_or_default()
        );
        exporters::serve(organizations::router(Arc::new(state)), settings.port).await
    }
}
