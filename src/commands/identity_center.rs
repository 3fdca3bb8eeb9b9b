use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::ManagementArgs;
use crate::{
    constants::{IDENTITY_CENTER_DEFAULT_CACHE_EXPIRY_SECS, IDENTITY_CENTER_DEFAULT_PORT},
    exporters::{self, identity_center},
};

#[derive(Debug, Clone, Args)]
pub struct IdentityCenterCommand {
    #[command(flatten)]
    pub management: ManagementArgs,

    #[arg(long, default_value_t = IDENTITY_CENTER_DEFAULT_PORT, help = "Port to listen on")]
    pub port: u16,

    #[arg(
        long,
        default_value_t = IDENTITY_CENTER_DEFAULT_CACHE_EXPIRY_SECS,
        help = "Cache expiry time in seconds"
    )]
    pub cache_expiry: u64,
}

impl IdentityCenterCommand {
    pub async fn execute(self, profile: &str) -> Result<()> {
        let (settings, state) = self
            .management
            .state(profile, self.port, self.cache_expiry)
            .await?;

        info!("Starting Identity Center exporter in {}", settings.sso_region);
        exporters::serve(identity_center::router(Arc::new(state)), settings.port).await
    }
}
