use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::ManagementArgs;
use crate::{
    constants::{FREETIER_DEFAULT_CACHE_EXPIRY_SECS, FREETIER_DEFAULT_PORT},
    exporters::{self, freetier},
};

#[derive(Debug, Clone, Args)]
pub struct FreetierCommand {
    #[command(flatten)]
    pub management: ManagementArgs,

    #[arg(long, default_value_t = FREETIER_DEFAULT_PORT, help = "Port to listen on")]
    pub port: u16,

    #[arg(
        long,
        default_value_t = FREETIER_DEFAULT_CACHE_EXPIRY_SECS,
        help = "Cache expiry time in seconds"
    )]
    pub cache_expiry: u64,
}

impl FreetierCommand {
    pub async fn execute(self, profile: &str) -> Result<()> {
        let (settings, state) = self
            .management
            .state(profile, self.port, self.cache_expiry)
            .await?;

        info!("Starting Free Tier exporter");
        exporters::serve(freetier::router(Arc::new(state)), settings.port).await
    }
}
