use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::commands::{
    CompletionsCommand, FreetierCommand, IdentityCenterCommand, MultiAccIamCommand,
    OrganizationsCommand,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "aws-exporters", version, about = "Export AWS account metadata over HTTP using AWS SSO credentials", long_about = None)]
pub struct Cli {
    #[arg(
        short = 'p',
        long,
        global = true,
        default_value = "default",
        help = "AWS profile used for settings not given on the command line"
    )]
    pub profile: String,

    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v debug, -vv trace)")]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Serve the organization structure and policies")]
    Organizations(OrganizationsCommand),
    #[command(about = "Serve Identity Center instances and permission sets")]
    IdentityCenter(IdentityCenterCommand),
    #[command(about = "Serve Free Tier usage and Cost Explorer usage quantities")]
    Freetier(FreetierCommand),
    #[command(about = "Serve IAM authorization details across accounts")]
    MultiAccIam(MultiAccIamCommand),
    #[command(about = "Generate shell completion scripts for aws-exporters")]
    Completions(CompletionsCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let profile = self.profile;

        match self.command {
            Commands::Organizations(cmd) => cmd.execute(&profile).await,
            Commands::IdentityCenter(cmd) => cmd.execute(&profile).await,
            Commands::Freetier(cmd) => cmd.execute(&profile).await,
            Commands::MultiAccIam(cmd) => cmd.execute(&profile).await,
            Commands::Completions(cmd) => {
                cmd.execute();
                Ok(())
            }
        }
    }
}
