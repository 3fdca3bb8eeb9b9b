use std::io::{self, Write};

use clap::{Args, CommandFactory};
use clap_complete::Shell;

use crate::cli::Cli;

#[derive(Debug, Clone, Args)]
pub struct CompletionsCommand {
    #[arg(value_enum, help = "Target shell for completion script")]
    pub shell: Shell,
}

impl CompletionsCommand {
    pub fn execute(self) {
        self.write_to(&mut io::stdout());
    }

    fn write_to(&self, out: &mut impl Write) {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(self.shell, &mut cmd, bin_name, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buffer = Vec::new();
        CompletionsCommand { shell }.write_to(&mut buffer);
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_every_shell_names_the_binary() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Elvish] {
            assert!(script(shell).contains("aws-exporters"), "{shell}");
        }
    }

    #[test]
    fn test_completions_cover_exporter_flags() {
        let bash = script(Shell::Bash);

        for exporter in ["organizations", "identity-center", "freetier", "multi-acc-iam"] {
            assert!(bash.contains(exporter), "{exporter}");
        }
        for flag in [
            "--mgmt-account-id",
            "--permission-set-name",
            "--sso-region",
            "--access-token",
            "--cache-expiry",
            "--account-source",
        ] {
            assert!(bash.contains(flag), "{flag}");
        }
    }

    #[test]
    fn test_account_source_values_are_completed() {
        let fish = script(Shell::Fish);

        assert!(fish.contains("sso"));
        assert!(fish.contains("org"));
    }
}
