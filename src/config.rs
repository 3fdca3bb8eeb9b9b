use crate::constants;
use anyhow::{Context, Result};
use ini::{Ini, Properties};
use tokio::fs;
use tracing::debug;

/// SSO settings read from an AWS CLI profile, used when a flag is omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSettings {
    pub sso_account_id: Option<String>,
    pub sso_role_name: Option<String>,
    pub sso_region: Option<String>,
}

impl ProfileSettings {
    /// Read the profile section, following `sso_session` to its `[sso-session NAME]` section
    fn from_ini(ini: &Ini, profile: &str) -> Self {
        let Some(section) = ini.section(Some(section_name(profile))) else {
            return Self::default();
        };

        let session = section
            .get("sso_session")
            .and_then(|name| ini.section(Some(format!("sso-session {name}"))));

        Self::from_sections(section, session)
    }

    fn from_sections(section: &Properties, session: Option<&Properties>) -> Self {
        let get = |key: &str| {
            section
                .get(key)
                .or_else(|| session.and_then(|s| s.get(key)))
                .filter(|value| !value.trim().is_empty())
                .map(|value| value.trim().to_string())
        };

        Self {
            sso_account_id: get("sso_account_id"),
            sso_role_name: get("sso_role_name"),
            sso_region: get("sso_region"),
        }
    }
}

fn section_name(profile: &str) -> String {
    if profile == "default" {
        profile.to_string()
    } else {
        format!("profile {profile}")
    }
}

/// Load SSO settings for `profile`. A missing config file or profile yields empty settings.
pub async fn load(profile: &str) -> Result<ProfileSettings> {
    let Some(path) = constants::get_aws_config_path() else {
        debug!("No AWS config path available, skipping profile {profile}");
        return Ok(ProfileSettings::default());
    };

    if !fs::try_exists(&path).await.unwrap_or(false) {
        debug!("AWS config file {} does not exist", path.display());
        return Ok(ProfileSettings::default());
    }

    let content = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read AWS config file {}", path.display()))?;
    let ini = Ini::load_from_str(&content)
        .with_context(|| format!("Failed to parse AWS config file {}", path.display()))?;

    Ok(ProfileSettings::from_ini(&ini, profile))
}

/// Pick the command line value, falling back to the profile value.
pub fn require(
    flag_value: Option<String>,
    profile_value: Option<String>,
    flag: &str,
    profile_key: &str,
) -> Result<String> {
    flag_value
        .filter(|value| !value.trim().is_empty())
        .or(profile_value)
        .with_context(|| format!("{flag} is required (or set {profile_key} in the AWS profile)"))
}
