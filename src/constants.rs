use std::{env, path::PathBuf};

use dirs;

/// AWS configuration directory name
pub const AWS_CONFIG_DIR_NAME: &str = ".aws";

/// AWS configuration file name
pub const AWS_CONFIG_FILE_NAME: &str = "config";

/// Environment variable overriding the AWS config file location
pub const AWS_CONFIG_FILE_ENV: &str = "AWS_CONFIG_FILE";

/// SSO token cache location, relative to the directory holding the AWS config file
pub const SSO_CACHE_SUBPATH: [&str; 2] = ["sso", "cache"];

/// Extension of token cache entries
pub const SSO_CACHE_FILE_EXTENSION: &str = "json";

/// Offset (hours east of UTC) used when logging token expiry for operators
pub const DISPLAY_UTC_OFFSET_HOURS: i32 = 9;

/// Fallback validity window applied when a token carries no known expiry
pub const FALLBACK_TOKEN_LIFETIME_MINUTES: i64 = 60;

/// Page size requested from SSO ListAccounts
pub const SSO_LIST_ACCOUNTS_PAGE_SIZE: i32 = 100;

/// Credential provider name attached to exchanged credentials
pub const CREDENTIALS_PROVIDER_NAME: &str = "aws-exporters-sso";

pub const ORGANIZATIONS_DEFAULT_PORT: u16 = 7723;
pub const ORGANIZATIONS_DEFAULT_CACHE_EXPIRY_SECS: u64 = 3600;

pub const IDENTITY_CENTER_DEFAULT_PORT: u16 = 11121;
pub const IDENTITY_CENTER_DEFAULT_CACHE_EXPIRY_SECS: u64 = 3600;

pub const FREETIER_DEFAULT_PORT: u16 = 4921;
pub const FREETIER_DEFAULT_CACHE_EXPIRY_SECS: u64 = 1800;

pub const MULTI_ACC_IAM_DEFAULT_PORT: u16 = 1989;
pub const MULTI_ACC_IAM_DEFAULT_CACHE_EXPIRY_SECS: u64 = 300;

/// Get the AWS config file path
/// Respects AWS_CONFIG_FILE environment variable if set
pub fn get_aws_config_path() -> Option<PathBuf> {
    // Check environment variable first
    if let Ok(path) = env::var(AWS_CONFIG_FILE_ENV) {
        return Some(PathBuf::from(path));
    }

    // Use default AWS config location
    dirs::home_dir().map(|home| home.join(AWS_CONFIG_DIR_NAME).join(AWS_CONFIG_FILE_NAME))
}

/// Get the SSO token cache directory that sits next to the AWS config file
pub fn get_sso_cache_dir() -> Option<PathBuf> {
    get_aws_config_path().map(|config| sso_cache_dir_for(&config))
}

/// Derive the token cache directory from a config file path
pub fn sso_cache_dir_for(config_file: &std::path::Path) -> PathBuf {
    let base = config_file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();

    SSO_CACHE_SUBPATH
        .iter()
        .fold(base, |path, segment| path.join(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_aws_config_path_with_env() {
        let original = env::var(AWS_CONFIG_FILE_ENV).ok();

        unsafe {
            env::set_var(AWS_CONFIG_FILE_ENV, "/custom/aws/config");
        }
        let path = get_aws_config_path();
        assert_eq!(path, Some(PathBuf::from("/custom/aws/config")));

        unsafe {
            match original {
                Some(val) => env::set_var(AWS_CONFIG_FILE_ENV, val),
                None => env::remove_var(AWS_CONFIG_FILE_ENV),
            }
        }
    }

    #[test]
    #[serial]
    fn test_get_aws_config_path_default() {
        let original = env::var(AWS_CONFIG_FILE_ENV).ok();

        unsafe {
            env::remove_var(AWS_CONFIG_FILE_ENV);
        }
        let path = get_aws_config_path();

        if let Some(p) = path {
            let path_str = p.to_string_lossy();
            assert!(path_str.contains(AWS_CONFIG_DIR_NAME));
            assert!(path_str.contains(AWS_CONFIG_FILE_NAME));
        }

        unsafe {
            if let Some(val) = original {
                env::set_var(AWS_CONFIG_FILE_ENV, val);
            }
        }
    }

    #[test]
    #[serial]
    fn test_get_sso_cache_dir_follows_config_env() {
        let original = env::var(AWS_CONFIG_FILE_ENV).ok();

        unsafe {
            env::set_var(AWS_CONFIG_FILE_ENV, "/custom/aws/config");
        }
        let dir = get_sso_cache_dir();
        assert_eq!(dir, Some(PathBuf::from("/custom/aws/sso/cache")));

        unsafe {
            match original {
                Some(val) => env::set_var(AWS_CONFIG_FILE_ENV, val),
                None => env::remove_var(AWS_CONFIG_FILE_ENV),
            }
        }
    }

    #[test]
    fn test_sso_cache_dir_for_bare_file_name() {
        let dir = sso_cache_dir_for(std::path::Path::new("config"));
        assert_eq!(dir, PathBuf::from("sso/cache"));
    }
}
