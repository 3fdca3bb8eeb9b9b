use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::{
    constants::{self, DISPLAY_UTC_OFFSET_HOURS, SSO_CACHE_FILE_EXTENSION},
    error::TokenError,
    secret::Secret,
};

/// SSO access token read from the local cache
#[derive(Debug, Clone)]
pub struct SsoToken {
    pub access_token: Secret,
    pub expires_at: DateTime<Utc>,
}

/// Fields of an AWS CLI token cache entry that matter here
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedToken {
    access_token: Option<String>,
    expires_at: Option<String>,
}

/// Read-only view of the SSO token cache written by `aws sso login`.
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Locate the cache next to the AWS config file.
    /// Respects AWS_CONFIG_FILE environment variable if set
    pub fn from_env() -> Result<Self, TokenError> {
        constants::get_sso_cache_dir()
            .map(Self::new)
            .ok_or(TokenError::NoHomeDirectory)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the most recently written token in the cache.
    pub async fn read_latest_token(&self) -> Result<SsoToken, TokenError> {
        let path = self.latest_entry().await?;
        debug!("Reading SSO token from {}", path.display());

        let contents = Zeroizing::new(fs::read_to_string(&path).await.map_err(|source| {
            TokenError::Io {
                path: path.clone(),
                source,
            }
        })?);

        let cached: CachedToken =
            serde_json::from_str(&contents).map_err(|e| TokenError::MalformedToken {
                path: path.clone(),
                reason: format!("invalid JSON: {e}"),
            })?;

        let access_token = cached
            .access_token
            .map(Secret::new)
            .ok_or_else(|| TokenError::MalformedToken {
                path: path.clone(),
                reason: "'accessToken' not found in the token data".to_string(),
            })?;

        let raw_expiry = cached
            .expires_at
            .ok_or_else(|| TokenError::MalformedToken {
                path: path.clone(),
                reason: "'expiresAt' not found in the token data".to_string(),
            })?;

        let expires_at = parse_expiry(&raw_expiry).ok_or_else(|| TokenError::MalformedToken {
            path: path.clone(),
            reason: format!("unparseable expiresAt '{raw_expiry}'"),
        })?;

        let display_offset =
            FixedOffset::east_opt(DISPLAY_UTC_OFFSET_HOURS * 3600).unwrap_or_else(|| Utc.fix());
        info!(
            "The access token will be expired at {}",
            expires_at.with_timezone(&display_offset)
        );

        Ok(SsoToken {
            access_token,
            expires_at,
        })
    }

    async fn latest_entry(&self) -> Result<PathBuf, TokenError> {
        let io_error = |source| TokenError::Io {
            path: self.dir.clone(),
            source,
        };

        match fs::metadata(&self.dir).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(TokenError::CacheDirectoryMissing {
                    path: self.dir.clone(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TokenError::CacheDirectoryMissing {
                    path: self.dir.clone(),
                });
            }
            Err(e) => return Err(io_error(e)),
        }

        let mut entries = fs::read_dir(&self.dir).await.map_err(io_error)?;
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SSO_CACHE_FILE_EXTENSION) {
                continue;
            }

            let metadata = entry.metadata().await.map_err(io_error)?;
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata.modified().map_err(io_error)?;
            candidates.push((modified, path));
        }

        // Newest first; equal timestamps fall back to file name order
        candidates.sort_by(|(a_time, a_path), (b_time, b_path)| {
            b_time.cmp(a_time).then_with(|| a_path.cmp(b_path))
        });

        candidates
            .into_iter()
            .next()
            .map(|(_, path)| path)
            .ok_or_else(|| TokenError::NoTokenFiles {
                path: self.dir.clone(),
            })
    }
}

/// Parse an ISO-8601 expiry as written by the AWS CLI.
///
/// A trailing `Z` or `UTC` is rewritten to an explicit `+00:00` offset first.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let normalized = match raw
        .strip_suffix('Z')
        .or_else(|| raw.strip_suffix("UTC"))
    {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };

    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
