use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const DEFAULT_GITLAB_BASE: &str = "https://gitlab.com";

/// Application-specific configuration helpers.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("app", "tokenmed", "tokenmed")
            .ok_or(ConfigError::MissingProjectDirs)?;
        Self::from_root(dirs.config_dir().to_path_buf())
    }

    /// Use an explicit directory instead of the platform default.
    pub fn from_root(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    /// Path to the short-lived key/value file used across the login round trip.
    pub fn ephemeral_file(&self, profile: &str) -> PathBuf {
        self.root.join(format!("ephemeral-{profile}.json"))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Routes exposed by the token mediating back-end.
#[derive(Debug, Clone)]
pub struct MediatorEndpoints {
    pub verify: Url,
    pub refresh: Url,
    pub logout: Url,
    pub login: Url,
    pub token: Url,
}

impl MediatorEndpoints {
    /// Derive every route from the back-end origin (plus optional base path).
    pub fn from_base(base: &str) -> Result<Self, ConfigError> {
        let auth = join_path(base, "api/v1/auth/")?;
        Ok(Self {
            verify: auth.join("verify")?,
            refresh: auth.join("refresh")?,
            logout: auth.join("logout")?,
            login: auth.join("login")?,
            token: auth.join("token")?,
        })
    }
}

/// Locations of the GitLab resource API.
#[derive(Debug, Clone)]
pub struct GitlabEndpoints {
    pub graphql: Url,
    pub events: Url,
    /// Base used to turn relative avatar paths into absolute URLs.
    pub absolute_base: Url,
}

impl GitlabEndpoints {
    pub fn from_base(base: &str) -> Result<Self, ConfigError> {
        let absolute_base = join_path(base, "")?;
        Ok(Self {
            graphql: absolute_base.join("api/graphql")?,
            events: absolute_base.join("api/v4/events")?,
            absolute_base,
        })
    }
}

fn join_path(base: &str, suffix: &str) -> Result<Url, ConfigError> {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }
    Ok(Url::parse(&format!("{trimmed}/"))?.join(suffix)?)
}

/// Errors that can occur when working with configuration directories.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for tokenmed")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("base URL must not be empty")]
    EmptyBaseUrl,
    #[error("invalid base URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
