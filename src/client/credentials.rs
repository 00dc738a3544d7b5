// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Saved device credentials.
//!
//! After a successful device login the endpoint and bearer token are written
//! as TOML to `<config dir>/devicelink/credentials`, so later commands can
//! authenticate without another round trip through the browser.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "devicelink";
const FILE_NAME: &str = "credentials";

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("could not determine the user config directory")]
    NoConfigDir,

    #[error("credentials file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("credentials file is not valid: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not encode credentials: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub endpoint: String,
    pub token: String,
}

impl Credentials {
    pub fn new(endpoint: &str, token: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// `<config dir>/devicelink/credentials` for the current user.
    pub fn default_path() -> Result<PathBuf, CredentialsError> {
        let config_dir = dirs::config_dir().ok_or(CredentialsError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR).join(FILE_NAME))
    }

    /// Read saved credentials. A missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>, CredentialsError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(toml::from_str(&content)?))
    }

    /// Write the credentials, creating parent directories. On Unix the file
    /// is readable by the owner only.
    pub fn save_to(&self, path: &Path) -> Result<(), CredentialsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    pub fn load() -> Result<Option<Self>, CredentialsError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Save to the default location and return where that was.
    pub fn save(&self) -> Result<PathBuf, CredentialsError> {
        let path = Self::default_path()?;
        self.save_to(&path)?;
        Ok(path)
    }
}
