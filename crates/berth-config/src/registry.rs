//! Registry credentials read from the Docker client configuration file.
//!
//! Pushes and authenticated pulls carry an `X-Registry-Auth` header: the
//! base64url encoding of a small JSON credential object. Credentials come from
//! the `auths` table of `config.json`; registries without an entry use the
//! anonymous header.

use std::collections::BTreeMap;
use std::fs;
use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::EnvSource;

/// Variable naming the Docker client configuration directory or file.
pub const DOCKER_CONFIG_VARIABLE: &str = "DOCKER_CONFIG";

/// Registry assumed for references without an explicit registry host.
pub const DEFAULT_REGISTRY: &str = "index.docker.io/v1/";

/// `X-Registry-Auth` value for anonymous access (base64 of `{}`).
pub const ANONYMOUS_REGISTRY_AUTH: &str = "e30=";

const CONFIG_FILE_NAME: &str = "config.json";

/// One entry of the `auths` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthEntry {
    /// Base64 of `username:password`, as written by `docker login`.
    #[serde(default)]
    pub auth: Option<String>,
    /// Plain user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Plain password.
    #[serde(default)]
    pub password: Option<String>,
    /// OAuth identity token.
    #[serde(default, rename = "identitytoken")]
    pub identity_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Debug, Serialize)]
struct AuthHeader<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(rename = "identitytoken", skip_serializing_if = "Option::is_none")]
    identity_token: Option<&'a str>,
    serveraddress: &'a str,
}

/// Credentials keyed by registry address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAuths {
    auths: BTreeMap<String, AuthEntry>,
}

impl RegistryAuths {
    /// Loads the client configuration named by `DOCKER_CONFIG`, falling back
    /// to `~/.docker/config.json`.
    ///
    /// A missing file yields no credentials.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryAuthError`] when the file exists but cannot be read
    /// or parsed.
    pub fn load(env: &dyn EnvSource) -> Result<Self, RegistryAuthError> {
        match docker_config_path(env) {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads credentials from `path`; a missing file yields none.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryAuthError`] when the file cannot be read or parsed.
    pub fn from_path(path: &Utf8Path) -> Result<Self, RegistryAuthError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(RegistryAuthError::Read {
                    path: path.to_owned(),
                    source,
                });
            }
        };
        Self::from_json(&text).map_err(|source| RegistryAuthError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Parses the contents of a client configuration file.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when `text` is not a configuration object.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let file: ConfigFile = serde_json::from_str(text)?;
        Ok(Self { auths: file.auths })
    }

    /// Returns `true` when no credentials are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    /// Finds the entry for `registry`, trying the bare key, the `https://`
    /// key, and for `docker.io` the index address.
    #[must_use]
    pub fn lookup(&self, registry: &str) -> Option<&AuthEntry> {
        self.auths
            .get(registry)
            .or_else(|| self.auths.get(&format!("https://{registry}")))
            .or_else(|| {
                (registry == "docker.io")
                    .then(|| self.lookup(DEFAULT_REGISTRY))
                    .flatten()
            })
    }

    /// Builds the `X-Registry-Auth` value for `image`.
    ///
    /// Returns [`ANONYMOUS_REGISTRY_AUTH`] when no entry matches.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryAuthError::InvalidAuth`] when the stored `auth`
    /// field is not base64 of `user:password`.
    pub fn header_for_image(&self, image: &str) -> Result<String, RegistryAuthError> {
        let registry = registry_for_image(image);
        let Some(entry) = self.lookup(registry) else {
            return Ok(ANONYMOUS_REGISTRY_AUTH.to_owned());
        };
        encode_header(registry, entry)
    }
}

fn encode_header(registry: &str, entry: &AuthEntry) -> Result<String, RegistryAuthError> {
    let decoded = match (&entry.auth, &entry.username) {
        (Some(auth), None) => Some(decode_basic(registry, auth)?),
        _ => None,
    };
    let (username, password) = match &decoded {
        Some((user, password)) => (Some(user.as_str()), Some(password.as_str())),
        None => (entry.username.as_deref(), entry.password.as_deref()),
    };
    let header = AuthHeader {
        username,
        password,
        identity_token: entry.identity_token.as_deref(),
        serveraddress: registry,
    };
    let json = serde_json::to_vec(&header).map_err(RegistryAuthError::Encode)?;
    Ok(URL_SAFE.encode(json))
}

fn decode_basic(registry: &str, auth: &str) -> Result<(String, String), RegistryAuthError> {
    let invalid = || RegistryAuthError::InvalidAuth {
        registry: registry.to_owned(),
    };
    let bytes = STANDARD.decode(auth.trim()).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (user, password) = text.split_once(':').ok_or_else(invalid)?;
    Ok((user.to_owned(), password.to_owned()))
}

/// Returns the registry an image reference lives on.
///
/// The first path component names a registry when it contains `.` or `:` or
/// is `localhost`; otherwise the image lives on [`DEFAULT_REGISTRY`].
#[must_use]
pub fn registry_for_image(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            first
        }
        _ => DEFAULT_REGISTRY,
    }
}

/// Locates the client configuration file.
///
/// `DOCKER_CONFIG` may name the file itself or the directory holding
/// `config.json`.
#[must_use]
pub fn docker_config_path(env: &dyn EnvSource) -> Option<Utf8PathBuf> {
    if let Some(value) = env.var(DOCKER_CONFIG_VARIABLE) {
        let path = Utf8PathBuf::from(value);
        if path.is_dir() {
            return Some(path.join(CONFIG_FILE_NAME));
        }
        return Some(path);
    }
    home_directory(env).map(|home| home.join(".docker").join(CONFIG_FILE_NAME))
}

fn home_directory(env: &dyn EnvSource) -> Option<Utf8PathBuf> {
    env.var("HOME")
        .or_else(|| env.var("USERPROFILE"))
        .map(Utf8PathBuf::from)
        .or_else(|| {
            #[cfg(unix)]
            {
                dirs::home_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
            }
            #[cfg(not(unix))]
            {
                None
            }
        })
}

/// Errors raised while reading registry credentials.
#[derive(Debug, Error)]
pub enum RegistryAuthError {
    /// The configuration file exists but could not be read.
    #[error("failed to read registry credentials from {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid JSON of the expected shape.
    #[error("failed to parse registry credentials in {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A stored `auth` value is not base64 of `user:password`.
    #[error("stored credentials for '{registry}' are malformed")]
    InvalidAuth { registry: String },
    /// The credential header could not be serialised.
    #[error("failed to encode registry credentials: {0}")]
    Encode(#[source] serde_json::Error),
}
