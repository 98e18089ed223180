// src/config/endpoint.rs

//! Behaviour on top of the endpoint configuration structs: structural
//! validation at load time and credential resolution at materialization time.

use std::path::Path;

use serde::Serialize;

use crate::config::model::{EndpointConfig, EndpointKind};

/// Endpoint with its secret resolved, as handed to the copy engine.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEndpoint {
    pub name: String,
    #[serde(flatten)]
    pub kind: EndpointKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl EndpointKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            EndpointKind::Local(_) => "local",
            EndpointKind::Smb(_) => "smb",
            EndpointKind::S3(_) => "s3",
            EndpointKind::Sftp(_) => "sftp",
            EndpointKind::Ftp(_) => "ftp",
            EndpointKind::Webdav(_) => "webdav",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EndpointKind::Local(_))
    }

    pub fn is_object_store(&self) -> bool {
        matches!(self, EndpointKind::S3(_))
    }

    pub fn local_root(&self) -> Option<&Path> {
        match self {
            EndpointKind::Local(l) => Some(l.root.as_path()),
            _ => None,
        }
    }

    /// Structural checks that do not depend on the environment.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            EndpointKind::Local(l) => {
                if l.root.as_os_str().is_empty() {
                    return Err("local endpoint needs a non-empty `root`".to_string());
                }
            }
            EndpointKind::Smb(s) => {
                require("host", &s.host)?;
                require("share", &s.share)?;
                require("username", &s.username)?;
            }
            EndpointKind::S3(s) => {
                require("bucket", &s.bucket)?;
                if !s.env_auth && (s.access_key_id.is_none() || s.secret_key_env.is_none()) {
                    return Err(
                        "s3 endpoint needs `access_key_id` + `secret_key_env`, or `env_auth = true`"
                            .to_string(),
                    );
                }
            }
            EndpointKind::Sftp(s) => {
                require("host", &s.host)?;
                require("username", &s.username)?;
                if s.password_env.is_none() && s.key_file.is_none() {
                    return Err("sftp endpoint needs `password_env` or `key_file`".to_string());
                }
            }
            EndpointKind::Ftp(f) => {
                require("host", &f.host)?;
            }
            EndpointKind::Webdav(w) => {
                if !(w.url.starts_with("http://") || w.url.starts_with("https://")) {
                    return Err(format!(
                        "webdav `url` must start with http:// or https:// (got '{}')",
                        w.url
                    ));
                }
            }
        }
        Ok(())
    }

    fn secret_env(&self) -> Option<&str> {
        match self {
            EndpointKind::Local(_) => None,
            EndpointKind::Smb(s) => s.password_env.as_deref(),
            EndpointKind::S3(s) if s.env_auth => None,
            EndpointKind::S3(s) => s.secret_key_env.as_deref(),
            EndpointKind::Sftp(s) => s.password_env.as_deref(),
            EndpointKind::Ftp(f) => f.password_env.as_deref(),
            EndpointKind::Webdav(w) => w.password_env.as_deref(),
        }
    }
}

impl EndpointConfig {
    /// Look up the secret this endpoint refers to.
    ///
    /// Fails when the named environment variable is not set; endpoints that
    /// need no secret always resolve.
    pub fn resolve(&self, name: &str) -> Result<ResolvedEndpoint, String> {
        let secret = match self.kind.secret_env() {
            None => None,
            Some(var) => match std::env::var(var) {
                Ok(value) => Some(value),
                Err(_) => {
                    return Err(format!(
                        "credentials for endpoint '{name}' unavailable: environment variable {var} is not set"
                    ));
                }
            },
        };

        Ok(ResolvedEndpoint {
            name: name.to_string(),
            kind: self.kind.clone(),
            secret,
        })
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("`{field}` must not be empty"))
    } else {
        Ok(())
    }
}
