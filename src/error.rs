use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QibError {
    #[error("no configuration files given (use --all or --connection/--params/--tags)")]
    NoConfiguration,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing configuration: section `{section}`{}", key_suffix(.key))]
    ConfigurationMissing {
        section: &'static str,
        key: Option<&'static str>,
    },

    #[error("could not connect to XNAT: {0}")]
    ConnectionFailure(String),

    #[error("project not found in XNAT: {0}")]
    ProjectNotFound(String),

    #[error("XNAT request failed: {0}")]
    XnatHttp(String),

    #[error("XNAT returned status {status}: {message}")]
    XnatStatus { status: u16, message: String },

    #[error("unexpected XNAT response: {0}")]
    XnatResponse(String),

    #[error("failed to read patient map {path}: {message}")]
    PatientMap { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

fn key_suffix(key: &Option<&'static str>) -> String {
    key.map(|key| format!(", key `{key}`")).unwrap_or_default()
}
