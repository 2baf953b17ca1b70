use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QibError;

pub const PASSWORD_ENV: &str = "XNAT_PASSWORD";

/// One configuration file. Any subset of the sections may be present.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub connection: Option<ConnectionSection>,
    #[serde(default)]
    pub study: Option<StudySection>,
    #[serde(default)]
    pub tags: Option<TagsSection>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ConnectionSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub patient_map_file: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct StudySection {
    #[serde(default, alias = "STUDY_ID")]
    pub study_id: Option<String>,
    #[serde(default, alias = "SECURITY_REQUIRED")]
    pub security_required: Option<String>,
    #[serde(default, alias = "TOP_NODE")]
    pub top_node: Option<String>,
    #[serde(default, alias = "path")]
    pub output_base_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagsSection {
    #[serde(alias = "Taglist")]
    pub taglist: TagListEntry,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TagListEntry {
    Shorthand(String),
    Detailed(Vec<String>),
}

impl TagListEntry {
    pub fn into_list(self) -> Vec<String> {
        match self {
            TagListEntry::Shorthand(value) => value
                .split(", ")
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect(),
            TagListEntry::Detailed(tags) => tags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub project: String,
    pub patient_map_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyConfig {
    pub study_id: String,
    pub security_required: String,
    pub top_node: String,
    pub output_base_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagsConfig {
    pub tag_list: Vec<String>,
}

/// Where each configuration group comes from on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub all: Option<PathBuf>,
    pub connection: Option<PathBuf>,
    pub params: Option<PathBuf>,
    pub tags: Option<PathBuf>,
}

impl ConfigSources {
    pub fn is_empty(&self) -> bool {
        self.all.is_none()
            && self.connection.is_none()
            && self.params.is_none()
            && self.tags.is_none()
    }
}

/// Validated configuration. A group is `None` when no source supplied it; the
/// `require_*` accessors turn that into [`QibError::ConfigurationMissing`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub connection: Option<ConnectionConfig>,
    pub study: Option<StudyConfig>,
    pub tags: Option<TagsConfig>,
}

impl ResolvedConfig {
    pub fn require_connection(&self) -> Result<&ConnectionConfig, QibError> {
        self.connection.as_ref().ok_or(QibError::ConfigurationMissing {
            section: "connection",
            key: None,
        })
    }

    pub fn require_study(&self) -> Result<&StudyConfig, QibError> {
        self.study.as_ref().ok_or(QibError::ConfigurationMissing {
            section: "study",
            key: None,
        })
    }

    pub fn require_tags(&self) -> Result<&TagsConfig, QibError> {
        self.tags.as_ref().ok_or(QibError::ConfigurationMissing {
            section: "tags",
            key: None,
        })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(sources: &ConfigSources) -> Result<ResolvedConfig, QibError> {
        if sources.is_empty() {
            return Err(QibError::NoConfiguration);
        }

        let mut merged = match &sources.all {
            Some(path) => Self::read(path)?,
            None => Config::default(),
        };
        if let Some(path) = &sources.connection {
            if let Some(section) = Self::read(path)?.connection {
                merged.connection = Some(section);
            }
        }
        if let Some(path) = &sources.params {
            if let Some(section) = Self::read(path)?.study {
                merged.study = Some(section);
            }
        }
        if let Some(path) = &sources.tags {
            if let Some(section) = Self::read(path)?.tags {
                merged.tags = Some(section);
            }
        }

        let password_override = std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::resolve_config(merged, password_override)
    }

    pub fn read(path: &Path) -> Result<Config, QibError> {
        let content =
            fs::read_to_string(path).map_err(|_| QibError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| QibError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        password_override: Option<String>,
    ) -> Result<ResolvedConfig, QibError> {
        let connection = config
            .connection
            .map(|section| {
                Ok::<_, QibError>(ConnectionConfig {
                    url: required("connection", "url", section.url)?
                        .trim_end_matches('/')
                        .to_string(),
                    user: required("connection", "user", section.user)?,
                    password: match password_override {
                        Some(password) => password,
                        None => required("connection", "password", section.password)?,
                    },
                    project: required("connection", "project", section.project)?,
                    patient_map_file: section
                        .patient_map_file
                        .filter(|path| !path.trim().is_empty())
                        .map(PathBuf::from),
                })
            })
            .transpose()?;

        let study = config
            .study
            .map(|section| {
                Ok::<_, QibError>(StudyConfig {
                    study_id: required("study", "study_id", section.study_id)?,
                    security_required: required(
                        "study",
                        "security_required",
                        section.security_required,
                    )?,
                    top_node: required("study", "top_node", section.top_node)?,
                    output_base_path: PathBuf::from(required(
                        "study",
                        "output_base_path",
                        section.output_base_path,
                    )?),
                })
            })
            .transpose()?;

        let tags = config.tags.map(|section| TagsConfig {
            tag_list: section.taglist.into_list(),
        });

        Ok(ResolvedConfig {
            connection,
            study,
            tags,
        })
    }
}

fn required(
    section: &'static str,
    key: &'static str,
    value: Option<String>,
) -> Result<String, QibError> {
    value.ok_or(QibError::ConfigurationMissing {
        section,
        key: Some(key),
    })
}
