use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::QibError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRef {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentRef {
    pub id: String,
    pub label: String,
    pub project: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Biomarker {
    pub name: String,
    pub value: String,
    pub ontology_name: Option<String>,
    pub ontology_iri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BiomarkerCategory {
    pub name: String,
    pub biomarkers: Vec<Biomarker>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseSession {
    pub accession_identifier: Option<String>,
}

/// A QIB result session: its scalar attributes plus the biomarker tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QibSession {
    pub label: String,
    pub attributes: BTreeMap<String, String>,
    pub categories: Vec<BiomarkerCategory>,
    pub base_sessions: Vec<BaseSession>,
}

/// Laterality and timepoint recorded on the scan session a QIB result derives from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceFields {
    pub laterality: Option<String>,
    pub timepoint: Option<String>,
}

/// Attribute lookup on a session; `None` for absent or empty attributes.
pub trait SessionAttributes {
    fn try_get_attribute(&self, name: &str) -> Option<String>;
}

impl SessionAttributes for QibSession {
    fn try_get_attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .get(name)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    }
}

pub trait RepositoryClient: Send + Sync {
    fn subjects(&self) -> Result<Vec<SubjectRef>, QibError>;
    fn experiments(&self, subject: &SubjectRef) -> Result<Vec<ExperimentRef>, QibError>;
    fn qib_session(&self, experiment: &ExperimentRef) -> Result<QibSession, QibError>;
    fn reference_fields(&self, experiment: &ExperimentRef) -> Result<ReferenceFields, QibError>;
}

#[derive(Clone)]
pub struct XnatHttpClient {
    client: Client,
    base_url: Url,
    user: String,
    password: String,
    project: String,
}

impl XnatHttpClient {
    /// Builds a client and checks that the credentials work and the project exists.
    pub fn connect(config: &ConnectionConfig) -> Result<Self, QibError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("qib2t/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| QibError::ConnectionFailure(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| QibError::ConnectionFailure(err.to_string()))?;

        let base_url = Url::parse(&config.url)
            .map_err(|err| QibError::ConnectionFailure(format!("{}: {err}", config.url)))?;
        if base_url.cannot_be_a_base() {
            return Err(QibError::ConnectionFailure(format!(
                "{} is not a valid XNAT base URL",
                config.url
            )));
        }
        let xnat = Self {
            client,
            base_url,
            user: config.user.clone(),
            password: config.password.clone(),
            project: config.project.clone(),
        };

        let url = xnat.json_endpoint(&["data", "projects", xnat.project.as_str()])?;
        let response = xnat
            .send_with_retries(|| xnat.get(&url))
            .map_err(|err| match err {
                QibError::XnatHttp(message) => QibError::ConnectionFailure(message),
                other => other,
            })?;
        match response.status() {
            status if status.is_success() => {
                info!(url = %xnat.base_url, project = %xnat.project, "connection established");
                Ok(xnat)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(QibError::ConnectionFailure(
                format!("credentials rejected for user {}", xnat.user),
            )),
            StatusCode::NOT_FOUND => Err(QibError::ProjectNotFound(xnat.project.clone())),
            _ => Err(Self::handle_status(response).err().unwrap_or_else(|| {
                QibError::ConnectionFailure("unexpected response".to_string())
            })),
        }
    }

    /// Ends the server-side session. Failures are only logged.
    pub fn disconnect(&self) {
        let url = match self.endpoint(&["data", "JSESSION"]) {
            Ok(url) => url,
            Err(err) => {
                debug!(error = %err, "failed to close xnat session");
                return;
            }
        };
        match self
            .client
            .delete(url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
        {
            Ok(_) => debug!("xnat session closed"),
            Err(err) => debug!(error = %err, "failed to close xnat session"),
        }
    }

    /// `base_url` with `segments` appended, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, QibError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                QibError::ConnectionFailure(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn json_endpoint(&self, segments: &[&str]) -> Result<Url, QibError> {
        let mut url = self.endpoint(segments)?;
        url.set_query(Some("format=json"));
        Ok(url)
    }

    fn get(&self, url: &Url) -> reqwest::blocking::RequestBuilder {
        self.client
            .get(url.clone())
            .basic_auth(&self.user, Some(&self.password))
    }

    fn get_json(&self, url: &Url) -> Result<Value, QibError> {
        let response = self.send_with_retries(|| self.get(url))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| QibError::XnatResponse(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, QibError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "XNAT request failed".to_string());
        Err(QibError::XnatStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, QibError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(QibError::XnatHttp(err.to_string()));
                }
            }
        }
    }
}

impl RepositoryClient for XnatHttpClient {
    fn subjects(&self) -> Result<Vec<SubjectRef>, QibError> {
        let url = self.json_endpoint(&["data", "projects", self.project.as_str(), "subjects"])?;
        let rows: Vec<ResultRow> = parse_result_set(self.get_json(&url)?)?;
        Ok(rows
            .into_iter()
            .map(|row| SubjectRef {
                id: row.id,
                label: row.label,
            })
            .collect())
    }

    fn experiments(&self, subject: &SubjectRef) -> Result<Vec<ExperimentRef>, QibError> {
        let url = self.json_endpoint(&[
            "data",
            "projects",
            self.project.as_str(),
            "subjects",
            subject.label.as_str(),
            "experiments",
        ])?;
        let rows: Vec<ResultRow> = parse_result_set(self.get_json(&url)?)?;
        Ok(rows
            .into_iter()
            .map(|row| ExperimentRef {
                id: row.id,
                label: row.label,
                project: row.project.unwrap_or_default(),
            })
            .collect())
    }

    fn qib_session(&self, experiment: &ExperimentRef) -> Result<QibSession, QibError> {
        let url = self.json_endpoint(&["data", "experiments", experiment.id.as_str()])?;
        parse_qib_session(&experiment.label, &self.get_json(&url)?)
    }

    fn reference_fields(&self, experiment: &ExperimentRef) -> Result<ReferenceFields, QibError> {
        let url = self.json_endpoint(&["data", "experiments", experiment.id.as_str()])?;
        let body = self.get_json(&url)?;
        let fields = first_item(&body)?
            .get("data_fields")
            .map(scalar_fields)
            .unwrap_or_default();
        Ok(ReferenceFields {
            laterality: non_empty(fields.get("laterality")),
            timepoint: non_empty(fields.get("timepoint")),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    #[serde(rename = "ID", default)]
    id: String,
    label: String,
    #[serde(default)]
    project: Option<String>,
}

fn parse_result_set<T: for<'de> Deserialize<'de>>(body: Value) -> Result<Vec<T>, QibError> {
    let rows = body
        .get("ResultSet")
        .and_then(|set| set.get("Result"))
        .cloned()
        .ok_or_else(|| QibError::XnatResponse("missing ResultSet.Result".to_string()))?;
    serde_json::from_value(rows).map_err(|err| QibError::XnatResponse(err.to_string()))
}

/// Parses the `?format=json` item tree of a QIB session.
pub fn parse_qib_session(label: &str, body: &Value) -> Result<QibSession, QibError> {
    let item = first_item(body)?;
    let attributes = item
        .get("data_fields")
        .map(scalar_fields)
        .unwrap_or_default();

    let mut categories = Vec::new();
    for category in child_items(item, "biomarker_categories") {
        let fields = category
            .get("data_fields")
            .map(scalar_fields)
            .unwrap_or_default();
        let biomarkers = child_items(category, "biomarkers")
            .map(|biomarker| {
                let fields = biomarker
                    .get("data_fields")
                    .map(scalar_fields)
                    .unwrap_or_default();
                Biomarker {
                    name: fields.get("name").cloned().unwrap_or_default(),
                    value: fields.get("value").cloned().unwrap_or_default(),
                    ontology_name: non_empty(fields.get("ontology_name")),
                    ontology_iri: non_empty(fields.get("ontology_iri")),
                }
            })
            .collect();
        categories.push(BiomarkerCategory {
            name: fields.get("name").cloned().unwrap_or_default(),
            biomarkers,
        });
    }

    let base_sessions = child_items(item, "base_sessions")
        .map(|session| {
            let fields = session
                .get("data_fields")
                .map(scalar_fields)
                .unwrap_or_default();
            BaseSession {
                accession_identifier: non_empty(fields.get("accession_identifier")),
            }
        })
        .collect();

    Ok(QibSession {
        label: label.to_string(),
        attributes,
        categories,
        base_sessions,
    })
}

fn first_item(body: &Value) -> Result<&Value, QibError> {
    body.get("items")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .ok_or_else(|| QibError::XnatResponse("response has no items".to_string()))
}

/// Items of every child collection whose field path starts with `field`.
fn child_items<'a>(item: &'a Value, field: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    item.get("children")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |child| {
            child
                .get("field")
                .and_then(Value::as_str)
                .map(|path| path.split('/').next() == Some(field))
                .unwrap_or(false)
        })
        .filter_map(|child| child.get("items").and_then(Value::as_array))
        .flatten()
}

fn scalar_fields(fields: &Value) -> BTreeMap<String, String> {
    fields
        .as_object()
        .into_iter()
        .flatten()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty()).cloned()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn result_set_rows_deserialize() {
        let body = json!({
            "ResultSet": {
                "Result": [
                    {"ID": "XNAT_E001", "label": "QIB_S1_L_T0", "project": "QIB"},
                    {"ID": "XNAT_E002", "label": "S1_L_T0"}
                ]
            }
        });
        let rows: Vec<ResultRow> = parse_result_set(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].project.as_deref(), Some("QIB"));
        assert_eq!(rows[1].project, None);
    }

    #[test]
    fn missing_attributes_are_absent() {
        let mut session = QibSession::default();
        session
            .attributes
            .insert("analysis_tool".to_string(), "Tool".to_string());
        session
            .attributes
            .insert("analysis_tool_version".to_string(), "  ".to_string());
        assert_eq!(
            session.try_get_attribute("analysis_tool").as_deref(),
            Some("Tool")
        );
        assert_eq!(session.try_get_attribute("analysis_tool_version"), None);
        assert_eq!(session.try_get_attribute("processing_date"), None);
    }

    fn client_at(base: &str) -> XnatHttpClient {
        XnatHttpClient {
            client: Client::new(),
            base_url: Url::parse(base).unwrap(),
            user: "admin".to_string(),
            password: "admin".to_string(),
            project: "QIB DEMO".to_string(),
        }
    }

    #[test]
    fn endpoint_segments_are_percent_encoded() {
        let xnat = client_at("https://xnat.example.org/xnat");
        let url = xnat
            .json_endpoint(&[
                "data",
                "projects",
                xnat.project.as_str(),
                "subjects",
                "S 1#a?b/c",
                "experiments",
            ])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://xnat.example.org/xnat/data/projects/QIB%20DEMO/subjects/S%201%23a%3Fb%2Fc/experiments?format=json"
        );
    }

    #[test]
    fn endpoint_on_bare_host() {
        let xnat = client_at("https://xnat.example.org");
        let url = xnat.endpoint(&["data", "JSESSION"]).unwrap();
        assert_eq!(url.as_str(), "https://xnat.example.org/data/JSESSION");
    }
}
