use std::fmt;

use serde::Serialize;

/// Header key of the subject identifier column.
pub const SUBJECT_KEY: &str = "subject";

/// Separator between concept path segments.
pub const CONCEPT_SEPARATOR: char = '\\';

/// Prefix used when a session carries no analysis tool metadata.
pub const GENERIC_TOOL: &str = "Generic Tool";

/// Hierarchical column identifier, e.g. `Tool 1.0\Cartilage T0\Left\Femoral volume`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConceptKey(String);

impl ConceptKey {
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::new();
        for (i, segment) in segments.into_iter().enumerate() {
            if i > 0 {
                key.push(CONCEPT_SEPARATOR);
            }
            key.push_str(segment.as_ref());
        }
        Self(key)
    }

    pub fn subject() -> Self {
        Self(SUBJECT_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_subject(&self) -> bool {
        self.0 == SUBJECT_KEY
    }

    /// Everything before the last separator; empty for single-segment keys.
    pub fn parent(&self) -> &str {
        self.0
            .rsplit_once(CONCEPT_SEPARATOR)
            .map(|(parent, _)| parent)
            .unwrap_or("")
    }

    pub fn leaf(&self) -> &str {
        self.0
            .rsplit_once(CONCEPT_SEPARATOR)
            .map(|(_, leaf)| leaf)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ConceptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConceptKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Normalizes a laterality token: `l`/`r` in any case become `Left`/`Right`,
/// anything else is kept as given.
pub fn normalize_laterality(token: &str) -> String {
    match token.to_ascii_lowercase().as_str() {
        "l" => "Left".to_string(),
        "r" => "Right".to_string(),
        _ => token.to_string(),
    }
}

/// Positional tokens of a QIB experiment label such as `QIB_SUBJ01_L_T0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLabel {
    tokens: Vec<String>,
}

impl ExperimentLabel {
    pub fn parse(label: &str) -> Self {
        Self {
            tokens: label.split('_').map(str::to_string).collect(),
        }
    }

    pub fn is_qib(label: &str) -> bool {
        label.to_lowercase().contains("qib")
    }

    /// Label of the sibling scan session this QIB result was derived from.
    pub fn reference_label(&self) -> Option<String> {
        (self.tokens.len() > 1).then(|| self.tokens[1..].join("_"))
    }

    pub fn laterality(&self) -> Option<&str> {
        self.token(2)
    }

    pub fn timepoint(&self) -> Option<&str> {
        self.token(3)
    }

    fn token(&self, index: usize) -> Option<&str> {
        self.tokens
            .get(index)
            .map(String::as_str)
            .filter(|token| !token.is_empty())
    }
}

/// Laterality and timepoint that qualify every biomarker of one QIB session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanContext {
    pub laterality: Option<String>,
    pub timepoint: Option<String>,
}

impl ScanContext {
    pub fn from_label(label: &ExperimentLabel) -> Self {
        Self {
            laterality: label.laterality().map(normalize_laterality),
            timepoint: label.timepoint().map(str::to_string),
        }
    }

    pub fn from_reference(laterality: &str, timepoint: &str) -> Self {
        Self {
            laterality: Some(normalize_laterality(laterality)),
            timepoint: Some(timepoint.to_string()),
        }
    }
}

/// The parts a concept key is assembled from.
#[derive(Debug, Clone, Copy)]
pub struct BiomarkerPath<'a> {
    pub tool_prefix: &'a str,
    pub category: &'a str,
    pub scan: &'a ScanContext,
    pub biomarker: &'a str,
}

impl BiomarkerPath<'_> {
    pub fn concept_key(&self) -> ConceptKey {
        let category = match &self.scan.timepoint {
            Some(timepoint) => format!("{} {timepoint}", self.category),
            None => self.category.to_string(),
        };
        let mut segments = vec![self.tool_prefix.to_string(), category];
        if let Some(laterality) = &self.scan.laterality {
            segments.push(laterality.clone());
        }
        segments.push(self.biomarker.to_string());
        ConceptKey::from_segments(segments)
    }
}
