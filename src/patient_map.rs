use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::QibError;

/// XNAT subject label → warehouse patient identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientMap {
    entries: HashMap<String, String>,
}

impl PatientMap {
    /// Reads a headerless `xnat_label<TAB>patient_id` file.
    pub fn load(path: &Path) -> Result<Self, QibError> {
        let map_err = |message: String| QibError::PatientMap {
            path: path.to_path_buf(),
            message,
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|err| map_err(err.to_string()))?;

        let mut entries = HashMap::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.map_err(|err| map_err(err.to_string()))?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            match (record.get(0), record.get(1)) {
                (Some(label), Some(patient)) => {
                    entries.insert(label.to_string(), patient.to_string());
                }
                _ => return Err(map_err(format!("line {} has fewer than 2 fields", idx + 1))),
            }
        }
        Ok(Self { entries })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Mapped identifier, or the XNAT label itself when unmapped.
    pub fn resolve<'a>(&'a self, label: &'a str) -> &'a str {
        match self.entries.get(label) {
            Some(patient) => patient,
            None => {
                debug!(subject = label, "no patient mapping; using XNAT label");
                label
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
