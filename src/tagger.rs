use std::collections::HashSet;
use std::io::{self, Write};

use tracing::info;

use crate::domain::{ConceptKey, GENERIC_TOOL};
use crate::xnat::{Biomarker, QibSession, SessionAttributes};

pub const TAG_HEADER: [&str; 4] = ["Concept Path", "Title", "Description", "Weight"];

const ONTOLOGY_WEIGHT: &str = "1";
const ACCESSION_WEIGHT: &str = "2";

/// Writes tag lines to `sink`, never writing the same line twice.
pub struct MetadataTagger<W: Write> {
    sink: W,
    tag_list: Vec<String>,
    seen: HashSet<String>,
}

impl<W: Write> MetadataTagger<W> {
    pub fn new(sink: W, tag_list: Vec<String>) -> Self {
        Self {
            sink,
            tag_list,
            seen: HashSet::new(),
        }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        self.sink.write_all(TAG_HEADER.join("\t").as_bytes())?;
        self.sink.write_all(b"\n")
    }

    /// Returns the concept key prefix for `session` and emits one tag per
    /// configured attribute the session carries. Weights count down from the
    /// tag list length.
    pub fn tag_prefix(&mut self, session: &dyn SessionAttributes) -> io::Result<String> {
        let prefix = concept_prefix(session);
        let mut weight = self.tag_list.len();
        for tag in &self.tag_list {
            let Some(value) = session.try_get_attribute(tag) else {
                info!("{tag} not found for {prefix}");
                continue;
            };
            let line = format!("{prefix}\t{}\t{value}\t{weight}\n", tag.replace('_', " "));
            weight = weight.saturating_sub(1);
            emit(&mut self.sink, &mut self.seen, line)?;
        }
        Ok(prefix)
    }

    /// Ontology name/IRI tags for a newly seen concept key, plus the accession
    /// identifier of the session's first base session.
    pub fn tag_ontology(
        &mut self,
        key: &ConceptKey,
        biomarker: &Biomarker,
        session: &QibSession,
    ) -> io::Result<()> {
        let labelled = [
            ("Ontology name", biomarker.ontology_name.as_deref()),
            ("Ontology IRI", biomarker.ontology_iri.as_deref()),
        ];
        for (label, value) in labelled {
            match value {
                Some(value) => {
                    let line = format!("{key}\t{label}\t{value}\t{ONTOLOGY_WEIGHT}\n");
                    emit(&mut self.sink, &mut self.seen, line)?;
                }
                None => info!("{label} not found for {key}"),
            }
        }

        if let Some(accession) = session
            .base_sessions
            .first()
            .and_then(|base| base.accession_identifier.as_deref())
        {
            let line = format!("{key}\taccession identifier\t{accession}\t{ACCESSION_WEIGHT}\n");
            emit(&mut self.sink, &mut self.seen, line)?;
        }
        Ok(())
    }

    pub fn lines_written(&self) -> usize {
        self.seen.len()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// `"<tool> <version>"`, `"<tool>"`, or the generic fallback.
pub fn concept_prefix(session: &dyn SessionAttributes) -> String {
    match (
        session.try_get_attribute("analysis_tool"),
        session.try_get_attribute("analysis_tool_version"),
    ) {
        (Some(tool), Some(version)) => format!("{tool} {version}"),
        (Some(tool), None) => tool,
        _ => GENERIC_TOOL.to_string(),
    }
}

fn emit<W: Write>(sink: &mut W, seen: &mut HashSet<String>, line: String) -> io::Result<()> {
    if seen.contains(&line) {
        return Ok(());
    }
    sink.write_all(line.as_bytes())?;
    seen.insert(line);
    Ok(())
}
