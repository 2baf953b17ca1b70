use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use crate::domain::{BiomarkerPath, ConceptKey, SUBJECT_KEY};

pub const FIELD_DELIMITER: char = '\t';
pub const RECORD_TERMINATOR: char = '\n';
pub const COLUMN_MAP_HEADER: [&str; 4] = ["Filename", "Category Code", "Column Number", "Data Label"];
pub const SUBJECT_DATA_LABEL: &str = "SUBJ_ID";

/// Insertion-ordered set of column keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    keys: Vec<ConceptKey>,
    seen: HashSet<ConceptKey>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `key` unless already present. Returns `true` when appended.
    pub fn push(&mut self, key: &ConceptKey) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.keys.push(key.clone());
        true
    }

    pub fn keys(&self) -> &[ConceptKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Sparse values of one subject keyed by column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectRow {
    values: HashMap<ConceptKey, String>,
}

impl SubjectRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ConceptKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: &ConceptKey) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.values
            .get(&ConceptKey::subject())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Outcome of one [`Tabulator::accumulate`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulated {
    pub key: ConceptKey,
    /// `true` the first time this key is seen in the run.
    pub new_column: bool,
}

/// Header and rows collected over a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: HeaderList,
    pub rows: Vec<SubjectRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Table(Table),
    NoDataFound,
}

/// Builds the run-wide header and one row per subject.
#[derive(Debug, Default)]
pub struct Tabulator {
    header: HeaderList,
    rows: Vec<SubjectRow>,
    current: SubjectRow,
}

impl Tabulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the current row as belonging to `subject_id`.
    pub fn record_subject(&mut self, subject_id: &str) {
        let key = ConceptKey::subject();
        self.header.push(&key);
        self.current.insert(key, subject_id);
    }

    pub fn accumulate(
        &mut self,
        subject_id: &str,
        path: &BiomarkerPath<'_>,
        value: &str,
    ) -> Accumulated {
        self.insert(subject_id, path.concept_key(), value)
    }

    pub fn insert(&mut self, subject_id: &str, key: ConceptKey, value: &str) -> Accumulated {
        self.record_subject(subject_id);
        let new_column = self.header.push(&key);
        self.current.insert(key.clone(), value);
        Accumulated { key, new_column }
    }

    /// Closes the current subject; an empty row is discarded.
    pub fn finish_subject(&mut self) {
        let row = std::mem::take(&mut self.current);
        if !row.is_empty() {
            self.rows.push(row);
        }
    }

    pub fn header(&self) -> &HeaderList {
        &self.header
    }

    pub fn finish(mut self) -> Extraction {
        self.finish_subject();
        if self.rows.is_empty() {
            return Extraction::NoDataFound;
        }
        Extraction::Table(Table {
            header: self.header,
            rows: self.rows,
        })
    }
}

/// One rendered data line, kept as cells so the subject cell stays addressable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    cells: Vec<String>,
}

impl RenderedRow {
    /// The subject cell including its trailing delimiter.
    pub fn first_cell(&self) -> &str {
        self.cells.first().map(String::as_str).unwrap_or("")
    }

    pub fn text(&self) -> String {
        self.cells.concat()
    }

    pub fn field_count(&self) -> usize {
        self.cells.len()
    }
}

/// Renders a single row against `header`.
pub fn render_row(row: &SubjectRow, header: &HeaderList) -> RenderedRow {
    let mut cells = vec![FIELD_DELIMITER.to_string(); header.len()];
    for (index, key) in header.keys().iter().enumerate() {
        if let Some(value) = row.get(key) {
            cells[index] = format!("{value}{FIELD_DELIMITER}");
        }
    }
    if let Some(last) = cells.last_mut() {
        last.pop();
        last.push(RECORD_TERMINATOR);
    }
    RenderedRow { cells }
}

/// Writes the header line and rows of the data file, and one column map line
/// per column. The column map header is left to the caller.
pub fn render<D: Write, C: Write>(
    table: &Table,
    data_file_name: &str,
    data_sink: &mut D,
    column_map_sink: &mut C,
) -> io::Result<Vec<RenderedRow>> {
    let header_line = table
        .header
        .keys()
        .iter()
        .map(ConceptKey::as_str)
        .collect::<Vec<_>>()
        .join(FIELD_DELIMITER.to_string().as_str());
    write!(data_sink, "{header_line}{RECORD_TERMINATOR}")?;

    let mut mapped: HashSet<&ConceptKey> = HashSet::new();
    let mut rendered = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        for (index, key) in table.header.keys().iter().enumerate() {
            if row.get(key).is_none() || !mapped.insert(key) {
                continue;
            }
            column_map_sink.write_all(column_map_line(data_file_name, key, index).as_bytes())?;
        }
        let line = render_row(row, &table.header);
        data_sink.write_all(line.text().as_bytes())?;
        rendered.push(line);
    }
    Ok(rendered)
}

pub fn column_map_header() -> String {
    format!("{}\n", COLUMN_MAP_HEADER.join("\t"))
}

fn column_map_line(data_file_name: &str, key: &ConceptKey, index: usize) -> String {
    let column = index + 1;
    if key.is_subject() {
        format!("{data_file_name}\t{SUBJECT_KEY}\t{column}\t{SUBJECT_DATA_LABEL}\n")
    } else {
        format!(
            "{data_file_name}\t{}\t{column}\t{}\n",
            key.parent(),
            key.leaf()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keeps_first_seen_order() {
        let mut header = HeaderList::new();
        assert!(header.push(&"b".into()));
        assert!(header.push(&"a".into()));
        assert!(!header.push(&"b".into()));
        assert_eq!(header.len(), 2);
        let keys: Vec<_> = header.keys().iter().map(ConceptKey::as_str).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn row_without_values_is_all_delimiters() {
        let mut header = HeaderList::new();
        header.push(&ConceptKey::subject());
        header.push(&"x".into());
        header.push(&"y".into());
        let rendered = render_row(&SubjectRow::new(), &header);
        assert_eq!(rendered.text(), "\t\t\n");
        assert_eq!(rendered.field_count(), 3);
    }

    #[test]
    fn subject_without_experiments_is_dropped() {
        let mut tabulator = Tabulator::new();
        tabulator.finish_subject();
        tabulator.record_subject("S1");
        tabulator.finish_subject();
        tabulator.finish_subject();
        match tabulator.finish() {
            Extraction::Table(table) => {
                assert_eq!(table.rows.len(), 1);
                assert_eq!(table.rows[0].subject(), Some("S1"));
            }
            Extraction::NoDataFound => panic!("expected a table"),
        }
    }

    #[test]
    fn empty_run_reports_no_data() {
        let mut tabulator = Tabulator::new();
        tabulator.finish_subject();
        assert_eq!(tabulator.finish(), Extraction::NoDataFound);
    }
}
