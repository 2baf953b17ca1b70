use std::fs;
use std::io::{self, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::config::StudyConfig;
use crate::error::QibError;
use crate::ledger::LEDGER_FILE_NAME;

pub const TAGS_FILE_NAME: &str = "tags.txt";
pub const TAGS_PARAMS: &str = "TAGS_FILE=tags.txt";

#[derive(Debug, Clone)]
pub struct StudyLayout {
    root: Utf8PathBuf,
    study_id: String,
}

impl StudyLayout {
    /// `<output_base_path>/<study_id>`.
    pub fn new(study: &StudyConfig) -> Result<Self, QibError> {
        let root = Utf8PathBuf::from_path_buf(study.output_base_path.join(&study.study_id))
            .map_err(|_| QibError::Filesystem("invalid output path".to_string()))?;
        Ok(Self::new_with_root(root, &study.study_id))
    }

    pub fn new_with_root(root: Utf8PathBuf, study_id: &str) -> Self {
        Self {
            root,
            study_id: study_id.to_string(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn tags_dir(&self) -> Utf8PathBuf {
        self.root.join("tags")
    }

    pub fn clinical_dir(&self) -> Utf8PathBuf {
        self.root.join("clinical")
    }

    pub fn study_params_path(&self) -> Utf8PathBuf {
        self.root.join("study.params")
    }

    pub fn tags_params_path(&self) -> Utf8PathBuf {
        self.tags_dir().join("tags.params")
    }

    pub fn clinical_params_path(&self) -> Utf8PathBuf {
        self.clinical_dir().join("clinical.params")
    }

    pub fn tags_path(&self) -> Utf8PathBuf {
        self.tags_dir().join(TAGS_FILE_NAME)
    }

    pub fn data_file_name(&self) -> String {
        format!("{}_clinical.txt", self.study_id)
    }

    pub fn column_map_file_name(&self) -> String {
        format!("{}_columns.txt", self.study_id)
    }

    pub fn data_path(&self) -> Utf8PathBuf {
        self.clinical_dir().join(self.data_file_name())
    }

    pub fn column_map_path(&self) -> Utf8PathBuf {
        self.clinical_dir().join(self.column_map_file_name())
    }

    pub fn ledger_path(&self) -> Utf8PathBuf {
        self.root.join(LEDGER_FILE_NAME)
    }

    pub fn ensure_dirs(&self) -> Result<(), QibError> {
        for dir in [self.tags_dir(), self.clinical_dir()] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| QibError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    /// Stages the three params files. Nothing is visible until each is committed.
    pub fn stage_params(&self, study: &StudyConfig) -> Result<Vec<StagedFile>, QibError> {
        let column_map_params = format!("COLUMN_MAP_FILE={}", self.column_map_file_name());
        let files = [
            (self.study_params_path(), study_params(study)),
            (self.tags_params_path(), TAGS_PARAMS.to_string()),
            (self.clinical_params_path(), column_map_params),
        ];
        let mut staged = Vec::with_capacity(files.len());
        for (path, content) in files {
            let mut file = StagedFile::create(&path)?;
            file.write_all(content.as_bytes())
                .map_err(|err| QibError::Filesystem(format!("write {path}: {err}")))?;
            staged.push(file);
        }
        Ok(staged)
    }
}

pub fn study_params(study: &StudyConfig) -> String {
    format!(
        "STUDY_ID={}\nSECURITY_REQUIRED={}\nTOP_NODE={}",
        study.study_id, study.security_required, study.top_node
    )
}

/// Buffered writer over a temporary file next to `dest`. Nothing appears at
/// `dest` until [`StagedFile::commit`]; dropping it discards the content.
pub struct StagedFile {
    writer: BufWriter<NamedTempFile>,
    dest: Utf8PathBuf,
}

impl StagedFile {
    pub fn create(dest: &Utf8Path) -> Result<Self, QibError> {
        let parent = dest
            .parent()
            .ok_or_else(|| QibError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| QibError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("qib2t-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| QibError::Filesystem(err.to_string()))?;
        Ok(Self {
            writer: BufWriter::new(temp),
            dest: dest.to_path_buf(),
        })
    }

    pub fn commit(self) -> Result<(), QibError> {
        let temp = self
            .writer
            .into_inner()
            .map_err(|err| QibError::Filesystem(err.error().to_string()))?;
        temp.persist(self.dest.as_std_path())
            .map_err(|err| QibError::Filesystem(format!("persist {}: {}", self.dest, err.error)))?;
        Ok(())
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
