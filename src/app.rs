use std::io::Write;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ResolvedConfig, StudyConfig, TagsConfig};
use crate::domain::{BiomarkerPath, ExperimentLabel, ScanContext};
use crate::error::QibError;
use crate::layout::{StagedFile, StudyLayout};
use crate::ledger::{ChangeLedger, LedgerSummary};
use crate::patient_map::PatientMap;
use crate::tabulate::{Extraction, RenderedRow, Tabulator, column_map_header, render};
use crate::tagger::MetadataTagger;
use crate::xnat::{ExperimentRef, RepositoryClient, XnatHttpClient};

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Ledger location; defaults to `QIBSubjects.log` in the study directory.
    pub ledger_path: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub study_id: String,
    pub output_dir: String,
    pub subjects: usize,
    pub columns: usize,
    pub tag_lines: usize,
    pub ledger_path: String,
    pub ledger: LedgerSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    Written(ExportSummary),
    NoDataFound { study_id: String },
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: RepositoryClient> {
    client: C,
    project: String,
    patient_map: PatientMap,
}

impl<C: RepositoryClient> App<C> {
    pub fn new(client: C, project: impl Into<String>, patient_map: PatientMap) -> Self {
        Self {
            client,
            project: project.into(),
            patient_map,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Walks every subject's QIB experiments, streaming tags into `tagger`.
    pub fn extract<W: Write>(
        &self,
        tagger: &mut MetadataTagger<W>,
        sink: &dyn ProgressSink,
    ) -> Result<Extraction, QibError> {
        let mut tabulator = Tabulator::new();
        let subjects = self.client.subjects()?;
        sink.event(ProgressEvent {
            message: format!("phase=Extract; {} subjects", subjects.len()),
            elapsed: None,
        });

        for subject in &subjects {
            let experiments = self.client.experiments(subject)?;
            let subject_id = self.patient_map.resolve(&subject.label).to_string();
            for experiment in experiments
                .iter()
                .filter(|experiment| ExperimentLabel::is_qib(&experiment.label))
                .filter(|experiment| experiment.project == self.project)
            {
                debug!(subject = %subject.label, experiment = %experiment.label, "reading QIB session");
                let session = self.client.qib_session(experiment)?;
                let prefix = tagger.tag_prefix(&session).map_err(fs_err)?;
                let scan = self.scan_context(experiment, &experiments)?;
                tabulator.record_subject(&subject_id);

                for category in &session.categories {
                    for biomarker in &category.biomarkers {
                        let path = BiomarkerPath {
                            tool_prefix: &prefix,
                            category: &category.name,
                            scan: &scan,
                            biomarker: &biomarker.name,
                        };
                        let accumulated = tabulator.accumulate(&subject_id, &path, &biomarker.value);
                        if accumulated.new_column {
                            tagger
                                .tag_ontology(&accumulated.key, biomarker, &session)
                                .map_err(fs_err)?;
                        }
                    }
                }
            }
            tabulator.finish_subject();
        }

        Ok(tabulator.finish())
    }

    /// Laterality and timepoint from the sibling scan session when it exists
    /// and records both; otherwise from the QIB label's own tokens.
    fn scan_context(
        &self,
        experiment: &ExperimentRef,
        siblings: &[ExperimentRef],
    ) -> Result<ScanContext, QibError> {
        let label = ExperimentLabel::parse(&experiment.label);
        let reference = label
            .reference_label()
            .and_then(|wanted| siblings.iter().find(|sibling| sibling.label == wanted));
        if let Some(reference) = reference {
            let fields = self.client.reference_fields(reference)?;
            if let (Some(laterality), Some(timepoint)) = (&fields.laterality, &fields.timepoint) {
                return Ok(ScanContext::from_reference(laterality, timepoint));
            }
            debug!(reference = %reference.label, "reference session lacks laterality/timepoint");
        }
        Ok(ScanContext::from_label(&label))
    }

    /// Writes the complete study export and records the rendered rows in the ledger.
    pub fn export(
        &self,
        study: &StudyConfig,
        tags: &TagsConfig,
        options: &ExportOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ExportOutcome, QibError> {
        let start = Instant::now();
        let layout = StudyLayout::new(study)?;
        sink.event(ProgressEvent {
            message: format!("phase=Prepare; creating {}", layout.root()),
            elapsed: None,
        });
        layout.ensure_dirs()?;
        let params = layout.stage_params(study)?;

        let tag_file = StagedFile::create(&layout.tags_path())?;
        let mut tagger = MetadataTagger::new(tag_file, tags.tag_list.clone());
        tagger.write_header().map_err(fs_err)?;

        let extraction = self.extract(&mut tagger, sink)?;
        let tag_lines = tagger.lines_written();
        let tag_file = tagger.into_inner();
        info!("data obtained from XNAT");

        let mut data_file = StagedFile::create(&layout.data_path())?;
        let mut column_map = StagedFile::create(&layout.column_map_path())?;
        column_map
            .write_all(column_map_header().as_bytes())
            .map_err(fs_err)?;

        // A run without data still replaces the previous data file and column map.
        let table = match extraction {
            Extraction::Table(table) => Some(table),
            Extraction::NoDataFound => None,
        };
        let rows = match &table {
            Some(table) => {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Write; {} rows x {} columns",
                        table.rows.len(),
                        table.header.len()
                    ),
                    elapsed: None,
                });
                render(
                    table,
                    &layout.data_file_name(),
                    &mut data_file,
                    &mut column_map,
                )
                .map_err(fs_err)?
            }
            None => Vec::new(),
        };

        for staged in params
            .into_iter()
            .chain([tag_file, data_file, column_map])
        {
            staged.commit()?;
        }
        info!("data written to files");

        let Some(table) = table else {
            warn!("no QIB datatypes found");
            return Ok(ExportOutcome::NoDataFound {
                study_id: study.study_id.clone(),
            });
        };

        let ledger = ChangeLedger::new(
            options
                .ledger_path
                .clone()
                .unwrap_or_else(|| layout.ledger_path()),
        );
        sink.event(ProgressEvent {
            message: format!("phase=Ledger; checking {}", ledger.path()),
            elapsed: None,
        });
        let ledger_summary = ledger.record_all(rows.iter().map(RenderedRow::text))?;

        sink.event(ProgressEvent {
            message: "phase=Done".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(ExportOutcome::Written(ExportSummary {
            study_id: study.study_id.clone(),
            output_dir: layout.root().to_string(),
            subjects: table.rows.len(),
            columns: table.header.len(),
            tag_lines,
            ledger_path: ledger.path().to_string(),
            ledger: ledger_summary,
        }))
    }
}

/// Full standalone run: connect, export, disconnect.
pub fn run(
    config: &ResolvedConfig,
    options: &ExportOptions,
    sink: &dyn ProgressSink,
) -> Result<ExportOutcome, QibError> {
    let connection = config.require_connection()?;
    let study = config.require_study()?;
    let tags = config.require_tags()?;

    sink.event(ProgressEvent {
        message: format!("phase=Connect; {}", connection.url),
        elapsed: None,
    });
    let client = XnatHttpClient::connect(connection)?;

    let patient_map = match &connection.patient_map_file {
        Some(path) => {
            sink.event(ProgressEvent {
                message: format!("phase=Prepare; loading patient map {}", path.display()),
                elapsed: None,
            });
            PatientMap::load(path)?
        }
        None => PatientMap::default(),
    };

    let app = App::new(client, connection.project.clone(), patient_map);
    let outcome = app.export(study, tags, options, sink);
    app.client().disconnect();
    outcome
}

fn fs_err(err: std::io::Error) -> QibError {
    QibError::Filesystem(err.to_string())
}
