use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ExportOutcome, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_outcome(outcome: &ExportOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable progress on stderr.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.2}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn print_summary(outcome: &ExportOutcome) {
    match outcome {
        ExportOutcome::Written(summary) => {
            println!("QIB export for study {}", summary.study_id);
            println!("  output:   {}", summary.output_dir);
            println!("  subjects: {}", summary.subjects);
            println!("  columns:  {}", summary.columns);
            println!("  tags:     {}", summary.tag_lines);
            println!(
                "  ledger:   {} new subject(s), {} with new info, {} unchanged ({})",
                summary.ledger.new_subjects,
                summary.ledger.new_info,
                summary.ledger.unchanged,
                summary.ledger_path
            );
        }
        ExportOutcome::NoDataFound { study_id } => {
            println!("No QIB datatypes found for study {study_id}.");
        }
    }
}
