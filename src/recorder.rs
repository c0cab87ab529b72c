use chrono::{DateTime, Local};
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
    time::Instant,
};

use crate::error::RecordError;
use crate::grid::Frame;

/// `<dir>/<name>[_YYYY-MM-DD_HH-MM-SS].csv`
pub fn recording_path(dir: &Path, name: &str, append_datetime: bool, now: DateTime<Local>) -> PathBuf {
    let name = match name.trim() {
        "" => "data",
        trimmed => trimmed,
    };
    let file_name = if append_datetime {
        format!("{}_{}.csv", name, now.format("%Y-%m-%d_%H-%M-%S"))
    } else {
        format!("{name}.csv")
    };
    dir.join(file_name)
}

fn generate_csv_header(cols: usize) -> Vec<String> {
    let mut header = vec!["frame".to_owned(), "elapsed_s".to_owned(), "row".to_owned()];
    header.extend((0..cols).map(|c| format!("c{c}")));
    header
}

/// Dumps frames to CSV, one record per grid row.
pub struct Recorder {
    writer: csv::Writer<File>,
    path: PathBuf,
    started: Instant,
    frames: u64,
}

impl Recorder {
    /// Starts a new recording. An existing file at `path` is never overwritten.
    pub fn create(path: &Path) -> Result<Self, RecordError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::AlreadyExists => RecordError::Exists {
                    path: path.to_owned(),
                },
                _ => RecordError::Io {
                    path: path.to_owned(),
                    source,
                },
            })?;
        let writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        tracing::info!(path = %path.display(), "recording started");
        Ok(Self {
            writer,
            path: path.to_owned(),
            started: Instant::now(),
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, frame: &Frame) -> Result<(), RecordError> {
        if self.frames == 0 {
            self.writer.write_record(generate_csv_header(frame.cols()))?;
        }
        let elapsed = format!("{:.3}", self.started.elapsed().as_secs_f64());
        let index = self.frames.to_string();
        for r in 0..frame.rows() {
            let mut record = vec![index.clone(), elapsed.clone(), r.to_string()];
            record.extend(frame.row(r).iter().map(u16::to_string));
            self.writer.write_record(&record)?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Flushes and closes the file, returning how many frames were written.
    pub fn finish(mut self) -> Result<u64, RecordError> {
        self.writer.flush().map_err(|source| RecordError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(path = %self.path.display(), frames = self.frames, "recording finished");
        Ok(self.frames)
    }
}
