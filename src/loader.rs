//! CSV and zipped-CSV ingestion, plus seeded uniform row sampling.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::frame::{Column, Frame, FrameError};

/// Cell contents read as a missing value.
pub const MISSING_TOKENS: [&str; 6] = ["", "NA", "NaN", "nan", "null", "N/A"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive at {path} has no entries")]
    EmptyZipArchive { path: PathBuf },
    #[error("archive at {path} has no CSV entry")]
    MissingCsvEntry { path: PathBuf },
    #[error("no {stem}.csv or {stem}.zip under {dir}")]
    MissingInput { stem: String, dir: PathBuf },
    #[error("header repeats column '{0}'")]
    DuplicateColumn(String),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("sampling fraction must be in (0, 1], got {0}")]
    InvalidSampling(f64),
}

/// Resolves `<stem>.csv`, falling back to `<stem>.zip`.
pub fn locate_input(dir: &Path, stem: &str) -> Option<PathBuf> {
    ["csv", "zip"]
        .into_iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|path| path.is_file())
}

pub fn load_table(dir: &Path, stem: &str) -> Result<Frame, LoadError> {
    load_optional_table(dir, stem)?.ok_or_else(|| LoadError::MissingInput {
        stem: stem.to_string(),
        dir: dir.to_path_buf(),
    })
}

/// Like [`load_table`], but an absent input is `Ok(None)`.
pub fn load_optional_table(dir: &Path, stem: &str) -> Result<Option<Frame>, LoadError> {
    let Some(path) = locate_input(dir, stem) else {
        debug!(
            component = "loader",
            event = "table.absent",
            stem,
            dir = %dir.display()
        );
        return Ok(None);
    };

    let is_zip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    let frame = if is_zip {
        read_zip_frame(&path)?
    } else {
        read_csv_frame(fs::File::open(&path)?)?
    };

    info!(
        component = "loader",
        event = "table.loaded",
        stem,
        path = %path.display(),
        rows = frame.len(),
        columns = frame.width()
    );
    Ok(Some(frame))
}

/// Reads the first CSV entry of a zip archive.
pub fn read_zip_frame(path: &Path) -> Result<Frame, LoadError> {
    let file = fs::File::open(path)?;
    let mut zip = ZipArchive::new(file)?;
    if zip.is_empty() {
        return Err(LoadError::EmptyZipArchive {
            path: path.to_path_buf(),
        });
    }

    let mut csv_buf = None;
    for idx in 0..zip.len() {
        let mut entry = zip.by_index(idx)?;
        if entry.is_dir() {
            continue;
        }
        if !entry.name().to_ascii_lowercase().ends_with(".csv") {
            continue;
        }

        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        csv_buf = Some(buf);
        break;
    }
    let csv_buf = csv_buf.ok_or_else(|| LoadError::MissingCsvEntry {
        path: path.to_path_buf(),
    })?;

    read_csv_frame(Cursor::new(csv_buf))
}

/// Parses a headed CSV into a frame. A column is numeric when every
/// non-missing cell parses as `f64`; otherwise it is text.
pub fn read_csv_frame<R: Read>(reader: R) -> Result<Frame, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    for (idx, name) in headers.iter().enumerate() {
        if headers[..idx].contains(name) {
            return Err(LoadError::DuplicateColumn(name.clone()));
        }
    }

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (column, raw) in cells.iter_mut().zip(record.iter()) {
            column.push(parse_cell(raw));
        }
    }

    let rows = cells.first().map(Vec::len).unwrap_or(0);
    let mut frame = Frame::new(rows);
    for (name, values) in headers.into_iter().zip(cells) {
        frame.set_column(name, infer_column(values))?;
    }
    Ok(frame)
}

fn parse_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if MISSING_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn infer_column(values: Vec<Option<String>>) -> Column {
    let parsed: Option<Vec<Option<f64>>> = values
        .iter()
        .map(|cell| match cell {
            Some(raw) => raw.parse::<f64>().ok().map(Some),
            None => Some(None),
        })
        .collect();
    match parsed {
        Some(numbers) => Column::Numeric(numbers),
        None => Column::Text(values),
    }
}

/// Keeps `round(fraction * rows)` rows chosen uniformly without replacement,
/// in their original order. The same seed always keeps the same rows.
pub fn sample_rows(frame: Frame, fraction: f64, seed: u64) -> Result<Frame, LoadError> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(LoadError::InvalidSampling(fraction));
    }
    let rows = frame.len();
    let keep = ((fraction * rows as f64).round() as usize).min(rows);
    if keep == rows {
        return Ok(frame);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, rows, keep).into_vec();
    picked.sort_unstable();

    debug!(
        component = "loader",
        event = "table.sampled",
        rows,
        kept = keep,
        seed
    );
    Ok(frame.take(&picked))
}
