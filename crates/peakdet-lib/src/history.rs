//! Persistence of edited records so a later run can resume where the operator
//! left off.

use crate::editor::{replay, EditOp};
use crate::error::{PhysioError, PhysioResult};
use crate::signal::{PhysioRecord, ProcessingStep};
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    fs: f64,
    checksum: String,
    samples: Vec<f64>,
    detected: Vec<usize>,
    peaks: Vec<usize>,
    rejected: Vec<usize>,
    history: Vec<EditOp>,
    provenance: Vec<ProcessingStep>,
}

/// BLAKE3 over the little-endian sample bit patterns, hex encoded.
pub fn samples_checksum(samples: &[f64]) -> String {
    let mut hasher = Hasher::new();
    for sample in samples {
        hasher.update(&sample.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Hidden sidecar next to the input: `.<name>.json` or `.<name>.<channel>.json`.
pub fn history_path_for(input: &Path, channel: Option<&str>) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = match channel {
        Some(ch) => format!(".{name}.{ch}.json"),
        None => format!(".{name}.json"),
    };
    input.with_file_name(file)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PhysioError + '_ {
    move |source| PhysioError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> PhysioError {
    PhysioError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Write the full record, history included. The file is replaced atomically.
pub fn save_history(path: &Path, record: &PhysioRecord) -> PhysioResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let doc = HistoryFile {
        version: FORMAT_VERSION,
        fs: record.fs,
        checksum: samples_checksum(&record.samples),
        samples: record.samples.clone(),
        detected: record.detected.clone(),
        peaks: record.peaks.clone(),
        rejected: record.rejected.clone(),
        history: record.history.clone(),
        provenance: record.provenance.clone(),
    };
    let json = serde_json::to_vec(&doc).map_err(|e| corrupt(path, e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))?;
    log::debug!(
        "saved history for {} peak(s) / {} edit(s) to {}",
        record.peaks.len(),
        record.history.len(),
        path.display()
    );
    Ok(())
}

/// Rebuild a record from a history artifact, checking it is self-consistent.
pub fn load_history(path: &Path) -> PhysioResult<PhysioRecord> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    let doc: HistoryFile =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(path, e.to_string()))?;
    if doc.version != FORMAT_VERSION {
        return Err(corrupt(
            path,
            format!("unsupported format version {}", doc.version),
        ));
    }
    if samples_checksum(&doc.samples) != doc.checksum {
        return Err(corrupt(path, "sample checksum mismatch"));
    }
    let mut record =
        PhysioRecord::new(doc.samples, doc.fs).map_err(|e| corrupt(path, e.to_string()))?;
    record.detected = doc.detected;
    record.peaks = doc.peaks;
    record.rejected = doc.rejected;
    record.history = doc.history;
    record.provenance = doc.provenance;
    record
        .validate()
        .map_err(|e| corrupt(path, e.to_string()))?;
    let replayed = replay(&record.detected, &record.history);
    if replayed.peaks != record.peaks || replayed.rejected != record.rejected {
        return Err(corrupt(path, "edit history does not reproduce stored peaks"));
    }
    Ok(record)
}
