use crate::signal::TimeSeries;
use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Trim};
use std::path::Path;

/// Analog channels an rtpeaks export can carry.
pub const RTPEAKS_CHANNELS: [usize; 6] = [1, 2, 9, 10, 11, 12];

/// Load `channel<k>` from an rtpeaks CSV export sampled at `fs`.
pub fn load_rtpeaks(path: &Path, fs: f64, channel: usize) -> Result<TimeSeries> {
    if !RTPEAKS_CHANNELS.contains(&channel) {
        bail!(
            "rtpeaks channel must be one of {:?}, got {}",
            RTPEAKS_CHANNELS,
            channel
        );
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let wanted = format!("channel{channel}");
    let headers = reader.headers().context("reading header")?.clone();
    let column = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(&wanted))
        .with_context(|| format!("{} has no '{}' column", path.display(), wanted))?;
    let mut data = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", row + 2))?;
        let raw = record
            .get(column)
            .with_context(|| format!("row {} is missing '{}'", row + 2, wanted))?;
        let value = raw
            .parse::<f64>()
            .with_context(|| format!("row {}: '{}' is not a number", row + 2, raw))?;
        data.push(value);
    }
    if data.is_empty() {
        bail!("{} contains no samples", path.display());
    }
    Ok(TimeSeries { fs, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_requested_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rt.csv");
        fs::write(&path, "time, channel1, channel9\n0.0, 1.0, 5.0\n0.1, 2.0, 6.0\n").unwrap();
        let ts = load_rtpeaks(&path, 10.0, 9).unwrap();
        assert_eq!(ts.data, vec![5.0, 6.0]);
        assert_eq!(ts.fs, 10.0);
    }

    #[test]
    fn rejects_unknown_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rt.csv");
        fs::write(&path, "time,channel1\n0,1\n").unwrap();
        assert!(load_rtpeaks(&path, 10.0, 3).is_err());
        assert!(load_rtpeaks(&path, 10.0, 2).is_err());
    }
}
