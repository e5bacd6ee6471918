use crate::signal::TimeSeries;
use anyhow::{Context, Result};
use std::path::Path;

/// Parse newline-delimited floating point samples, ignoring blank/comment lines.
pub fn parse_f64_series(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {} is not a number: {}", idx + 1, trimmed))?;
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no numeric samples found");
    }
    Ok(out)
}

/// Load a single-channel text recording sampled at `fs`.
pub fn load_text(path: &Path, fs: f64) -> Result<TimeSeries> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let data = parse_f64_series(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(TimeSeries { fs, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blanks() {
        let parsed = parse_f64_series("# header\n1.5\n\n-2\n  3e-1 \n").unwrap();
        assert_eq!(parsed, vec![1.5, -2.0, 0.3]);
    }

    #[test]
    fn reports_offending_line() {
        let err = parse_f64_series("1\nabc\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_f64_series("# only comments\n").is_err());
    }
}
