//! JSON Lines batch files: one record per line.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use aggregation::Record;
use anyhow::{Context, Result};
use tracing::info;

/// Read a batch, skipping blank lines.
pub fn read_batch(path: &Path) -> Result<Vec<Record>> {
    let file =
        std::fs::File::open(path).context(format!("Failed to open {}", path.display()))?;
    let mut batch = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context(format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .context(format!("Invalid record at {}:{}", path.display(), index + 1))?;
        batch.push(record);
    }
    info!(path = %path.display(), records = batch.len(), "Read batch");
    Ok(batch)
}

/// Write a batch, replacing any existing file.
pub fn write_batch(path: &Path, batch: &[Record]) -> Result<()> {
    let file =
        std::fs::File::create(path).context(format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for record in batch {
        serde_json::to_writer(&mut out, record).context("Failed to serialize record")?;
        out.write_all(b"\n")
            .context(format!("Failed to write {}", path.display()))?;
    }
    out.flush()
        .context(format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), records = batch.len(), "Wrote batch");
    Ok(())
}
