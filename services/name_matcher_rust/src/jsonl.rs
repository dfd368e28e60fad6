//! JSON-lines input and output.

use anyhow::{Context, Result};
use name_matching_core::{CanonicalIdentity, SourceObservation};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Open `path` for reading, or stdin for `-`.
pub fn open_input(path: &str) -> Result<Box<dyn BufRead>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Open `path` for writing, or stdout when absent.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// One observation per line; blank lines are skipped.
pub fn read_observations(reader: impl BufRead) -> Result<Vec<SourceObservation>> {
    let mut observations = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let observation: SourceObservation = serde_json::from_str(&line)
            .with_context(|| format!("Invalid observation on line {}", idx + 1))?;
        observations.push(observation);
    }
    Ok(observations)
}

pub fn write_lines<T: Serialize>(writer: &mut dyn Write, items: &[T]) -> Result<()> {
    for item in items {
        serde_json::to_writer(&mut *writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Registry file: a JSON array of `{id, name, team, position}`.
pub fn read_registry_file(path: &Path) -> Result<Vec<CanonicalIdentity>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open registry file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid registry file {}", path.display()))
}
