//! Main input file (`ImpactT.in`) and its side files.
//!
//! The main file is a header block of [`HEADER_LINES`] data lines followed
//! by the lattice block. Lines starting with `!` are comments; inside the
//! lattice block they are kept as comment elements.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::codec::{lattice_lines, parse_lattice, parse_number};
use crate::element::Element;
use crate::error::InputError;
use crate::fsutil::atomic_write_bytes;
use crate::header::{Header, FLAGDIST_FROM_FILE, HEADER_LINES};

pub const DEFAULT_INPUT_FILENAME: &str = "ImpactT.in";
pub const PARTICLE_INPUT_FILENAME: &str = "partcl.data";

pub type NumericTable = Vec<Vec<f64>>;

/// Everything that defines a run's inputs. This is the keyed data behind
/// the run fingerprint and the `input` group of the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactInput {
    pub header: Header,
    pub lattice: Vec<Element>,
    #[serde(default)]
    pub fieldmaps: BTreeMap<String, NumericTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_particle_file: Option<PathBuf>,
}

/// Side-file name for a field-map file number.
pub fn fieldmap_name(file_id: i64) -> String {
    format!("rfdata{}", file_id)
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('!')
}

/// Splits input text into header data lines and lattice lines.
pub fn split_input(text: &str) -> (Vec<&str>, Vec<&str>) {
    let mut header = Vec::new();
    let mut lattice = Vec::new();
    for line in text.lines() {
        if header.len() < HEADER_LINES.len() {
            if line.trim().is_empty() || is_comment(line) {
                continue;
            }
            header.push(line);
        } else {
            lattice.push(line);
        }
    }
    (header, lattice)
}

pub fn parse_input_text(text: &str) -> Result<(Header, Vec<Element>), InputError> {
    let (header_lines, lattice_block) = split_input(text);
    let header = Header::from_lines(&header_lines)?;
    let lattice = parse_lattice(lattice_block)?;
    Ok((header, lattice))
}

/// Reads an input file plus the field maps and particle file next to it.
pub fn parse_impact_input(path: &Path) -> Result<ImpactInput, InputError> {
    let text = fs::read_to_string(path).map_err(|e| InputError::read(path, e))?;
    let (header, lattice) = parse_input_text(&text)?;
    let source_dir = path.parent().unwrap_or(Path::new("."));

    let mut fieldmaps = BTreeMap::new();
    for element in &lattice {
        let Some(file_id) = element.kind.file_id() else {
            continue;
        };
        let name = fieldmap_name(file_id);
        if fieldmaps.contains_key(&name) {
            continue;
        }
        let fmap_path = source_dir.join(&name);
        if fmap_path.exists() {
            debug!(fieldmap = %name, element = %element.name, "loading field map");
            fieldmaps.insert(name, read_table(&fmap_path)?);
        } else {
            warn!(fieldmap = %name, element = %element.name, "field map file not found");
        }
    }

    let mut input_particle_file = None;
    if header.int("Flagdist") == FLAGDIST_FROM_FILE {
        let candidate = source_dir.join(PARTICLE_INPUT_FILENAME);
        if candidate.exists() {
            input_particle_file = Some(candidate);
        } else {
            warn!(path = %candidate.display(), "distribution reads particles from file but none found");
        }
    }

    Ok(ImpactInput {
        header,
        lattice,
        fieldmaps,
        input_particle_file,
    })
}

/// Renders the main input file. Fails before producing anything if an
/// element cannot be encoded.
pub fn input_text(header: &Header, lattice: &[Element]) -> Result<String, InputError> {
    let mut lines = header.lines();
    lines.extend(lattice_lines(lattice)?);
    let mut text = lines.join("\n");
    text.push('\n');
    Ok(text)
}

pub fn write_impact_input(path: &Path, header: &Header, lattice: &[Element]) -> Result<(), InputError> {
    let text = input_text(header, lattice)?;
    atomic_write_bytes(path, text.as_bytes()).map_err(|e| InputError::write(path, e))
}

/// Reads a whitespace-delimited numeric table. Blank lines and lines
/// starting with `!` or `#` are skipped.
pub fn read_table(path: &Path) -> Result<NumericTable, InputError> {
    let text = fs::read_to_string(path).map_err(|e| InputError::read(path, e))?;
    let mut rows = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('!') || trimmed.starts_with('#') {
            continue;
        }
        let row = trimmed
            .split_whitespace()
            .map(|tok| {
                parse_number(tok).ok_or_else(|| InputError::BadTable {
                    token: tok.to_string(),
                    path: path.to_path_buf(),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn write_table(path: &Path, rows: &[Vec<f64>]) -> Result<(), InputError> {
    let mut text = String::new();
    for row in rows {
        let line = row
            .iter()
            .map(|v| format!("{:.18e}", v))
            .collect::<Vec<_>>()
            .join(" ");
        text.push_str(&line);
        text.push('\n');
    }
    atomic_write_bytes(path, text.as_bytes()).map_err(|e| InputError::write(path, e))
}

/// Copies the first `count` particle rows of `src` into `dest`, preceded by
/// a particle-count line. A leading single-value count line in `src` is
/// dropped. Returns the number of rows written.
pub fn stage_particles(src: &Path, dest: &Path, count: usize) -> Result<usize, InputError> {
    let text = fs::read_to_string(src).map_err(|e| InputError::read(src, e))?;
    let mut rows: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if rows
        .first()
        .map(|l| l.split_whitespace().count() == 1)
        .unwrap_or(false)
    {
        rows.remove(0);
    }
    if rows.len() < count {
        warn!(
            available = rows.len(),
            requested = count,
            src = %src.display(),
            "particle file has fewer rows than requested"
        );
    }
    let take = rows.len().min(count);
    let mut out = format!("{}\n", take);
    for row in &rows[..take] {
        out.push_str(row.trim());
        out.push('\n');
    }
    atomic_write_bytes(dest, out.as_bytes()).map_err(|e| InputError::write(dest, e))?;
    Ok(take)
}
