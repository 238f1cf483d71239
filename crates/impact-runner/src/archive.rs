//! Portable run archive.
//!
//! A zip container of JSON documents:
//!
//! ```text
//! manifest.json
//! input/header.json
//! input/lattice.json
//! input/fieldmaps/<name>.json
//! input/files.json
//! stats.json
//! slice_info.json
//! run_info.json
//! particles/<key>.json
//! ```

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::RunError;
use crate::output::{particle_count, Columns, RunOutput};
use crate::RunInfo;
use impact_core::fsutil::atomic_write_bytes;
use impact_core::ImpactInput;

pub const ARCHIVE_SCHEMA_VERSION: &str = "impact_archive_v1";

pub struct ArchiveContents<'a> {
    pub fingerprint: &'a str,
    pub input: &'a ImpactInput,
    /// Workspace inventory: relative path to digest.
    pub files: &'a BTreeMap<String, String>,
    pub output: &'a RunOutput,
    pub run_info: Option<&'a RunInfo>,
    pub particles: &'a BTreeMap<String, Columns>,
    pub macrocharge: f64,
}

struct EntryWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: FileOptions,
    names: Vec<String>,
}

impl EntryWriter {
    fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options: FileOptions::default().compression_method(CompressionMethod::Deflated),
            names: Vec::new(),
        }
    }

    fn json<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<(), RunError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.zip.start_file(name, self.options)?;
        self.zip
            .write_all(&bytes)
            .map_err(|e| RunError::Archive(format!("{}: {}", name, e)))?;
        debug!(entry = name, bytes = bytes.len(), "archived");
        self.names.push(name.to_string());
        Ok(())
    }

    fn finish(mut self) -> Result<(Vec<u8>, Vec<String>), RunError> {
        let cursor = self.zip.finish()?;
        Ok((cursor.into_inner(), self.names))
    }
}

/// Writes the archive to `path`, replacing any existing file. Returns the
/// entry names in write order.
pub fn write_archive(path: &Path, contents: &ArchiveContents<'_>) -> Result<Vec<String>, RunError> {
    let mut w = EntryWriter::new();

    w.json(
        "manifest.json",
        &json!({
            "schema_version": ARCHIVE_SCHEMA_VERSION,
            "fingerprint": contents.fingerprint,
            "created_at": Utc::now().to_rfc3339(),
            "runner_version": env!("CARGO_PKG_VERSION"),
        }),
    )?;

    w.json("input/header.json", &contents.input.header)?;
    w.json("input/lattice.json", &contents.input.lattice)?;
    for (name, table) in &contents.input.fieldmaps {
        w.json(&format!("input/fieldmaps/{}.json", name), table)?;
    }
    w.json("input/files.json", contents.files)?;

    w.json("stats.json", &contents.output.stats)?;
    w.json("slice_info.json", &contents.output.slice_info)?;
    let run_info = match contents.run_info {
        Some(info) => serde_json::to_value(info)?,
        None => Value::Object(Default::default()),
    };
    w.json("run_info.json", &run_info)?;

    for (key, data) in contents.particles {
        let total_charge = contents.macrocharge * particle_count(data) as f64;
        w.json(
            &format!("particles/{}.json", key),
            &json!({
                "attrs": { "total_charge": total_charge },
                "data": data,
            }),
        )?;
    }

    let (bytes, names) = w.finish()?;
    atomic_write_bytes(path, &bytes).map_err(|e| RunError::Archive(format!("{}: {}", path.display(), e)))?;
    info!(path = %path.display(), entries = names.len(), "wrote archive");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use impact_core::element::{Element, ElementKind};
    use impact_core::Header;
    use std::io::Read;

    #[test]
    fn archive_has_every_group_and_particle_charge() {
        let mut header = Header::new();
        header.set("Np", 2.0);
        let mut fieldmaps = BTreeMap::new();
        fieldmaps.insert("rfdata1".to_string(), vec![vec![0.0, 1.0]]);
        let input = ImpactInput {
            header,
            lattice: vec![Element::new("D1", 0.5, ElementKind::Drift { zedge: 0.0, radius: 0.0 })],
            fieldmaps,
            input_particle_file: None,
        };
        let mut files = BTreeMap::new();
        files.insert("ImpactT.in".to_string(), "sha256:00".to_string());
        let mut final_particles = Columns::new();
        final_particles.insert("x".to_string(), vec![1.0, 2.0]);
        let mut particles = BTreeMap::new();
        particles.insert("final_particles".to_string(), final_particles);
        let output = RunOutput::default();

        let path = std::env::temp_dir().join(format!(
            "impact_archive_{}_{}.zip",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let names = write_archive(
            &path,
            &ArchiveContents {
                fingerprint: "abc",
                input: &input,
                files: &files,
                output: &output,
                run_info: None,
                particles: &particles,
                macrocharge: 0.5,
            },
        )
        .expect("archive");
        assert_eq!(
            names,
            vec![
                "manifest.json",
                "input/header.json",
                "input/lattice.json",
                "input/fieldmaps/rfdata1.json",
                "input/files.json",
                "stats.json",
                "slice_info.json",
                "run_info.json",
                "particles/final_particles.json",
            ]
        );

        let file = std::fs::File::open(&path).expect("open");
        let mut zip = zip::ZipArchive::new(file).expect("zip");
        let mut text = String::new();
        zip.by_name("particles/final_particles.json")
            .expect("entry")
            .read_to_string(&mut text)
            .expect("read");
        let v: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(v["attrs"]["total_charge"], json!(1.0));
        assert_eq!(v["data"]["x"], json!([1.0, 2.0]));

        let mut manifest = String::new();
        zip.by_name("manifest.json")
            .expect("manifest")
            .read_to_string(&mut manifest)
            .expect("read");
        let m: Value = serde_json::from_str(&manifest).expect("json");
        assert_eq!(m["fingerprint"], "abc");
        let _ = std::fs::remove_file(path);
    }
}
