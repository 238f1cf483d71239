//! Readers for the `fort.N` tables Impact-T writes into its run directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::RunError;
use impact_core::element::{Element, ElementKind};
use impact_core::input::read_table;

/// Named columns of one numeric table.
pub type Columns = BTreeMap<String, Vec<f64>>;

/// One `fort.N` file and the names of its columns.
#[derive(Debug, Clone, Copy)]
pub struct FortFile {
    pub number: i64,
    pub key: &'static str,
    pub columns: &'static [&'static str],
}

const SLICE_COLUMNS: &[&str] = &[
    "slice_z",
    "particles_per_cell",
    "current",
    "norm_emit_x",
    "norm_emit_y",
    "mean_energy",
    "uncorr_energy_spread",
];

pub const PARTICLE_COLUMNS: &[&str] = &["x", "GBx", "y", "GBy", "z", "GBz"];

pub const STAT_FILES: &[FortFile] = &[
    FortFile {
        number: 18,
        key: "reference",
        columns: &[
            "t",
            "mean_z",
            "mean_gamma",
            "mean_kinetic_energy_MeV",
            "mean_beta",
            "max_r",
            "sigma_gamma",
        ],
    },
    FortFile {
        number: 24,
        key: "x",
        columns: &[
            "t",
            "mean_z",
            "mean_x",
            "sigma_x",
            "mean_gammabeta_x",
            "sigma_gammabeta_x",
            "cov_x__gammabeta_x",
            "norm_emit_x",
        ],
    },
    FortFile {
        number: 25,
        key: "y",
        columns: &[
            "t",
            "mean_z",
            "mean_y",
            "sigma_y",
            "mean_gammabeta_y",
            "sigma_gammabeta_y",
            "cov_y__gammabeta_y",
            "norm_emit_y",
        ],
    },
    FortFile {
        number: 26,
        key: "z",
        columns: &[
            "t",
            "mean_z",
            "sigma_z",
            "mean_gammabeta_z",
            "sigma_gammabeta_z",
            "cov_z__gammabeta_z",
            "norm_emit_z",
        ],
    },
    FortFile {
        number: 27,
        key: "max_amplitude",
        columns: &[
            "t",
            "mean_z",
            "max_amplitude_x",
            "max_amplitude_gammabeta_x",
            "max_amplitude_y",
            "max_amplitude_gammabeta_y",
            "max_amplitude_z",
            "max_amplitude_gammabeta_z",
        ],
    },
    FortFile {
        number: 28,
        key: "load_balance",
        columns: &[
            "t",
            "mean_z",
            "loadbalance_min_n_particle",
            "loadbalance_max_n_particle",
            "n_particle",
        ],
    },
    FortFile {
        number: 29,
        key: "moment3",
        columns: &[
            "t",
            "mean_z",
            "moment3_x",
            "moment3_gammabeta_x",
            "moment3_y",
            "moment3_gammabeta_y",
            "moment3_z",
            "moment3_gammabeta_z",
        ],
    },
    FortFile {
        number: 30,
        key: "moment4",
        columns: &[
            "t",
            "mean_z",
            "moment4_x",
            "moment4_gammabeta_x",
            "moment4_y",
            "moment4_gammabeta_y",
            "moment4_z",
            "moment4_gammabeta_z",
        ],
    },
];

pub const SLICE_FILES: &[FortFile] = &[
    FortFile {
        number: 60,
        key: "initial",
        columns: SLICE_COLUMNS,
    },
    FortFile {
        number: 70,
        key: "final",
        columns: SLICE_COLUMNS,
    },
];

pub const PARTICLE_FILES: &[FortFile] = &[
    FortFile {
        number: 40,
        key: "initial_particles",
        columns: PARTICLE_COLUMNS,
    },
    FortFile {
        number: 50,
        key: "final_particles",
        columns: PARTICLE_COLUMNS,
    },
];

/// Everything read back from a run directory apart from particles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub stats: Columns,
    pub slice_info: BTreeMap<String, Columns>,
}

pub fn fort_path(dir: &Path, number: i64) -> std::path::PathBuf {
    dir.join(format!("fort.{}", number))
}

/// Reads a table and names its columns. Columns beyond `names` become
/// `col<N>` (1-based).
pub fn load_fort(path: &Path, names: &[&str]) -> Result<Columns, RunError> {
    let rows = read_table(path)?;
    let mut columns = Columns::new();
    for row in rows {
        for (i, value) in row.into_iter().enumerate() {
            let name = names
                .get(i)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("col{}", i + 1));
            columns.entry(name).or_default().push(value);
        }
    }
    Ok(columns)
}

fn load_many(dir: &Path, files: &[FortFile]) -> Result<BTreeMap<&'static str, Columns>, RunError> {
    let mut out = BTreeMap::new();
    for file in files {
        let path = fort_path(dir, file.number);
        if !path.exists() {
            debug!(path = %path.display(), "output file not present");
            continue;
        }
        out.insert(file.key, load_fort(&path, file.columns)?);
    }
    Ok(out)
}

/// Merges all statistics files into one column map. Shared columns such
/// as `t` keep the first file's values.
pub fn load_stats(dir: &Path) -> Result<Columns, RunError> {
    let mut stats = Columns::new();
    for (_, columns) in load_many(dir, STAT_FILES)? {
        for (name, values) in columns {
            stats.entry(name).or_insert(values);
        }
    }
    Ok(stats)
}

pub fn load_slice_info(dir: &Path) -> Result<BTreeMap<String, Columns>, RunError> {
    Ok(load_many(dir, SLICE_FILES)?
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect())
}

pub fn load_output(dir: &Path) -> Result<RunOutput, RunError> {
    Ok(RunOutput {
        stats: load_stats(dir)?,
        slice_info: load_slice_info(dir)?,
    })
}

/// Reads the initial/final particle dumps plus one dump per `write_beam`
/// element, keyed by element name.
pub fn load_particles(dir: &Path, lattice: &[Element]) -> Result<BTreeMap<String, Columns>, RunError> {
    let mut particles: BTreeMap<String, Columns> = load_many(dir, PARTICLE_FILES)?
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    for element in lattice {
        if !matches!(element.kind, ElementKind::WriteBeam { .. }) {
            continue;
        }
        let path = fort_path(dir, element.bmpstp);
        if !path.exists() {
            warn!(element = %element.name, path = %path.display(), "particle dump not found");
            continue;
        }
        particles.insert(element.name.clone(), load_fort(&path, PARTICLE_COLUMNS)?);
    }
    Ok(particles)
}

/// Number of particles in a dump.
pub fn particle_count(columns: &Columns) -> usize {
    columns.get("x").map(Vec::len).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "impact_output_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("dir");
        dir
    }

    #[test]
    fn stats_merge_across_files() {
        let dir = scratch("stats");
        fs::write(dir.join("fort.18"), "0.0 0.0 1.5 0.25 0.7 1e-3 0.01\n1e-12 1e-4 1.6 0.3 0.72 1e-3 0.02\n")
            .expect("18");
        fs::write(dir.join("fort.24"), "0.0 0.0 0 1e-3 0 0.1 0 1e-6\n1e-12 1e-4 0 2e-3 0 0.2 0 2e-6\n")
            .expect("24");
        let stats = load_stats(&dir).expect("stats");
        assert_eq!(stats["t"], vec![0.0, 1e-12]);
        assert_eq!(stats["mean_gamma"], vec![1.5, 1.6]);
        assert_eq!(stats["norm_emit_x"], vec![1e-6, 2e-6]);
        assert!(!stats.contains_key("norm_emit_y"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn extra_columns_get_positional_names() {
        let dir = scratch("extra");
        let path = dir.join("fort.60");
        fs::write(&path, "1 2 3 4 5 6 7 8\n").expect("60");
        let cols = load_fort(&path, SLICE_COLUMNS).expect("load");
        assert_eq!(cols["slice_z"], vec![1.0]);
        assert_eq!(cols["col8"], vec![8.0]);
        let slices = load_slice_info(&dir).expect("slices");
        assert!(slices.contains_key("initial"));
        assert!(!slices.contains_key("final"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn particles_include_write_beam_dumps() {
        let dir = scratch("particles");
        fs::write(dir.join("fort.40"), "1 2 3 4 5 6\n").expect("40");
        fs::write(dir.join("fort.50"), "1 2 3 4 5 6\n6 5 4 3 2 1\n").expect("50");
        fs::write(dir.join("fort.101"), "0 0 0 0 0 1\n").expect("101");
        let lattice = vec![
            Element::new("WB", 0.0, ElementKind::WriteBeam { s: 0.5 }).with_steps(1, 101),
            Element::new("WB_MISSING", 0.0, ElementKind::WriteBeam { s: 0.9 }).with_steps(1, 102),
        ];
        let particles = load_particles(&dir, &lattice).expect("particles");
        let keys: Vec<&str> = particles.keys().map(|s| s.as_str()).collect();
        assert_eq!(keys, vec!["WB", "final_particles", "initial_particles"]);
        assert_eq!(particle_count(&particles["final_particles"]), 2);
        assert_eq!(particles["WB"]["GBz"], vec![1.0]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_directory_gives_empty_output() {
        let dir = scratch("empty");
        let out = load_output(&dir).expect("output");
        assert!(out.stats.is_empty());
        assert!(out.slice_info.is_empty());
        let _ = fs::remove_dir_all(dir);
    }
}
