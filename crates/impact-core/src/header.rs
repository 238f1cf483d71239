//! Run header: the scalar configuration block at the top of the input file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::codec::parse_number;
use crate::error::InputError;

/// Header keys, one row per input-file line.
pub const HEADER_LINES: &[&[&str]] = &[
    &["Npcol", "Nprow"],
    &["Dt", "Ntstep", "Nbunch"],
    &["Dim", "Np", "Flagmap", "Flagerr", "Flagdiag", "Flagimg", "Zimage"],
    &["Nx", "Ny", "Nz", "Flagbc", "Xrad", "Yrad", "Perdlen"],
    &["Flagdist", "Rstartflg", "Flagsbstp", "Nemission", "Temission"],
    &["sigx(m)", "sigpx", "muxpx", "xscale", "pxscale", "xmu1(m)", "xmu2"],
    &["sigy(m)", "sigpy", "muxpy", "yscale", "pyscale", "ymu1(m)", "ymu2"],
    &["sigz(m)", "sigpz", "muxpz", "zscale", "pzscale", "zmu1(m)", "zmu2"],
    &["Bcurr", "Bkenergy", "Bmass", "Bcharge", "Bfreq", "Tini"],
];

const INTEGER_KEYS: &[&str] = &[
    "Npcol", "Nprow", "Ntstep", "Nbunch", "Dim", "Np", "Flagmap", "Flagerr", "Flagdiag",
    "Flagimg", "Nx", "Ny", "Nz", "Flagbc", "Flagdist", "Rstartflg", "Flagsbstp", "Nemission",
];

/// Keys the charge and identity computations depend on.
pub const REQUIRED_KEYS: &[&str] = &["Np", "Bcurr", "Bfreq"];

/// Distribution flag value selecting particles read from `partcl.data`.
pub const FLAGDIST_FROM_FILE: i64 = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(BTreeMap<String, f64>);

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Value of `key`, `0` when missing.
    pub fn value(&self, key: &str) -> f64 {
        self.get(key).unwrap_or(0.0)
    }

    pub fn int(&self, key: &str) -> i64 {
        self.value(key) as i64
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Parses the header block from its data lines (comments already
    /// removed). Extra values on a line are ignored; missing ones are left
    /// unset.
    pub fn from_lines(lines: &[&str]) -> Result<Self, InputError> {
        if lines.len() < HEADER_LINES.len() {
            return Err(InputError::ShortHeader {
                found: lines.len(),
                expected: HEADER_LINES.len(),
            });
        }
        let mut header = Self::new();
        for (line_no, (line, keys)) in lines.iter().zip(HEADER_LINES.iter()).enumerate() {
            let data = line.split('!').next().unwrap_or("");
            for (token, key) in data.split_whitespace().zip(keys.iter()) {
                let value = parse_number(token).ok_or_else(|| InputError::BadHeaderValue {
                    token: token.to_string(),
                    line_no: line_no + 1,
                })?;
                header.set(*key, value);
            }
        }
        Ok(header)
    }

    /// Renders the header block, one line per row of [`HEADER_LINES`].
    pub fn lines(&self) -> Vec<String> {
        HEADER_LINES
            .iter()
            .map(|keys| {
                keys.iter()
                    .map(|key| format_value(key, self.value(key)))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    /// Fills defaults for missing keys and reports required keys that are
    /// missing or zero. Returns the offending keys.
    pub fn bookkeep(&mut self) -> Vec<String> {
        for key in ["Npcol", "Nprow", "Nbunch", "Dim"] {
            if self.get(key).is_none() {
                let default = if key == "Dim" { 6.0 } else { 1.0 };
                self.set(key, default);
            }
        }
        for keys in HEADER_LINES {
            for key in keys.iter() {
                self.0.entry((*key).to_string()).or_insert(0.0);
            }
        }
        let mut missing = Vec::new();
        for key in REQUIRED_KEYS {
            if self.value(key) == 0.0 {
                warn!(key = *key, "required header value is missing or zero");
                missing.push((*key).to_string());
            }
        }
        missing
    }

    pub fn process_count(&self) -> i64 {
        self.int("Npcol") * self.int("Nprow")
    }
}

fn format_value(key: &str, value: f64) -> String {
    if INTEGER_KEYS.contains(&key) {
        format!("{}", value as i64)
    } else {
        format!("{:?}", value)
    }
}

/// Short human-readable summary of the main header quantities.
impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Particles: {}, bunches: {}",
            self.int("Np"),
            self.int("Nbunch")
        )?;
        writeln!(
            f,
            "Processor grid: {} x {}, space charge grid: {} x {} x {}",
            self.int("Npcol"),
            self.int("Nprow"),
            self.int("Nx"),
            self.int("Ny"),
            self.int("Nz")
        )?;
        writeln!(
            f,
            "Timestep: {:e} s, steps: {}, distribution flag: {}",
            self.value("Dt"),
            self.int("Ntstep"),
            self.int("Flagdist")
        )?;
        writeln!(
            f,
            "Beam current: {} A, frequency: {} Hz, kinetic energy: {} eV",
            self.value("Bcurr"),
            self.value("Bfreq"),
            self.value("Bkenergy")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_TEXT: &str = "1 1\n\
        1e-12 10000 1\n\
        6 2000 1 0 2 0 0.02\n\
        32 32 32 1 0.015 0.015 45.0\n\
        16 0 0 1 1.4e-11\n\
        0.0 0.0 0.0 1.0 1.0 0.0 0.0\n\
        0.0 0.0 0.0 1.0 1.0 0.0 0.0\n\
        0.0 0.0 0.0 1.0 1.0 0.0 0.0\n\
        0.13 1.0 511005.0 -1.0 1.3e9 0.0";

    #[test]
    fn reads_all_header_rows() {
        let lines: Vec<&str> = HEADER_TEXT.lines().collect();
        let header = Header::from_lines(&lines).expect("header");
        assert_eq!(header.int("Np"), 2000);
        assert_eq!(header.value("Bfreq"), 1.3e9);
        assert_eq!(header.int("Flagdist"), 16);
        assert_eq!(header.value("Perdlen"), 45.0);
        assert_eq!(header.len(), 51);
    }

    #[test]
    fn writes_integers_without_fraction() {
        let lines: Vec<&str> = HEADER_TEXT.lines().collect();
        let header = Header::from_lines(&lines).expect("header");
        let out = header.lines();
        assert_eq!(out[0], "1 1");
        assert_eq!(out[2], "6 2000 1 0 2 0 0.02");
        let again: Vec<&str> = out.iter().map(|s| s.as_str()).collect();
        assert_eq!(Header::from_lines(&again).expect("reparse"), header);
    }

    #[test]
    fn short_header_is_an_error() {
        let err = Header::from_lines(&["1 1", "1e-12 10 1"]).expect_err("short");
        assert!(matches!(err, InputError::ShortHeader { found: 2, .. }));
    }

    #[test]
    fn bookkeep_fills_defaults_and_reports_required() {
        let mut header = Header::new();
        header.set("Np", 100.0);
        let missing = header.bookkeep();
        assert_eq!(missing, vec!["Bcurr".to_string(), "Bfreq".to_string()]);
        assert_eq!(header.int("Npcol"), 1);
        assert_eq!(header.int("Dim"), 6);
        assert_eq!(header.value("Zimage"), 0.0);
        assert_eq!(header.process_count(), 1);
    }
}
