use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use impact_core::input::DEFAULT_INPUT_FILENAME;

/// How a run is executed. Loaded from YAML; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Executable path. `$VAR` and `${VAR}` are expanded at run time.
    #[serde(default = "default_impact_bin")]
    pub impact_bin: String,

    #[serde(default)]
    pub use_mpi: bool,

    #[serde(default = "default_mpi_exe")]
    pub mpi_exe: String,

    /// Parent directory for system-allocated workspaces.
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Caller-supplied workspace. Never deleted unless forced.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Bounded execution when set, streaming otherwise.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    #[serde(default = "default_true")]
    pub auto_cleanup: bool,

    #[serde(default = "default_input_filename")]
    pub input_filename: String,

    /// Log streamed output lines at info instead of debug.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            impact_bin: default_impact_bin(),
            use_mpi: false,
            mpi_exe: default_mpi_exe(),
            workdir: None,
            path: None,
            timeout_seconds: None,
            auto_cleanup: true,
            input_filename: default_input_filename(),
            verbose: false,
        }
    }
}

impl RunConfig {
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Bounded-mode limit. Negative or non-finite values mean no limit;
    /// values beyond what a `Duration` holds saturate to `Duration::MAX`.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX))
    }
}

fn default_impact_bin() -> String {
    "$IMPACTT_BIN".to_string()
}

fn default_mpi_exe() -> String {
    "mpirun".to_string()
}

fn default_true() -> bool {
    true
}

fn default_input_filename() -> String {
    DEFAULT_INPUT_FILENAME.to_string()
}

pub fn load_run_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    RunConfig::parse(&content, path)
}

/// Expands `$VAR` and `${VAR}` from the environment. Unset variables
/// expand to the empty string rather than staying literal, so an unset
/// `$IMPACTT_BIN` surfaces as a missing executable instead of a lookup of
/// a file named `$IMPACTT_BIN`.
pub fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            name
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            name
        };
        if name.is_empty() {
            out.push('$');
        } else {
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_uses_defaults() {
        let cfg = RunConfig::parse("{}", Path::new("run.yaml")).expect("parse");
        assert_eq!(cfg.impact_bin, "$IMPACTT_BIN");
        assert_eq!(cfg.mpi_exe, "mpirun");
        assert!(cfg.auto_cleanup);
        assert!(!cfg.use_mpi);
        assert_eq!(cfg.input_filename, "ImpactT.in");
        assert!(cfg.timeout().is_none());
    }

    #[test]
    fn yaml_overrides_fields() {
        let yaml = "impact_bin: /opt/impact/ImpactTexe\nuse_mpi: true\ntimeout_seconds: 2.5\nauto_cleanup: false\n";
        let cfg = RunConfig::parse(yaml, Path::new("run.yaml")).expect("parse");
        assert_eq!(cfg.impact_bin, "/opt/impact/ImpactTexe");
        assert!(cfg.use_mpi);
        assert!(!cfg.auto_cleanup);
        assert_eq!(cfg.timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn oversized_timeout_saturates_instead_of_panicking() {
        let cfg = RunConfig {
            timeout_seconds: Some(1e30),
            ..RunConfig::default()
        };
        assert_eq!(cfg.timeout(), Some(Duration::MAX));
        let negative = RunConfig {
            timeout_seconds: Some(-1.0),
            ..RunConfig::default()
        };
        assert!(negative.timeout().is_none());
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        let err = RunConfig::parse("use_mpi: [1, 2", Path::new("bad.yaml")).expect_err("bad");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn expands_both_variable_forms() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(expand_env("$HOME/bin"), format!("{}/bin", home));
        assert_eq!(expand_env("${HOME}/bin"), format!("{}/bin", home));
        assert_eq!(expand_env("/usr/bin/x"), "/usr/bin/x");
        assert_eq!(expand_env("cost$"), "cost$");
        assert_eq!(expand_env("$IMPACT_TEST_SURELY_UNSET_VAR/x"), "/x");
    }
}
