//! Impact-T run orchestration.
//!
//! [`ImpactRun`] owns one run's inputs and moves through
//! `Unconfigured -> Configured -> Running -> Finished`. Failures while
//! running are recorded in [`RunInfo`] rather than returned; input and
//! configuration problems are returned as [`RunError`].

pub mod archive;
pub mod config;
pub mod error;
pub mod output;
pub mod process;
pub mod workspace;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub use config::{load_run_config, RunConfig};
pub use error::{ConfigError, ProcessError, RunError};
pub use output::{Columns, RunOutput};
pub use workspace::Workspace;

use archive::{write_archive, ArchiveContents};
use config::expand_env;
use impact_core::header::FLAGDIST_FROM_FILE;
use impact_core::input::{
    parse_impact_input, stage_particles, write_impact_input, write_table, PARTICLE_INPUT_FILENAME,
};
use impact_core::{ElementIndex, ImpactInput, PropertyError};
use process::{command_line, execute, execute_bounded};

pub const RUN_SCRIPT_FILENAME: &str = "run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Unconfigured,
    Configured,
    Running,
    Finished,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Recorded on every run attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub start_time: DateTime<Utc>,
    /// Elapsed seconds.
    pub run_time: f64,
    pub error: bool,
    /// Empty on success.
    pub why_run_error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NotConfigured,
    Succeeded,
    Failed(String),
}

/// Non-fatal findings of [`ImpactRun::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationWarning {
    EmptyLattice,
    MissingHeaderKey(String),
    ZeroParticles,
}

impl fmt::Display for ConfigurationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyLattice => f.write_str("lattice is empty; not configured"),
            Self::MissingHeaderKey(key) => write!(f, "header value '{}' is missing or zero", key),
            Self::ZeroParticles => f.write_str("header has zero particles"),
        }
    }
}

pub struct ImpactRun {
    pub input: ImpactInput,
    pub config: RunConfig,
    pub output: RunOutput,
    pub particles: BTreeMap<String, Columns>,
    /// Output lines of the last execution.
    pub log: Vec<String>,
    run_info: Option<RunInfo>,
    state: RunState,
    workspace: Option<Workspace>,
    index: ElementIndex,
    source_dir: Option<PathBuf>,
}

impl ImpactRun {
    pub fn new(config: RunConfig) -> Self {
        Self::with_input(ImpactInput::default(), config)
    }

    pub fn with_input(input: ImpactInput, config: RunConfig) -> Self {
        let index = ElementIndex::build(&input.lattice);
        Self {
            input,
            config,
            output: RunOutput::default(),
            particles: BTreeMap::new(),
            log: Vec::new(),
            run_info: None,
            state: RunState::Unconfigured,
            workspace: None,
            index,
            source_dir: None,
        }
    }

    /// Loads `path` and configures the run.
    pub fn from_input_file(
        path: &Path,
        config: RunConfig,
    ) -> Result<(Self, Vec<ConfigurationWarning>), RunError> {
        let mut run = Self::new(config);
        run.load_input(path)?;
        let warnings = run.configure()?;
        Ok((run, warnings))
    }

    pub fn load_input(&mut self, path: &Path) -> Result<(), RunError> {
        if self.state == RunState::Running {
            return Err(RunError::Busy);
        }
        self.input = parse_impact_input(path)?;
        self.index = ElementIndex::build(&self.input.lattice);
        self.source_dir = path.parent().map(Path::to_path_buf);
        info!(
            path = %path.display(),
            elements = self.input.lattice.len(),
            fieldmaps = self.input.fieldmaps.len(),
            "loaded input"
        );
        Ok(())
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.workspace.as_ref().map(Workspace::path)
    }

    pub fn run_info(&self) -> Option<&RunInfo> {
        self.run_info.as_ref()
    }

    pub fn index(&self) -> &ElementIndex {
        &self.index
    }

    /// Directory the input was loaded from, if any.
    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    /// Normalizes the header, indexes the lattice and allocates a workspace.
    ///
    /// An empty lattice is reported as [`ConfigurationWarning::EmptyLattice`]
    /// and leaves the run unconfigured without a workspace, releasing any
    /// workspace from an earlier configuration.
    pub fn configure(&mut self) -> Result<Vec<ConfigurationWarning>, RunError> {
        if self.state == RunState::Running {
            return Err(RunError::Busy);
        }
        let mut warnings: Vec<ConfigurationWarning> = self
            .input
            .header
            .bookkeep()
            .into_iter()
            .map(|key| {
                if key == "Np" {
                    ConfigurationWarning::ZeroParticles
                } else {
                    ConfigurationWarning::MissingHeaderKey(key)
                }
            })
            .collect();

        if self.input.lattice.iter().all(|e| e.is_comment()) {
            warn!("lattice is empty; run not configured");
            warnings.push(ConfigurationWarning::EmptyLattice);
            if let Some(old) = self.workspace.take() {
                let old_path = old.path().to_path_buf();
                if let Err(e) = workspace::release(old, false) {
                    warn!(path = %old_path.display(), error = %e, "failed to release workspace");
                }
            }
            self.state = RunState::Unconfigured;
            return Ok(warnings);
        }

        self.index = ElementIndex::build(&self.input.lattice);
        for name in self.index.duplicates() {
            warn!(element = name, "duplicate element name; the last one is addressable by name");
        }

        let wanted_borrowed = self.config.path.clone();
        let keep_current = match (&self.workspace, &wanted_borrowed) {
            (Some(ws), Some(path)) => ws.path() == path.as_path(),
            (Some(ws), None) => ws.is_owned(),
            (None, _) => false,
        };
        if !keep_current {
            let ws = match wanted_borrowed {
                Some(path) => Workspace::borrowed(&path).map_err(|e| RunError::workspace(&path, e))?,
                None => {
                    let parent = self.config.workdir.clone();
                    workspace::acquire(parent.as_deref()).map_err(|e| {
                        RunError::workspace(parent.unwrap_or_else(std::env::temp_dir), e)
                    })?
                }
            };
            if let Some(old) = self.workspace.replace(ws) {
                let old_path = old.path().to_path_buf();
                if let Err(e) = workspace::release(old, false) {
                    warn!(path = %old_path.display(), error = %e, "failed to release previous workspace");
                }
            }
        }

        self.state = RunState::Configured;
        if let Some(path) = self.path() {
            info!(path = %path.display(), "configured to run");
        }
        Ok(warnings)
    }

    /// Writes the inputs, executes Impact-T in the workspace and ingests its
    /// output. Failures are recorded in [`RunInfo`].
    pub fn run(&mut self) -> RunOutcome {
        if matches!(self.state, RunState::Unconfigured) {
            warn!("not configured to run");
            return RunOutcome::NotConfigured;
        }
        self.state = RunState::Running;
        let start_time = Utc::now();
        let started = Instant::now();

        let failure = match self.execute_run() {
            Ok(failure) => failure,
            Err(e) => Some(e.to_string()),
        };

        let info = RunInfo {
            start_time,
            run_time: started.elapsed().as_secs_f64(),
            error: failure.is_some(),
            why_run_error: failure.clone().unwrap_or_default(),
        };
        info!(
            run_time = info.run_time,
            error = info.error,
            why = %info.why_run_error,
            "run finished"
        );
        self.run_info = Some(info);
        self.state = RunState::Finished;
        match failure {
            None => RunOutcome::Succeeded,
            Some(why) => RunOutcome::Failed(why),
        }
    }

    /// Returns the failure reason of the execution itself; ingestion still
    /// runs after an execution failure.
    fn execute_run(&mut self) -> Result<Option<String>, RunError> {
        let cwd = self.path().ok_or(RunError::NoWorkspace)?.to_path_buf();
        self.write_input()?;
        let cmd = self.run_script(true)?;
        if let Some(program) = cmd.last() {
            let program = Path::new(program);
            if !program.exists() {
                return Err(RunError::ExecutableNotFound(program.to_path_buf()));
            }
        }

        self.log.clear();
        let mut failure = None;
        match self.config.timeout() {
            Some(timeout) => {
                let out = execute_bounded(&cmd, &cwd, timeout);
                self.log = out.log.lines().map(str::to_string).collect();
                if out.error {
                    failure = Some(out.why_error);
                }
            }
            None => {
                for item in execute(&cmd, &cwd)? {
                    match item {
                        Ok(line) => {
                            if self.config.verbose {
                                info!(target: "impact", "{}", line);
                            } else {
                                debug!(target: "impact", "{}", line);
                            }
                            self.log.push(line);
                        }
                        Err(e) => failure = Some(e.to_string()),
                    }
                }
            }
        }

        let ingested = self.load_output().and_then(|_| self.load_particles());
        match (ingested, failure) {
            (Ok(()), failure) => Ok(failure),
            (Err(e), None) => Err(e),
            (Err(e), Some(why)) => {
                warn!(error = %e, "output ingestion failed after execution failure");
                Ok(Some(why))
            }
        }
    }

    /// Writes the main input file, field-map side files and, for
    /// file-based distributions, the staged particle file.
    pub fn write_input(&self) -> Result<(), RunError> {
        let dir = self.path().ok_or(RunError::NoWorkspace)?;
        let input_path = dir.join(&self.config.input_filename);
        write_impact_input(&input_path, &self.input.header, &self.input.lattice)?;
        for (name, table) in &self.input.fieldmaps {
            write_table(&dir.join(name), table)?;
        }
        debug!(path = %input_path.display(), fieldmaps = self.input.fieldmaps.len(), "wrote input");

        if self.input.header.int("Flagdist") == FLAGDIST_FROM_FILE {
            let dest = dir.join(PARTICLE_INPUT_FILENAME);
            if dest.exists() {
                info!(path = %dest.display(), "particle file already present; not overwriting");
            } else {
                let src = self
                    .input
                    .input_particle_file
                    .as_deref()
                    .ok_or(impact_core::InputError::MissingParticleFile)?;
                let count = self.input.header.int("Np").max(0) as usize;
                let staged = stage_particles(src, &dest, count)?;
                debug!(src = %src.display(), count = staged, "staged input particles");
            }
        }
        Ok(())
    }

    /// The command line: `[bin]`, or `[mpi_exe, "-n", Npcol*Nprow, bin]`
    /// with MPI. Optionally written to the `run` file in the workspace.
    pub fn run_script(&self, write: bool) -> Result<Vec<String>, RunError> {
        let expanded = expand_env(&self.config.impact_bin);
        if expanded.trim().is_empty() {
            return Err(RunError::MissingExecutable);
        }
        let mut bin = PathBuf::from(expanded.trim());
        if bin.is_relative() {
            let cwd = std::env::current_dir().map_err(|e| RunError::workspace(".", e))?;
            bin = cwd.join(bin);
        }
        let bin = bin.to_string_lossy().to_string();
        let cmd = if self.config.use_mpi {
            vec![
                self.config.mpi_exe.clone(),
                "-n".to_string(),
                self.input.header.process_count().to_string(),
                bin,
            ]
        } else {
            vec![bin]
        };
        if write {
            let dir = self.path().ok_or(RunError::NoWorkspace)?;
            let path = dir.join(RUN_SCRIPT_FILENAME);
            impact_core::fsutil::atomic_write_bytes(&path, format!("{}\n", command_line(&cmd)).as_bytes())
                .map_err(|e| RunError::workspace(&path, e))?;
        }
        Ok(cmd)
    }

    pub fn load_output(&mut self) -> Result<(), RunError> {
        let dir = self.path().ok_or(RunError::NoWorkspace)?;
        self.output = output::load_output(dir)?;
        debug!(stats = self.output.stats.len(), slices = self.output.slice_info.len(), "loaded output");
        Ok(())
    }

    pub fn load_particles(&mut self) -> Result<(), RunError> {
        let dir = self.path().ok_or(RunError::NoWorkspace)?;
        self.particles = output::load_particles(dir, &self.input.lattice)?;
        debug!(groups = self.particles.len(), "loaded particles");
        Ok(())
    }

    /// Sets `"header:<key>"` or `"<element>:<key>"`. Duplicate element
    /// names resolve to the last element with that name.
    pub fn set_property(&mut self, property: &str, value: f64) -> Result<(), RunError> {
        let (target, key) = property
            .split_once(':')
            .ok_or_else(|| PropertyError::MalformedKey(property.to_string()))?;
        if target.is_empty() || key.is_empty() {
            return Err(PropertyError::MalformedKey(property.to_string()).into());
        }
        if target == "header" {
            self.input.header.set(key, value);
            return Ok(());
        }
        if self.index.position(target).is_none() {
            self.index = ElementIndex::build(&self.input.lattice);
        }
        let element = self
            .index
            .get_mut(&mut self.input.lattice, target)
            .ok_or_else(|| PropertyError::UnknownElement(target.to_string()))?;
        element.set(key, value)?;
        Ok(())
    }

    /// `Bcurr / Bfreq`, or 0 when the frequency is zero.
    pub fn total_charge(&self) -> f64 {
        let header = &self.input.header;
        let freq = header.value("Bfreq");
        if freq == 0.0 {
            warn!("zero beam frequency; returning zero total charge");
            return 0.0;
        }
        header.value("Bcurr") / freq
    }

    /// Charge per macroparticle, or 0 when there are no particles.
    pub fn macrocharge(&self) -> f64 {
        let np = self.input.header.value("Np");
        if np == 0.0 {
            warn!("zero particles; returning zero macrocharge");
            return 0.0;
        }
        self.total_charge() / np
    }

    /// Identity of the run's inputs.
    pub fn fingerprint(&self) -> Result<String, RunError> {
        Ok(impact_core::fingerprint(&self.input)?)
    }

    /// Writes inputs, outputs, run info and particles to a zip archive.
    pub fn archive(&self, path: &Path) -> Result<Vec<String>, RunError> {
        let files = match &self.workspace {
            Some(ws) if ws.path().is_dir() => workspace::inventory(ws)?,
            _ => BTreeMap::new(),
        };
        let fingerprint = self.fingerprint()?;
        write_archive(
            path,
            &ArchiveContents {
                fingerprint: &fingerprint,
                input: &self.input,
                files: &files,
                output: &self.output,
                run_info: self.run_info.as_ref(),
                particles: &self.particles,
                macrocharge: self.macrocharge(),
            },
        )
    }

    /// Deletes the workspace if it is owned, or if `force` is set.
    /// Borrowed workspaces are kept with a warning. Returns whether
    /// anything was deleted.
    pub fn cleanup(&mut self, force: bool) -> Result<bool, RunError> {
        if self.state == RunState::Running {
            return Err(RunError::Busy);
        }
        let Some(ws) = &self.workspace else {
            return Ok(false);
        };
        if !ws.is_owned() && !force {
            warn!(path = %ws.path().display(), "workspace was supplied by the caller; leaving it in place");
            return Ok(false);
        }
        let Some(ws) = self.workspace.take() else {
            return Ok(false);
        };
        let path = ws.path().to_path_buf();
        let removed = workspace::release(ws, force).map_err(|e| RunError::workspace(path, e))?;
        if self.state == RunState::Configured {
            self.state = RunState::Unconfigured;
        }
        Ok(removed)
    }
}

impl Drop for ImpactRun {
    fn drop(&mut self) {
        if !self.config.auto_cleanup {
            if let Some(ws) = self.workspace.take() {
                ws.persist();
            }
            return;
        }
        if let Err(e) = self.cleanup(false) {
            warn!(error = %e, "workspace cleanup failed");
        }
    }
}

impl fmt::Display for ImpactRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.input.header)?;
        let path = self
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match self.state {
            RunState::Finished => write!(f, "Impact-T finished in {}", path),
            RunState::Running => write!(f, "Impact-T running in {}", path),
            RunState::Configured => write!(f, "Impact-T configured in {}", path),
            RunState::Unconfigured => write!(f, "Impact-T not configured."),
        }
    }
}
