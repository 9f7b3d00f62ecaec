use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::error;

use super::checker::Counterexample;
use super::litmus::LitmusConfig;
use super::model::Model;
use super::visualize::{HtmlVisualizer, Visualizer};
use crate::error::HarnessError;

/// How many `_N` suffixes to try before giving up on a free artifact name.
const MAX_ARTIFACT_SUFFIX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    LinearizabilityViolation,
    OrderingAnomaly,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ViolationKind::LinearizabilityViolation => write!(f, "linearizability violation"),
            ViolationKind::OrderingAnomaly => write!(f, "ordering anomaly"),
        }
    }
}

/// Persists the evidence of a violation and turns it into the error that ends
/// the run.
///
/// Every method returns a [`HarnessError`] for the caller to propagate; the
/// only question is which one. If the artifact cannot be written, that
/// failure is what comes back, since the artifact is the only record of the
/// violation.
#[derive(Debug, Clone)]
pub struct ViolationReporter<V = HtmlVisualizer> {
    dir: PathBuf,
    prefix: String,
    visualizer: V,
}

impl ViolationReporter<HtmlVisualizer> {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, prefix: S) -> Self {
        Self::with_visualizer(dir, prefix, HtmlVisualizer::new())
    }
}

impl<V: Visualizer> ViolationReporter<V> {
    pub fn with_visualizer<P: Into<PathBuf>, S: Into<String>>(dir: P, prefix: S, visualizer: V) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            visualizer,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<prefix>_violation_<round>_<YYYYMMDD>_<HHMMSS>.<ext>`, the first
    /// name tried for a violation in `round`. If that file already exists a
    /// `_1`, `_2`, ... suffix is added before the extension.
    pub fn artifact_path(&self, round: usize) -> PathBuf {
        self.candidate(round, &stamp(), 0)
    }

    fn candidate(&self, round: usize, stamp: &str, attempt: usize) -> PathBuf {
        let name = match attempt {
            0 => format!("{}_violation_{}_{}.{}", self.prefix, round, stamp, self.visualizer.extension()),
            n => format!("{}_violation_{}_{}_{}.{}", self.prefix, round, stamp, n, self.visualizer.extension()),
        };
        self.dir.join(name)
    }

    pub fn report_linearizability<M: Model>(
        &self,
        round: usize,
        model: &M,
        counterexample: &Counterexample<M::State, M::Input, M::Output>,
    ) -> HarnessError {
        match self.persist(round, model, counterexample) {
            Ok(artifact) => {
                error!(
                    kind = %ViolationKind::LinearizabilityViolation,
                    round,
                    artifact = %artifact.display(),
                    "history is not linearizable"
                );
                HarnessError::SpecificationViolation { round, artifact }
            }
            Err(err) => {
                error!(round, error = %err, "could not persist violation artifact");
                err
            }
        }
    }

    pub fn report_anomaly(&self, trial: usize, config: &LitmusConfig) -> HarnessError {
        error!(
            kind = %ViolationKind::OrderingAnomaly,
            trial,
            trials = config.trials,
            probe = %config.probe,
            reuse = %config.reuse,
            scheduler = %config.scheduler,
            "observed r1=0 && r2=0"
        );
        HarnessError::OrderingAnomaly {
            trial,
            trials: config.trials,
            probe: config.probe.to_string(),
            reuse: config.reuse.to_string(),
            scheduler: config.scheduler.to_string(),
        }
    }

    fn persist<M: Model>(
        &self,
        round: usize,
        model: &M,
        counterexample: &Counterexample<M::State, M::Input, M::Output>,
    ) -> Result<PathBuf, HarnessError> {
        let (path, file) = self.create_artifact(round)?;
        let mut writer = BufWriter::new(file);
        self.visualizer
            .render(model, counterexample, &mut writer)
            .map_err(|source| HarnessError::ArtifactPersistence { path: path.clone(), source })?;
        Ok(path)
    }

    /// Create a new artifact file. Never opens an existing one, so earlier
    /// evidence is not truncated.
    fn create_artifact(&self, round: usize) -> Result<(PathBuf, File), HarnessError> {
        fs::create_dir_all(&self.dir).map_err(|source| HarnessError::ArtifactPersistence {
            path: self.dir.clone(),
            source,
        })?;

        let stamp = stamp();
        let mut attempt = 0;
        loop {
            let path = self.candidate(round, &stamp, attempt);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(ref e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_ARTIFACT_SUFFIX => {
                    attempt += 1;
                }
                Err(source) => return Err(HarnessError::ArtifactPersistence { path, source }),
            }
        }
    }
}

fn stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}
