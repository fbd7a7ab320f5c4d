//! # Batch Description Model
//!
//! A workflow step is executed in two phases: a *run* phase made of many
//! parallel jobs and an optional *collect* phase made of exactly one job
//! that fuses the per-job outputs. Each phase is described by batches:
//! immutable records of the files a job reads and writes, persisted to disk
//! before submission so that jobs can be re-run after partial cluster
//! failures.
//!
//! Validation happens on assembly. A step that produces a structurally
//! invalid description fails fast at initialization time, before anything
//! is submitted to the cluster.

use crate::error::{Error, Result};
use crate::workflow::paths::PathSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// One-based identifier of a run job within one step.
pub type JobId = u32;

/// Upper bound on run jobs per step, matching the six-digit zero-padded
/// batch file names.
pub const MAX_RUN_JOBS: usize = 1_000_000;

/// Description of one unit of parallel work in the run phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBatch {
    /// One-based job identifier, dense and contiguous across the step.
    pub id: JobId,
    /// Input files required to run the job, keyed by argument name.
    pub inputs: IndexMap<String, PathSet>,
    /// Output files produced by the job, keyed by argument name.
    pub outputs: IndexMap<String, PathSet>,
}

/// Description of the single collect-phase job of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectBatch {
    pub inputs: IndexMap<String, PathSet>,
    pub outputs: IndexMap<String, PathSet>,
    /// Names of inputs that are deleted once collection succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removals: Option<Vec<String>>,
}

/// The complete validated description of one step execution.
#[derive(Debug, Clone, PartialEq)]
pub struct StepBatches {
    pub run: Vec<RunBatch>,
    pub collect: Option<CollectBatch>,
}

impl RunBatch {
    fn validate(&self) -> Result<()> {
        for (name, value) in &self.inputs {
            value.validate_input(name)?;
        }
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for (name, value) in &self.outputs {
            value.validate_output(name)?;
            for path in value.flatten() {
                if !seen.insert(path.clone()) {
                    return Err(Error::JobDescription(format!(
                        "batch {}: duplicate output path {}",
                        self.id,
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl CollectBatch {
    fn validate(&self) -> Result<()> {
        for (name, value) in &self.inputs {
            value.validate_input(name)?;
        }
        for (name, value) in &self.outputs {
            value.validate_output(name)?;
        }
        if let Some(removals) = &self.removals {
            for name in removals {
                if !self.inputs.contains_key(name) {
                    return Err(Error::JobDescription(format!(
                        "collect batch removal \"{name}\" does not name an input"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl StepBatches {
    /// Assemble and validate a step description.
    ///
    /// Run batch ids must be exactly `1..=N` in order. The planner derives
    /// filenames, log names and command lines from these ids, so a gap or a
    /// duplicate would silently orphan work.
    pub fn new(run: Vec<RunBatch>, collect: Option<CollectBatch>) -> Result<Self> {
        if run.len() > MAX_RUN_JOBS {
            return Err(Error::JobDescription(format!(
                "{} run batches exceed the limit of {MAX_RUN_JOBS}",
                run.len()
            )));
        }
        for (index, batch) in run.iter().enumerate() {
            let expected = (index + 1) as JobId;
            if batch.id != expected {
                return Err(Error::JobDescription(format!(
                    "run batch ids must be dense and one-based: expected {expected}, found {}",
                    batch.id
                )));
            }
            batch.validate()?;
        }
        if let Some(collect) = &collect {
            collect.validate()?;
        }
        Ok(Self { run, collect })
    }

    /// Number of run jobs described by this step.
    pub fn run_count(&self) -> usize {
        self.run.len()
    }

    /// The dense range of run job ids, for job creation.
    pub fn job_ids(&self) -> Vec<JobId> {
        (1..=self.run.len() as JobId).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::paths::PathSet;
    use std::path::PathBuf;

    fn outputs(paths: &[&str]) -> IndexMap<String, PathSet> {
        let mut map = IndexMap::new();
        map.insert(
            "aligned".to_string(),
            PathSet::Many(paths.iter().map(|p| PathBuf::from(*p)).collect()),
        );
        map
    }

    fn run_batch(id: JobId, out: &[&str]) -> RunBatch {
        let mut inputs = IndexMap::new();
        inputs.insert(
            "sites".to_string(),
            PathSet::Many(vec![PathBuf::from(format!("raw/site_{id:02}.png"))]),
        );
        RunBatch {
            id,
            inputs,
            outputs: outputs(out),
        }
    }

    #[test]
    fn test_dense_ids_accepted() {
        let batches = StepBatches::new(
            vec![run_batch(1, &["a1.png"]), run_batch(2, &["a2.png"])],
            None,
        )
        .unwrap();
        assert_eq!(batches.job_ids(), vec![1, 2]);
    }

    #[test]
    fn test_gap_in_ids_rejected() {
        let err = StepBatches::new(
            vec![run_batch(1, &["a1.png"]), run_batch(3, &["a3.png"])],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::JobDescription(_)));
    }

    #[test]
    fn test_zero_based_ids_rejected() {
        assert!(StepBatches::new(vec![run_batch(0, &["a0.png"])], None).is_err());
    }

    #[test]
    fn test_duplicate_output_path_rejected() {
        let err = StepBatches::new(
            vec![run_batch(1, &["same.png", "same.png"])],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate output path"));
    }

    #[test]
    fn test_scalar_output_rejected() {
        let mut batch = run_batch(1, &["a1.png"]);
        batch
            .outputs
            .insert("stats".to_string(), PathSet::Single(PathBuf::from("s.csv")));
        assert!(StepBatches::new(vec![batch], None).is_err());
    }

    #[test]
    fn test_collect_removal_must_name_an_input() {
        let mut inputs = IndexMap::new();
        inputs.insert("aligned".to_string(), PathSet::Many(vec![]));
        let collect = CollectBatch {
            inputs,
            outputs: outputs(&["fused.png"]),
            removals: Some(vec!["unknown".to_string()]),
        };
        assert!(StepBatches::new(vec![], Some(collect)).is_err());
    }

    #[test]
    fn test_empty_run_phase_is_allowed_at_assembly() {
        // Discovery of zero work units is caught later, at job creation;
        // the description itself stays well-formed.
        let batches = StepBatches::new(vec![], None).unwrap();
        assert_eq!(batches.run_count(), 0);
        assert!(batches.job_ids().is_empty());
    }

    #[test]
    fn test_collect_batch_serde_omits_absent_removals() {
        let collect = CollectBatch {
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            removals: None,
        };
        let json = serde_json::to_string(&collect).unwrap();
        assert!(!json.contains("removals"));
    }
}
