//! # Batch Planner
//!
//! The planner turns a step's declarative configuration into schedulable
//! work: run batches, one optional collect batch, and the job objects the
//! external cluster scheduler consumes.
//!
//! ## Architecture
//!
//! Every workflow step ships one implementation of [`StepRoutines`] and
//! registers it by step name (see [`crate::workflow::registry`]). The trait
//! captures the full capability set of a step:
//!
//! - `create_batches`: pure planning from step configuration
//! - `run_job`: execute one run batch, re-runnable after partial failures
//! - `collect_job_output`: fuse per-job outputs, exactly once, post-barrier
//! - `delete_previous_job_output`: wipe the previous generation before a
//!   re-run
//!
//! Shared services (directories, batch persistence, command construction,
//! job factories, log discovery) live in [`StepContext`], so step
//! implementations stay focused on their own semantics.

use crate::error::Result;
use crate::workflow::batch::{CollectBatch, JobId, RunBatch, StepBatches};
use crate::workflow::jobs::{
    CollectJob, JobSpec, RunJob, SingleRunJobCollection, Walltime, WorkflowStep,
};
use crate::workflow::logs::{get_log_output_from_files, JobLogOutput};
use crate::workflow::store::BatchStore;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Declarative configuration of one step execution, as parsed from the
/// submission description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepArguments(pub IndexMap<String, serde_json::Value>);

impl StepArguments {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }
}

/// Shared planner services for one step of one experiment.
#[derive(Debug, Clone)]
pub struct StepContext {
    experiment_id: i64,
    step_name: String,
    workflow_root: PathBuf,
    verbosity: usize,
    store: BatchStore,
}

impl StepContext {
    pub fn new(
        experiment_id: i64,
        step_name: impl Into<String>,
        workflow_root: impl Into<PathBuf>,
        verbosity: usize,
    ) -> Self {
        let step_name = step_name.into();
        let workflow_root = workflow_root.into();
        let store = BatchStore::new(&workflow_root, &step_name);
        Self {
            experiment_id,
            step_name,
            workflow_root,
            verbosity,
            store,
        }
    }

    pub fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn workflow_root(&self) -> &Path {
        &self.workflow_root
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    /// Directory holding all data of this step. Created on first use.
    pub fn step_location(&self) -> Result<PathBuf> {
        self.ensure_dir(self.workflow_root.join(&self.step_name))
    }

    /// Directory the scheduler writes job logs into. Created on first use.
    pub fn log_location(&self) -> Result<PathBuf> {
        self.ensure_dir(self.workflow_root.join(&self.step_name).join("log"))
    }

    /// Directory holding the step's batch files. Created on first use.
    pub fn batches_location(&self) -> Result<PathBuf> {
        self.ensure_dir(self.store.batches_dir().to_path_buf())
    }

    fn ensure_dir(&self, dir: PathBuf) -> Result<PathBuf> {
        fs::create_dir_all(&dir).map_err(|e| crate::error::Error::io(&dir, e))?;
        Ok(dir)
    }

    /// Command tokens invoking one run job of this step.
    pub fn build_run_command(&self, job_id: JobId) -> Vec<String> {
        let mut command = vec![self.step_name.clone()];
        command.extend(std::iter::repeat("-v".to_string()).take(self.verbosity));
        command.push(self.experiment_id.to_string());
        command.push("run".to_string());
        command.push("--job".to_string());
        command.push(job_id.to_string());
        command
    }

    /// Command tokens invoking the collect job of this step.
    pub fn build_collect_command(&self) -> Vec<String> {
        let mut command = vec![self.step_name.clone()];
        command.extend(std::iter::repeat("-v".to_string()).take(self.verbosity));
        command.push(self.experiment_id.to_string());
        command.push("collect".to_string());
        command
    }

    /// Create the workflow step entity. Pure construction.
    pub fn create_step(&self, submission_id: i64) -> WorkflowStep {
        debug!(submission_id, step = %self.step_name, "create workflow step");
        WorkflowStep::new(&self.step_name, submission_id)
    }

    /// Create the jobs of the parallel run phase.
    ///
    /// Resource overrides are applied only when present; `cores` must be
    /// positive when given.
    pub fn create_run_jobs(
        &self,
        submission_id: i64,
        job_ids: &[JobId],
        duration: Option<Walltime>,
        memory_mb: Option<u64>,
        cores: Option<u32>,
    ) -> Result<SingleRunJobCollection> {
        info!(submission_id, count = job_ids.len(), "create run jobs");
        let log_location = self.log_location()?;
        let mut collection = SingleRunJobCollection::new(&self.step_name, submission_id);
        for &job_id in job_ids {
            let mut spec = JobSpec::new(
                &self.step_name,
                submission_id,
                self.build_run_command(job_id),
                &log_location,
            );
            if let Some(duration) = duration {
                spec.requested_walltime = Some(duration);
            }
            if let Some(memory_mb) = memory_mb {
                spec.requested_memory_mb = Some(memory_mb);
            }
            if let Some(cores) = cores {
                spec.request_cores(cores)?;
            }
            collection.add(RunJob { job_id, spec })?;
        }
        Ok(collection)
    }

    /// Create the single collect-phase job with its default resources.
    pub fn create_collect_job(&self, submission_id: i64) -> Result<CollectJob> {
        info!(submission_id, "create collect job");
        let spec = JobSpec::new(
            &self.step_name,
            submission_id,
            self.build_collect_command(),
            self.log_location()?,
        );
        Ok(CollectJob::new(spec))
    }

    /// Read the most recent log output of a job; `None` addresses the
    /// collect job. A missing log is reported to the caller but is not
    /// fatal to the step.
    pub fn log_output(&self, job_id: Option<JobId>) -> Result<JobLogOutput> {
        let log_dir = self.workflow_root.join(&self.step_name).join("log");
        get_log_output_from_files(&log_dir, &self.step_name, job_id)
    }
}

/// The capability set every workflow step implements.
#[async_trait]
pub trait StepRoutines: Send + Sync {
    /// Shared planner services for this step.
    fn context(&self) -> &StepContext;

    /// Plan the step: derive run batches and the optional collect batch
    /// from the step configuration. Must not touch the filesystem beyond
    /// resolving declared input paths.
    async fn create_batches(&self, args: &StepArguments) -> Result<StepBatches>;

    /// Execute one run batch. Implementations must be safe to re-run with
    /// respect to their own declared outputs, since jobs are resubmitted
    /// after partial cluster failures.
    async fn run_job(&self, batch: &RunBatch) -> Result<()>;

    /// Fuse per-job outputs into the step's final outputs. Runs exactly
    /// once per step, after every run job succeeded. Applies the batch's
    /// `removals` to delete intermediate inputs.
    async fn collect_job_output(&self, batch: &CollectBatch) -> Result<()>;

    /// Wipe the outputs of the previous submission so that at most one
    /// generation of step output is alive.
    async fn delete_previous_job_output(&self) -> Result<()>;

    /// Initialize the step: drop the previous generation, plan, and persist
    /// the batch files. Fails fast on description errors, before anything
    /// reaches the cluster.
    async fn initialize(&self, args: &StepArguments) -> Result<StepBatches> {
        info!(step = %self.context().step_name(), "initialize step");
        self.delete_previous_job_output().await?;
        let batches = self.create_batches(args).await?;
        self.context().batches_location()?;
        self.context().store().write(&batches)?;
        Ok(batches)
    }
}
