//! # Workflow Subsystem
//!
//! Batch-job planning and execution model: typed batch descriptions, their
//! relocatable on-disk store, the job entities handed to the cluster
//! scheduler, and the per-step planner trait with its registry.

pub mod batch;
pub mod jobs;
pub mod logs;
pub mod paths;
pub mod planner;
pub mod registry;
pub mod store;

pub use batch::{CollectBatch, JobId, RunBatch, StepBatches, MAX_RUN_JOBS};
pub use jobs::{CollectJob, JobSpec, RunJob, SingleRunJobCollection, Walltime, WorkflowStep};
pub use logs::{get_log_output_from_files, JobFailureReport, JobLogOutput};
pub use paths::PathSet;
pub use planner::{StepArguments, StepContext, StepRoutines};
pub use registry::StepRegistry;
pub use store::BatchStore;
