//! # Job and WorkflowStep Entities
//!
//! Submission-time views over batch descriptions: a [`RunJob`] per run
//! batch, at most one [`CollectJob`] per step, grouped under a
//! [`WorkflowStep`]. These are one-shot immutable descriptions handed to the
//! external cluster scheduler. Job state (queued, running, done, failed) is
//! owned by the scheduler; nothing here transitions.
//!
//! Resource fields are requests, not guarantees. Absent requests fall back
//! to whatever the scheduler defaults to.

use crate::error::{Error, Result};
use crate::workflow::batch::JobId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Wall-clock allocation for a job, rendered as `HH:MM:SS` at the scheduler
/// interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Walltime(Duration);

impl Walltime {
    pub fn from_hms(hours: u64, minutes: u64, seconds: u64) -> Self {
        Walltime(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.as_secs();
        write!(f, "{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}

impl FromStr for Walltime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidArgument(format!(
                "walltime must be HH:MM:SS, got \"{s}\""
            )));
        }
        let parse = |part: &str| {
            part.parse::<u64>().map_err(|_| {
                Error::InvalidArgument(format!("walltime must be HH:MM:SS, got \"{s}\""))
            })
        };
        Ok(Walltime::from_hms(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

impl Serialize for Walltime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Walltime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Fields shared by every schedulable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub step_name: String,
    pub submission_id: i64,
    /// Ordered command tokens handed to the scheduler as the job's
    /// executable invocation.
    pub arguments: Vec<String>,
    /// Directory the scheduler writes the job's log files into.
    pub output_dir: PathBuf,
    pub requested_walltime: Option<Walltime>,
    pub requested_memory_mb: Option<u64>,
    pub requested_cores: Option<u32>,
}

impl JobSpec {
    pub fn new(
        step_name: impl Into<String>,
        submission_id: i64,
        arguments: Vec<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            submission_id,
            arguments,
            output_dir: output_dir.into(),
            requested_walltime: None,
            requested_memory_mb: None,
            requested_cores: None,
        }
    }

    /// Request CPU cores. Zero is rejected; the scheduler treats core counts
    /// as strictly positive.
    pub fn request_cores(&mut self, cores: u32) -> Result<()> {
        if cores == 0 {
            return Err(Error::InvalidArgument(
                "The value of \"cores\" must be positive.".to_string(),
            ));
        }
        self.requested_cores = Some(cores);
        Ok(())
    }
}

/// A job of the parallel run phase, tied 1:1 to the run batch with the same
/// id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunJob {
    pub job_id: JobId,
    #[serde(flatten)]
    pub spec: JobSpec,
}

/// The single job of the collect phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectJob {
    #[serde(flatten)]
    pub spec: JobSpec,
}

/// Default walltime allocated to a collect job.
pub const COLLECT_DEFAULT_WALLTIME: (u64, u64, u64) = (2, 0, 0);
/// Default memory in megabytes allocated to a collect job.
pub const COLLECT_DEFAULT_MEMORY_MB: u64 = 3800;
/// Default core count allocated to a collect job.
pub const COLLECT_DEFAULT_CORES: u32 = 1;

impl CollectJob {
    /// Build a collect job with the default resource request.
    pub fn new(spec: JobSpec) -> Self {
        let (h, m, s) = COLLECT_DEFAULT_WALLTIME;
        let mut spec = spec;
        spec.requested_walltime = Some(Walltime::from_hms(h, m, s));
        spec.requested_memory_mb = Some(COLLECT_DEFAULT_MEMORY_MB);
        spec.requested_cores = Some(COLLECT_DEFAULT_CORES);
        Self { spec }
    }
}

/// The ordered set of run jobs for one step and submission.
///
/// Membership is keyed by `job_id`; insertion order is preserved and
/// duplicate ids are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleRunJobCollection {
    pub step_name: String,
    pub submission_id: i64,
    jobs: IndexMap<JobId, RunJob>,
}

impl SingleRunJobCollection {
    pub fn new(step_name: impl Into<String>, submission_id: i64) -> Self {
        Self {
            step_name: step_name.into(),
            submission_id,
            jobs: IndexMap::new(),
        }
    }

    pub fn add(&mut self, job: RunJob) -> Result<()> {
        if job.spec.step_name != self.step_name {
            return Err(Error::InvalidArgument(format!(
                "job belongs to step \"{}\", collection to \"{}\"",
                job.spec.step_name, self.step_name
            )));
        }
        if self.jobs.contains_key(&job.job_id) {
            return Err(Error::InvalidArgument(format!(
                "duplicate run job id {}",
                job.job_id
            )));
        }
        self.jobs.insert(job.job_id, job);
        Ok(())
    }

    pub fn get(&self, job_id: JobId) -> Option<&RunJob> {
        self.jobs.get(&job_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunJob> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// One execution of one named step within one submission. Owns zero or more
/// run jobs and at most one collect job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub submission_id: i64,
    pub run_jobs: Option<SingleRunJobCollection>,
    pub collect_job: Option<CollectJob>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, submission_id: i64) -> Self {
        Self {
            name: name.into(),
            submission_id,
            run_jobs: None,
            collect_job: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(step: &str, id: i64) -> JobSpec {
        JobSpec::new(step, id, vec![step.to_string()], "/data/exp_1/align/log")
    }

    #[test]
    fn test_walltime_renders_hh_mm_ss() {
        assert_eq!(Walltime::from_hms(2, 0, 0).to_string(), "02:00:00");
        assert_eq!(Walltime::from_hms(0, 5, 7).to_string(), "00:05:07");
        assert_eq!(Walltime::from_hms(100, 0, 1).to_string(), "100:00:01");
    }

    #[test]
    fn test_walltime_parses_and_round_trips() {
        let wt: Walltime = "12:30:00".parse().unwrap();
        assert_eq!(wt, Walltime::from_hms(12, 30, 0));
        assert!("90m".parse::<Walltime>().is_err());
        assert!("1:2".parse::<Walltime>().is_err());

        let json = serde_json::to_string(&wt).unwrap();
        assert_eq!(json, "\"12:30:00\"");
        let back: Walltime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wt);
    }

    #[test]
    fn test_zero_cores_rejected() {
        let mut spec = spec("align", 1);
        assert!(matches!(
            spec.request_cores(0),
            Err(Error::InvalidArgument(_))
        ));
        spec.request_cores(4).unwrap();
        assert_eq!(spec.requested_cores, Some(4));
    }

    #[test]
    fn test_collect_job_default_resources() {
        let job = CollectJob::new(spec("align", 1));
        assert_eq!(job.spec.requested_walltime.unwrap().to_string(), "02:00:00");
        assert_eq!(job.spec.requested_memory_mb, Some(3800));
        assert_eq!(job.spec.requested_cores, Some(1));
    }

    #[test]
    fn test_collection_rejects_duplicate_ids() {
        let mut collection = SingleRunJobCollection::new("align", 1);
        collection
            .add(RunJob { job_id: 1, spec: spec("align", 1) })
            .unwrap();
        let err = collection
            .add(RunJob { job_id: 1, spec: spec("align", 1) })
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_collection_preserves_insertion_order() {
        let mut collection = SingleRunJobCollection::new("align", 1);
        for id in [3, 1, 2] {
            // Ids may be added out of numeric order; iteration order is
            // insertion order.
            collection
                .add(RunJob { job_id: id, spec: spec("align", 1) })
                .unwrap();
        }
        let order: Vec<JobId> = collection.iter().map(|j| j.job_id).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn test_collection_rejects_foreign_step() {
        let mut collection = SingleRunJobCollection::new("align", 1);
        let err = collection
            .add(RunJob { job_id: 1, spec: spec("segment", 1) })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_workflow_step_starts_empty() {
        let step = WorkflowStep::new("align", 7);
        assert!(step.run_jobs.is_none());
        assert!(step.collect_job.is_none());
    }
}
