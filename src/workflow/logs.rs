//! # Job Log Discovery and Failure Reporting
//!
//! Every job writes `<step>_<id>.out` and `<step>_<id>.err` into the step's
//! `log/` directory; the collect job uses `<step>_collect` as its base name.
//! Resubmitted jobs produce additional timestamped files for the same id, so
//! readers always pick the most recent pair.

use crate::error::{Error, Result};
use crate::workflow::batch::JobId;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Captured standard output and error of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLogOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Base name of the log files for a run job.
pub fn run_log_basename(step_name: &str, job_id: JobId) -> String {
    format!("{step_name}_{job_id:05}")
}

/// Base name of the log files for the collect job.
pub fn collect_log_basename(step_name: &str) -> String {
    format!("{step_name}_collect")
}

/// Read the log output of a job from the step's log directory.
///
/// `job_id` of `None` addresses the collect job. When several files exist
/// for the same job (resubmissions carry timestamp suffixes), the last one
/// in sorted filename order wins.
pub fn get_log_output_from_files(
    log_dir: &Path,
    step_name: &str,
    job_id: Option<JobId>,
) -> Result<JobLogOutput> {
    let basename = match job_id {
        Some(id) => run_log_basename(step_name, id),
        None => collect_log_basename(step_name),
    };
    let stdout_file = most_recent_log(log_dir, &basename, "out")?;
    let stderr_file = most_recent_log(log_dir, &basename, "err")?;
    debug!(
        stdout = %stdout_file.display(),
        stderr = %stderr_file.display(),
        "reading job log output"
    );
    Ok(JobLogOutput {
        stdout: fs::read_to_string(&stdout_file).map_err(|e| Error::io(&stdout_file, e))?,
        stderr: fs::read_to_string(&stderr_file).map_err(|e| Error::io(&stderr_file, e))?,
    })
}

fn most_recent_log(log_dir: &Path, basename: &str, extension: &str) -> Result<PathBuf> {
    let suffix = format!(".{extension}");
    let mut candidates: Vec<PathBuf> = match fs::read_dir(log_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix(basename))
                    // A dot must follow the base name, otherwise the files
                    // of a longer job id would match a shorter one.
                    .map(|rest| rest.starts_with('.') && rest.ends_with(&suffix))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    candidates.sort();
    candidates
        .pop()
        .ok_or_else(|| Error::NotFound(log_dir.join(format!("{basename}*{suffix}"))))
}

/// The failure payload of one job: captured output plus the error that
/// aborted it, packaged into a single message and written back into the
/// job's own log files.
#[derive(Debug, Clone)]
pub struct JobFailureReport {
    pub step_name: String,
    pub job_id: Option<JobId>,
    pub stdout: String,
    pub stderr: String,
    pub error: String,
}

impl JobFailureReport {
    /// Render the failure as one banner-separated message.
    pub fn message(&self) -> String {
        let job = match self.job_id {
            Some(id) => format!("run job {id}"),
            None => "collect job".to_string(),
        };
        let mut message = format!("\nExecution of {job} in step \"{}\" failed:\n", self.step_name);
        message.push_str(&banner("Job standard output"));
        message.push_str(&self.stdout);
        message.push_str(&banner("Job standard error"));
        message.push_str(&self.stderr);
        message.push_str(&banner("Error"));
        message.push_str(&self.error);
        message.push('\n');
        message
    }

    /// Write the captured output into the job's log files. Stdout keeps the
    /// captured stdout; stderr receives the full failure message so that the
    /// error is visible where operators look first.
    pub fn write_to_log_files(&self, log_dir: &Path) -> Result<()> {
        fs::create_dir_all(log_dir).map_err(|e| Error::io(log_dir, e))?;
        let basename = match self.job_id {
            Some(id) => run_log_basename(&self.step_name, id),
            None => collect_log_basename(&self.step_name),
        };
        let stdout_file = log_dir.join(format!("{basename}.out"));
        let stderr_file = log_dir.join(format!("{basename}.err"));
        fs::write(&stdout_file, &self.stdout).map_err(|e| Error::io(&stdout_file, e))?;
        fs::write(&stderr_file, self.message()).map_err(|e| Error::io(&stderr_file, e))?;
        Ok(())
    }
}

fn banner(title: &str) -> String {
    let mut line = format!("\n---[ {title} ]");
    while line.len() < 81 {
        line.push('-');
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_basenames() {
        assert_eq!(run_log_basename("align", 3), "align_00003");
        assert_eq!(collect_log_basename("align"), "align_collect");
    }

    #[test]
    fn test_most_recent_log_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("align_00001.20240101T1200.out"), "first").unwrap();
        fs::write(dir.path().join("align_00001.20240102T0900.out"), "second").unwrap();
        fs::write(dir.path().join("align_00001.20240101T1200.err"), "").unwrap();
        fs::write(dir.path().join("align_00001.20240102T0900.err"), "warn").unwrap();

        let log = get_log_output_from_files(dir.path(), "align", Some(1)).unwrap();
        assert_eq!(log.stdout, "second");
        assert_eq!(log.stderr, "warn");
    }

    #[test]
    fn test_collect_logs_are_separate_from_run_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("align_00001.out"), "run").unwrap();
        fs::write(dir.path().join("align_00001.err"), "").unwrap();
        fs::write(dir.path().join("align_collect.out"), "collect").unwrap();
        fs::write(dir.path().join("align_collect.err"), "").unwrap();

        let log = get_log_output_from_files(dir.path(), "align", None).unwrap();
        assert_eq!(log.stdout, "collect");
    }

    #[test]
    fn test_longer_job_ids_do_not_shadow_shorter_ones() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("align_10000.out"), "short id").unwrap();
        fs::write(dir.path().join("align_10000.err"), "").unwrap();
        fs::write(dir.path().join("align_100000.out"), "long id").unwrap();
        fs::write(dir.path().join("align_100000.err"), "").unwrap();

        let log = get_log_output_from_files(dir.path(), "align", Some(10000)).unwrap();
        assert_eq!(log.stdout, "short id");
    }

    #[test]
    fn test_missing_logs_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = get_log_output_from_files(dir.path(), "align", Some(9)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_failure_report_message_carries_all_sections() {
        let report = JobFailureReport {
            step_name: "align".to_string(),
            job_id: Some(2),
            stdout: "loaded 4 sites".to_string(),
            stderr: "".to_string(),
            error: "registration did not converge".to_string(),
        };
        let message = report.message();
        assert!(message.contains("run job 2"));
        assert!(message.contains("---[ Job standard output ]"));
        assert!(message.contains("loaded 4 sites"));
        assert!(message.contains("---[ Error ]"));
        assert!(message.contains("registration did not converge"));
    }

    #[test]
    fn test_failure_report_written_to_own_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = JobFailureReport {
            step_name: "align".to_string(),
            job_id: Some(2),
            stdout: "partial".to_string(),
            stderr: "oom".to_string(),
            error: "killed".to_string(),
        };
        report.write_to_log_files(dir.path()).unwrap();

        let log = get_log_output_from_files(dir.path(), "align", Some(2)).unwrap();
        assert_eq!(log.stdout, "partial");
        assert!(log.stderr.contains("killed"));
    }
}
