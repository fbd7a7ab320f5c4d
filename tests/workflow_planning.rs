//! End-to-end planning scenario: a step discovers work units, persists its
//! batch descriptions, and produces the job objects handed to the cluster
//! scheduler. No database involved; the workflow subsystem is filesystem
//! only.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tessella_core::workflow::{
    BatchStore, CollectBatch, JobFailureReport, PathSet, RunBatch, StepBatches, StepContext,
    Walltime,
};

fn plan_alignment(root: &Path, sites: u32) -> StepBatches {
    let run = (1..=sites)
        .map(|id| {
            let mut inputs = IndexMap::new();
            inputs.insert(
                "site".to_string(),
                PathSet::Many(vec![root.join(format!("raw/site_{id:02}.png"))]),
            );
            let mut outputs = IndexMap::new();
            outputs.insert(
                "aligned".to_string(),
                PathSet::Many(vec![root.join(format!("align/site_{id:02}.png"))]),
            );
            RunBatch { id, inputs, outputs }
        })
        .collect();

    let mut collect_inputs = IndexMap::new();
    collect_inputs.insert(
        "aligned".to_string(),
        PathSet::Many(
            (1..=sites)
                .map(|id| root.join(format!("align/site_{id:02}.png")))
                .collect(),
        ),
    );
    let mut collect_outputs = IndexMap::new();
    collect_outputs.insert(
        "overview".to_string(),
        PathSet::Many(vec![root.join("align/overview.png")]),
    );
    StepBatches::new(
        run,
        Some(CollectBatch {
            inputs: collect_inputs,
            outputs: collect_outputs,
            removals: Some(vec!["aligned".to_string()]),
        }),
    )
    .unwrap()
}

#[test]
fn planning_four_sites_yields_four_run_jobs_and_one_collect_job() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = StepContext::new(7, "align", dir.path(), 1);
    let batches = plan_alignment(dir.path(), 4);

    assert_eq!(batches.run_count(), 4);
    assert_eq!(batches.job_ids(), vec![1, 2, 3, 4]);

    ctx.store().write(&batches).unwrap();
    let loaded = ctx.store().read_all().unwrap();
    assert_eq!(loaded, batches);

    let jobs = ctx
        .create_run_jobs(42, &batches.job_ids(), None, Some(2000), None)
        .unwrap();
    assert_eq!(jobs.len(), 4);
    let third = jobs.get(3).unwrap();
    assert_eq!(
        third.spec.arguments,
        vec!["align", "-v", "7", "run", "--job", "3"]
    );
    assert_eq!(third.spec.requested_memory_mb, Some(2000));
    assert_eq!(third.spec.requested_walltime, None);

    let collect = ctx.create_collect_job(42).unwrap();
    assert_eq!(collect.spec.arguments, vec!["align", "-v", "7", "collect"]);
    assert_eq!(
        collect.spec.requested_walltime,
        Some(Walltime::from_hms(2, 0, 0))
    );
    assert_eq!(collect.spec.requested_memory_mb, Some(3800));
    assert_eq!(collect.spec.requested_cores, Some(1));
}

#[test]
fn batch_files_survive_relocation_of_the_workflow_root() -> anyhow::Result<()> {
    let old_root = tempfile::tempdir()?;
    let batches = plan_alignment(old_root.path(), 2);
    BatchStore::new(old_root.path(), "align").write(&batches)?;

    // Move the whole experiment directory, as a mount change would.
    let new_root = tempfile::tempdir()?;
    let moved = new_root.path().join("exp");
    copy_tree(old_root.path(), &moved);

    let loaded = BatchStore::new(&moved, "align").read_all()?;
    let first_input = loaded.run[0].inputs["site"].flatten();
    assert_eq!(first_input, vec![moved.join("raw/site_01.png")]);
    Ok(())
}

#[test]
fn failed_job_output_lands_in_its_own_logs_and_is_selected() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = StepContext::new(7, "align", dir.path(), 0);
    let log_dir = ctx.log_location().unwrap();

    let report = JobFailureReport {
        step_name: "align".to_string(),
        job_id: Some(2),
        stdout: "loaded 4 sites".to_string(),
        stderr: "".to_string(),
        error: "registration did not converge".to_string(),
    };
    report.write_to_log_files(&log_dir).unwrap();

    let log = ctx.log_output(Some(2)).unwrap();
    assert_eq!(log.stdout, "loaded 4 sites");
    assert!(log.stderr.contains("registration did not converge"));

    // Other jobs of the step are unaffected.
    assert!(ctx.log_output(Some(1)).is_err());
}

fn copy_tree(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target: PathBuf = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}
