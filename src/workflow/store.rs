//! # Batch Store
//!
//! Persists batch descriptions as relocatable JSON files in a step-local
//! directory. All paths under `"inputs"` and `"outputs"` are written
//! relative to the workflow root and rehydrated to absolute paths on load,
//! so an experiment directory can be moved or mounted elsewhere without
//! invalidating its job descriptions.
//!
//! File layout per step:
//!
//! ```text
//! <workflow root>/<step>/batches/<step>_run_000001.batch.json
//! <workflow root>/<step>/batches/<step>_collect.batch.json
//! ```

use crate::error::{Error, Result};
use crate::workflow::batch::{CollectBatch, JobId, RunBatch, StepBatches};
use crate::workflow::paths::{absolutize, relativize, PathSet};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads and writes the batch files of one workflow step.
#[derive(Debug, Clone)]
pub struct BatchStore {
    step_name: String,
    workflow_root: PathBuf,
    batches_dir: PathBuf,
}

impl BatchStore {
    pub fn new(workflow_root: impl Into<PathBuf>, step_name: impl Into<String>) -> Self {
        let workflow_root = workflow_root.into();
        let step_name = step_name.into();
        let batches_dir = workflow_root.join(&step_name).join("batches");
        Self {
            step_name,
            workflow_root,
            batches_dir,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn workflow_root(&self) -> &Path {
        &self.workflow_root
    }

    pub fn batches_dir(&self) -> &Path {
        &self.batches_dir
    }

    /// Absolute path of the batch file describing run job `job_id`.
    pub fn run_batch_filename(&self, job_id: JobId) -> PathBuf {
        self.batches_dir
            .join(format!("{}_run_{job_id:06}.batch.json", self.step_name))
    }

    /// Absolute path of the batch file describing the collect job.
    pub fn collect_batch_filename(&self) -> PathBuf {
        self.batches_dir
            .join(format!("{}_collect.batch.json", self.step_name))
    }

    /// Write all batch files for a step, making every path relative to the
    /// workflow root first.
    pub fn write(&self, batches: &StepBatches) -> Result<()> {
        fs::create_dir_all(&self.batches_dir).map_err(|e| Error::io(&self.batches_dir, e))?;
        for batch in &batches.run {
            let relocated = RunBatch {
                id: batch.id,
                inputs: self.relativize_map(&batch.inputs)?,
                outputs: self.relativize_map(&batch.outputs)?,
            };
            let filename = self.run_batch_filename(batch.id);
            debug!(file = %filename.display(), "write run batch");
            self.write_json(&filename, &relocated)?;
        }
        if let Some(collect) = &batches.collect {
            let relocated = CollectBatch {
                inputs: self.relativize_map(&collect.inputs)?,
                outputs: self.relativize_map(&collect.outputs)?,
                removals: collect.removals.clone(),
            };
            let filename = self.collect_batch_filename();
            debug!(file = %filename.display(), "write collect batch");
            self.write_json(&filename, &relocated)?;
        }
        Ok(())
    }

    /// Read the batch description of one run job, rehydrating paths.
    pub fn read_run(&self, job_id: JobId) -> Result<RunBatch> {
        let filename = self.run_batch_filename(job_id);
        let batch: RunBatch = self.read_json(&filename)?;
        Ok(RunBatch {
            id: batch.id,
            inputs: self.absolutize_map(&batch.inputs)?,
            outputs: self.absolutize_map(&batch.outputs)?,
        })
    }

    /// Read the collect batch description, rehydrating paths.
    pub fn read_collect(&self) -> Result<CollectBatch> {
        let filename = self.collect_batch_filename();
        let batch: CollectBatch = self.read_json(&filename)?;
        Ok(CollectBatch {
            inputs: self.absolutize_map(&batch.inputs)?,
            outputs: self.absolutize_map(&batch.outputs)?,
            removals: batch.removals,
        })
    }

    /// Read every batch file of the step.
    ///
    /// Fails with a job description error when no run batch files exist,
    /// which means the step was never initialized.
    pub fn read_all(&self) -> Result<StepBatches> {
        let run_prefix = format!("{}_run_", self.step_name);
        let mut run_files: Vec<PathBuf> = match fs::read_dir(&self.batches_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(&run_prefix) && n.ends_with(".batch.json"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        if run_files.is_empty() {
            return Err(Error::JobDescription("No batch files found.".to_string()));
        }
        // Zero-padded ids make the lexicographic order the job id order.
        run_files.sort();

        let mut run = Vec::with_capacity(run_files.len());
        for file in &run_files {
            let batch: RunBatch = self.read_json(file)?;
            run.push(RunBatch {
                id: batch.id,
                inputs: self.absolutize_map(&batch.inputs)?,
                outputs: self.absolutize_map(&batch.outputs)?,
            });
        }
        let collect = if self.collect_batch_filename().exists() {
            Some(self.read_collect()?)
        } else {
            None
        };
        StepBatches::new(run, collect)
    }

    /// All input files required by the run phase, flattened to one list.
    pub fn list_input_files(&self, batches: &StepBatches) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for batch in &batches.run {
            for value in batch.inputs.values() {
                value.flatten_into(&mut files);
            }
        }
        files
    }

    /// All output files produced by the step, including the collect phase,
    /// flattened to one list.
    pub fn list_output_files(&self, batches: &StepBatches) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for batch in &batches.run {
            for value in batch.outputs.values() {
                value.flatten_into(&mut files);
            }
        }
        if let Some(collect) = &batches.collect {
            for value in collect.outputs.values() {
                value.flatten_into(&mut files);
            }
        }
        files
    }

    fn relativize_map(
        &self,
        map: &IndexMap<String, PathSet>,
    ) -> Result<IndexMap<String, PathSet>> {
        let mut relocated = IndexMap::with_capacity(map.len());
        for (name, value) in map {
            relocated.insert(
                name.clone(),
                value.rewrite(&|p| relativize(p, &self.workflow_root))?,
            );
        }
        Ok(relocated)
    }

    fn absolutize_map(
        &self,
        map: &IndexMap<String, PathSet>,
    ) -> Result<IndexMap<String, PathSet>> {
        let mut relocated = IndexMap::with_capacity(map.len());
        for (name, value) in map {
            relocated.insert(
                name.clone(),
                value.rewrite(&|p| Ok(absolutize(p, &self.workflow_root)))?,
            );
        }
        Ok(relocated)
    }

    fn write_json<T: serde::Serialize>(&self, filename: &Path, value: &T) -> Result<()> {
        let payload = serde_json::to_vec_pretty(value)?;
        fs::write(filename, payload).map_err(|e| Error::io(filename, e))
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, filename: &Path) -> Result<T> {
        let raw = fs::read_to_string(filename).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(filename.to_path_buf()),
            _ => Error::io(filename, e),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::paths::PathSet;

    fn sample_batches(root: &Path) -> StepBatches {
        let mut inputs = IndexMap::new();
        inputs.insert(
            "sites".to_string(),
            PathSet::Many(vec![root.join("raw/site_01.png")]),
        );
        let mut outputs = IndexMap::new();
        outputs.insert(
            "aligned".to_string(),
            PathSet::Many(vec![root.join("align/site_01.png")]),
        );
        let run = vec![RunBatch {
            id: 1,
            inputs,
            outputs,
        }];

        let mut collect_inputs = IndexMap::new();
        collect_inputs.insert(
            "aligned".to_string(),
            PathSet::Many(vec![root.join("align/site_01.png")]),
        );
        let mut collect_outputs = IndexMap::new();
        collect_outputs.insert(
            "fused".to_string(),
            PathSet::Many(vec![root.join("align/fused.png")]),
        );
        let collect = CollectBatch {
            inputs: collect_inputs,
            outputs: collect_outputs,
            removals: Some(vec!["aligned".to_string()]),
        };
        StepBatches::new(run, Some(collect)).unwrap()
    }

    #[test]
    fn test_round_trip_restores_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "align");
        let batches = sample_batches(dir.path());

        store.write(&batches).unwrap();
        let loaded = store.read_all().unwrap();
        assert_eq!(loaded, batches);
    }

    #[test]
    fn test_paths_are_relative_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "align");
        store.write(&sample_batches(dir.path())).unwrap();

        let raw = fs::read_to_string(store.run_batch_filename(1)).unwrap();
        assert!(raw.contains("raw/site_01.png"));
        assert!(!raw.contains(dir.path().to_str().unwrap()));
    }

    #[test]
    fn test_filenames_are_zero_padded() {
        let store = BatchStore::new("/data/exp_1", "align");
        assert!(store
            .run_batch_filename(42)
            .ends_with("align/batches/align_run_000042.batch.json"));
        assert!(store
            .collect_batch_filename()
            .ends_with("align/batches/align_collect.batch.json"));
    }

    #[test]
    fn test_missing_run_batch_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "align");
        assert!(matches!(store.read_run(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_read_all_without_batches_is_a_description_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "align");
        assert!(matches!(
            store.read_all(),
            Err(Error::JobDescription(_))
        ));
    }

    #[test]
    fn test_list_files_flatten_all_containers() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "align");
        let batches = sample_batches(dir.path());

        let inputs = store.list_input_files(&batches);
        assert_eq!(inputs, vec![dir.path().join("raw/site_01.png")]);

        let outputs = store.list_output_files(&batches);
        assert_eq!(
            outputs,
            vec![
                dir.path().join("align/site_01.png"),
                dir.path().join("align/fused.png"),
            ]
        );
    }

    #[test]
    fn test_empty_run_list_yields_empty_file_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path(), "align");
        let batches = StepBatches::new(vec![], None).unwrap();
        assert!(store.list_input_files(&batches).is_empty());
        assert!(store.list_output_files(&batches).is_empty());
    }
}
