//! # Step Registry
//!
//! Maps step names to their [`StepRoutines`] implementations. The command
//! line and the submission builder resolve a step through this registry, so
//! adding a workflow step means implementing the trait and registering it
//! here.

use crate::error::{Error, Result};
use crate::workflow::planner::StepRoutines;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Thread-safe registry of workflow step implementations.
#[derive(Default)]
pub struct StepRegistry {
    steps: DashMap<String, Arc<dyn StepRoutines>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step implementation under its step name.
    ///
    /// Re-registering a name replaces the previous implementation, which
    /// supports test setups that swap a step for a stub.
    pub fn register(&self, step_name: impl Into<String>, routines: Arc<dyn StepRoutines>) {
        let step_name = step_name.into();
        info!(step = %step_name, "register workflow step");
        if self.steps.insert(step_name.clone(), routines).is_some() {
            debug!(step = %step_name, "replaced existing step registration");
        }
    }

    /// Resolve a step by name.
    pub fn resolve(&self, step_name: &str) -> Result<Arc<dyn StepRoutines>> {
        self.steps
            .get(step_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("no workflow step registered as \"{step_name}\""))
            })
    }

    /// Names of all registered steps, unordered.
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
