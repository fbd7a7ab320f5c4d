#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tessella Core
//!
//! Execution backbone of a distributed scientific image-analysis platform.
//!
//! ## Overview
//!
//! Tessella Core turns a declared processing step into a set of
//! independently schedulable compute jobs and persists all derived data in
//! a multi-tenant, horizontally sharded relational store keyed by
//! experiment. The actual cluster scheduler and the per-module analysis
//! code are external collaborators: this crate produces job descriptions
//! and resource requests for the former and prepared input and output paths
//! for the latter.
//!
//! ## Architecture
//!
//! Two subsystems carry the hard engineering:
//!
//! - [`workflow`] - the batch-job planning model. A step's declarative
//!   configuration becomes many parallel "run" jobs plus one "collect" job;
//!   their descriptions are serialized as relocatable JSON files and
//!   rehydrated on the worker side.
//! - [`storage`] - the sharded storage-access layer. One private schema per
//!   experiment, transactional sessions with idempotent inserts under
//!   concurrent writers, raw autocommit connections for DDL, and manual
//!   range-partition management for distributed tables.
//!
//! The [`models`] layer defines the entities both subsystems persist, and
//! the ambient modules ([`config`], [`logging`], [`error`]) carry the
//! process-level concerns.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tessella_core::config::CoreConfig;
//! use tessella_core::storage::{DatabaseEngines, ExperimentSession};
//! use tessella_core::models::Channel;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::load_from_file("config/tessella.yaml")?;
//! let engines = DatabaseEngines::new(&config.database)?;
//!
//! // First access creates schema "experiment_7", its tables, and the
//! // shard ranges of its distributed tables.
//! let mut session = ExperimentSession::begin(&engines, 7).await?;
//! let channel = session.get_or_create::<Channel>(&"DAPI".to_string()).await?;
//! println!("channel id: {}", channel.into_inner().id);
//! session.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Run jobs execute as independent OS processes on cluster nodes, each with
//! its own sessions and a pool sized for its role (workers pin the pool to
//! one connection). The collect job runs exactly once, after the external
//! scheduler's barrier. The only place concurrent writers are expected to
//! collide is the idempotent `get_or_create`.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;
pub mod workflow;

pub use config::CoreConfig;
pub use error::{Error, Result};
pub use logging::init_structured_logging;
