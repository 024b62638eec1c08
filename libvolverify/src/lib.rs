//! # libvolverify: volume filesystem-type lifecycle verification
//!
//! `libvolverify` drives dynamically provisioned volumes through create,
//! attach, verify and teardown, and checks that the filesystem type requested
//! in a storage class is the one a workload actually sees, that the default
//! applies when none is requested, and that an unsupported type fails to
//! mount for the right reason.  The cluster is reached only through the
//! traits in [`api`], so the same workflow runs against a real cluster
//! adapter or the simulated [`backend::memory::MemoryCluster`].
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: storage classes, claims, volumes, workloads, events. |
//! | [`error`] | [`VerifyError`], [`ApiError`] and their step-level details. |
//! | [`api`] | Collaborator traits, combined into [`Cluster`]. |
//! | [`config`] | [`VerifyConfig`]: sizes, names, commands, timeouts. |
//! | [`context`] | [`VerifyContext`] handed to every workflow step. |
//! | [`wait`] | Bounded polling with strict deadlines. |
//! | [`provisioner`] | Storage class + claim creation, wait for bind. |
//! | [`attacher`] | Pinned workload creation, wait for running, attach check. |
//! | [`verifier`] | Read the filesystem type back from inside the workload. |
//! | [`classifier`] | Confirm an expected mount failure from events. |
//! | [`teardown`] | Ordered, idempotent release of scenario resources. |
//! | [`scenario`] | Scenario state machine and suite runner. |
//! | [`logging`] | `tracing-subscriber` setup for harness binaries. |
//! | [`backend`] | Simulated cluster implementations. |

pub mod api;
pub mod attacher;
pub mod backend;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod provisioner;
pub mod scenario;
pub mod teardown;
pub mod types;
pub mod verifier;
pub mod wait;

pub use api::Cluster;
pub use config::VerifyConfig;
pub use context::VerifyContext;
pub use error::{ApiError, VerifyError};
pub use scenario::{Scenario, ScenarioResult, SuiteReport, Verdict, run_scenario, run_suite};
pub use types::*;
