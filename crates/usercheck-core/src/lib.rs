//! Integration-test harness for a remote CRUD "users" service.
//!
//! The crate drives one dependent service process through a fixed lifecycle:
//!
//! ```text
//! HarnessOrchestrator
//!     |
//!     +-- ProcessSupervisor --ensure_running--> HealthProbe
//!     |        (already running? take no ownership)
//!     |
//!     +-- DatasetReconciler --reset_collection--> UsersClient
//!     |
//!     +-- ScenarioRunner --run--> [Scenario, ...] --> UsersClient
//!     |
//!     +-- ProcessSupervisor::terminate (owned processes only)
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod reconcile;
pub mod scenario;
pub mod supervisor;

pub use config::HarnessConfig;
pub use error::HarnessError;
pub use orchestrator::{HarnessOrchestrator, HarnessReport, RunOutcome};
