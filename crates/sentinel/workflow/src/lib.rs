//! Case workflow orchestration for MediSentinel
//!
//! - [`WorkflowCatalog`]: fixed step orderings per workflow kind
//! - [`StepAdapter`]: the seam to the collaborator behind each step
//! - [`SessionStore`]: versioned session records, compare-and-update only
//! - [`Orchestrator`]: drives sessions, handles override and abort

#![deny(unsafe_code)]

pub mod adapter;
pub mod catalog;
pub mod config;
pub mod orchestrator;
pub mod store;

pub use adapter::{
    AdapterHealth, AdapterRegistry, FnAdapter, StaticAdapter, StepAdapter, StepContext, StepFault,
};
pub use catalog::WorkflowCatalog;
pub use config::OrchestratorConfig;
pub use orchestrator::Orchestrator;
pub use store::{InMemorySessionStore, SessionStore};
