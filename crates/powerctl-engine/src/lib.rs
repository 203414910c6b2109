//! The power-transition Engine: queue, per-BMC limiter, retrying
//! executor pipeline, verifier, and state updater wired together behind a
//! small public surface (`Engine::start`, `start_transition`,
//! `abort_transition`, and the read paths the daemon exposes).

pub mod engine;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod state_updater;
pub mod verifier;

pub use engine::{Engine, StartTransitionRequest};
pub use error::EngineError;
pub use executor::{Executor, ExecutorError, RedfishExecutor, TaskExecutionContext};
pub use state_updater::{InventoryStateUpdater, StateUpdater};
pub use verifier::{verify, PowerStateReader, RedfishPowerStateReader, VerifyError, VerifyOutcome};
