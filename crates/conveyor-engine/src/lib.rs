//! Conveyor Engine
//!
//! Decides, each time something changes in a run, which jobs become
//! eligible, skipped or blocked, and persists their instances. Also builds
//! the execution context of queued jobs and recovers stalled runs.

pub mod assembler;
pub mod bounded;
pub mod condition;
pub mod config;
pub mod context;
pub mod dag;
pub mod gate;
pub mod matrix;
pub mod queue;
pub mod results;
pub mod secrets;
pub mod sweeper;
pub mod telemetry;
pub mod trigger;

pub use assembler::{AssembledJob, JobContextAssembler};
pub use condition::ConditionEvaluator;
pub use config::EngineConfig;
pub use context::ContextBuilder;
pub use dag::{DagError, WorkflowGraph};
pub use gate::GateEvaluator;
pub use matrix::MatrixExpander;
pub use queue::{TriggerSender, TriggerWorker, trigger_queue};
pub use secrets::SecretExtractor;
pub use sweeper::StalledRunSweeper;
pub use trigger::{TriggerEngine, TriggerHint, TriggerOutcome, TriggerRequest};
