//! Test infrastructure for Conveyor.
//!
//! Provides an in-memory `Store` and `Authorizer` used by the orchestrator
//! scenarios, fixtures, and testcontainers-based PostgreSQL infrastructure
//! for the `integration` feature.
//!
//! # Usage
//!
//! ```ignore
//! use conveyor_tests::TestHarness;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::new();
//!     let run = harness.start_run(WORKFLOW).unwrap();
//!     harness.trigger(&run).await.unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;
pub mod memory;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;
pub use memory::{InMemoryAuthorizer, InMemoryStore};

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,conveyor_engine=debug,conveyor_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
