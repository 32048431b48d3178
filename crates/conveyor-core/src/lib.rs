//! Conveyor Core
//!
//! Domain types, port traits and the `${{ }}` expression language shared by
//! the run-trigger engine, its storage adapters and its tests.

pub mod context;
pub mod error;
pub mod expr;
pub mod ids;
pub mod integration;
pub mod interpolation;
pub mod ports;
pub mod run;
pub mod user;
pub mod variables;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
