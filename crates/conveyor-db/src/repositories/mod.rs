//! Repository implementations for PostgreSQL.

mod authorizer;
mod store;

pub use authorizer::PgAuthorizer;
pub use store::{PgStore, PgTransaction};
