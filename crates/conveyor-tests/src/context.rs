//! PostgreSQL-backed test context.

use crate::containers::PostgresContainer;
use conveyor_db::{Database, PgAuthorizer, PgStore};

/// A migrated database in a throwaway container.
///
/// Drop this to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl TestContext {
    pub async fn postgres_only() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string(), 5).await?;
        db.migrate().await?;

        Ok(Self { postgres, db })
    }

    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }

    pub fn store(&self) -> PgStore {
        PgStore::new(self.db.pool().clone())
    }

    pub fn authorizer(&self) -> PgAuthorizer {
        PgAuthorizer::new(self.db.pool().clone())
    }
}
