//! PostgreSQL implementation of Authorizer, backed by a grants table.

use async_trait::async_trait;
use conveyor_core::ids::UserId;
use conveyor_core::ports::{Authorizer, Resource, Role};
use conveyor_core::{Error, Result};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PgAuthorizer {
    pool: PgPool,
}

impl PgAuthorizer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Give a user a role on a project resource. Granting twice is a no-op.
    pub async fn grant(&self, user_id: UserId, project_key: &str, resource: &Resource, role: Role) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO grants (user_id, project_key, resource_kind, resource_name, role)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(user_id.as_uuid())
        .bind(project_key)
        .bind(resource.kind())
        .bind(resource.name())
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Authorizer for PgAuthorizer {
    async fn has_role(&self, user_id: UserId, project_key: &str, resource: &Resource, role: Role) -> Result<bool> {
        let row = sqlx::query(
            r#"SELECT EXISTS (
                   SELECT 1 FROM grants
                   WHERE user_id = $1 AND project_key = $2
                     AND resource_kind = $3 AND resource_name = $4 AND role = $5
               ) AS granted"#,
        )
        .bind(user_id.as_uuid())
        .bind(project_key)
        .bind(resource.kind())
        .bind(resource.name())
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.get("granted"))
    }
}
