//! PostgreSQL implementation of Store.

use async_trait::async_trait;
use conveyor_core::ids::{IntegrationId, RunId, RunInfoId, RunJobId, RunResultId, UserId, VariableSetId};
use conveyor_core::integration::{ConfigValueType, IntegrationConfigValue, ProjectIntegration};
use conveyor_core::ports::{Store, StoreTransaction};
use conveyor_core::run::{InfoLevel, JobStatus, Run, RunInfo, RunJob, RunResult, RunStatus, matrix_key};
use conveyor_core::user::User;
use conveyor_core::variables::{VariableSet, VariableSetItem, VariableSetItemType};
use conveyor_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use std::collections::BTreeMap;
use tracing::debug;

/// Replaces sensitive values read without decryption.
const MASKED: &str = "**********";

const RUN_COLUMNS: &str = "id, project_key, workflow_name, run_number, run_attempt, status, user_id, username, workflow, contexts, started, last_modified";

const RUN_JOB_COLUMNS: &str = "id, run_id, project_key, workflow_name, run_number, run_attempt, job_id, job, status, matrix, region, gate_inputs, user_id, username, queued, started, ended";

/// PostgreSQL implementation of Store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a run.
    pub async fn create_run(&self, run: &Run) -> Result<RunId> {
        sqlx::query(&format!(
            "INSERT INTO runs ({RUN_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(run.id.as_uuid())
        .bind(&run.project_key)
        .bind(&run.workflow_name)
        .bind(run.run_number)
        .bind(run.run_attempt)
        .bind(run.status.as_str())
        .bind(run.user_id.as_uuid())
        .bind(&run.username)
        .bind(serde_json::to_value(&run.workflow)?)
        .bind(serde_json::to_value(&run.contexts)?)
        .bind(run.started)
        .bind(run.last_modified)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(run.id)
    }

    /// Move a run job to a new status, stamping `started` or `ended`.
    pub async fn update_run_job_status(&self, id: RunJobId, status: JobStatus) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query(
            r#"UPDATE run_jobs SET status = $2,
                   started = CASE WHEN $2 = 'Building' THEN $3 ELSE started END,
                   ended = CASE WHEN $4 THEN $3 ELSE ended END
               WHERE id = $1"#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(now)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn insert_run_result(&self, result: &RunResult) -> Result<RunResultId> {
        sqlx::query(
            "INSERT INTO run_results (id, run_id, run_job_id, run_attempt, detail) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(result.id.as_uuid())
        .bind(result.run_id.as_uuid())
        .bind(result.run_job_id.as_uuid())
        .bind(result.run_attempt)
        .bind(serde_json::to_value(&result.detail)?)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.id)
    }

    /// Every info of a run, oldest first.
    pub async fn load_run_infos(&self, run_id: RunId) -> Result<Vec<RunInfo>> {
        let rows = sqlx::query(
            "SELECT id, run_id, run_job_id, level, message, issued_at FROM run_infos WHERE run_id = $1 ORDER BY issued_at, id",
        )
        .bind(run_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let level: String = r.get("level");
                Ok(RunInfo {
                    id: RunInfoId::from_uuid(r.get("id")),
                    run_id: RunId::from_uuid(r.get("run_id")),
                    run_job_id: r.get::<Option<uuid::Uuid>, _>("run_job_id").map(RunJobId::from_uuid),
                    level: level.parse::<InfoLevel>()?,
                    message: r.get("message"),
                    issued_at: r.get("issued_at"),
                })
            })
            .collect()
    }

    pub async fn create_variable_set(&self, set: &VariableSet) -> Result<VariableSetId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query("INSERT INTO variable_sets (id, project_key, name) VALUES ($1, $2, $3)")
            .bind(set.id.as_uuid())
            .bind(&set.project_key)
            .bind(&set.name)
            .execute(&mut *tx)
            .await
            .map_err(map_insert_error)?;

        for item in &set.items {
            sqlx::query(
                "INSERT INTO variable_set_items (variable_set_id, name, type, value) VALUES ($1, $2, $3, $4)",
            )
            .bind(set.id.as_uuid())
            .bind(&item.name)
            .bind(item.item_type.as_str())
            .bind(&item.value)
            .execute(&mut *tx)
            .await
            .map_err(map_insert_error)?;
        }

        tx.commit().await.map_err(|e| Error::Database(e.to_string()))?;
        Ok(set.id)
    }

    pub async fn create_integration(&self, integration: &ProjectIntegration) -> Result<IntegrationId> {
        sqlx::query(
            "INSERT INTO project_integrations (id, project_key, name, model, config) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(integration.id.as_uuid())
        .bind(&integration.project_key)
        .bind(&integration.name)
        .bind(serde_json::to_value(&integration.model)?)
        .bind(serde_json::to_value(&integration.config)?)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;
        Ok(integration.id)
    }

    pub async fn create_user(&self, user: &User) -> Result<UserId> {
        sqlx::query("INSERT INTO users (id, username, groups) VALUES ($1, $2, $3)")
            .bind(user.id.as_uuid())
            .bind(&user.username)
            .bind(&user.groups)
            .execute(&self.pool)
            .await
            .map_err(map_insert_error)?;
        Ok(user.id)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn load_run(&self, id: RunId) -> Result<Option<Run>> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(row_to_run).transpose()
    }

    async fn load_run_jobs(&self, run_id: RunId, run_attempt: i32) -> Result<Vec<RunJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_JOB_COLUMNS} FROM run_jobs WHERE run_id = $1 AND run_attempt = $2 ORDER BY queued, id"
        ))
        .bind(run_id.as_uuid())
        .bind(run_attempt)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(row_to_run_job).collect()
    }

    async fn load_run_results(&self, run_id: RunId, run_attempt: i32) -> Result<Vec<RunResult>> {
        let rows = sqlx::query(
            "SELECT id, run_id, run_job_id, run_attempt, detail FROM run_results WHERE run_id = $1 AND run_attempt = $2",
        )
        .bind(run_id.as_uuid())
        .bind(run_attempt)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|r| {
                Ok(RunResult {
                    id: RunResultId::from_uuid(r.get("id")),
                    run_id: RunId::from_uuid(r.get("run_id")),
                    run_job_id: RunJobId::from_uuid(r.get("run_job_id")),
                    run_attempt: r.get("run_attempt"),
                    detail: serde_json::from_value(r.get("detail"))?,
                })
            })
            .collect()
    }

    async fn load_variable_set(
        &self,
        project_key: &str,
        name: &str,
        with_decryption: bool,
    ) -> Result<Option<VariableSet>> {
        let Some(set) = sqlx::query("SELECT id FROM variable_sets WHERE project_key = $1 AND name = $2")
            .bind(project_key)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let id: uuid::Uuid = set.get("id");

        let rows = sqlx::query(
            "SELECT name, type, value FROM variable_set_items WHERE variable_set_id = $1 ORDER BY name",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let items = rows
            .iter()
            .map(|r| {
                let item_type: VariableSetItemType = r.get::<String, _>("type").parse()?;
                let value: String = r.get("value");
                let value = if item_type == VariableSetItemType::Secret && !with_decryption {
                    MASKED.to_string()
                } else {
                    value
                };
                Ok(VariableSetItem {
                    name: r.get("name"),
                    item_type,
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(VariableSet {
            id: VariableSetId::from_uuid(id),
            project_key: project_key.to_string(),
            name: name.to_string(),
            items,
        }))
    }

    async fn load_integration(
        &self,
        project_key: &str,
        name: &str,
        with_decryption: bool,
    ) -> Result<Option<ProjectIntegration>> {
        let row = sqlx::query(
            "SELECT id, model, config FROM project_integrations WHERE project_key = $1 AND name = $2",
        )
        .bind(project_key)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let Some(r) = row else {
            return Ok(None);
        };
        let mut config: BTreeMap<String, IntegrationConfigValue> = serde_json::from_value(r.get("config"))?;
        if !with_decryption {
            for value in config.values_mut() {
                if value.value_type == ConfigValueType::Password {
                    value.value = MASKED.to_string();
                }
            }
        }

        Ok(Some(ProjectIntegration {
            id: IntegrationId::from_uuid(r.get("id")),
            project_key: project_key.to_string(),
            name: name.to_string(),
            model: serde_json::from_value(r.get("model"))?,
            config,
        }))
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, groups FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|r| User {
            id: UserId::from_uuid(r.get("id")),
            username: r.get("username"),
            groups: r.get("groups"),
        }))
    }

    async fn load_building_runs_with_ended_jobs(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {RUN_COLUMNS} FROM runs r
               WHERE r.status = 'Building'
                 AND EXISTS (
                     SELECT 1 FROM run_jobs j
                     WHERE j.run_id = r.id AND j.run_attempt = r.run_attempt)
                 AND NOT EXISTS (
                     SELECT 1 FROM run_jobs j
                     WHERE j.run_id = r.id AND j.run_attempt = r.run_attempt
                       AND j.status NOT IN ('Success', 'Fail', 'Skipped', 'Stopped'))
               ORDER BY r.last_modified"#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(row_to_run).collect()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// A write transaction. Rolled back when dropped without commit.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert_run_job(&mut self, run_job: &RunJob) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO run_jobs ({RUN_JOB_COLUMNS}, matrix_key) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        ))
        .bind(run_job.id.as_uuid())
        .bind(run_job.run_id.as_uuid())
        .bind(&run_job.project_key)
        .bind(&run_job.workflow_name)
        .bind(run_job.run_number)
        .bind(run_job.run_attempt)
        .bind(&run_job.job_id)
        .bind(serde_json::to_value(&run_job.job)?)
        .bind(run_job.status.as_str())
        .bind(serde_json::to_value(&run_job.matrix)?)
        .bind(&run_job.region)
        .bind(serde_json::to_value(&run_job.gate_inputs)?)
        .bind(run_job.user_id.as_uuid())
        .bind(&run_job.username)
        .bind(run_job.queued)
        .bind(run_job.started)
        .bind(run_job.ended)
        .bind(matrix_key(&run_job.matrix))
        .execute(&mut *self.tx)
        .await
        .map_err(map_insert_error)?;

        debug!(run_job_id = %run_job.id, job = %run_job.job_id, status = run_job.status.as_str(), "Inserted run job");
        Ok(())
    }

    async fn insert_run_info(&mut self, info: &RunInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_infos (id, run_id, run_job_id, level, message, issued_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(info.id.as_uuid())
        .bind(info.run_id.as_uuid())
        .bind(info.run_job_id.map(|id| *id.as_uuid()))
        .bind(info.level.as_str())
        .bind(&info.message)
        .bind(info.issued_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_run_status(&mut self, run_id: RunId, status: RunStatus) -> Result<()> {
        sqlx::query("UPDATE runs SET status = $2, last_modified = NOW() WHERE id = $1")
            .bind(run_id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}

fn map_insert_error(e: sqlx::Error) -> Error {
    if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
        Error::Conflict(e.to_string())
    } else {
        Error::Database(e.to_string())
    }
}

fn row_to_run(r: &PgRow) -> Result<Run> {
    let status: String = r.get("status");
    Ok(Run {
        id: RunId::from_uuid(r.get("id")),
        project_key: r.get("project_key"),
        workflow_name: r.get("workflow_name"),
        run_number: r.get("run_number"),
        run_attempt: r.get("run_attempt"),
        status: status.parse()?,
        user_id: UserId::from_uuid(r.get("user_id")),
        username: r.get("username"),
        workflow: serde_json::from_value(r.get("workflow"))?,
        contexts: serde_json::from_value(r.get("contexts"))?,
        started: r.get("started"),
        last_modified: r.get("last_modified"),
    })
}

fn row_to_run_job(r: &PgRow) -> Result<RunJob> {
    let status: String = r.get("status");
    Ok(RunJob {
        id: RunJobId::from_uuid(r.get("id")),
        run_id: RunId::from_uuid(r.get("run_id")),
        project_key: r.get("project_key"),
        workflow_name: r.get("workflow_name"),
        run_number: r.get("run_number"),
        run_attempt: r.get("run_attempt"),
        job_id: r.get("job_id"),
        job: serde_json::from_value(r.get("job"))?,
        status: status.parse()?,
        matrix: serde_json::from_value(r.get("matrix"))?,
        region: r.get("region"),
        gate_inputs: serde_json::from_value(r.get("gate_inputs"))?,
        user_id: UserId::from_uuid(r.get("user_id")),
        username: r.get("username"),
        queued: r.get("queued"),
        started: r.get("started"),
        ended: r.get("ended"),
    })
}
