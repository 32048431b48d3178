//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the trigger engine and its
//! storage and authorization adapters.

use crate::ids::{RunId, UserId};
use crate::integration::ProjectIntegration;
use crate::run::{Run, RunInfo, RunJob, RunResult, RunStatus};
use crate::user::User;
use crate::variables::VariableSet;
use crate::Result;
use async_trait::async_trait;
use std::fmt;

/// Read side of the persistence layer, plus the transaction factory.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get a run by ID.
    async fn load_run(&self, id: RunId) -> Result<Option<Run>>;

    /// Get every run job of one attempt.
    async fn load_run_jobs(&self, run_id: RunId, run_attempt: i32) -> Result<Vec<RunJob>>;

    /// Get every result uploaded during one attempt.
    async fn load_run_results(&self, run_id: RunId, run_attempt: i32) -> Result<Vec<RunResult>>;

    /// Get a variable set with its items. Secret items are decrypted only
    /// when `with_decryption` is set.
    async fn load_variable_set(
        &self,
        project_key: &str,
        name: &str,
        with_decryption: bool,
    ) -> Result<Option<VariableSet>>;

    /// Get a project integration with its config. Password values are
    /// decrypted only when `with_decryption` is set.
    async fn load_integration(
        &self,
        project_key: &str,
        name: &str,
        with_decryption: bool,
    ) -> Result<Option<ProjectIntegration>>;

    /// Get a user by ID.
    async fn load_user(&self, id: UserId) -> Result<Option<User>>;

    /// Building runs whose current-attempt jobs exist and have all ended.
    async fn load_building_runs_with_ended_jobs(&self) -> Result<Vec<Run>>;

    /// Open a transaction. It rolls back when dropped without `commit`.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Write side of the persistence layer.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert a run job. A second instance for the same
    /// `(run, attempt, job, matrix)` fails with `Error::Conflict`.
    async fn insert_run_job(&mut self, run_job: &RunJob) -> Result<()>;

    /// Append a run or run-job info.
    async fn insert_run_info(&mut self, info: &RunInfo) -> Result<()>;

    async fn update_run_status(&mut self, run_id: RunId, status: RunStatus) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// A resource guarded by the authorization oracle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    VariableSet(String),
    Region(String),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::VariableSet(_) => "varset",
            Resource::Region(_) => "region",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::VariableSet(name) | Resource::Region(name) => name,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Read a variable set from a job.
    Use,
    /// Run jobs in a region.
    Execute,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Use => "use",
            Role::Execute => "execute",
        }
    }
}

/// Authorization oracle.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_role(
        &self,
        user_id: UserId,
        project_key: &str,
        resource: &Resource,
        role: Role,
    ) -> Result<bool>;
}
