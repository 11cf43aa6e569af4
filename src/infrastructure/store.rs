use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Account, AccountPatch, AccountStatus, TaskLogEntry};
use crate::infrastructure::crypto::{EncryptionError, TokenSealer};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
}

/// Narrow CRUD contract the orchestration core reads and writes through.
/// Accounts are created and deleted elsewhere; the core only lists, reads,
/// patches, and appends outcome records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;
    async fn get_account(&self, id: Uuid) -> Result<Account, StoreError>;
    async fn update_account(&self, id: Uuid, patch: AccountPatch) -> Result<(), StoreError>;
    async fn append_task_log(&self, entry: TaskLogEntry) -> Result<(), StoreError>;
}

pub struct PostgresAccountStore {
    pool: PgPool,
    sealer: Arc<TokenSealer>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool, sealer: Arc<TokenSealer>) -> Self {
        Self { pool, sealer }
    }

    fn row_to_account(&self, row: &sqlx::postgres::PgRow) -> Result<Account, StoreError> {
        let status_str: String = row.try_get("status")?;
        let status = AccountStatus::from_str(&status_str)
            .map_err(|_| StoreError::InvalidData(format!("Unknown status: {}", status_str)))?;

        let sealed_token: Option<Vec<u8>> = row.try_get("auth_token")?;
        // A token that fails to open is treated as absent so the account
        // falls back to a fresh credential login.
        let auth_token = sealed_token.and_then(|blob| match self.sealer.open(&blob) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Stored auth token failed to open, discarding");
                None
            }
        });

        Ok(Account {
            id: row.try_get("id")?,
            login: row.try_get("login")?,
            platform_id: row.try_get("platform_id")?,
            exchange_profile_id: row.try_get("exchange_profile_id")?,
            persona_name: row.try_get("persona_name")?,
            auth_token,
            tasks_today: row.try_get("tasks_today")?,
            last_action_at: row.try_get("last_action_at")?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, login, platform_id, exchange_profile_id, persona_name, \
     auth_token, tasks_today, last_action_at, status, created_at, updated_at";

#[async_trait]
impl AccountStore for PostgresAccountStore {
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY login"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_account(row)).collect()
    }

    async fn get_account(&self, id: Uuid) -> Result<Account, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => StoreError::NotFound(format!("Account {}", id)),
            _ => StoreError::Database(e),
        })?;

        self.row_to_account(&row)
    }

    async fn update_account(&self, id: Uuid, patch: AccountPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let sealed_token = match &patch.auth_token {
            Some(Some(token)) => Some(Some(self.sealer.seal(token)?)),
            Some(None) => Some(None),
            None => None,
        };

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE accounts SET ");
        let mut fields = qb.separated(", ");

        if let Some(platform_id) = patch.platform_id {
            fields.push("platform_id = ").push_bind_unseparated(platform_id);
        }
        if let Some(profile_id) = patch.exchange_profile_id {
            fields
                .push("exchange_profile_id = ")
                .push_bind_unseparated(profile_id);
        }
        if let Some(persona_name) = patch.persona_name {
            fields.push("persona_name = ").push_bind_unseparated(persona_name);
        }
        if let Some(token) = sealed_token {
            fields.push("auth_token = ").push_bind_unseparated(token);
        }
        if let Some(tasks_today) = patch.tasks_today {
            fields.push("tasks_today = ").push_bind_unseparated(tasks_today);
        }
        if let Some(last_action_at) = patch.last_action_at {
            fields
                .push("last_action_at = ")
                .push_bind_unseparated(last_action_at);
        }
        if let Some(status) = patch.status {
            fields.push("status = ").push_bind_unseparated(status.to_string());
        }
        fields.push("updated_at = ").push_bind_unseparated(Utc::now());

        qb.push(" WHERE id = ");
        qb.push_bind(id);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Account {}", id)));
        }
        Ok(())
    }

    async fn append_task_log(&self, entry: TaskLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_log (account_id, task_id, target_id, comment_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.account_id)
        .bind(&entry.task_id)
        .bind(&entry.target_id)
        .bind(&entry.comment_id)
        .bind(entry.status.to_string())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
