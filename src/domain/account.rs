use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// One identity the system acts on behalf of.
///
/// Owned by the persistent store; mutated in place by the worker that holds
/// the account for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub login: String,
    /// Identity on the commented-on platform. Accounts without one are not
    /// eligible for a run.
    pub platform_id: Option<String>,
    /// Profile id on the exchange, populated by profile sync.
    pub exchange_profile_id: Option<String>,
    pub persona_name: Option<String>,
    /// Durable refresh-token blob. Sealed at rest by the store.
    pub auth_token: Option<String>,
    pub tasks_today: i32,
    pub last_action_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Offline,
    Authorizing,
    Ready,
    Working,
    Waiting,
    Completed,
    Error,
}

impl Account {
    pub fn new(login: String, platform_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            login,
            platform_id,
            exchange_profile_id: None,
            persona_name: None,
            auth_token: None,
            tasks_today: 0,
            last_action_at: None,
            status: AccountStatus::Offline,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for `AccountStore::update_account`.
///
/// `None` leaves a field untouched. The double-`Option` fields distinguish
/// "keep" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub platform_id: Option<Option<String>>,
    pub exchange_profile_id: Option<Option<String>>,
    pub persona_name: Option<Option<String>>,
    pub auth_token: Option<Option<String>>,
    pub tasks_today: Option<i32>,
    pub last_action_at: Option<Option<DateTime<Utc>>>,
    pub status: Option<AccountStatus>,
}

impl AccountPatch {
    pub fn status(status: AccountStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.platform_id.is_none()
            && self.exchange_profile_id.is_none()
            && self.persona_name.is_none()
            && self.auth_token.is_none()
            && self.tasks_today.is_none()
            && self.last_action_at.is_none()
            && self.status.is_none()
    }
}
