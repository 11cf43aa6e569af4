//! Per-account daily quota with a 24-hour rolling reset.
//!
//! Pure logic over `Account` records; callers pass `now` explicitly so the
//! boundaries are exact and testable. Two deliberately separate predicates:
//! the counter limit and the cooldown. An account can sit under the limit yet
//! still be blocked (a restart or clock skew left the counter inconsistent),
//! so eligibility composes both.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Account, AccountStatus};

/// Daily cap on completed tasks per account.
pub const DAILY_TASK_LIMIT: i32 = 10;

/// Rolling window after the last successful action.
pub fn reset_interval() -> Duration {
    Duration::hours(24)
}

/// Lazily zero the counter once the window has elapsed. Idempotent; returns
/// true when a reset happened.
pub fn reset_if_due(account: &mut Account, now: DateTime<Utc>) -> bool {
    if !can_act(account, now) {
        return false;
    }
    if account.tasks_today == 0 {
        return false;
    }
    account.tasks_today = 0;
    true
}

pub fn has_reached_limit(account: &Account) -> bool {
    account.tasks_today >= DAILY_TASK_LIMIT
}

/// Cooldown predicate: eligible to resume once 24h have passed since the last
/// action (or it never acted). Ignores the counter on purpose.
pub fn can_act(account: &Account, now: DateTime<Utc>) -> bool {
    match account.last_action_at {
        None => true,
        Some(last) => now - last >= reset_interval(),
    }
}

pub fn time_until_reset(account: &Account, now: DateTime<Utc>) -> Duration {
    match account.last_action_at {
        None => Duration::zero(),
        Some(last) => (last + reset_interval() - now).max(Duration::zero()),
    }
}

/// Composed eligibility check used at admission: reset the counter when due,
/// then fall back to the cooldown when the limit is still standing.
pub fn can_account_work(account: &mut Account, now: DateTime<Utc>) -> bool {
    reset_if_due(account, now);
    if has_reached_limit(account) {
        return can_act(account, now);
    }
    true
}

/// Viewer-facing status, derived rather than stored: a live session with a
/// spent quota reads as completed, a standing cooldown as waiting.
pub fn derived_status(account: &Account, authenticated: bool, now: DateTime<Utc>) -> AccountStatus {
    if !authenticated {
        return AccountStatus::Offline;
    }
    if has_reached_limit(account) {
        return AccountStatus::Completed;
    }
    if !can_act(account, now) {
        return AccountStatus::Waiting;
    }
    AccountStatus::Ready
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_with(tasks_today: i32, last_action_at: Option<DateTime<Utc>>) -> Account {
        let mut account = Account::new("tester".to_string(), Some("7656119".to_string()));
        account.tasks_today = tasks_today;
        account.last_action_at = last_action_at;
        account
    }

    #[test]
    fn reset_is_idempotent() {
        let now = Utc::now();
        let mut account = account_with(7, Some(now - Duration::hours(25)));

        assert!(reset_if_due(&mut account, now));
        assert_eq!(account.tasks_today, 0);

        assert!(!reset_if_due(&mut account, now));
        assert_eq!(account.tasks_today, 0);
    }

    #[test]
    fn reset_does_not_fire_inside_the_window() {
        let now = Utc::now();
        let mut account = account_with(7, Some(now - Duration::hours(3)));
        assert!(!reset_if_due(&mut account, now));
        assert_eq!(account.tasks_today, 7);
    }

    #[test]
    fn limit_boundary_is_exactly_ten() {
        assert!(!has_reached_limit(&account_with(9, None)));
        assert!(has_reached_limit(&account_with(10, None)));
        assert!(has_reached_limit(&account_with(11, None)));
    }

    #[test]
    fn can_act_boundary_is_exactly_24h() {
        let now = Utc::now();
        let just_short = now - (Duration::hours(24) - Duration::seconds(1));
        let exact = now - Duration::hours(24);

        assert!(can_act(&account_with(0, None), now));
        assert!(!can_act(&account_with(0, Some(just_short)), now));
        assert!(can_act(&account_with(0, Some(exact)), now));
    }

    #[test]
    fn time_until_reset_counts_down_and_floors_at_zero() {
        let now = Utc::now();
        assert_eq!(time_until_reset(&account_with(0, None), now), Duration::zero());

        let account = account_with(0, Some(now - Duration::hours(20)));
        assert_eq!(time_until_reset(&account, now), Duration::hours(4));

        let account = account_with(0, Some(now - Duration::hours(30)));
        assert_eq!(time_until_reset(&account, now), Duration::zero());
    }

    #[test]
    fn derived_status_prefers_session_then_quota_then_cooldown() {
        let now = Utc::now();
        let recent = Some(now - Duration::hours(1));

        assert_eq!(
            derived_status(&account_with(0, None), false, now),
            AccountStatus::Offline
        );
        assert_eq!(
            derived_status(&account_with(10, recent), true, now),
            AccountStatus::Completed
        );
        assert_eq!(
            derived_status(&account_with(3, recent), true, now),
            AccountStatus::Waiting
        );
        assert_eq!(
            derived_status(&account_with(0, None), true, now),
            AccountStatus::Ready
        );
    }

    #[test]
    fn limit_with_standing_cooldown_blocks_work() {
        let now = Utc::now();
        let mut blocked = account_with(10, Some(now - Duration::hours(2)));
        assert!(!can_account_work(&mut blocked, now));

        let mut expired = account_with(10, Some(now - Duration::hours(25)));
        assert!(can_account_work(&mut expired, now));
        assert_eq!(expired.tasks_today, 0);

        let mut fresh = account_with(3, Some(now - Duration::hours(2)));
        assert!(can_account_work(&mut fresh, now));
    }
}
