//! Account record

use chrono::{DateTime, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};

/// Account status. `Quarantined` is terminal: nothing moves an account back
/// to `Active` automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Quarantined,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Quarantined => "quarantined",
        }
    }
}

/// Cumulative counters plus the cursor into the open cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    /// Completed cycles (reward claimed).
    pub total_sessions: u64,
    pub total_games: u64,
    pub total_wins: u64,
    /// Cycle number of the open (or last) cycle, 1-based.
    pub current_session_round: u64,
    /// Match number within the open cycle that is being played, 1-based.
    pub current_game_in_round: u32,
    /// Matches completed in the open cycle. Resume continues after these.
    pub current_session_games: u32,
}

impl Progress {
    /// Zero the open-cycle cursor. Cumulative totals are kept.
    pub fn reset_cursor(&mut self) {
        self.current_session_round = 0;
        self.current_game_in_round = 0;
        self.current_session_games = 0;
    }

    /// Human-readable position in the open cycle.
    pub fn describe(&self) -> String {
        if self.current_game_in_round == 0 && self.current_session_games == 0 {
            "not started".to_string()
        } else {
            format!(
                "cycle {} match {} ({} done)",
                self.current_session_round, self.current_game_in_round, self.current_session_games
            )
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier, unique within the store.
    pub id: String,
    pub username: String,
    pub password: Secret<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Remote player id, learned at login.
    #[serde(default)]
    pub player_id: Option<String>,
    /// Last session token. Cleared before every login attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Secret<String>>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_reason: Option<String>,
    #[serde(default)]
    pub progress: Progress,
    /// Holds an unused entitlement; the acquire/pick phase is skipped.
    #[serde(default)]
    pub has_entitlement: bool,
    #[serde(default)]
    pub last_entitlement_at: Option<DateTime<Utc>>,
    /// Last time a cycle completed or a login succeeded.
    #[serde(default)]
    pub last_good_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            password: Secret::new(password.into()),
            display_name: None,
            player_id: None,
            token: None,
            status: AccountStatus::Active,
            quarantine_reason: None,
            progress: Progress::default(),
            has_entitlement: false,
            last_entitlement_at: None,
            last_good_at: None,
        }
    }

    /// Name used on status lines: display name, else username.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }

    pub fn is_quarantined(&self) -> bool {
        self.status == AccountStatus::Quarantined
    }

    /// Move to `Quarantined`. The first reason recorded wins.
    pub fn quarantine(&mut self, reason: impl Into<String>) {
        if self.is_quarantined() {
            return;
        }
        self.status = AccountStatus::Quarantined;
        self.quarantine_reason = Some(reason.into());
        self.token = None;
    }

    /// Mark a fresh entitlement as held.
    pub fn grant_entitlement(&mut self) {
        self.has_entitlement = true;
        self.last_entitlement_at = Some(Utc::now());
    }

    pub fn clear_entitlement(&mut self) {
        self.has_entitlement = false;
        self.last_entitlement_at = None;
    }

    pub fn mark_good(&mut self) {
        self.last_good_at = Some(Utc::now());
    }
}
