//! Access windows and per-user / per-group overrides.
//!
//! A user override replaces the quiz settings field by field. Without one,
//! every group the user belongs to contributes its override and the most
//! lenient value wins for each field.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::AccessPolicy;

/// Timing and attempt limits in effect for one learner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessWindow {
    /// Attempts may not start before this instant.
    #[serde(default)]
    pub time_open: Option<DateTime<Utc>>,
    /// Attempts may not start, and open attempts expire, after this instant.
    #[serde(default)]
    pub time_close: Option<DateTime<Utc>>,
    /// Seconds an attempt may stay open. `None` means unlimited.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    /// Maximum number of non-preview attempts. `None` means unlimited.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl AccessWindow {
    /// Returns the reason an attempt cannot start at `now`, if any.
    pub fn closed_reason(&self, now: DateTime<Utc>) -> Option<String> {
        if let Some(open) = self.time_open {
            if now < open {
                return Some(format!("quiz opens at {open}"));
            }
        }
        if let Some(close) = self.time_close {
            if now > close {
                return Some(format!("quiz closed at {close}"));
            }
        }
        None
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.closed_reason(now).is_none()
    }

    /// The instant an attempt started at `started` must end, if bounded.
    ///
    /// A time limit reaching past the representable range does not bound
    /// the attempt.
    pub fn deadline(&self, started: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let by_limit = self
            .time_limit_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|limit| started.checked_add_signed(limit));
        match (by_limit, self.time_close) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Apply an override on top of this window; set fields replace ours.
    pub fn patched(&self, patch: &AccessOverride) -> AccessWindow {
        AccessWindow {
            time_open: patch.time_open.unwrap_or(self.time_open),
            time_close: patch.time_close.unwrap_or(self.time_close),
            time_limit_secs: patch.time_limit_secs.unwrap_or(self.time_limit_secs),
            max_attempts: patch.max_attempts.unwrap_or(self.max_attempts),
        }
    }
}

/// A partial window. The outer `Option` says whether the field is
/// overridden; the inner one carries the override value, where `None`
/// removes the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessOverride {
    #[serde(default)]
    pub time_open: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub time_close: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub time_limit_secs: Option<Option<u64>>,
    #[serde(default)]
    pub max_attempts: Option<Option<u32>>,
}

impl AccessOverride {
    /// Merge two group overrides, keeping the more lenient value per field.
    fn most_lenient(&self, other: &AccessOverride) -> AccessOverride {
        AccessOverride {
            time_open: lenient(self.time_open, other.time_open, |a, b| match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            }),
            time_close: lenient(self.time_close, other.time_close, |a, b| match (a, b) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            }),
            time_limit_secs: lenient(self.time_limit_secs, other.time_limit_secs, |a, b| {
                match (a, b) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                }
            }),
            max_attempts: lenient(self.max_attempts, other.max_attempts, |a, b| match (a, b) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            }),
        }
    }
}

fn lenient<T>(
    a: Option<Option<T>>,
    b: Option<Option<T>>,
    pick: impl Fn(Option<T>, Option<T>) -> Option<T>,
) -> Option<Option<T>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QuizAccess {
    base: AccessWindow,
    #[serde(default)]
    users: HashMap<String, AccessOverride>,
    #[serde(default)]
    groups: HashMap<String, AccessOverride>,
}

/// In-process access policy built from quiz settings plus overrides.
///
/// Quizzes that were never registered are open without limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverridePolicy {
    quizzes: HashMap<String, QuizAccess>,
    /// Group memberships: user id to group ids.
    #[serde(default)]
    memberships: HashMap<String, Vec<String>>,
}

impl OverridePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the base window of a quiz.
    pub fn set_quiz(&mut self, quiz_id: &str, base: AccessWindow) {
        self.quizzes.entry(quiz_id.to_string()).or_default().base = base;
    }

    pub fn set_user_override(&mut self, quiz_id: &str, user_id: &str, patch: AccessOverride) {
        self.quizzes
            .entry(quiz_id.to_string())
            .or_default()
            .users
            .insert(user_id.to_string(), patch);
    }

    pub fn set_group_override(&mut self, quiz_id: &str, group_id: &str, patch: AccessOverride) {
        self.quizzes
            .entry(quiz_id.to_string())
            .or_default()
            .groups
            .insert(group_id.to_string(), patch);
    }

    pub fn add_group_member(&mut self, group_id: &str, user_id: &str) {
        let groups = self.memberships.entry(user_id.to_string()).or_default();
        if !groups.iter().any(|g| g == group_id) {
            groups.push(group_id.to_string());
        }
    }

    /// Resolve the window in effect for `user_id`.
    pub fn resolve(&self, quiz_id: &str, user_id: &str) -> AccessWindow {
        let Some(quiz) = self.quizzes.get(quiz_id) else {
            return AccessWindow::default();
        };

        if let Some(patch) = quiz.users.get(user_id) {
            return quiz.base.patched(patch);
        }

        let merged = self
            .memberships
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|group| quiz.groups.get(group))
            .fold(None::<AccessOverride>, |acc, patch| {
                Some(match acc {
                    Some(acc) => acc.most_lenient(patch),
                    None => patch.clone(),
                })
            });

        match merged {
            Some(patch) => quiz.base.patched(&patch),
            None => quiz.base.clone(),
        }
    }
}

#[async_trait]
impl AccessPolicy for OverridePolicy {
    async fn is_attempt_allowed(
        &self,
        quiz_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.resolve(quiz_id, user_id).is_open(now))
    }

    async fn effective_overrides(
        &self,
        quiz_id: &str,
        user_id: &str,
    ) -> anyhow::Result<AccessWindow> {
        Ok(self.resolve(quiz_id, user_id))
    }
}
