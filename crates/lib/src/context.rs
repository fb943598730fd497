//! Conversational context per user: read, merge for the current turn, and commit after dispatch.
//!
//! Expiry is evaluated when a context is read; nothing evicts entries in the background.
//! `commit_context` is the only writer and refuses commits from turns older than the one
//! already stored.

use crate::types::{Context, DispatchOutcome, StructuredInput};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(300);

/// Result of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Applied,
    /// A newer turn has already committed; the stored context is unchanged.
    Stale,
}

#[derive(Default)]
struct ContextTable {
    contexts: HashMap<u64, Context>,
    /// Last turn number handed out per user.
    turns: HashMap<u64, u64>,
}

pub struct ContextStore {
    inner: Arc<RwLock<ContextTable>>,
    ttl: Duration,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_TTL)
    }
}

impl ContextStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ContextTable::default())),
            ttl,
        }
    }

    /// Current context for the user, or an empty one if none exists or it has expired.
    pub async fn get_context(&self, user_id: u64) -> Context {
        let now = Utc::now();
        match self.inner.read().await.contexts.get(&user_id) {
            Some(ctx) if !ctx.is_expired_at(now) => ctx.clone(),
            _ => Context::empty(user_id),
        }
    }

    /// Next turn number for the user. Numbers only grow.
    pub async fn begin_turn(&self, user_id: u64) -> u64 {
        let mut g = self.inner.write().await;
        let next = g.turns.entry(user_id).or_insert(0);
        *next += 1;
        *next
    }

    /// Context the current turn should see. Prior state carries over only while unexpired;
    /// slots on the current input are laid over the carried pending slots. Does not write.
    pub fn merge_context(&self, user_id: u64, input: &StructuredInput, prior: &Context) -> Context {
        let mut merged = if prior.user_id == user_id && !prior.is_expired_at(Utc::now()) {
            prior.clone()
        } else {
            Context::empty(user_id)
        };
        for (k, v) in &input.slots {
            merged.pending_slots.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Overwrite the user's context with the effects of one dispatched turn.
    pub async fn commit_context(
        &self,
        user_id: u64,
        turn: u64,
        input: &StructuredInput,
        outcome: &DispatchOutcome,
    ) -> CommitStatus {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let mut g = self.inner.write().await;
        if let Some(existing) = g.contexts.get(&user_id) {
            if existing.turn > turn {
                log::debug!(
                    "context: ignoring stale commit for user {} (turn {} < {})",
                    user_id,
                    turn,
                    existing.turn
                );
                return CommitStatus::Stale;
            }
        }
        let ctx = Context {
            user_id,
            last_intent: input.intent_label.clone(),
            last_package: non_empty(&outcome.package_name),
            last_route: non_empty(&outcome.route),
            pending_slots: outcome.pending_slots.clone(),
            turn,
            updated_at: now,
            expires_at,
        };
        g.contexts.insert(user_id, ctx);
        let issued = g.turns.entry(user_id).or_insert(0);
        if *issued < turn {
            *issued = turn;
        }
        CommitStatus::Applied
    }

    /// Drop the stored context (e.g. a "start over" request).
    pub async fn clear(&self, user_id: u64) {
        self.inner.write().await.contexts.remove(&user_id);
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(package: &str, route: &str) -> DispatchOutcome {
        DispatchOutcome {
            reply_text: "ok".to_string(),
            package_name: package.to_string(),
            route: route.to_string(),
            ..DispatchOutcome::default()
        }
    }

    #[tokio::test]
    async fn missing_context_reads_empty() {
        let store = ContextStore::default();
        let ctx = store.get_context(7).await;
        assert_eq!(ctx.user_id, 7);
        assert!(ctx.is_empty());
        assert_eq!(ctx.turn, 0);
    }

    #[tokio::test]
    async fn commit_then_read_returns_outcome_effects() {
        let store = ContextStore::default();
        let input = StructuredInput::classified("greeting", 0.9, "hello");
        let turn = store.begin_turn(1).await;
        let status = store.commit_context(1, turn, &input, &outcome("greeting", "greeting")).await;
        assert_eq!(status, CommitStatus::Applied);
        let ctx = store.get_context(1).await;
        assert_eq!(ctx.last_intent.as_deref(), Some("greeting"));
        assert_eq!(ctx.last_package.as_deref(), Some("greeting"));
        assert_eq!(ctx.last_route.as_deref(), Some("greeting"));
        assert!(ctx.expires_at > ctx.updated_at);
    }

    #[tokio::test]
    async fn expired_context_reads_empty_and_merges_fresh() {
        let store = ContextStore::new(Duration::ZERO);
        let input = StructuredInput::classified("greeting", 0.9, "hello");
        let turn = store.begin_turn(1).await;
        store.commit_context(1, turn, &input, &outcome("greeting", "greeting")).await;
        let ctx = store.get_context(1).await;
        assert!(ctx.is_empty());

        let mut stale = Context::empty(1);
        stale.last_intent = Some("greeting".to_string());
        let merged = store.merge_context(1, &input, &stale);
        assert!(merged.last_intent.is_none());
    }

    #[tokio::test]
    async fn merge_carries_unexpired_state_and_overlays_slots() {
        let store = ContextStore::default();
        let first = StructuredInput::classified("reminder", 0.9, "remind me");
        let turn = store.begin_turn(3).await;
        let asked = outcome("reminders", "reminder").with_pending_slot("time", "");
        store.commit_context(3, turn, &first, &asked).await;

        let prior = store.get_context(3).await;
        let mut next = StructuredInput::unclassified(0.0, "at noon");
        next.slots.insert("time".to_string(), "noon".to_string());
        let merged = store.merge_context(3, &next, &prior);
        assert_eq!(merged.last_intent.as_deref(), Some("reminder"));
        assert_eq!(merged.pending_slots.get("time").map(String::as_str), Some("noon"));
        // merge is advisory; the store is unchanged
        assert_eq!(store.get_context(3).await.pending_slots.get("time").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn stale_turn_does_not_overwrite_newer_commit() {
        let store = ContextStore::default();
        let t1 = store.begin_turn(5).await;
        let t2 = store.begin_turn(5).await;
        assert!(t2 > t1);
        let newer = StructuredInput::classified("weather", 0.9, "weather");
        let older = StructuredInput::classified("greeting", 0.9, "hi");
        assert_eq!(
            store.commit_context(5, t2, &newer, &outcome("weather", "weather")).await,
            CommitStatus::Applied
        );
        assert_eq!(
            store.commit_context(5, t1, &older, &outcome("greeting", "greeting")).await,
            CommitStatus::Stale
        );
        assert_eq!(store.get_context(5).await.last_intent.as_deref(), Some("weather"));
    }

    #[tokio::test]
    async fn replayed_commit_is_an_overwrite() {
        let store = ContextStore::default();
        let input = StructuredInput::classified("greeting", 0.9, "hi");
        let out = outcome("greeting", "greeting").with_pending_slot("name", "");
        let turn = store.begin_turn(9).await;
        store.commit_context(9, turn, &input, &out).await;
        let first = store.get_context(9).await;
        assert_eq!(store.commit_context(9, turn, &input, &out).await, CommitStatus::Applied);
        let second = store.get_context(9).await;
        assert_eq!(first.last_intent, second.last_intent);
        assert_eq!(first.pending_slots, second.pending_slots);
        assert_eq!(second.pending_slots.len(), 1);
        assert_eq!(second.turn, turn);
    }

    #[tokio::test]
    async fn clear_drops_context() {
        let store = ContextStore::default();
        let input = StructuredInput::classified("greeting", 0.9, "hi");
        let turn = store.begin_turn(2).await;
        store.commit_context(2, turn, &input, &outcome("greeting", "greeting")).await;
        store.clear(2).await;
        assert!(store.get_context(2).await.is_empty());
    }
}
