//! In-memory fakes behind the service traits, for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use mio_core::feedback::{
    FeedbackEvent, PatternSummary, PracticeSection, PracticeSubmission, RewardHistory, UserProfile,
};
use mio_core::prompt::Prompt;
use mio_core::retrieval::{CoachAgent, KnowledgeChunk};
use mio_core::reward::RewardTier;
use mio_core::similarity::hashing_embedding;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::services::cache::{CacheError, ResponseCache};
use crate::services::embedding::Embedder;
use crate::services::knowledge::KnowledgeStore;
use crate::services::llm::CompletionClient;
use crate::services::push::{PushMessage, PushSender, PushSubscription};
use crate::services::store::{FeedbackStore, InsertOutcome, NewNotification};
use crate::services::{StoreError, UpstreamError};

const HISTORY_DAYS: i64 = 90;

pub struct UnavailableCache;

#[async_trait]
impl ResponseCache for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[derive(Default)]
struct FeedbackTables {
    profiles: HashMap<String, UserProfile>,
    submissions: Vec<PracticeSubmission>,
    patterns: Vec<(String, PatternSummary)>,
    feedback: Vec<FeedbackEvent>,
    notifications: Vec<NewNotification>,
    subscriptions: HashMap<String, PushSubscription>,
    fail_notifications: bool,
    conflict_on_next_insert: bool,
}

#[derive(Default)]
pub struct MemoryFeedbackStore {
    tables: Mutex<FeedbackTables>,
}

impl MemoryFeedbackStore {
    pub fn add_profile(&self, profile: UserProfile) {
        self.tables
            .lock()
            .profiles
            .insert(profile.user_id.clone(), profile);
    }

    pub fn add_submission(&self, submission: PracticeSubmission) {
        self.tables.lock().submissions.push(submission);
    }

    /// One summary stands for `occurrences` analysis rows of that pattern,
    /// the same grouping `recent_patterns` reads back.
    pub fn add_pattern(&self, user_id: &str, pattern: PatternSummary) {
        self.tables
            .lock()
            .patterns
            .push((user_id.to_string(), pattern));
    }

    pub fn add_subscription(&self, user_id: &str, subscription: PushSubscription) {
        self.tables
            .lock()
            .subscriptions
            .insert(user_id.to_string(), subscription);
    }

    /// Make notification writes and subscription lookups fail.
    pub fn fail_notifications(&self) {
        self.tables.lock().fail_notifications = true;
    }

    /// Simulate a concurrent writer winning the unique-key race.
    pub fn conflict_on_next_insert(&self) {
        self.tables.lock().conflict_on_next_insert = true;
    }

    pub fn feedback_rows(&self) -> usize {
        self.tables.lock().feedback.len()
    }

    pub fn notifications(&self) -> Vec<NewNotification> {
        self.tables.lock().notifications.clone()
    }
}

fn same_slot(event: &FeedbackEvent, user_id: &str, section: PracticeSection, date: NaiveDate) -> bool {
    event.user_id == user_id && event.section == section && event.practice_date == date
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn find_feedback(
        &self,
        user_id: &str,
        section: PracticeSection,
        practice_date: NaiveDate,
    ) -> Result<Option<FeedbackEvent>, StoreError> {
        Ok(self
            .tables
            .lock()
            .feedback
            .iter()
            .find(|e| same_slot(e, user_id, section, practice_date))
            .cloned())
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.tables.lock().profiles.get(user_id).cloned())
    }

    async fn load_submission(
        &self,
        user_id: &str,
        section: PracticeSection,
        practice_date: NaiveDate,
    ) -> Result<Option<PracticeSubmission>, StoreError> {
        Ok(self
            .tables
            .lock()
            .submissions
            .iter()
            .find(|s| {
                s.user_id == user_id && s.section == section && s.practice_date == practice_date
            })
            .cloned())
    }

    async fn reward_history(
        &self,
        user_id: &str,
        as_of: NaiveDate,
    ) -> Result<RewardHistory, StoreError> {
        let tables = self.tables.lock();
        let since = as_of - Duration::days(HISTORY_DAYS);

        let last_breakthrough = tables
            .feedback
            .iter()
            .filter(|e| {
                e.user_id == user_id
                    && e.reward_tier == RewardTier::PatternBreakthrough
                    && e.practice_date <= as_of
            })
            .map(|e| e.practice_date)
            .max();

        let mut practice_dates: Vec<NaiveDate> = tables
            .submissions
            .iter()
            .filter(|s| s.user_id == user_id && s.practice_date <= as_of && s.practice_date > since)
            .map(|s| s.practice_date)
            .collect();
        practice_dates.sort();
        practice_dates.dedup();

        let pattern_rows = tables
            .patterns
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, p)| p.occurrences)
            .sum();

        Ok(RewardHistory {
            last_breakthrough,
            practice_dates,
            pattern_rows,
        })
    }

    async fn recent_patterns(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<PatternSummary>, StoreError> {
        let mut patterns: Vec<PatternSummary> = self
            .tables
            .lock()
            .patterns
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, p)| p.clone())
            .collect();
        patterns.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.pattern_name.cmp(&b.pattern_name))
        });
        patterns.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(patterns)
    }

    async fn insert_feedback(&self, event: &FeedbackEvent) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.tables.lock();
        if std::mem::take(&mut tables.conflict_on_next_insert) {
            let winner = FeedbackEvent {
                message_id: Uuid::now_v7(),
                ..event.clone()
            };
            tables.feedback.push(winner.clone());
            return Ok(InsertOutcome::Duplicate(winner));
        }
        if let Some(existing) = tables
            .feedback
            .iter()
            .find(|e| same_slot(e, &event.user_id, event.section, event.practice_date))
        {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }
        tables.feedback.push(event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn create_notification(&self, notification: &NewNotification) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables.fail_notifications {
            return Err(StoreError::Malformed("notifications table unavailable".to_string()));
        }
        tables.notifications.push(notification.clone());
        Ok(())
    }

    async fn push_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<PushSubscription>, StoreError> {
        let tables = self.tables.lock();
        if tables.fail_notifications {
            return Err(StoreError::Malformed("push_subscriptions table unavailable".to_string()));
        }
        Ok(tables.subscriptions.get(user_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryKnowledgeStore {
    rows: Mutex<Vec<(String, KnowledgeChunk)>>,
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn chunks_for_agent(
        &self,
        agent: CoachAgent,
        model: &str,
    ) -> Result<Vec<KnowledgeChunk>, StoreError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|(m, c)| m == model && c.agent == agent)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn upsert_chunks(
        &self,
        chunks: &[KnowledgeChunk],
        model: &str,
    ) -> Result<usize, StoreError> {
        let mut rows = self.rows.lock();
        for chunk in chunks {
            let existing = rows
                .iter_mut()
                .find(|(_, c)| c.agent == chunk.agent && c.chunk_key == chunk.chunk_key);
            match existing {
                Some(row) => *row = (model.to_string(), chunk.clone()),
                None => rows.push((model.to_string(), chunk.clone())),
            }
        }
        Ok(chunks.len())
    }
}

/// Returns the same text for every prompt and counts calls.
pub struct ScriptedLlm {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedLlm {
    async fn complete(&self, _prompt: &Prompt) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

pub struct FailingLlm;

#[async_trait]
impl CompletionClient for FailingLlm {
    async fn complete(&self, _prompt: &Prompt) -> Result<String, UpstreamError> {
        Err(UpstreamError::Status {
            service: "anthropic",
            status: 529,
            body: "overloaded".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<PushMessage>>,
}

impl RecordingPush {
    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().clone()
    }

    /// Wait for detached deliveries to land, up to `expected` messages.
    pub async fn delivered(&self, expected: usize) -> Vec<PushMessage> {
        for _ in 0..200 {
            if self.sent.lock().len() >= expected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(
        &self,
        _subscription: &PushSubscription,
        message: &PushMessage,
    ) -> Result<(), UpstreamError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Relay that hangs long past any request deadline.
pub struct StalledPush;

#[async_trait]
impl PushSender for StalledPush {
    async fn send(
        &self,
        _subscription: &PushSubscription,
        _message: &PushMessage,
    ) -> Result<(), UpstreamError> {
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        Ok(())
    }
}

pub struct FailingPush;

#[async_trait]
impl PushSender for FailingPush {
    async fn send(
        &self,
        _subscription: &PushSubscription,
        _message: &PushMessage,
    ) -> Result<(), UpstreamError> {
        Err(UpstreamError::Status {
            service: "push-relay",
            status: 410,
            body: "subscription expired".to_string(),
        })
    }
}

/// Hashing embedder that records the size of every batch it receives.
pub struct CountingEmbedder {
    dimensions: usize,
    batches: Mutex<Vec<usize>>,
}

impl CountingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model(&self) -> &str {
        "counting"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, UpstreamError> {
        self.batches.lock().push(texts.len());
        Ok(texts
            .iter()
            .map(|t| hashing_embedding(t, self.dimensions))
            .collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f64>>, UpstreamError> {
        Err(UpstreamError::NotConfigured {
            service: "openai-embeddings",
        })
    }
}
