//! Section feedback pipeline: one persisted, reward-tagged coaching message
//! per (user, section, practice date).

use std::sync::Arc;

use chrono::Utc;
use mio_core::feedback::{FeedbackEvent, SectionFeedbackRequest, score_submission};
use mio_core::policy::{FailurePolicy, defaults};
use mio_core::prompt::{FeedbackPromptInput, fallback_feedback, feedback_prompt, knowledge_query};
use mio_core::retrieval::{CoachAgent, RankOptions, format_context};
use mio_core::reward::{RewardError, RewardRoller};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::services::knowledge::{KnowledgeError, KnowledgeRetriever};
use crate::services::llm::CompletionClient;
use crate::services::push::{PushMessage, PushSender, PushSubscription};
use crate::services::store::{FeedbackStore, InsertOutcome, NewNotification};
use crate::services::{StoreError, UpstreamError};

const KNOWLEDGE_LIMIT: usize = 3;
const RECENT_PATTERN_LIMIT: i64 = 5;
const NOTIFICATION_BODY_CHARS: usize = 120;
const NOTIFICATION_KIND: &str = "section_feedback";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{what} not found for user {user_id}")]
    NotFound { what: &'static str, user_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reward(#[from] RewardError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub event: FeedbackEvent,
    /// The event already existed and was returned unchanged.
    pub duplicate: bool,
}

pub struct FeedbackDispatcher {
    store: Arc<dyn FeedbackStore>,
    llm: Arc<dyn CompletionClient>,
    retriever: Arc<KnowledgeRetriever>,
    push: Arc<dyn PushSender>,
    roller: RewardRoller,
    min_pattern_rows: i64,
    min_similarity: f64,
    notification_policy: FailurePolicy,
    push_policy: FailurePolicy,
    rng: Mutex<StdRng>,
}

impl FeedbackDispatcher {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        llm: Arc<dyn CompletionClient>,
        retriever: Arc<KnowledgeRetriever>,
        push: Arc<dyn PushSender>,
        roller: RewardRoller,
    ) -> Self {
        Self {
            store,
            llm,
            retriever,
            push,
            roller,
            min_pattern_rows: 1,
            min_similarity: mio_core::retrieval::DEFAULT_MIN_SIMILARITY,
            notification_policy: defaults::IN_APP_NOTIFICATION,
            push_policy: defaults::PUSH_DELIVERY,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_min_pattern_rows(mut self, rows: i64) -> Self {
        self.min_pattern_rows = rows;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub async fn dispatch(
        &self,
        request: &SectionFeedbackRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(DispatchError::Validation {
                field: "user_id",
                message: "must not be empty".to_string(),
            });
        }
        let section = request.section;
        let practice_date = request.practice_date;

        if let Some(existing) = self
            .store
            .find_feedback(user_id, section, practice_date)
            .await?
        {
            tracing::info!(
                user_id,
                section = section.as_str(),
                %practice_date,
                message_id = %existing.message_id,
                "section feedback already exists"
            );
            return Ok(DispatchOutcome {
                event: existing,
                duplicate: true,
            });
        }

        let (profile, submission, history, patterns) = tokio::try_join!(
            self.store.load_profile(user_id),
            self.store.load_submission(user_id, section, practice_date),
            self.store.reward_history(user_id, practice_date),
            self.store.recent_patterns(user_id, RECENT_PATTERN_LIMIT),
        )?;
        let profile = profile.ok_or_else(|| DispatchError::NotFound {
            what: "profile",
            user_id: user_id.to_string(),
        })?;
        let submission = submission.ok_or_else(|| DispatchError::NotFound {
            what: "practice submission",
            user_id: user_id.to_string(),
        })?;

        let signals = history.signals(practice_date, self.min_pattern_rows);
        let roll = {
            let mut rng = self.rng.lock();
            self.roller.roll(Some(&signals), &mut *rng)?
        };

        let query = knowledge_query(&submission);
        let options = RankOptions {
            limit: KNOWLEDGE_LIMIT,
            min_similarity: self.min_similarity,
            ..RankOptions::default()
        };
        let chunks = self
            .retriever
            .search(&query, CoachAgent::Mio, &options)
            .await?;
        let knowledge = format_context(&chunks);

        let prompt = feedback_prompt(&FeedbackPromptInput {
            profile: &profile,
            submission: &submission,
            tier: roll.tier,
            streak_days: signals.streak_days,
            patterns: &patterns,
            knowledge: knowledge.as_deref(),
        });
        let (feedback_text, used_fallback) = match self.llm.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => (text, false),
            Ok(_) => {
                tracing::warn!(user_id, "completion was empty, using fallback feedback");
                (fallback_feedback(section, profile.first_name()), true)
            }
            Err(err) => {
                tracing::warn!(user_id, error = %err, "completion failed, using fallback feedback");
                (fallback_feedback(section, profile.first_name()), true)
            }
        };

        let scores = score_submission(&submission);
        let event = FeedbackEvent {
            message_id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            section,
            practice_date,
            reward_tier: roll.tier,
            reward_probability: roll.probability,
            feedback_text,
            quality_score: scores.quality,
            depth_score: scores.depth,
            used_fallback,
            created_at: Utc::now(),
        };

        let event = match self.store.insert_feedback(&event).await? {
            InsertOutcome::Inserted => event,
            InsertOutcome::Duplicate(existing) => {
                tracing::info!(
                    user_id,
                    section = section.as_str(),
                    message_id = %existing.message_id,
                    "concurrent dispatch already stored feedback"
                );
                return Ok(DispatchOutcome {
                    event: existing,
                    duplicate: true,
                });
            }
        };

        self.notify(&event).await?;

        tracing::info!(
            user_id,
            section = section.as_str(),
            %practice_date,
            message_id = %event.message_id,
            reward_tier = event.reward_tier.as_str(),
            reward_probability = event.reward_probability,
            streak_days = signals.streak_days,
            knowledge_chunks = chunks.len(),
            used_fallback,
            "section feedback dispatched"
        );

        Ok(DispatchOutcome {
            event,
            duplicate: false,
        })
    }

    /// In-app notification, then push when the user has a subscription.
    async fn notify(&self, event: &FeedbackEvent) -> Result<(), DispatchError> {
        let title = notification_title(event);
        let body = truncate_chars(&event.feedback_text, NOTIFICATION_BODY_CHARS);

        let created = self
            .store
            .create_notification(&NewNotification {
                user_id: event.user_id.clone(),
                kind: NOTIFICATION_KIND,
                title: title.clone(),
                body: body.clone(),
                reference_id: event.message_id,
            })
            .await;
        self.notification_policy
            .apply("in_app_notification", created, ())?;

        let subscription = self.store.push_subscription(&event.user_id).await;
        let Some(subscription) = self
            .push_policy
            .apply("push_subscription_lookup", subscription, None)?
        else {
            tracing::debug!(user_id = %event.user_id, "no push subscription, push skipped");
            return Ok(());
        };

        let message = PushMessage {
            title,
            body,
            data: serde_json::json!({
                "message_id": event.message_id,
                "section": event.section,
                "practice_date": event.practice_date,
                "reward_tier": event.reward_tier,
            }),
        };
        self.deliver_push(subscription, message);
        Ok(())
    }

    /// Push runs detached; the response never waits on the relay.
    fn deliver_push(&self, subscription: PushSubscription, message: PushMessage) {
        let push = self.push.clone();
        let policy = self.push_policy;
        tokio::spawn(async move {
            let sent = push.send(&subscription, &message).await;
            if let Err(err) = policy.apply("push_delivery", sent, ()) {
                tracing::error!(error = %err, "push delivery failed");
            }
        });
    }
}

fn notification_title(event: &FeedbackEvent) -> String {
    format!(
        "{} Feedback on your {} practice",
        event.reward_tier.icon(),
        event.section.as_str()
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
