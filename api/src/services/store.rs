use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mio_core::feedback::{
    FeedbackEvent, PatternSummary, PracticeSection, PracticeSubmission, RewardHistory, UserProfile,
};
use mio_core::reward::RewardTier;
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreError;
use super::push::PushSubscription;

const PRACTICE_HISTORY_DAYS: i32 = 90;

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// Another invocation won the race; this is the row it stored.
    Duplicate(FeedbackEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: &'static str,
    pub title: String,
    pub body: String,
    pub reference_id: Uuid,
}

/// Everything the feedback dispatcher reads and writes.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn find_feedback(
        &self,
        user_id: &str,
        section: PracticeSection,
        practice_date: NaiveDate,
    ) -> Result<Option<FeedbackEvent>, StoreError>;

    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn load_submission(
        &self,
        user_id: &str,
        section: PracticeSection,
        practice_date: NaiveDate,
    ) -> Result<Option<PracticeSubmission>, StoreError>;

    async fn reward_history(
        &self,
        user_id: &str,
        as_of: NaiveDate,
    ) -> Result<RewardHistory, StoreError>;

    async fn recent_patterns(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<PatternSummary>, StoreError>;

    /// Insert unless a row already exists for (user, section, date).
    async fn insert_feedback(&self, event: &FeedbackEvent) -> Result<InsertOutcome, StoreError>;

    async fn create_notification(&self, notification: &NewNotification) -> Result<(), StoreError>;

    async fn push_subscription(&self, user_id: &str)
    -> Result<Option<PushSubscription>, StoreError>;
}

pub struct PgFeedbackStore {
    pool: PgPool,
}

impl PgFeedbackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FeedbackRow {
    message_id: Uuid,
    user_id: String,
    section: String,
    practice_date: NaiveDate,
    reward_tier: String,
    reward_probability: f64,
    feedback_text: String,
    quality_score: f64,
    depth_score: f64,
    used_fallback: bool,
    created_at: DateTime<Utc>,
}

impl FeedbackRow {
    fn into_event(self) -> Result<FeedbackEvent, StoreError> {
        let section = PracticeSection::parse(&self.section).ok_or_else(|| {
            StoreError::Malformed(format!("unknown section '{}'", self.section))
        })?;
        let reward_tier = RewardTier::parse(&self.reward_tier).ok_or_else(|| {
            StoreError::Malformed(format!("unknown reward tier '{}'", self.reward_tier))
        })?;
        Ok(FeedbackEvent {
            message_id: self.message_id,
            user_id: self.user_id,
            section,
            practice_date: self.practice_date,
            reward_tier,
            reward_probability: self.reward_probability,
            feedback_text: self.feedback_text,
            quality_score: self.quality_score,
            depth_score: self.depth_score,
            used_fallback: self.used_fallback,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    user_id: String,
    display_name: Option<String>,
    primary_pattern: Option<String>,
    temperament: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PatternRow {
    pattern_name: String,
    occurrences: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    endpoint: String,
    keys: serde_json::Value,
}

#[async_trait]
impl FeedbackStore for PgFeedbackStore {
    async fn find_feedback(
        &self,
        user_id: &str,
        section: PracticeSection,
        practice_date: NaiveDate,
    ) -> Result<Option<FeedbackEvent>, StoreError> {
        let row = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT message_id, user_id, section, practice_date, reward_tier,
                   reward_probability, feedback_text, quality_score, depth_score,
                   used_fallback, created_at
            FROM section_feedback
            WHERE user_id = $1
              AND section = $2
              AND practice_date = $3
            "#,
        )
        .bind(user_id)
        .bind(section.as_str())
        .bind(practice_date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedbackRow::into_event).transpose()
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT user_id, display_name, primary_pattern, temperament
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserProfile {
            user_id: r.user_id,
            display_name: r.display_name,
            primary_pattern: r.primary_pattern,
            temperament: r.temperament,
        }))
    }

    async fn load_submission(
        &self,
        user_id: &str,
        section: PracticeSection,
        practice_date: NaiveDate,
    ) -> Result<Option<PracticeSubmission>, StoreError> {
        let responses = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT responses
            FROM practice_submissions
            WHERE user_id = $1
              AND section = $2
              AND practice_date = $3
            "#,
        )
        .bind(user_id)
        .bind(section.as_str())
        .bind(practice_date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(responses.map(|responses| PracticeSubmission {
            user_id: user_id.to_string(),
            section,
            practice_date,
            responses,
        }))
    }

    async fn reward_history(
        &self,
        user_id: &str,
        as_of: NaiveDate,
    ) -> Result<RewardHistory, StoreError> {
        let last_breakthrough = sqlx::query_scalar::<_, Option<NaiveDate>>(
            r#"
            SELECT MAX(practice_date)
            FROM section_feedback
            WHERE user_id = $1
              AND reward_tier = $2
              AND practice_date <= $3
            "#,
        )
        .bind(user_id)
        .bind(RewardTier::PatternBreakthrough.as_str())
        .bind(as_of)
        .fetch_one(&self.pool)
        .await?;

        let practice_dates = sqlx::query_scalar::<_, NaiveDate>(
            r#"
            SELECT DISTINCT practice_date
            FROM practice_submissions
            WHERE user_id = $1
              AND practice_date <= $2
              AND practice_date > $2 - $3::int
            "#,
        )
        .bind(user_id)
        .bind(as_of)
        .bind(PRACTICE_HISTORY_DAYS)
        .fetch_all(&self.pool)
        .await?;

        let pattern_rows = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pattern_analyses WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

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
        let rows = sqlx::query_as::<_, PatternRow>(
            r#"
            SELECT pattern_name, COUNT(*) AS occurrences
            FROM pattern_analyses
            WHERE user_id = $1
            GROUP BY pattern_name
            ORDER BY occurrences DESC, pattern_name
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PatternSummary {
                pattern_name: r.pattern_name,
                occurrences: r.occurrences,
            })
            .collect())
    }

    async fn insert_feedback(&self, event: &FeedbackEvent) -> Result<InsertOutcome, StoreError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO section_feedback (
                message_id, user_id, section, practice_date, reward_tier,
                reward_probability, feedback_text, quality_score, depth_score,
                used_fallback, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id, section, practice_date) DO NOTHING
            RETURNING message_id
            "#,
        )
        .bind(event.message_id)
        .bind(&event.user_id)
        .bind(event.section.as_str())
        .bind(event.practice_date)
        .bind(event.reward_tier.as_str())
        .bind(event.reward_probability)
        .bind(&event.feedback_text)
        .bind(event.quality_score)
        .bind(event.depth_score)
        .bind(event.used_fallback)
        .bind(event.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(InsertOutcome::Inserted);
        }

        let existing = self
            .find_feedback(&event.user_id, event.section, event.practice_date)
            .await?
            .ok_or_else(|| {
                StoreError::Malformed(
                    "insert conflicted but no existing feedback row was found".to_string(),
                )
            })?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    async fn create_notification(&self, notification: &NewNotification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, body, reference_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&notification.user_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.reference_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<PushSubscription>, StoreError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT endpoint, keys
            FROM push_subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PushSubscription {
            endpoint: r.endpoint,
            keys: r.keys,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(section: &str, tier: &str) -> FeedbackRow {
        FeedbackRow {
            message_id: Uuid::now_v7(),
            user_id: "u1".to_string(),
            section: section.to_string(),
            practice_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            reward_tier: tier.to_string(),
            reward_probability: 0.7,
            feedback_text: "Nice".to_string(),
            quality_score: 1.0,
            depth_score: 0.5,
            used_fallback: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn feedback_row_maps_codes_to_enums() {
        let event = row("TE", "bonus_insight").into_event().unwrap();
        assert_eq!(event.section, PracticeSection::Te);
        assert_eq!(event.reward_tier, RewardTier::BonusInsight);
    }

    #[test]
    fn feedback_row_with_unknown_codes_is_malformed() {
        assert!(matches!(
            row("XX", "standard").into_event(),
            Err(StoreError::Malformed(_))
        ));
        assert!(matches!(
            row("PRO", "jackpot").into_event(),
            Err(StoreError::Malformed(_))
        ));
    }
}
