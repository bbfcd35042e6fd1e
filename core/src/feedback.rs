use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::reward::{RewardSignals, RewardTier};

const DEPTH_WORDS_FOR_FULL_SCORE: f64 = 40.0;

/// One of the three sections of the daily PROTECT practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, ToSchema)]
pub enum PracticeSection {
    /// Pattern check, Reinforce identity, Outcome visualization
    #[serde(rename = "PRO")]
    Pro,
    /// Trigger reset, Energy audit
    #[serde(rename = "TE")]
    Te,
    /// Celebrate wins, Tomorrow setup
    #[serde(rename = "CT")]
    Ct,
}

impl PracticeSection {
    pub fn as_str(self) -> &'static str {
        match self {
            PracticeSection::Pro => "PRO",
            PracticeSection::Te => "TE",
            PracticeSection::Ct => "CT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PRO" => Some(PracticeSection::Pro),
            "TE" => Some(PracticeSection::Te),
            "CT" => Some(PracticeSection::Ct),
            _ => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            PracticeSection::Pro => "Pattern check, Reinforce identity, Outcome visualization",
            PracticeSection::Te => "Trigger reset, Energy audit",
            PracticeSection::Ct => "Celebrate wins, Tomorrow setup",
        }
    }
}

/// Request to generate feedback for a completed practice section
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SectionFeedbackRequest {
    pub user_id: String,
    pub section: PracticeSection,
    /// Calendar date of the practice (YYYY-MM-DD)
    pub practice_date: NaiveDate,
}

/// Generated (or previously generated) feedback for one section
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SectionFeedbackResponse {
    pub feedback_text: String,
    pub reward_tier: RewardTier,
    pub reward_icon: String,
    /// Probability the rolled tier had at draw time
    pub reward_probability: f64,
    pub message_id: String,
    /// True when the language model was unavailable and canned text was used
    pub used_fallback: bool,
    /// True when this feedback already existed and was returned unchanged
    pub duplicate: bool,
}

impl SectionFeedbackResponse {
    pub fn from_event(event: &FeedbackEvent, duplicate: bool) -> Self {
        Self {
            feedback_text: event.feedback_text.clone(),
            reward_tier: event.reward_tier,
            reward_icon: event.reward_tier.icon().to_string(),
            reward_probability: event.reward_probability,
            message_id: event.message_id.to_string(),
            used_fallback: event.used_fallback,
            duplicate,
        }
    }
}

/// Persisted feedback for one (user, section, date). Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackEvent {
    pub message_id: Uuid,
    pub user_id: String,
    pub section: PracticeSection,
    pub practice_date: NaiveDate,
    pub reward_tier: RewardTier,
    pub reward_probability: f64,
    pub feedback_text: String,
    pub quality_score: f64,
    pub depth_score: f64,
    pub used_fallback: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    /// Primary identity-collision pattern, if assessed
    pub primary_pattern: Option<String>,
    pub temperament: Option<String>,
}

impl UserProfile {
    pub fn first_name(&self) -> &str {
        self.display_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
            .unwrap_or("there")
    }
}

/// The user's answers for one section on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct PracticeSubmission {
    pub user_id: String,
    pub section: PracticeSection,
    pub practice_date: NaiveDate,
    /// Question key -> answer, as submitted by the client
    pub responses: serde_json::Value,
}

impl PracticeSubmission {
    /// (question, answer) pairs with non-empty answers, in key order.
    pub fn answers(&self) -> Vec<(String, String)> {
        let Some(map) = self.responses.as_object() else {
            return Vec::new();
        };
        map.iter()
            .filter_map(|(question, value)| {
                let answer = match value {
                    serde_json::Value::String(s) => s.trim().to_string(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (!answer.is_empty()).then(|| (question.clone(), answer))
            })
            .collect()
    }

    fn question_count(&self) -> usize {
        self.responses.as_object().map(|m| m.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternSummary {
    pub pattern_name: String,
    pub occurrences: i64,
}

/// Inputs to the reward roll derived from stored history.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardHistory {
    pub last_breakthrough: Option<NaiveDate>,
    /// Dates with at least one practice submission, any order
    pub practice_dates: Vec<NaiveDate>,
    pub pattern_rows: i64,
}

impl RewardHistory {
    pub fn signals(&self, as_of: NaiveDate, min_pattern_rows: i64) -> RewardSignals {
        RewardSignals {
            days_since_breakthrough: days_since(self.last_breakthrough, as_of),
            streak_days: streak_length(&self.practice_dates, as_of),
            has_pattern_data: self.pattern_rows >= min_pattern_rows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackScores {
    pub quality: f64,
    pub depth: f64,
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Quality is the share of questions answered; depth is mean words per
/// answer scaled against a 40-word answer.
pub fn score_submission(submission: &PracticeSubmission) -> FeedbackScores {
    let answers = submission.answers();
    let total = submission.question_count();
    if total == 0 || answers.is_empty() {
        return FeedbackScores {
            quality: 0.0,
            depth: 0.0,
        };
    }

    let quality = answers.len() as f64 / total as f64;
    let words: usize = answers
        .iter()
        .map(|(_, answer)| answer.split_whitespace().count())
        .sum();
    let mean_words = words as f64 / answers.len() as f64;
    let depth = (mean_words / DEPTH_WORDS_FOR_FULL_SCORE).min(1.0);

    FeedbackScores {
        quality: round4(quality),
        depth: round4(depth),
    }
}

/// Consecutive days with practice, ending on `as_of`. Zero if `as_of`
/// itself has no practice.
pub fn streak_length(practice_dates: &[NaiveDate], as_of: NaiveDate) -> u32 {
    let days: HashSet<NaiveDate> = practice_dates.iter().copied().collect();
    let mut streak = 0;
    let mut day = as_of;
    while days.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    streak
}

/// Whole days between `last` and `as_of`; `None` when there was no event.
/// Events dated after `as_of` count as zero days.
pub fn days_since(last: Option<NaiveDate>, as_of: NaiveDate) -> Option<u32> {
    last.map(|date| {
        let days = as_of.signed_duration_since(date).num_days().max(0);
        u32::try_from(days).unwrap_or(u32::MAX)
    })
}
