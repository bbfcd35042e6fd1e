use crate::feedback::{PatternSummary, PracticeSection, PracticeSubmission, UserProfile};
use crate::retrieval::CoachAgent;
use crate::reward::RewardTier;

const MAX_QUERY_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub struct FeedbackPromptInput<'a> {
    pub profile: &'a UserProfile,
    pub submission: &'a PracticeSubmission,
    pub tier: RewardTier,
    pub streak_days: u32,
    pub patterns: &'a [PatternSummary],
    pub knowledge: Option<&'a str>,
}

fn tier_instruction(tier: RewardTier) -> &'static str {
    match tier {
        RewardTier::Standard => {
            "Acknowledge the practice warmly and reflect back one specific thing the user wrote. \
             Keep it to 2-3 sentences."
        }
        RewardTier::BonusInsight => {
            "Acknowledge the practice, then add one bonus insight: a non-obvious connection \
             between today's answers and the user's identity work. Keep it to 3-4 sentences."
        }
        RewardTier::PatternBreakthrough => {
            "Name the recurring pattern explicitly, using the pattern history provided, and show \
             how today's answers break from it. Frame it as a breakthrough moment. \
             Keep it to 4-5 sentences."
        }
    }
}

pub fn feedback_prompt(input: &FeedbackPromptInput<'_>) -> Prompt {
    let section = input.submission.section;
    let system = format!(
        "You are MIO, the Mind Insurance coach. You respond to a user who just completed the \
         {code} section ({title}) of their daily PROTECT practice.\n\
         Tone: direct, encouraging, never clinical. Speak to the user as \"you\".\n\
         {instruction}",
        code = section.as_str(),
        title = section.title(),
        instruction = tier_instruction(input.tier),
    );

    let mut user = format!(
        "User: {}\nPractice date: {}\nCurrent streak: {} day(s)\n",
        input.profile.first_name(),
        input.submission.practice_date,
        input.streak_days
    );
    if let Some(pattern) = &input.profile.primary_pattern {
        user.push_str(&format!("Primary pattern: {pattern}\n"));
    }
    if let Some(temperament) = &input.profile.temperament {
        user.push_str(&format!("Temperament: {temperament}\n"));
    }

    user.push_str("\n## Today's answers\n");
    let answers = input.submission.answers();
    if answers.is_empty() {
        user.push_str("(no written answers)\n");
    }
    for (question, answer) in answers {
        user.push_str(&format!("- {question}: {answer}\n"));
    }

    if !input.patterns.is_empty() {
        user.push_str("\n## Pattern history\n");
        for pattern in input.patterns {
            user.push_str(&format!(
                "- {} (seen {} time(s))\n",
                pattern.pattern_name, pattern.occurrences
            ));
        }
    }

    if let Some(knowledge) = input.knowledge {
        user.push('\n');
        user.push_str(knowledge);
    }

    Prompt { system, user }
}

/// Canned feedback used when the language model is unavailable.
pub fn fallback_feedback(section: PracticeSection, first_name: &str) -> String {
    let focus = match section {
        PracticeSection::Pro => "noticing your patterns and choosing who you are becoming",
        PracticeSection::Te => "resetting your triggers and checking where your energy goes",
        PracticeSection::Ct => "celebrating your wins and setting up tomorrow",
    };
    format!(
        "Nice work, {first_name}. You showed up for {} today: {focus}. \
         Every rep like this rewires the old story. See you at the next section.",
        section.as_str()
    )
}

/// Text used to search the knowledge base for a submission.
pub fn knowledge_query(submission: &PracticeSubmission) -> String {
    let mut query = submission
        .answers()
        .into_iter()
        .map(|(_, answer)| answer)
        .collect::<Vec<_>>()
        .join(" ");
    if query.chars().count() > MAX_QUERY_CHARS {
        query = query.chars().take(MAX_QUERY_CHARS).collect();
    }
    query
}

pub fn chat_prompt(agent: CoachAgent, message: &str, knowledge: Option<&str>) -> Prompt {
    let role = match agent {
        CoachAgent::Mio => {
            "the Mind Insurance coach. You help the user spot identity-collision patterns and \
             choose a concrete protocol"
        }
        CoachAgent::Nette => {
            "the onboarding and program guide. You answer questions about the program, its \
             practices and next steps"
        }
        CoachAgent::Me => {
            "the accountability partner. You keep the user focused on the commitments they \
             already made"
        }
    };
    let system = format!(
        "You are {}, {role}. Answer in plain language, at most 6 sentences. \
         If the knowledge base below is relevant, ground your answer in it; never invent \
         protocols that are not listed.",
        agent.display_name()
    );

    let mut user = String::new();
    if let Some(knowledge) = knowledge {
        user.push_str(knowledge);
        user.push_str("\n\n");
    }
    user.push_str("## User message\n");
    user.push_str(message.trim());

    Prompt { system, user }
}

pub fn fallback_chat_reply(agent: CoachAgent) -> String {
    format!(
        "{} here. I can't reach my full toolkit right now, so give me a minute and ask again. \
         In the meantime, take one slow breath and name the pattern you're noticing.",
        agent.display_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn profile() -> UserProfile {
        UserProfile {
            user_id: "u1".to_string(),
            display_name: Some("Sam Rivera".to_string()),
            primary_pattern: Some("comparison_catastrophe".to_string()),
            temperament: None,
        }
    }

    fn submission() -> PracticeSubmission {
        PracticeSubmission {
            user_id: "u1".to_string(),
            section: PracticeSection::Pro,
            practice_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            responses: json!({
                "pattern_check": "Caught myself scrolling and comparing again",
                "outcome": "Finished the proposal before noon"
            }),
        }
    }

    #[test]
    fn feedback_prompt_carries_answers_patterns_and_tier() {
        let profile = profile();
        let submission = submission();
        let patterns = vec![PatternSummary {
            pattern_name: "comparison_catastrophe".to_string(),
            occurrences: 4,
        }];
        let prompt = feedback_prompt(&FeedbackPromptInput {
            profile: &profile,
            submission: &submission,
            tier: RewardTier::PatternBreakthrough,
            streak_days: 5,
            patterns: &patterns,
            knowledge: Some("## Knowledge base\n\n1. [research] Reframe"),
        });

        assert!(prompt.system.contains("PRO section"));
        assert!(prompt.system.contains("breakthrough"));
        assert!(prompt.user.contains("User: Sam"));
        assert!(prompt.user.contains("Current streak: 5 day(s)"));
        assert!(prompt.user.contains("- outcome: Finished the proposal before noon"));
        assert!(prompt.user.contains("comparison_catastrophe (seen 4 time(s))"));
        assert!(prompt.user.contains("## Knowledge base"));
    }

    #[test]
    fn feedback_prompt_omits_knowledge_section_when_absent() {
        let profile = profile();
        let submission = submission();
        let prompt = feedback_prompt(&FeedbackPromptInput {
            profile: &profile,
            submission: &submission,
            tier: RewardTier::Standard,
            streak_days: 0,
            patterns: &[],
            knowledge: None,
        });
        assert!(!prompt.user.contains("Knowledge base"));
        assert!(!prompt.user.contains("Pattern history"));
    }

    #[test]
    fn fallback_texts_are_never_empty() {
        for section in [PracticeSection::Pro, PracticeSection::Te, PracticeSection::Ct] {
            let text = fallback_feedback(section, "there");
            assert!(text.contains(section.as_str()));
        }
        for agent in [CoachAgent::Mio, CoachAgent::Nette, CoachAgent::Me] {
            assert!(fallback_chat_reply(agent).starts_with(agent.display_name()));
        }
    }

    #[test]
    fn knowledge_query_joins_answers() {
        let query = knowledge_query(&submission());
        assert!(query.contains("scrolling and comparing"));
        assert!(query.contains("proposal"));
    }

    #[test]
    fn chat_prompt_puts_knowledge_before_message() {
        let prompt = chat_prompt(CoachAgent::Nette, "  What is PROTECT? ", Some("## Knowledge base"));
        assert!(prompt.system.starts_with("You are Nette"));
        assert!(prompt.user.starts_with("## Knowledge base"));
        assert!(prompt.user.ends_with("What is PROTECT?"));
    }
}
