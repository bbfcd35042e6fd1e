use chrono::NaiveDate;
use clap::Args;
use mio_core::feedback::PracticeSection;
use serde_json::json;

use crate::util::api_request;

#[derive(Args)]
pub struct FeedbackArgs {
    /// User whose practice should receive feedback
    #[arg(long)]
    pub user_id: String,
    /// Practice section: PRO, TE or CT
    #[arg(long, value_parser = parse_section)]
    pub section: PracticeSection,
    /// Practice date (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

pub fn parse_section(value: &str) -> Result<PracticeSection, String> {
    PracticeSection::parse(value)
        .ok_or_else(|| format!("unknown section '{value}' (expected PRO, TE or CT)"))
}

fn request_body(args: &FeedbackArgs) -> serde_json::Value {
    let date = args
        .date
        .unwrap_or_else(|| chrono::Utc::now().date_naive());
    json!({
        "user_id": args.user_id,
        "section": args.section.as_str(),
        "practice_date": date.to_string(),
    })
}

pub async fn run(api_url: &str, token: &str, args: FeedbackArgs, raw: bool) -> i32 {
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/feedback/section",
        Some(token),
        Some(request_body(&args)),
        raw,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_section_accepts_any_case() {
        assert_eq!(parse_section("te").unwrap(), PracticeSection::Te);
        assert_eq!(parse_section(" CT ").unwrap(), PracticeSection::Ct);
        assert!(parse_section("protect").is_err());
    }

    #[test]
    fn request_body_uses_wire_codes() {
        let args = FeedbackArgs {
            user_id: "u1".to_string(),
            section: PracticeSection::Pro,
            date: NaiveDate::from_ymd_opt(2025, 1, 10),
        };
        let body = request_body(&args);
        assert_eq!(body["section"], "PRO");
        assert_eq!(body["practice_date"], "2025-01-10");
        assert_eq!(body["user_id"], "u1");
    }
}
