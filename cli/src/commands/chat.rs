use clap::Args;
use mio_core::retrieval::CoachAgent;
use serde_json::json;

use crate::util::api_request;

#[derive(Args)]
pub struct ChatArgs {
    #[arg(long)]
    pub user_id: String,
    /// Coach to talk to: mio, nette or me
    #[arg(long, value_parser = parse_agent, default_value = "mio")]
    pub agent: CoachAgent,
    /// Message text
    #[arg(long)]
    pub message: String,
}

pub fn parse_agent(value: &str) -> Result<CoachAgent, String> {
    CoachAgent::parse(value)
        .ok_or_else(|| format!("unknown agent '{value}' (expected mio, nette or me)"))
}

pub async fn run(api_url: &str, token: &str, args: ChatArgs, raw: bool) -> i32 {
    let body = json!({
        "user_id": args.user_id,
        "agent": args.agent,
        "message": args.message,
    });
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/chat",
        Some(token),
        Some(body),
        raw,
    )
    .await
}
