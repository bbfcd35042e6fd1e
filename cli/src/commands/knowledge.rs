use clap::{Args, Subcommand};
use mio_core::retrieval::CoachAgent;
use serde_json::json;

use super::chat::parse_agent;
use crate::util::{api_request, exit_error, read_json_from_file};

#[derive(Subcommand)]
pub enum KnowledgeCommands {
    /// Search an agent's knowledge base
    Search(SearchArgs),
    /// Embed and store chunks from a JSON file
    Ingest {
        #[arg(long, value_parser = parse_agent)]
        agent: CoachAgent,
        /// JSON array of chunks, or an object with a `chunks` array ('-' for stdin)
        #[arg(long, short = 'f')]
        file: String,
    },
}

#[derive(Args)]
pub struct SearchArgs {
    #[arg(long)]
    pub query: String,
    #[arg(long, value_parser = parse_agent, default_value = "mio")]
    pub agent: CoachAgent,
    /// Max results (1-20, default: 5)
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub category: Option<String>,
    /// Only chunks tagged with this pattern
    #[arg(long)]
    pub pattern: Option<String>,
    #[arg(long)]
    pub temperament: Option<String>,
    /// Only chunks that take at most this many minutes
    #[arg(long)]
    pub max_minutes: Option<i32>,
    /// Only emergency protocols
    #[arg(long)]
    pub emergency_only: bool,
}

pub async fn run(api_url: &str, token: &str, command: KnowledgeCommands, raw: bool) -> i32 {
    match command {
        KnowledgeCommands::Search(args) => {
            api_request(
                api_url,
                reqwest::Method::POST,
                "/v1/knowledge/search",
                Some(token),
                Some(search_body(&args)),
                raw,
            )
            .await
        }
        KnowledgeCommands::Ingest { agent, file } => {
            let payload = match read_json_from_file(&file) {
                Ok(v) => v,
                Err(e) => exit_error(&e, Some("Provide a JSON file of chunks or '-' for stdin.")),
            };
            let body = match ingest_body(agent, payload) {
                Ok(b) => b,
                Err(e) => exit_error(&e, Some("Each chunk needs chunk_key, chunk_text and category.")),
            };
            api_request(
                api_url,
                reqwest::Method::POST,
                "/v1/knowledge/chunks",
                Some(token),
                Some(body),
                raw,
            )
            .await
        }
    }
}

fn search_body(args: &SearchArgs) -> serde_json::Value {
    json!({
        "query": args.query,
        "agent": args.agent,
        "limit": args.limit,
        "filters": {
            "category": args.category,
            "pattern": args.pattern,
            "temperament": args.temperament,
            "max_minutes": args.max_minutes,
            "emergency_only": args.emergency_only,
        }
    })
}

fn ingest_body(agent: CoachAgent, payload: serde_json::Value) -> Result<serde_json::Value, String> {
    let chunks = match payload {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("chunks") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Err("object payload must contain a `chunks` array".to_string()),
        },
        _ => return Err("payload must be a JSON array or an object with `chunks`".to_string()),
    };
    if chunks.is_empty() {
        return Err("no chunks to ingest".to_string());
    }
    Ok(json!({ "agent": agent, "chunks": chunks }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_body_accepts_bare_array_and_wrapped_object() {
        let bare = ingest_body(CoachAgent::Mio, json!([{"chunk_key": "a"}])).unwrap();
        assert_eq!(bare["agent"], "mio");
        assert_eq!(bare["chunks"].as_array().unwrap().len(), 1);

        let wrapped = ingest_body(
            CoachAgent::Nette,
            json!({"chunks": [{"chunk_key": "a"}, {"chunk_key": "b"}]}),
        )
        .unwrap();
        assert_eq!(wrapped["agent"], "nette");
        assert_eq!(wrapped["chunks"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn ingest_body_rejects_empty_or_malformed_payloads() {
        assert!(ingest_body(CoachAgent::Mio, json!([])).is_err());
        assert!(ingest_body(CoachAgent::Mio, json!({"items": []})).is_err());
        assert!(ingest_body(CoachAgent::Mio, json!("chunks")).is_err());
    }

    #[test]
    fn search_body_nests_filters() {
        let args = SearchArgs {
            query: "morning trigger".to_string(),
            agent: CoachAgent::Mio,
            limit: Some(3),
            category: None,
            pattern: Some("success_sabotage".to_string()),
            temperament: None,
            max_minutes: Some(10),
            emergency_only: false,
        };
        let body = search_body(&args);
        assert_eq!(body["limit"], 3);
        assert_eq!(body["filters"]["pattern"], "success_sabotage");
        assert_eq!(body["filters"]["max_minutes"], 10);
        assert!(body["filters"]["category"].is_null());
    }
}
