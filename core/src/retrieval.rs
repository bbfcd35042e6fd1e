use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::similarity::{cosine_similarity, tokenize};

pub const DEFAULT_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 20;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.70;

const KEYWORD_MATCH_MIN: f64 = 0.92;
const KEYWORD_BOOST_PER_MATCH: f64 = 0.05;
const KEYWORD_BOOST_CAP: f64 = 0.15;
const KEYWORD_MIN_TOKEN_LEN: usize = 4;

const MAX_EMBEDDING_TOKENS: usize = 8_000;
const CHARS_PER_TOKEN: usize = 4;

/// Coaching agent; each one owns a separate knowledge corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CoachAgent {
    Mio,
    Nette,
    Me,
}

impl CoachAgent {
    pub fn as_str(self) -> &'static str {
        match self {
            CoachAgent::Mio => "mio",
            CoachAgent::Nette => "nette",
            CoachAgent::Me => "me",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mio" => Some(CoachAgent::Mio),
            "nette" => Some(CoachAgent::Nette),
            "me" => Some(CoachAgent::Me),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            CoachAgent::Mio => "MIO",
            CoachAgent::Nette => "Nette",
            CoachAgent::Me => "ME",
        }
    }
}

/// A precomputed knowledge chunk as stored, embedding included.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeChunk {
    pub id: Uuid,
    pub agent: CoachAgent,
    pub chunk_key: String,
    pub chunk_text: String,
    pub chunk_summary: String,
    pub category: String,
    pub applicable_patterns: Vec<String>,
    pub temperament_match: Vec<String>,
    pub time_commitment_max: Option<i32>,
    pub is_emergency_protocol: bool,
    pub embedding: Vec<f64>,
}

/// Metadata filters applied before scoring.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct ChunkFilters {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub temperament: Option<String>,
    /// Only chunks whose time commitment is at most this many minutes
    #[serde(default)]
    pub max_minutes: Option<i32>,
    #[serde(default)]
    pub emergency_only: bool,
}

impl ChunkFilters {
    pub fn matches(&self, chunk: &KnowledgeChunk) -> bool {
        if let Some(category) = &self.category {
            if !chunk.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(pattern) = &self.pattern {
            if !chunk
                .applicable_patterns
                .iter()
                .any(|p| p.eq_ignore_ascii_case(pattern))
            {
                return false;
            }
        }
        if let Some(temperament) = &self.temperament {
            if !chunk
                .temperament_match
                .iter()
                .any(|t| t.eq_ignore_ascii_case(temperament))
            {
                return false;
            }
        }
        if let Some(max_minutes) = self.max_minutes {
            match chunk.time_commitment_max {
                Some(minutes) if minutes <= max_minutes => {}
                _ => return false,
            }
        }
        if self.emergency_only && !chunk.is_emergency_protocol {
            return false;
        }
        true
    }
}

/// One retrieval hit, as returned to callers and fed into prompts.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RetrievedChunk {
    pub chunk_key: String,
    pub category: String,
    pub summary: String,
    pub text: String,
    pub applicable_patterns: Vec<String>,
    /// Combined score used for ordering (similarity + keyword boost)
    pub score: f64,
    pub similarity: f64,
    pub keyword_boost: f64,
}

#[derive(Debug, Clone)]
pub struct RankOptions {
    pub limit: usize,
    pub min_similarity: f64,
    pub filters: ChunkFilters,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            filters: ChunkFilters::default(),
        }
    }
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

fn chunk_keywords(chunk: &KnowledgeChunk) -> Vec<String> {
    let mut keywords = tokenize(&chunk.category.replace(['-', '_'], " "));
    for pattern in &chunk.applicable_patterns {
        keywords.extend(tokenize(&pattern.replace(['-', '_'], " ")));
    }
    keywords
}

/// Keyword half of the hybrid score: a fixed boost per distinct query token
/// that fuzzily matches the chunk's category or patterns.
pub fn keyword_boost(query: &str, chunk: &KnowledgeChunk) -> f64 {
    let keywords = chunk_keywords(chunk);
    if keywords.is_empty() {
        return 0.0;
    }

    let query_tokens: HashSet<String> = tokenize(query)
        .into_iter()
        .filter(|t| t.chars().count() >= KEYWORD_MIN_TOKEN_LEN)
        .collect();

    let matches = query_tokens
        .iter()
        .filter(|token| {
            keywords
                .iter()
                .any(|kw| strsim::jaro_winkler(token, kw) >= KEYWORD_MATCH_MIN)
        })
        .count();

    (matches as f64 * KEYWORD_BOOST_PER_MATCH).min(KEYWORD_BOOST_CAP)
}

/// Rank an agent's chunks against a query embedding.
///
/// Chunks failing the filters or scoring below `min_similarity` are dropped.
/// The sort is stable, so equal scores keep their input order.
pub fn rank_chunks(
    query: &str,
    query_embedding: &[f64],
    chunks: &[KnowledgeChunk],
    options: &RankOptions,
) -> Vec<RetrievedChunk> {
    let mut scored: Vec<RetrievedChunk> = chunks
        .iter()
        .filter(|chunk| options.filters.matches(chunk))
        .filter_map(|chunk| {
            let similarity = cosine_similarity(query_embedding, &chunk.embedding);
            if similarity < options.min_similarity {
                return None;
            }
            let boost = keyword_boost(query, chunk);
            Some(RetrievedChunk {
                chunk_key: chunk.chunk_key.clone(),
                category: chunk.category.clone(),
                summary: chunk.chunk_summary.clone(),
                text: chunk.chunk_text.clone(),
                applicable_patterns: chunk.applicable_patterns.clone(),
                score: round_score(similarity + boost),
                similarity: round_score(similarity),
                keyword_boost: round_score(boost),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(options.limit);
    scored
}

/// Render retrieved chunks as a prompt section. `None` when nothing was found,
/// so callers can leave the section out entirely.
pub fn format_context(chunks: &[RetrievedChunk]) -> Option<String> {
    if chunks.is_empty() {
        return None;
    }

    let mut out = String::from("## Knowledge base\n");
    for (idx, chunk) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. [{}] {}\n{}\n",
            idx + 1,
            chunk.category,
            chunk.summary,
            chunk.text.trim()
        ));
    }
    Some(out)
}

/// Text submitted to the embedding provider for a chunk: a metadata header
/// followed by the body. Bodies estimated above the provider's token budget
/// are replaced by the summary.
pub fn prepare_embedding_text(
    chunk_text: &str,
    chunk_summary: &str,
    category: &str,
    patterns: &[String],
    temperaments: &[String],
) -> String {
    let estimated_tokens = chunk_text.chars().count() / CHARS_PER_TOKEN;
    let body = if estimated_tokens < MAX_EMBEDDING_TOKENS {
        chunk_text
    } else {
        chunk_summary
    };

    let mut header = Vec::new();
    if !chunk_summary.is_empty() {
        header.push(format!("Title: {chunk_summary}"));
    }
    if !category.is_empty() {
        header.push(format!("Category: {category}"));
    }
    if !patterns.is_empty() {
        header.push(format!("Patterns: {}", patterns.join(", ")));
    }
    if !temperaments.is_empty() {
        header.push(format!("Temperament: {}", temperaments.join(", ")));
    }

    format!("{}\n\n{}", header.join("\n"), body)
}
