//! Decision oracle: an LLM asked for a single verdict token.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::context::MarketContext;
use crate::decision::Decision;
use crate::types::Candidate;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_TOKENS: u32 = 8;

const SYSTEM_PROMPT: &str = "You are a futures trading assistant reviewing order-flow clusters. \
Reply with exactly one of: LONG, SHORT, BOOSTED_LONG, BOOSTED_SHORT, SKIP. No other text.";

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle reply had no choices")]
    Empty,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        candidate: &Candidate,
        context: Option<&MarketContext>,
    ) -> Result<Decision, OracleError>;
}

/// The textual context blob sent as the user message.
pub fn build_prompt(candidate: &Candidate, context: Option<&MarketContext>) -> String {
    let mut prompt = format!(
        "Symbol: {}\nClassifier signal: {}\nStrongest bucket: {}\nBucket buy volume: {}\nBucket sell volume: {}\nTrailing buy ratio: {}%\n",
        candidate.symbol,
        candidate.signal,
        candidate.bucket_price,
        candidate.buy_volume,
        candidate.sell_volume,
        candidate.buy_ratio.round_dp(2),
    );
    match context {
        Some(ctx) => prompt.push_str(&format!(
            "Open interest: {}\n24h quote volume: {}\nLast price: {}\nSpot price: {}\nBasis: {}%\n",
            ctx.open_interest,
            ctx.quote_volume_24h,
            ctx.last_price,
            ctx.spot_price,
            ctx.basis_pct().round_dp(3),
        )),
        None => prompt.push_str("Market context: unavailable\n"),
    }
    prompt.push_str("\nVerdict?");
    prompt
}

// ============================================================================
// OpenAI chat completions
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiOracle {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiOracle {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url: url.into(), api_key: api_key.into(), model: model.into() }
    }
}

fn first_reply(response: ChatResponse) -> Result<String, OracleError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or(OracleError::Empty)
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    async fn decide(
        &self,
        candidate: &Candidate,
        context: Option<&MarketContext>,
    ) -> Result<Decision, OracleError> {
        let prompt = build_prompt(candidate, context);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &prompt },
            ],
            temperature: 0.0,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status { status: status.as_u16(), body });
        }

        let reply = first_reply(response.json::<ChatResponse>().await?)?;
        let decision = Decision::parse(&reply);
        debug!(reply = %reply.trim(), decision = %decision, "oracle replied");
        Ok(decision)
    }
}

/// Stand-in when no oracle is configured: the classifier's own verdict.
pub struct PassthroughOracle;

#[async_trait]
impl DecisionOracle for PassthroughOracle {
    async fn decide(
        &self,
        candidate: &Candidate,
        _context: Option<&MarketContext>,
    ) -> Result<Decision, OracleError> {
        Ok(Decision::from(candidate.signal))
    }
}
