//! Vision oracle: provider abstraction + defensive reply parsing.
//!
//! The oracle is an external, quota-limited model that reads a screenshot and
//! names its poster. It is treated as unreliable: any malformed reply resolves
//! to [`OracleOutcome::NoIdentityFound`], transport failures to
//! [`OracleOutcome::OracleError`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::oracle::{OracleConfig, ENV_ANTHROPIC_API_KEY};
use crate::enrich::image::FetchedImage;
use crate::retry::Backoff;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Fixed extraction instruction sent with every image.
pub const EXTRACTION_PROMPT: &str = "Look at this LinkedIn screenshot. Extract the name and headline of the POSTER, \
the person who wrote or shared this post. Their name appears at the TOP of the post, next to the circular \
profile photo, in a larger or bold font, typically as \"Name · connection · time\".\n\n\
IMPORTANT: Do NOT extract names of people mentioned IN the post content, in shared images, or in the body text. \
Only the poster's name at the top.\n\n\
Return ONLY valid JSON: {\"name\": \"...\", \"headline\": \"...\"}\n\
If you cannot identify the poster's name, return {\"name\": null, \"headline\": null}";

const MAX_NAME_CHARS: usize = 100;
const MAX_HEADLINE_CHARS: usize = 300;

/// Result of one oracle invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleOutcome {
    Extracted {
        name: String,
        headline: Option<String>,
    },
    NoIdentityFound,
    OracleError(String),
}

/// Trait object used by the enrichment worker.
pub trait VisionOracle: Send + Sync {
    fn extract<'a>(
        &'a self,
        image: &'a FetchedImage,
    ) -> Pin<Box<dyn Future<Output = OracleOutcome> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynVisionOracle = Arc<dyn VisionOracle>;

/// Parse the oracle's free-form reply.
///
/// Scans for the first `{` that starts a well-formed JSON object and reads
/// `name` / `headline` from it. Blank or literal "null" names mean no identity.
pub fn parse_identity_reply(text: &str) -> OracleOutcome {
    let object = text.char_indices().filter(|(_, c)| *c == '{').find_map(|(i, _)| {
        let mut stream =
            serde_json::Deserializer::from_str(&text[i..]).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(serde_json::Value::Object(map))) => Some(map),
            _ => None,
        }
    });
    let Some(map) = object else {
        return OracleOutcome::NoIdentityFound;
    };

    let field = |key: &str, cap: usize| -> Option<String> {
        let raw = map.get(key)?.as_str()?;
        let cleaned = collapse_ws(raw);
        if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("null") {
            return None;
        }
        Some(cleaned.chars().take(cap).collect())
    };

    match field("name", MAX_NAME_CHARS) {
        Some(name) => OracleOutcome::Extracted {
            name,
            headline: field("headline", MAX_HEADLINE_CHARS),
        },
        None => OracleOutcome::NoIdentityFound,
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ------------------------------------------------------------
// Anthropic Messages API provider
// ------------------------------------------------------------

pub struct AnthropicVisionOracle {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_tokens: u32,
    throttle: Backoff,
}

impl AnthropicVisionOracle {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("identity-corpus/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            max_tokens: 200,
            throttle: Backoff::default(),
        })
    }

    pub fn with_throttle(mut self, backoff: Backoff) -> Self {
        self.throttle = backoff;
        self
    }

    async fn call(&self, image: &FetchedImage) -> OracleOutcome {
        #[derive(Serialize)]
        struct ImageSource<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            media_type: &'a str,
            data: String,
        }
        #[derive(Serialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        enum Block<'a> {
            Image { source: ImageSource<'a> },
            Text { text: &'a str },
        }
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: Vec<Block<'a>>,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            content: Vec<RespBlock>,
        }
        #[derive(Deserialize)]
        struct RespBlock {
            #[serde(default)]
            text: Option<String>,
        }

        let data = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        let req = Req {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Msg {
                role: "user",
                content: vec![
                    Block::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: image.format.media_type(),
                            data,
                        },
                    },
                    Block::Text {
                        text: EXTRACTION_PROMPT,
                    },
                ],
            }],
        };

        let mut attempt = 0u32;
        let resp = loop {
            let sent = self
                .http
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&req)
                .send()
                .await;
            let resp = match sent {
                Ok(r) => r,
                Err(e) => return OracleOutcome::OracleError(format!("request failed: {e}")),
            };
            let status = resp.status().as_u16();
            // 429 rate limit, 529 overloaded.
            if status == 429 || status == 529 {
                attempt += 1;
                match self.throttle.delay_for(attempt, None) {
                    Some(wait) => {
                        tracing::info!(target: "enrich", status, attempt, "oracle throttled; backing off");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    None => {
                        return OracleOutcome::OracleError(format!(
                            "throttled after {} retries",
                            self.throttle.max_retries
                        ))
                    }
                }
            }
            if !resp.status().is_success() {
                return OracleOutcome::OracleError(format!("status {status}"));
            }
            break resp;
        };

        let body: Resp = match resp.json().await {
            Ok(b) => b,
            // Unreadable body is a malformed reply, not a transport failure.
            Err(_) => return OracleOutcome::NoIdentityFound,
        };
        let text = body
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        parse_identity_reply(&text)
    }
}

impl VisionOracle for AnthropicVisionOracle {
    fn extract<'a>(
        &'a self,
        image: &'a FetchedImage,
    ) -> Pin<Box<dyn Future<Output = OracleOutcome> + Send + 'a>> {
        Box::pin(self.call(image))
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

// ------------------------------------------------------------
// Fixed-reply oracle (local runs, tests)
// ------------------------------------------------------------

/// Replies with a fixed raw text on every call and counts calls.
pub struct FixedReplyOracle {
    reply: String,
    calls: AtomicUsize,
}

impl FixedReplyOracle {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionOracle for FixedReplyOracle {
    fn extract<'a>(
        &'a self,
        _image: &'a FetchedImage,
    ) -> Pin<Box<dyn Future<Output = OracleOutcome> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let out = parse_identity_reply(&self.reply);
        Box::pin(async move { out })
    }

    fn provider_name(&self) -> &'static str {
        "fixed"
    }
}

// ------------------------------------------------------------
// Factory
// ------------------------------------------------------------

/// Build the configured oracle. `None` disables enrichment: no key for the
/// Anthropic provider, or an unknown provider.
pub fn build_oracle(cfg: &OracleConfig) -> Option<DynVisionOracle> {
    match cfg.provider.as_str() {
        "fixed" => Some(Arc::new(FixedReplyOracle::new(cfg.fixed_reply.clone()))),
        "anthropic" | "claude" => {
            if !cfg.has_key() {
                tracing::warn!(target: "enrich", "{ENV_ANTHROPIC_API_KEY} not set; oracle disabled");
                return None;
            }
            match AnthropicVisionOracle::new(cfg.api_key.clone(), &cfg.model, cfg.timeout()) {
                Ok(o) => {
                    tracing::info!(target: "enrich", model = %cfg.model, key_len = cfg.api_key.len(), "oracle ready");
                    Some(Arc::new(o.with_throttle(cfg.throttle_backoff())))
                }
                Err(e) => {
                    tracing::warn!(target: "enrich", error = %e, "building oracle client failed");
                    None
                }
            }
        }
        other => {
            tracing::warn!(target: "enrich", provider = other, "unsupported oracle provider");
            None
        }
    }
}
