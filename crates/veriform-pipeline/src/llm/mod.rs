//! Model-backed extraction: attempt 2 of the two-attempt ceiling.
//!
//! One completion call per field, over capped excerpts, with an explicit
//! exact-quotation instruction. A structurally invalid response earns exactly
//! one corrective retry; a second failure is terminal for the field's model
//! attempt. Transport errors, rate limits, and timeouts are never retried.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use veriform_model::normalize::{normalize_date, normalize_phone, normalize_text};
use veriform_model::{
    Candidate, CandidateScores, Evidence, ExtractionMethod, FieldSpec, FieldType, RunOptions,
};

use crate::excerpts::DocExcerpt;

#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
pub mod providers;

// ============================================================================
// Provider interface
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited")]
    RateLimited,
    #[error("network error: {0}")]
    Network(String),
    #[error("model call timed out")]
    Timeout,
    #[error("invalid response structure: {0}")]
    InvalidJson(String),
    #[error("no model provider configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// Structural failures are the only retryable class, and only once.
    pub fn is_structural(&self) -> bool {
        matches!(self, LlmError::InvalidJson(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// A completion backend. Implementations live behind provider features; the
/// pipeline only sees this trait.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Stand-in when no provider is configured: every field's model attempt
/// resolves to `llm_unavailable` and the heuristics carry the run.
pub struct DisabledProvider;

#[async_trait]
impl CompletionProvider for DisabledProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured(
            "set ANTHROPIC_API_KEY, OPENAI_API_KEY, or VERIFORM_LLM_URL".to_string(),
        ))
    }
}

/// Scripted provider for tests: returns queued responses in order and records
/// every request, so call-count ceilings can be asserted exactly.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<String, LlmError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
    }
}

// ============================================================================
// Field extraction
// ============================================================================

/// Extracts candidates for one field via a single bounded completion call.
pub struct FieldExtractor<'a> {
    provider: &'a dyn CompletionProvider,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(provider: &'a dyn CompletionProvider) -> Self {
        Self { provider }
    }

    /// Run the model attempt for a field.
    ///
    /// Contract: at most one call plus one structural retry. The timeout
    /// bounds each call and is treated exactly like a transport failure.
    pub async fn extract(
        &self,
        field: &FieldSpec,
        excerpts: &[DocExcerpt],
        options: &RunOptions,
    ) -> Result<Vec<Candidate>, LlmError> {
        if excerpts.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_extraction_prompt(field, excerpts);
        let mut messages = vec![Message {
            role: Role::User,
            content: prompt,
        }];

        let request = CompletionRequest {
            messages: messages.clone(),
            max_tokens: options.max_llm_tokens,
            temperature: 0.0,
        };

        let first = self.complete_bounded(&request, options).await?;
        let first_error = match parse_llm_response(field, &first) {
            Ok(candidates) => return Ok(candidates),
            Err(e) => e,
        };

        tracing::debug!(field = %field.key, error = %first_error, "model response malformed, issuing corrective retry");

        messages.push(Message {
            role: Role::Assistant,
            content: first,
        });
        messages.push(Message {
            role: Role::User,
            content: build_retry_prompt(field, &first_error),
        });
        let retry_request = CompletionRequest {
            messages,
            max_tokens: options.max_llm_tokens,
            temperature: 0.0,
        };

        let second = self.complete_bounded(&retry_request, options).await?;
        parse_llm_response(field, &second).map_err(LlmError::InvalidJson)
    }

    async fn complete_bounded(
        &self,
        request: &CompletionRequest,
        options: &RunOptions,
    ) -> Result<String, LlmError> {
        let timeout = Duration::from_secs(options.llm_timeout_secs);
        match tokio::time::timeout(timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout),
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn type_instruction(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Date => "Return the date in YYYY-MM-DD format.",
        FieldType::Phone => {
            "Return the phone number with digits only (include country code if present)."
        }
        FieldType::String => "Return the value as a string.",
        FieldType::StringOrList => {
            "Return as a string. If multiple values, separate with commas."
        }
    }
}

fn build_extraction_prompt(field: &FieldSpec, excerpts: &[DocExcerpt]) -> String {
    let context: Vec<String> = excerpts
        .iter()
        .map(|e| format!("[Document: {}, Page: {}]\n{}", e.doc_id, e.page, e.text))
        .collect();
    let context = context.join("\n\n");

    let label_line = field
        .label
        .as_ref()
        .map(|l| format!("Label: {l}\n"))
        .unwrap_or_default();

    format!(
        r#"Extract the value for field "{key}" from the following document excerpts.

Field: {key}
Type: {ty:?}
{label_line}
{hint}

IMPORTANT:
- You MUST include evidence showing where you found the value.
- The quoted_text must be an EXACT quote from the document.
- If you cannot find the field, return an empty array [].

Return ONLY valid JSON in this exact format:
[
  {{
    "raw_value": "the value as found in the document",
    "normalized_value": "the normalized/cleaned value",
    "evidence": [
      {{
        "doc_id": "document id where found",
        "page": page_number,
        "quoted_text": "exact quote from document containing the value"
      }}
    ]
  }}
]

Document excerpts:
{context}

Return ONLY the JSON array, no other text."#,
        key = field.key,
        ty = field.field_type,
        label_line = label_line,
        hint = type_instruction(field.field_type),
        context = context,
    )
}

fn build_retry_prompt(field: &FieldSpec, original_error: &str) -> String {
    format!(
        r#"Your previous response was not valid JSON. Error: {original_error}

Return ONLY a valid JSON array matching this schema for field "{key}":

[
  {{
    "raw_value": "string",
    "normalized_value": "string",
    "evidence": [
      {{
        "doc_id": "string",
        "page": number,
        "quoted_text": "string"
      }}
    ]
  }}
]

If no value found, return: []

Return ONLY the JSON array, nothing else."#,
        key = field.key,
    )
}

// ============================================================================
// Response parsing
// ============================================================================

/// Strip a fenced markdown code block if the model wrapped its JSON in one.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the fence line (possibly "```json"), keep until the closing fence.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body).trim()
}

fn normalize_value_for_field(field_type: FieldType, raw_value: &str) -> String {
    match field_type {
        FieldType::Date => {
            normalize_date(raw_value).unwrap_or_else(|| normalize_text(raw_value))
        }
        FieldType::Phone => normalize_phone(raw_value).0,
        FieldType::String | FieldType::StringOrList => normalize_text(raw_value),
    }
}

/// Parse a model response into candidates.
///
/// Structural failure (not a JSON array) is an error and triggers the retry
/// path. Individually malformed items and evidence entries are dropped
/// silently; items with no usable evidence never become candidates.
pub fn parse_llm_response(field: &FieldSpec, response_text: &str) -> Result<Vec<Candidate>, String> {
    let text = strip_code_fences(response_text);

    let data: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    let items = data
        .as_array()
        .ok_or_else(|| "response must be a JSON array".to_string())?;

    let mut candidates = Vec::new();

    for item in items {
        let Some(obj) = item.as_object() else { continue };

        let Some(raw_value) = obj.get("raw_value").and_then(|v| v.as_str()) else {
            continue;
        };
        if raw_value.is_empty() {
            continue;
        }

        let normalized_value = obj
            .get("normalized_value")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| normalize_value_for_field(field.field_type, raw_value));

        let mut evidence = Vec::new();
        if let Some(items) = obj.get("evidence").and_then(|v| v.as_array()) {
            for ev in items {
                let Some(ev) = ev.as_object() else { continue };
                let doc_id = ev.get("doc_id").and_then(|v| v.as_str()).unwrap_or("");
                let page = ev.get("page").and_then(|v| v.as_u64()).unwrap_or(0);
                let quoted = ev.get("quoted_text").and_then(|v| v.as_str()).unwrap_or("");
                if doc_id.is_empty() || page == 0 || quoted.is_empty() {
                    continue;
                }
                evidence.push(Evidence::new(doc_id, page as u32, quoted));
            }
        }
        if evidence.is_empty() {
            continue;
        }

        candidates.push(Candidate {
            field: field.key,
            raw_value: raw_value.to_string(),
            normalized_value,
            evidence,
            from_method: ExtractionMethod::Llm,
            validators: Vec::new(),
            rejected_reasons: Vec::new(),
            // The model claims an exact quote; the evidence check decides.
            scores: CandidateScores::new(1.0, 0.0, 0.0),
        });
    }

    Ok(candidates)
}
