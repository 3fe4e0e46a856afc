//! Core data types that flow through the classification engine.
//!
//! The data lifecycle is:
//!
//! ```text
//! artifact → Pattern ──build──▶ IndexSnapshot
//!                                     ▲
//! WeaveUnit → ClassificationRequest ──┼──▶ PatternMatch → ClassificationResponse
//!                                  search
//! ```
//!
//! # Type relationships
//!
//! - A **[`Pattern`]** is a read-only taxonomy entry produced by the cold
//!   path: a slash-delimited hierarchical id, a description, sample texts,
//!   and free-form metadata. Patterns are immutable once loaded.
//! - A **[`WeaveUnit`]** is one ephemeral input observation submitted for
//!   classification.
//! - A **[`PatternMatch`]** pairs a pattern id with a confidence in
//!   `[0, 1]` and metadata hydrated from the catalogue.
//! - A **[`ClassificationResponse`]** carries the best match (if any),
//!   ranked alternatives, timing, and a terminal [`ResponseStatus`].
//!
//! All request/response types serialize with camelCase field names; that is
//! the wire contract of the HTTP gateway and the artifact format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Inclusive bounds on `maxAlternatives` in a classification request.
pub const MAX_ALTERNATIVES_RANGE: (u32, u32) = (1, 10);

/// Pattern ids are slash-delimited paths of 2–6 non-empty segments.
pub const PATTERN_ID_SEGMENTS: (usize, usize) = (2, 6);

/// Domain tag attached to a pattern by the cold path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMixin {
    Time,
    Emotion,
    ThreadLink,
    Location,
    Person,
    Activity,
    Health,
    Development,
}

/// A taxonomy entry: one concept the engine can classify text into.
///
/// Built by the cold path and read-only here. The hierarchy fields
/// (`area` … `form`) mirror the segments of `id` when the cold path
/// chooses to denormalize them; the engine treats them as opaque
/// display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Stable identity: slash-delimited path of 2–6 segments,
    /// e.g. `child_development/sleep/nap/crib/early_am`. Case-sensitive.
    pub id: String,
    /// Human-readable description of the concept.
    pub description: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub mixins: Vec<PatternMixin>,
    /// Representative example texts. The index build policy embeds these
    /// together with `description`; at least one is required.
    pub sample_texts: Vec<String>,
    /// Free-form key-value bag, passed through to match results untouched.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Pattern {
    /// Structural validation applied at index load.
    ///
    /// Checks the id shape (2–6 non-empty slash segments) and that at
    /// least one sample text is present.
    pub fn validate(&self) -> Result<(), EngineError> {
        validate_pattern_id(&self.id)?;
        if self.sample_texts.is_empty() {
            return Err(EngineError::Load(format!(
                "pattern `{}` has no sample texts",
                self.id
            )));
        }
        Ok(())
    }

    /// The slash-delimited hierarchy segments of the id.
    pub fn hierarchy(&self) -> impl Iterator<Item = &str> {
        self.id.split('/')
    }
}

/// Validates the shape of a pattern id: 2–6 non-empty slash segments.
pub fn validate_pattern_id(id: &str) -> Result<(), EngineError> {
    let (min, max) = PATTERN_ID_SEGMENTS;
    let segments: Vec<&str> = id.split('/').collect();
    if segments.len() < min || segments.len() > max {
        return Err(EngineError::Load(format!(
            "pattern id `{id}` has {} segments, expected {min}–{max}",
            segments.len()
        )));
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(EngineError::Load(format!(
            "pattern id `{id}` contains an empty segment"
        )));
    }
    Ok(())
}

/// One input observation submitted for classification. Ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaveUnit {
    /// Generated when absent; echoed back as the response `requestId`.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// ISO-8601 timestamp supplied by the caller, if any.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl WeaveUnit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            text: text.into(),
            metadata: HashMap::new(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Wire request for the `/classify` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRequest {
    pub weave_unit: WeaveUnit,
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: u32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub filter_by_domain: Option<String>,
}

fn default_max_alternatives() -> u32 {
    3
}

fn default_confidence_threshold() -> f64 {
    0.5
}

impl ClassificationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            weave_unit: WeaveUnit::new(text),
            max_alternatives: default_max_alternatives(),
            confidence_threshold: default_confidence_threshold(),
            filter_by_domain: None,
        }
    }

    /// Range validation for the numeric knobs; text emptiness is checked
    /// separately inside the pipeline so it reports as `empty_text`.
    pub fn validate(&self) -> Result<(), EngineError> {
        let (min, max) = MAX_ALTERNATIVES_RANGE;
        if self.max_alternatives < min || self.max_alternatives > max {
            return Err(EngineError::InvalidRequest(format!(
                "maxAlternatives must be within {min}..={max}, got {}",
                self.max_alternatives
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(EngineError::InvalidRequest(format!(
                "confidenceThreshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}

/// A ranked candidate pattern for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatch {
    pub pattern_id: String,
    /// Rescaled cosine similarity, `clamp((cos + 1) / 2, 0, 1)`.
    pub confidence: f64,
    /// Hydrated from the catalogue: description, domain, hierarchy fields,
    /// plus the pattern's free-form metadata merged in.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Terminal status of a classification response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    NoMatch,
    Error,
}

/// Wire response for the `/classify` endpoint.
///
/// Invariants upheld by the pipeline:
/// - `status == Success` implies `match` is present and above threshold.
/// - `status == NoMatch` implies `match` is null; alternatives may still
///   carry near-misses.
/// - `alternatives` are strictly descending by confidence (ties broken by
///   ascending pattern id) and never contain the chosen match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResponse {
    pub request_id: Uuid,
    #[serde(rename = "match")]
    pub matched: Option<PatternMatch>,
    #[serde(default)]
    pub alternatives: Vec<PatternMatch>,
    pub processing_time_ms: f64,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ClassificationResponse {
    /// Response for a completed pipeline run. Status is `Success` when a
    /// match cleared the threshold, `NoMatch` otherwise.
    pub fn completed(
        request_id: Uuid,
        matched: Option<PatternMatch>,
        alternatives: Vec<PatternMatch>,
        processing_time_ms: f64,
    ) -> Self {
        let status = if matched.is_some() {
            ResponseStatus::Success
        } else {
            ResponseStatus::NoMatch
        };
        Self {
            request_id,
            matched,
            alternatives,
            processing_time_ms,
            status,
            error_message: None,
        }
    }

    /// Error response carrying the failure's wire code in `errorMessage`.
    pub fn failure(request_id: Uuid, error: &EngineError, processing_time_ms: f64) -> Self {
        Self {
            request_id,
            matched: None,
            alternatives: Vec::new(),
            processing_time_ms,
            status: ResponseStatus::Error,
            error_message: Some(error.wire_code().to_string()),
        }
    }
}
