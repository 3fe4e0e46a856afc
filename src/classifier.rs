//! The classification pipeline and the atomic snapshot slot.
//!
//! [`Classifier`] owns the single publication slot for the active
//! [`IndexSnapshot`] and runs the end-to-end pipeline:
//!
//! ```text
//! validate → embed → search (top k, domain predicate) → threshold/rank → hydrate
//! ```
//!
//! # Snapshot semantics
//!
//! The slot is an `ArcSwapOption`: queries grab a counted reference to the
//! current snapshot once at the start and keep using it for the whole
//! request, so a concurrent [`Classifier::publish`] never exposes a
//! half-built index. The previous snapshot is dropped when its last
//! in-flight query finishes. `publish` is linearisable: a query that
//! starts after `publish` returns always sees the new snapshot.
//!
//! # Deadlines
//!
//! The pipeline is pure CPU work, so cancellation is cooperative: the
//! [`Deadline`] is checked at the safepoints after embedding and after
//! search. An expired request yields `DeadlineExceeded` and never a
//! partial result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tracing::debug;
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::error::EngineError;
use crate::index::{IndexSnapshot, SearchHit};
use crate::models::{
    ClassificationRequest, ClassificationResponse, Pattern, PatternMatch,
};

/// Wall-clock budget for one request, checked at pipeline safepoints.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Never expires; used by one-shot CLI runs.
    pub fn unbounded() -> Self {
        Self(None)
    }

    /// Errors with [`EngineError::DeadlineExceeded`] once expired.
    pub fn check(&self) -> Result<(), EngineError> {
        match self.0 {
            Some(at) if Instant::now() >= at => Err(EngineError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Maps raw cosine similarity to the documented confidence score:
/// `clamp((cos + 1) / 2, 0, 1)`. Monotone in the similarity, so ranking
/// by confidence and ranking by cosine agree.
pub fn confidence_from_similarity(similarity: f32) -> f64 {
    ((f64::from(similarity) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Stateless-per-request classification engine.
///
/// Shared across all gateway handlers; holds the embedding provider and
/// the atomic snapshot slot. Cheap to share via `Arc`.
pub struct Classifier {
    provider: Arc<dyn EmbeddingProvider>,
    slot: ArcSwapOption<IndexSnapshot>,
}

impl Classifier {
    /// Creates a classifier with an empty snapshot slot. `classify`
    /// reports `index_empty` until a snapshot is published.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            slot: ArcSwapOption::const_empty(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// The currently published snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.slot.load_full()
    }

    /// Atomically replaces the active snapshot, returning the previous
    /// one. In-flight queries keep the reference they already took.
    pub fn publish(&self, snapshot: Arc<IndexSnapshot>) -> Option<Arc<IndexSnapshot>> {
        let prior = self.slot.swap(Some(snapshot));
        debug!(
            prior = ?prior.as_ref().map(|s| s.id()),
            "published new index snapshot"
        );
        prior
    }

    /// Runs the classification pipeline for one request.
    ///
    /// `Ok` covers the `success` and `no_match` terminal states; every
    /// expected failure mode comes back as an [`EngineError`] for the
    /// caller to map onto the wire.
    pub fn classify(
        &self,
        request: &ClassificationRequest,
        deadline: &Deadline,
    ) -> Result<ClassificationResponse, EngineError> {
        let started = Instant::now();
        let request_id = request.weave_unit.id.unwrap_or_else(Uuid::new_v4);

        request.validate()?;

        let snapshot = self.snapshot().ok_or(EngineError::IndexEmpty)?;
        if snapshot.is_empty() {
            return Err(EngineError::IndexEmpty);
        }

        let text = request.weave_unit.text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyText);
        }

        let query = self.provider.embed(text)?;
        deadline.check()?;

        // One extra hit beyond the alternatives budget, so a best match
        // above threshold still leaves a full set of runners-up.
        let k = request.max_alternatives as usize + 1;
        let domain = request.filter_by_domain.as_deref();
        let hits = snapshot.search(&query, k, |pattern| match domain {
            Some(d) => pattern.domain.as_deref() == Some(d),
            None => true,
        })?;
        deadline.check()?;

        let max_alternatives = request.max_alternatives as usize;
        let response = if hits.is_empty() {
            ClassificationResponse::completed(request_id, None, Vec::new(), elapsed_ms(started))
        } else {
            let best_confidence = confidence_from_similarity(hits[0].similarity);
            if best_confidence < request.confidence_threshold {
                // Below threshold: no match, but surface the near-misses.
                let alternatives = self.hydrate_range(&snapshot, &hits, 0, max_alternatives)?;
                ClassificationResponse::completed(
                    request_id,
                    None,
                    alternatives,
                    elapsed_ms(started),
                )
            } else {
                let matched = self.hydrate(&snapshot, &hits[0])?;
                let alternatives = self.hydrate_range(&snapshot, &hits, 1, max_alternatives)?;
                ClassificationResponse::completed(
                    request_id,
                    Some(matched),
                    alternatives,
                    elapsed_ms(started),
                )
            }
        };

        debug!(
            request_id = %request_id,
            status = ?response.status,
            matched = response.matched.as_ref().map(|m| m.pattern_id.as_str()),
            "classification completed"
        );
        Ok(response)
    }

    /// Hydrates `hits[start..end]` (end exclusive, clamped to the hit
    /// count) into ranked matches.
    fn hydrate_range(
        &self,
        snapshot: &IndexSnapshot,
        hits: &[SearchHit],
        start: usize,
        end: usize,
    ) -> Result<Vec<PatternMatch>, EngineError> {
        let end = end.min(hits.len());
        if start >= end {
            return Ok(Vec::new());
        }
        hits[start..end]
            .iter()
            .map(|hit| self.hydrate(snapshot, hit))
            .collect()
    }

    fn hydrate(
        &self,
        snapshot: &IndexSnapshot,
        hit: &SearchHit,
    ) -> Result<PatternMatch, EngineError> {
        let pattern = snapshot.catalogue().lookup(&hit.pattern_id)?;
        Ok(PatternMatch {
            pattern_id: hit.pattern_id.clone(),
            confidence: confidence_from_similarity(hit.similarity),
            metadata: hydrated_metadata(pattern),
        })
    }
}

/// Builds the metadata bag for a match: the pattern's free-form metadata
/// passed through, with the canonical description/domain/hierarchy fields
/// layered on top.
fn hydrated_metadata(pattern: &Pattern) -> HashMap<String, serde_json::Value> {
    let mut metadata = pattern.metadata.clone();
    metadata.insert(
        "description".to_string(),
        serde_json::Value::String(pattern.description.clone()),
    );
    let optional = [
        ("domain", &pattern.domain),
        ("area", &pattern.area),
        ("topic", &pattern.topic),
        ("theme", &pattern.theme),
        ("focus", &pattern.focus),
        ("form", &pattern.form),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            metadata.insert(key.to_string(), serde_json::Value::String(value.clone()));
        }
    }
    if !pattern.mixins.is_empty() {
        if let Ok(mixins) = serde_json::to_value(&pattern.mixins) {
            metadata.insert("mixins".to_string(), mixins);
        }
    }
    metadata
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResponseStatus, WeaveUnit};

    /// Fixed text→vector mapping, so similarities in these tests are
    /// exact by construction.
    struct StubProvider {
        dim: usize,
        vectors: HashMap<String, Vec<f32>>,
    }

    impl StubProvider {
        fn new(dim: usize, entries: &[(&str, Vec<f32>)]) -> Self {
            let mut vectors = HashMap::new();
            for (text, mut vector) in entries.iter().cloned() {
                crate::embedding::l2_normalize(&mut vector);
                vectors.insert(text.to_string(), vector);
            }
            Self { dim, vectors }
        }
    }

    impl EmbeddingProvider for StubProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| EngineError::Embedding(format!("no stub vector for `{text}`")))
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn descriptor(&self) -> &str {
            "stub/d4/test/desc+samples"
        }
    }

    fn pattern(id: &str, domain: Option<&str>) -> Pattern {
        Pattern {
            id: id.to_string(),
            description: format!("description of {id}"),
            domain: domain.map(str::to_string),
            area: None,
            topic: None,
            theme: None,
            focus: None,
            form: None,
            mixins: Vec::new(),
            sample_texts: vec![format!("sample for {id}")],
            metadata: HashMap::new(),
        }
    }

    /// Three patterns on basis-aligned vectors:
    /// `naps/crib` at e1, `naps/pram` between e1 and e2, `meals/picnic` at e3.
    fn fixture() -> Classifier {
        let provider = Arc::new(StubProvider::new(
            4,
            &[
                ("crib nap", vec![1.0, 0.0, 0.0, 0.0]),
                ("between", vec![0.6, 0.8, 0.0, 0.0]),
                ("picnic", vec![0.0, 0.0, 1.0, 0.0]),
            ],
        ));
        let classifier = Classifier::new(provider);
        let rows = vec![
            (
                vec![1.0, 0.0, 0.0, 0.0],
                pattern("naps/crib", Some("child_development")),
            ),
            (
                vec![0.0, 1.0, 0.0, 0.0],
                pattern("naps/pram", Some("child_development")),
            ),
            (
                vec![0.0, 0.0, 1.0, 0.0],
                pattern("meals/picnic", Some("health")),
            ),
        ];
        let snapshot =
            IndexSnapshot::build("stub/d4/test/desc+samples".to_string(), 4, rows).unwrap();
        classifier.publish(Arc::new(snapshot));
        classifier
    }

    fn request(text: &str) -> ClassificationRequest {
        ClassificationRequest {
            weave_unit: WeaveUnit {
                id: None,
                text: text.to_string(),
                metadata: HashMap::new(),
                timestamp: None,
            },
            max_alternatives: 3,
            confidence_threshold: 0.5,
            filter_by_domain: None,
        }
    }

    #[test]
    fn best_match_with_ranked_alternatives() {
        let classifier = fixture();
        let resp = classifier
            .classify(&request("crib nap"), &Deadline::unbounded())
            .unwrap();

        assert_eq!(resp.status, ResponseStatus::Success);
        let matched = resp.matched.unwrap();
        assert_eq!(matched.pattern_id, "naps/crib");
        assert!((matched.confidence - 1.0).abs() < 1e-6);

        // Alternatives never contain the match and descend strictly.
        let alt_ids: Vec<&str> = resp
            .alternatives
            .iter()
            .map(|m| m.pattern_id.as_str())
            .collect();
        assert!(!alt_ids.contains(&"naps/crib"));
        for pair in resp.alternatives.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert!(resp.processing_time_ms >= 0.0);
    }

    #[test]
    fn confidence_follows_the_documented_formula() {
        let classifier = fixture();
        // "between" = (0.6, 0.8): cos against naps/crib (e1) is 0.6 and
        // against naps/pram (e2) is 0.8.
        let resp = classifier
            .classify(&request("between"), &Deadline::unbounded())
            .unwrap();
        let matched = resp.matched.unwrap();
        assert_eq!(matched.pattern_id, "naps/pram");
        assert!((matched.confidence - 0.9).abs() < 1e-6);
        assert!((resp.alternatives[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = fixture();
        let a = classifier
            .classify(&request("between"), &Deadline::unbounded())
            .unwrap();
        let b = classifier
            .classify(&request("between"), &Deadline::unbounded())
            .unwrap();
        assert_eq!(a.matched, b.matched);
        assert_eq!(a.alternatives, b.alternatives);
    }

    #[test]
    fn below_threshold_downgrades_to_no_match_but_keeps_near_misses() {
        let classifier = fixture();
        let mut req = request("between");
        req.confidence_threshold = 0.95;
        let resp = classifier.classify(&req, &Deadline::unbounded()).unwrap();

        assert_eq!(resp.status, ResponseStatus::NoMatch);
        assert!(resp.matched.is_none());
        assert!(!resp.alternatives.is_empty());
        // The would-be best leads the alternatives.
        assert_eq!(resp.alternatives[0].pattern_id, "naps/pram");
        assert!(resp.alternatives.len() <= req.max_alternatives as usize);
    }

    #[test]
    fn max_alternatives_one_yields_match_only() {
        let classifier = fixture();
        let mut req = request("crib nap");
        req.max_alternatives = 1;
        let resp = classifier.classify(&req, &Deadline::unbounded()).unwrap();
        assert!(resp.matched.is_some());
        assert!(resp.alternatives.is_empty());
    }

    #[test]
    fn domain_filter_restricts_results() {
        let classifier = fixture();
        let mut req = request("crib nap");
        req.filter_by_domain = Some("health".to_string());
        req.confidence_threshold = 0.0;
        let resp = classifier.classify(&req, &Deadline::unbounded()).unwrap();

        let matched = resp.matched.unwrap();
        assert_eq!(matched.pattern_id, "meals/picnic");
        assert!(resp
            .alternatives
            .iter()
            .all(|m| m.pattern_id.starts_with("meals/")));
    }

    #[test]
    fn domain_filter_with_no_members_is_no_match() {
        let classifier = fixture();
        let mut req = request("crib nap");
        req.filter_by_domain = Some("finance".to_string());
        let resp = classifier.classify(&req, &Deadline::unbounded()).unwrap();
        assert_eq!(resp.status, ResponseStatus::NoMatch);
        assert!(resp.matched.is_none());
        assert!(resp.alternatives.is_empty());
    }

    #[test]
    fn empty_slot_reports_index_empty() {
        let provider = Arc::new(StubProvider::new(4, &[]));
        let classifier = Classifier::new(provider);
        let err = classifier
            .classify(&request("anything"), &Deadline::unbounded())
            .unwrap_err();
        assert!(matches!(err, EngineError::IndexEmpty));
    }

    #[test]
    fn blank_text_reports_empty_text() {
        let classifier = fixture();
        let err = classifier
            .classify(&request("   \t "), &Deadline::unbounded())
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyText));
    }

    #[test]
    fn expired_deadline_aborts_at_the_first_safepoint() {
        let classifier = fixture();
        let deadline = Deadline::after(Duration::ZERO);
        let err = classifier
            .classify(&request("crib nap"), &deadline)
            .unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded));
    }

    #[test]
    fn publish_swaps_the_snapshot_and_returns_the_prior() {
        let classifier = fixture();
        let old = classifier.snapshot().unwrap();

        let replacement = IndexSnapshot::build(
            "stub/d4/test/desc+samples".to_string(),
            4,
            vec![(vec![1.0, 0.0, 0.0, 0.0], pattern("walks/park", None))],
        )
        .unwrap();
        let prior = classifier.publish(Arc::new(replacement)).unwrap();
        assert_eq!(prior.id(), old.id());

        let resp = classifier
            .classify(&request("crib nap"), &Deadline::unbounded())
            .unwrap();
        assert_eq!(resp.matched.unwrap().pattern_id, "walks/park");
    }

    #[test]
    fn request_id_is_taken_from_the_weave_unit() {
        let classifier = fixture();
        let mut req = request("crib nap");
        let id = Uuid::new_v4();
        req.weave_unit.id = Some(id);
        let resp = classifier.classify(&req, &Deadline::unbounded()).unwrap();
        assert_eq!(resp.request_id, id);
    }
}
