//! Shared fixtures for the integration suites: a tiny three-pattern
//! catalogue with hand-chosen sample texts, written out as a precomputed
//! index artifact.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::HashMap;
use std::path::PathBuf;

use tempfile::TempDir;

use pattern_loom::embedding::EmbeddingProvider;
use pattern_loom::loader::{
    embedding_text, Artifact, ArtifactHeader, ArtifactRecord, EmbeddingSource, SCHEMA_VERSION,
};
use pattern_loom::models::Pattern;

pub const P1: &str = "child_development/sleep/nap/crib/early_am";
pub const P2: &str = "child_development/sleep/nap/crib/afternoon";
pub const P3: &str = "health/meals/lunch/outdoor/picnic";

fn pattern(
    id: &str,
    domain: &str,
    description: &str,
    samples: &[&str],
) -> Pattern {
    Pattern {
        id: id.to_string(),
        description: description.to_string(),
        domain: Some(domain.to_string()),
        area: id.split('/').nth(1).map(str::to_string),
        topic: id.split('/').nth(2).map(str::to_string),
        theme: id.split('/').nth(3).map(str::to_string),
        focus: id.split('/').nth(4).map(str::to_string),
        form: None,
        mixins: Vec::new(),
        sample_texts: samples.iter().map(|s| s.to_string()).collect(),
        metadata: HashMap::from([(
            "source".to_string(),
            serde_json::Value::String("fixture".to_string()),
        )]),
    }
}

/// The test catalogue. P1 and P2 share crib/nap vocabulary and differ by
/// time of day; P3 is a disjoint outdoor-meal pattern.
pub fn fixture_patterns() -> Vec<Pattern> {
    vec![
        pattern(
            P1,
            "child_development",
            "Early morning nap in the crib",
            &[
                "She took an early morning nap in her crib",
                "Baby napped in the crib just after sunrise",
            ],
        ),
        pattern(
            P2,
            "child_development",
            "Afternoon nap in the crib",
            &[
                "A long afternoon nap in the crib",
                "She settled into her crib for an afternoon nap",
            ],
        ),
        pattern(
            P3,
            "health",
            "Picnic lunch outdoors",
            &[
                "We had a picnic lunch by the lake",
                "Lunch outside on a picnic blanket",
            ],
        ),
    ]
}

/// Builds a precomputed artifact for the fixture catalogue, with vectors
/// from the given provider.
pub fn fixture_artifact(provider: &dyn EmbeddingProvider) -> Artifact {
    let records: Vec<ArtifactRecord> = fixture_patterns()
        .into_iter()
        .map(|pattern| {
            let vector = provider.embed(&embedding_text(&pattern)).unwrap();
            ArtifactRecord {
                pattern_id: pattern.id.clone(),
                pattern,
                vector: Some(vector),
            }
        })
        .collect();

    Artifact {
        header: ArtifactHeader {
            schema_version: SCHEMA_VERSION,
            model_descriptor: provider.descriptor().to_string(),
            vector_dim: provider.dimension(),
            count: records.len(),
            embedding_source: EmbeddingSource::Precomputed,
            renormalize: true,
        },
        patterns: records,
    }
}

/// Writes the fixture artifact into a temp dir and returns its path.
pub fn write_fixture_artifact(dir: &TempDir, provider: &dyn EmbeddingProvider) -> PathBuf {
    let path = dir.path().join("patterns.loom.json");
    let artifact = fixture_artifact(provider);
    std::fs::write(&path, serde_json::to_string_pretty(&artifact).unwrap()).unwrap();
    path
}
