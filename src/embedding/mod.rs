//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`HashedEmbedder`]** — deterministic signed bag-of-words hashing;
//!   the default provider. Needs no model download, so the engine and its
//!   test suite run fully offline.
//! - **`LocalEmbedder`** — sentence-transformer inference via fastembed,
//!   behind the `local-embeddings-fastembed` cargo feature. Models are
//!   downloaded on first use and cached; after that, no network calls.
//!
//! # Provider contract
//!
//! A provider maps a non-empty string to an L2-normalised vector of a fixed
//! dimension. Providers are purely functional after construction and safe
//! for concurrent `embed` calls. The text [`Preprocessing`] policy is fixed
//! at construction and fingerprinted into [`EmbeddingProvider::descriptor`],
//! so index artifacts built under a different model, dimension, or
//! preprocessing policy are rejected at load time rather than silently
//! producing garbage similarities.
//!
//! # Provider selection
//!
//! Use [`create_provider`] to instantiate the provider named in the
//! configuration:
//!
//! ```rust
//! # use pattern_loom::config::EmbeddingConfig;
//! # use pattern_loom::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hashed"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.dimension(), 384);
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::EngineError;

/// Trait for embedding providers.
///
/// Implementations must be deterministic given their construction-time
/// configuration and safe for concurrent invocation.
pub trait EmbeddingProvider: Send + Sync {
    /// Maps text to an L2-normalised vector of [`Self::dimension`] entries.
    ///
    /// Fails with [`EngineError::Embedding`] on empty/whitespace input or
    /// an underlying model error.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;

    /// Embeds a batch, preserving input order. Implementations may batch
    /// internally but must not reorder results.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// The fixed output dimension D.
    fn dimension(&self) -> usize;

    /// Opaque compatibility string identifying the model, dimension,
    /// preprocessing policy, and index-build text policy. Artifacts whose
    /// recorded descriptor differs are rejected.
    fn descriptor(&self) -> &str;
}

/// Text normalisation applied before embedding.
///
/// Fixed at provider construction; the canonical form of the policy is
/// hashed into the provider descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessing {
    /// Lowercase the input.
    pub lowercase: bool,
    /// Collapse runs of whitespace into single spaces.
    pub collapse_whitespace: bool,
    /// Truncate to at most this many characters (0 = unlimited).
    pub max_chars: usize,
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self {
            lowercase: true,
            collapse_whitespace: true,
            max_chars: 512,
        }
    }
}

impl Preprocessing {
    /// Applies the policy: trim, optional lowercase, optional whitespace
    /// collapse, optional truncation at a char boundary.
    pub fn apply(&self, text: &str) -> String {
        let trimmed = text.trim();
        let mut out = if self.lowercase {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        };
        if self.collapse_whitespace {
            out = out.split_whitespace().collect::<Vec<_>>().join(" ");
        }
        if self.max_chars > 0 {
            out = out.chars().take(self.max_chars).collect();
        }
        out
    }

    /// Stable fingerprint of the policy, embedded in provider descriptors.
    fn policy_tag(&self) -> String {
        let canonical = format!(
            "lowercase={};collapse_whitespace={};max_chars={}",
            self.lowercase, self.collapse_whitespace, self.max_chars
        );
        let digest = Sha256::digest(canonical.as_bytes());
        // Eight hex chars are plenty to distinguish policies.
        digest[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Builds the descriptor string recorded in index artifacts.
///
/// Format: `<model>/d<dim>/<policy-tag>/desc+samples`. The trailing
/// segment names the index-build text policy: pattern vectors are derived
/// from the description concatenated with all sample texts.
pub fn build_descriptor(model: &str, dim: usize, preprocessing: &Preprocessing) -> String {
    format!(
        "{model}/d{dim}/{}/desc+samples",
        preprocessing.policy_tag()
    )
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scales a vector to unit norm in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ============ Hashed provider ============

/// Deterministic signed bag-of-words embedder.
///
/// Each whitespace token hashes (FNV-1a) to one bucket with sign derived
/// from the hash's top bit, accumulated and L2-normalised. Texts sharing
/// tokens land on shared buckets and score high cosine; unrelated texts
/// spread across signed buckets and stay near orthogonal. Deterministic
/// across processes and platforms, which makes artifact vectors
/// reproducible.
pub struct HashedEmbedder {
    dim: usize,
    preprocessing: Preprocessing,
    descriptor: String,
}

impl HashedEmbedder {
    pub fn new(dim: usize, preprocessing: Preprocessing) -> Self {
        let descriptor = build_descriptor("hashed-bow", dim, &preprocessing);
        Self {
            dim,
            preprocessing,
            descriptor,
        }
    }
}

/// FNV-1a, 64-bit. Stable across platforms, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl EmbeddingProvider for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let normalized = self.preprocessing.apply(text);
        if normalized.is_empty() {
            return Err(EngineError::Embedding(
                "cannot embed empty or whitespace-only text".to_string(),
            ));
        }

        let mut vector = vec![0.0f32; self.dim];
        for token in normalized.split_whitespace() {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        if l2_norm(&vector) == 0.0 {
            // Tokens can cancel pairwise in a bucket; treat as model failure.
            return Err(EngineError::Embedding(
                "text produced a zero vector".to_string(),
            ));
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

// ============ Local provider (fastembed) ============

/// Embedding provider for local sentence-transformer inference.
///
/// The model is loaded once at construction (first use downloads it to the
/// fastembed cache). `embed` runs on the calling thread; inference state
/// sits behind a mutex because fastembed requires `&mut self`.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dim: usize,
    preprocessing: Preprocessing,
    descriptor: String,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(model_name: &str, preprocessing: Preprocessing) -> Result<Self> {
        let (fastembed_model, dim) = resolve_local_model(model_name)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {e}"))?;

        let descriptor = build_descriptor(model_name, dim, &preprocessing);
        Ok(Self {
            model: std::sync::Mutex::new(model),
            dim,
            preprocessing,
            descriptor,
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel;
    match name {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1" => Ok((EmbeddingModel::NomicEmbedTextV1, 768)),
        "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((EmbeddingModel::MultilingualE5Large, 1024)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
impl EmbeddingProvider for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let normalized = self.preprocessing.apply(text);
        if normalized.is_empty() {
            return Err(EngineError::Embedding(
                "cannot embed empty or whitespace-only text".to_string(),
            ));
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| EngineError::Embedding("embedding model lock poisoned".to_string()))?;
        let mut vectors = model
            .embed(vec![normalized], None)
            .map_err(|e| EngineError::Embedding(e.to_string()))?;
        let mut vector = vectors
            .pop()
            .ok_or_else(|| EngineError::Embedding("empty embedding response".to_string()))?;
        // fastembed models emit unit vectors already; normalising again is
        // a no-op there and upholds the contract for any that do not.
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let normalized: Vec<String> = texts
            .iter()
            .map(|t| {
                let n = self.preprocessing.apply(t);
                if n.is_empty() {
                    Err(EngineError::Embedding(
                        "cannot embed empty or whitespace-only text".to_string(),
                    ))
                } else {
                    Ok(n)
                }
            })
            .collect::<Result<_, _>>()?;
        let mut model = self
            .model
            .lock()
            .map_err(|_| EngineError::Embedding("embedding model lock poisoned".to_string()))?;
        let mut vectors = model
            .embed(normalized, None)
            .map_err(|e| EngineError::Embedding(e.to_string()))?;
        for v in &mut vectors {
            l2_normalize(v);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

/// Create the [`EmbeddingProvider`] named in the configuration.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"hashed"` | [`HashedEmbedder`] (default, offline) |
/// | `"local"` | `LocalEmbedder` (requires `local-embeddings-fastembed`) |
///
/// # Errors
///
/// Returns an error for unknown provider names or if the provider cannot
/// be initialized (unknown model, missing feature flag).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let preprocessing = config.preprocessing();
    match config.provider.as_str() {
        "hashed" => Ok(Arc::new(HashedEmbedder::new(config.dims, preprocessing))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(&config.model, preprocessing)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
