//! In-memory vector index and the immutable snapshot type.
//!
//! An [`IndexSnapshot`] bundles the pattern vectors (one row per pattern,
//! stored row-major in a single contiguous buffer), the
//! [`PatternCatalogue`] for hydration, and the model descriptor the
//! vectors were built under. Snapshots are immutable: a reload builds a
//! whole new snapshot and atomically replaces the old one.
//!
//! # Search
//!
//! Search is exhaustive cosine over unit vectors, which reduces to a dot
//! product per row. A single pass maintains a bounded heap of the current
//! k best rows, so the scan is `O(N log k)` for k ≪ N — exact and
//! reproducible at the target scale (≤10⁵ vectors), with no approximate
//! index to tune. The row predicate is evaluated before any heap work so
//! filtered searches stay cheap.
//!
//! Ordering is fully deterministic: descending similarity, ties broken by
//! ascending pattern id.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::catalogue::PatternCatalogue;
use crate::error::EngineError;
use crate::models::Pattern;

/// One search result row: pattern id and raw cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub row: usize,
    pub pattern_id: String,
    pub similarity: f32,
}

/// Immutable index of pattern vectors plus their catalogue.
///
/// All rows share the same dimension and derive from the same model
/// descriptor; both are validated at build time. The snapshot id is
/// regenerated on every build so callers can tell reloads apart even when
/// the content is identical.
#[derive(Debug)]
pub struct IndexSnapshot {
    id: Uuid,
    descriptor: String,
    dim: usize,
    /// Row-major `len × dim` buffer; row `r` lives at `r*dim .. (r+1)*dim`.
    vectors: Vec<f32>,
    catalogue: PatternCatalogue,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    /// Builds a snapshot from `(vector, pattern)` rows.
    ///
    /// Validates that every vector has dimension `dim` and that pattern
    /// ids are unique. Norm validation is the loader's concern; by the
    /// time rows arrive here they are unit vectors.
    pub fn build(
        descriptor: String,
        dim: usize,
        rows: Vec<(Vec<f32>, Pattern)>,
    ) -> Result<Self, EngineError> {
        if dim == 0 {
            return Err(EngineError::Load("vector dimension must be > 0".to_string()));
        }

        let mut vectors = Vec::with_capacity(rows.len() * dim);
        let mut patterns = Vec::with_capacity(rows.len());
        for (vector, pattern) in rows {
            if vector.len() != dim {
                return Err(EngineError::Load(format!(
                    "pattern `{}` has vector dimension {}, expected {dim}",
                    pattern.id,
                    vector.len()
                )));
            }
            vectors.extend_from_slice(&vector);
            patterns.push(pattern);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            descriptor,
            dim,
            vectors,
            catalogue: PatternCatalogue::new(patterns)?,
            built_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.catalogue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogue.is_empty()
    }

    pub fn catalogue(&self) -> &PatternCatalogue {
        &self.catalogue
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// The vector stored at a row.
    pub fn row_vector(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dim..(row + 1) * self.dim]
    }

    /// Top-k rows by descending cosine similarity to `query`, among rows
    /// whose pattern satisfies `predicate`. Ties order by ascending
    /// pattern id.
    ///
    /// # Errors
    ///
    /// [`EngineError::IndexEmpty`] when the snapshot has zero rows;
    /// [`EngineError::DimensionMismatch`] when `query` is not `dim` long.
    pub fn search<P>(
        &self,
        query: &[f32],
        k: usize,
        predicate: P,
    ) -> Result<Vec<SearchHit>, EngineError>
    where
        P: Fn(&Pattern) -> bool,
    {
        if self.is_empty() {
            return Err(EngineError::IndexEmpty);
        }
        if query.len() != self.dim {
            return Err(EngineError::DimensionMismatch {
                query: query.len(),
                index: self.dim,
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        // Max-heap ordered worst-first, so the root is always the row the
        // next better candidate evicts.
        let mut heap: BinaryHeap<HeapEntry<'_>> = BinaryHeap::with_capacity(k + 1);

        for row in 0..self.len() {
            let pattern = self.catalogue.by_row(row);
            if !predicate(pattern) {
                continue;
            }

            let similarity = dot(query, self.row_vector(row));
            let entry = HeapEntry {
                similarity,
                row,
                pattern_id: &pattern.id,
            };

            if heap.len() < k {
                heap.push(entry);
            } else if let Some(worst) = heap.peek() {
                if entry.cmp(worst) == Ordering::Less {
                    heap.pop();
                    heap.push(entry);
                }
            }
        }

        // Ascending heap order is best-first (see `HeapEntry`'s `Ord`).
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| SearchHit {
                row: entry.row,
                pattern_id: entry.pattern_id.to_string(),
                similarity: entry.similarity,
            })
            .collect())
    }
}

/// Dot product; cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Heap candidate ordered so that *greater means worse*: lower similarity
/// first, and among equal similarities the lexicographically larger id.
/// With that ordering a max-heap keeps the worst candidate at the root and
/// `into_sorted_vec` yields hits best-first.
struct HeapEntry<'a> {
    similarity: f32,
    row: usize,
    pattern_id: &'a str,
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.pattern_id.cmp(other.pattern_id))
    }
}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

/// Search contract for pluggable vector stores.
///
/// The in-memory snapshot is the only backend shipped here; an external
/// store (e.g. a networked vector database) would implement the same
/// contract, bringing its own suspension points and failure modes with it.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Top-k rows by descending similarity, optionally restricted to one
    /// domain. Same ordering guarantees as [`IndexSnapshot::search`].
    async fn top_k(
        &self,
        query: &[f32],
        k: usize,
        domain: Option<&str>,
    ) -> Result<Vec<SearchHit>, EngineError>;
}

#[async_trait]
impl VectorBackend for IndexSnapshot {
    async fn top_k(
        &self,
        query: &[f32],
        k: usize,
        domain: Option<&str>,
    ) -> Result<Vec<SearchHit>, EngineError> {
        self.search(query, k, |pattern| match domain {
            Some(d) => pattern.domain.as_deref() == Some(d),
            None => true,
        })
    }
}
