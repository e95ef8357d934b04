//! Identity store boundaries and in-memory reference backends.
//!
//! Production deployments put these traits on a managed vector index and a
//! document database. The in-memory backends here implement the same
//! contracts with an exact cosine scan and generated ids; they back the
//! test suite and the simulation harness, and their handles are cheaply
//! cloneable so a run can be inspected afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};

use crate::identity::IdentityProfile;

/// One ranked hit from a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// Cosine-similarity index over identity fingerprints. Higher score means
/// more similar.
pub trait VectorIndex {
    fn upsert(&mut self, id: &str, vector: &[f32]) -> Result<()>;
    /// Ranked nearest ids, highest similarity first.
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredId>>;
}

/// Document store holding identity profiles.
pub trait ProfileStore {
    fn insert(&mut self, profile: &IdentityProfile) -> Result<String>;
    fn find_by_id(&self, id: &str) -> Result<Option<IdentityProfile>>;
}

// ── Math ─────────────────────────────────────────────────────────────────────

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b).max(1e-10)
}

// ── In-memory vector index ───────────────────────────────────────────────────

struct IndexInner {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
}

/// Exact-scan cosine index. Clones share the same underlying map.
#[derive(Clone)]
pub struct MemoryVectorIndex {
    inner: Arc<Mutex<IndexInner>>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(IndexInner {
                dimension,
                vectors: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("vector index lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.vectors.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored vector for `id`, if any.
    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.vectors.get(id).cloned())
    }
}

impl VectorIndex for MemoryVectorIndex {
    fn upsert(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        let mut inner = self.lock()?;
        if vector.len() != inner.dimension {
            bail!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                inner.dimension
            );
        }
        inner.vectors.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredId>> {
        let inner = self.lock()?;
        if vector.len() != inner.dimension {
            bail!(
                "query dimension {} does not match index dimension {}",
                vector.len(),
                inner.dimension
            );
        }

        let mut hits: Vec<ScoredId> = inner
            .vectors
            .iter()
            .map(|(id, stored)| ScoredId {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
            })
            .collect();
        hits.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

// ── In-memory profile store ──────────────────────────────────────────────────

struct StoreInner {
    next_id: u64,
    profiles: HashMap<String, IdentityProfile>,
}

/// Document store over a plain map with generated ids. Clones share the
/// same underlying map.
#[derive(Clone)]
pub struct MemoryProfileStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                next_id: 0,
                profiles: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("profile store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.profiles.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored profiles, ordered by id for deterministic reporting.
    pub fn all(&self) -> Vec<(String, IdentityProfile)> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut profiles: Vec<_> = inner
            .profiles
            .iter()
            .map(|(id, profile)| (id.clone(), profile.clone()))
            .collect();
        profiles.sort_by(|a, b| a.0.cmp(&b.0));
        profiles
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn insert(&mut self, profile: &IdentityProfile) -> Result<String> {
        let mut inner = self.lock()?;
        let id = format!("profile_{}", inner.next_id);
        inner.next_id += 1;
        inner.profiles.insert(id.clone(), profile.clone());
        Ok(id)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<IdentityProfile>> {
        Ok(self.lock()?.profiles.get(id).cloned())
    }
}
