//! identity — face fingerprinting and profile resolution.
//!
//! When a track finishes capturing, its saved crops are embedded and
//! mean-pooled into one fingerprint for the subject. The fingerprint is
//! searched against the vector index: a sufficiently similar hit whose
//! profile document still exists is a known subject, anything else creates
//! a new placeholder profile backed by a demographic estimate of the first
//! crop. Resolution runs at most once per track.

use anyhow::Result;
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture;
use crate::config::IdentityConfig;
use crate::detection::TrackId;
use crate::registry::TrackRecord;
use crate::stores::{ProfileStore, VectorIndex};

/// Name given to freshly created profiles until an operator renames them.
pub const PLACEHOLDER_NAME: &str = "Temp";

// ── Public types ─────────────────────────────────────────────────────────────

/// Demographic estimate for one face crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub age: u32,
    pub gender: String,
    pub ethnicity: String,
}

/// Stored identity document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub name: String,
    pub analysis: Option<Demographics>,
}

/// Produces a fixed-dimension embedding for a face crop.
pub trait FaceEmbedder: Sync {
    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>>;
}

/// Estimates demographics for a face crop.
pub trait FaceAnalyzer: Sync {
    fn analyze(&self, image: &RgbImage) -> Result<Demographics>;
}

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Turns a fully captured track into a fingerprint and a profile reference.
pub struct IdentityResolver {
    embedder: Box<dyn FaceEmbedder>,
    analyzer: Box<dyn FaceAnalyzer>,
    index: Box<dyn VectorIndex>,
    profiles: Box<dyn ProfileStore>,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(
        embedder: Box<dyn FaceEmbedder>,
        analyzer: Box<dyn FaceAnalyzer>,
        index: Box<dyn VectorIndex>,
        profiles: Box<dyn ProfileStore>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            embedder,
            analyzer,
            index,
            profiles,
            config,
        }
    }

    /// Resolve `record` against the identity stores. On return either
    /// `fingerprint` is set, or the record is marked abandoned so it is
    /// never retried.
    pub fn resolve(&mut self, record: &mut TrackRecord) {
        let crops = load_crops(record);
        if crops.is_empty() {
            warn!(
                track_id = record.track_id,
                "no readable crops, abandoning track"
            );
            record.abandoned = true;
            return;
        }

        // Embedding the full crop set and analyzing the lead crop are
        // independent; run them side by side.
        let embedder = self.embedder.as_ref();
        let analyzer = self.analyzer.as_ref();
        let dim = self.config.fingerprint_dim;
        let (embeddings, analysis) = rayon::join(
            || embed_all(embedder, dim, &crops),
            || analyze_first(analyzer, &crops),
        );

        if embeddings.is_empty() {
            warn!(
                track_id = record.track_id,
                "all crops failed to embed, abandoning track"
            );
            record.abandoned = true;
            return;
        }

        let Some(fingerprint) = mean_pool(&embeddings) else {
            record.abandoned = true;
            return;
        };
        debug!(
            track_id = record.track_id,
            samples = embeddings.len(),
            "fingerprint pooled"
        );
        record.fingerprint = Some(fingerprint.clone());

        match self.find_match(record.track_id, &fingerprint) {
            Some((profile_id, profile)) => {
                info!(
                    track_id = record.track_id,
                    profile_id,
                    name = %profile.name,
                    "track matched existing identity"
                );
            }
            None => self.create_profile(record, &fingerprint, analysis),
        }
    }

    /// Nearest stored identity strictly above the similarity threshold, if
    /// its profile document still exists. Store errors count as a miss so a
    /// flaky backend degrades to duplicate profiles rather than lost tracks.
    fn find_match(
        &self,
        track_id: TrackId,
        fingerprint: &[f32],
    ) -> Option<(String, IdentityProfile)> {
        let hits = match self.index.query(fingerprint, 1) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(track_id, "identity search error: {e:#}");
                return None;
            }
        };
        let best = hits.first()?;
        if best.score <= self.config.similarity_threshold {
            info!(
                track_id,
                score = best.score,
                "best candidate below similarity threshold"
            );
            return None;
        }

        match self.profiles.find_by_id(&best.id) {
            Ok(Some(profile)) => Some((best.id.clone(), profile)),
            Ok(None) => {
                info!(
                    track_id,
                    profile_id = best.id,
                    "index hit has no profile document, treating as new identity"
                );
                None
            }
            Err(e) => {
                warn!(track_id, "profile lookup error: {e:#}");
                None
            }
        }
    }

    /// Insert the profile document first, then the fingerprint. The record
    /// only gets an identity reference when both writes land.
    fn create_profile(
        &mut self,
        record: &mut TrackRecord,
        fingerprint: &[f32],
        analysis: Option<Demographics>,
    ) {
        let profile = IdentityProfile {
            name: PLACEHOLDER_NAME.to_string(),
            analysis,
        };

        let profile_id = match self.profiles.insert(&profile) {
            Ok(id) => id,
            Err(e) => {
                warn!(track_id = record.track_id, "profile insert error: {e:#}");
                return;
            }
        };
        if let Err(e) = self.index.upsert(&profile_id, fingerprint) {
            warn!(
                track_id = record.track_id,
                profile_id, "fingerprint upsert error: {e:#}"
            );
            return;
        }

        record.identity_ref = Some(profile_id.clone());
        info!(
            track_id = record.track_id,
            profile_id, "new identity profile created"
        );
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Embed every crop, keeping only results of the expected dimension.
fn embed_all(embedder: &dyn FaceEmbedder, dim: usize, crops: &[RgbImage]) -> Vec<Vec<f32>> {
    crops
        .par_iter()
        .filter_map(|crop| match embedder.embed(crop) {
            Ok(embedding) if embedding.len() == dim => Some(embedding),
            Ok(embedding) => {
                warn!(
                    got = embedding.len(),
                    want = dim,
                    "embedder returned wrong dimension, dropping sample"
                );
                None
            }
            Err(e) => {
                warn!("embedding error: {e:#}");
                None
            }
        })
        .collect()
}

/// Demographics of the lead crop; analysis failures are non-fatal.
fn analyze_first(analyzer: &dyn FaceAnalyzer, crops: &[RgbImage]) -> Option<Demographics> {
    let first = crops.first()?;
    match analyzer.analyze(first) {
        Ok(demographics) => Some(demographics),
        Err(e) => {
            warn!("demographic analysis error: {e:#}");
            None
        }
    }
}

/// Load every crop recorded for a track; unreadable files are skipped.
fn load_crops(record: &TrackRecord) -> Vec<RgbImage> {
    (0..record.images_saved)
        .filter_map(|index| {
            let path = capture::crop_path(&record.storage_path, record.track_id, index);
            match image::open(&path) {
                Ok(img) => Some(img.into_rgb8()),
                Err(e) => {
                    warn!(path = %path.display(), "failed to read crop: {e:#}");
                    None
                }
            }
        })
        .collect()
}

/// Element-wise mean of the embeddings. `None` only when `embeddings` is empty.
fn mean_pool(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let mut pooled = vec![0.0f32; first.len()];
    for embedding in embeddings {
        for (acc, value) in pooled.iter_mut().zip(embedding.iter()) {
            *acc += value;
        }
    }
    let count = embeddings.len() as f32;
    for value in &mut pooled {
        *value /= count;
    }
    Some(pooled)
}
