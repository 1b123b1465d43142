//! Incremental update management.
//!
//! On re-ingest, diffs the previous chunk-hash sequence against the new
//! one with a longest-common-subsequence alignment, computes the delta
//! ratio, and either requests a full reprocess or applies a partial
//! update: delete the changed/removed chunk ids, re-embed only the
//! added/changed chunks, and reuse embeddings for chunks that merely
//! moved.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::core::{ChunkNode, chunk_id};
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::state::DocumentState;

/// Above this many hash-pair comparisons the LCS table is not built
/// and the document is reprocessed in full.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Decision for a re-ingest.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaDecision {
    /// Chunk hashes are identical; nothing to do.
    Unchanged,
    /// Delta too large (or too big to diff); reprocess everything.
    FullReprocess {
        /// Fraction of chunks that changed.
        delta_ratio: f64,
    },
    /// Apply a partial update.
    Partial(DeltaPlan),
}

/// The partial-update work list.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPlan {
    /// Fraction of chunks that changed.
    pub delta_ratio: f64,
    /// Old chunk ids to delete (removed, replaced, or moved).
    pub delete_ids: Vec<String>,
    /// New ordinals whose chunk kept id and embedding (position-stable
    /// matches).
    pub retained: Vec<usize>,
    /// `(new_ordinal, old_ordinal)` of content-identical chunks that
    /// moved; the embedding is reused under the new id.
    pub moved: Vec<(usize, usize)>,
    /// New ordinals that need embedding (added or changed content).
    pub embed: Vec<usize>,
}

/// Counters from applying a partial update.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeltaApplied {
    /// Chunks deleted from the index.
    pub deleted: usize,
    /// Chunks upserted (embedded or moved).
    pub upserted: usize,
    /// Chunks newly embedded.
    pub embedded: usize,
    /// Chunks left untouched.
    pub unchanged: usize,
}

/// Incremental update manager.
pub struct IncrementalManager {
    force_reprocess_threshold: f64,
}

impl IncrementalManager {
    /// Creates a manager with the given full-reprocess threshold.
    #[must_use]
    pub const fn new(force_reprocess_threshold: f64) -> Self {
        Self {
            force_reprocess_threshold,
        }
    }

    /// Decides between unchanged, partial, and full reprocess.
    #[must_use]
    pub fn decide(&self, prior: &DocumentState, new_hashes: &[String]) -> DeltaDecision {
        let old_hashes = &prior.chunk_hashes;
        if old_hashes == new_hashes {
            return DeltaDecision::Unchanged;
        }
        if old_hashes.len().saturating_mul(new_hashes.len()) > MAX_LCS_CELLS {
            return DeltaDecision::FullReprocess { delta_ratio: 1.0 };
        }

        let matches = lcs_pairs(old_hashes, new_hashes);
        let matched = matches.len();
        let changed = (old_hashes.len() - matched).max(new_hashes.len() - matched);
        #[allow(clippy::cast_precision_loss)]
        let delta_ratio = changed as f64 / old_hashes.len().max(new_hashes.len()).max(1) as f64;

        if delta_ratio >= self.force_reprocess_threshold {
            return DeltaDecision::FullReprocess { delta_ratio };
        }

        let mut retained = Vec::new();
        let mut moved = Vec::new();
        let mut stable_old = vec![false; old_hashes.len()];
        let mut matched_new = vec![false; new_hashes.len()];
        for &(i, j) in &matches {
            matched_new[j] = true;
            if i == j {
                stable_old[i] = true;
                retained.push(j);
            } else {
                moved.push((j, i));
            }
        }

        // Every old position that is not a position-stable match loses
        // its id; every unmatched new position needs a fresh embedding.
        let delete_ids = (0..old_hashes.len())
            .filter(|&i| !stable_old[i])
            .map(|i| {
                prior
                    .chunk_ids
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| chunk_id(&prior.doc_id, i))
            })
            .collect();

        let embed = (0..new_hashes.len()).filter(|&j| !matched_new[j]).collect();

        debug!(
            matched,
            changed,
            delta_ratio,
            "delta computed"
        );

        DeltaDecision::Partial(DeltaPlan {
            delta_ratio,
            delete_ids,
            retained,
            moved,
            embed,
        })
    }

    /// Applies a partial update against the index.
    ///
    /// `nodes` are the fully-built (but unembedded) nodes of the new
    /// version, in ordinal order. Deletes and idempotent upserts make
    /// the operation safe to retry.
    pub async fn apply(
        &self,
        plan: &DeltaPlan,
        nodes: &mut [ChunkNode],
        embedder: &EmbeddingClient,
        index: &Arc<dyn VectorIndex>,
        prior: &DocumentState,
    ) -> Result<DeltaApplied> {
        // Reuse embeddings for moved chunks
        let mut upserts: Vec<usize> = Vec::new();
        for &(new_ordinal, old_ordinal) in &plan.moved {
            let old_id = prior
                .chunk_ids
                .get(old_ordinal)
                .cloned()
                .unwrap_or_else(|| chunk_id(&prior.doc_id, old_ordinal));
            if let Some(node) = nodes.get_mut(new_ordinal) {
                match index.get(&old_id).await? {
                    Some(old_node) => {
                        node.embedding = old_node.embedding;
                        upserts.push(new_ordinal);
                    }
                    None => {
                        // Old node already gone; fall back to embedding
                        upserts.push(new_ordinal);
                    }
                }
            }
        }

        // Embed added/changed chunks (and moved ones whose embedding
        // could not be recovered)
        let mut to_embed: Vec<usize> = plan.embed.clone();
        for &ordinal in &upserts {
            if nodes
                .get(ordinal)
                .is_some_and(|n| n.embedding.is_empty())
                && !to_embed.contains(&ordinal)
            {
                to_embed.push(ordinal);
            }
        }
        to_embed.sort_unstable();

        let texts: Vec<String> = to_embed
            .iter()
            .filter_map(|&j| nodes.get(j).map(|n| n.text.clone()))
            .collect();
        let embedded = embedder.embed_batch(&texts).await.map_err(crate::error::Error::from)?;
        for (&ordinal, embedding) in to_embed.iter().zip(embedded) {
            if let Some(node) = nodes.get_mut(ordinal) {
                node.embedding = embedding;
            }
        }

        // Delete first, then upsert: retried runs converge
        let deleted = index.delete_by_ids(&plan.delete_ids).await?;

        let mut upsert_ordinals: Vec<usize> = to_embed;
        upsert_ordinals.extend(upserts.iter().copied());
        upsert_ordinals.sort_unstable();
        upsert_ordinals.dedup();

        let upsert_nodes: Vec<ChunkNode> = upsert_ordinals
            .iter()
            .filter_map(|&j| nodes.get(j).cloned())
            .collect();
        index.upsert(&upsert_nodes).await?;

        let applied = DeltaApplied {
            deleted,
            upserted: upsert_nodes.len(),
            embedded: texts.len(),
            unchanged: plan.retained.len(),
        };
        info!(
            doc_id = %prior.doc_id,
            deleted = applied.deleted,
            upserted = applied.upserted,
            unchanged = applied.unchanged,
            "partial update applied"
        );
        Ok(applied)
    }
}

/// Longest-common-subsequence alignment of two hash sequences.
///
/// Returns matched `(old_index, new_index)` pairs in increasing order.
fn lcs_pairs(old: &[String], new: &[String]) -> Vec<(usize, usize)> {
    // Intern hashes so the DP compares u32s
    let mut ids: HashMap<String, u32> = HashMap::new();
    let mut intern = |s: &String| -> u32 {
        let next = u32::try_from(ids.len()).unwrap_or(u32::MAX);
        *ids.entry(s.clone()).or_insert(next)
    };
    // Two passes keep the borrow checker happy with one map
    let old_ids: Vec<u32> = old.iter().map(&mut intern).collect();
    let new_ids: Vec<u32> = new.iter().map(&mut intern).collect();

    let (n, m) = (old_ids.len(), new_ids.len());
    let mut table = vec![0u32; (n + 1) * (m + 1)];
    let idx = |i: usize, j: usize| i * (m + 1) + j;

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[idx(i, j)] = if old_ids[i] == new_ids[j] {
                table[idx(i + 1, j + 1)] + 1
            } else {
                table[idx(i + 1, j)].max(table[idx(i, j + 1)])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old_ids[i] == new_ids[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[idx(i + 1, j)] >= table[idx(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}
