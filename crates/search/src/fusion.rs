use quarry_vector_store::ChunkHit;
use std::collections::HashMap;

/// RRF constant; the standard default, no calibration between backends
/// required.
pub const RRF_K0: f32 = 60.0;

/// One file-level entry of a backend's ranking, best first. `score` is the
/// backend's own score for the file (for the vector backend, its best
/// chunk).
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFile {
    pub file_path: String,
    pub repository: String,
    pub file_type: String,
    pub score: f32,
}

/// A fused hit with the provenance needed for tie-breaking and for
/// exposing the raw backend scores to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedFile {
    pub file_path: String,
    pub repository: String,
    pub file_type: String,
    /// `Σ 1/(k₀ + rank + 1)` over the lists the file appears in.
    pub score: f32,
    pub lexical_rank: Option<usize>,
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
}

/// Collapse a chunk-level ranking to files: each file takes the best
/// (lowest) rank of any of its chunks. Input is assumed best-first.
#[must_use]
pub fn collapse_chunks(hits: &[ChunkHit]) -> Vec<RankedFile> {
    let mut seen: HashMap<&str, ()> = HashMap::new();
    let mut files = Vec::new();
    for hit in hits {
        if seen.insert(hit.file_path.as_str(), ()).is_none() {
            files.push(RankedFile {
                file_path: hit.file_path.clone(),
                repository: hit.repository.clone(),
                file_type: hit.file_type.clone(),
                score: hit.score,
            });
        }
    }
    files
}

/// Reciprocal Rank Fusion of the two file-level rankings.
///
/// For every file in either list, `score = Σ 1/(k₀ + rank + 1)` with the
/// 0-based rank in each list it appears in. Ties break toward the smaller
/// lexical rank (absent counts as worst), then the lexicographically
/// smaller path, so the ordering is fully deterministic for fixed backend
/// outputs.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fuse(lexical: &[RankedFile], vector: &[RankedFile]) -> Vec<FusedFile> {
    let mut fused: HashMap<String, FusedFile> = HashMap::new();

    for (rank, file) in lexical.iter().enumerate() {
        let entry = fused
            .entry(file.file_path.clone())
            .or_insert_with(|| FusedFile {
                file_path: file.file_path.clone(),
                repository: file.repository.clone(),
                file_type: file.file_type.clone(),
                score: 0.0,
                lexical_rank: None,
                lexical_score: None,
                vector_score: None,
            });
        entry.score += 1.0 / (RRF_K0 + rank as f32 + 1.0);
        entry.lexical_rank = Some(rank);
        entry.lexical_score = Some(file.score);
    }

    for (rank, file) in vector.iter().enumerate() {
        let entry = fused
            .entry(file.file_path.clone())
            .or_insert_with(|| FusedFile {
                file_path: file.file_path.clone(),
                repository: file.repository.clone(),
                file_type: file.file_type.clone(),
                score: 0.0,
                lexical_rank: None,
                lexical_score: None,
                vector_score: None,
            });
        entry.score += 1.0 / (RRF_K0 + rank as f32 + 1.0);
        entry.vector_score = Some(file.score);
    }

    let mut out: Vec<FusedFile> = fused.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_rank = a.lexical_rank.unwrap_or(usize::MAX);
                let b_rank = b.lexical_rank.unwrap_or(usize::MAX);
                a_rank.cmp(&b_rank)
            })
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ranked(path: &str, score: f32) -> RankedFile {
        RankedFile {
            file_path: path.to_string(),
            repository: "demo".to_string(),
            file_type: "rs".to_string(),
            score,
        }
    }

    fn chunk_hit(path: &str, index: usize, score: f32) -> ChunkHit {
        ChunkHit {
            chunk_id: format!("{path}:{index}"),
            file_path: path.to_string(),
            repository: "demo".to_string(),
            chunk_index: index,
            file_type: "rs".to_string(),
            score,
        }
    }

    #[test]
    fn both_lists_beat_single_list_at_same_rank() {
        // `/a` is rank 0 in both lists, `/b` rank 0 in one.
        let lexical = vec![ranked("/a", 3.0), ranked("/b", 2.0)];
        let vector = vec![ranked("/a", 0.9)];
        let fused = fuse(&lexical, &vector);

        assert_eq!(fused[0].file_path, "/a");
        let single = 1.0 / (RRF_K0 + 1.0);
        assert!(fused[0].score > single);
        assert!((fused[0].score - 2.0 * single).abs() < 1e-6);
    }

    #[test]
    fn tie_breaks_on_lexical_rank_then_path() {
        // `/x` only lexical rank 0, `/y` only vector rank 0: same score.
        let fused = fuse(&[ranked("/x", 1.0)], &[ranked("/y", 1.0)]);
        assert_eq!(fused[0].file_path, "/x");
        assert_eq!(fused[1].file_path, "/y");

        // Neither in lexical: path order decides.
        let fused = fuse(&[], &[ranked("/b", 1.0), ranked("/a", 0.5)]);
        // Different vector ranks, so score order holds first.
        assert_eq!(fused[0].file_path, "/b");

        // Same-score, lexical-only tie at distinct ranks keeps rank order.
        let fused = fuse(&[ranked("/m", 1.0), ranked("/n", 1.0)], &[]);
        assert_eq!(fused[0].file_path, "/m");
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let lexical = vec![ranked("/a", 2.0), ranked("/b", 1.5), ranked("/c", 1.0)];
        let vector = vec![ranked("/c", 0.8), ranked("/a", 0.7), ranked("/d", 0.6)];
        let first = fuse(&lexical, &vector);
        for _ in 0..10 {
            assert_eq!(fuse(&lexical, &vector), first);
        }
    }

    #[test]
    fn collapse_takes_best_chunk_rank() {
        let hits = vec![
            chunk_hit("/a", 2, 0.9),
            chunk_hit("/b", 0, 0.8),
            chunk_hit("/a", 0, 0.7),
            chunk_hit("/b", 3, 0.6),
        ];
        let files = collapse_chunks(&hits);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_path, "/a");
        assert_eq!(files[0].score, 0.9);
        assert_eq!(files[1].file_path, "/b");
        assert_eq!(files[1].score, 0.8);
    }

    #[test]
    fn raw_backend_scores_are_carried() {
        let fused = fuse(&[ranked("/a", 7.5)], &[ranked("/a", 0.42)]);
        assert_eq!(fused[0].lexical_score, Some(7.5));
        assert_eq!(fused[0].vector_score, Some(0.42));
        assert_eq!(fused[0].lexical_rank, Some(0));
    }
}
