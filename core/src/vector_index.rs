//! In-process semantic index: a `DashMap` of vectors ranked by cosine similarity
//! (spec.md §4.F). Not persistent — rebuilt from `embedding.vector_ref` rows on
//! startup by whoever owns the index (the retriever warms it lazily instead).

use dashmap::DashMap;

/// A single scored hit from [`VectorIndex::search`].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub memory_id: String,
    pub score: f32,
}

#[derive(Default)]
pub struct VectorIndex {
    vectors: DashMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self { vectors: DashMap::new() }
    }

    pub fn upsert(&self, memory_id: String, vector: Vec<f32>) {
        self.vectors.insert(memory_id, vector);
    }

    pub fn remove(&self, memory_id: &str) {
        self.vectors.remove(memory_id);
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.vectors.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Returns the `top_k` entries by cosine similarity to `query`, highest first.
    /// Ties break on `memory_id` ascending for determinism.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<VectorHit> {
        let mut hits: Vec<VectorHit> = self
            .vectors
            .iter()
            .map(|entry| VectorHit {
                memory_id: entry.key().clone(),
                score: cosine_similarity(query, entry.value()),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        hits.truncate(top_k);
        hits
    }
}

/// Returns 0.0 if either vector has zero magnitude, matching the degenerate case
/// of an all-zero placeholder embedding rather than dividing by zero.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_by_similarity_with_deterministic_tie_break() {
        let index = VectorIndex::new();
        index.upsert("m1".into(), vec![1.0, 0.0]);
        index.upsert("m2".into(), vec![0.0, 1.0]);
        index.upsert("m3".into(), vec![1.0, 0.0]);
        let hits = index.search(&[1.0, 0.0], 10);
        assert_eq!(hits[0].memory_id, "m1");
        assert_eq!(hits[1].memory_id, "m3");
        assert!(hits[2].score < hits[0].score);
    }

    #[test]
    fn search_respects_top_k() {
        let index = VectorIndex::new();
        for i in 0..10 {
            index.upsert(format!("m{i}"), vec![i as f32, 1.0]);
        }
        let hits = index.search(&[5.0, 1.0], 3);
        assert_eq!(hits.len(), 3);
    }
}
