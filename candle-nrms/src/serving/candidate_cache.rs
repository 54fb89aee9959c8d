//! Article Vector Cache
//!
//! Encoded candidate vectors keyed by article id, reused across requests
//! until the article's title or the serving model changes.
//!
//! ## Consistency
//! - An entry is built completely before it is published, and publishing
//!   is a single `Arc` insert under the write lock. Readers see either the
//!   old entry or the new one, never a partial vector.
//! - Each entry records a fingerprint of the title it was encoded from and
//!   the model generation that encoded it. A lookup with a different title,
//!   or for a different generation, is a miss.
//! - Callers pass the generation of the model they encode with. An insert
//!   for any generation other than the cache's current one is refused, so a
//!   request still running on a swapped-out model cannot publish vectors.

use crate::core::{from_candle_error, processing_errors, UnifiedResult};
use crate::validation_error;
use candle_core::Tensor;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Content fingerprint of an article title
pub fn title_fingerprint(title: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    title.hash(&mut hasher);
    hasher.finish()
}

/// One published cache entry
#[derive(Debug, Clone)]
pub struct CachedArticleVector {
    pub fingerprint: u64,
    pub generation: u64,
    /// `[E]`
    pub vector: Tensor,
}

#[derive(Debug, Default)]
pub struct ArticleVectorCache {
    entries: RwLock<HashMap<String, Arc<CachedArticleVector>>>,
    generation: AtomicU64,
}

impl ArticleVectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current model generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached vector for `id` if it was encoded from `title` by model `generation`
    pub fn get(&self, id: &str, title: &str, generation: u64) -> Option<Arc<CachedArticleVector>> {
        let entry = self.entries.read().get(id).cloned()?;
        let fresh = entry.fingerprint == title_fingerprint(title) && entry.generation == generation;
        fresh.then_some(entry)
    }

    /// Publish a vector for `id`, encoded from `title` by model `generation`
    ///
    /// Returns `false` without publishing when `generation` is not current.
    pub fn insert(&self, id: &str, title: &str, vector: Tensor, generation: u64) -> bool {
        let mut entries = self.entries.write();
        if generation != self.generation() {
            return false;
        }
        let entry = Arc::new(CachedArticleVector {
            fingerprint: title_fingerprint(title),
            generation,
            vector,
        });
        entries.insert(id.to_string(), entry);
        true
    }

    /// Drop every entry and move to a new generation, returning it
    pub fn invalidate_all(&self) -> u64 {
        let mut entries = self.entries.write();
        entries.clear();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Vectors `[K, E]` for `(id, title)` pairs, encoding only the misses
    ///
    /// `encode` must run the model of `generation`. It receives the titles of
    /// the missing articles and must return one row per title. Rows encoded
    /// for a generation that is no longer current are returned but not cached.
    pub fn get_or_encode<F>(&self, articles: &[(&str, &str)], generation: u64, encode: F) -> UnifiedResult<Tensor>
    where
        F: FnOnce(&[&str]) -> UnifiedResult<Tensor>,
    {
        if articles.is_empty() {
            return Err(processing_errors::empty_input("article vector lookup"));
        }
        let mut rows: Vec<Option<Tensor>> = articles
            .iter()
            .map(|(id, title)| self.get(id, title, generation).map(|e| e.vector.clone()))
            .collect();

        let missing: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| row.is_none().then_some(i))
            .collect();

        if !missing.is_empty() {
            let titles: Vec<&str> = missing.iter().map(|&i| articles[i].1).collect();
            let encoded = encode(&titles)?;
            let count = encoded
                .dim(0)
                .map_err(|e| from_candle_error(e, "read encoded rows", None))?;
            if count != missing.len() {
                return Err(validation_error!("encoded article rows", missing.len(), count));
            }
            let mut published = 0;
            for (row, &i) in missing.iter().enumerate() {
                let vector = encoded
                    .get(row)
                    .map_err(|e| from_candle_error(e, "split encoded rows", None))?;
                let (id, title) = articles[i];
                if self.insert(id, title, vector.clone(), generation) {
                    published += 1;
                }
                rows[i] = Some(vector);
            }
            debug!(
                "Article vector cache: {} hits, {} encoded, {} published for generation {}",
                articles.len() - missing.len(),
                missing.len(),
                published,
                generation
            );
        }

        let vectors = rows.into_iter().flatten().collect::<Vec<_>>();
        Tensor::stack(&vectors, 0).map_err(|e| from_candle_error(e, "stack cached vectors", None))
    }
}
