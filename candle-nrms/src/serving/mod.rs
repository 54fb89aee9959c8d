//! # Serving
//!
//! Read-only, request-time ranking with cached candidate vectors and
//! atomic model swaps.

pub mod candidate_cache;
pub mod context;

pub use candidate_cache::{title_fingerprint, ArticleVectorCache, CachedArticleVector};
pub use context::{
    top_k_indices, CandidateArticle, Ranking, RecommenderContext, ServingConfig, ServingModel,
};

#[cfg(test)]
mod candidate_cache_test;
#[cfg(test)]
mod context_test;
