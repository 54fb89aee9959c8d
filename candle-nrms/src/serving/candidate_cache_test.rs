//! Tests for the article vector cache

use super::candidate_cache::*;
use crate::core::UnifiedError;
use crate::test_fixtures::fixtures::test_device;
use candle_core::{DType, Tensor};
use rstest::*;
use std::cell::RefCell;

fn vector(value: f32) -> Tensor {
    Tensor::full(value, 4, &test_device()).unwrap()
}

/// Encoder stub: row i is filled with the title's length
fn encode_lengths(titles: &[&str]) -> Result<Tensor, UnifiedError> {
    let rows: Vec<Tensor> = titles.iter().map(|t| vector(t.len() as f32)).collect();
    Ok(Tensor::stack(&rows, 0).unwrap())
}

/// Test hits require the same title and the requested generation
#[rstest]
fn test_get_insert_and_staleness() {
    let cache = ArticleVectorCache::new();
    assert!(cache.is_empty());
    assert!(cache.get("N1", "Storm warning", 0).is_none());

    assert!(cache.insert("N1", "Storm warning", vector(1.0), cache.generation()));
    assert_eq!(cache.len(), 1);
    let hit = cache.get("N1", "Storm warning", 0).unwrap();
    assert_eq!(hit.fingerprint, title_fingerprint("Storm warning"));
    assert_eq!(hit.generation, 0);

    assert!(cache.get("N1", "Storm warning upgraded", 0).is_none());
    assert!(cache.get("N1", "Storm warning", 1).is_none());

    let next = cache.invalidate_all();
    assert_eq!(next, 1);
    assert_eq!(cache.generation(), 1);
    assert!(cache.is_empty());
    assert!(cache.get("N1", "Storm warning", 0).is_none());
}

/// Test inserts for a superseded generation are refused
#[rstest]
fn test_insert_refuses_old_generation() {
    let cache = ArticleVectorCache::new();
    cache.invalidate_all();
    assert!(!cache.insert("N1", "title", vector(1.0), 0));
    assert!(cache.is_empty());
    assert!(cache.get("N1", "title", 0).is_none());
    assert!(cache.insert("N1", "title", vector(1.0), 1));
    assert!(cache.get("N1", "title", 1).is_some());
}

/// Test only misses are encoded and rows come back in request order
#[rstest]
fn test_get_or_encode_encodes_misses_only() {
    let cache = ArticleVectorCache::new();
    cache.insert("N2", "bb", vector(42.0), 0);

    let requested = RefCell::new(Vec::new());
    let articles = [("N1", "a"), ("N2", "bb"), ("N3", "ccc")];
    let vectors = cache
        .get_or_encode(&articles, 0, |titles| {
            requested.borrow_mut().extend(titles.iter().map(|t| t.to_string()));
            encode_lengths(titles)
        })
        .unwrap();

    assert_eq!(requested.into_inner(), vec!["a".to_string(), "ccc".to_string()]);
    assert_eq!(vectors.dims(), &[3, 4]);
    let firsts: Vec<f32> = vectors.to_vec2::<f32>().unwrap().iter().map(|r| r[0]).collect();
    assert_eq!(firsts, vec![1.0, 42.0, 3.0]);
    assert_eq!(cache.len(), 3);

    let again = cache
        .get_or_encode(&articles, 0, |_| panic!("everything should be cached"))
        .unwrap();
    assert_eq!(again.to_vec2::<f32>().unwrap(), vectors.to_vec2::<f32>().unwrap());
}

/// Test a changed title is re-encoded
#[rstest]
fn test_get_or_encode_reencodes_changed_title() {
    let cache = ArticleVectorCache::new();
    cache.get_or_encode(&[("N1", "short")], 0, encode_lengths).unwrap();
    let vectors = cache.get_or_encode(&[("N1", "much longer")], 0, encode_lengths).unwrap();
    assert_eq!(vectors.to_vec2::<f32>().unwrap()[0][0], 11.0);
}

/// Test a lookup for a superseded generation encodes but publishes nothing
#[rstest]
fn test_get_or_encode_old_generation_is_not_cached() {
    let cache = ArticleVectorCache::new();
    let generation = cache.generation();
    cache.get_or_encode(&[("N1", "short")], generation, encode_lengths).unwrap();
    let current = cache.invalidate_all();

    let vectors = cache
        .get_or_encode(&[("N1", "short"), ("N2", "four")], generation, encode_lengths)
        .unwrap();
    assert_eq!(vectors.dims(), &[2, 4]);
    assert!(cache.is_empty());

    let encoded = RefCell::new(0);
    cache
        .get_or_encode(&[("N1", "short")], current, |titles| {
            *encoded.borrow_mut() += titles.len();
            encode_lengths(titles)
        })
        .unwrap();
    assert_eq!(encoded.into_inner(), 1);
    assert_eq!(cache.len(), 1);
}

/// Test empty requests and miscounted encoder output are errors
#[rstest]
fn test_get_or_encode_errors() {
    let cache = ArticleVectorCache::new();
    assert!(cache.get_or_encode(&[], 0, encode_lengths).is_err());

    let result = cache.get_or_encode(&[("N1", "a"), ("N2", "b")], 0, |_| {
        Ok(Tensor::zeros((1, 4), DType::F32, &test_device()).unwrap())
    });
    assert!(matches!(result, Err(UnifiedError::Validation { .. })));
    assert!(cache.is_empty());
}
