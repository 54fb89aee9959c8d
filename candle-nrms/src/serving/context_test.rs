//! Tests for the recommender context

use super::context::*;
use crate::core::tokenization::TitleTokenizer;
use crate::data::BatchAssembler;
use crate::model_architectures::config::{ForwardMode, ModelConfig};
use crate::model_architectures::nrms::NrmsModel;
use crate::training::checkpoint::{CheckpointId, CheckpointManager};
use crate::test_fixtures::fixtures::*;
use rstest::*;
use serial_test::serial;
use std::sync::Arc;
use tempfile::TempDir;

fn serving_config() -> ServingConfig {
    ServingConfig {
        max_history: 4,
        max_title_len: 8,
        top_k: 2,
    }
}

fn context(model: NrmsModel) -> RecommenderContext {
    let tokenizer: Arc<dyn TitleTokenizer> = Arc::new(word_tokenizer());
    RecommenderContext::new(tokenizer, model, serving_config()).unwrap()
}

fn candidates() -> Vec<CandidateArticle> {
    vec![
        CandidateArticle::new("N1", "Stocks rally as markets rise"),
        CandidateArticle::new("N2", "Team wins record game"),
        CandidateArticle::new("N3", "Storm warning for city"),
        CandidateArticle::new("N6", "New phone launch"),
    ]
}

fn personalized(ranking: Ranking) -> (Vec<f32>, Vec<usize>) {
    match ranking {
        Ranking::Personalized { scores, top_k } => (scores, top_k),
        Ranking::ColdUser => panic!("expected a personalized ranking"),
    }
}

/// Test a user without real history is reported as cold
#[rstest]
#[case(vec![])]
#[case(vec!["", "   "])]
#[serial]
fn test_rank_cold_user(tiny_model: NrmsModel, #[case] history: Vec<&str>) {
    let ctx = context(tiny_model);
    assert_eq!(ctx.rank(&history, &candidates()).unwrap(), Ranking::ColdUser);
    assert!(ctx.cache().is_empty());
}

/// Test a personalized ranking scores every candidate and orders the top k
#[rstest]
#[serial]
fn test_rank_personalized(tiny_model: NrmsModel) {
    let ctx = context(tiny_model);
    let (scores, top_k) = personalized(ctx.rank(&["Stocks rally", "Rates rise markets fall"], &candidates()).unwrap());

    assert_eq!(scores.len(), 4);
    assert!(scores.iter().all(|s| s.is_finite()));
    assert_eq!(top_k.len(), 2);
    assert!(scores[top_k[0]] >= scores[top_k[1]]);
    let best = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    assert_eq!(scores[top_k[0]], best);
    assert_eq!(ctx.cache().len(), 4);
}

/// Test cached candidates give the same scores as a fresh encode
#[rstest]
#[serial]
fn test_rank_reuses_cache(tiny_model: NrmsModel) {
    let ctx = context(tiny_model);
    let history = ["Music festival heat record"];
    let (first, _) = personalized(ctx.rank(&history, &candidates()).unwrap());
    let (second, _) = personalized(ctx.rank(&history, &candidates()).unwrap());
    assert_eq!(first, second);
    assert_eq!(ctx.cache().len(), 4);
}

/// Test only the most recent clicks are used
#[rstest]
#[serial]
fn test_rank_truncates_history(tiny_model: NrmsModel) {
    let ctx = context(tiny_model);
    let long = ["Coach fired", "Team wins", "Storm warning", "City council", "New phone", "Heat record"];
    let (from_long, _) = personalized(ctx.rank(&long, &candidates()).unwrap());
    let (from_recent, _) = personalized(ctx.rank(&long[2..], &candidates()).unwrap());
    assert_eq!(from_long, from_recent);
}

/// Test an empty candidate list yields an empty ranking
#[rstest]
#[serial]
fn test_rank_no_candidates(tiny_model: NrmsModel) {
    let ctx = context(tiny_model);
    let (scores, top_k) = personalized(ctx.rank(&["Stocks rally"], &[]).unwrap());
    assert!(scores.is_empty() && top_k.is_empty());
}

/// Test swapping the model moves the cache to a new generation
#[rstest]
#[serial]
fn test_swap_model_invalidates_cache(tiny_model: NrmsModel, tiny_model_config: ModelConfig) {
    let ctx = context(tiny_model);
    let history = ["Election results"];
    let (before, _) = personalized(ctx.rank(&history, &candidates()).unwrap());
    let old_model = ctx.current_model();

    let replacement = NrmsModel::new(tiny_model_config, &test_device()).unwrap();
    let generation = ctx.swap_model(replacement).unwrap();
    assert_eq!(generation, 1);
    assert!(ctx.cache().is_empty());
    assert!(!Arc::ptr_eq(&old_model, &ctx.current_model()));

    let (after, _) = personalized(ctx.rank(&history, &candidates()).unwrap());
    assert_ne!(before, after);
    assert_eq!(ctx.cache().len(), 4);
}

/// Test a request still running on a swapped-out model cannot publish its vectors
#[rstest]
#[serial]
fn test_swap_during_request_keeps_cache_consistent(
    tiny_model: NrmsModel,
    tiny_model_config: ModelConfig,
    temp_dir: TempDir,
) {
    let device = test_device();
    let ctx = context(tiny_model);
    let in_flight = ctx.serving_model();

    let mut manager = CheckpointManager::new(temp_dir.path());
    let id = CheckpointId::epoch_end(1);
    let replacement = NrmsModel::new(tiny_model_config, &device).unwrap();
    assert!(manager.save(&replacement, id, 0).is_saved());
    let generation = ctx.swap_checkpoint(&manager, id).unwrap();
    assert_eq!(ctx.serving_model().generation, generation);
    assert_ne!(in_flight.generation, generation);

    let tokenizer = word_tokenizer();
    let assembler = BatchAssembler::new(4, 8, tokenizer.pad_id());
    let candidates = candidates();
    let articles: Vec<(&str, &str)> = candidates.iter().map(|c| (c.id.as_str(), c.title.as_str())).collect();
    ctx.cache()
        .get_or_encode(&articles, in_flight.generation, |titles| {
            let tokens = tokenizer.tokenize_batch(titles, 8)?;
            let (ids, mask) = assembler.pad_and_mask(&tokens, tokens.len()).to_tensors(&device)?;
            in_flight.model.encode_articles(&ids, &mask, ForwardMode::Eval)
        })
        .unwrap();
    assert!(ctx.cache().is_empty());

    let history = ["Stocks rally", "Storm warning"];
    let (served, _) = personalized(ctx.rank(&history, &candidates).unwrap());
    let fresh = context(manager.load(id, &device).unwrap());
    let (expected, _) = personalized(fresh.rank(&history, &candidates).unwrap());
    for (s, e) in served.iter().zip(&expected) {
        assert!((s - e).abs() < 1e-5, "served {} expected {}", s, e);
    }
}

/// Test swapping in a saved checkpoint restores its scores
#[rstest]
#[serial]
fn test_swap_checkpoint(tiny_model: NrmsModel, tiny_model_config: ModelConfig, temp_dir: TempDir) {
    let mut manager = CheckpointManager::new(temp_dir.path());
    let id = CheckpointId::epoch_end(1);
    assert!(manager.save(&tiny_model, id, 3).is_saved());

    let reference = context(tiny_model);
    let history = ["Weather news", "Storm warning"];
    let (expected, _) = personalized(reference.rank(&history, &candidates()).unwrap());

    let ctx = context(NrmsModel::new(tiny_model_config, &test_device()).unwrap());
    ctx.swap_checkpoint(&manager, id).unwrap();
    let (restored, _) = personalized(ctx.rank(&history, &candidates()).unwrap());
    assert_eq!(expected, restored);
}

/// Test incompatible limits and models are rejected
#[rstest]
#[serial]
fn test_context_rejects_incompatible_setup(tiny_model_config: ModelConfig) {
    let tokenizer: Arc<dyn TitleTokenizer> = Arc::new(word_tokenizer());
    let model = || NrmsModel::new(tiny_model_config.clone(), &test_device()).unwrap();

    let too_long = ServingConfig {
        max_title_len: tiny_model_config.max_positions + 1,
        ..serving_config()
    };
    assert!(RecommenderContext::new(Arc::clone(&tokenizer), model(), too_long).is_err());

    let no_history = ServingConfig {
        max_history: 0,
        ..serving_config()
    };
    assert!(RecommenderContext::new(Arc::clone(&tokenizer), model(), no_history).is_err());

    let small_vocab = ModelConfig {
        vocab_size: 8,
        ..tiny_model_config.clone()
    };
    let small = NrmsModel::new(small_vocab, &test_device()).unwrap();
    assert!(RecommenderContext::new(Arc::clone(&tokenizer), small, serving_config()).is_err());

    let ctx = RecommenderContext::new(tokenizer, model(), serving_config()).unwrap();
    let small = NrmsModel::new(
        ModelConfig {
            vocab_size: 8,
            ..tiny_model_config.clone()
        },
        &test_device(),
    )
    .unwrap();
    assert!(ctx.swap_model(small).is_err());
    assert_eq!(ctx.cache().generation(), 0);
}

/// Test top-k selection orders by score and keeps ties in input order
#[rstest]
#[case(vec![0.1, 0.9, 0.5], 2, vec![1, 2])]
#[case(vec![0.3, 0.3, 0.3], 2, vec![0, 1])]
#[case(vec![0.2, 0.7], 5, vec![1, 0])]
#[case(vec![], 3, vec![])]
fn test_top_k_indices(#[case] scores: Vec<f32>, #[case] k: usize, #[case] expected: Vec<usize>) {
    assert_eq!(top_k_indices(&scores, k), expected);
}

/// Test serving limits deserialize with defaults
#[rstest]
fn test_serving_config_defaults() {
    let config: ServingConfig = serde_json::from_str(r#"{"top_k": 10}"#).unwrap();
    assert_eq!(config.top_k, 10);
    assert_eq!(config.max_history, 50);
    assert_eq!(config.max_title_len, 100);
}
