//! Tests for tokenization module

use super::tokenization::*;
use crate::test_fixtures::fixtures::*;
use rstest::*;

/// Test known words map to their vocabulary ids, unknown words to [UNK]
#[rstest]
fn test_tokenize_known_and_unknown_words(word_tokenizer: HfTitleTokenizer) {
    let ids = word_tokenizer.tokenize("Stocks rally", 10).unwrap();
    assert_eq!(ids, vec![2, 3]);

    let ids = word_tokenizer.tokenize("stocks zeppelin", 10).unwrap();
    assert_eq!(ids, vec![2, 1]);
}

/// Test truncation to the maximum title length
#[rstest]
#[case(1, 1)]
#[case(3, 3)]
#[case(10, 5)]
fn test_tokenize_truncates(word_tokenizer: HfTitleTokenizer, #[case] max_len: usize, #[case] expected: usize) {
    let ids = word_tokenizer
        .tokenize("Music festival heat record rally", max_len)
        .unwrap();
    assert_eq!(ids.len(), expected);
}

/// Test degenerate input yields a single pad token rather than an empty sequence
#[rstest]
#[case("")]
#[case("   ")]
fn test_tokenize_empty_title(word_tokenizer: HfTitleTokenizer, #[case] text: &str) {
    let ids = word_tokenizer.tokenize(text, 10).unwrap();
    assert_eq!(ids, vec![word_tokenizer.pad_id()]);
}

/// Test the pad id is discovered from the vocabulary
#[rstest]
fn test_pad_id_and_vocab_size(word_tokenizer: HfTitleTokenizer) {
    assert_eq!(word_tokenizer.pad_id(), PAD_ID);
    assert_eq!(word_tokenizer.vocab_size(), fixture_vocab_size());
}

/// Test batch tokenization preserves input order
#[rstest]
fn test_tokenize_batch_preserves_order(word_tokenizer: HfTitleTokenizer) {
    let titles = ["storm warning", "team wins", "new phone launch"];
    let batch = word_tokenizer.tokenize_batch(&titles, 10).unwrap();
    assert_eq!(batch.len(), 3);
    for (title, ids) in titles.iter().zip(&batch) {
        assert_eq!(ids, &word_tokenizer.tokenize(title, 10).unwrap());
    }
}

/// Test loading the tokenizer from a file on disk
#[rstest]
fn test_from_file(temp_dir: tempfile::TempDir) {
    let path = temp_dir.path().join("tokenizer.json");
    std::fs::write(&path, tokenizer_json()).unwrap();
    let tokenizer = HfTitleTokenizer::from_file(&path).unwrap().with_special_tokens(false);
    assert_eq!(tokenizer.tokenize("weather news", 4).unwrap(), vec![28, 29]);

    let missing = temp_dir.path().join("absent.json");
    assert!(HfTitleTokenizer::from_file(&missing).is_err());
}
