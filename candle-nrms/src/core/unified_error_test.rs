//! Tests for unified_error module

use super::unified_error::*;
use rstest::*;

/// Test error formatting carries operation, reason and context
#[rstest]
#[case("config_load", "Invalid JSON format", Some("file: config.json".to_string()), "Configuration")]
#[case("article_forward", "Embedding lookup failed", None, "Model")]
#[case("collate", "Shape mismatch", Some("input shape: [2, 50, 30]".to_string()), "Processing")]
fn test_unified_error_creation_and_formatting(
    #[case] operation: &str,
    #[case] message: &str,
    #[case] context: Option<String>,
    #[case] error_type: &str,
) {
    let error = match error_type {
        "Configuration" => UnifiedError::Configuration {
            operation: operation.to_string(),
            source: ConfigErrorType::InvalidData(message.to_string()),
            context: context.clone(),
        },
        "Model" => UnifiedError::Model {
            component: ModelComponent::ArticleEncoder,
            operation: operation.to_string(),
            reason: message.to_string(),
            context: context.clone(),
        },
        "Processing" => UnifiedError::Processing {
            operation: operation.to_string(),
            reason: message.to_string(),
            input_context: context.clone(),
        },
        _ => panic!("Unknown error type: {}", error_type),
    };

    let error_string = format!("{}", error);
    assert!(error_string.contains(operation), "Error should contain operation name");
    assert!(error_string.contains(message), "Error should contain error message");
    if let Some(ref ctx) = context {
        assert!(error_string.contains(ctx), "Error should contain context if provided");
    }
}

/// Test conversion from standard library and serde errors
#[rstest]
fn test_unified_error_conversions() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "news.tsv missing");
    let unified: UnifiedError = io_error.into();
    assert!(matches!(unified, UnifiedError::IO { .. }));
    assert!(unified.to_string().contains("news.tsv missing"));

    let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let unified: UnifiedError = json_error.into();
    assert!(matches!(
        unified,
        UnifiedError::Configuration {
            source: ConfigErrorType::ParseError(_),
            ..
        }
    ));
}

/// Test helper constructors produce the expected categories
#[rstest]
fn test_unified_error_helper_constructors() {
    let err = config_errors::file_not_found("run.json");
    assert!(matches!(
        err,
        UnifiedError::Configuration {
            source: ConfigErrorType::FileNotFound(_),
            ..
        }
    ));

    let err = config_errors::invalid_value("batch_size", "must be greater than 0");
    assert!(err.to_string().contains("batch_size"));

    let err = shape_errors::mismatch("clicked_ids", &[2, 50, 30], &[2, 49, 30]);
    assert!(matches!(err, UnifiedError::Validation { .. }));
    assert!(err.to_string().contains("[2, 49, 30]"));

    let err = shape_errors::dtype("padding mask", candle_core::DType::U8, candle_core::DType::F32);
    assert!(err.to_string().contains("U8"));

    let err = processing_errors::empty_input("collate batch");
    assert!(err.to_string().contains("empty input"));

    let err = crate::validation_error!("label", "< 3", 5);
    assert!(err.to_string().contains("label"));
}

/// Test client-error classification used by the serving path
#[rstest]
#[case(shape_errors::rank("candidate_ids", 3, &[2, 5]), true)]
#[case(UnifiedError::Data { source_name: "batch".to_string(), reason: "no topics".to_string() }, true)]
#[case(UnifiedError::Training { step: 4, reason: "non-finite loss NaN".to_string() }, false)]
#[case(processing_errors::empty_input("collate batch"), false)]
#[case(config_errors::missing_field("model", "sidecar"), false)]
fn test_unified_error_is_client_error(#[case] error: UnifiedError, #[case] expected: bool) {
    assert_eq!(error.is_client_error(), expected);
}

/// Test model errors record the failing component
#[rstest]
fn test_to_model_error() {
    let err = to_model_error("boom", ModelComponent::Scorer, "dot product");
    match &err {
        UnifiedError::Model {
            component,
            operation,
            reason,
            context,
        } => {
            assert_eq!(*component, ModelComponent::Scorer);
            assert_eq!(operation, "dot product");
            assert_eq!(reason, "boom");
            assert!(context.is_none());
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_client_error());

    let err = from_candle_error(candle_core::Error::Msg("oops".to_string()), "matmul", Some("scores"));
    assert!(err.to_string().contains("oops (scores)"));
}
