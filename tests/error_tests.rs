//! Tests for the error system.

use rtloop::error::unified::*;
use rtloop::error::*;

#[test]
fn error_helper_mappings_are_stable_for_major_variants() {
    struct Case {
        error: RtloopError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
        expected_recovery: RecoverySuggestion,
    }

    let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();

    let cases = vec![
        Case {
            error: RtloopError::Authentication("bad-key".to_string()),
            expected_category: ErrorCategory::Authentication,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckCredentials,
        },
        Case {
            error: RtloopError::Connection("reset".to_string()),
            expected_category: ErrorCategory::Connection,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryNewTurn,
        },
        Case {
            error: RtloopError::Protocol("API error: {}".to_string()),
            expected_category: ErrorCategory::Protocol,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::RetryNewTurn,
        },
        Case {
            error: RtloopError::LimitExceeded { limit: 10 },
            expected_category: ErrorCategory::Limit,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ReduceToolUsage,
        },
        Case {
            error: RtloopError::timeout(60_000),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::IncreaseTimeout,
        },
        Case {
            error: RtloopError::Configuration("bad-config".to_string()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckConfiguration,
        },
        Case {
            error: RtloopError::Io(io_error),
            expected_category: ErrorCategory::Connection,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryNewTurn,
        },
        Case {
            error: RtloopError::Serialization(serde_error),
            expected_category: ErrorCategory::Serialization,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ContactSupport,
        },
        Case {
            error: RtloopError::ToolExecution {
                tool_name: "shell".to_string(),
                message: "failed".to_string(),
            },
            expected_category: ErrorCategory::ToolExecution,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckToolImplementation,
        },
        Case {
            error: RtloopError::Interrupted,
            expected_category: ErrorCategory::Interrupted,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::None,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.expected_category, "{}", case.error);
        assert_eq!(case.error.is_retryable(), case.expected_retryable, "{}", case.error);
        assert_eq!(
            case.error.recovery_suggestion(),
            case.expected_recovery,
            "{}",
            case.error
        );
    }
}

#[test]
fn limit_message_names_the_limit() {
    let err = RtloopError::LimitExceeded { limit: 10 };
    assert_eq!(err.to_string(), "Tool call limit of 10 reached for this turn");
}

#[test]
fn timeout_message_reports_window() {
    assert_eq!(
        RtloopError::timeout(1500).to_string(),
        "No terminal event within 1500ms"
    );
}

#[test]
fn category_display_is_snake_case() {
    assert_eq!(ErrorCategory::ToolExecution.to_string(), "tool_execution");
}
