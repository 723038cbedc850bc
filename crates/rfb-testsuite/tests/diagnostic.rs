use std::io;

use expect_test::expect;
use rfb_session::{
    DiagnosticRecord, FailureCategory, SecurityNegotiationTrace, SecurityType, SessionError, SessionErrorExt as _,
    SessionErrorKind,
};
use rfb_testsuite::{Observed, RecordingObserver};

fn no_common_type_trace() -> SecurityNegotiationTrace {
    SecurityNegotiationTrace::negotiate(
        &[SecurityType::VENCRYPT],
        &[SecurityType::VNC_AUTHENTICATION, SecurityType::NONE],
    )
}

#[test]
fn negotiation_failure() {
    let trace = no_common_type_trace();
    let error = SessionError::new("security handshake", SessionErrorKind::Negotiation);

    let record = DiagnosticRecord::from_error(&error, Some(&trace), None);

    assert_eq!(record.category, FailureCategory::Negotiation);
    assert_eq!(record.security_trace.as_ref(), Some(&trace));
    expect![[r#"negotiation failure: Security negotiation failed: no mutually supported security type; protocol: offered=[19] supported=[2,1] selected=none"#]]
        .assert_eq(&record.to_string());
}

#[test]
fn os_error_is_extracted() {
    let code = 111;
    let description = io::Error::from_raw_os_error(code).to_string();
    let error = SessionError::transport("connect", io::Error::from_raw_os_error(code));

    let record = DiagnosticRecord::from_error(&error, None, None);

    assert_eq!(record.category, FailureCategory::Transport);
    assert_eq!(record.os_error_code, Some(code));
    assert_eq!(record.os_error_message.as_deref(), Some(description.as_str()));
    assert_eq!(record.message, format!("Connection error: {description}"));
    assert_eq!(record.protocol_error, None);
}

#[test]
fn io_error_attached_as_source() {
    let error = SessionError::custom("read framebuffer update", io::Error::other("stream truncated"));

    let record = DiagnosticRecord::from_error(&error, None, None);

    assert_eq!(record.category, FailureCategory::Transport);
    assert_eq!(record.os_error_code, None);
    assert_eq!(record.os_error_message.as_deref(), Some("stream truncated"));
    assert_eq!(record.message, "Connection error: stream truncated");
}

#[test]
fn authentication_rejected() {
    let error = SessionError::new(
        "authentication",
        SessionErrorKind::AuthenticationRejected("Too many attempts".to_owned()),
    );

    let record = DiagnosticRecord::from_error(&error, None, Some("Too many attempts"));

    assert_eq!(record.category, FailureCategory::Authentication);
    expect![[r#"authentication failure: Authentication failed: Too many attempts; protocol: Too many attempts"#]]
        .assert_eq(&record.to_string());
}

#[test]
fn server_reason_fills_protocol_error() {
    let error = SessionError::new("authentication", SessionErrorKind::AuthenticationCancelled);

    let record = DiagnosticRecord::from_error(&error, None, Some("Server is shutting down"));

    assert_eq!(record.message, "Authentication cancelled");
    assert_eq!(record.protocol_error.as_deref(), Some("Server is shutting down"));
}

#[test]
fn protocol_and_generic_failures() {
    let error = SessionError::protocol("read message", "unknown message type 42");
    let record = DiagnosticRecord::from_error(&error, None, None);
    assert_eq!(record.category, FailureCategory::Protocol);
    assert_eq!(record.message, "Protocol error: unknown message type 42");

    let error = SessionError::general("worker");
    let record = DiagnosticRecord::from_error(&error, None, None);
    assert_eq!(record.category, FailureCategory::Generic);
    assert_eq!(record.message, "Connection failed: [worker] general error");
}

#[test]
fn error_report_walks_the_cause_chain() {
    let error = SessionError::custom("read framebuffer update", io::Error::other("stream truncated"));

    expect![[r#"[read framebuffer update] custom error, caused by: stream truncated"#]].assert_eq(&error.report().to_string());
    assert!(error.find_cause::<io::Error>().is_some());
}

#[test]
fn exactly_one_failure_callback() {
    let record = DiagnosticRecord::generic("Connection failed: boom");

    let plain = RecordingObserver::new();
    record.deliver(&plain);
    assert_eq!(plain.events(), [Observed::Failure("Connection failed: boom".to_owned())]);

    let detailed = RecordingObserver::new().with_detailed_failure();
    record.deliver(&detailed);
    assert_eq!(
        detailed.events(),
        [Observed::DetailedFailure {
            message: "Connection failed: boom".to_owned(),
            protocol_error: None,
            os_error_code: None,
            os_error_message: None,
        }]
    );
}
