use expect_test::expect;
use rfb_session::{CredentialRequest, CredentialScheme, Credentials, SecurityType};
use rstest::rstest;

#[test]
fn password_is_redacted_from_debug_output() {
    let credentials = Credentials::new(Some("alice".to_owned()), Some("hunter2".to_owned()));

    let output = format!("{credentials:?}");

    assert!(!output.contains("hunter2"));
    expect![[r#"Credentials { username: Some("alice"), password: Some("<redacted>") }"#]].assert_eq(&output);
}

#[test]
fn missing_password_is_shown_as_none() {
    let output = format!("{:?}", Credentials::default());
    expect![[r#"Credentials { username: None, password: None }"#]].assert_eq(&output);
}

#[rstest]
#[case(SecurityType::NONE, CredentialScheme::None, false, false)]
#[case(SecurityType::VNC_AUTHENTICATION, CredentialScheme::PasswordOnly, false, true)]
#[case(
    SecurityType::APPLE_REMOTE_DESKTOP,
    CredentialScheme::Negotiated(SecurityType::APPLE_REMOTE_DESKTOP),
    true,
    true
)]
#[case(
    SecurityType::MS_LOGON_II,
    CredentialScheme::Negotiated(SecurityType::MS_LOGON_II),
    true,
    true
)]
#[case(SecurityType::TIGHT, CredentialScheme::Negotiated(SecurityType::TIGHT), false, true)]
fn request_shape_follows_security_type(
    #[case] security_type: SecurityType,
    #[case] scheme: CredentialScheme,
    #[case] username_required: bool,
    #[case] password_required: bool,
) {
    let request = CredentialRequest::for_security_type(security_type);

    assert_eq!(request.scheme, scheme);
    assert_eq!(request.username_required, username_required);
    assert_eq!(request.password_required, password_required);
}

#[test]
fn satisfies_checks_required_fields_only() {
    let password_only = Credentials::new(None, Some("pw".to_owned()));
    let full = Credentials::new(Some("bob".to_owned()), Some("pw".to_owned()));

    assert!(password_only.satisfies(&CredentialRequest::password_only()));
    assert!(!password_only.satisfies(&CredentialRequest::username_password()));
    assert!(full.satisfies(&CredentialRequest::username_password()));
    assert!(Credentials::default().satisfies(&CredentialRequest::for_security_type(SecurityType::NONE)));
}

#[test]
fn answered_fields_take_precedence_over_presets() {
    let answer = Credentials::new(None, Some("typed".to_owned()));
    let presets = Credentials::new(Some("preset-user".to_owned()), Some("preset".to_owned()));

    let merged = answer.or(presets);

    assert_eq!(merged.username.as_deref(), Some("preset-user"));
    assert_eq!(merged.password.as_deref(), Some("typed"));
}

#[test]
fn scheme_security_type() {
    assert_eq!(CredentialScheme::PasswordOnly.security_type(), Some(SecurityType::VNC_AUTHENTICATION));
    assert_eq!(CredentialScheme::UsernamePassword.security_type(), None);
    assert_eq!(
        CredentialScheme::Negotiated(SecurityType::SASL).security_type(),
        Some(SecurityType::SASL)
    );
}
