/// Creates a `SessionError` with `General` kind
///
/// Shorthand for
/// ```rust
/// <rfb_session::SessionError as rfb_session::SessionErrorExt>::general(context)
/// ```
#[macro_export]
macro_rules! general_err {
    ( $context:expr $(,)? ) => {{
        <$crate::SessionError as $crate::SessionErrorExt>::general($context)
    }};
}

/// Creates a `SessionError` with `Protocol` kind
///
/// Shorthand for
/// ```rust
/// <rfb_session::SessionError as rfb_session::SessionErrorExt>::protocol(context, description)
/// ```
#[macro_export]
macro_rules! protocol_err {
    ( $context:expr, $($arg:tt)* ) => {{
        <$crate::SessionError as $crate::SessionErrorExt>::protocol($context, format!($($arg)*))
    }};
}

/// Creates a `SessionError` with `Custom` kind and a source error attached to it
///
/// Shorthand for
/// ```rust
/// <rfb_session::SessionError as rfb_session::SessionErrorExt>::custom(context, source)
/// ```
#[macro_export]
macro_rules! custom_err {
    ( $context:expr, $source:expr $(,)? ) => {{
        <$crate::SessionError as $crate::SessionErrorExt>::custom($context, $source)
    }};
}
