//! Outcome classification: terminal error -> gRPC code -> severity.

use std::error::Error;

use tonic::{Code, Status};

use crate::error::OptionsError;
use crate::logger::Severity;

/// Every member of the gRPC code set.
pub const ALL_CODES: [Code; 17] = [
    Code::Ok,
    Code::Cancelled,
    Code::Unknown,
    Code::InvalidArgument,
    Code::DeadlineExceeded,
    Code::NotFound,
    Code::AlreadyExists,
    Code::PermissionDenied,
    Code::ResourceExhausted,
    Code::FailedPrecondition,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unimplemented,
    Code::Internal,
    Code::Unavailable,
    Code::DataLoss,
    Code::Unauthenticated,
];

/// Map a handler's terminal error to a gRPC code.
///
/// No error is `Ok`. A `tonic::Status`, either the error itself or anywhere
/// in its `source()` chain, contributes its own code. Everything else is
/// `Internal`.
pub fn default_error_to_code(err: Option<&(dyn Error + 'static)>) -> Code {
    let mut current = match err {
        Some(err) => Some(err),
        None => return Code::Ok,
    };
    while let Some(err) = current {
        if let Some(status) = err.downcast_ref::<Status>() {
            return status.code();
        }
        current = err.source();
    }
    Code::Internal
}

/// Default severity for each code: client-caused outcomes log at info or
/// warn, server-side failures at error.
pub fn default_code_to_level(code: Code) -> Severity {
    match code {
        Code::Ok => Severity::Info,
        Code::Cancelled => Severity::Info,
        Code::InvalidArgument => Severity::Info,
        Code::NotFound => Severity::Info,
        Code::AlreadyExists => Severity::Info,
        Code::Unauthenticated => Severity::Info,

        Code::DeadlineExceeded => Severity::Warn,
        Code::PermissionDenied => Severity::Warn,
        Code::ResourceExhausted => Severity::Warn,
        Code::FailedPrecondition => Severity::Warn,
        Code::Aborted => Severity::Warn,
        Code::OutOfRange => Severity::Warn,

        Code::Unknown => Severity::Error,
        Code::Unimplemented => Severity::Error,
        Code::Internal => Severity::Error,
        Code::Unavailable => Severity::Error,
        Code::DataLoss => Severity::Error,
    }
}

/// Canonical name of a code as it appears in the `grpc.code` field.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}

/// Reverse of [`code_name`], ignoring ASCII case.
///
/// Also accepts `Cancelled` and `Ok`. Configuration sources that lowercase
/// their keys hand over names like `notfound`, so case must not matter.
pub fn parse_code_name(name: &str) -> Result<Code, OptionsError> {
    if name.eq_ignore_ascii_case("cancelled") {
        return Ok(Code::Cancelled);
    }
    ALL_CODES
        .iter()
        .copied()
        .find(|code| code_name(*code).eq_ignore_ascii_case(name))
        .ok_or_else(|| OptionsError::UnknownCode(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Plain;

    impl fmt::Display for Plain {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("plain failure")
        }
    }

    impl Error for Plain {}

    #[derive(Debug)]
    struct Wrapped(Status);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0.message())
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_no_error_is_ok() {
        assert_eq!(default_error_to_code(None), Code::Ok);
    }

    #[test]
    fn test_status_keeps_its_code() {
        let status = Status::not_found("missing");
        assert_eq!(default_error_to_code(Some(&status)), Code::NotFound);
    }

    #[test]
    fn test_status_in_source_chain() {
        let err = Wrapped(Status::permission_denied("nope"));
        assert_eq!(default_error_to_code(Some(&err)), Code::PermissionDenied);
    }

    #[test]
    fn test_plain_error_is_internal() {
        assert_eq!(default_error_to_code(Some(&Plain)), Code::Internal);
    }

    #[test]
    fn test_level_table_is_total() {
        for code in ALL_CODES {
            let _ = default_code_to_level(code);
        }
        assert_eq!(default_code_to_level(Code::Ok), Severity::Info);
        assert_eq!(default_code_to_level(Code::NotFound), Severity::Info);
        assert_eq!(default_code_to_level(Code::DeadlineExceeded), Severity::Warn);
        assert_eq!(default_code_to_level(Code::Internal), Severity::Error);
        assert_eq!(default_code_to_level(Code::Unavailable), Severity::Error);
        assert_eq!(default_code_to_level(Code::DataLoss), Severity::Error);
        assert_eq!(default_code_to_level(Code::Unknown), Severity::Error);
    }

    #[test]
    fn test_parse_code_name_ignores_case() {
        assert_eq!(parse_code_name("notfound").unwrap(), Code::NotFound);
        assert_eq!(parse_code_name("DEADLINEEXCEEDED").unwrap(), Code::DeadlineExceeded);
        assert_eq!(parse_code_name("ok").unwrap(), Code::Ok);
        assert_eq!(parse_code_name("canceled").unwrap(), Code::Cancelled);
        assert_eq!(parse_code_name("cancelled").unwrap(), Code::Cancelled);
        for code in ALL_CODES {
            let lowered = code_name(code).to_ascii_lowercase();
            assert_eq!(parse_code_name(&lowered).unwrap(), code);
        }
    }

    #[test]
    fn test_code_names() {
        assert_eq!(code_name(Code::Ok), "OK");
        assert_eq!(code_name(Code::Internal), "Internal");
        assert_eq!(code_name(Code::Cancelled), "Canceled");
    }

    #[test]
    fn test_parse_code_name_covers_every_code() {
        for code in ALL_CODES {
            assert_eq!(parse_code_name(code_name(code)).unwrap(), code);
        }
        assert_eq!(parse_code_name("Cancelled").unwrap(), Code::Cancelled);
        assert_eq!(parse_code_name("Ok").unwrap(), Code::Ok);
        assert_eq!(
            parse_code_name("Teapot"),
            Err(OptionsError::UnknownCode("Teapot".to_string()))
        );
    }
}
