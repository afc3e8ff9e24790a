use thiserror::Error;

use crate::outcome::{codes, Outcome};

/// Marker the platform puts in the error text when a session has no access
/// to an environment shared by another account.
pub const SHARED_SESSION_MARK: &str = "session [xxx";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Token [{0}] does not match")]
    PermissionDenied(String),

    #[error("unknown action [{0}]")]
    UnknownAction(String),

    #[error("Domain {0} is invalid. Please double check specified domains in the External Domains field.")]
    InvalidDomain(String),

    #[error("remote command failed with result {code}: {}", .err_out.as_deref().unwrap_or("no output"))]
    CommandFailed {
        code: i32,
        exit_status: Option<i32>,
        out: Option<String>,
        err_out: Option<String>,
    },

    #[error("no access to the shared environment: {0}")]
    SessionAccess(String),

    #[error("no value supplied for placeholder %({0})")]
    MissingPlaceholder(String),

    /// A platform call answered with a non-zero result.
    #[error("{}", .0.describe())]
    Platform(Outcome),

    #[error(transparent)]
    Wrapped(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::PermissionDenied(_) => codes::PERMISSION_DENIED,
            Error::SessionAccess(_) => codes::USER_NOT_AUTHENTICATED,
            Error::CommandFailed { code, .. } => *code,
            Error::Platform(outcome) => outcome.result,
            Error::UnknownAction(_)
            | Error::InvalidDomain(_)
            | Error::MissingPlaceholder(_)
            | Error::Wrapped(_) => codes::ERROR_UNKNOWN,
        }
    }

    /// Classify a failed platform access check.
    pub fn from_access_failure(outcome: &Outcome) -> Self {
        let text = outcome.error.clone().unwrap_or_default();
        if outcome.result == codes::USER_NOT_AUTHENTICATED && text.contains(SHARED_SESSION_MARK) {
            Error::SessionAccess(text)
        } else {
            Error::Platform(outcome.clone())
        }
    }
}

impl From<Error> for Outcome {
    fn from(err: Error) -> Self {
        let code = err.code();
        match err {
            Error::PermissionDenied(_) => Outcome {
                result: code,
                error: Some("wrong token".into()),
                message: Some(err.to_string()),
                ..Default::default()
            },
            Error::CommandFailed {
                code,
                exit_status,
                ref out,
                ref err_out,
            } => Outcome {
                result: code,
                error: Some(err.to_string()),
                exit_status,
                out: out.clone(),
                err_out: err_out.clone(),
                ..Default::default()
            },
            Error::Platform(outcome) => outcome,
            Error::Wrapped(err) => Outcome::error(code, format!("{err:#}")),
            err => Outcome::error(code, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_outcome() {
        let outcome = Outcome::from(Error::PermissionDenied("abc".into()));
        assert_eq!(outcome.result, codes::PERMISSION_DENIED);
        assert_eq!(outcome.error.as_deref(), Some("wrong token"));
        assert_eq!(outcome.message.as_deref(), Some("Token [abc] does not match"));
    }

    #[test]
    fn invalid_domain_names_the_entry() {
        let outcome = Outcome::from(Error::InvalidDomain("bad_domain".into()));
        assert_eq!(outcome.result, codes::ERROR_UNKNOWN);
        assert!(outcome.describe().starts_with("Domain bad_domain is invalid."));
    }

    #[test]
    fn wrapped_errors_keep_their_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("failed to fetch template");
        let outcome = Outcome::from(Error::from(err));
        assert_eq!(
            outcome.error.as_deref(),
            Some("failed to fetch template: connection refused")
        );
    }

    #[test]
    fn platform_failures_pass_through() {
        let failed = Outcome::error(codes::SCRIPT_NOT_FOUND, "script not found");
        let err = failed.clone().into_result().unwrap_err();
        assert_eq!(err.code(), codes::SCRIPT_NOT_FOUND);
        assert_eq!(Outcome::from(err), failed);
        assert!(Outcome::ok().into_result().is_ok());
    }

    #[test]
    fn shared_session_failures_are_recognised() {
        let outcome = Outcome::error(
            codes::USER_NOT_AUTHENTICATED,
            "session [xxx...] has no access to env",
        );
        assert!(matches!(
            Error::from_access_failure(&outcome),
            Error::SessionAccess(_)
        ));

        let outcome = Outcome::error(codes::USER_NOT_AUTHENTICATED, "token expired");
        assert!(matches!(
            Error::from_access_failure(&outcome),
            Error::Platform(ref failed) if failed == &outcome
        ));
    }
}
