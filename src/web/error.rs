//! Mapping of classified errors to HTTP responses.

use crate::error::{ErrorKind, kind_of};
use serde::Serialize;
use std::fmt::{Debug, Display, Formatter};
use warp::http::StatusCode;
use warp::reject::Reject;

/// An error that can be serialized to JSON and returned as an HTTP response.
///
/// The `status` field determines the HTTP status code but is not serialized.
#[derive(Clone, Serialize, Debug)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub message: String,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl Reject for ApiError {}

impl ApiError {
    pub fn new(status: StatusCode, message: impl ToString) -> Self {
        ApiError {
            status,
            message: message.to_string(),
        }
    }
}

impl From<&anyhow::Error> for ApiError {
    fn from(err: &anyhow::Error) -> Self {
        let status = kind_of(err)
            .map(status_of)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        ApiError::new(status, format!("{:#}", err))
    }
}

/// Determines the response status for a failure of the given kind.
pub fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::ConditionFailed => StatusCode::CONFLICT,
        ErrorKind::Throttled => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PartialFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultExt;
    use anyhow::{Context, anyhow};

    #[test]
    fn classified_errors_keep_their_status_below_context() {
        let err = Err::<(), _>(anyhow!("no such post"))
            .with_kind(ErrorKind::NotFound)
            .context("Failed to resolve post graph")
            .unwrap_err();

        let api_error = ApiError::from(&err);
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.starts_with("Failed to resolve post graph: "));
        assert!(api_error.message.ends_with("no such post"));
    }

    #[test]
    fn unclassified_errors_are_internal() {
        let err = anyhow!("boom");
        assert_eq!(
            ApiError::from(&err).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_the_message_is_serialized() {
        let api_error = ApiError::new(StatusCode::CONFLICT, "Vote exists");
        assert_eq!(
            serde_json::to_string(&api_error).unwrap(),
            r#"{"message":"Vote exists"}"#
        );
    }
}
