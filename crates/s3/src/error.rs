//! SDK error classification
//!
//! Maps aws-sdk-s3 failures onto osc status codes so the retry executor can
//! tell throttling and outages from permanent rejections.

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use osc_core::{Code, Error};

/// Convert an SDK failure into an osc error
pub(crate) fn classify<E>(err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = match &err {
        SdkError::TimeoutError(_) => Code::DeadlineExceeded,
        SdkError::DispatchFailure(failure) => {
            if failure.is_timeout() {
                Code::DeadlineExceeded
            } else {
                Code::Unavailable
            }
        }
        SdkError::ConstructionFailure(_) => Code::InvalidArgument,
        SdkError::ResponseError(ctx) => code_for_response(ctx.raw().status().as_u16(), None),
        SdkError::ServiceError(ctx) => {
            code_for_response(ctx.raw().status().as_u16(), ctx.err().code())
        }
        _ => Code::Unknown,
    };

    let message = match err.code() {
        Some(service_code) => format!("{service_code}: {}", DisplayErrorContext(&err)),
        None => DisplayErrorContext(&err).to_string(),
    };
    Error::remote(code, message)
}

/// Status code for an HTTP response, preferring the S3 error code when one
/// was returned
pub fn code_for_response(status: u16, service_code: Option<&str>) -> Code {
    if let Some(code) = service_code.and_then(code_for_service_error) {
        return code;
    }

    match status {
        400 => Code::InvalidArgument,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::NotFound,
        409 => Code::Aborted,
        412 => Code::FailedPrecondition,
        416 => Code::OutOfRange,
        429 => Code::ResourceExhausted,
        501 => Code::Unimplemented,
        500 | 502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}

fn code_for_service_error(code: &str) -> Option<Code> {
    let code = match code {
        "NoSuchKey" | "NoSuchBucket" | "NotFound" => Code::NotFound,
        "SlowDown" | "Throttling" | "ThrottlingException" => Code::ResourceExhausted,
        "RequestTimeout" => Code::DeadlineExceeded,
        "ServiceUnavailable" | "InternalError" => Code::Unavailable,
        "AccessDenied" | "AllAccessDisabled" => Code::PermissionDenied,
        "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" => Code::Unauthenticated,
        "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" => Code::AlreadyExists,
        "BucketNotEmpty" => Code::FailedPrecondition,
        "InvalidRange" => Code::OutOfRange,
        "InvalidBucketName" | "InvalidArgument" | "KeyTooLongError" => Code::InvalidArgument,
        "OperationAborted" => Code::Aborted,
        "NotImplemented" => Code::Unimplemented,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::head_object::HeadObjectError;

    #[test]
    fn test_status_classification() {
        assert_eq!(code_for_response(503, None), Code::Unavailable);
        assert_eq!(code_for_response(429, None), Code::ResourceExhausted);
        assert_eq!(code_for_response(404, None), Code::NotFound);
        assert_eq!(code_for_response(403, None), Code::PermissionDenied);
        assert_eq!(code_for_response(400, None), Code::InvalidArgument);
        assert_eq!(code_for_response(418, None), Code::Unknown);
    }

    #[test]
    fn test_service_code_wins_over_status() {
        assert_eq!(
            code_for_response(503, Some("SlowDown")),
            Code::ResourceExhausted
        );
        assert_eq!(code_for_response(404, Some("NoSuchBucket")), Code::NotFound);
        assert_eq!(
            code_for_response(409, Some("BucketNotEmpty")),
            Code::FailedPrecondition
        );
        assert_eq!(code_for_response(404, Some("Unheard")), Code::NotFound);
    }

    #[test]
    fn test_throttling_and_outages_are_retryable() {
        assert!(code_for_response(503, Some("SlowDown")).is_retryable());
        assert!(code_for_response(500, Some("InternalError")).is_retryable());
        assert!(!code_for_response(403, Some("AccessDenied")).is_retryable());
    }

    #[test]
    fn test_timeout_is_deadline_exceeded() {
        let err: SdkError<HeadObjectError, HttpResponse> = SdkError::timeout_error("too slow");
        let err = classify(err);
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert!(err.is_retryable());
    }
}
