//! The closed S3 error taxonomy.
//!
//! Every failure a handler can surface maps to one variant here, each
//! carrying its S3 code string and HTTP status. The enum implements
//! [`axum::response::IntoResponse`] so handlers simply return
//! `Err(S3Error::NoSuchBucket { .. })` and the top-level converter renders
//! the error XML and stamps the request id.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::util;
use crate::xml::render_error;

/// S3 error kinds. The set is closed: new failure modes must be given a
/// variant (and a code + status) rather than smuggled through strings.
#[derive(Debug, Error)]
pub enum S3Error {
    #[error("The specified bucket does not exist")]
    NoSuchBucket { bucket: String },

    #[error("The specified key does not exist.")]
    NoSuchKey { key: String },

    #[error("The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.")]
    NoSuchUpload { upload_id: String },

    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    /// Raised only outside us-east-1; in us-east-1 re-creation by the same
    /// owner is answered with a plain 200 by the CreateBucket handler.
    #[error("Your previous request to create the named bucket succeeded and you already own it.")]
    BucketAlreadyOwnedByYou { bucket: String },

    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty { bucket: String },

    #[error("{message}")]
    AccessDenied { message: String },

    #[error("The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    #[error("The request signature we calculated does not match the signature you provided. Check your key and signing method.")]
    SignatureDoesNotMatch,

    #[error("The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,

    #[error("{message}")]
    AuthorizationQueryParametersError { message: String },

    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    #[error("{message}")]
    InvalidArgument { message: String },

    #[error("One or more of the specified parts could not be found. The part may not have been uploaded, or the specified entity tag may not match the part's entity tag.")]
    InvalidPart,

    #[error("The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,

    #[error("The requested range is not satisfiable")]
    InvalidRange,

    #[error("Your proposed upload exceeds the maximum allowed object size.")]
    EntityTooLarge,

    #[error("Your proposed upload is smaller than the minimum allowed size")]
    EntityTooSmall,

    #[error("The Content-MD5 you specified did not match what we received.")]
    BadDigest,

    #[error("The Content-MD5 you specified was invalid.")]
    InvalidDigest,

    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    #[error("You must provide the Content-Length HTTP header.")]
    MissingContentLength,

    #[error("At least one of the pre-conditions you specified did not hold")]
    PreconditionFailed,

    #[error("Your key is too long")]
    KeyTooLongError,

    #[error("A header you provided implies functionality that is not implemented")]
    NotImplemented,

    /// 304 for conditional GET/HEAD. Not a failure; rendered without a body,
    /// with the object's ETag when known.
    #[error("Not Modified")]
    NotModified { etag: Option<String> },

    #[error("We encountered an internal error. Please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl S3Error {
    /// The `<Code>` string for the error XML document.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket { .. } => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::NoSuchUpload { .. } => "NoSuchUpload",
            S3Error::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            S3Error::BucketAlreadyOwnedByYou { .. } => "BucketAlreadyOwnedByYou",
            S3Error::BucketNotEmpty { .. } => "BucketNotEmpty",
            S3Error::AccessDenied { .. } => "AccessDenied",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::AuthorizationQueryParametersError { .. } => {
                "AuthorizationQueryParametersError"
            }
            S3Error::InvalidBucketName { .. } => "InvalidBucketName",
            S3Error::InvalidArgument { .. } => "InvalidArgument",
            S3Error::InvalidPart => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::InvalidRange => "InvalidRange",
            S3Error::EntityTooLarge => "EntityTooLarge",
            S3Error::EntityTooSmall => "EntityTooSmall",
            S3Error::BadDigest => "BadDigest",
            S3Error::InvalidDigest => "InvalidDigest",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::MissingContentLength => "MissingContentLength",
            S3Error::PreconditionFailed => "PreconditionFailed",
            S3Error::KeyTooLongError => "KeyTooLongError",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::NotModified { .. } => "NotModified",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// The HTTP status this error renders with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket { .. }
            | S3Error::NoSuchKey { .. }
            | S3Error::NoSuchUpload { .. } => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyExists { .. }
            | S3Error::BucketAlreadyOwnedByYou { .. }
            | S3Error::BucketNotEmpty { .. } => StatusCode::CONFLICT,
            S3Error::AccessDenied { .. }
            | S3Error::InvalidAccessKeyId
            | S3Error::SignatureDoesNotMatch
            | S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::AuthorizationQueryParametersError { .. }
            | S3Error::InvalidBucketName { .. }
            | S3Error::InvalidArgument { .. }
            | S3Error::InvalidPart
            | S3Error::InvalidPartOrder
            | S3Error::EntityTooLarge
            | S3Error::EntityTooSmall
            | S3Error::BadDigest
            | S3Error::InvalidDigest
            | S3Error::MalformedXML
            | S3Error::KeyTooLongError => StatusCode::BAD_REQUEST,
            S3Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            S3Error::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::NotModified { .. } => StatusCode::NOT_MODIFIED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `<Resource>` value for the error document, when one applies.
    fn resource(&self) -> String {
        match self {
            S3Error::NoSuchBucket { bucket }
            | S3Error::BucketAlreadyExists { bucket }
            | S3Error::BucketAlreadyOwnedByYou { bucket }
            | S3Error::BucketNotEmpty { bucket } => format!("/{bucket}"),
            S3Error::NoSuchKey { key } => format!("/{key}"),
            S3Error::NoSuchUpload { upload_id } => upload_id.clone(),
            S3Error::InvalidBucketName { name } => format!("/{name}"),
            _ => String::new(),
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = util::request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        // 304 carries no body; surface the ETag so caches can revalidate.
        if let S3Error::NotModified { etag } = &self {
            let mut response = status.into_response();
            let headers = response.headers_mut();
            headers.insert("x-amz-request-id", HeaderValue::from_str(&request_id).unwrap());
            headers.insert("date", HeaderValue::from_str(&date).unwrap());
            headers.insert("server", HeaderValue::from_static("BleepStore"));
            if let Some(etag) = etag {
                if let Ok(value) = HeaderValue::from_str(etag) {
                    headers.insert("etag", value);
                }
            }
            return response;
        }

        if let S3Error::InternalError(cause) = &self {
            tracing::error!(error = %cause, "internal error");
        }

        let body = render_error(self.code(), &self.to_string(), &self.resource(), &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id),
                ("date", date),
                ("server", "BleepStore".to_string()),
            ],
            body,
        )
            .into_response()
    }
}
