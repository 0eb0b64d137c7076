use std::fmt::{self, Debug, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use derive_more::Display;
use http::StatusCode;

type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while parsing a multipart request and
/// storing its parts.
///
/// The error is cheap to clone: the first error of a request is reported both
/// as [`Event::Error`](crate::Event::Error) and to the part stream that was
/// still receiving data when it happened.
#[derive(Clone, Display)]
#[non_exhaustive]
pub enum Error {
    /// The request carries no `Content-Type` header.
    #[display(fmt = "missing content-type header")]
    NoContentType,

    /// The `Content-Type` header is neither `multipart/form-data` nor
    /// `multipart/related`.
    #[display(fmt = "unsupported content-type")]
    NoMultipart,

    /// Failed to convert the `Content-Type` to [`mime::Mime`] type.
    #[display(fmt = "failed to decode content-type: {}", _0)]
    DecodeContentType(BoxError),

    /// No boundary found in `Content-Type` header.
    #[display(fmt = "content-type missing boundary")]
    NoBoundary,

    /// A byte that is not allowed in the current position of the body.
    #[display(fmt = "expected {}, received {}", expected, found)]
    UnexpectedByte { expected: &'static str, found: u8 },

    /// A part header line starts with a colon.
    #[display(fmt = "empty header field")]
    EmptyHeaderField,

    /// Failed to decode a part's raw header name to
    /// [`HeaderName`](http::header::HeaderName) type.
    #[display(fmt = "failed to decode part's raw header name: {:?} {}", name, cause)]
    DecodeHeaderName { name: String, cause: BoxError },

    /// The part declares a `Content-Transfer-Encoding` that is not supported.
    #[display(fmt = "unknown transfer-encoding: {}", _0)]
    UnknownTransferEncoding(String),

    /// A `base64` encoded part body is not valid base64.
    #[display(fmt = "failed to decode base64 part body: {}", _0)]
    DecodeBase64(base64::DecodeError),

    /// The body ended before the closing boundary.
    #[display(fmt = "stream ended unexpectedly")]
    IncompleteStream,

    /// More parts than allowed by [`Options::max_fields`](crate::Options::max_fields).
    #[display(fmt = "maxFields {} exceeded", limit)]
    FieldCountExceeded { limit: usize },

    /// The fields of the request exceeded
    /// [`Options::max_fields_size`](crate::Options::max_fields_size).
    #[display(fmt = "maxFieldsSize {} exceeded", limit)]
    FieldsSizeExceeded { limit: u64 },

    /// The files of the request exceeded
    /// [`Options::max_files_size`](crate::Options::max_files_size).
    #[display(fmt = "maxFilesSize {} exceeded", limit)]
    FilesSizeExceeded { limit: u64 },

    /// The request was aborted by the transport.
    #[display(fmt = "request aborted")]
    Aborted,

    /// Reading the request body failed.
    #[display(fmt = "stream read failed: {}", _0)]
    StreamReadFailed(BoxError),

    /// The destination file of an upload could not be created.
    #[display(fmt = "failed to create {}: {}", "path.display()", cause)]
    CreateFileFailed { path: PathBuf, cause: BoxError },

    /// Writing to the destination file of an upload failed.
    #[display(fmt = "failed to write {}: {}", "path.display()", cause)]
    WriteFileFailed { path: PathBuf, cause: BoxError },

    /// An upload could not be removed while cleaning up after an error.
    #[display(fmt = "failed to remove {}: {}", "path.display()", cause)]
    RemoveFileFailed { path: PathBuf, cause: BoxError },

    /// The parser reached a state it can never be in.
    #[display(fmt = "parser has invalid state: {}", _0)]
    InvalidState(&'static str),

    /// Failed to deserialize a field or part body as JSON.
    #[cfg(feature = "json")]
    #[display(fmt = "failed to decode data as JSON: {}", _0)]
    DecodeJson(Arc<serde_json::Error>),
}

/// The broad class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was rejected before any byte of the body was parsed.
    Validation,
    /// The body is not well formed multipart data.
    Syntax,
    /// A configured limit was exceeded.
    LimitExceeded,
    /// The transport or the file system failed.
    Transport,
    /// A bug in the parser.
    Internal,
}

impl Error {
    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoContentType | Error::NoMultipart | Error::DecodeContentType(_) | Error::NoBoundary => {
                ErrorKind::Validation
            }
            Error::UnexpectedByte { .. }
            | Error::EmptyHeaderField
            | Error::DecodeHeaderName { .. }
            | Error::UnknownTransferEncoding(_)
            | Error::DecodeBase64(_)
            | Error::IncompleteStream => ErrorKind::Syntax,
            Error::FieldCountExceeded { .. } | Error::FieldsSizeExceeded { .. } | Error::FilesSizeExceeded { .. } => {
                ErrorKind::LimitExceeded
            }
            Error::Aborted
            | Error::StreamReadFailed(_)
            | Error::CreateFileFailed { .. }
            | Error::WriteFileFailed { .. }
            | Error::RemoveFileFailed { .. } => ErrorKind::Transport,
            Error::InvalidState(_) => ErrorKind::Internal,
            #[cfg(feature = "json")]
            Error::DecodeJson(_) => ErrorKind::Syntax,
        }
    }

    /// The HTTP status a server should answer with when the request failed
    /// with this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NoContentType | Error::NoMultipart | Error::DecodeContentType(_) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Error::FieldCountExceeded { .. } | Error::FieldsSizeExceeded { .. } | Error::FilesSizeExceeded { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Error::CreateFileFailed { .. }
            | Error::WriteFileFailed { .. }
            | Error::RemoveFileFailed { .. }
            | Error::InvalidState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::DecodeContentType(cause)
            | Error::StreamReadFailed(cause)
            | Error::DecodeHeaderName { cause, .. }
            | Error::CreateFileFailed { cause, .. }
            | Error::WriteFileFailed { cause, .. }
            | Error::RemoveFileFailed { cause, .. } => Some(&**cause),
            Error::DecodeBase64(err) => Some(err),
            #[cfg(feature = "json")]
            Error::DecodeJson(err) => Some(&**err),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}
