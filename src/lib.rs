//! An incremental `multipart/form-data` parser for tokio.
//!
//! A [`Form`] consumes a request body chunk by chunk and reports what it finds
//! as a stream of [`Event`]s. Parts without a file name can be collected into
//! [`Field`]s, parts with one can be stored under an upload directory and
//! reported as [`File`]s, and everything else is handed out as a raw [`Part`]
//! stream. Completion events always arrive in the order the parts appear in
//! the body, no matter when their files finish writing.
//!
//! The body is never buffered as a whole: at most one boundary's worth of
//! bytes is held back, and the driver stops pulling the body while a part's
//! consumer is behind.
//!
//! # Examples
//!
//! ```
//! use bytes::Bytes;
//! use formstream::{Event, Form, Options};
//! use futures_util::stream::once;
//! use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
//! use std::convert::Infallible;
//!
//! # async fn run() {
//! let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
//! let body = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
//!
//! let mut headers = HeaderMap::new();
//! headers.insert(CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=X-BOUNDARY"));
//!
//! let mut events = Form::new(Options::new().auto_fields(true)).parse(&headers, body);
//!
//! while let Some(event) = events.next_event().await {
//!     match event {
//!         Event::Field(field) => println!("{:?} = {}", field.name(), field.value()),
//!         Event::Error(err) => eprintln!("{}", err),
//!         Event::Close => println!("done"),
//!         _ => {}
//!     }
//! }
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```
//!
//! ## Optional features
//!
//! - `json`: Adds [`Field::json`] and [`Part::json`] to deserialize bodies.
//! - `tokio-io`: Adds [`Form::parse_reader`] to parse any
//!   [`AsyncRead`](tokio::io::AsyncRead).
//! - `log`: Traces routing, uploads and cleanup through the `log` crate.

#[cfg(feature = "log")]
macro_rules! trace {
    ($($t:tt)*) => (::log::trace!($($t)*));
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($t:tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}

#[cfg(feature = "log")]
macro_rules! warn {
    ($($t:tt)*) => (::log::warn!($($t)*));
}

#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($t:tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}

pub use bytes;
pub use error::{Error, ErrorKind};
pub use field::Field;
pub use file::File;
pub use form::{AbortHandle, Event, Events, Form};
pub use options::Options;
pub use parser::{PartHead, Parser, Route, Segment, TransferEncoding};
pub use part::Part;

mod constants;
mod content_disposition;
mod decoder;
mod error;
mod field;
mod file;
mod form;
mod headers;
mod helpers;
mod options;
mod parser;
mod part;
mod queue;
mod scanner;
mod state;

/// A Result type often returned from methods that can have `formstream`
/// errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parses the `Content-Type` header to extract the boundary value.
///
/// Both `multipart/form-data` and `multipart/related` are accepted.
///
/// # Examples
///
/// ```
/// # fn run(){
/// let content_type = "multipart/form-data; boundary=ABCDEFG";
///
/// assert_eq!(formstream::parse_boundary(content_type), Ok("ABCDEFG".to_owned()));
/// # }
/// # run();
/// ```
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(|err| Error::DecodeContentType(std::sync::Arc::new(err)))?;

    if !(m.type_() == mime::MULTIPART
        && (m.subtype() == mime::FORM_DATA || m.subtype().as_str().eq_ignore_ascii_case("related")))
    {
        return Err(Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .filter(|name| !name.is_empty())
        .ok_or(Error::NoBoundary)
}
