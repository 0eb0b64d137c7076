use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::header::{self, HeaderMap};

use crate::constants;

/// The length of the request body as announced by its headers. A body without
/// `Content-Length` and without `Transfer-Encoding` is empty.
pub(crate) fn bytes_expected(headers: &HeaderMap) -> Option<u64> {
    match headers.get(header::CONTENT_LENGTH) {
        Some(val) => val.to_str().ok().and_then(|val| val.trim().parse::<u64>().ok()),
        None if headers.contains_key(header::TRANSFER_ENCODING) => None,
        None => Some(0),
    }
}

/// A fresh path under `dir` keeping a sanitised extension of `file_name`.
pub(crate) fn upload_path(dir: &Path, file_name: &str) -> PathBuf {
    let mut name = unique_name();
    name.push_str(&extension(file_name));
    dir.join(name)
}

fn unique_name() -> String {
    let bytes: [u8; constants::UNIQUE_NAME_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `.` followed by at most 16 leading `[A-Za-z0-9_-]` characters of the
/// extension, or nothing.
fn extension(file_name: &str) -> String {
    let base = match memchr::memrchr2(b'/', b'\\', file_name.as_bytes()) {
        Some(idx) => &file_name[idx + 1..],
        None => file_name,
    };

    let dot = match memchr::memrchr(b'.', base.as_bytes()) {
        Some(0) | None => return String::new(),
        Some(idx) => idx,
    };

    let mut ext = String::from(".");
    ext.extend(
        base[dot + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(constants::MAX_EXTENSION_LEN),
    );
    ext
}
