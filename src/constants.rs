use lazy_static::lazy_static;
use regex::Regex;

pub(crate) const DEFAULT_MAX_FIELDS: usize = 1000;
pub(crate) const DEFAULT_MAX_FIELDS_SIZE: u64 = 2 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_FILES_SIZE: u64 = u64::MAX;

pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';
pub(crate) const SPACE: u8 = b' ';
pub(crate) const HYPHEN: u8 = b'-';
pub(crate) const COLON: u8 = b':';

/// Every boundary inside the body is preceded by this.
pub(crate) const BOUNDARY_PREFIX: &[u8] = b"\r\n--";
/// `--\r\n` after the terminal boundary.
pub(crate) const LAST_BOUNDARY_SUFFIX_LEN: u64 = 4;

pub(crate) const UNIQUE_NAME_BYTES: usize = 18;
pub(crate) const MAX_EXTENSION_LEN: usize = 16;

/// Chunks buffered towards a file or part sink before the driver stops reading upstream.
pub(crate) const SINK_CHANNEL_CAPACITY: usize = 16;

lazy_static! {
    pub(crate) static ref CONTENT_DISPOSITION_FIELD_NAME_RE: Regex = Regex::new(r#"(?i)\bname="([^"]+)""#).unwrap();
    pub(crate) static ref CONTENT_DISPOSITION_FILE_NAME_RE: Regex =
        Regex::new(r#"(?i)\bfilename="(.*?)"($|; )"#).unwrap();
    pub(crate) static ref CONTENT_DISPOSITION_FILE_NAME_EXT_RE: Regex =
        Regex::new(r"(?i)\bfilename\*=utf-8''(.*?)($|; )").unwrap();
    pub(crate) static ref ESCAPED_QUOTE_RE: Regex = Regex::new(r#"%22|\\""#).unwrap();
    pub(crate) static ref NUMERIC_CHAR_REF_RE: Regex = Regex::new(r"&#([0-9]{4});").unwrap();
}
