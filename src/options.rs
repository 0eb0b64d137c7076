use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8};

use crate::constants;

/// Configures how a [`Form`](crate::Form) handles the parts of a request and
/// which limits it enforces.
///
/// # Examples
///
/// ```
/// use formstream::Options;
///
/// let options = Options::new()
///     .auto_fields(true)
///     .auto_files(true)
///     .max_fields(20)
///     .max_files_size(10 * 1024 * 1024)
///     .upload_dir("/var/tmp/uploads");
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) auto_fields: bool,
    pub(crate) auto_files: bool,
    pub(crate) max_fields: usize,
    pub(crate) max_fields_size: u64,
    pub(crate) max_files_size: u64,
    pub(crate) upload_dir: PathBuf,
    pub(crate) encoding: &'static Encoding,
}

impl Options {
    /// Creates the default options: no automatic handling, at most 1000
    /// parts, 2 MiB of field data, unbounded file data stored in the
    /// system's temporary directory, UTF-8 text.
    pub fn new() -> Options {
        Options::default()
    }

    /// Accumulates parts without a filename into [`Field`](crate::Field)s
    /// instead of handing them out as raw [`Part`](crate::Part)s.
    pub fn auto_fields(mut self, enabled: bool) -> Options {
        self.auto_fields = enabled;
        self
    }

    /// Stores parts with a filename under [`upload_dir`](Options::upload_dir)
    /// and reports them as [`File`](crate::File)s instead of handing them out
    /// as raw [`Part`](crate::Part)s.
    pub fn auto_files(mut self, enabled: bool) -> Options {
        self.auto_files = enabled;
        self
    }

    /// Sets the maximum number of parts in a request.
    pub fn max_fields(mut self, limit: usize) -> Options {
        self.max_fields = limit;
        self
    }

    /// Sets the maximum number of bytes all automatically handled fields of a
    /// request may hold together.
    pub fn max_fields_size(mut self, limit: u64) -> Options {
        self.max_fields_size = limit;
        self
    }

    /// Sets the maximum number of bytes all automatically stored files of a
    /// request may hold together.
    pub fn max_files_size(mut self, limit: u64) -> Options {
        self.max_files_size = limit;
        self
    }

    /// Sets the directory uploaded files are written to.
    pub fn upload_dir<P: AsRef<Path>>(mut self, dir: P) -> Options {
        self.upload_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the charset used to decode part headers and field values.
    ///
    /// Unknown labels fall back to UTF-8.
    pub fn encoding<L: AsRef<str>>(mut self, label: L) -> Options {
        self.encoding = Encoding::for_label(label.as_ref().as_bytes()).unwrap_or(UTF_8);
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            auto_fields: false,
            auto_files: false,
            max_fields: constants::DEFAULT_MAX_FIELDS,
            max_fields_size: constants::DEFAULT_MAX_FIELDS_SIZE,
            max_files_size: constants::DEFAULT_MAX_FILES_SIZE,
            upload_dir: std::env::temp_dir(),
            encoding: UTF_8,
        }
    }
}
