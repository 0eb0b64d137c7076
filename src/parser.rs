use bytes::Bytes;
use http::header::{self, HeaderMap};

use crate::constants::LAST_BOUNDARY_SUFFIX_LEN;
use crate::decoder::Base64Decoder;
use crate::headers::HeaderAccumulator;
use crate::scanner::{Handler, ScanState, Scanner};
use crate::Options;

/// Where the body of a part goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Accumulated into a [`Field`](crate::Field).
    Field,
    /// Stored on disk and reported as a [`File`](crate::File).
    File,
    /// Handed to the caller as a raw [`Part`](crate::Part).
    Part,
}

/// The transfer encoding of a part body after normalisation. `7bit` and
/// `8bit` are treated as `binary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    Binary,
    Base64,
}

impl TransferEncoding {
    fn parse(value: &str) -> crate::Result<TransferEncoding> {
        match value {
            "binary" | "7bit" | "8bit" => Ok(TransferEncoding::Binary),
            "base64" => Ok(TransferEncoding::Base64),
            other => Err(crate::Error::UnknownTransferEncoding(other.to_owned())),
        }
    }
}

/// Everything known about a part once its header block has been read.
#[derive(Debug, Clone)]
pub struct PartHead {
    pub(crate) index: usize,
    pub(crate) name: Option<String>,
    pub(crate) file_name: Option<String>,
    pub(crate) content_type: Option<mime::Mime>,
    pub(crate) headers: HeaderMap,
    pub(crate) transfer_encoding: TransferEncoding,
    pub(crate) byte_offset: u64,
    pub(crate) byte_count: Option<u64>,
    pub(crate) route: Route,
}

impl PartHead {
    /// The zero-based position of the part in the body.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The `name` parameter of the `Content-Disposition` header.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The file name given by the client, stripped of any directory.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&mime::Mime> {
        self.content_type.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.transfer_encoding
    }

    /// The position of the first body byte in the request body.
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// The advisory body length: the part's own `Content-Length`, or an
    /// estimate from the request length. It is never checked.
    pub fn byte_count(&self) -> Option<u64> {
        self.byte_count
    }

    pub fn route(&self) -> Route {
        self.route
    }
}

/// What the [`Parser`] found in a chunk, in body order.
#[derive(Debug)]
pub enum Segment {
    /// A part's header block is complete.
    Begin(PartHead),
    /// Body bytes of the current part, already transfer-decoded.
    Data(Bytes),
    /// The current part is complete.
    End,
}

struct Session {
    headers: HeaderAccumulator,
    auto_fields: bool,
    auto_files: bool,
    max_fields: usize,
    field_count: usize,
    bytes_received: u64,
    bytes_expected: Option<u64>,
    boundary_len: usize,
    base64: Option<Base64Decoder>,
    part_open: bool,
}

struct Collector<'a> {
    session: &'a mut Session,
    out: &'a mut Vec<Segment>,
}

impl Collector<'_> {
    fn estimate_byte_count(&self, headers: &HeaderMap, byte_offset: u64) -> Option<u64> {
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.trim().parse::<u64>().ok());

        if declared.is_some() {
            return declared;
        }

        match self.session.bytes_expected {
            Some(expected) if expected > 0 => expected
                .checked_sub(byte_offset)?
                .checked_sub(self.session.boundary_len as u64 + LAST_BOUNDARY_SUFFIX_LEN),
            _ => None,
        }
    }

    fn route(&self, file_name: Option<&str>) -> Route {
        match file_name {
            None if self.session.auto_fields => Route::Field,
            Some(_) if self.session.auto_files => Route::File,
            _ => Route::Part,
        }
    }
}

impl Handler for Collector<'_> {
    fn on_part_begin(&mut self) {
        self.session.headers.reset();
    }

    fn on_header_field(&mut self, data: &[u8]) {
        self.session.headers.push_field(data);
    }

    fn on_header_value(&mut self, data: &[u8]) {
        self.session.headers.push_value(data);
    }

    fn on_header_end(&mut self) -> crate::Result<()> {
        self.session.headers.finish_header()
    }

    fn on_headers_end(&mut self, offset: usize) -> crate::Result<()> {
        let transfer_encoding = TransferEncoding::parse(self.session.headers.transfer_encoding())?;

        self.session.field_count += 1;
        if self.session.field_count > self.session.max_fields {
            return Err(crate::Error::FieldCountExceeded {
                limit: self.session.max_fields,
            });
        }

        let (headers, name, file_name) = self.session.headers.take();
        let byte_offset = self.session.bytes_received + offset as u64;
        let byte_count = self.estimate_byte_count(&headers, byte_offset);
        let route = self.route(file_name.as_deref());
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<mime::Mime>().ok());

        trace!("part {} ({:?}) routed to {:?}", self.session.field_count - 1, name, route);

        self.session.base64 = match transfer_encoding {
            TransferEncoding::Base64 => Some(Base64Decoder::new()),
            TransferEncoding::Binary => None,
        };
        self.session.part_open = true;

        self.out.push(Segment::Begin(PartHead {
            index: self.session.field_count - 1,
            name,
            file_name,
            content_type,
            headers,
            transfer_encoding,
            byte_offset,
            byte_count,
            route,
        }));
        Ok(())
    }

    fn on_part_data(&mut self, data: Bytes) -> crate::Result<()> {
        let data = match self.session.base64.as_mut() {
            Some(decoder) => decoder.decode(&data)?,
            None => data,
        };

        if !data.is_empty() {
            self.out.push(Segment::Data(data));
        }
        Ok(())
    }

    fn on_part_end(&mut self) -> crate::Result<()> {
        if let Some(mut decoder) = self.session.base64.take() {
            let rest = decoder.finish()?;
            if !rest.is_empty() {
                self.out.push(Segment::Data(rest));
            }
        }

        if std::mem::replace(&mut self.session.part_open, false) {
            self.out.push(Segment::End);
        }
        self.session.headers.reset();
        Ok(())
    }
}

/// Splits a multipart body, fed chunk by chunk, into [`Segment`]s.
///
/// The parser never blocks and never buffers more than one boundary's worth of
/// bytes. It knows nothing about files or tasks: [`Form`](crate::Form) drives
/// it, but it can be used on its own.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use formstream::{Options, Parser, Segment};
///
/// let mut parser = Parser::new("X", &Options::new());
/// let mut segments = Vec::new();
///
/// parser.feed(Bytes::from_static(b"--X\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n"), &mut segments)?;
/// parser.feed(Bytes::from_static(b"1\r\n--X--\r\n"), &mut segments)?;
/// parser.finish()?;
///
/// assert!(matches!(&segments[0], Segment::Begin(head) if head.name() == Some("a")));
/// assert!(matches!(&segments[1], Segment::Data(data) if data == "1"));
/// assert!(matches!(segments[2], Segment::End));
/// # Ok::<(), formstream::Error>(())
/// ```
pub struct Parser {
    scanner: Scanner,
    session: Session,
    error: Option<crate::Error>,
}

impl Parser {
    pub fn new<B: AsRef<str>>(boundary: B, options: &Options) -> Parser {
        let scanner = Scanner::new(boundary.as_ref());
        let boundary_len = scanner.boundary_len();

        Parser {
            scanner,
            session: Session {
                headers: HeaderAccumulator::new(options.encoding),
                auto_fields: options.auto_fields,
                auto_files: options.auto_files,
                max_fields: options.max_fields,
                field_count: 0,
                bytes_received: 0,
                bytes_expected: None,
                boundary_len,
                base64: None,
                part_open: false,
            },
            error: None,
        }
    }

    /// Sets the expected length of the whole body, used for the advisory
    /// [`PartHead::byte_count`].
    pub fn with_bytes_expected(mut self, bytes_expected: Option<u64>) -> Parser {
        self.session.bytes_expected = bytes_expected;
        self
    }

    /// Parses the next chunk of the body, appending what it finds to `out`.
    ///
    /// On error the segments found before the offending byte are still in
    /// `out`. The parser then refuses any further input with the same error.
    pub fn feed(&mut self, chunk: Bytes, out: &mut Vec<Segment>) -> crate::Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let mut collector = Collector {
            session: &mut self.session,
            out,
        };

        match self.scanner.feed(&chunk, &mut collector) {
            Ok(()) => {
                self.session.bytes_received += chunk.len() as u64;
                Ok(())
            }
            Err(err) => {
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Checks that the closing boundary has been seen.
    pub fn finish(&mut self) -> crate::Result<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        if self.is_finished() {
            Ok(())
        } else {
            self.error = Some(crate::Error::IncompleteStream);
            Err(crate::Error::IncompleteStream)
        }
    }

    /// Whether the closing boundary has been seen.
    pub fn is_finished(&self) -> bool {
        self.scanner.state() == ScanState::End
    }

    pub fn bytes_received(&self) -> u64 {
        self.session.bytes_received
    }

    pub fn bytes_expected(&self) -> Option<u64> {
        self.session.bytes_expected
    }

    /// The number of parts whose headers have been read.
    pub fn part_count(&self) -> usize {
        self.session.field_count
    }
}
