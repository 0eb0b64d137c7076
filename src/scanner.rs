use bytes::Bytes;

use crate::constants::{BOUNDARY_PREFIX, COLON, CR, HYPHEN, LF, SPACE};

/// Receives what the [`Scanner`] finds in the body, in byte order.
///
/// Header names, header values and part data may be delivered in several
/// pieces when they straddle a chunk boundary.
pub(crate) trait Handler {
    fn on_part_begin(&mut self);

    fn on_header_field(&mut self, data: &[u8]);

    fn on_header_value(&mut self, data: &[u8]);

    /// A complete `name: value` line has been delivered.
    fn on_header_end(&mut self) -> crate::Result<()>;

    /// The blank line after the headers. `offset` is the position of the first
    /// body byte within the current chunk.
    fn on_headers_end(&mut self, offset: usize) -> crate::Result<()>;

    fn on_part_data(&mut self, data: Bytes) -> crate::Result<()>;

    fn on_part_end(&mut self) -> crate::Result<()>;
}

/// `CRLF--token` plus the set of distinct bytes occurring in it.
pub(crate) struct Boundary {
    bytes: Box<[u8]>,
    members: [bool; 256],
}

impl Boundary {
    pub(crate) fn new(token: &str) -> Boundary {
        let mut bytes = Vec::with_capacity(BOUNDARY_PREFIX.len() + token.len());
        bytes.extend_from_slice(BOUNDARY_PREFIX);
        bytes.extend_from_slice(token.as_bytes());

        let mut members = [false; 256];
        for &b in &bytes {
            members[usize::from(b)] = true;
        }

        Boundary {
            bytes: bytes.into_boxed_slice(),
            members,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    fn contains(&self, b: u8) -> bool {
        self.members[usize::from(b)]
    }

    #[inline]
    fn at(&self, idx: usize) -> u8 {
        self.bytes[idx]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanState {
    Start,
    StartBoundary,
    HeaderFieldStart,
    HeaderField,
    HeaderValueStart,
    HeaderValue,
    HeaderValueAlmostDone,
    HeadersAlmostDone,
    PartDataStart,
    PartData,
    CloseBoundary,
    End,
}

/// Start offsets of spans that are still open at the current position. A span
/// still open when a chunk runs out is flushed and restarts at offset 0 of the
/// next chunk.
#[derive(Debug, Default)]
struct Marks {
    header_field: Option<usize>,
    header_value: Option<usize>,
    part_data: Option<usize>,
}

enum Step {
    /// Move on to the next byte.
    Advance,
    /// Look at the same byte again, usually in a new state.
    Stay,
}

/// Resumable byte-level state machine splitting a multipart body into parts.
pub(crate) struct Scanner {
    boundary: Boundary,
    state: ScanState,
    // In `StartBoundary` this is a position in the whole boundary, CRLF
    // included, because the first boundary of a body may come without it.
    index: usize,
    lookbehind: Box<[u8]>,
    part_boundary_seen: bool,
    marks: Marks,
}

impl Scanner {
    pub(crate) fn new(token: &str) -> Scanner {
        let boundary = Boundary::new(token);
        // A candidate may grow to the boundary plus the CR that follows it.
        let lookbehind = vec![0; boundary.len() + 1].into_boxed_slice();

        Scanner {
            boundary,
            state: ScanState::Start,
            index: 0,
            lookbehind,
            part_boundary_seen: false,
            marks: Marks::default(),
        }
    }

    pub(crate) fn state(&self) -> ScanState {
        self.state
    }

    pub(crate) fn boundary_len(&self) -> usize {
        self.boundary.len()
    }

    pub(crate) fn feed<H: Handler>(&mut self, chunk: &Bytes, handler: &mut H) -> crate::Result<()> {
        let buf = &chunk[..];
        let len = buf.len();
        let boundary_len = self.boundary.len();
        let boundary_end = boundary_len - 1;

        let mut i = 0;

        while i < len {
            let mut c = buf[i];

            let step = match self.state {
                ScanState::Start => {
                    self.index = BOUNDARY_PREFIX.len() - 2;
                    self.state = ScanState::StartBoundary;
                    Step::Stay
                }
                ScanState::StartBoundary => {
                    if self.index == boundary_len {
                        if c == HYPHEN {
                            self.index = 1;
                            self.state = ScanState::CloseBoundary;
                        } else if c == CR {
                            self.index += 1;
                        } else {
                            return Err(unexpected("CR", c));
                        }
                    } else if self.index == boundary_len + 1 {
                        if c != LF {
                            return Err(unexpected("LF", c));
                        }
                        self.index = 0;
                        handler.on_part_begin();
                        self.state = ScanState::HeaderFieldStart;
                    } else if c == self.boundary.at(self.index) {
                        self.index += 1;
                    } else if c == self.boundary.at(0) {
                        self.index = 1;
                    } else {
                        self.index = 0;
                    }
                    Step::Advance
                }
                ScanState::HeaderFieldStart => {
                    self.state = ScanState::HeaderField;
                    self.marks.header_field = Some(i);
                    self.index = 0;
                    Step::Stay
                }
                ScanState::HeaderField => {
                    if c == CR {
                        self.marks.header_field = None;
                        self.state = ScanState::HeadersAlmostDone;
                    } else {
                        self.index += 1;

                        if c == COLON {
                            if self.index == 1 {
                                return Err(crate::Error::EmptyHeaderField);
                            }
                            if let Some(mark) = self.marks.header_field.take() {
                                handler.on_header_field(&buf[mark..i]);
                            }
                            self.state = ScanState::HeaderValueStart;
                        } else if c != HYPHEN && !(c | 0x20).is_ascii_lowercase() {
                            return Err(unexpected("alphabetic character", c));
                        }
                    }
                    Step::Advance
                }
                ScanState::HeaderValueStart => {
                    if c == SPACE {
                        Step::Advance
                    } else {
                        self.marks.header_value = Some(i);
                        self.state = ScanState::HeaderValue;
                        Step::Stay
                    }
                }
                ScanState::HeaderValue => {
                    if c == CR {
                        if let Some(mark) = self.marks.header_value.take() {
                            handler.on_header_value(&buf[mark..i]);
                        }
                        handler.on_header_end()?;
                        self.state = ScanState::HeaderValueAlmostDone;
                    }
                    Step::Advance
                }
                ScanState::HeaderValueAlmostDone => {
                    if c != LF {
                        return Err(unexpected("LF", c));
                    }
                    self.state = ScanState::HeaderFieldStart;
                    Step::Advance
                }
                ScanState::HeadersAlmostDone => {
                    if c != LF {
                        return Err(unexpected("LF", c));
                    }
                    handler.on_headers_end(i + 1)?;
                    self.state = ScanState::PartDataStart;
                    Step::Advance
                }
                ScanState::PartDataStart => {
                    self.state = ScanState::PartData;
                    self.marks.part_data = Some(i);
                    Step::Stay
                }
                ScanState::PartData => {
                    let prev_index = self.index;

                    if self.index == 0 {
                        // Skip ahead while the byte a whole boundary away
                        // cannot be part of one.
                        i += boundary_end;
                        while i < len && !self.boundary.contains(buf[i]) {
                            i += boundary_len;
                        }
                        i -= boundary_end;
                        if i >= len {
                            break;
                        }
                        c = buf[i];
                    }

                    if self.index < boundary_len {
                        if c == self.boundary.at(self.index) {
                            if self.index == 0 {
                                if let Some(mark) = self.marks.part_data.take() {
                                    handler.on_part_data(chunk.slice(mark..i))?;
                                }
                            }
                            self.index += 1;
                        } else {
                            self.index = 0;
                        }
                    } else if self.index == boundary_len {
                        self.index += 1;
                        if c == CR {
                            self.part_boundary_seen = true;
                        } else if c == HYPHEN {
                            self.index = 1;
                            self.state = ScanState::CloseBoundary;
                            i += 1;
                            continue;
                        } else {
                            self.index = 0;
                        }
                    } else if self.index - 1 == boundary_len {
                        self.index = 0;
                        if self.part_boundary_seen && c == LF {
                            self.part_boundary_seen = false;
                            handler.on_part_end()?;
                            handler.on_part_begin();
                            self.state = ScanState::HeaderFieldStart;
                            i += 1;
                            continue;
                        }
                    }

                    if self.index > 0 {
                        self.lookbehind[self.index - 1] = c;
                        Step::Advance
                    } else if prev_index > 0 {
                        // False lead: the candidate was part data after all.
                        // The byte that broke it may start a new candidate.
                        handler.on_part_data(Bytes::copy_from_slice(&self.lookbehind[..prev_index]))?;
                        self.marks.part_data = Some(i);
                        Step::Stay
                    } else {
                        Step::Advance
                    }
                }
                ScanState::CloseBoundary => {
                    if c != HYPHEN {
                        return Err(unexpected("HYPHEN", c));
                    }
                    if self.index != 1 {
                        return Err(crate::Error::InvalidState("close boundary overrun"));
                    }
                    handler.on_part_end()?;
                    self.state = ScanState::End;
                    self.index += 1;
                    Step::Advance
                }
                ScanState::End => break,
            };

            if let Step::Advance = step {
                i += 1;
            }
        }

        if let Some(mark) = self.marks.header_field {
            handler.on_header_field(&buf[mark..]);
            self.marks.header_field = Some(0);
        }
        if let Some(mark) = self.marks.header_value {
            handler.on_header_value(&buf[mark..]);
            self.marks.header_value = Some(0);
        }
        if let Some(mark) = self.marks.part_data {
            handler.on_part_data(chunk.slice(mark..))?;
            self.marks.part_data = Some(0);
        }

        Ok(())
    }
}

fn unexpected(expected: &'static str, found: u8) -> crate::Error {
    crate::Error::UnexpectedByte { expected, found }
}
