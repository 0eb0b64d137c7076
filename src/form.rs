use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use encoding_rs::Encoding;
use futures_util::stream::{Stream, StreamExt, TryStreamExt};
use http::header::{self, HeaderMap};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
#[cfg(feature = "tokio-io")]
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tokio-io")]
use tokio_util::io::ReaderStream;

use crate::constants::SINK_CHANNEL_CAPACITY;
use crate::field::FieldSink;
use crate::file::FileSink;
use crate::helpers;
use crate::state::{PartSender, Shared};
use crate::{Field, File, Options, Parser, Part, PartHead, Route, Segment};

/// What a [`Form`] reports about a request.
///
/// `Part`, `Field` and `File` arrive in the order the parts appear in the
/// body. A request ends with exactly one of `Close` or `Error`; only
/// `CleanupFailed` may follow an `Error`.
#[derive(Debug)]
pub enum Event {
    /// A part routed to the caller. Its body streams in while the request is
    /// being parsed.
    Part(Part),
    /// A completely received field.
    Field(Field),
    /// A completely stored file.
    File(File),
    /// A chunk of the body has been parsed.
    Progress {
        bytes_received: u64,
        bytes_expected: Option<u64>,
    },
    /// The request was aborted. Followed by [`Event::Error`].
    Aborted,
    /// The request failed. No further parts are reported.
    Error(crate::Error),
    /// An upload could not be removed after the request failed.
    CleanupFailed(crate::Error),
    /// The whole body has been parsed and every part has been handled.
    Close,
}

/// Parses `multipart/form-data` and `multipart/related` requests.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use formstream::{Event, Form, Options};
/// use futures_util::stream::iter;
/// use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
/// use std::convert::Infallible;
///
/// # async fn run() {
/// let dir = std::env::temp_dir();
/// let form = Form::new(Options::new().auto_files(true).upload_dir(&dir));
///
/// let mut headers = HeaderMap::new();
/// headers.insert(CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=X"));
///
/// let chunks: Vec<Result<Bytes, Infallible>> = vec![
///     Ok(Bytes::from("--X\r\nContent-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\r\n")),
///     Ok(Bytes::from("hello\r\n--X--\r\n")),
/// ];
///
/// let mut events = form.parse(&headers, iter(chunks));
///
/// while let Some(event) = events.next_event().await {
///     if let Event::File(file) = event {
///         assert_eq!(file.size(), 5);
///         std::fs::remove_file(file.path()).unwrap();
///     }
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Form {
    options: Options,
}

impl Form {
    pub fn new(options: Options) -> Form {
        Form { options }
    }

    /// Starts parsing `body`, described by the request `headers`.
    ///
    /// A request without a usable `Content-Type` yields a single
    /// [`Event::Error`] and the body is not read.
    ///
    /// # Panics
    ///
    /// Must be called within a tokio runtime: the body is driven by a
    /// spawned task, and uploads are written by tasks of their own.
    pub fn parse<S, O, E>(&self, headers: &HeaderMap, body: S) -> Events
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let abort = CancellationToken::new();
        let events = Events {
            rx,
            abort: AbortHandle { token: abort.clone() },
        };

        let boundary = match boundary_of(headers) {
            Ok(boundary) => boundary,
            Err(err) => {
                trace!("rejected request: {}", err);
                let _ = tx.send(Event::Error(err));
                return events;
            }
        };

        let runtime = Handle::current();
        let shared = Shared::new(
            tx,
            self.options.max_fields_size,
            self.options.max_files_size,
            runtime.clone(),
        );
        let parser = Parser::new(&boundary, &self.options).with_bytes_expected(helpers::bytes_expected(headers));

        // Held until the body has been read to its end.
        shared.begin_flush();

        let body = body.map_ok(|b| b.into()).map_err(|err| {
            let err: Box<dyn std::error::Error + Send + Sync> = err.into();
            crate::Error::StreamReadFailed(Arc::from(err))
        });

        let driver = Driver {
            shared,
            parser,
            upload_dir: self.options.upload_dir.clone(),
            encoding: self.options.encoding,
            sink: None,
        };

        runtime.spawn(driver.run(body, abort));

        events
    }

    /// Starts parsing the body read from `reader`.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    pub fn parse_reader<R>(&self, headers: &HeaderMap, reader: R) -> Events
    where
        R: AsyncRead + Send + 'static,
    {
        self.parse(headers, ReaderStream::new(reader))
    }
}

fn boundary_of(headers: &HeaderMap) -> crate::Result<String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .ok_or(crate::Error::NoContentType)?
        .to_str()
        .map_err(|err| crate::Error::DecodeContentType(Arc::new(err)))?;

    crate::parse_boundary(content_type)
}

/// The [`Event`]s of one request.
///
/// The stream ends once the request has closed or failed and no task of it
/// is left running, so an upload removed after a failure is gone by then.
#[derive(Debug)]
pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
    abort: AbortHandle,
}

impl Events {
    /// Yields the next [`Event`], or `None` once the request is over.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// A handle the transport can use to abort the request.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl Stream for Events {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Signals that the request was aborted by the transport.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Stops reading the body, reports [`Event::Aborted`] and fails the
    /// request with [`Error::Aborted`](crate::Error::Aborted), unless it is
    /// already over.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

enum Sink {
    Field(FieldSink),
    File(FileSink),
    Part(PartSender),
}

/// Pulls the body, feeds the parser and hands each segment to the sink of
/// the current part.
struct Driver {
    shared: Shared,
    parser: Parser,
    upload_dir: PathBuf,
    encoding: &'static Encoding,
    sink: Option<Sink>,
}

impl Driver {
    async fn run<S>(mut self, body: S, abort: CancellationToken)
    where
        S: Stream<Item = crate::Result<Bytes>> + Send,
    {
        let done = self.shared.done();
        futures_util::pin_mut!(body);

        tokio::select! {
            biased;
            _ = abort.cancelled() => self.abort(),
            _ = self.pump(body.as_mut()) => {}
        }

        // Parts handed out and uploads in flight still report to the
        // request; keep it alive until it is over.
        tokio::select! {
            biased;
            _ = done.cancelled() => {}
            _ = abort.cancelled() => self.abort(),
        }
    }

    fn abort(&self) {
        if self.shared.has_error() {
            return;
        }

        trace!("request aborted");
        self.shared.emit(Event::Aborted);
        self.shared.handle_error(crate::Error::Aborted);
    }

    async fn pump<S>(&mut self, mut body: Pin<&mut S>)
    where
        S: Stream<Item = crate::Result<Bytes>>,
    {
        let mut segments = Vec::new();

        while let Some(chunk) = body.next().await {
            if self.shared.has_error() {
                return;
            }

            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.shared.handle_error(err);
                    return;
                }
            };

            let fed = self.parser.feed(chunk, &mut segments);

            for segment in segments.drain(..) {
                if let Err(err) = self.apply(segment).await {
                    self.shared.handle_error(err);
                    return;
                }

                if self.shared.has_error() {
                    return;
                }
            }

            if let Err(err) = fed {
                self.shared.handle_error(err);
                return;
            }

            self.shared.emit(Event::Progress {
                bytes_received: self.parser.bytes_received(),
                bytes_expected: self.parser.bytes_expected(),
            });
        }

        if self.shared.has_error() {
            return;
        }

        match self.parser.finish() {
            Ok(()) => self.shared.end_flush(),
            Err(err) => self.shared.handle_error(err),
        }
    }

    async fn apply(&mut self, segment: Segment) -> crate::Result<()> {
        match segment {
            Segment::Begin(head) => self.begin(head),
            Segment::Data(data) => match &mut self.sink {
                Some(Sink::Field(field)) => field.push(&self.shared, &data)?,
                Some(Sink::File(file)) => file.push(data).await,
                Some(Sink::Part(tx)) => {
                    // A part dropped by the caller discards the rest of its body.
                    let _ = tx.send(Ok(data)).await;
                }
                None => return Err(crate::Error::InvalidState("part data outside of a part")),
            },
            Segment::End => {
                let sink = self
                    .sink
                    .take()
                    .ok_or(crate::Error::InvalidState("end of a part that never began"))?;

                self.shared.end_part();

                match sink {
                    Sink::Field(field) => field.finish(&self.shared),
                    Sink::File(file) => file.finish(),
                    Sink::Part(tx) => drop(tx),
                }
            }
        }

        Ok(())
    }

    fn begin(&mut self, head: PartHead) {
        let sink = match head.route() {
            Route::Field => {
                let slot = self.shared.begin_part(None);
                Sink::Field(FieldSink::new(slot, head.name, self.encoding))
            }
            Route::File => {
                let slot = self.shared.begin_part(None);
                Sink::File(FileSink::spawn(&self.shared, slot, &head, &self.upload_dir))
            }
            Route::Part => {
                let (tx, rx) = mpsc::channel(SINK_CHANNEL_CAPACITY);
                let slot = self.shared.begin_part(Some(tx.clone()));
                let part = Part::new(head, rx, self.shared.downgrade());
                self.shared.resolve(slot, Event::Part(part));
                Sink::Part(tx)
            }
        };

        self.sink = Some(sink);
    }
}
