use std::fmt::{self, Debug, Formatter};
use std::pin::Pin;
#[cfg(feature = "json")]
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{Stream, TryStreamExt};
use http::header::HeaderMap;
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::state::WeakShared;
use crate::PartHead;

/// A part handed to the caller as it arrives, through
/// [`Event::Part`](crate::Event::Part).
///
/// The body is read via its [`Stream`] implementation or the methods defined
/// in this type. The driver does not read further into the request while the
/// part's buffer is full, so a part should be consumed or dropped promptly.
/// The request does not close before every part has been read to the end or
/// dropped.
///
/// If the request fails while the part is still receiving data, the stream
/// yields the request's error as its last item.
pub struct Part {
    head: PartHead,
    rx: mpsc::Receiver<crate::Result<Bytes>>,
    shared: WeakShared,
    done: bool,
}

impl Part {
    pub(crate) fn new(head: PartHead, rx: mpsc::Receiver<crate::Result<Bytes>>, shared: WeakShared) -> Part {
        Part {
            head,
            rx,
            shared,
            done: false,
        }
    }

    /// The `name` parameter of the part's `Content-Disposition` header.
    pub fn name(&self) -> Option<&str> {
        self.head.name()
    }

    /// The file name sent by the client, without any directory.
    pub fn file_name(&self) -> Option<&str> {
        self.head.file_name()
    }

    /// The parsed `Content-Type` header of the part.
    pub fn content_type(&self) -> Option<&mime::Mime> {
        self.head.content_type()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    /// The zero-based position of the part in the request.
    pub fn index(&self) -> usize {
        self.head.index()
    }

    /// The position of the part's first body byte in the request body.
    pub fn byte_offset(&self) -> u64 {
        self.head.byte_offset()
    }

    /// The advisory body length, see [`PartHead::byte_count`].
    pub fn byte_count(&self) -> Option<u64> {
        self.head.byte_count()
    }

    pub fn head(&self) -> &PartHead {
        &self.head
    }

    /// Get the full data of the part as [`Bytes`].
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();

        while let Some(bytes) = self.chunk().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }

    /// Stream a chunk of the part data.
    ///
    /// When the part data has been exhausted, this will return [`None`].
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }

    /// Try to deserialize the part data as JSON.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    pub async fn json<T: DeserializeOwned>(self) -> crate::Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| crate::Error::DecodeJson(Arc::new(err)))
    }

    /// Get the full part data as text.
    ///
    /// The charset comes from the part's `Content-Type` header and defaults to
    /// `utf-8`. Invalid sequences are replaced with U+FFFD.
    pub async fn text(self) -> crate::Result<String> {
        self.text_with_charset("utf-8").await
    }

    /// Get the full part data as text given a specific charset, used when the
    /// part's `Content-Type` names none.
    pub async fn text_with_charset(self, default_encoding: &str) -> crate::Result<String> {
        let encoding_name = self
            .content_type()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str().to_owned())
            .unwrap_or_else(|| default_encoding.to_owned());

        let encoding = Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8);

        let bytes = self.bytes().await?;
        let (text, _, _) = encoding.decode(&bytes);

        Ok(text.into_owned())
    }

    fn release(&mut self) {
        if !self.done {
            self.done = true;
            self.shared.end_flush();
        }
    }
}

impl Stream for Part {
    type Item = crate::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(Err(err))) => {
                self.release();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.release();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Part {
    fn drop(&mut self) {
        self.release();
    }
}

impl Debug for Part {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("index", &self.head.index)
            .field("name", &self.head.name)
            .field("file_name", &self.head.file_name)
            .field("headers", &self.head.headers)
            .field("done", &self.done)
            .finish()
    }
}
