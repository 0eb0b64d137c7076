#[cfg(feature = "json")]
use std::sync::Arc;

use encoding_rs::Encoding;
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;

use crate::decoder::TextDecoder;
use crate::queue::SlotId;
use crate::state::Shared;
use crate::Event;

/// A part without a file name, collected as text.
///
/// Reported as [`Event::Field`](crate::Event::Field) when
/// [`Options::auto_fields`](crate::Options::auto_fields) is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: Option<String>,
    value: String,
}

impl Field {
    /// The `name` parameter of the part's `Content-Disposition` header.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn into_value(self) -> String {
        self.value
    }

    /// Deserializes the value as JSON.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_str(&self.value).map_err(|err| crate::Error::DecodeJson(Arc::new(err)))
    }
}

/// Collects the body of a field part while the driver feeds it.
pub(crate) struct FieldSink {
    slot: SlotId,
    name: Option<String>,
    value: String,
    decoder: TextDecoder,
}

impl FieldSink {
    pub(crate) fn new(slot: SlotId, name: Option<String>, encoding: &'static Encoding) -> FieldSink {
        FieldSink {
            slot,
            name,
            value: String::new(),
            decoder: TextDecoder::new(encoding),
        }
    }

    /// Appends body bytes once the request's field budget allows them.
    pub(crate) fn push(&mut self, shared: &Shared, data: &[u8]) -> crate::Result<()> {
        shared.reserve_field_bytes(data.len() as u64)?;
        self.decoder.decode(data, &mut self.value);
        Ok(())
    }

    pub(crate) fn finish(mut self, shared: &Shared) {
        self.decoder.finish(&mut self.value);

        let field = Field {
            name: self.name,
            value: self.value,
        };

        shared.resolve(self.slot, Event::Field(field));
        shared.end_flush();
    }
}
