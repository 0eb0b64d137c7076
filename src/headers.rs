use std::sync::Arc;

use encoding_rs::Encoding;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::content_disposition::ContentDisposition;
use crate::decoder::TextDecoder;

const DEFAULT_TRANSFER_ENCODING: &str = "binary";

/// Collects the header lines of one part. Names and values may arrive in
/// several pieces and are decoded with the request's charset.
pub(crate) struct HeaderAccumulator {
    encoding: &'static Encoding,
    headers: HeaderMap,
    name: Option<String>,
    file_name: Option<String>,
    transfer_encoding: String,
    field: String,
    value: String,
    field_decoder: TextDecoder,
    value_decoder: TextDecoder,
}

impl HeaderAccumulator {
    pub(crate) fn new(encoding: &'static Encoding) -> HeaderAccumulator {
        HeaderAccumulator {
            encoding,
            headers: HeaderMap::new(),
            name: None,
            file_name: None,
            transfer_encoding: DEFAULT_TRANSFER_ENCODING.to_owned(),
            field: String::new(),
            value: String::new(),
            field_decoder: TextDecoder::new(encoding),
            value_decoder: TextDecoder::new(encoding),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = HeaderAccumulator::new(self.encoding);
    }

    pub(crate) fn push_field(&mut self, data: &[u8]) {
        self.field_decoder.decode(data, &mut self.field);
    }

    pub(crate) fn push_value(&mut self, data: &[u8]) {
        self.value_decoder.decode(data, &mut self.value);
    }

    /// Stores the header line collected so far and prepares for the next one.
    pub(crate) fn finish_header(&mut self) -> crate::Result<()> {
        self.field_decoder.finish(&mut self.field);
        self.value_decoder.finish(&mut self.value);
        self.field_decoder = TextDecoder::new(self.encoding);
        self.value_decoder = TextDecoder::new(self.encoding);

        let field = std::mem::take(&mut self.field).to_ascii_lowercase();
        let value = std::mem::take(&mut self.value);

        let name = HeaderName::from_bytes(field.as_bytes()).map_err(|err| crate::Error::DecodeHeaderName {
            name: field.clone(),
            cause: Arc::new(err),
        })?;
        let header_value = storable_value(&value);

        if name == header::CONTENT_DISPOSITION {
            let disposition = ContentDisposition::parse(&value);
            if disposition.field_name.is_some() {
                self.name = disposition.field_name;
            }
            self.file_name = disposition.file_name;
        } else if name.as_str() == "content-transfer-encoding" {
            self.transfer_encoding = value.to_ascii_lowercase();
        }

        self.headers.insert(name, header_value);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub(crate) fn transfer_encoding(&self) -> &str {
        &self.transfer_encoding
    }

    /// Hands out the collected headers and leaves the accumulator empty.
    pub(crate) fn take(&mut self) -> (HeaderMap, Option<String>, Option<String>) {
        let headers = std::mem::take(&mut self.headers);
        let name = self.name.take();
        let file_name = self.file_name.take();
        self.reset();
        (headers, name, file_name)
    }
}

/// Header values may carry any byte but CR. Those `http` refuses to store
/// (controls other than tab, DEL) are replaced with a space.
fn storable_value(value: &str) -> HeaderValue {
    if let Ok(header_value) = HeaderValue::from_bytes(value.as_bytes()) {
        return header_value;
    }

    let cleaned: Vec<u8> = value
        .bytes()
        .map(|b| if (b < b' ' && b != b'\t') || b == 0x7f { b' ' } else { b })
        .collect();

    HeaderValue::from_bytes(&cleaned).unwrap_or_else(|_| HeaderValue::from_static(""))
}
