use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::Bytes;
use encoding_rs::{CoderResult, Decoder, Encoding};

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decodes text that arrives in pieces, keeping an incomplete multi-byte
/// sequence at the end of one piece for the next.
pub(crate) struct TextDecoder {
    inner: Decoder,
}

impl TextDecoder {
    pub(crate) fn new(encoding: &'static Encoding) -> TextDecoder {
        TextDecoder {
            inner: encoding.new_decoder_without_bom_handling(),
        }
    }

    pub(crate) fn decode(&mut self, src: &[u8], dst: &mut String) {
        self.push(src, dst, false);
    }

    /// Flushes a dangling partial sequence as U+FFFD. The decoder must not be
    /// used afterwards.
    pub(crate) fn finish(&mut self, dst: &mut String) {
        self.push(&[], dst, true);
    }

    fn push(&mut self, mut src: &[u8], dst: &mut String, last: bool) {
        loop {
            let needed = self
                .inner
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len().saturating_mul(3).saturating_add(4));
            dst.reserve(needed);

            let (result, read, _) = self.inner.decode_to_string(src, dst, last);
            src = &src[read..];

            match result {
                CoderResult::InputEmpty => return,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

/// Decodes a base64 body whose 4-character groups may be split across
/// chunks. Whitespace (line breaks of MIME encoders) is ignored.
#[derive(Default)]
pub(crate) struct Base64Decoder {
    carry: Vec<u8>,
}

impl Base64Decoder {
    pub(crate) fn new() -> Base64Decoder {
        Base64Decoder::default()
    }

    pub(crate) fn decode(&mut self, src: &[u8]) -> crate::Result<Bytes> {
        let mut input = std::mem::take(&mut self.carry);
        input.extend(src.iter().copied().filter(|b| !b.is_ascii_whitespace()));

        let whole = input.len() / 4 * 4;
        self.carry = input.split_off(whole);

        Self::decode_groups(&input)
    }

    pub(crate) fn finish(&mut self) -> crate::Result<Bytes> {
        let rest = std::mem::take(&mut self.carry);
        Self::decode_groups(&rest)
    }

    fn decode_groups(input: &[u8]) -> crate::Result<Bytes> {
        if input.is_empty() {
            return Ok(Bytes::new());
        }

        LENIENT_BASE64
            .decode(input)
            .map(Bytes::from)
            .map_err(crate::Error::DecodeBase64)
    }
}
