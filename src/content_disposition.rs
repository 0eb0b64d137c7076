use regex::Captures;

use crate::constants;

/// Characters `decodeURI`-style decoding leaves escaped.
const RESERVED: &[u8] = b";/?:@&=+$,#";

pub(crate) struct ContentDisposition {
    pub(crate) field_name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    pub(crate) fn parse(value: &str) -> ContentDisposition {
        let field_name = constants::CONTENT_DISPOSITION_FIELD_NAME_RE
            .captures(value)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_owned());

        ContentDisposition {
            field_name,
            file_name: parse_file_name(value),
        }
    }
}

fn parse_file_name(value: &str) -> Option<String> {
    let raw = match constants::CONTENT_DISPOSITION_FILE_NAME_RE
        .captures(value)
        .and_then(|cap| cap.get(1))
    {
        Some(m) => m.as_str().to_owned(),
        None => {
            let encoded = constants::CONTENT_DISPOSITION_FILE_NAME_EXT_RE
                .captures(value)
                .and_then(|cap| cap.get(1))?
                .as_str();
            decode_uri(encoded).unwrap_or_else(|| encoded.to_owned())
        }
    };

    let unquoted = constants::ESCAPED_QUOTE_RE.replace_all(&raw, "\"");
    let unescaped = constants::NUMERIC_CHAR_REF_RE.replace_all(&unquoted, |cap: &Captures| {
        cap[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| cap[0].to_owned())
    });

    let start = memchr::memrchr2(b'\\', b'/', unescaped.as_bytes()).map_or(0, |idx| idx + 1);
    Some(unescaped[start..].to_owned())
}

/// Percent-decodes UTF-8 like `decodeURI`: escapes of reserved characters are
/// kept as they are. Returns `None` on a malformed escape or invalid UTF-8.
fn decode_uri(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let hi = hex_value(*bytes.get(i + 1)?)?;
        let lo = hex_value(*bytes.get(i + 2)?)?;
        let decoded = hi << 4 | lo;

        if RESERVED.contains(&decoded) {
            out.extend_from_slice(&bytes[i..i + 3]);
        } else {
            out.push(decoded);
        }
        i += 3;
    }

    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
