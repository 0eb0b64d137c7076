#![no_main]

use formstream::bytes::Bytes;
use formstream::{Options, Parser, Segment};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, PartialEq)]
enum Seen {
    Begin(usize, Option<String>, Option<String>, u64),
    Data(Vec<u8>),
    End,
}

/// Parses `data` split into chunks of `size` bytes, merging adjacent data.
fn parse(data: &[u8], size: usize) -> (Vec<Seen>, bool) {
    let options = Options::new().max_fields(usize::MAX);
    let mut parser = Parser::new("X-BOUNDARY", &options);
    let mut segments = Vec::new();
    let mut seen = Vec::new();
    let mut failed = false;

    for chunk in data.chunks(size.max(1)) {
        let fed = parser.feed(Bytes::copy_from_slice(chunk), &mut segments);

        for segment in segments.drain(..) {
            match segment {
                Segment::Begin(head) => seen.push(Seen::Begin(
                    head.index(),
                    head.name().map(ToOwned::to_owned),
                    head.file_name().map(ToOwned::to_owned),
                    head.byte_offset(),
                )),
                Segment::Data(bytes) => match seen.last_mut() {
                    Some(Seen::Data(buf)) => buf.extend_from_slice(&bytes),
                    _ => seen.push(Seen::Data(bytes.to_vec())),
                },
                Segment::End => seen.push(Seen::End),
            }
        }

        if fed.is_err() {
            failed = true;
            break;
        }
    }

    if !failed {
        failed = parser.finish().is_err();
    }

    (seen, failed)
}

fuzz_target!(|data: &[u8]| {
    let (whole, whole_failed) = parse(data, data.len());
    let (split, split_failed) = parse(data, 3);

    assert_eq!(whole_failed, split_failed);
    if !whole_failed {
        assert_eq!(whole, split);
    }
});
