use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use formstream::{Event, Events, Form, Options};
use futures_util::stream::{self, Stream, StreamExt};
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};

const BODY: &str = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"My Field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\nContent-Type: text/plain\r\n\r\nHello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDARY--\r\n";

fn headers(boundary: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&format!("multipart/form-data; boundary={}", boundary)).unwrap(),
    );
    headers
}

fn chunks(data: &[u8], size: usize) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let chunks: Vec<_> = data.chunks(size).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
    stream::iter(chunks)
}

/// Collects every event of a request without raw parts, dropping progress.
async fn events(mut events: Events) -> Vec<Event> {
    let mut out = Vec::new();
    while let Some(event) = events.next_event().await {
        if !matches!(event, Event::Progress { .. }) {
            out.push(event);
        }
    }
    out
}

fn describe(event: &Event) -> String {
    match event {
        Event::Part(part) => format!("part {:?}", part.name()),
        Event::Field(field) => format!("field {:?}={}", field.name(), field.value()),
        Event::File(file) => format!("file {:?} {} {}", file.field_name(), file.original_filename(), file.size()),
        Event::Progress { .. } => "progress".to_owned(),
        Event::Aborted => "aborted".to_owned(),
        Event::Error(err) => format!("error {}", err),
        Event::CleanupFailed(err) => format!("cleanup failed {}", err),
        Event::Close => "close".to_owned(),
    }
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_single_field() {
    let body = "--X\r\nContent-Disposition: form-data; name=\"foo\"\r\n\r\nbar\r\n--X--\r\n";
    let form = Form::new(Options::new().auto_fields(true));

    let seen = events(form.parse(&headers("X"), chunks(body.as_bytes(), 7))).await;

    assert_eq!(seen.len(), 2);
    match &seen[0] {
        Event::Field(field) => {
            assert_eq!(field.name(), Some("foo"));
            assert_eq!(field.value(), "bar");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(seen[1], Event::Close));
}

#[tokio::test]
async fn test_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..=255u8).cycle().take(5000).collect();

    let mut body = b"--X\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n".to_vec();
    body.extend_from_slice(&content);
    body.extend_from_slice(b"\r\n--X--\r\n");

    let form = Form::new(Options::new().auto_files(true).upload_dir(dir.path()));
    let seen = events(form.parse(&headers("X"), chunks(&body, 100))).await;

    assert_eq!(seen.len(), 2);
    match &seen[0] {
        Event::File(file) => {
            assert_eq!(file.field_name(), Some("upload"));
            assert_eq!(file.original_filename(), "a.png");
            assert_eq!(file.size(), 5000);
            assert_eq!(file.headers().get(CONTENT_TYPE).unwrap(), "image/png");
            assert_eq!(file.path().parent(), Some(dir.path()));
            assert_eq!(file.path().extension().unwrap(), "png");
            assert_eq!(std::fs::read(file.path()).unwrap(), content);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(seen[1], Event::Close));
}

#[tokio::test]
async fn test_missing_content_type() {
    let form = Form::new(Options::new());
    let seen = events(form.parse(&HeaderMap::new(), chunks(BODY.as_bytes(), 8))).await;

    assert_eq!(seen.len(), 1);
    match &seen[0] {
        Event::Error(err) => {
            assert_eq!(err, &formstream::Error::NoContentType);
            assert_eq!(err.kind(), formstream::ErrorKind::Validation);
            assert_eq!(err.status(), http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_unsupported_content_type() {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

    let form = Form::new(Options::new());
    let seen = events(form.parse(&headers, chunks(BODY.as_bytes(), 8))).await;

    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], Event::Error(formstream::Error::NoMultipart)));
}

#[tokio::test]
async fn test_max_fields() {
    let body = "--X\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--X\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n--X--\r\n";
    let form = Form::new(Options::new().auto_fields(true).max_fields(1));

    let seen = events(form.parse(&headers("X"), chunks(body.as_bytes(), 5))).await;
    let seen: Vec<_> = seen.iter().map(describe).collect();

    assert_eq!(seen, vec!["field Some(\"a\")=1", "error maxFields 1 exceeded"]);
}

#[tokio::test]
async fn test_max_fields_size() {
    let body = "--X\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nabc\r\n--X\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\ndefg\r\n--X--\r\n";
    let form = Form::new(Options::new().auto_fields(true).max_fields_size(5));

    let seen = events(form.parse(&headers("X"), chunks(body.as_bytes(), 1))).await;
    let seen: Vec<_> = seen.iter().map(describe).collect();

    assert_eq!(seen, vec!["field Some(\"a\")=abc", "error maxFieldsSize 5 exceeded"]);
}

#[tokio::test]
async fn test_max_files_size_removes_all_files() {
    let dir = tempfile::tempdir().unwrap();
    let body = "--X\r\nContent-Disposition: form-data; name=\"a\"; filename=\"a.txt\"\r\n\r\n0123456789\r\n--X\r\nContent-Disposition: form-data; name=\"b\"; filename=\"b.txt\"\r\n\r\n0123456789\r\n--X--\r\n";
    let form = Form::new(Options::new().auto_files(true).max_files_size(15).upload_dir(dir.path()));

    let seen = events(form.parse(&headers("X"), chunks(body.as_bytes(), 4))).await;

    assert!(!seen.iter().any(|e| matches!(e, Event::Close)));
    let errors: Vec<_> = seen.iter().filter(|e| matches!(e, Event::Error(_))).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        Event::Error(formstream::Error::FilesSizeExceeded { limit: 15 })
    ));
    assert_eq!(entries(dir.path()), 0);
}

#[tokio::test]
async fn test_abort_during_upload() {
    let dir = tempfile::tempdir().unwrap();
    let head = "--X\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"big.bin\"\r\n\r\n";
    let body = stream::iter(vec![
        Ok::<_, Infallible>(Bytes::from(head)),
        Ok(Bytes::from(vec![7u8; 4096])),
    ])
    .chain(stream::pending());

    let form = Form::new(Options::new().auto_files(true).upload_dir(dir.path()));
    let events_stream = form.parse(&headers("X"), body);
    let abort = events_stream.abort_handle();

    let mut waited = 0;
    while entries(dir.path()) == 0 {
        assert!(waited < 500, "upload never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }

    abort.abort();
    assert!(abort.is_aborted());

    let seen = events(events_stream).await;
    let seen: Vec<_> = seen.iter().map(describe).collect();

    assert_eq!(seen, vec!["aborted", "error request aborted"]);
    assert_eq!(entries(dir.path()), 0);
}

#[tokio::test]
async fn test_file_completes_before_later_field() {
    let dir = tempfile::tempdir().unwrap();
    let mut body = b"--X\r\nContent-Disposition: form-data; name=\"doc\"; filename=\"doc.txt\"\r\n\r\n".to_vec();
    body.extend_from_slice(&[b'x'; 20_000]);
    body.extend_from_slice(
        b"\r\n--X\r\nContent-Disposition: form-data; name=\"after\"\r\n\r\nvalue\r\n--X--\r\n",
    );

    for size in [1024, 333, 20_000, body.len()] {
        let form = Form::new(Options::new().auto_fields(true).auto_files(true).upload_dir(dir.path()));
        let seen = events(form.parse(&headers("X"), chunks(&body, size))).await;
        let seen: Vec<_> = seen.iter().map(describe).collect();

        assert_eq!(
            seen,
            vec![
                "file Some(\"doc\") doc.txt 20000",
                "field Some(\"after\")=value",
                "close"
            ],
            "chunk size {}",
            size
        );
    }
}

#[tokio::test]
async fn test_raw_parts() {
    let form = Form::new(Options::new());
    let mut events = form.parse(&headers("X-BOUNDARY"), chunks(BODY.as_bytes(), 1));

    let mut texts = Vec::new();
    let mut closed = false;

    while let Some(event) = events.next_event().await {
        match event {
            Event::Part(part) => {
                let index = part.index();
                let name = part.name().map(ToOwned::to_owned);
                let file_name = part.file_name().map(ToOwned::to_owned);
                let content_type = part.content_type().cloned();
                texts.push((index, name, file_name, content_type, part.text().await.unwrap()));
            }
            Event::Close => closed = true,
            Event::Progress { .. } => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    assert!(closed);
    assert_eq!(
        texts,
        vec![
            (0, Some("My Field".to_owned()), None, None, "abcd".to_owned()),
            (
                1,
                Some("File Field".to_owned()),
                Some("a-text-file.txt".to_owned()),
                Some(mime::TEXT_PLAIN),
                "Hello world\nHello\r\nWorld\rAgain".to_owned()
            ),
        ]
    );
}

#[tokio::test]
async fn test_dropped_part_counts_as_consumed() {
    let form = Form::new(Options::new());
    let mut events = form.parse(&headers("X-BOUNDARY"), chunks(BODY.as_bytes(), 16));

    let mut seen = Vec::new();
    while let Some(event) = events.next_event().await {
        if !matches!(event, Event::Progress { .. }) {
            seen.push(describe(&event));
        }
    }

    assert_eq!(
        seen,
        vec!["part Some(\"My Field\")", "part Some(\"File Field\")", "close"]
    );
}

#[tokio::test]
async fn test_events_are_chunking_invariant() {
    let dir = tempfile::tempdir().unwrap();
    let options = Options::new().auto_fields(true).auto_files(true).upload_dir(dir.path());

    let whole = events(Form::new(options.clone()).parse(&headers("X-BOUNDARY"), chunks(BODY.as_bytes(), BODY.len()))).await;
    let whole: Vec<_> = whole.iter().map(describe).collect();
    assert_eq!(
        whole,
        vec![
            "field Some(\"My Field\")=abcd",
            "file Some(\"File Field\") a-text-file.txt 30",
            "close"
        ]
    );

    for size in 1..BODY.len() {
        let seen = events(Form::new(options.clone()).parse(&headers("X-BOUNDARY"), chunks(BODY.as_bytes(), size))).await;
        let seen: Vec<_> = seen.iter().map(describe).collect();
        assert_eq!(seen, whole, "chunk size {}", size);
    }
}

#[tokio::test]
async fn test_base64_file() {
    let dir = tempfile::tempdir().unwrap();
    let body = "--X\r\nContent-Disposition: form-data; name=\"bin\"; filename=\"blob.dat\"\r\nContent-Transfer-Encoding: base64\r\n\r\nAAECAwT/\r\n/v0=\r\n--X--\r\n";
    let form = Form::new(Options::new().auto_files(true).upload_dir(dir.path()));

    let seen = events(form.parse(&headers("X"), chunks(body.as_bytes(), 3))).await;

    match &seen[0] {
        Event::File(file) => {
            assert_eq!(file.size(), 8);
            assert_eq!(
                std::fs::read(file.path()).unwrap(),
                vec![0x00, 0x01, 0x02, 0x03, 0x04, 0xFF, 0xFE, 0xFD]
            );
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(seen[1], Event::Close));
}

#[tokio::test]
async fn test_unknown_transfer_encoding() {
    let body = "--X\r\nContent-Disposition: form-data; name=\"a\"\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\nabc\r\n--X--\r\n";
    let form = Form::new(Options::new().auto_fields(true));

    let seen = events(form.parse(&headers("X"), chunks(body.as_bytes(), 9))).await;
    let seen: Vec<_> = seen.iter().map(describe).collect();

    assert_eq!(seen, vec!["error unknown transfer-encoding: quoted-printable"]);
}

#[tokio::test]
async fn test_progress() {
    let mut headers = headers("X-BOUNDARY");
    headers.insert(CONTENT_LENGTH, HeaderValue::from(BODY.len()));

    let dir = tempfile::tempdir().unwrap();
    let form = Form::new(Options::new().auto_fields(true).auto_files(true).upload_dir(dir.path()));
    let mut events = form.parse(&headers, chunks(BODY.as_bytes(), 50));

    let mut progress = Vec::new();
    while let Some(event) = events.next_event().await {
        if let Event::Progress {
            bytes_received,
            bytes_expected,
        } = event
        {
            assert_eq!(bytes_expected, Some(BODY.len() as u64));
            progress.push(bytes_received);
        }
    }

    let expected: Vec<u64> = (1..=BODY.len().div_ceil(50))
        .map(|n| (n * 50).min(BODY.len()) as u64)
        .collect();
    assert_eq!(progress, expected);
}

#[tokio::test]
async fn test_incomplete_stream() {
    let body = &BODY.as_bytes()[..BODY.len() - 10];
    let form = Form::new(Options::new().auto_fields(true));

    let seen = events(form.parse(&headers("X-BOUNDARY"), chunks(body, 10))).await;
    let last = seen.last().map(describe);

    assert_eq!(last.as_deref(), Some("error stream ended unexpectedly"));
    assert!(!seen.iter().any(|e| matches!(e, Event::Close)));
}

#[tokio::test]
async fn test_stream_read_failure() {
    let body = stream::iter(vec![
        Ok(Bytes::from_static(b"--X\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nab")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")),
    ]);
    let form = Form::new(Options::new().auto_fields(true));

    let seen = events(form.parse(&headers("X"), body)).await;

    assert_eq!(seen.len(), 1);
    match &seen[0] {
        Event::Error(err) => {
            assert!(matches!(err, formstream::Error::StreamReadFailed(_)));
            assert_eq!(err.kind(), formstream::ErrorKind::Transport);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_part_receives_error_on_abort() {
    let head = "--X\r\nContent-Disposition: form-data; name=\"raw\"\r\n\r\nfirst bytes";
    let body = stream::iter(vec![Ok::<_, Infallible>(Bytes::from(head))]).chain(stream::pending());

    let form = Form::new(Options::new());
    let mut events = form.parse(&headers("X"), body);

    let mut part = loop {
        match events.next_event().await {
            Some(Event::Part(part)) => break part,
            Some(Event::Progress { .. }) => continue,
            other => panic!("unexpected {:?}", other),
        }
    };

    let mut received = Vec::new();
    while received.len() < b"first bytes".len() {
        let chunk = part.chunk().await.unwrap().unwrap();
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"first bytes");

    events.abort_handle().abort();

    assert_eq!(part.chunk().await, Err(formstream::Error::Aborted));
    assert_eq!(part.chunk().await, Ok(None));

    let rest: Vec<_> = events
        .filter(|event| futures_util::future::ready(!matches!(event, Event::Progress { .. })))
        .map(|event| describe(&event))
        .collect()
        .await;
    assert_eq!(rest, vec!["aborted", "error request aborted"]);
}

#[tokio::test]
async fn test_related_with_epilogue() {
    let body = "preamble\r\n--R\r\nContent-Type: application/json\r\n\r\n{\"a\":1}\r\n--R--\r\nepilogue bytes that are ignored";
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/related; type=\"application/json\"; boundary=R"),
    );

    let form = Form::new(Options::new());
    let mut events = form.parse(&headers, chunks(body.as_bytes(), 6));

    let mut bodies = Vec::new();
    let mut closed = false;
    while let Some(event) = events.next_event().await {
        match event {
            Event::Part(part) => {
                assert_eq!(part.name(), None);
                assert_eq!(part.content_type(), Some(&mime::APPLICATION_JSON));
                bodies.push(part.bytes().await.unwrap());
            }
            Event::Close => closed = true,
            _ => {}
        }
    }

    assert!(closed);
    assert_eq!(bodies, vec![Bytes::from_static(b"{\"a\":1}")]);
}

#[cfg(feature = "json")]
#[tokio::test]
async fn test_json_field_and_part() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    let body = "--X\r\nContent-Disposition: form-data; name=\"point\"\r\n\r\n{\"x\":1,\"y\":2}\r\n--X\r\nContent-Disposition: form-data; name=\"raw\"; filename=\"p.json\"\r\nContent-Type: application/json\r\n\r\n{\"x\":3,\"y\":4}\r\n--X--\r\n";
    let form = Form::new(Options::new().auto_fields(true));
    let mut events = form.parse(&headers("X"), chunks(body.as_bytes(), 4));

    let mut points = Vec::new();
    while let Some(event) = events.next_event().await {
        match event {
            Event::Field(field) => points.push(field.json::<Point>().unwrap()),
            Event::Part(part) => points.push(part.json::<Point>().await.unwrap()),
            _ => {}
        }
    }

    assert_eq!(points, vec![Point { x: 1, y: 2 }, Point { x: 3, y: 4 }]);
}

#[tokio::test]
async fn test_removal_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let head = "--X\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"doc.txt\"\r\n\r\n";
    let body = stream::iter(vec![
        Ok::<_, Infallible>(Bytes::from(head)),
        Ok(Bytes::from_static(b"partial contents")),
    ])
    .chain(stream::pending());

    let form = Form::new(Options::new().auto_files(true).upload_dir(dir.path()));
    let events_stream = form.parse(&headers("X"), body);

    let mut waited = 0;
    let path = loop {
        if let Some(entry) = std::fs::read_dir(dir.path()).unwrap().next() {
            break entry.unwrap().path();
        }
        assert!(waited < 500, "upload never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    };

    // A non-empty directory in place of the upload cannot be removed as a file.
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), b"x").unwrap();

    events_stream.abort_handle().abort();
    let seen = events(events_stream).await;

    assert_eq!(seen.len(), 3, "{:?}", seen);
    assert!(matches!(seen[0], Event::Aborted));
    assert!(matches!(seen[1], Event::Error(formstream::Error::Aborted)));
    match &seen[2] {
        Event::CleanupFailed(err) => {
            assert!(matches!(err, formstream::Error::RemoveFileFailed { .. }));
            assert!(err.to_string().starts_with(&format!("failed to remove {}", path.display())));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(path.join("keep").exists());
}

#[tokio::test]
async fn test_unread_part_pauses_body() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let mut body = vec![Bytes::from_static(
        b"--X\r\nContent-Disposition: form-data; name=\"raw\"\r\n\r\n",
    )];
    body.extend((0..100).map(|_| Bytes::from_static(b"aaaaaaaaaa")));
    body.push(Bytes::from_static(b"\r\n--X--\r\n"));
    let total = body.len();

    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let body = stream::iter(body.into_iter().map(Ok::<_, Infallible>)).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let form = Form::new(Options::new());
    let mut events = form.parse(&headers("X"), body);

    let part = loop {
        match events.next_event().await {
            Some(Event::Part(part)) => break part,
            Some(Event::Progress { .. }) => continue,
            other => panic!("unexpected {:?}", other),
        }
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stalled = pulled.load(Ordering::SeqCst);
    assert!(stalled < 30, "pulled {} of {} chunks", stalled, total);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), stalled);

    let data = part.bytes().await.unwrap();
    assert_eq!(data.len(), 1000);

    let mut closed = false;
    while let Some(event) = events.next_event().await {
        closed |= matches!(event, Event::Close);
    }

    assert!(closed);
    assert_eq!(pulled.load(Ordering::SeqCst), total);
}
