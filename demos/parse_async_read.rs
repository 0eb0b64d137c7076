use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tokio::io::AsyncRead;
// Import formstream types.
use formstream::{Event, Form, Options};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Generate an `AsyncRead` and the request headers from somewhere e.g. server request.
    let (reader, headers) = get_async_reader_from_somewhere().await;

    // Collect fields as text and stream everything else back as parts.
    let form = Form::new(Options::new().auto_fields(true));
    let mut events = form.parse_reader(&headers, reader);

    // Iterate over the events, use `next_event()` to get the next one.
    while let Some(event) = events.next_event().await {
        match event {
            Event::Field(field) => println!("Field: {:?} = {:?}", field.name(), field.value()),
            Event::Part(part) => {
                // Get the part's filename if provided in "Content-Disposition" header.
                println!("Name: {:?}, File Name: {:?}", part.name(), part.file_name());

                // Read part content as text.
                let content = part.text().await?;
                println!("Content: {:?}", content);
            }
            Event::Error(err) => return Err(err.into()),
            Event::Close => println!("Done"),
            _ => {}
        }
    }

    Ok(())
}

// Generate an `AsyncRead` and the request headers from somewhere e.g. server request.
async fn get_async_reader_from_somewhere() -> (impl AsyncRead, HeaderMap) {
    let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"My Field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\nContent-Type: text/plain\r\n\r\nHello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDARY--\r\n";

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/form-data; boundary=X-BOUNDARY"),
    );

    (data.as_bytes(), headers)
}
