//! Output sinks: where renderers write their bytes.

use std::io::{self, Write};

/// Destination of a rendered response.
///
/// Writes may arrive in many small chunks; implementations must not require
/// the whole body up front. Headers set after the first write may be ignored
/// by sinks that have already committed them.
pub trait OutputSink: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn set_content_type(&mut self, mime: &str);

    /// Mark the body as a download named `filename` of `size` bytes
    fn set_attachment_headers(&mut self, filename: &str, size: u64);

    /// Flush anything still pending; called once rendering is over
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Attachment header values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub size: u64,
}

/// Collects the whole response in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    pub content_type: Option<String>,
    pub attachment: Option<Attachment>,
    pub body: Vec<u8>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl OutputSink for BufferSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(bytes);
        Ok(())
    }

    fn set_content_type(&mut self, mime: &str) {
        self.content_type = Some(mime.to_string());
    }

    fn set_attachment_headers(&mut self, filename: &str, size: u64) {
        self.attachment = Some(Attachment {
            filename: filename.to_string(),
            size,
        });
    }
}

/// Streams the body into any writer (stdout for the CLI).
///
/// Headers have nowhere to go, so they are only recorded.
pub struct WriterSink<W: Write + Send> {
    writer: W,
    content_type: Option<String>,
    attachment: Option<Attachment>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            content_type: None,
            attachment: None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn set_content_type(&mut self, mime: &str) {
        self.content_type = Some(mime.to_string());
    }

    fn set_attachment_headers(&mut self, filename: &str, size: u64) {
        self.attachment = Some(Attachment {
            filename: filename.to_string(),
            size,
        });
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
