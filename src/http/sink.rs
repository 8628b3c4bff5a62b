//! Output sink feeding a streamed HTTP response body.
//!
//! Rendering runs on a blocking thread. The response head is handed to the
//! async handler once, at the first body write or when rendering ends; body
//! chunks follow over a bounded channel.

use bytes::Bytes;
use std::io;
use tokio::sync::{mpsc, oneshot};

use crate::render::{Attachment, OutputSink};

/// Capacity of the body channel, in chunks
pub const BODY_CHANNEL_CAPACITY: usize = 16;

pub type BodyChunk = Result<Bytes, io::Error>;

/// Headers collected before the first body byte
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub content_type: Option<String>,
    pub attachment: Option<Attachment>,
}

/// How the blocking side starts the response
#[derive(Debug)]
pub enum ResponseStart {
    /// The computation failed; nothing was rendered
    Failed(String),
    /// Rendering started; the body follows on the channel
    Body(ResponseHead),
}

pub struct ChannelSink {
    head: ResponseHead,
    start: Option<oneshot::Sender<ResponseStart>>,
    body: mpsc::Sender<BodyChunk>,
}

impl ChannelSink {
    pub fn new(start: oneshot::Sender<ResponseStart>, body: mpsc::Sender<BodyChunk>) -> Self {
        Self {
            head: ResponseHead::default(),
            start: Some(start),
            body,
        }
    }

    fn commit_head(&mut self) {
        if let Some(start) = self.start.take() {
            // Receiver gone means the client went away; writes will fail next
            let _ = start.send(ResponseStart::Body(self.head.clone()));
        }
    }
}

impl OutputSink for ChannelSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.commit_head();
        self.body
            .blocking_send(Ok(Bytes::copy_from_slice(bytes)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }

    fn set_content_type(&mut self, mime: &str) {
        self.head.content_type = Some(mime.to_string());
    }

    fn set_attachment_headers(&mut self, filename: &str, size: u64) {
        self.head.attachment = Some(Attachment {
            filename: filename.to_string(),
            size,
        });
    }

    fn finish(&mut self) -> io::Result<()> {
        self.commit_head();
        Ok(())
    }
}

impl Drop for ChannelSink {
    fn drop(&mut self) {
        self.commit_head();
    }
}
