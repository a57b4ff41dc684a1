//! Response sinks: where a loading request's answer goes

use crate::{types::ContentInfo, Error};
use bytes::Bytes;
use tokio::sync::mpsc;

/// Receiver side of one player loading request
///
/// A satisfied request sees `on_content_info` (unless it already received
/// it when response headers arrived), then `on_data`, then `on_finish`. A
/// failed request sees `on_error` and nothing after it. Calls are made
/// without any loader lock held.
pub trait ResponseSink: Send + Sync {
    /// Content type and total length of the asset
    fn on_content_info(&self, info: &ContentInfo);

    /// Bytes of the requested range
    fn on_data(&self, data: Bytes);

    /// The request is complete
    fn on_finish(&self);

    /// The request failed
    fn on_error(&self, error: Error);
}

/// Message form of the sink callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    ContentInfo(ContentInfo),
    Data(Bytes),
    Finished,
    Failed(Error),
}

/// Sink forwarding every callback into an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResponseSink for ChannelSink {
    fn on_content_info(&self, info: &ContentInfo) {
        let _ = self.tx.send(SinkEvent::ContentInfo(info.clone()));
    }

    fn on_data(&self, data: Bytes) {
        let _ = self.tx.send(SinkEvent::Data(data));
    }

    fn on_finish(&self) {
        let _ = self.tx.send(SinkEvent::Finished);
    }

    fn on_error(&self, error: Error) {
        let _ = self.tx.send(SinkEvent::Failed(error));
    }
}

/// Collected outcome of a request read from a [`ChannelSink`] receiver
#[derive(Debug, Clone, Default)]
pub struct SinkResponse {
    pub info: Option<ContentInfo>,
    pub data: Vec<u8>,
}

/// Drain a channel sink until the request finishes or fails
pub async fn collect_response(
    rx: &mut mpsc::UnboundedReceiver<SinkEvent>,
) -> crate::Result<SinkResponse> {
    let mut response = SinkResponse::default();
    while let Some(event) = rx.recv().await {
        match event {
            SinkEvent::ContentInfo(info) => response.info = Some(info),
            SinkEvent::Data(data) => response.data.extend_from_slice(&data),
            SinkEvent::Finished => return Ok(response),
            SinkEvent::Failed(error) => return Err(error),
        }
    }
    Err(Error::Internal("response sink dropped before completion".into()))
}
