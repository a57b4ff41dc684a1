//! Test doubles for the loader's collaborators
//!
//! [`FakeNetworkClient`] records every fetch it is asked to start and lets the
//! test deliver the network events itself. [`RecordingSink`] keeps every
//! callback a loading request receives.

use crate::{
    net::{FetchHandler, FetchRequest, NetworkClient},
    sink::{ResponseSink, SinkEvent},
    types::{ContentInfo, ResponseMeta},
    Error,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Network client that never touches the network
#[derive(Default)]
pub struct FakeNetworkClient {
    fetches: Mutex<Vec<(FetchRequest, Arc<dyn FetchHandler>)>>,
}

impl FakeNetworkClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetches started
    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }

    /// Requests of every fetch started, in order
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.fetches.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Handler of the `index`-th fetch
    pub fn handler(&self, index: usize) -> Arc<dyn FetchHandler> {
        self.fetches
            .lock()
            .get(index)
            .map(|(_, h)| h.clone())
            .unwrap_or_else(|| panic!("no fetch #{index} was started"))
    }

    /// Deliver response headers for the `index`-th fetch
    pub fn respond(&self, index: usize, content_type: &str, content_length: Option<u64>) {
        self.handler(index).on_response(ResponseMeta {
            status: 200,
            content_type: Some(content_type.to_string()),
            content_length,
        });
    }

    /// Deliver a chunk for the `index`-th fetch
    pub fn send(&self, index: usize, chunk: &[u8]) {
        self.handler(index).on_data(Bytes::copy_from_slice(chunk));
    }

    /// End the `index`-th fetch successfully
    pub fn finish(&self, index: usize) {
        self.handler(index).on_finished();
    }

    /// Fail the `index`-th fetch
    pub fn fail(&self, index: usize, error: Error) {
        self.handler(index).on_error(error);
    }

    /// Run the `index`-th fetch to completion: headers with the full length,
    /// `body` split into `chunk_size` pieces, then end-of-stream
    pub fn serve(&self, index: usize, content_type: &str, body: &[u8], chunk_size: usize) {
        self.respond(index, content_type, Some(body.len() as u64));
        for chunk in body.chunks(chunk_size.max(1)) {
            self.send(index, chunk);
        }
        self.finish(index);
    }
}

impl NetworkClient for FakeNetworkClient {
    fn start_fetch(&self, request: FetchRequest, handler: Arc<dyn FetchHandler>) {
        self.fetches.lock().push((request, handler));
    }
}

/// Sink recording every callback it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// All data received, concatenated
    pub fn data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for event in self.events.lock().iter() {
            if let SinkEvent::Data(data) = event {
                out.extend_from_slice(data);
            }
        }
        out
    }

    /// Number of `on_data` calls
    pub fn data_calls(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Data(_)))
            .count()
    }

    /// Last content info received
    pub fn content_info(&self) -> Option<ContentInfo> {
        self.events.lock().iter().rev().find_map(|e| match e {
            SinkEvent::ContentInfo(info) => Some(info.clone()),
            _ => None,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.events.lock().iter().any(|e| matches!(e, SinkEvent::Finished))
    }

    pub fn error(&self) -> Option<Error> {
        self.events.lock().iter().find_map(|e| match e {
            SinkEvent::Failed(err) => Some(err.clone()),
            _ => None,
        })
    }

    /// Finished or failed
    pub fn is_done(&self) -> bool {
        self.is_finished() || self.error().is_some()
    }
}

impl ResponseSink for RecordingSink {
    fn on_content_info(&self, info: &ContentInfo) {
        self.events.lock().push(SinkEvent::ContentInfo(info.clone()));
    }

    fn on_data(&self, data: Bytes) {
        self.events.lock().push(SinkEvent::Data(data));
    }

    fn on_finish(&self) {
        self.events.lock().push(SinkEvent::Finished);
    }

    fn on_error(&self, error: Error) {
        self.events.lock().push(SinkEvent::Failed(error));
    }
}
