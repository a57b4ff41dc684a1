//! Core types for Kino Loader

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a pending loading request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte range requested by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedRange {
    /// First byte requested
    pub offset: u64,
    /// Number of bytes requested, `None` means "to the end of the asset"
    pub length: Option<u64>,
}

impl RequestedRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    /// Range from `offset` to the end of the asset
    pub fn to_end(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// Exclusive end, if the length is known
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.offset.saturating_add(len))
    }
}

impl std::fmt::Display for RequestedRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end() {
            Some(end) => write!(f, "[{}, {})", self.offset, end),
            None => write!(f, "[{}, end)", self.offset),
        }
    }
}

/// Content metadata handed to the player before data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// Declared MIME type
    pub content_type: Option<String>,
    /// Total asset length in bytes, if known
    pub content_length: Option<u64>,
}

/// Response headers reported by the network layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// HTTP status code
    pub status: u16,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Total length of the asset. For partial responses this is the
    /// Content-Range total, not the length of the body.
    pub content_length: Option<u64>,
}

/// Fetch state of one asset URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchState {
    /// Nothing fetched or fetching, or the cached asset was evicted
    Idle,
    /// A fetch session is running
    Fetching,
    /// All bytes are in the cache
    Completed,
    /// The last fetch failed
    Failed,
}

impl FetchState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: FetchState) -> bool {
        use FetchState::*;
        matches!(
            (self, target),
            (Idle, Fetching)
                | (Fetching, Completed)
                | (Fetching, Failed)
                // Failed fetches restart from scratch
                | (Failed, Fetching)
        )
    }
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchState::Idle => write!(f, "idle"),
            FetchState::Fetching => write!(f, "fetching"),
            FetchState::Completed => write!(f, "completed"),
            FetchState::Failed => write!(f, "failed"),
        }
    }
}

/// Source description handed over by the host application for preloading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSource {
    /// Asset URL, normally in an intercepted scheme
    pub uri: String,
    /// Extra request headers (authentication, tokens)
    #[serde(default, alias = "requestHeaders")]
    pub headers: BTreeMap<String, String>,
}

impl PlaybackSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_end() {
        assert_eq!(RequestedRange::new(900, 100).end(), Some(1000));
        assert_eq!(RequestedRange::to_end(5).end(), None);
        assert_eq!(RequestedRange::new(0, 10).to_string(), "[0, 10)");
        assert_eq!(RequestedRange::to_end(7).to_string(), "[7, end)");
    }

    #[test]
    fn test_fetch_state_transitions() {
        assert!(FetchState::Idle.can_transition_to(FetchState::Fetching));
        assert!(FetchState::Fetching.can_transition_to(FetchState::Completed));
        assert!(FetchState::Failed.can_transition_to(FetchState::Fetching));
        assert!(!FetchState::Idle.can_transition_to(FetchState::Completed));
        assert!(!FetchState::Failed.can_transition_to(FetchState::Completed));
        assert!(!FetchState::Completed.can_transition_to(FetchState::Fetching));
        assert!(!FetchState::Completed.can_transition_to(FetchState::Idle));
    }

    #[test]
    fn test_playback_source_from_host_json() {
        let json = r#"{"uri":"kino://cdn.example.com/v.mp4","requestHeaders":{"Authorization":"Bearer t"}}"#;
        let source: PlaybackSource = serde_json::from_str(json).unwrap();
        assert_eq!(source.uri, "kino://cdn.example.com/v.mp4");
        assert_eq!(source.headers.get("Authorization").map(String::as_str), Some("Bearer t"));

        let bare: PlaybackSource = serde_json::from_str(r#"{"uri":"kino://a/b"}"#).unwrap();
        assert!(bare.headers.is_empty());
    }
}
