//! Kino Loader - Resource Loading Shim for Kino
//!
//! Sits between a media player's "I need bytes [offset, length) of this asset"
//! requests and the network:
//! - Intercepts assets handed to the player under a custom scheme
//! - Fetches each asset once over HTTP, whatever the number of requests
//! - Answers byte-range requests as soon as their bytes are buffered
//! - Keeps fetched assets in a shared, byte-budgeted cache for prefetch-then-play
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Kino Loader                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   player requests            ┌──────────────┐                   │
//! │   ─────────────────────────▶ │   Scheme     │                   │
//! │   register / cancel          │   Router     │                   │
//! │   prefetch                   └──────┬───────┘                   │
//! │                                     │                           │
//! │  ┌──────────────┐            ┌──────┴───────┐  ┌─────────────┐  │
//! │  │   Response   │ ◀───────── │   Loading    │ ─▶│  Network    │  │
//! │  │    Sinks     │            │ Coordinator  │ ◀─│  Client     │  │
//! │  └──────────────┘            └──────┬───────┘  └─────────────┘  │
//! │                                     │                           │
//! │                  ┌──────────────┐   │   ┌──────────────┐        │
//! │                  │    Asset     │ ◀─┴─▶ │    Event     │        │
//! │                  │    Cache     │       │  Dispatcher  │        │
//! │                  └──────────────┘       └──────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod net;
pub mod scheme;
pub mod sink;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use cache::{AssetCache, AssetCacheEntry, CacheStats, SharedEntry};
pub use config::{LoaderConfig, SchemeMapping};
pub use coordinator::LoadingCoordinator;
pub use error::{Error, Result};
pub use events::{EventDispatcher, LoaderEvent, LoaderEventRecord};
pub use net::{FetchHandler, FetchRequest, HttpClient, NetworkClient};
pub use scheme::SchemeRouter;
pub use sink::{collect_response, ChannelSink, ResponseSink, SinkEvent, SinkResponse};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the loader library
pub fn init() {
    tracing::info!(version = VERSION, "Kino Loader initialized");
}
