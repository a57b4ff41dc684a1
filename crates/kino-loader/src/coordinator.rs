//! Loading Coordinator - answers player byte-range requests
//!
//! Coordinates:
//! - The interception decision for each loading request
//! - One fetch session per asset URL, shared by every request for it
//! - Appending fetched chunks to the asset cache
//! - Satisfying pending requests as their ranges become available
//!
//! Per asset URL the fetch moves `Idle -> Fetching -> {Completed, Failed}`.
//! A failed URL starts over with a fresh fetch on its next request.
//!
//! All session and pending-request mutation happens under one lock. Sink
//! callbacks, event emission and fetch starts run after it is released, so a
//! slow consumer never stalls network delivery and vice versa.

use crate::{
    cache::{AssetCache, AssetCacheEntry, SharedEntry},
    config::LoaderConfig,
    events::{EventDispatcher, LoaderEvent},
    net::{FetchHandler, FetchRequest, HttpClient, NetworkClient},
    scheme::SchemeRouter,
    sink::ResponseSink,
    types::*,
    Error, Result,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// One player-issued byte-range request waiting for data
struct PendingLoadingRequest {
    id: RequestId,
    range: RequestedRange,
    sink: Arc<dyn ResponseSink>,
    /// Content info already handed to the sink
    informed: bool,
}

/// One active network fetch for an asset URL
struct FetchSession {
    /// Distinguishes this fetch's events from those of a discarded one
    generation: u64,
    upstream: Url,
    range_start: Option<u64>,
    /// Same buffer the cache holds for this URL
    entry: SharedEntry,
    meta: Option<ResponseMeta>,
    pending: Vec<PendingLoadingRequest>,
    state: FetchState,
}

impl FetchSession {
    fn transition(&mut self, url: &str, target: FetchState) {
        if !self.state.can_transition_to(target) {
            warn!(url = %url, from = %self.state, to = %target, "Unexpected fetch state transition");
        }
        self.state = target;
    }
}

#[derive(Default)]
struct State {
    sessions: HashMap<String, FetchSession>,
    headers: HashMap<String, Vec<(String, String)>>,
    failed: HashSet<String>,
    next_generation: u64,
}

/// Where a request stands against the buffered bytes of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Waiting,
    Ready { start: u64, end: u64 },
    Unsatisfiable { content_length: u64 },
    /// Entry starts past the requested offset and will not grow backwards
    NeedsHead,
}

fn readiness(range: &RequestedRange, entry: &AssetCacheEntry) -> Readiness {
    let finished = entry.is_finished();
    let buffered_end = entry.buffered_end();

    if let Some(total) = entry.content_length() {
        if range.offset > total {
            return Readiness::Unsatisfiable {
                content_length: total,
            };
        }
    }
    if range.offset < entry.base_offset() {
        return if finished {
            Readiness::NeedsHead
        } else {
            Readiness::Waiting
        };
    }

    let wanted_end = match (range.end(), entry.content_length()) {
        (Some(end), Some(total)) => end.min(total),
        (Some(end), None) => end,
        (None, Some(total)) => total,
        (None, None) if finished => buffered_end,
        (None, None) => return Readiness::Waiting,
    };

    if buffered_end >= wanted_end {
        Readiness::Ready {
            start: range.offset,
            end: wanted_end,
        }
    } else if finished {
        Readiness::Ready {
            start: range.offset,
            end: buffered_end.max(range.offset),
        }
    } else {
        Readiness::Waiting
    }
}

/// Sink hand-off computed under the lock, performed after it
enum Delivery {
    Info {
        sink: Arc<dyn ResponseSink>,
        info: ContentInfo,
    },
    Satisfy {
        sink: Arc<dyn ResponseSink>,
        info: Option<ContentInfo>,
        data: Bytes,
    },
    Fail {
        sink: Arc<dyn ResponseSink>,
        error: Error,
    },
}

impl Delivery {
    fn deliver(self) {
        match self {
            Delivery::Info { sink, info } => sink.on_content_info(&info),
            Delivery::Satisfy { sink, info, data } => {
                if let Some(info) = info {
                    sink.on_content_info(&info);
                }
                sink.on_data(data);
                sink.on_finish();
            }
            Delivery::Fail { sink, error } => sink.on_error(error),
        }
    }
}

/// Side effects collected under the lock
#[derive(Default)]
struct Effects {
    deliveries: Vec<Delivery>,
    events: Vec<LoaderEvent>,
    fetches: Vec<(FetchRequest, Arc<dyn FetchHandler>)>,
    hits: u64,
    misses: u64,
    evict: bool,
}

impl Effects {
    /// Answer `request` from `entry` according to `readiness`
    fn resolve(&mut self, request: PendingLoadingRequest, entry: &AssetCacheEntry, readiness: Readiness) {
        match readiness {
            Readiness::Ready { start, end } => {
                let info = if request.informed {
                    None
                } else {
                    Some(entry.content_info())
                };
                self.deliveries.push(Delivery::Satisfy {
                    sink: request.sink,
                    info,
                    data: entry.slice(start, end),
                });
            }
            Readiness::Unsatisfiable { content_length } => {
                debug!(request = %request.id, range = %request.range, content_length, "Range not satisfiable");
                self.deliveries.push(Delivery::Fail {
                    sink: request.sink,
                    error: Error::RangeUnsatisfiable {
                        offset: request.range.offset,
                        content_length,
                    },
                });
            }
            Readiness::Waiting | Readiness::NeedsHead => {}
        }
    }
}

struct Inner {
    config: LoaderConfig,
    router: SchemeRouter,
    cache: Arc<AssetCache>,
    client: Arc<dyn NetworkClient>,
    events: RwLock<Option<Arc<EventDispatcher>>>,
    state: Mutex<State>,
}

/// Resource-loading coordinator
///
/// Cheap to clone; clones share sessions, cache and network client.
#[derive(Clone)]
pub struct LoadingCoordinator {
    inner: Arc<Inner>,
}

impl LoadingCoordinator {
    /// Create a coordinator over a shared cache and network client
    pub fn new(
        config: LoaderConfig,
        cache: Arc<AssetCache>,
        client: Arc<dyn NetworkClient>,
    ) -> Result<Self> {
        config.validate()?;
        let router = SchemeRouter::new(config.schemes.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                router,
                cache,
                client,
                events: RwLock::new(None),
                state: Mutex::new(State::default()),
            }),
        })
    }

    /// Coordinator with its own cache and a reqwest client on the current runtime
    pub fn with_http_client(config: LoaderConfig) -> Result<Self> {
        let cache = Arc::new(AssetCache::from_config(&config));
        let client = Arc::new(HttpClient::new(&config)?);
        Self::new(config, cache, client)
    }

    /// Attach the dispatcher that receives cache and fetch notifications
    pub fn set_event_dispatcher(&self, dispatcher: Arc<EventDispatcher>) {
        *self.inner.events.write() = Some(dispatcher);
    }

    pub fn event_dispatcher(&self) -> Option<Arc<EventDispatcher>> {
        self.inner.events.read().clone()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.inner.cache
    }

    /// True only for URLs in a configured custom scheme
    pub fn should_intercept(&self, url: &str) -> bool {
        self.inner.router.should_intercept(url)
    }

    /// Register a player loading request for `range` of `url`
    ///
    /// Ranges already buffered are answered before this returns; otherwise the
    /// request waits on the URL's fetch, starting one if none is running.
    /// URLs outside the custom schemes fail with `UnsupportedScheme` and must
    /// be left to the platform.
    #[instrument(skip(self, sink))]
    pub fn register_pending(
        &self,
        url: &str,
        range: RequestedRange,
        sink: Arc<dyn ResponseSink>,
    ) -> Result<RequestId> {
        let inner = &self.inner;
        if !inner.router.should_intercept(url) {
            return Err(Error::UnsupportedScheme {
                url: url.to_string(),
            });
        }
        let upstream = inner.router.upstream_url(url)?;

        let id = RequestId::new();
        let request = PendingLoadingRequest {
            id,
            range,
            sink,
            informed: false,
        };

        let mut effects = Effects::default();
        {
            let mut state = inner.state.lock();

            if let Some(session) = state.sessions.get_mut(url) {
                let entry = session.entry.read();
                match readiness(&range, &entry) {
                    Readiness::Waiting | Readiness::NeedsHead => {
                        drop(entry);
                        debug!(request = %id, range = %range, "Request joined running fetch");
                        session.pending.push(request);
                    }
                    ready => {
                        if let Readiness::Ready { start, end } = ready {
                            effects.hits += 1;
                            effects.events.push(LoaderEvent::CacheHit {
                                url: url.to_string(),
                                offset: start,
                                bytes: end - start,
                            });
                        }
                        effects.resolve(request, &entry, ready);
                    }
                }
            } else {
                let cached = inner.cache.get(url).and_then(|entry| {
                    let guard = entry.read();
                    if !guard.is_finished() {
                        return None;
                    }
                    match readiness(&range, &guard) {
                        Readiness::NeedsHead | Readiness::Waiting => None,
                        ready => Some((entry.clone(), ready)),
                    }
                });

                match cached {
                    Some((entry, ready)) => {
                        let guard = entry.read();
                        if let Readiness::Ready { start, end } = ready {
                            effects.hits += 1;
                            debug!(request = %id, range = %range, "Request served from cache");
                            effects.events.push(LoaderEvent::CacheHit {
                                url: url.to_string(),
                                offset: start,
                                bytes: end - start,
                            });
                        }
                        effects.resolve(request, &guard, ready);
                    }
                    None => {
                        effects.misses += 1;
                        effects.events.push(LoaderEvent::CacheMiss {
                            url: url.to_string(),
                        });
                        let range_start = (inner.config.range_requests && range.offset > 0)
                            .then_some(range.offset);
                        inner.start_session(&mut state, url, upstream, range_start, vec![request], &mut effects);
                    }
                }
            }
        }

        inner.apply(effects);
        Ok(id)
    }

    /// Withdraw a pending request. The fetch it was waiting on keeps running.
    /// Returns false if the request was already answered or unknown.
    pub fn cancel_pending(&self, id: RequestId) -> bool {
        let mut state = self.inner.state.lock();
        for (url, session) in state.sessions.iter_mut() {
            if let Some(pos) = session.pending.iter().position(|r| r.id == id) {
                session.pending.remove(pos);
                debug!(url = %url, request = %id, "Pending request cancelled");
                return true;
            }
        }
        false
    }

    /// Make sure `url` is fetched into the cache without registering a request.
    /// Running and completed fetches are reused.
    #[instrument(skip(self))]
    pub fn prefetch(&self, url: &str) -> Result<()> {
        let inner = &self.inner;
        if !inner.router.should_intercept(url) {
            return Err(Error::UnsupportedScheme {
                url: url.to_string(),
            });
        }
        let upstream = inner.router.upstream_url(url)?;

        let mut effects = Effects::default();
        {
            let mut state = inner.state.lock();
            if state.sessions.contains_key(url) {
                debug!("Prefetch joined running fetch");
                return Ok(());
            }
            if inner.cache.is_complete(url) {
                debug!("Prefetch satisfied by cache");
                return Ok(());
            }
            inner.start_session(&mut state, url, upstream, None, Vec::new(), &mut effects);
        }
        inner.apply(effects);
        Ok(())
    }

    /// Record the source's request headers for its URL, then prefetch it.
    /// A source without headers clears any recorded for the URL.
    pub fn preload_source(&self, source: &PlaybackSource) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if source.headers.is_empty() {
                state.headers.remove(&source.uri);
            } else {
                let headers = source
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                state.headers.insert(source.uri.clone(), headers);
            }
        }
        self.prefetch(&source.uri)
    }

    /// Current fetch state of `url`
    pub fn fetch_state(&self, url: &str) -> FetchState {
        let state = self.inner.state.lock();
        self.inner.url_state(&state, url)
    }

    /// Response headers of the running fetch for `url`
    pub fn response_meta(&self, url: &str) -> Option<ResponseMeta> {
        self.inner
            .state
            .lock()
            .sessions
            .get(url)
            .and_then(|s| s.meta.clone())
    }

    /// Number of requests waiting on the fetch for `url`
    pub fn pending_count(&self, url: &str) -> usize {
        self.inner
            .state
            .lock()
            .sessions
            .get(url)
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }
}

impl Inner {
    fn url_state(&self, state: &State, url: &str) -> FetchState {
        if let Some(session) = state.sessions.get(url) {
            return session.state;
        }
        if state.failed.contains(url) {
            return FetchState::Failed;
        }
        if self.cache.is_complete(url) {
            return FetchState::Completed;
        }
        FetchState::Idle
    }

    /// Create the session for `url` and queue its fetch
    fn start_session(
        self: &Arc<Self>,
        state: &mut State,
        url: &str,
        upstream: Url,
        range_start: Option<u64>,
        pending: Vec<PendingLoadingRequest>,
        effects: &mut Effects,
    ) {
        let prior = self.url_state(state, url);
        if !prior.can_transition_to(FetchState::Fetching) {
            warn!(url = %url, from = %prior, "Unexpected fetch start");
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        state.failed.remove(url);

        let entry = self.cache.acquire(url, range_start.unwrap_or(0));

        let mut request = FetchRequest::new(upstream.clone());
        if let Some(start) = range_start {
            request = request.with_range_start(start);
        }
        request.headers = state.headers.get(url).cloned().unwrap_or_default();

        let handler: Arc<dyn FetchHandler> = Arc::new(SessionHandler {
            inner: Arc::downgrade(self),
            url: url.to_string(),
            generation,
        });

        info!(url = %url, upstream = %upstream, range_start = ?range_start, generation, "Starting fetch");
        effects.events.push(LoaderEvent::FetchStarted {
            url: url.to_string(),
            upstream: upstream.to_string(),
            range_start,
        });
        effects.fetches.push((request, handler));

        state.sessions.insert(
            url.to_string(),
            FetchSession {
                generation,
                upstream,
                range_start,
                entry,
                meta: None,
                pending,
                state: FetchState::Fetching,
            },
        );
    }

    /// Perform collected side effects; must be called without the state lock
    fn apply(&self, effects: Effects) {
        self.cache.record_lookups(effects.hits, effects.misses);

        for delivery in effects.deliveries {
            delivery.deliver();
        }

        let events = self.events.read().clone();
        if let Some(ref dispatcher) = events {
            for event in effects.events {
                dispatcher.emit(event);
            }
        }

        for (request, handler) in effects.fetches {
            self.client.start_fetch(request, handler);
        }

        if effects.evict {
            let evicted = self.cache.evict_to_budget();
            if !evicted.is_empty() {
                let mut state = self.state.lock();
                for (url, _) in &evicted {
                    if !state.sessions.contains_key(url) {
                        state.headers.remove(url);
                    }
                }
            }
            if let Some(ref dispatcher) = events {
                for (url, bytes) in evicted {
                    dispatcher.emit(LoaderEvent::Evicted { url, bytes });
                }
            }
        }
    }

    /// Session for `url` if `generation` is still the live one
    fn live_session<'a>(
        state: &'a mut State,
        url: &str,
        generation: u64,
    ) -> Option<&'a mut FetchSession> {
        match state.sessions.get_mut(url) {
            Some(session) if session.generation == generation => Some(session),
            _ => {
                debug!(url = %url, generation, "Ignoring event from discarded fetch");
                None
            }
        }
    }

    /// Answer every pending request whose range is now available
    fn drain_ready(session: &mut FetchSession, effects: &mut Effects) {
        let entry = session.entry.read();
        let mut waiting = Vec::with_capacity(session.pending.len());
        for request in session.pending.drain(..) {
            match readiness(&request.range, &entry) {
                Readiness::Waiting | Readiness::NeedsHead => waiting.push(request),
                ready => effects.resolve(request, &entry, ready),
            }
        }
        session.pending = waiting;
    }

    fn handle_response(&self, url: &str, generation: u64, meta: ResponseMeta) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            let Some(session) = Self::live_session(&mut state, url, generation) else {
                return;
            };

            {
                let mut entry = session.entry.write();
                if session.range_start.is_some() && meta.status != 206 {
                    debug!(url = %url, status = meta.status, "Range ignored by server, buffering from start");
                    entry.reset(0);
                    session.range_start = None;
                }
                entry.set_response(meta.content_type.clone(), meta.content_length);
            }
            debug!(
                url = %url,
                status = meta.status,
                content_type = ?meta.content_type,
                content_length = ?meta.content_length,
                "Fetch response"
            );
            session.meta = Some(meta);

            Self::drain_ready(session, &mut effects);

            let info = session.entry.read().content_info();
            for request in session.pending.iter_mut().filter(|r| !r.informed) {
                request.informed = true;
                effects.deliveries.push(Delivery::Info {
                    sink: request.sink.clone(),
                    info: info.clone(),
                });
            }
        }
        self.apply(effects);
    }

    fn handle_data(self: &Arc<Self>, url: &str, generation: u64, data: Bytes) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            let Some(session) = Self::live_session(&mut state, url, generation) else {
                return;
            };

            let appended = session.entry.write().append(&data);
            match appended {
                Ok(()) => Self::drain_ready(session, &mut effects),
                Err(received) => {
                    let declared = session.entry.read().content_length().unwrap_or(0);
                    let error = Error::CacheInconsistency {
                        url: url.to_string(),
                        declared,
                        received,
                    };
                    warn!(url = %url, declared, received, "Received more bytes than declared");
                    self.fail_session(&mut state, url, error, &mut effects);
                }
            }
        }
        self.apply(effects);
    }

    fn handle_finished(self: &Arc<Self>, url: &str, generation: u64) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            let Some(session) = Self::live_session(&mut state, url, generation) else {
                return;
            };

            let short = {
                let entry = session.entry.read();
                match entry.content_length() {
                    Some(declared) if declared != entry.buffered_end() => {
                        Some((declared, entry.buffered_end()))
                    }
                    _ => None,
                }
            };
            if let Some((declared, received)) = short {
                warn!(url = %url, declared, received, "Fetch ended short of declared length");
                let error = Error::CacheInconsistency {
                    url: url.to_string(),
                    declared,
                    received,
                };
                self.fail_session(&mut state, url, error, &mut effects);
                drop(state);
                self.apply(effects);
                return;
            }

            let Some(mut session) = state.sessions.remove(url) else {
                return;
            };
            session.transition(url, FetchState::Completed);

            let mut needs_head = Vec::new();
            {
                let mut entry = session.entry.write();
                entry.finish();
                entry.set_active(false);

                for request in session.pending.drain(..) {
                    match readiness(&request.range, &entry) {
                        Readiness::NeedsHead | Readiness::Waiting => needs_head.push(request),
                        ready => effects.resolve(request, &entry, ready),
                    }
                }

                info!(
                    url = %url,
                    bytes = entry.len(),
                    base_offset = entry.base_offset(),
                    "Fetch completed"
                );
                effects.events.push(LoaderEvent::FetchCompleted {
                    url: url.to_string(),
                    bytes: entry.len() as u64,
                    content_type: entry.content_type().map(str::to_string),
                });
            }

            if !needs_head.is_empty() {
                debug!(url = %url, waiting = needs_head.len(), "Restarting fetch from the first byte");
                self.start_session(&mut state, url, session.upstream, None, needs_head, &mut effects);
            }
            effects.evict = true;
        }
        self.apply(effects);
    }

    fn handle_error(self: &Arc<Self>, url: &str, generation: u64, error: Error) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock();
            if Self::live_session(&mut state, url, generation).is_none() {
                return;
            }
            warn!(url = %url, error = %error, "Fetch failed");
            self.fail_session(&mut state, url, error, &mut effects);
        }
        self.apply(effects);
    }

    /// Discard the session and its cache entry, failing every pending request
    fn fail_session(&self, state: &mut State, url: &str, error: Error, effects: &mut Effects) {
        let Some(mut session) = state.sessions.remove(url) else {
            return;
        };
        session.transition(url, FetchState::Failed);
        session.entry.write().set_active(false);
        self.cache.remove(url);
        state.failed.insert(url.to_string());

        let pending_failed = session.pending.len();
        for request in session.pending.drain(..) {
            effects.deliveries.push(Delivery::Fail {
                sink: request.sink,
                error: error.clone(),
            });
        }

        effects.events.push(LoaderEvent::FetchFailed {
            url: url.to_string(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            pending_failed,
        });
        effects.evict = true;
    }
}

/// Routes one fetch's network events back to the coordinator
struct SessionHandler {
    inner: Weak<Inner>,
    url: String,
    generation: u64,
}

impl FetchHandler for SessionHandler {
    fn on_response(&self, meta: ResponseMeta) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_response(&self.url, self.generation, meta);
        }
    }

    fn on_data(&self, data: Bytes) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_data(&self.url, self.generation, data);
        }
    }

    fn on_finished(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_finished(&self.url, self.generation);
        }
    }

    fn on_error(&self, error: Error) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_error(&self.url, self.generation, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(base: u64, len: usize, content_length: Option<u64>, finished: bool) -> AssetCacheEntry {
        let mut entry = AssetCacheEntry::new();
        entry.reset(base);
        entry.set_response(None, content_length);
        entry.append(&vec![0u8; len]).unwrap();
        if finished {
            entry.finish();
        }
        entry
    }

    #[test]
    fn test_readiness_waits_for_full_range() {
        let e = entry(0, 500, Some(1000), false);
        assert_eq!(readiness(&RequestedRange::new(900, 100), &e), Readiness::Waiting);
        assert_eq!(
            readiness(&RequestedRange::new(100, 400), &e),
            Readiness::Ready { start: 100, end: 500 }
        );
    }

    #[test]
    fn test_readiness_clamps_to_known_length() {
        let e = entry(0, 1000, Some(1000), false);
        assert_eq!(
            readiness(&RequestedRange::new(900, 500), &e),
            Readiness::Ready { start: 900, end: 1000 }
        );
    }

    #[test]
    fn test_readiness_to_end_with_unknown_length_waits_for_completion() {
        let e = entry(0, 800, None, false);
        assert_eq!(readiness(&RequestedRange::to_end(0), &e), Readiness::Waiting);

        let e = entry(0, 800, None, true);
        assert_eq!(
            readiness(&RequestedRange::to_end(0), &e),
            Readiness::Ready { start: 0, end: 800 }
        );
    }

    #[test]
    fn test_readiness_offset_past_known_length() {
        let e = entry(0, 0, Some(100), false);
        assert_eq!(
            readiness(&RequestedRange::new(101, 10), &e),
            Readiness::Unsatisfiable { content_length: 100 }
        );
        // Offset at the end is an empty answer, not an error
        let e = entry(0, 100, Some(100), true);
        assert_eq!(
            readiness(&RequestedRange::to_end(100), &e),
            Readiness::Ready { start: 100, end: 100 }
        );
    }

    #[test]
    fn test_readiness_below_range_start() {
        let e = entry(100, 50, Some(150), false);
        assert_eq!(readiness(&RequestedRange::new(0, 10), &e), Readiness::Waiting);
        let e = entry(100, 50, Some(150), true);
        assert_eq!(readiness(&RequestedRange::new(0, 10), &e), Readiness::NeedsHead);
    }
}
