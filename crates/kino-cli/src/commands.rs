//! CLI command implementations

use crate::output::{format_bytes, format_event, format_output, hex_preview};
use anyhow::{bail, Context};
use kino_loader::{
    collect_response, CacheStats, ChannelSink, EventDispatcher, LoaderConfig, LoaderEvent,
    LoadingCoordinator, PlaybackSource, RequestedRange, SchemeRouter,
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Serialize)]
pub struct CheckReport {
    url: String,
    intercepted: bool,
    upstream: Option<String>,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "URL: {}", self.url)?;
        match &self.upstream {
            Some(upstream) => {
                writeln!(f, "  Intercepted: yes")?;
                write!(f, "  Upstream: {}", upstream)
            }
            None => write!(f, "  Intercepted: no (left to the platform)"),
        }
    }
}

/// Report how a URL would be routed
pub fn check(config: &LoaderConfig, url: &str, format: &str) -> anyhow::Result<()> {
    let router = SchemeRouter::new(config.schemes.clone());
    let intercepted = router.should_intercept(url);
    let upstream = if intercepted {
        Some(router.upstream_url(url)?.to_string())
    } else {
        None
    };

    let report = CheckReport {
        url: url.to_string(),
        intercepted,
        upstream,
    };
    println!("{}", format_output(&report, format));
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PrefetchReport {
    url: String,
    bytes: u64,
    content_type: Option<String>,
    elapsed_ms: u128,
    cache: CacheStats,
}

impl fmt::Display for PrefetchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nPrefetch complete: {}", self.url)?;
        writeln!(f, "  Size: {}", format_bytes(self.bytes))?;
        writeln!(
            f,
            "  Content type: {}",
            self.content_type.as_deref().unwrap_or("unknown")
        )?;
        writeln!(f, "  Elapsed: {}ms", self.elapsed_ms)?;
        write!(
            f,
            "  Cache: {} entries, {} used",
            self.cache.entry_count,
            format_bytes(self.cache.bytes_used)
        )
    }
}

/// Fetch an asset into the cache, printing loader events as they happen
pub async fn prefetch(
    config: LoaderConfig,
    url: &str,
    headers: &[String],
    format: &str,
) -> anyhow::Result<()> {
    let mut source = PlaybackSource::new(url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("invalid header '{}', expected 'Name: value'", header))?;
        source = source.with_header(name.trim(), value.trim());
    }

    let dispatcher = Arc::new(EventDispatcher::new(config.event_capacity));
    let mut events = dispatcher.subscribe();
    let coordinator = LoadingCoordinator::with_http_client(config)?;
    coordinator.set_event_dispatcher(dispatcher);

    let start = Instant::now();
    coordinator.preload_source(&source)?;

    if coordinator.cache().is_complete(url) {
        println!("Already cached: {}", url);
    } else {
        loop {
            match events.recv().await {
                Ok(record) => {
                    println!("{}", format_event(&record, format));
                    match record.event {
                        LoaderEvent::FetchCompleted { .. } => break,
                        LoaderEvent::FetchFailed { message, .. } => {
                            bail!("prefetch of {} failed: {}", url, message)
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event feed lagged");
                }
                Err(RecvError::Closed) => bail!("event feed closed before the fetch finished"),
            }
        }
    }

    let (bytes, content_type) = coordinator
        .cache()
        .get(url)
        .map(|entry| {
            let entry = entry.read();
            (entry.len() as u64, entry.content_type().map(str::to_string))
        })
        .unwrap_or((0, None));

    let report = PrefetchReport {
        url: url.to_string(),
        bytes,
        content_type,
        elapsed_ms: start.elapsed().as_millis(),
        cache: coordinator.cache().stats(),
    };
    println!("{}", format_output(&report, format));
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ReadReport {
    request: String,
    url: String,
    range: String,
    bytes: usize,
    content_type: Option<String>,
    content_length: Option<u64>,
    output: Option<PathBuf>,
    preview: String,
    elapsed_ms: u128,
}

impl fmt::Display for ReadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Read {} of {}", self.range, self.url)?;
        writeln!(f, "  Request: {}", self.request)?;
        writeln!(f, "  Received: {}", format_bytes(self.bytes as u64))?;
        writeln!(
            f,
            "  Content type: {}",
            self.content_type.as_deref().unwrap_or("unknown")
        )?;
        match self.content_length {
            Some(len) => writeln!(f, "  Content length: {}", len)?,
            None => writeln!(f, "  Content length: unknown")?,
        }
        if let Some(path) = &self.output {
            writeln!(f, "  Written to: {}", path.display())?;
        }
        writeln!(f, "  First bytes: {}", self.preview)?;
        write!(f, "  Elapsed: {}ms", self.elapsed_ms)
    }
}

/// Read a byte range through the loading coordinator
pub async fn read(
    config: LoaderConfig,
    url: &str,
    offset: u64,
    length: Option<u64>,
    output: Option<PathBuf>,
    format: &str,
) -> anyhow::Result<()> {
    let coordinator = LoadingCoordinator::with_http_client(config)?;
    let range = match length {
        Some(length) => RequestedRange::new(offset, length),
        None => RequestedRange::to_end(offset),
    };

    let start = Instant::now();
    let (sink, mut rx) = ChannelSink::new();
    let id = coordinator.register_pending(url, range, Arc::new(sink))?;
    let response = collect_response(&mut rx)
        .await
        .with_context(|| format!("read of {} {} failed", url, range))?;

    if let Some(path) = &output {
        std::fs::write(path, &response.data)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let info = response.info.unwrap_or_default();
    let report = ReadReport {
        request: id.to_string(),
        url: url.to_string(),
        range: range.to_string(),
        bytes: response.data.len(),
        content_type: info.content_type,
        content_length: info.content_length,
        output,
        preview: hex_preview(&response.data, 16),
        elapsed_ms: start.elapsed().as_millis(),
    };
    println!("{}", format_output(&report, format));
    Ok(())
}
