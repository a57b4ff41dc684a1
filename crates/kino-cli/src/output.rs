//! Output formatting for CLI

use kino_loader::{LoaderEvent, LoaderEventRecord};
use serde::Serialize;
use std::fmt::Display;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Format a report based on selected format
pub fn format_output<T: Serialize + Display>(data: &T, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => data.to_string(),
    }
}

/// One line per loader event
pub fn format_event(record: &LoaderEventRecord, format: &str) -> String {
    if OutputFormat::from(format) == OutputFormat::Json {
        return serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
    }

    let detail = match &record.event {
        LoaderEvent::CacheHit { offset, bytes, .. } => {
            format!("cache hit: {} bytes at {}", bytes, offset)
        }
        LoaderEvent::CacheMiss { .. } => "cache miss".to_string(),
        LoaderEvent::FetchStarted { upstream, range_start, .. } => match range_start {
            Some(start) => format!("fetching {} from byte {}", upstream, start),
            None => format!("fetching {}", upstream),
        },
        LoaderEvent::FetchCompleted { bytes, content_type, .. } => format!(
            "fetch completed: {} ({})",
            format_bytes(*bytes),
            content_type.as_deref().unwrap_or("unknown type")
        ),
        LoaderEvent::FetchFailed { code, message, pending_failed, .. } => format!(
            "fetch failed [{}]: {} ({} pending requests failed)",
            code, message, pending_failed
        ),
        LoaderEvent::Evicted { url, bytes } => {
            format!("evicted {} ({})", url, format_bytes(*bytes))
        }
    };
    format!(
        "[{}] #{} {}",
        record.timestamp.format("%H:%M:%S"),
        record.sequence,
        detail
    )
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Hex dump of the first `max` bytes
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out: Vec<String> = data.iter().take(max).map(|b| format!("{:02x}", b)).collect();
    if data.len() > max {
        out.push("..".to_string());
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 + 512 * 1024), "3.5 MiB");
    }

    #[test]
    fn test_hex_preview() {
        assert_eq!(hex_preview(&[0x00, 0x1f, 0xff], 8), "00 1f ff");
        assert_eq!(hex_preview(&[1, 2, 3], 2), "01 02 ..");
        assert_eq!(hex_preview(&[], 4), "");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Text);
    }
}
