//! Metrics sources: where per-worker samples come from.
//!
//! The stats feed is a handful of `Label value` lines written by a
//! sidecar next to each worker, for example:
//!
//! ```text
//! Cpu: 0.01%
//! Memory: 12.58MiB
//! MemoryUsage: 0.21%
//! InputTraffic: 1.82kB
//! OutPutTraffic: 9.1kB
//! BusyThreadsCount: 1
//! ProcessingReqTime: 200
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::trace;

use fleet_core::WorkerMetrics;

/// Supplies the latest sample for a worker.
///
/// `None` means the sample is not (yet) available. Sources must tolerate
/// being polled repeatedly.
pub trait MetricsSource: Send + Sync {
    fn sample(&self, worker_id: &str) -> impl Future<Output = Option<WorkerMetrics>> + Send;
}

/// Reads samples from `<dir>/<worker_id>`.
#[derive(Debug, Clone)]
pub struct FileMetricsSource {
    dir: PathBuf,
}

impl FileMetricsSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, worker_id: &str) -> PathBuf {
        self.dir.join(worker_id)
    }
}

impl MetricsSource for FileMetricsSource {
    async fn sample(&self, worker_id: &str) -> Option<WorkerMetrics> {
        let path = self.path_for(worker_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                trace!(worker = %worker_id, ?path, error = %e, "stats feed not readable");
                return None;
            }
        };
        let sample = parse_sample(&content);
        if sample.is_none() {
            trace!(worker = %worker_id, ?path, "stats feed incomplete");
        }
        sample
    }
}

/// Parse a stats feed into a sample.
///
/// Returns `None` unless all six fields are present and valid. Labels
/// are matched case-insensitively; unknown labels (including the raw
/// `Memory` line) are ignored.
pub fn parse_sample(content: &str) -> Option<WorkerMetrics> {
    let mut cpu = None;
    let mut memory_usage = None;
    let mut inbound = None;
    let mut outbound = None;
    let mut busy = None;
    let mut processing = None;

    for line in content.lines() {
        let Some((label, value)) = split_line(line) else {
            continue;
        };
        match label.to_ascii_lowercase().as_str() {
            "cpu" => cpu = Some(parse_percent(value)?),
            "memoryusage" => memory_usage = Some(parse_percent(value)?),
            "inputtraffic" => inbound = Some(parse_bytes(value)?),
            "outputtraffic" => outbound = Some(parse_bytes(value)?),
            "busythreadscount" => busy = Some(value.parse::<u32>().ok()?),
            "processingreqtime" => processing = Some(parse_millis(value)?),
            _ => {}
        }
    }

    Some(WorkerMetrics {
        cpu_percent: cpu?,
        memory_usage_percent: memory_usage?,
        inbound_traffic: inbound?,
        outbound_traffic: outbound?,
        busy_worker_threads: busy?,
        avg_request_processing_ms: processing?,
    })
}

/// Split `Label: value` or `Label value` into its two parts.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (label, rest) = match line.split_once(':') {
        Some((label, rest)) => (label.trim(), rest),
        None => line.split_once(char::is_whitespace)?,
    };
    let value = rest.split_whitespace().next()?;
    Some((label, value))
}

fn parse_percent(s: &str) -> Option<f64> {
    non_negative(s.trim_end_matches('%').parse::<f64>().ok()?)
}

fn parse_millis(s: &str) -> Option<u64> {
    s.strip_suffix("ms").unwrap_or(s).parse::<u64>().ok()
}

/// Parse a traffic counter like "1.82kB", "12.58MiB" or "0B" into bytes.
fn parse_bytes(s: &str) -> Option<f64> {
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value = number.parse::<f64>().ok()?;
    let multiplier = match unit {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    non_negative(value * multiplier)
}

fn non_negative(v: f64) -> Option<f64> {
    (v.is_finite() && v >= 0.0).then_some(v)
}
