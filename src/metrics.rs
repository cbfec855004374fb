//! Request Instrumentation Recorder.
//!
//! Times each chat dispatch from `start` to `complete` and keeps the most
//! recent samples in a bounded ring. The processing-rate figure is a
//! heuristic, not a token count:
//!
//! ```text
//! token_equivalents = chars / 5 * 1.3
//! derived_rate      = token_equivalents / elapsed_seconds   (0 if elapsed is 0)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// Identifies one dispatch between `start` and `complete`.
pub type RequestId = u64;

const CHARS_PER_WORD: f64 = 5.0;
const TOKENS_PER_WORD: f64 = 1.3;

/// One completed dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub request_id: RequestId,
    pub started_at: SystemTime,
    pub completed_at: SystemTime,
    /// Total wall time from `start` to `complete`.
    pub latency: Duration,
    /// Estimated token-equivalents per second.
    pub derived_rate: f64,
    /// Reply length in characters.
    pub response_length: usize,
    /// Server-reported inference time, when the backend sends one.
    pub inference_time: Option<Duration>,
    /// `latency - inference_time`, when the latter is known.
    pub network_overhead: Option<Duration>,
    pub model_info: Option<String>,
}

/// Averages over the retained samples, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSummary {
    pub count: usize,
    pub avg_latency_ms: f64,
    /// Over samples that carry an inference time only.
    pub avg_inference_ms: Option<f64>,
    pub avg_network_overhead_ms: Option<f64>,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return write!(f, "no requests recorded");
        }
        write!(f, "{} request(s), avg total {:.0} ms", self.count, self.avg_latency_ms)?;
        if let Some(ms) = self.avg_inference_ms {
            write!(f, ", avg inference {:.0} ms", ms)?;
        }
        if let Some(ms) = self.avg_network_overhead_ms {
            write!(f, ", avg network {:.0} ms", ms)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    started: Instant,
    started_at: SystemTime,
}

/// Bounded recorder of dispatch timings.
#[derive(Debug)]
pub struct MetricsRecorder {
    enabled: bool,
    capacity: usize,
    in_flight: HashMap<RequestId, InFlight>,
    samples: VecDeque<MetricSample>,
}

impl MetricsRecorder {
    /// Recorder keeping at most `capacity` samples (at least one).
    pub fn new(enabled: bool, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            enabled,
            capacity,
            in_flight: HashMap::new(),
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turning instrumentation off discards every in-flight start; their
    /// later `complete` calls become no-ops.
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.in_flight.clear();
        }
        self.enabled = enabled;
    }

    /// Record the start of `id`. No-op while disabled.
    pub fn start(&mut self, id: RequestId) {
        if !self.enabled {
            return;
        }
        self.in_flight.insert(
            id,
            InFlight {
                started: Instant::now(),
                started_at: SystemTime::now(),
            },
        );
    }

    /// Close `id` and append its sample. No-op while disabled or if `id` was
    /// never started.
    pub fn complete(
        &mut self,
        id: RequestId,
        response_text: &str,
        model_info: Option<&str>,
        inference_time: Option<Duration>,
    ) -> Option<&MetricSample> {
        self.complete_at(id, Instant::now(), response_text, model_info, inference_time)
    }

    /// Forget `id` without recording anything.
    pub fn abandon(&mut self, id: RequestId) {
        if self.in_flight.remove(&id).is_some() {
            debug!("Request {} abandoned; no sample recorded", id);
        }
    }

    /// Retained samples, newest first.
    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        let count = self.samples.len();
        if count == 0 {
            return MetricsSummary::default();
        }
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let avg_of = |values: Vec<f64>| -> Option<f64> {
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };

        MetricsSummary {
            count,
            avg_latency_ms: self.samples.iter().map(|s| ms(s.latency)).sum::<f64>() / count as f64,
            avg_inference_ms: avg_of(
                self.samples.iter().filter_map(|s| s.inference_time).map(ms).collect(),
            ),
            avg_network_overhead_ms: avg_of(
                self.samples.iter().filter_map(|s| s.network_overhead).map(ms).collect(),
            ),
        }
    }

    fn complete_at(
        &mut self,
        id: RequestId,
        now: Instant,
        response_text: &str,
        model_info: Option<&str>,
        inference_time: Option<Duration>,
    ) -> Option<&MetricSample> {
        if !self.enabled {
            return None;
        }
        let flight = self.in_flight.remove(&id)?;
        let latency = now.saturating_duration_since(flight.started);
        let response_length = response_text.chars().count();

        let sample = MetricSample {
            request_id: id,
            started_at: flight.started_at,
            completed_at: flight.started_at + latency,
            latency,
            derived_rate: derived_rate(response_length, latency),
            response_length,
            inference_time,
            network_overhead: inference_time.map(|inf| latency.saturating_sub(inf)),
            model_info: model_info.map(str::to_string),
        };
        debug!(
            "Request {}: {} ms, {} chars, {:.1} tok/s",
            id,
            latency.as_millis(),
            response_length,
            sample.derived_rate
        );

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.samples.back()
    }
}

/// Token-equivalents per second for a reply of `chars` characters.
pub fn derived_rate(chars: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (chars as f64 / CHARS_PER_WORD * TOKENS_PER_WORD) / secs
}
