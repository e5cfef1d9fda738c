use std::collections::BTreeMap;
use std::time::Instant;

/// Sink for stream loop events that are not part of a frame's result:
/// stage timings, per-frame metrics, progress and operator messages.
pub trait PipelineLogger: Send {
    /// Frame `current` is done. `total` is 0 when the stream length is unknown.
    fn progress(&mut self, current: usize, total: usize);

    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Point-in-time value such as detections or live tracks in a frame.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// End-of-run report. Default: no-op.
    fn summary(&self) {}
}

/// Discards everything.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running aggregate of one timing stage or metric.
///
/// Streams can run indefinitely, so samples are folded in rather than kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Series {
    pub count: usize,
    pub total: f64,
    pub max: f64,
}

impl Series {
    fn record(&mut self, value: f64) {
        self.max = if self.count == 0 { value } else { self.max.max(value) };
        self.count += 1;
        self.total += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Logs throttled progress through `log` and prints a per-stage summary
/// when the run ends.
pub struct StdoutPipelineLogger {
    throttle_frames: usize,
    timings: BTreeMap<String, Series>,
    metrics: BTreeMap<String, Series>,
    started: Instant,
    frames_seen: usize,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            started: Instant::now(),
            frames_seen: 0,
        }
    }

    /// `None` until at least one timing or metric has been recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_s = self.started.elapsed().as_secs_f64();
        let mut out = format!(
            "Stream summary ({} frames, {elapsed_s:.1}s total):",
            self.frames_seen
        );
        for (stage, s) in &self.timings {
            out.push_str(&format!(
                "\n  {stage:12}: avg {:6.1}ms  max {:6.1}ms  total {:7.0}ms",
                s.mean(),
                s.max,
                s.total
            ));
        }
        for (name, s) in &self.metrics {
            out.push_str(&format!("\n  {name}: avg {:.1}  max {:.0}", s.mean(), s.max));
        }
        if self.frames_seen > 0 && elapsed_s > 0.0 {
            out.push_str(&format!(
                "\n  Throughput: {:.1} fps",
                self.frames_seen as f64 / elapsed_s
            ));
        }
        Some(out)
    }

    pub fn timing_series(&self, stage: &str) -> Option<Series> {
        self.timings.get(stage).copied()
    }

    pub fn metric_series(&self, name: &str) -> Option<Series> {
        self.metrics.get(name).copied()
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.frames_seen = self.frames_seen.max(current);
        let due = current % self.throttle_frames == 0 || (total > 0 && current == total);
        if !due {
            return;
        }
        if total > 0 {
            log::info!(
                "Processed {current}/{total} frames ({:.1}%)",
                current as f64 / total as f64 * 100.0
            );
        } else {
            log::info!("Processed {current} frames");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .record(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().record(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
