use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::{CoreEvent, GatedSink};

// Set to false to silence the sampler loop
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Calibration for one indicator model. The defaults match a device that
/// prints its reading as a 6+ digit field a few times per second; other
/// indicators may need different values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerConfig {
    /// Length of one majority-vote window.
    pub window_ms: u64,
    /// Digits (decimal point excluded) a run needs to count as a reading.
    pub min_digits: usize,
    /// How long the sampler sleeps when the line queue is empty.
    pub poll_interval_ms: u64,
    /// Consecutive read failures before a degraded-link notice is emitted.
    pub degraded_after_failures: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window_ms: 20_000,
            min_digits: 6,
            poll_interval_ms: 50,
            degraded_after_failures: 25,
        }
    }
}

impl SamplerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// One numeric candidate pulled out of a raw line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSample {
    pub value: f64,
    pub received_at: Instant,
}

/// Representative weight of a closed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowResult {
    pub weight: f64,
    pub votes: usize,
    pub candidates: usize,
}

/// The last weight the sampler published, with wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightReading {
    pub weight: f64,
    pub captured_at: DateTime<Local>,
}

/// Extracts reading candidates from one raw line.
///
/// Everything except digits and `.` is stripped first, then each maximal
/// digit run (optionally with one embedded decimal point) is a candidate if
/// it carries at least `min_digits` digits.
pub fn extract_candidates(line: &str, min_digits: usize) -> Vec<f64> {
    let cleaned: Vec<char> = line
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut candidates = Vec::new();
    let mut i = 0;
    while i < cleaned.len() {
        if !cleaned[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        while i < cleaned.len() && cleaned[i].is_ascii_digit() {
            i += 1;
        }
        if i < cleaned.len() && cleaned[i] == '.' {
            i += 1;
            while i < cleaned.len() && cleaned[i].is_ascii_digit() {
                i += 1;
            }
        }

        let run: String = cleaned[start..i].iter().collect();
        let digits = run.chars().filter(|c| c.is_ascii_digit()).count();
        if digits >= min_digits {
            if let Ok(value) = run.parse::<f64>() {
                candidates.push(value);
            }
        }
    }

    candidates
}

/// Frequency count of candidates within one window, in first-seen order.
#[derive(Debug, Default)]
pub struct WindowTally {
    counts: Vec<(f64, usize)>,
    samples: usize,
    opened_at: Option<Instant>,
}

impl WindowTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: WeightSample) {
        self.opened_at.get_or_insert(sample.received_at);
        self.samples += 1;
        match self
            .counts
            .iter_mut()
            .find(|(value, _)| *value == sample.value)
        {
            Some((_, count)) => *count += 1,
            None => self.counts.push((sample.value, 1)),
        }
    }

    /// Instant of the first candidate in the window.
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Most frequent value; ties go to whichever value was seen first.
    pub fn winner(&self) -> Option<WindowResult> {
        let mut best: Option<(f64, usize)> = None;
        for &(value, count) in &self.counts {
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((value, count));
            }
        }

        best.map(|(weight, votes)| WindowResult {
            weight,
            votes,
            candidates: self.samples,
        })
    }
}

/// Latest published reading for one connection.
#[derive(Debug, Default)]
pub struct LatestWeight {
    reading: Mutex<Option<WeightReading>>,
}

impl LatestWeight {
    pub fn get(&self) -> Option<WeightReading> {
        *self.reading.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, reading: WeightReading) {
        *self.reading.lock().unwrap_or_else(|e| e.into_inner()) = Some(reading);
    }
}

pub(crate) struct WeightSampler {
    pub config: SamplerConfig,
    pub lines: UnboundedReceiver<String>,
    pub events: Arc<GatedSink>,
    pub latest: Arc<LatestWeight>,
    pub cancel: CancellationToken,
}

impl WeightSampler {
    /// Reduces the line queue to one weight per window until cancelled.
    /// A window opens on the first line after the previous one closed; a
    /// window cut short by cancellation is discarded.
    pub async fn run(mut self) {
        log_info!(
            "weight sampler started (window {}ms, min {} digits)",
            self.config.window_ms,
            self.config.min_digits
        );

        loop {
            let first = tokio::select! {
                _ = self.cancel.cancelled() => break,
                line = self.lines.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            let mut tally = WindowTally::new();
            self.ingest(&first, &mut tally);

            if !self.fill_window(&mut tally).await {
                break;
            }
            self.publish(&tally);
        }

        log_info!("weight sampler shutting down");
    }

    /// Returns false if cancelled before the window closed.
    async fn fill_window(&mut self, tally: &mut WindowTally) -> bool {
        let deadline = Instant::now() + self.config.window();
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = time::sleep_until(deadline) => break,
                _ = ticker.tick() => self.drain(tally),
            }
        }

        self.drain(tally);
        true
    }

    fn drain(&mut self, tally: &mut WindowTally) {
        while let Ok(line) = self.lines.try_recv() {
            self.ingest(&line, tally);
        }
    }

    fn ingest(&self, line: &str, tally: &mut WindowTally) {
        let received_at = Instant::now();
        for value in extract_candidates(line, self.config.min_digits) {
            tally.record(WeightSample { value, received_at });
        }
    }

    fn publish(&self, tally: &WindowTally) {
        let Some(result) = tally.winner() else {
            log_debug!("window closed without candidates");
            return;
        };

        let span_ms = tally
            .opened_at()
            .map(|opened| opened.elapsed().as_millis())
            .unwrap_or_default();
        log_info!(
            "window weight {} ({} of {} candidates over {span_ms}ms)",
            result.weight,
            result.votes,
            result.candidates
        );

        self.latest.set(WeightReading {
            weight: result.weight,
            captured_at: Local::now(),
        });
        self.events.emit(CoreEvent::WeightUpdated {
            weight: result.weight,
        });
    }
}
