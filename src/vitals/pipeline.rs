use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use super::extract::VitalSignsFields;
use super::range::RangeTracker;
use super::record::{SessionSummary, VitalRecord};

/// Physiological bounds and change-detection thresholds.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Heart rate validity band, bpm (inclusive).
    pub hr_min: f64,
    pub hr_max: f64,
    /// Respiration rate validity band, bpm (inclusive).
    pub rr_min: f64,
    pub rr_max: f64,
    /// A sample is persisted when any delta meets its threshold.
    pub hr_change_threshold: f64,
    pub rr_change_threshold: f64,
    pub range_change_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hr_min: 30.0,
            hr_max: 200.0,
            rr_min: 5.0,
            rr_max: 50.0,
            hr_change_threshold: 2.0,
            rr_change_threshold: 1.0,
            range_change_threshold: 0.05,
        }
    }
}

/// Running mean/variance accumulator (Welford) for the saved ranges.
#[derive(Debug, Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    fn sample_stddev(&self) -> Option<f64> {
        (self.count >= 2).then(|| (self.m2 / (self.count - 1) as f64).sqrt())
    }
}

/// Stateful session pipeline: range disambiguation, physiological
/// validation with last-known-good substitution, and the change-triggered
/// save decision.
///
/// All mutable session state lives here, owned by the single processing
/// loop; a fresh pipeline means a fresh session.
pub struct VitalsPipeline {
    config: PipelineConfig,
    session_id: Uuid,
    started_at: DateTime<Utc>,

    tracker: RangeTracker,

    last_valid_hr: Option<f64>,
    last_valid_rr: Option<f64>,

    last_saved_hr: Option<f64>,
    last_saved_rr: Option<f64>,
    last_saved_range: Option<f64>,

    packet_count: u64,
    data_saved: u64,
    data_skipped: u64,

    saved_hr_sum: f64,
    saved_rr_sum: f64,
    saved_range_stats: RunningStats,

    record_queue: VecDeque<VitalRecord>,
}

impl VitalsPipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            tracker: RangeTracker::new(),
            last_valid_hr: None,
            last_valid_rr: None,
            last_saved_hr: None,
            last_saved_rr: None,
            last_saved_range: None,
            packet_count: 0,
            data_saved: 0,
            data_skipped: 0,
            saved_hr_sum: 0.0,
            saved_rr_sum: 0.0,
            saved_range_stats: RunningStats::default(),
            record_queue: VecDeque::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Count a fully read frame, whether or not it carries a usable TLV.
    pub fn frame_received(&mut self) {
        self.packet_count += 1;
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn data_saved(&self) -> u64 {
        self.data_saved
    }

    pub fn data_skipped(&self) -> u64 {
        self.data_skipped
    }

    /// Run one decoded vital-signs TLV through validation, smoothing, and
    /// the save decision. Accepted records land in the output queue.
    pub fn process(&mut self, fields: &VitalSignsFields, session_time_s: f64) {
        let estimate = self.tracker.resolve(&fields.range_candidates);

        let mut heart_rate = fields.heart_rate_fft;
        let mut breath_rate = fields.breath_rate_fft;

        let mut hr_valid = (self.config.hr_min..=self.config.hr_max).contains(&heart_rate);
        let mut rr_valid = (self.config.rr_min..=self.config.rr_max).contains(&breath_rate);

        // Substitute the last physiologically valid reading for an invalid
        // one; the substituted value counts as valid downstream.
        if !hr_valid {
            if let Some(last) = self.last_valid_hr {
                trace!(heart_rate, substituted = last, "heart rate out of band");
                heart_rate = last;
                hr_valid = true;
            }
        }
        if !rr_valid {
            if let Some(last) = self.last_valid_rr {
                trace!(breath_rate, substituted = last, "respiration rate out of band");
                breath_rate = last;
                rr_valid = true;
            }
        }

        if !(hr_valid && rr_valid) {
            // No fallback exists yet: drop the sample. It still counted
            // toward packet_count, nothing else.
            debug!(heart_rate, breath_rate, "dropping sample with no valid fallback");
            return;
        }

        self.last_valid_hr = Some(heart_rate);
        self.last_valid_rr = Some(breath_rate);

        let should_save = match (self.last_saved_hr, self.last_saved_rr, self.last_saved_range) {
            (Some(saved_hr), Some(saved_rr), Some(saved_range)) => {
                (heart_rate - saved_hr).abs() >= self.config.hr_change_threshold
                    || (breath_rate - saved_rr).abs() >= self.config.rr_change_threshold
                    || (estimate.smoothed_m - saved_range).abs()
                        >= self.config.range_change_threshold
            }
            // First validated sample of the session is always saved.
            _ => true,
        };

        if !should_save {
            self.data_skipped += 1;
            return;
        }

        self.data_saved += 1;
        self.last_saved_hr = Some(heart_rate);
        self.last_saved_rr = Some(breath_rate);
        self.last_saved_range = Some(estimate.smoothed_m);

        self.saved_hr_sum += heart_rate;
        self.saved_rr_sum += breath_rate;
        self.saved_range_stats.push(estimate.smoothed_m);

        self.record_queue.push_back(VitalRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_time_s,
            heart_rate_bpm: heart_rate,
            respiration_rate_bpm: breath_rate,
            range_m: estimate.smoothed_m,
            heart_waveform: fields.heart_waveform,
            breath_waveform: fields.breath_waveform,
            heart_rate_fft: fields.heart_rate_fft,
            breath_rate_fft: fields.breath_rate_fft,
        });
    }

    /// Next accepted record, in strict arrival order.
    pub fn pop_record(&mut self) -> Option<VitalRecord> {
        self.record_queue.pop_front()
    }

    /// Finalize the session statistics. Safe to call with zero samples;
    /// undefined ratios come back as `None`.
    pub fn summary(
        &self,
        duration_seconds: f64,
        bytes_read: u64,
        sync_attempts: u64,
    ) -> SessionSummary {
        let decided = self.data_saved + self.data_skipped;
        let save_ratio = (decided > 0).then(|| self.data_saved as f64 / decided as f64);
        let avg_hr = (self.data_saved > 0).then(|| self.saved_hr_sum / self.data_saved as f64);
        let avg_rr = (self.data_saved > 0).then(|| self.saved_rr_sum / self.data_saved as f64);

        SessionSummary {
            session_id: self.session_id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            duration_seconds,
            packet_count: self.packet_count,
            data_saved: self.data_saved,
            data_skipped: self.data_skipped,
            bytes_read,
            sync_attempts,
            save_ratio,
            avg_heart_rate_bpm: avg_hr,
            avg_respiration_rate_bpm: avg_rr,
            avg_range_m: self.saved_range_stats.mean(),
            range_stddev_m: self.saved_range_stats.sample_stddev(),
        }
    }
}

impl Default for VitalsPipeline {
    fn default() -> Self {
        Self::new()
    }
}
