use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One accepted vital-signs sample, emitted only when it differs
/// meaningfully from the last saved sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Seconds since session start.
    pub session_time_s: f64,
    pub heart_rate_bpm: f64,
    pub respiration_rate_bpm: f64,
    /// Median-smoothed range to subject, meters.
    pub range_m: f64,
    pub heart_waveform: f64,
    pub breath_waveform: f64,
    pub heart_rate_fft: f64,
    pub breath_rate_fft: f64,
}

/// Aggregate statistics for one capture session.
///
/// Always produced at session end, even when nothing was saved; in that case
/// the ratio and averages are `None` rather than a division by zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub packet_count: u64,
    pub data_saved: u64,
    pub data_skipped: u64,
    pub bytes_read: u64,
    pub sync_attempts: u64,
    /// `data_saved / (data_saved + data_skipped)`, if any sample was decided.
    pub save_ratio: Option<f64>,
    pub avg_heart_rate_bpm: Option<f64>,
    pub avg_respiration_rate_bpm: Option<f64>,
    pub avg_range_m: Option<f64>,
    /// Sample standard deviation of saved ranges (needs >= 2 saved samples).
    pub range_stddev_m: Option<f64>,
}

impl SessionSummary {
    /// Save ratio as a percentage for display, `None` when undefined.
    pub fn save_ratio_percent(&self) -> Option<f64> {
        self.save_ratio.map(|r| r * 100.0)
    }
}
