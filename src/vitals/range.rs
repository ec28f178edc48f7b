use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info};

use super::extract::{read_f32_le, read_u32_le};

/// Candidate band: only values in (0.2, 2.5) meters are plausible subjects.
pub const CANDIDATE_MIN_M: f64 = 0.2;
pub const CANDIDATE_MAX_M: f64 = 2.5;

/// Acceptance band for the per-frame resolved range before smoothing.
pub const ACCEPT_MIN_M: f64 = 0.1;
pub const ACCEPT_MAX_M: f64 = 3.0;

/// Fallback when no usable range was resolved this frame.
pub const DEFAULT_RANGE_M: f64 = 0.6;

/// Per-method score history depth.
pub const SCORE_HISTORY_MAX: usize = 30;

/// Smoothing window depth and the fill level at which the median kicks in.
pub const SMOOTH_WINDOW_MAX: usize = 9;
pub const SMOOTH_MIN_SAMPLES: usize = 5;

/// Method selection fires once more than this many ranges were resolved...
pub const SELECTION_MIN_RESOLVED: u64 = 20;
/// ...and at least one method has this many scored samples.
pub const SELECTION_MIN_SCORED: usize = 15;

/// Fixed offsets the TI documentation suggests may hold the target range.
const SPECIFIC_OFFSETS: [usize; 12] = [64, 68, 72, 76, 80, 84, 88, 92, 96, 100, 104, 108];

/// Bin sizes tried when interpreting the range-index field.
const RANGE_IDX_BINS: [f64; 4] = [0.044, 0.04, 0.048, 0.05];

/// One plausible range reading, tagged with the heuristic that produced it.
///
/// The key encodes method and parameter (`float_scan_64`, `range_idx_0.044`,
/// `specific_72`) and identifies a method across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeCandidate {
    pub key: String,
    pub value_m: f64,
}

fn in_candidate_band(v: f64) -> bool {
    v > CANDIDATE_MIN_M && v < CANDIDATE_MAX_M
}

/// Extract range candidates from a vital-signs TLV using three independent
/// heuristics. Generation order matters: the first candidate wins while no
/// method has been selected, so float_scan comes before range_idx before
/// specific.
pub fn extract_candidates(data: &[u8]) -> Vec<RangeCandidate> {
    let mut candidates = Vec::new();

    // Scan every 4-byte-aligned offset in [64, 128) as a float.
    let scan_end = data.len().min(128);
    let mut offset = 64;
    while offset < scan_end {
        if let Some(val) = read_f32_le(data, offset) {
            let val = val as f64;
            if in_candidate_band(val) {
                candidates.push(RangeCandidate {
                    key: format!("float_scan_{offset}"),
                    value_m: val,
                });
            }
        }
        offset += 4;
    }

    // Range-index fallback: bytes [4..8] as a bin index.
    if let Some(idx) = read_u32_le(data, 4) {
        if idx > 1 && idx < 100 {
            for bin in RANGE_IDX_BINS {
                let val = idx as f64 * bin;
                if in_candidate_band(val) {
                    candidates.push(RangeCandidate {
                        key: format!("range_idx_{bin}"),
                        value_m: val,
                    });
                }
            }
        }
    }

    // Fixed offsets from the TI docs.
    for offset in SPECIFIC_OFFSETS {
        if let Some(val) = read_f32_le(data, offset) {
            let val = val as f64;
            if in_candidate_band(val) {
                candidates.push(RangeCandidate {
                    key: format!("specific_{offset}"),
                    value_m: val,
                });
            }
        }
    }

    candidates
}

/// Method-selection lifecycle. The transition to `Selected` is guarded by
/// the variance comparison in [`RangeTracker::resolve`] and happens at most
/// once per session.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    /// No candidate observed yet.
    Idle,
    /// Accumulating per-method score history under first-candidate fallback.
    Scoring,
    /// Committed to one method key for the rest of the session.
    Selected(String),
}

/// Resolved range for one frame: the raw pick and the median-smoothed value
/// used downstream.
#[derive(Debug, Clone, Copy)]
pub struct RangeEstimate {
    pub raw_m: f64,
    pub smoothed_m: f64,
}

/// Tracks competing range-extraction methods across a session and commits to
/// the lowest-variance one once enough history has accumulated.
pub struct RangeTracker {
    state: SelectionState,
    scores: BTreeMap<String, VecDeque<f64>>,
    window: VecDeque<f64>,
    resolved_count: u64,
}

impl RangeTracker {
    pub fn new() -> Self {
        Self {
            state: SelectionState::Idle,
            scores: BTreeMap::new(),
            window: VecDeque::with_capacity(SMOOTH_WINDOW_MAX),
            resolved_count: 0,
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    /// Resolve this frame's range from the candidate set and fold it into
    /// the smoothing window.
    pub fn resolve(&mut self, candidates: &[RangeCandidate]) -> RangeEstimate {
        self.maybe_select_method();

        let mut range_m: Option<f64> = None;

        // A committed method only resolves when a matching candidate is
        // present this frame; it is never backfilled from history.
        if let SelectionState::Selected(key) = &self.state {
            range_m = candidates
                .iter()
                .find(|c| &c.key == key)
                .map(|c| c.value_m);
        }

        // First-candidate fallback, which is also what feeds the scores.
        if range_m.is_none() {
            if let Some(first) = candidates.first() {
                range_m = Some(first.value_m);
                let history = self.scores.entry(first.key.clone()).or_default();
                history.push_back(first.value_m);
                if history.len() > SCORE_HISTORY_MAX {
                    history.pop_front();
                }
                if self.state == SelectionState::Idle {
                    self.state = SelectionState::Scoring;
                }
            }
        }

        let raw_m = match range_m {
            Some(v) if (ACCEPT_MIN_M..=ACCEPT_MAX_M).contains(&v) => v,
            _ => DEFAULT_RANGE_M,
        };

        self.resolved_count += 1;
        self.window.push_back(raw_m);
        if self.window.len() > SMOOTH_WINDOW_MAX {
            self.window.pop_front();
        }

        let smoothed_m = if self.window.len() >= SMOOTH_MIN_SAMPLES {
            median(self.window.iter().copied())
        } else {
            raw_m
        };

        RangeEstimate { raw_m, smoothed_m }
    }

    fn maybe_select_method(&mut self) {
        if matches!(self.state, SelectionState::Selected(_)) {
            return;
        }
        if self.resolved_count <= SELECTION_MIN_RESOLVED {
            return;
        }

        let mut best: Option<(&str, f64)> = None;
        for (key, history) in &self.scores {
            if history.len() < SELECTION_MIN_SCORED {
                continue;
            }
            let variance = sample_variance(history.iter().copied());
            debug!(method = %key, variance, samples = history.len(), "scoring range method");
            if best.map_or(true, |(_, v)| variance < v) {
                best = Some((key.as_str(), variance));
            }
        }

        if let Some((key, variance)) = best {
            info!(method = %key, variance, "selected range extraction method");
            self.state = SelectionState::Selected(key.to_owned());
        }
    }
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Median of a non-empty sequence; the mean of the two middle values for an
/// even count.
fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Unbiased sample variance (n - 1 denominator); zero for fewer than two
/// samples.
fn sample_variance(values: impl Iterator<Item = f64>) -> f64 {
    let samples: Vec<f64> = values.collect();
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlv_with_float(offset: usize, value: f32) -> Vec<u8> {
        let mut data = vec![0u8; 128];
        data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        data
    }

    fn candidate(key: &str, value_m: f64) -> RangeCandidate {
        RangeCandidate {
            key: key.to_string(),
            value_m,
        }
    }

    #[test]
    fn float_scan_filters_to_band() {
        let mut data = vec![0u8; 128];
        data[64..68].copy_from_slice(&1.0f32.to_le_bytes()); // in band
        data[68..72].copy_from_slice(&5.0f32.to_le_bytes()); // too far
        data[72..76].copy_from_slice(&0.1f32.to_le_bytes()); // too close
        data[76..80].copy_from_slice(&2.4f32.to_le_bytes()); // in band

        let candidates = extract_candidates(&data);
        assert!(candidates
            .iter()
            .all(|c| c.value_m > CANDIDATE_MIN_M && c.value_m < CANDIDATE_MAX_M));
        // 1.0 and 2.4 appear via float_scan and again via specific offsets.
        assert!(candidates.iter().any(|c| c.key == "float_scan_64"));
        assert!(candidates.iter().any(|c| c.key == "float_scan_76"));
        assert!(candidates.iter().any(|c| c.key == "specific_64"));
        assert!(!candidates.iter().any(|c| c.key == "float_scan_68"));
    }

    #[test]
    fn range_idx_expands_all_bins() {
        let mut data = vec![0u8; 128];
        data[4..8].copy_from_slice(&10u32.to_le_bytes());

        let candidates = extract_candidates(&data);
        let idx_keys: Vec<_> = candidates
            .iter()
            .filter(|c| c.key.starts_with("range_idx_"))
            .collect();
        assert_eq!(idx_keys.len(), 4);
        assert!((idx_keys[0].value_m - 0.44).abs() < 1e-9);
    }

    #[test]
    fn range_idx_bounds_are_exclusive() {
        let mut data = vec![0u8; 128];
        data[4..8].copy_from_slice(&1u32.to_le_bytes());
        assert!(extract_candidates(&data).is_empty());

        data[4..8].copy_from_slice(&100u32.to_le_bytes());
        assert!(extract_candidates(&data).is_empty());
    }

    #[test]
    fn float_scan_comes_before_range_idx_and_specific() {
        let mut data = tlv_with_float(64, 0.9);
        data[4..8].copy_from_slice(&10u32.to_le_bytes());

        let candidates = extract_candidates(&data);
        assert_eq!(candidates[0].key, "float_scan_64");
        assert!(candidates.last().unwrap().key.starts_with("specific_"));
    }

    #[test]
    fn candidates_ignore_short_tail() {
        // 100-byte TLV: offsets past 96 cannot be read.
        let mut data = vec![0u8; 100];
        data[96..100].copy_from_slice(&1.0f32.to_le_bytes());
        let candidates = extract_candidates(&data);
        assert!(candidates.iter().any(|c| c.key == "float_scan_96"));
        assert!(!candidates.iter().any(|c| c.key.ends_with("_104")));
    }

    #[test]
    fn no_candidates_defaults_to_fallback_range() {
        let mut tracker = RangeTracker::new();
        let est = tracker.resolve(&[]);
        assert_eq!(est.raw_m, DEFAULT_RANGE_M);
        assert_eq!(tracker.state(), &SelectionState::Idle);
    }

    #[test]
    fn first_candidate_wins_and_is_scored() {
        let mut tracker = RangeTracker::new();
        let est = tracker.resolve(&[candidate("float_scan_64", 0.8), candidate("specific_64", 1.2)]);
        assert_eq!(est.raw_m, 0.8);
        assert_eq!(tracker.state(), &SelectionState::Scoring);
    }

    #[test]
    fn median_smoothing_activates_at_five_samples() {
        let mut tracker = RangeTracker::new();
        for v in [1.0, 0.5, 0.6, 0.7] {
            let est = tracker.resolve(&[candidate("specific_64", v)]);
            // Below the median threshold the raw value passes through.
            assert_eq!(est.smoothed_m, v);
        }
        let est = tracker.resolve(&[candidate("specific_64", 0.65)]);
        // median of [1.0, 0.5, 0.6, 0.7, 0.65]
        assert!((est.smoothed_m - 0.65).abs() < 1e-9);
    }

    #[test]
    fn smoothing_window_is_bounded() {
        let mut tracker = RangeTracker::new();
        for _ in 0..20 {
            tracker.resolve(&[candidate("specific_64", 2.0)]);
        }
        let est = tracker.resolve(&[candidate("specific_64", 0.5)]);
        // Window holds the 9 most recent values; one outlier cannot move the
        // median off the plateau.
        assert!((est.smoothed_m - 2.0).abs() < 1e-9);
    }

    #[test]
    fn selects_lowest_variance_method_exactly_once() {
        let mut tracker = RangeTracker::new();
        // Alternate first-candidate between a steady method and a noisy one
        // so both accumulate >= 15 scored samples over 40 frames.
        for i in 0..40u32 {
            if i % 2 == 0 {
                tracker.resolve(&[candidate("specific_64", 0.6)]);
            } else {
                let noisy = 0.5 + 0.09 * f64::from(i % 17);
                tracker.resolve(&[candidate("float_scan_96", noisy)]);
            }
        }
        assert_eq!(
            tracker.state(),
            &SelectionState::Selected("specific_64".to_string())
        );

        // Once selected, the method is never revisited, even if its rival
        // quiets down.
        for _ in 0..40 {
            tracker.resolve(&[candidate("float_scan_96", 0.7)]);
        }
        assert_eq!(
            tracker.state(),
            &SelectionState::Selected("specific_64".to_string())
        );
    }

    #[test]
    fn selection_requires_enough_resolved_frames() {
        let mut tracker = RangeTracker::new();
        for _ in 0..21 {
            tracker.resolve(&[candidate("specific_64", 0.6)]);
        }
        // The gate counts previously resolved frames: 20 is not "more
        // than 20", so the 21st resolve still scores.
        assert_eq!(tracker.state(), &SelectionState::Scoring);
        tracker.resolve(&[candidate("specific_64", 0.6)]);
        assert_eq!(
            tracker.state(),
            &SelectionState::Selected("specific_64".to_string())
        );
    }

    #[test]
    fn selected_method_prefers_matching_candidate() {
        let mut tracker = RangeTracker::new();
        for _ in 0..25 {
            tracker.resolve(&[candidate("specific_64", 0.6)]);
        }
        assert!(matches!(tracker.state(), SelectionState::Selected(_)));

        let est = tracker.resolve(&[
            candidate("float_scan_96", 1.9),
            candidate("specific_64", 0.62),
        ]);
        assert!((est.raw_m - 0.62).abs() < 1e-9);
    }

    #[test]
    fn selected_method_without_match_falls_back_to_first_candidate() {
        let mut tracker = RangeTracker::new();
        for _ in 0..25 {
            tracker.resolve(&[candidate("specific_64", 0.6)]);
        }
        let est = tracker.resolve(&[candidate("float_scan_96", 1.0)]);
        assert!((est.raw_m - 1.0).abs() < 1e-9);
    }

    #[test]
    fn median_handles_even_counts() {
        assert!((median([1.0, 2.0, 3.0, 4.0].into_iter()) - 2.5).abs() < 1e-9);
        assert!((median([3.0, 1.0, 2.0].into_iter()) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sample_variance_matches_hand_computation() {
        // var([2, 4, 4, 4, 5, 5, 7, 9]) with n-1 denominator = 4.571428...
        let v = sample_variance([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter());
        assert!((v - 32.0 / 7.0).abs() < 1e-9);
        assert_eq!(sample_variance([1.0].into_iter()), 0.0);
    }
}
