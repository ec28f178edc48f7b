use thiserror::Error;

use super::range::{extract_candidates, RangeCandidate};

/// Protocol-fixed byte offsets of the vital-sign fields inside a type-6 TLV.
/// These come from the originating hardware format and must not change.
const BREATH_WAVEFORM_OFFSET: usize = 28;
const HEART_WAVEFORM_OFFSET: usize = 32;
const HEART_RATE_FFT_OFFSET: usize = 36;
const BREATH_RATE_FFT_OFFSET: usize = 52;

/// A vital-signs TLV that is too short to hold a required field.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed vital-signs TLV: {field} at offset {offset} needs {needed} bytes, have {len}")]
pub struct MalformedTlv {
    pub field: &'static str,
    pub offset: usize,
    pub needed: usize,
    pub len: usize,
}

/// Fields decoded from one vital-signs TLV, plus the range candidate set.
#[derive(Debug, Clone)]
pub struct VitalSignsFields {
    pub breath_waveform: f64,
    pub heart_waveform: f64,
    pub heart_rate_fft: f64,
    pub breath_rate_fft: f64,
    pub range_candidates: Vec<RangeCandidate>,
}

/// Little-endian f32 at `offset`, `None` when it would read past the slice.
pub(crate) fn read_f32_le(data: &[u8], offset: usize) -> Option<f32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Little-endian u32 at `offset`, `None` when it would read past the slice.
pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn require_f32(data: &[u8], offset: usize, field: &'static str) -> Result<f64, MalformedTlv> {
    read_f32_le(data, offset)
        .map(f64::from)
        .ok_or(MalformedTlv {
            field,
            offset,
            needed: 4,
            len: data.len(),
        })
}

/// Decode the fixed-offset vital-sign fields and the range candidates from a
/// type-6 TLV data slice.
pub fn extract_vital_signs(data: &[u8]) -> Result<VitalSignsFields, MalformedTlv> {
    Ok(VitalSignsFields {
        breath_waveform: require_f32(data, BREATH_WAVEFORM_OFFSET, "breath_waveform")?,
        heart_waveform: require_f32(data, HEART_WAVEFORM_OFFSET, "heart_waveform")?,
        heart_rate_fft: require_f32(data, HEART_RATE_FFT_OFFSET, "heart_rate_fft")?,
        breath_rate_fft: require_f32(data, BREATH_RATE_FFT_OFFSET, "breath_rate_fft")?,
        range_candidates: extract_candidates(data),
    })
}
