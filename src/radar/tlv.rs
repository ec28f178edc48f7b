/// TLV type carrying the vital-signs statistics payload.
pub const TLV_TYPE_VITAL_SIGNS: u32 = 6;

/// Minimum data length for a vital-signs TLV to be worth decoding.
pub const VITAL_SIGNS_MIN_LEN: usize = 128;

/// One Type-Length-Value record borrowed from a frame payload.
#[derive(Debug, Clone, Copy)]
pub struct TlvRecord<'a> {
    pub tlv_type: u32,
    pub data: &'a [u8],
}

/// Iterates the TLV records packed into a frame payload.
///
/// Each record is an 8-byte `(type: u32, length: u32)` header followed by
/// `length` data bytes, all little-endian. A record whose declared length
/// runs past the end of the payload terminates the walk; the remaining bytes
/// are discarded. There is no partial-record recovery.
pub struct TlvWalker<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> TlvWalker<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload, offset: 0 }
    }
}

impl<'a> Iterator for TlvWalker<'a> {
    type Item = TlvRecord<'a>;

    fn next(&mut self) -> Option<TlvRecord<'a>> {
        if self.offset + 8 > self.payload.len() {
            return None;
        }
        let head = &self.payload[self.offset..self.offset + 8];
        let tlv_type = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let tlv_len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
        self.offset += 8;

        if self.offset + tlv_len > self.payload.len() {
            // Truncated record: stop walking this payload entirely.
            self.offset = self.payload.len();
            return None;
        }

        let data = &self.payload[self.offset..self.offset + tlv_len];
        self.offset += tlv_len;
        Some(TlvRecord { tlv_type, data })
    }
}
