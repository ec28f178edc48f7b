use std::io::{self, Read};

use tracing::trace;

/// 8-byte sentinel marking the start of every radar frame.
pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];

/// Fixed header size read immediately after the magic word.
pub const HEADER_LEN: usize = 32;

/// Bounds on the total frame length field; anything outside is a corrupt frame.
pub const MIN_FRAME_LEN: u32 = 40;
pub const MAX_FRAME_LEN: u32 = 65536;

/// Decoded frame header fields consumed by the pipeline.
///
/// The wire header carries more fields (version, platform, CPU time,
/// object/TLV counts) but only these two are used downstream.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub total_len: u32,
    pub frame_num: u32,
}

/// A fully read frame: decoded header plus the raw TLV payload
/// (`total_len - 40` bytes).
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Result of a single frame-read attempt.
#[derive(Debug)]
pub enum FramePoll {
    /// A complete, length-valid frame was read.
    Frame(Frame),
    /// No frame this attempt (timeout, garbage byte, failed sync, short
    /// read, or corrupt length). The caller should poll again.
    Pending,
    /// The underlying stream is closed; no more data will arrive.
    Eof,
}

/// Outcome of filling a fixed-size buffer from the transport.
enum Fill {
    Full,
    /// Timed out (or hit end-of-stream) before the buffer filled.
    Short,
    /// End-of-stream before any byte was read.
    Eof,
}

/// Reads radar frames from a byte stream, scanning for the magic word.
///
/// Synchronization is intentionally not a sliding window: after a first-byte
/// match the next 7 bytes are read blindly and the whole 8-byte window is
/// compared against [`MAGIC_WORD`]. On mismatch the cursor has already
/// advanced past those bytes, so a magic word straddling a failed window is
/// missed. Hardware framing keeps frames byte-aligned in practice; this
/// matches the deployed decoder and is documented as an accepted limitation.
pub struct FrameReader<R> {
    inner: R,
    bytes_read: u64,
    sync_attempts: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
            sync_attempts: 0,
        }
    }

    /// Total bytes consumed from the transport so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Count of single bytes rejected while hunting for the magic word.
    pub fn sync_attempts(&self) -> u64 {
        self.sync_attempts
    }

    /// Attempt to synchronize and read one frame.
    ///
    /// Every recoverable condition (starved reads, failed sync, corrupt
    /// length) returns [`FramePoll::Pending`] so the
    /// caller can interleave stop-flag checks between attempts.
    pub fn poll_frame(&mut self) -> io::Result<FramePoll> {
        // Hunt for the first magic byte.
        let mut first = [0u8; 1];
        match self.fill(&mut first)? {
            Fill::Eof => return Ok(FramePoll::Eof),
            Fill::Short => return Ok(FramePoll::Pending),
            Fill::Full => {}
        }
        if first[0] != MAGIC_WORD[0] {
            self.sync_attempts += 1;
            return Ok(FramePoll::Pending);
        }

        // First byte matched: read the next 7 blindly and compare the full
        // window. On mismatch those bytes are already consumed.
        let mut rest = [0u8; 7];
        match self.fill(&mut rest)? {
            Fill::Full => {}
            _ => return Ok(FramePoll::Pending),
        }
        if rest[..] != MAGIC_WORD[1..] {
            trace!("magic word mismatch after first-byte hit");
            return Ok(FramePoll::Pending);
        }

        // Header follows immediately after the magic word.
        let mut header = [0u8; HEADER_LEN];
        match self.fill(&mut header)? {
            Fill::Full => {}
            _ => return Ok(FramePoll::Pending),
        }
        let total_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let frame_num = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            trace!(total_len, "discarding frame with corrupt length");
            return Ok(FramePoll::Pending);
        }

        let payload_len = (total_len - MIN_FRAME_LEN) as usize;
        let mut payload = vec![0u8; payload_len];
        match self.fill(&mut payload)? {
            Fill::Full => {}
            _ => {
                trace!(payload_len, "short payload read, abandoning frame");
                return Ok(FramePoll::Pending);
            }
        }

        Ok(FramePoll::Frame(Frame {
            header: FrameHeader {
                total_len,
                frame_num,
            },
            payload,
        }))
    }

    /// Fill `buf` completely, or report why it could not be filled.
    ///
    /// `Ok(0)` from the transport means end-of-stream; a timed-out read on a
    /// live serial port surfaces as `ErrorKind::TimedOut` and is treated as
    /// "no data yet" (the partially read frame is abandoned, per protocol).
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<Fill> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Ok(if filled == 0 { Fill::Eof } else { Fill::Short });
                }
                Ok(n) => {
                    filled += n;
                    self.bytes_read += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(Fill::Short),
                Err(e) => return Err(e),
            }
        }
        Ok(Fill::Full)
    }
}
