use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::frame::{FramePoll, FrameReader};
use super::tlv::{TlvWalker, TLV_TYPE_VITAL_SIGNS, VITAL_SIGNS_MIN_LEN};
use crate::vitals::{extract_vital_signs, PipelineConfig, SessionSummary, VitalRecord, VitalsPipeline};

/// Message from the processing thread.
#[derive(Debug)]
pub enum ProcessorMessage {
    /// A change-significant sample was accepted.
    Record(VitalRecord),
    /// Periodic progress update.
    Status {
        packet_count: u64,
        data_saved: u64,
        data_skipped: u64,
        sync_attempts: u64,
    },
    /// Non-fatal processing error.
    Error(String),
    /// Processing finished; carries the session summary.
    Stopped(Box<SessionSummary>),
}

/// Processing thread configuration.
pub struct ProcessorConfig {
    pub pipeline: PipelineConfig,
    /// Stop after this long; `None` runs until the stop flag is set.
    pub duration: Option<Duration>,
    pub status_interval_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            duration: None,
            status_interval_ms: 1000,
        }
    }
}

/// Run the radar processing loop.
///
/// Spawn this in a dedicated thread. It owns all mutable session state,
/// reads the data stream frame by frame, runs the vitals pipeline, and
/// forwards accepted records over the channel. The summary is computed and
/// sent on every exit path, including errors and stop requests.
pub fn run_processor<R: Read>(
    reader: R,
    config: ProcessorConfig,
    tx: mpsc::Sender<ProcessorMessage>,
    stop_flag: Arc<AtomicBool>,
) {
    let started = Instant::now();
    let mut frames = FrameReader::new(reader);
    let mut pipeline = VitalsPipeline::with_config(config.pipeline.clone());

    if let Err(e) = run_processor_inner(&mut frames, &mut pipeline, &config, started, &tx, &stop_flag)
    {
        let _ = tx.blocking_send(ProcessorMessage::Error(e.to_string()));
    }

    let summary = pipeline.summary(
        started.elapsed().as_secs_f64(),
        frames.bytes_read(),
        frames.sync_attempts(),
    );
    let _ = tx.blocking_send(ProcessorMessage::Stopped(Box::new(summary)));
}

fn run_processor_inner<R: Read>(
    frames: &mut FrameReader<R>,
    pipeline: &mut VitalsPipeline,
    config: &ProcessorConfig,
    started: Instant,
    tx: &mpsc::Sender<ProcessorMessage>,
    stop_flag: &AtomicBool,
) -> std::io::Result<()> {
    info!(
        session_id = %pipeline.session_id(),
        duration = ?config.duration,
        "starting radar processor"
    );

    let status_interval = Duration::from_millis(config.status_interval_ms);
    let mut last_status = Instant::now();

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            info!("stop flag received, finishing session");
            break;
        }
        if let Some(duration) = config.duration {
            if started.elapsed() >= duration {
                info!("session duration reached");
                break;
            }
        }

        match frames.poll_frame()? {
            FramePoll::Eof => {
                info!("data stream closed");
                break;
            }
            FramePoll::Pending => {}
            FramePoll::Frame(frame) => {
                pipeline.frame_received();
                let session_time = started.elapsed().as_secs_f64();

                for tlv in TlvWalker::new(&frame.payload) {
                    if tlv.tlv_type != TLV_TYPE_VITAL_SIGNS || tlv.data.len() < VITAL_SIGNS_MIN_LEN
                    {
                        continue;
                    }
                    match extract_vital_signs(tlv.data) {
                        Ok(fields) => pipeline.process(&fields, session_time),
                        Err(e) => {
                            debug!(frame = frame.header.frame_num, error = %e, "skipping malformed TLV")
                        }
                    }
                }

                while let Some(record) = pipeline.pop_record() {
                    debug!(
                        hr = record.heart_rate_bpm,
                        rr = record.respiration_rate_bpm,
                        range = record.range_m,
                        "accepted sample"
                    );
                    if tx.blocking_send(ProcessorMessage::Record(record)).is_err() {
                        warn!("record receiver dropped, stopping");
                        return Ok(());
                    }
                }
            }
        }

        if last_status.elapsed() >= status_interval {
            let _ = tx.blocking_send(ProcessorMessage::Status {
                packet_count: pipeline.packet_count(),
                data_saved: pipeline.data_saved(),
                data_skipped: pipeline.data_skipped(),
                sync_attempts: frames.sync_attempts(),
            });
            last_status = Instant::now();
        }
    }

    info!("radar processor stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::frame::MAGIC_WORD;
    use std::io::Cursor;

    /// Build a well-formed frame carrying one vital-signs TLV.
    fn vitals_frame(frame_num: u32, hr_fft: f32, rr_fft: f32, range_m: f32) -> Vec<u8> {
        let mut tlv_data = vec![0u8; 128];
        tlv_data[28..32].copy_from_slice(&0.01f32.to_le_bytes()); // breath waveform
        tlv_data[32..36].copy_from_slice(&0.02f32.to_le_bytes()); // heart waveform
        tlv_data[36..40].copy_from_slice(&hr_fft.to_le_bytes());
        tlv_data[52..56].copy_from_slice(&rr_fft.to_le_bytes());
        tlv_data[64..68].copy_from_slice(&range_m.to_le_bytes());

        let mut payload = Vec::new();
        payload.extend_from_slice(&TLV_TYPE_VITAL_SIGNS.to_le_bytes());
        payload.extend_from_slice(&(tlv_data.len() as u32).to_le_bytes());
        payload.extend_from_slice(&tlv_data);

        let total_len = 40 + payload.len() as u32;
        let mut header = [0u8; 32];
        header[4..8].copy_from_slice(&total_len.to_le_bytes());
        header[12..16].copy_from_slice(&frame_num.to_le_bytes());
        header[24..28].copy_from_slice(&1u32.to_le_bytes()); // num TLVs

        let mut frame = Vec::new();
        frame.extend_from_slice(&MAGIC_WORD);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&payload);
        frame
    }

    fn run_to_completion(stream: Vec<u8>) -> (Vec<VitalRecord>, SessionSummary) {
        let (tx, mut rx) = mpsc::channel(1024);
        let stop_flag = Arc::new(AtomicBool::new(false));
        run_processor(
            Cursor::new(stream),
            ProcessorConfig::default(),
            tx,
            stop_flag,
        );

        let mut records = Vec::new();
        let mut summary = None;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ProcessorMessage::Record(r) => records.push(r),
                ProcessorMessage::Stopped(s) => summary = Some(*s),
                ProcessorMessage::Status { .. } => {}
                ProcessorMessage::Error(e) => panic!("processor error: {e}"),
            }
        }
        (records, summary.expect("summary always sent"))
    }

    #[test]
    fn end_to_end_oscillating_heart_rate() {
        // 50 frames, heart rate alternating 70/80 bpm so every frame
        // crosses the 2 bpm threshold; constant respiration and range.
        let mut stream = Vec::new();
        for i in 0..50u32 {
            let hr = if i % 2 == 0 { 70.0 } else { 80.0 };
            stream.extend_from_slice(&vitals_frame(i, hr, 15.0, 0.6));
        }

        let (records, summary) = run_to_completion(stream);
        assert_eq!(summary.packet_count, 50);
        assert_eq!(summary.data_saved, 50);
        assert_eq!(summary.data_skipped, 0);
        assert_eq!(records.len(), 50);

        let avg_hr = summary.avg_heart_rate_bpm.unwrap();
        assert!((70.0..=80.0).contains(&avg_hr));
        let avg_range = summary.avg_range_m.unwrap();
        assert!((avg_range - 0.6).abs() < 0.05);
        assert_eq!(summary.save_ratio, Some(1.0));
    }

    #[test]
    fn steady_vitals_save_only_once() {
        let mut stream = Vec::new();
        for i in 0..10u32 {
            stream.extend_from_slice(&vitals_frame(i, 72.0, 15.0, 0.6));
        }

        let (records, summary) = run_to_completion(stream);
        assert_eq!(summary.packet_count, 10);
        assert_eq!(summary.data_saved, 1);
        assert_eq!(summary.data_skipped, 9);
        assert_eq!(records.len(), 1);
        assert_eq!(summary.save_ratio, Some(0.1));
    }

    #[test]
    fn zero_sample_session_without_magic_word() {
        let stream = vec![0x55u8; 1000];
        let (records, summary) = run_to_completion(stream);
        assert!(records.is_empty());
        assert_eq!(summary.packet_count, 0);
        assert_eq!(summary.data_saved, 0);
        assert_eq!(summary.data_skipped, 0);
        assert_eq!(summary.save_ratio, None);
        assert_eq!(summary.sync_attempts, 1000);
        assert_eq!(summary.bytes_read, 1000);
    }

    #[test]
    fn foreign_tlv_types_count_packets_but_emit_nothing() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&16u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 16]);

        let total_len = 40 + payload.len() as u32;
        let mut stream = Vec::new();
        stream.extend_from_slice(&MAGIC_WORD);
        let mut header = [0u8; 32];
        header[4..8].copy_from_slice(&total_len.to_le_bytes());
        stream.extend_from_slice(&header);
        stream.extend_from_slice(&payload);

        let (records, summary) = run_to_completion(stream);
        assert!(records.is_empty());
        assert_eq!(summary.packet_count, 1);
    }

    #[test]
    fn stop_flag_short_circuits_before_reading() {
        let stream = vitals_frame(1, 72.0, 15.0, 0.6);
        let (tx, mut rx) = mpsc::channel(16);
        let stop_flag = Arc::new(AtomicBool::new(true));
        run_processor(Cursor::new(stream), ProcessorConfig::default(), tx, stop_flag);

        let mut saw_stopped = false;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ProcessorMessage::Stopped(summary) => {
                    saw_stopped = true;
                    assert_eq!(summary.packet_count, 0);
                }
                ProcessorMessage::Record(_) => panic!("no record expected"),
                _ => {}
            }
        }
        assert!(saw_stopped);
    }
}
