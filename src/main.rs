mod config;
mod radar;
mod vitals;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use config::Config;
use radar::{list_ports, open_data_port, run_processor, ProcessorConfig, ProcessorMessage, RadarControl};
use vitals::{PipelineConfig, SessionSummary, VitalRecord};

/// Headless CLI for mmWave radar vital-signs capture
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (defaults to ~/.mmwave-vitals/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control UART device (e.g. COM5 or /dev/ttyUSB0)
    #[arg(long)]
    control_port: Option<String>,

    /// Data UART device carrying the binary frame stream
    #[arg(long)]
    data_port: Option<String>,

    /// Control UART baud rate
    #[arg(long)]
    control_baud: Option<u32>,

    /// Data UART baud rate
    #[arg(long)]
    data_baud: Option<u32>,

    /// Radar profile (.cfg) to send before capture
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Capture duration in seconds (0 = run until Ctrl+C)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Append accepted records to this file as JSON lines
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the session summary as JSON at the end
    #[arg(long)]
    json_summary: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    // Handle --list-ports
    if args.list_ports {
        return list_ports_and_exit();
    }

    // Load config and apply CLI overrides
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&config_path)?;
    if let Some(port) = args.control_port {
        config.control_port = port;
    }
    if let Some(port) = args.data_port {
        config.data_port = port;
    }
    if let Some(baud) = args.control_baud {
        config.control_baud = baud;
    }
    if let Some(baud) = args.data_baud {
        config.data_baud = baud;
    }
    if let Some(profile) = args.profile {
        config.profile_path = Some(profile);
    }
    if let Some(duration) = args.duration {
        config.duration_secs = duration;
    }

    info!("mmWave vital-signs capture starting...");
    info!("Control port: {} @ {}", config.control_port, config.control_baud);
    info!("Data port: {} @ {}", config.data_port, config.data_baud);
    if config.duration_secs > 0 {
        info!("Duration: {}s", config.duration_secs);
    } else {
        info!("Duration: until Ctrl+C");
    }

    // Configure the sensor over the control channel. A transport failure
    // here is fatal; no partial session is attempted.
    let mut control = RadarControl::open(
        &config.control_port,
        config.control_baud,
        config.read_timeout_ms,
    )?;
    control.send_command("sensorStop")?;
    if let Some(profile) = &config.profile_path {
        control.send_profile(profile)?;
    } else {
        warn!("No profile configured; assuming the sensor is already running");
    }

    // Open the data stream
    let data_port = open_data_port(&config.data_port, config.data_baud, config.read_timeout_ms)?;

    // Optional JSONL record sink
    let mut record_sink = match &args.output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open output file {}", path.display()))?;
            info!("Appending records to {}", path.display());
            Some(file)
        }
        None => None,
    };

    // Processor configuration
    let processor_config = ProcessorConfig {
        pipeline: PipelineConfig {
            hr_change_threshold: config.hr_change_threshold,
            rr_change_threshold: config.rr_change_threshold,
            range_change_threshold: config.range_change_threshold,
            ..PipelineConfig::default()
        },
        duration: (config.duration_secs > 0).then(|| Duration::from_secs(config.duration_secs)),
        status_interval_ms: config.status_interval_ms,
    };

    // Create channels
    let (tx, mut rx) = mpsc::channel::<ProcessorMessage>(32);
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();

    // Spawn processor thread
    let processor_handle = std::thread::spawn(move || {
        run_processor(data_port, processor_config, tx, stop_flag_clone);
    });

    // Set up Ctrl+C handler
    let stop_flag_ctrlc = stop_flag.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping...");
        stop_flag_ctrlc.store(true, Ordering::SeqCst);
    });

    println!("\nCapturing... Press Ctrl+C to stop.\n");

    // Process messages
    let mut summary: Option<SessionSummary> = None;
    let mut last_reported_packets = 0u64;

    while let Some(msg) = rx.recv().await {
        match msg {
            ProcessorMessage::Record(record) => {
                print_record(&record);
                if let Some(sink) = record_sink.as_mut() {
                    if let Err(e) = write_record(sink, &record) {
                        error!("Failed to write record: {}", e);
                    }
                }
            }

            ProcessorMessage::Status {
                packet_count,
                data_saved,
                data_skipped,
                sync_attempts,
            } => {
                if packet_count > last_reported_packets {
                    debug!(
                        "Status: {} packets, {} saved, {} skipped, {} sync rejects",
                        packet_count, data_saved, data_skipped, sync_attempts
                    );
                    last_reported_packets = packet_count;
                }
            }

            ProcessorMessage::Error(e) => {
                error!("Processor error: {}", e);
            }

            ProcessorMessage::Stopped(s) => {
                info!("Processor stopped");
                summary = Some(*s);
                break;
            }
        }
    }

    // Wait for processor thread
    let _ = processor_handle.join();

    // Stop the sensor, best effort
    control.stop_sensor();

    // Print summary
    if let Some(summary) = summary {
        print_summary(&summary);
        if args.json_summary {
            println!("{}", serde_json::to_string(&summary)?);
        }
    }

    info!("Session complete");
    Ok(())
}

fn print_record(record: &VitalRecord) {
    println!(
        "[{:7.2}s] HR: {:5.1} bpm | RR: {:4.1} bpm | Range: {:.3} m",
        record.session_time_s, record.heart_rate_bpm, record.respiration_rate_bpm, record.range_m
    );
}

fn write_record(sink: &mut std::fs::File, record: &VitalRecord) -> Result<()> {
    serde_json::to_writer(&mut *sink, record)?;
    sink.write_all(b"\n")?;
    sink.flush()?;
    Ok(())
}

fn print_summary(summary: &SessionSummary) {
    println!("\n--- Session Summary ---");
    println!("Duration: {:.1}s", summary.duration_seconds);
    println!("Packets received: {}", summary.packet_count);
    println!("Samples saved: {}", summary.data_saved);
    println!("Samples skipped: {}", summary.data_skipped);
    match summary.save_ratio_percent() {
        Some(ratio) => println!("Save ratio: {:.1}%", ratio),
        None => println!("Save ratio: N/A"),
    }
    if let (Some(hr), Some(rr), Some(range)) = (
        summary.avg_heart_rate_bpm,
        summary.avg_respiration_rate_bpm,
        summary.avg_range_m,
    ) {
        println!("Average heart rate: {:.1} bpm", hr);
        println!("Average respiration rate: {:.1} bpm", rr);
        println!("Average range: {:.3} m ({:.0} cm)", range, range * 100.0);
        if let Some(stddev) = summary.range_stddev_m {
            println!("Range std dev: {:.3} m", stddev);
        }
    } else {
        println!("No valid samples were saved");
    }
}

fn list_ports_and_exit() -> Result<()> {
    println!("Available serial ports:\n");

    match list_ports() {
        Ok(ports) => {
            if ports.is_empty() {
                println!("  No serial ports found.");
            } else {
                for port in ports {
                    println!("  - {} ({:?})", port.port_name, port.port_type);
                }
            }
        }
        Err(e) => {
            error!("Failed to list ports: {}", e);
            println!("  Error: {}", e);
        }
    }

    Ok(())
}
