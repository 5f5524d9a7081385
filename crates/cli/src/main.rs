use std::net::SocketAddr;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use psrtp::media::VideoCodec;
use psrtp::media::annexb::split_access_units;
use psrtp::{Session, SessionConfig, TransportMode};

/// RTP clock rate for video.
const CLOCK_RATE: u64 = 90_000;

#[derive(Parser)]
#[command(
    name = "ps-rtp-send",
    about = "Stream an H.264/H.265 elementary stream as MPEG-PS over RTP"
)]
struct Args {
    /// Annex B elementary stream file
    input: String,

    /// Transport: udp, tcp-passive (tcp-active is not implemented)
    #[arg(long, short, default_value = "udp")]
    transport: TransportMode,

    /// Local address to bind (host:port)
    #[arg(long, short, default_value = "0.0.0.0:0")]
    local: SocketAddr,

    /// Receiver address (host:port)
    #[arg(long, short, default_value = "127.0.0.1:9000")]
    remote: SocketAddr,

    /// Codec of the input stream: h264 or h265
    #[arg(long, default_value = "h264")]
    codec: VideoCodec,

    /// Frames per second used for pacing and PTS
    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Source identifier used in logs
    #[arg(long, default_value = "file")]
    source: String,

    /// Maximum RTP packet size (header + payload)
    #[arg(long, default_value_t = 1460)]
    mtu: usize,

    /// Seconds without packets before delivery gives up
    #[arg(long, default_value_t = 5)]
    idle_timeout: u64,

    /// Restart from the beginning when the file ends
    #[arg(long = "loop")]
    repeat: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.fps == 0 {
        eprintln!("--fps must be at least 1");
        return ExitCode::FAILURE;
    }

    let data = match std::fs::read(&args.input) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to read {}: {}", args.input, e);
            return ExitCode::FAILURE;
        }
    };
    let frames = split_access_units(&data, args.codec);
    if frames.is_empty() {
        eprintln!("No access units found in {}", args.input);
        return ExitCode::FAILURE;
    }

    let config = SessionConfig {
        transport: args.transport,
        max_rtp_packet_size: args.mtu,
        idle_timeout: Duration::from_secs(args.idle_timeout),
        codec: args.codec,
        ..SessionConfig::default()
    };
    let session = match Session::with_config(&args.source, config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = session.service(args.local, args.remote) {
        eprintln!("Failed to start delivery: {}", e);
        return ExitCode::FAILURE;
    }

    println!(
        "Streaming {} ({} frames) over {} from {} to {}",
        args.input,
        frames.len(),
        args.transport,
        session
            .local_addr()
            .map_or_else(|| args.local.to_string(), |a| a.to_string()),
        args.remote
    );

    let frame_interval = Duration::from_secs(1) / args.fps;
    let pts_step = CLOCK_RATE / args.fps as u64;
    let started = Instant::now();
    let mut pts = 0u64;
    let mut sent = 0u32;

    'stream: loop {
        for frame in &frames {
            if let Err(e) = session.send_frame(frame.data, frame.key_frame, pts) {
                tracing::warn!(error = %e, frames = sent, "stream interrupted");
                break 'stream;
            }
            pts += pts_step;
            sent += 1;

            if let Some(wait) = (frame_interval * sent).checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }
        if !args.repeat {
            break;
        }
    }

    let reason = session.exit();
    println!("Sent {} frames, delivery ended: {:?}", sent, reason);
    match reason {
        Some(reason) if reason.is_fault() => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
