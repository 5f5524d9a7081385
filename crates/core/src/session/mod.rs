//! Sender session management.
//!
//! A [`Session`] relays one video stream to one receiver. It owns the
//! packetizer state (sequence counter, SSRC), a bounded packet queue and a
//! single delivery thread:
//!
//! ```text
//! send_frame ──> PsPacketizer ──> bounded queue ──> delivery thread ──> socket
//!  (caller)                        (capacity 25)     (one per session)
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! new / with_config  -> Idle      (queue, SSRC allocated)
//! service            -> Running   (socket opened, thread started)
//! send_frame         -> Running   (blocks while the queue is full)
//! idle / write fault -> Stopped   (thread closed the socket on its own)
//! exit               -> Stopped   (stop requested, thread joined)
//! ```
//!
//! Faults inside the delivery thread are not reported to `send_frame`
//! directly; once the thread is gone the next `send_frame` fails with
//! [`RtpError::DeliveryStopped`]. Callers should then call
//! [`exit`](Session::exit) to collect the [`StopReason`].

mod engine;

pub use engine::StopReason;

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::error::{Result, RtpError};
use crate::media::packetizer::{DEFAULT_MAX_RTP_PACKET_SIZE, PsPacketizer};
use crate::media::ps::PsMuxer;
use crate::media::rtp::{RTP_HEADER_LEN, RtpHeader};
use crate::media::{Packetizer, VideoCodec};
use crate::transport::{Connection, TransportMode, tcp, udp};
use engine::{DeliveryEngine, Endpoint};

/// Default packet queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 25;

/// Default time the delivery thread waits for a packet before giving up.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Dynamic RTP payload type used for PS video.
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transport used by [`Session::service`].
    pub transport: TransportMode,
    /// Packets buffered between the producer and the delivery thread.
    pub queue_capacity: usize,
    /// Delivery aborts when no packet arrives for this long.
    pub idle_timeout: Duration,
    /// Upper bound on RTP header + payload per packet.
    pub max_rtp_packet_size: usize,
    /// RTP payload type (7-bit).
    pub payload_type: u8,
    /// Codec declared in the program stream map.
    pub codec: VideoCodec,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Udp,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_rtp_packet_size: DEFAULT_MAX_RTP_PACKET_SIZE,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            codec: VideoCodec::H264,
        }
    }
}

impl SessionConfig {
    /// Defaults with the given transport.
    pub fn new(transport: TransportMode) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(RtpError::InvalidConfig("queue capacity must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(RtpError::InvalidConfig("idle timeout must be non-zero"));
        }
        if self.payload_type > 0x7f {
            return Err(RtpError::InvalidConfig("payload type must fit in 7 bits"));
        }
        if self.max_rtp_packet_size <= RTP_HEADER_LEN || self.max_rtp_packet_size > u16::MAX as usize
        {
            return Err(RtpError::InvalidConfig(
                "max RTP packet size must be between 13 and 65535",
            ));
        }
        Ok(())
    }
}

/// Handle to a running delivery thread.
struct DeliveryHandle {
    stop: Sender<()>,
    thread: JoinHandle<StopReason>,
}

/// One outbound PS-over-RTP stream.
///
/// All methods take `&self`, so a session can be shared (e.g. in an `Arc`)
/// between the thread feeding frames and the thread that shuts it down.
/// An `exit` issued while a producer is blocked on a full queue unblocks
/// that producer with [`RtpError::DeliveryStopped`].
///
/// Dropping a session calls [`exit`](Self::exit).
pub struct Session {
    source_id: String,
    config: SessionConfig,
    ssrc: u32,
    packetizer: Mutex<PsPacketizer>,
    queue_tx: Sender<Vec<u8>>,
    /// Held until `service` hands it to the delivery thread.
    queue_rx: Mutex<Option<Receiver<Vec<u8>>>>,
    delivery: Mutex<Option<DeliveryHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Session {
    /// Create a session with default settings for the given transport.
    pub fn new(source_id: &str, transport: TransportMode) -> Self {
        let config = SessionConfig::new(transport);
        let packetizer = PsPacketizer::with_muxer(
            RtpHeader::with_random_ssrc(config.payload_type),
            PsMuxer::new(config.codec),
            transport.framing(),
        );
        Self::build(source_id, config, packetizer)
    }

    /// Create a session from an explicit configuration.
    pub fn with_config(source_id: &str, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let mut packetizer = PsPacketizer::with_muxer(
            RtpHeader::with_random_ssrc(config.payload_type),
            PsMuxer::new(config.codec),
            config.transport.framing(),
        );
        packetizer.set_max_rtp_packet_size(config.max_rtp_packet_size)?;
        Ok(Self::build(source_id, config, packetizer))
    }

    fn build(source_id: &str, config: SessionConfig, packetizer: PsPacketizer) -> Self {
        let (queue_tx, queue_rx) = bounded(config.queue_capacity);
        let ssrc = packetizer.ssrc();
        tracing::debug!(
            source = source_id,
            transport = %config.transport,
            ssrc = format_args!("{:#010X}", ssrc),
            "session created"
        );
        Self {
            source_id: source_id.to_string(),
            config,
            ssrc,
            packetizer: Mutex::new(packetizer),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            delivery: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Open the transport and start the delivery thread.
    ///
    /// UDP binds `local` and connects to `remote` before returning. TCP
    /// passive binds a listener on `local` and returns without waiting for
    /// the receiver; `remote` is only logged. TCP active is rejected with
    /// [`RtpError::UnsupportedTransport`].
    ///
    /// Can succeed only once per session.
    pub fn service(&self, local: SocketAddr, remote: SocketAddr) -> Result<()> {
        let mut queue_rx = self.queue_rx.lock();
        if queue_rx.is_none() {
            return Err(RtpError::AlreadyServing);
        }

        let (endpoint, bound) = match self.config.transport {
            TransportMode::Udp => {
                let socket = udp::connect(local, remote)?;
                let bound = socket.local_addr()?;
                (Endpoint::Connected(Connection::Udp(socket)), bound)
            }
            TransportMode::TcpPassive => {
                let listener = tcp::listen(local)?;
                let bound = listener.local_addr()?;
                tracing::info!(
                    source = %self.source_id,
                    local = %bound,
                    expected_peer = %remote,
                    "waiting for receiver"
                );
                (Endpoint::Listening(listener), bound)
            }
            mode @ TransportMode::TcpActive => {
                tracing::error!(source = %self.source_id, %mode, "transport not implemented");
                return Err(RtpError::UnsupportedTransport(mode));
            }
        };

        let packets = queue_rx.take().ok_or(RtpError::AlreadyServing)?;
        let (stop_tx, stop_rx) = bounded(1);
        let engine = DeliveryEngine {
            source: self.source_id.clone(),
            endpoint,
            packets,
            stop: stop_rx,
            idle_timeout: self.config.idle_timeout,
        };

        let thread = thread::Builder::new()
            .name(format!("rtp-{}", self.source_id))
            .spawn(move || engine.run())?;

        *self.local_addr.lock() = Some(bound);
        *self.delivery.lock() = Some(DeliveryHandle {
            stop: stop_tx,
            thread,
        });

        tracing::info!(
            source = %self.source_id,
            transport = %self.config.transport,
            local = %bound,
            %remote,
            "session serving"
        );
        Ok(())
    }

    /// Packetize one access unit and queue its packets for delivery.
    ///
    /// Blocks while the queue is full. Returns the number of packets
    /// queued.
    pub fn send_frame(&self, data: &[u8], key_frame: bool, pts: u64) -> Result<usize> {
        if self.queue_rx.lock().is_some() {
            return Err(RtpError::NotServing);
        }
        let mut sink = self.queue_tx.clone();
        self.packetizer
            .lock()
            .packetize(data, key_frame, pts, &mut sink)
    }

    /// Stop the delivery thread and wait for it to close the socket.
    ///
    /// The stop request is sent at most once; later calls, and calls on a
    /// session that never started serving, return `None` immediately.
    pub fn exit(&self) -> Option<StopReason> {
        let DeliveryHandle { stop, thread } = self.delivery.lock().take()?;
        drop(stop);

        match thread.join() {
            Ok(reason) => {
                tracing::info!(source = %self.source_id, %reason, "session exited");
                Some(reason)
            }
            Err(_) => {
                tracing::error!(source = %self.source_id, "delivery thread panicked");
                None
            }
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn transport(&self) -> TransportMode {
        self.config.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// SSRC stamped on every packet of this session.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    ///
    /// Waits for any `send_frame` in progress, including one blocked on a
    /// full queue.
    pub fn next_sequence(&self) -> u16 {
        self.packetizer.lock().next_sequence()
    }

    /// Address the socket or listener is bound to, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.exit();
    }
}
