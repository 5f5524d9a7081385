use std::fmt;
use std::net::TcpListener;
use std::time::Duration;

use crossbeam_channel::{Receiver, select};

use crate::transport::{Connection, tcp};

/// Why a delivery thread stopped.
///
/// Only [`Shutdown`](Self::Shutdown) is graceful. The others are faults
/// that end the session: there is no retry or reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`Session::exit`](crate::Session::exit) asked the thread to stop.
    Shutdown,
    /// No packet arrived within the idle timeout.
    IdleTimeout,
    /// Every producer handle to the packet queue was dropped.
    QueueClosed,
    /// A write failed or went out short.
    TransportFault,
}

impl StopReason {
    pub fn is_fault(self) -> bool {
        self != Self::Shutdown
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::QueueClosed => write!(f, "queue closed"),
            Self::TransportFault => write!(f, "transport fault"),
        }
    }
}

/// What the delivery thread starts from.
#[derive(Debug)]
pub(crate) enum Endpoint {
    /// Socket already open (UDP).
    Connected(Connection),
    /// Waiting for the receiver to connect (TCP passive).
    Listening(TcpListener),
}

/// Single consumer of a session's packet queue.
///
/// Owns the socket for its whole life. On every exit path the socket is
/// closed once and the [`StopReason`] is returned to whoever joins the
/// thread.
pub(crate) struct DeliveryEngine {
    pub(crate) source: String,
    pub(crate) endpoint: Endpoint,
    pub(crate) packets: Receiver<Vec<u8>>,
    pub(crate) stop: Receiver<()>,
    pub(crate) idle_timeout: Duration,
}

impl DeliveryEngine {
    pub(crate) fn run(self) -> StopReason {
        let Self {
            source,
            endpoint,
            packets,
            stop,
            idle_timeout,
        } = self;

        // Waiting for a passive-mode receiver is not subject to the idle timeout.
        let mut conn = match endpoint {
            Endpoint::Connected(conn) => conn,
            Endpoint::Listening(listener) => match tcp::accept_one(&listener, &stop) {
                Some(stream) => Connection::Tcp(stream),
                None => {
                    tracing::info!(source = %source, "stopped before a receiver connected");
                    return StopReason::Shutdown;
                }
            },
        };

        let peer = conn.peer_addr();
        tracing::info!(source = %source, ?peer, "delivery started");

        let (reason, delivered) = deliver(&mut conn, &packets, &stop, idle_timeout);
        // Producers get DeliveryStopped before the peer sees the close.
        drop(packets);
        conn.close();

        if reason.is_fault() {
            tracing::error!(source = %source, ?peer, %reason, delivered, "delivery aborted");
        } else {
            tracing::info!(source = %source, ?peer, delivered, "delivery stopped");
        }
        reason
    }
}

/// Multiplex the queue, the stop signal and the idle deadline until one of
/// them ends delivery. Returns the reason and the number of packets written.
fn deliver(
    conn: &mut Connection,
    packets: &Receiver<Vec<u8>>,
    stop: &Receiver<()>,
    idle_timeout: Duration,
) -> (StopReason, u64) {
    let mut delivered = 0u64;
    loop {
        select! {
            recv(packets) -> msg => match msg {
                Ok(packet) => {
                    if let Err(e) = conn.write_packet(&packet) {
                        tracing::warn!(error = %e, len = packet.len(), "packet write failed");
                        return (StopReason::TransportFault, delivered);
                    }
                    delivered += 1;
                }
                Err(_) => return (StopReason::QueueClosed, delivered),
            },
            recv(stop) -> _ => return (StopReason::Shutdown, delivered),
            default(idle_timeout) => return (StopReason::IdleTimeout, delivered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::io::Read;
    use std::net::{TcpStream, UdpSocket};
    use std::thread;

    fn udp_engine(
        idle: Duration,
        capacity: usize,
    ) -> (
        UdpSocket,
        crossbeam_channel::Sender<Vec<u8>>,
        crossbeam_channel::Sender<()>,
        DeliveryEngine,
    ) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.connect(receiver.local_addr().unwrap()).unwrap();

        let (packets_tx, packets_rx) = bounded(capacity);
        let (stop_tx, stop_rx) = bounded(1);
        let engine = DeliveryEngine {
            source: "test".into(),
            endpoint: Endpoint::Connected(Connection::Udp(socket)),
            packets: packets_rx,
            stop: stop_rx,
            idle_timeout: idle,
        };
        (receiver, packets_tx, stop_tx, engine)
    }

    #[test]
    fn delivers_in_order_then_stops() {
        let (receiver, packets, stop, engine) = udp_engine(Duration::from_secs(5), 4);
        let handle = thread::spawn(move || engine.run());

        packets.send(vec![1, 2, 3]).unwrap();
        packets.send(vec![4, 5]).unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[4, 5]);

        drop(stop);
        assert_eq!(handle.join().unwrap(), StopReason::Shutdown);
    }

    #[test]
    fn queued_packets_are_written_before_stop() {
        let (receiver, packets, stop, engine) = udp_engine(Duration::from_secs(5), 16);
        for i in 0..16u8 {
            packets.send(vec![i; 8]).unwrap();
        }
        let handle = thread::spawn(move || engine.run());

        let mut buf = [0u8; 64];
        for i in 0..16u8 {
            let n = receiver.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], &[i; 8]);
        }

        stop.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), StopReason::Shutdown);
        assert!(packets.send(vec![0]).is_err(), "queue released after stop");
    }

    #[test]
    fn write_failure_is_a_transport_fault() {
        let listener = tcp::listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let (packets_tx, packets_rx) = bounded(4);
        let (_stop_tx, stop_rx) = bounded::<()>(1);
        let engine = DeliveryEngine {
            source: "test".into(),
            endpoint: Endpoint::Listening(listener),
            packets: packets_rx,
            stop: stop_rx,
            idle_timeout: Duration::from_secs(5),
        };
        let handle = thread::spawn(move || engine.run());
        drop(TcpStream::connect(addr).unwrap());

        // The peer is gone: keep feeding until a write fails.
        while packets_tx.send(vec![0x55; 4096]).is_ok() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.join().unwrap(), StopReason::TransportFault);
    }

    #[test]
    fn idle_timeout_is_a_fault() {
        let (_receiver, _packets, _stop, engine) = udp_engine(Duration::from_millis(100), 4);
        let reason = thread::spawn(move || engine.run()).join().unwrap();
        assert_eq!(reason, StopReason::IdleTimeout);
        assert!(reason.is_fault());
    }

    #[test]
    fn closed_queue_is_a_fault() {
        let (_receiver, packets, _stop, engine) = udp_engine(Duration::from_secs(5), 4);
        drop(packets);
        let reason = thread::spawn(move || engine.run()).join().unwrap();
        assert_eq!(reason, StopReason::QueueClosed);
    }

    #[test]
    fn passive_engine_closes_stream_on_stop() {
        let listener = tcp::listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let (packets_tx, packets_rx) = bounded(4);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let engine = DeliveryEngine {
            source: "test".into(),
            endpoint: Endpoint::Listening(listener),
            packets: packets_rx,
            stop: stop_rx,
            idle_timeout: Duration::from_secs(5),
        };
        let handle = thread::spawn(move || engine.run());

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        packets_tx.send(vec![0, 3, 9, 9, 9]).unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 3, 9, 9, 9]);

        stop_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), StopReason::Shutdown);

        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);
    }

    #[test]
    fn passive_engine_stops_while_accepting() {
        let listener = tcp::listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let (_packets_tx, packets_rx) = bounded::<Vec<u8>>(4);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let engine = DeliveryEngine {
            source: "test".into(),
            endpoint: Endpoint::Listening(listener),
            packets: packets_rx,
            stop: stop_rx,
            idle_timeout: Duration::from_millis(10),
        };
        let handle = thread::spawn(move || engine.run());

        // Longer than the idle timeout: accepting is not subject to it.
        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());

        drop(stop_tx);
        assert_eq!(handle.join().unwrap(), StopReason::Shutdown);
    }
}
