//! Datagram Plane: the unreliable, unordered side channel for
//! best-effort signals (progress pings, coarse logs) that aren't worth the
//! cost of a reliable stream.

pub const MAX_DATAGRAM_PAYLOAD_SIZE: usize = 1200;
const HEADER_SIZE: usize = 6;

/// `[channelId, flags, be32(requestId)]`, the fixed prefix of every
/// datagram. `requestId = 0` means "session-global", not tied to any
/// in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    pub channel_id: u8,
    pub flags: u8,
    pub request_ordinal: u32,
}

impl DatagramHeader {
    pub fn new(channel_id: u8, request_ordinal: u32) -> Self {
        Self {
            channel_id,
            flags: 0,
            request_ordinal,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.channel_id;
        buf[1] = self.flags;
        buf[2..].copy_from_slice(&self.request_ordinal.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            channel_id: bytes[0],
            flags: bytes[1],
            request_ordinal: u32::from_be_bytes(bytes[2..].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(Vec<u8>),
    /// Oversize: silently dropped and a metric recorded; the caller
    /// receives `dropped_oversize`.
    DroppedOversize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// Header well-formed and not suppressed by the datagrams-disabled
    /// rule; deliver the remaining bytes to whoever subscribes to this
    /// `(channel_id, request_ordinal)` pair.
    Deliver {
        header: DatagramHeader,
        payload: Vec<u8>,
    },
    /// Rejected and dropped with a log: `flags != 0x00` or `channelId ==
    /// 0x00`.
    Malformed,
    /// Datagrams weren't negotiated; a peer that sends one anyway is
    /// tolerated, not fatal.
    Unsupported,
}

/// Hook for recording dropped/rejected datagrams. Not wired to any concrete
/// backend; a no-op by default, the engine doesn't prescribe one.
pub trait DatagramMetrics: Send + Sync + 'static {
    fn oversize_dropped(&self) {}
    fn malformed_dropped(&self) {}
    fn unsupported_dropped(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDatagramMetrics;

impl DatagramMetrics for NoopDatagramMetrics {}

/// Encodes/decodes the Datagram Plane's wire format and enforces its
/// invariants. Delivery to per-channel subscribers, and the backpressure
/// signal surfaced to emitting handlers, are the caller's responsibility;
/// this type is the stateless codec plus the `datagramsSupported` gate.
pub struct DatagramPlane<M: DatagramMetrics = NoopDatagramMetrics> {
    datagrams_supported: bool,
    metrics: M,
}

impl DatagramPlane<NoopDatagramMetrics> {
    pub fn new(datagrams_supported: bool) -> Self {
        Self {
            datagrams_supported,
            metrics: NoopDatagramMetrics,
        }
    }
}

impl<M: DatagramMetrics> DatagramPlane<M> {
    pub fn with_metrics(datagrams_supported: bool, metrics: M) -> Self {
        Self {
            datagrams_supported,
            metrics,
        }
    }

    /// Builds the wire bytes for one outbound datagram, or reports
    /// `DroppedOversize` if `header ‖ payload` would exceed
    /// [`MAX_DATAGRAM_PAYLOAD_SIZE`].
    pub fn send(&self, header: DatagramHeader, payload: &[u8]) -> SendOutcome {
        if HEADER_SIZE + payload.len() > MAX_DATAGRAM_PAYLOAD_SIZE {
            self.metrics.oversize_dropped();
            return SendOutcome::DroppedOversize;
        }
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(payload);
        SendOutcome::Sent(buf)
    }

    /// Parses a received datagram and applies the header validation rules.
    pub fn recv(&self, datagram: &[u8]) -> RecvOutcome {
        if !self.datagrams_supported {
            self.metrics.unsupported_dropped();
            return RecvOutcome::Unsupported;
        }
        if datagram.len() < HEADER_SIZE {
            self.metrics.malformed_dropped();
            return RecvOutcome::Malformed;
        }
        let header_bytes: [u8; HEADER_SIZE] = datagram[..HEADER_SIZE].try_into().unwrap();
        let header = DatagramHeader::decode(&header_bytes);
        if header.flags != 0x00 || header.channel_id == 0x00 {
            self.metrics.malformed_dropped();
            return RecvOutcome::Malformed;
        }
        RecvOutcome::Deliver {
            header,
            payload: datagram[HEADER_SIZE..].to_vec(),
        }
    }
}

/// A "please slow down" signal surfaced to emitting handlers when the
/// transport reports sustained datagram loss Non-critical
/// channels (progress, log) should throttle before higher-priority ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    Normal,
    SlowDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let header = DatagramHeader::new(3, 42);
        let bytes = header.encode();
        assert_eq!(DatagramHeader::decode(&bytes), header);
    }

    #[test]
    fn oversize_send_is_dropped() {
        let plane = DatagramPlane::new(true);
        let payload = vec![0u8; MAX_DATAGRAM_PAYLOAD_SIZE];
        assert_eq!(
            plane.send(DatagramHeader::new(1, 0), &payload),
            SendOutcome::DroppedOversize
        );
    }

    #[test]
    fn send_within_budget_succeeds() {
        let plane = DatagramPlane::new(true);
        let payload = vec![1u8; 10];
        match plane.send(DatagramHeader::new(1, 0), &payload) {
            SendOutcome::Sent(bytes) => assert_eq!(bytes.len(), HEADER_SIZE + 10),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn recv_rejects_nonzero_flags() {
        let plane = DatagramPlane::new(true);
        let mut bytes = DatagramHeader::new(1, 0).encode().to_vec();
        bytes[1] = 0x01;
        assert_eq!(plane.recv(&bytes), RecvOutcome::Malformed);
    }

    #[test]
    fn recv_rejects_channel_zero() {
        let plane = DatagramPlane::new(true);
        let bytes = DatagramHeader::new(0, 0).encode();
        assert_eq!(plane.recv(&bytes), RecvOutcome::Malformed);
    }

    #[test]
    fn recv_is_tolerant_when_datagrams_unsupported() {
        let plane = DatagramPlane::new(false);
        let bytes = DatagramHeader::new(1, 0).encode();
        assert_eq!(plane.recv(&bytes), RecvOutcome::Unsupported);
    }

    #[test]
    fn recv_delivers_well_formed_datagram() {
        let plane = DatagramPlane::new(true);
        let mut bytes = DatagramHeader::new(1, 7).encode().to_vec();
        bytes.extend_from_slice(b"hi");
        match plane.recv(&bytes) {
            RecvOutcome::Deliver { header, payload } => {
                assert_eq!(header.channel_id, 1);
                assert_eq!(header.request_ordinal, 7);
                assert_eq!(payload, b"hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
