//! RX session: depacketizes incoming RFC 4175 packets into frame buffers
//! (or passes them through untouched), and hands finished items to the
//! application over a bounded single-producer/single-consumer queue.
//!
//! The poll loop is the sole producer (`ingest_packet`) and the
//! application thread is the sole consumer (`try_recv`), matching the
//! engine's one-thread-per-role concurrency model. When the consumer falls
//! behind and the queue fills, the newest item is dropped and the producer
//! gets `Busy` back rather than blocking the poll loop.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::{EngineError, Result};
use crate::rtp::{PixelGroup, Rfc4175Payload, RtpHeader, RTP_HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Deliver fully assembled video frames.
    Frame,
    /// Deliver raw RTP packets, unassembled, for external processing.
    Rtp,
}

#[derive(Debug, Clone)]
pub enum DeliveredItem {
    Frame(Vec<u8>),
    RtpPacket(Vec<u8>),
}

struct FrameAssembly {
    buf: Vec<u8>,
    bytes_written: usize,
}

pub struct RxSession {
    frame_size: usize,
    mode: DeliveryMode,
    pixel_group: PixelGroup,
    /// Octets per scan row — the row header's `line_number` selects which
    /// row a segment belongs to, and `offset` (converted from pixel units
    /// via `PixelGroup::byte_offset`) is row-local, never frame-linear.
    bytes_per_row: usize,
    tx: Sender<DeliveredItem>,
    rx: Receiver<DeliveredItem>,
    assembly: std::sync::Mutex<FrameAssembly>,
}

impl RxSession {
    pub fn new(
        frame_size: usize,
        mode: DeliveryMode,
        queue_capacity: usize,
        pixel_group: PixelGroup,
        bytes_per_row: usize,
    ) -> Self {
        let (tx, rx) = bounded(queue_capacity.max(1));
        RxSession {
            frame_size,
            mode,
            pixel_group,
            bytes_per_row,
            tx,
            rx,
            assembly: std::sync::Mutex::new(FrameAssembly { buf: vec![0u8; frame_size], bytes_written: 0 }),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Poll-loop side, non-blocking producer. `packet` is a full RTP
    /// packet (header + RFC 4175 payload). Returns `Busy` if the delivery
    /// queue is full — the caller should drop this packet and continue.
    pub fn ingest_packet(&self, packet: &[u8]) -> Result<()> {
        if packet.len() < RTP_HEADER_LEN {
            return Err(EngineError::InvalidArgument("packet shorter than RTP header".into()));
        }
        let header = RtpHeader::unpack(packet)?;

        if self.mode == DeliveryMode::Rtp {
            return self.deliver(DeliveredItem::RtpPacket(packet.to_vec()));
        }

        let (payload, hdr_len) = Rfc4175Payload::unpack_header(&packet[RTP_HEADER_LEN..])?;
        let body = &packet[RTP_HEADER_LEN + hdr_len..];

        let mut assembly = self.assembly.lock().unwrap();
        let mut cursor = 0usize;
        for seg in &payload.segments {
            let row_start = seg.line_number as usize * self.bytes_per_row;
            let row_offset = self.pixel_group.byte_offset(seg.offset as u32)?;
            let offset = row_start + row_offset;
            let length = seg.length as usize;
            if offset + length > self.frame_size {
                return Err(EngineError::InvalidOffset { offset, frame_size: self.frame_size });
            }
            if cursor + length > body.len() {
                return Err(EngineError::InvalidArgument("segment length exceeds packet body".into()));
            }
            assembly.buf[offset..offset + length].copy_from_slice(&body[cursor..cursor + length]);
            assembly.bytes_written += length;
            cursor += length;
        }
        let _ = payload.extended_sequence_number;

        if header.marker {
            let finished = std::mem::replace(&mut assembly.buf, vec![0u8; self.frame_size]);
            assembly.bytes_written = 0;
            drop(assembly);
            return self.deliver(DeliveredItem::Frame(finished));
        }

        Ok(())
    }

    fn deliver(&self, item: DeliveredItem) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EngineError::Busy),
            Err(TrySendError::Disconnected(_)) => Err(EngineError::NotFound("session closed".into())),
        }
    }

    /// Application side, non-blocking consumer. Returns `None` when
    /// nothing has been delivered yet.
    pub fn try_recv(&self) -> Option<DeliveredItem> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::{PixelGroup, RowSegment};

    fn build_packet(marker: bool, seq: u16, segs: &[(RowSegment, &[u8])]) -> Vec<u8> {
        let segments: Vec<RowSegment> = segs.iter().map(|(s, _)| *s).collect();
        let hdr_len = 2 + 6 * segments.len();
        let body_len: usize = segs.iter().map(|(_, b)| b.len()).sum();
        let mut buf = vec![0u8; RTP_HEADER_LEN + hdr_len + body_len];
        RtpHeader { marker, payload_type: 112, sequence_number: seq, timestamp: 0, ssrc: 1 }
            .pack(&mut buf[..RTP_HEADER_LEN])
            .unwrap();
        Rfc4175Payload::pack_header(seq, &segments, &mut buf[RTP_HEADER_LEN..RTP_HEADER_LEN + hdr_len]).unwrap();
        let mut off = RTP_HEADER_LEN + hdr_len;
        for (_, body) in segs {
            buf[off..off + body.len()].copy_from_slice(body);
            off += body.len();
        }
        buf
    }

    #[test]
    fn single_packet_frame_delivers_on_marker() {
        let rx = RxSession::new(1024, DeliveryMode::Frame, 4, PixelGroup::YUV422_10BIT, 1024);
        let seg = RowSegment { field_id: false, line_number: 0, continuation: false, offset: 0, length: 10 };
        let pkt = build_packet(true, 0, &[(seg, &[7u8; 10])]);
        rx.ingest_packet(&pkt).unwrap();
        match rx.try_recv().unwrap() {
            DeliveredItem::Frame(buf) => assert_eq!(&buf[0..10], &[7u8; 10]),
            _ => panic!("expected frame"),
        }
    }

    #[test]
    fn rtp_mode_delivers_raw_packets() {
        let rx = RxSession::new(1024, DeliveryMode::Rtp, 4, PixelGroup::YUV422_10BIT, 1024);
        let seg = RowSegment { field_id: false, line_number: 0, continuation: false, offset: 0, length: 5 };
        let pkt = build_packet(false, 0, &[(seg, &[1, 2, 3, 4, 5])]);
        rx.ingest_packet(&pkt).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), DeliveredItem::RtpPacket(_)));
    }

    #[test]
    fn offset_beyond_frame_size_is_rejected() {
        let rx = RxSession::new(16, DeliveryMode::Frame, 4, PixelGroup::YUV422_10BIT, 16);
        // Row-local pixel offset 4 converts to byte offset 10 (4 / 2 * 5); plus
        // length 10 that runs past the 16-byte frame.
        let seg = RowSegment { field_id: false, line_number: 0, continuation: false, offset: 4, length: 10 };
        let pkt = build_packet(true, 0, &[(seg, &[0u8; 10])]);
        assert!(matches!(rx.ingest_packet(&pkt), Err(EngineError::InvalidOffset { .. })));
    }

    #[test]
    fn multi_row_reassembly_with_row_local_offsets() {
        // Two rows of 20 bytes each (4 pixel groups/row at 5 bytes/group),
        // one packet per row, second packet starting mid-row at a non-zero
        // row-local pixel offset.
        let bytes_per_row = 20;
        let rx = RxSession::new(bytes_per_row * 2, DeliveryMode::Frame, 4, PixelGroup::YUV422_10BIT, bytes_per_row);

        let seg0 = RowSegment { field_id: false, line_number: 0, continuation: false, offset: 0, length: 10 };
        let pkt0 = build_packet(false, 0, &[(seg0, &[0xAAu8; 10])]);
        rx.ingest_packet(&pkt0).unwrap();

        // Row 1, row-local pixel offset 4 -> byte offset 10 within the row,
        // absolute frame offset bytes_per_row + 10 = 30.
        let seg1 = RowSegment { field_id: false, line_number: 1, continuation: false, offset: 4, length: 10 };
        let pkt1 = build_packet(true, 1, &[(seg1, &[0xBBu8; 10])]);
        rx.ingest_packet(&pkt1).unwrap();

        match rx.try_recv().unwrap() {
            DeliveredItem::Frame(buf) => {
                assert_eq!(&buf[0..10], &[0xAAu8; 10]);
                assert_eq!(&buf[10..20], &[0u8; 10]);
                assert_eq!(&buf[20..30], &[0u8; 10]);
                assert_eq!(&buf[30..40], &[0xBBu8; 10]);
            }
            _ => panic!("expected frame"),
        }
    }

    #[test]
    fn full_queue_reports_busy_and_drops_newest() {
        let rx = RxSession::new(1024, DeliveryMode::Rtp, 1, PixelGroup::YUV422_10BIT, 1024);
        let seg = RowSegment { field_id: false, line_number: 0, continuation: false, offset: 0, length: 1 };
        let pkt_a = build_packet(false, 0, &[(seg, &[1])]);
        let pkt_b = build_packet(false, 1, &[(seg, &[2])]);
        rx.ingest_packet(&pkt_a).unwrap();
        assert!(matches!(rx.ingest_packet(&pkt_b), Err(EngineError::Busy)));
        match rx.try_recv().unwrap() {
            DeliveredItem::RtpPacket(p) => {
                let hdr = RtpHeader::unpack(&p).unwrap();
                assert_eq!(hdr.sequence_number, 0);
            }
            _ => panic!("expected rtp packet"),
        }
    }

    #[test]
    fn no_data_returns_none() {
        let rx = RxSession::new(1024, DeliveryMode::Frame, 4, PixelGroup::YUV422_10BIT, 1024);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn pixel_group_default_used_for_offset_math() {
        let pg = PixelGroup::YUV422_10BIT;
        assert_eq!(pg.bytes, 5);
        assert_eq!(pg.pixels, 2);
    }
}
