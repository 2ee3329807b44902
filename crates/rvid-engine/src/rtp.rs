//! RFC 4175 payload format for uncompressed video, carried over standard RTP.
//!
//! Wire layout (network byte order throughout):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |        sequence number       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Extended Sequence Number   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|          Line No           |C|         Offset              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   ... one or two more line header fields if C is set ...      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      pixel group data                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `Length` is the octet count of pixel group data following this row
//! header (not including any continuation row header). `C` set on a row
//! header means a second row header for the same scan row directly
//! follows the first, each covering a separate pixel-group range, before
//! the pixel payload for either segment begins.

use crate::error::{EngineError, Result};

pub const RTP_HEADER_LEN: usize = 12;
pub const ROW_HEADER_LEN: usize = 6;
/// Extended sequence number + length field that precedes the row headers.
pub const PAYLOAD_HEADER_LEN: usize = 2;

/// Byte layout of a pixel group. Default is YUV 4:2:2 10-bit: 5 bytes / 2
/// pixels, per ST 2110-20 sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelGroup {
    pub bytes: usize,
    pub pixels: usize,
}

impl PixelGroup {
    pub const YUV422_10BIT: PixelGroup = PixelGroup { bytes: 5, pixels: 2 };

    /// Convert a pixel offset within a scan row to a byte offset, per the
    /// pixel-group descriptor. `pixel_offset` must land on a group boundary.
    pub fn byte_offset(&self, pixel_offset: u32) -> Result<usize> {
        if pixel_offset as usize % self.pixels != 0 {
            return Err(EngineError::InvalidArgument(format!(
                "pixel offset {pixel_offset} is not a multiple of the pixel-group width {}",
                self.pixels
            )));
        }
        Ok(pixel_offset as usize / self.pixels * self.bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn pack(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(EngineError::InvalidArgument("buffer too small for RTP header".into()));
        }
        buf[0] = 0x80; // V=2, P=0, X=0, CC=0
        buf[1] = (self.payload_type & 0x7f) | if self.marker { 0x80 } else { 0 };
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        Ok(())
    }

    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(EngineError::InvalidArgument("buffer too small for RTP header".into()));
        }
        if buf[0] >> 6 != 2 {
            return Err(EngineError::InvalidArgument("unsupported RTP version".into()));
        }
        Ok(RtpHeader {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// One scan-row segment described by a row header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSegment {
    pub field_id: bool,
    pub line_number: u16,
    pub continuation: bool,
    pub offset: u16,
    pub length: u16,
}

impl RowSegment {
    fn pack(&self, buf: &mut [u8]) {
        let line = (self.line_number & 0x7fff) | if self.field_id { 0x8000 } else { 0 };
        let offset = (self.offset & 0x7fff) | if self.continuation { 0x8000 } else { 0 };
        buf[0..2].copy_from_slice(&self.length.to_be_bytes());
        buf[2..4].copy_from_slice(&line.to_be_bytes());
        buf[4..6].copy_from_slice(&offset.to_be_bytes());
    }

    fn unpack(buf: &[u8]) -> Self {
        let length = u16::from_be_bytes([buf[0], buf[1]]);
        let line = u16::from_be_bytes([buf[2], buf[3]]);
        let offset = u16::from_be_bytes([buf[4], buf[5]]);
        RowSegment {
            field_id: line & 0x8000 != 0,
            line_number: line & 0x7fff,
            continuation: offset & 0x8000 != 0,
            offset: offset & 0x7fff,
            length,
        }
    }
}

/// A fully decoded RFC 4175 payload: the extended sequence number, one or
/// two row segments, and the pixel group bytes for each segment in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc4175Payload {
    pub extended_sequence_number: u16,
    pub segments: Vec<RowSegment>,
}

impl Rfc4175Payload {
    /// Packs the payload header (extended seq + row headers) into `buf`,
    /// returning the byte offset at which pixel group data should follow.
    /// `segments` must have length 1 or 2; a length-2 slice sets the
    /// continuation bit on the first segment automatically.
    pub fn pack_header(extended_sequence_number: u16, segments: &[RowSegment], buf: &mut [u8]) -> Result<usize> {
        if segments.is_empty() || segments.len() > 2 {
            return Err(EngineError::InvalidArgument("expected 1 or 2 row segments".into()));
        }
        let total = PAYLOAD_HEADER_LEN + ROW_HEADER_LEN * segments.len();
        if buf.len() < total {
            return Err(EngineError::InvalidArgument("buffer too small for RFC 4175 header".into()));
        }
        buf[0..2].copy_from_slice(&extended_sequence_number.to_be_bytes());
        let mut off = PAYLOAD_HEADER_LEN;
        for (i, seg) in segments.iter().enumerate() {
            let mut seg = *seg;
            seg.continuation = i + 1 < segments.len();
            seg.pack(&mut buf[off..off + ROW_HEADER_LEN]);
            off += ROW_HEADER_LEN;
        }
        Ok(off)
    }

    /// Parses the payload header starting at `buf[0]`, returning the
    /// decoded payload and the byte offset where pixel group data begins.
    pub fn unpack_header(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < PAYLOAD_HEADER_LEN + ROW_HEADER_LEN {
            return Err(EngineError::InvalidArgument("buffer too small for RFC 4175 header".into()));
        }
        let extended_sequence_number = u16::from_be_bytes([buf[0], buf[1]]);
        let mut off = PAYLOAD_HEADER_LEN;
        let mut segments = Vec::with_capacity(2);
        let first = RowSegment::unpack(&buf[off..off + ROW_HEADER_LEN]);
        off += ROW_HEADER_LEN;
        let has_second = first.continuation;
        segments.push(first);
        if has_second {
            if buf.len() < off + ROW_HEADER_LEN {
                return Err(EngineError::InvalidArgument("truncated continuation row header".into()));
            }
            segments.push(RowSegment::unpack(&buf[off..off + ROW_HEADER_LEN]));
            off += ROW_HEADER_LEN;
        }
        Ok((Rfc4175Payload { extended_sequence_number, segments }, off))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtp_header_round_trip() {
        let hdr = RtpHeader { marker: true, payload_type: 112, sequence_number: 0xbeef, timestamp: 0x1122_3344, ssrc: 0xcafe_babe };
        let mut buf = [0u8; RTP_HEADER_LEN];
        hdr.pack(&mut buf).unwrap();
        let back = RtpHeader::unpack(&buf).unwrap();
        assert_eq!(hdr, back);
    }

    #[test]
    fn sequence_number_wraps_at_16_bits() {
        let hdr = RtpHeader { marker: false, payload_type: 112, sequence_number: 0xffff, timestamp: 0, ssrc: 0 };
        let mut buf = [0u8; RTP_HEADER_LEN];
        hdr.pack(&mut buf).unwrap();
        let back = RtpHeader::unpack(&buf).unwrap();
        assert_eq!(back.sequence_number, 0xffff);
        let next = back.sequence_number.wrapping_add(1);
        assert_eq!(next, 0);
    }

    #[test]
    fn single_row_segment_round_trip() {
        let seg = RowSegment { field_id: false, line_number: 42, continuation: false, offset: 0, length: 1200 };
        let mut buf = [0u8; PAYLOAD_HEADER_LEN + ROW_HEADER_LEN];
        let hdr_len = Rfc4175Payload::pack_header(7, &[seg], &mut buf).unwrap();
        assert_eq!(hdr_len, buf.len());
        let (payload, off) = Rfc4175Payload::unpack_header(&buf).unwrap();
        assert_eq!(off, hdr_len);
        assert_eq!(payload.extended_sequence_number, 7);
        assert_eq!(payload.segments, vec![seg]);
    }

    #[test]
    fn two_row_segments_set_continuation_bit() {
        let seg_a = RowSegment { field_id: false, line_number: 10, continuation: false, offset: 0, length: 600 };
        let seg_b = RowSegment { field_id: false, line_number: 11, continuation: false, offset: 0, length: 600 };
        let mut buf = [0u8; PAYLOAD_HEADER_LEN + ROW_HEADER_LEN * 2];
        Rfc4175Payload::pack_header(1, &[seg_a, seg_b], &mut buf).unwrap();
        let (payload, off) = Rfc4175Payload::unpack_header(&buf).unwrap();
        assert_eq!(off, buf.len());
        assert_eq!(payload.segments.len(), 2);
        assert!(!payload.segments[1].continuation);
        assert_eq!(payload.segments[1].line_number, 11);
    }

    #[test]
    fn pixel_group_byte_offset() {
        let pg = PixelGroup::YUV422_10BIT;
        assert_eq!(pg.byte_offset(0).unwrap(), 0);
        assert_eq!(pg.byte_offset(2).unwrap(), 5);
        assert_eq!(pg.byte_offset(4).unwrap(), 10);
    }

    #[test]
    fn pixel_group_rejects_misaligned_offset() {
        let pg = PixelGroup::YUV422_10BIT;
        assert!(pg.byte_offset(1).is_err());
    }
}
