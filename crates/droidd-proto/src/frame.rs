//! Binary frame codec for the binary channel.
//!
//! Wire layout: a fixed 25-byte header followed by the payload.
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 1    | magic (0xA7)   |
//! | 1      | 1    | reserved (0x00)|
//! | 2      | 1    | flags          |
//! | 3      | 16   | correlation id |
//! | 19     | 2    | payload type   |
//! | 21     | 4    | length (BE)    |
//!
//! The correlation id embeds the first 16 UTF-8 bytes of the originating
//! request id, zero-padded. Length is the only multi-byte numeric field
//! and is big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const FRAME_MAGIC: u8 = 0xA7;
pub const HEADER_LEN: usize = 25;

/// Frame flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    pub const NONE: Self = Self(0);
    pub const COMPRESSED: Self = Self(1);
    pub const CHUNKED: Self = Self(2);
    pub const FINAL_CHUNK: Self = Self(4);

    pub fn has(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) != 0
    }

    pub fn set(&mut self, flag: FrameFlags) {
        self.0 |= flag.0;
    }
}

/// Payload kind codes (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    ScreenshotPng = 0x01,
    ScreenshotJpeg = 0x02,
    VideoH264 = 0x03,
    FileData = 0x04,
    HierarchyXml = 0x05,
}

impl PayloadKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PayloadKind::ScreenshotPng),
            0x02 => Some(PayloadKind::ScreenshotJpeg),
            0x03 => Some(PayloadKind::VideoH264),
            0x04 => Some(PayloadKind::FileData),
            0x05 => Some(PayloadKind::HierarchyXml),
            _ => None,
        }
    }
}

/// A binary-channel frame
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryFrame {
    pub flags: FrameFlags,
    /// First 16 UTF-8 bytes of the originating request id, zero-padded
    pub correlation_id: [u8; 16],
    pub payload_kind: PayloadKind,
    pub payload: Bytes,
}

/// Binary-frame decode failures
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("bad magic byte: {0:#04x}")]
    BadMagic(u8),
    #[error("reserved byte not zero: {0:#04x}")]
    BadReserved(u8),
    #[error("unknown payload kind: {0:#04x}")]
    UnknownPayloadKind(u8),
    #[error("length mismatch: header says {expected}, buffer has {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

impl BinaryFrame {
    /// Build a single (unchunked, final) frame for a request id
    pub fn single(request_id: &str, kind: PayloadKind, payload: Bytes) -> Self {
        let mut flags = FrameFlags::NONE;
        flags.set(FrameFlags::FINAL_CHUNK);
        BinaryFrame {
            flags,
            correlation_id: correlation_id_of(request_id),
            payload_kind: kind,
            payload,
        }
    }

    pub fn is_final_chunk(&self) -> bool {
        self.flags.has(FrameFlags::FINAL_CHUNK)
    }

    pub fn is_chunked(&self) -> bool {
        self.flags.has(FrameFlags::CHUNKED)
    }

    /// Encode header + payload into one buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(FRAME_MAGIC);
        buf.put_u8(0x00);
        buf.put_u8(self.flags.0);
        buf.put_slice(&self.correlation_id);
        buf.put_u8(0x00);
        buf.put_u8(self.payload_kind as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a complete frame. The buffer must hold exactly the header
    /// plus the payload announced in the length field.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::Truncated(data.len()));
        }
        let mut buf = data;
        let magic = buf.get_u8();
        if magic != FRAME_MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        let reserved = buf.get_u8();
        if reserved != 0x00 {
            return Err(FrameError::BadReserved(reserved));
        }
        let flags = FrameFlags(buf.get_u8());
        let mut correlation_id = [0u8; 16];
        buf.copy_to_slice(&mut correlation_id);
        let _kind_hi = buf.get_u8();
        let kind_code = buf.get_u8();
        let kind =
            PayloadKind::from_code(kind_code).ok_or(FrameError::UnknownPayloadKind(kind_code))?;
        let length = buf.get_u32() as usize;
        if buf.remaining() != length {
            return Err(FrameError::LengthMismatch {
                expected: length,
                actual: buf.remaining(),
            });
        }
        Ok(BinaryFrame {
            flags,
            correlation_id,
            payload_kind: kind,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Correlation id as a string, trailing zero padding stripped
    pub fn correlation_str(&self) -> String {
        let end = self
            .correlation_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(16);
        String::from_utf8_lossy(&self.correlation_id[..end]).into_owned()
    }
}

/// First 16 UTF-8 bytes of a request id, zero-padded. Lossy for ids
/// longer than 16 bytes.
pub fn correlation_id_of(request_id: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = request_id.as_bytes();
    let n = bytes.len().min(16);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reference_vector() {
        let frame = BinaryFrame::single(
            "abcdefghijklmnop",
            PayloadKind::ScreenshotPng,
            Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
        );
        let encoded = frame.encode();
        let expected_header: &[u8] = &[
            0xA7, 0x00, 0x04, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A, 0x6B,
            0x6C, 0x6D, 0x6E, 0x6F, 0x70, 0x00, 0x01, 0x00, 0x00, 0x00, 0x08,
        ];
        assert_eq!(&encoded[..HEADER_LEN], expected_header);
        assert_eq!(&encoded[HEADER_LEN..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_roundtrip() {
        let mut flags = FrameFlags::NONE;
        flags.set(FrameFlags::COMPRESSED);
        flags.set(FrameFlags::FINAL_CHUNK);
        let frame = BinaryFrame {
            flags,
            correlation_id: correlation_id_of("req-42"),
            payload_kind: PayloadKind::HierarchyXml,
            payload: Bytes::from_static(b"<hierarchy/>"),
        };
        let decoded = BinaryFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.correlation_str(), "req-42");
    }

    #[test]
    fn test_empty_payload_valid() {
        let frame = BinaryFrame::single("r1", PayloadKind::FileData, Bytes::new());
        let encoded = frame.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        let decoded = BinaryFrame::decode(&encoded).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_short_id_zero_padded() {
        let id = correlation_id_of("abc");
        assert_eq!(&id[..3], b"abc");
        assert!(id[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_long_id_truncated() {
        let id = correlation_id_of("0123456789abcdef-overflow");
        assert_eq!(&id, b"0123456789abcdef");
    }

    #[test]
    fn test_bad_magic_rejected() {
        let frame = BinaryFrame::single("r1", PayloadKind::ScreenshotPng, Bytes::new());
        let mut encoded = frame.encode().to_vec();
        encoded[0] = 0x00;
        assert!(matches!(
            BinaryFrame::decode(&encoded),
            Err(FrameError::BadMagic(0x00))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let frame = BinaryFrame::single(
            "r1",
            PayloadKind::ScreenshotPng,
            Bytes::from_static(&[1, 2, 3]),
        );
        let mut encoded = frame.encode().to_vec();
        encoded.pop();
        assert!(matches!(
            BinaryFrame::decode(&encoded),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_rejected() {
        assert!(matches!(
            BinaryFrame::decode(&[0xA7, 0x00]),
            Err(FrameError::Truncated(2))
        ));
    }

    #[test]
    fn test_chunk_flags() {
        let mut flags = FrameFlags::NONE;
        flags.set(FrameFlags::CHUNKED);
        let frame = BinaryFrame {
            flags,
            correlation_id: correlation_id_of("r1"),
            payload_kind: PayloadKind::VideoH264,
            payload: Bytes::from_static(&[0xFF]),
        };
        assert!(frame.is_chunked());
        assert!(!frame.is_final_chunk());
    }
}
