//! Audio wire frame codec
//!
//! Every frame is a single-line JSON header record, one line-feed
//! delimiter byte, then the samples as little-endian signed 16-bit
//! integers:
//!
//! ```text
//! {"acnt":"a","rm":"r","ppt":"p","cnt":2,"rate":48000}\n<s0_lo><s0_hi><s1_lo><s1_hi>
//! ```
//!
//! JSON string escaping guarantees the header itself never contains a
//! raw line feed, so the first 0x0A byte is always the header/payload
//! boundary. Payload bytes can legitimately hold the value 10, which is
//! why decoding scans for the first occurrence and never the last.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Header/payload delimiter byte (line feed)
pub const FRAME_DELIMITER: u8 = 0x0A;

/// Per-frame audio header record
///
/// The declared sample count is advisory; receivers derive the payload
/// length from the frame boundary, never from `cnt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioHeader {
    /// Account identifier
    pub acnt: String,
    /// Room identifier
    pub rm: String,
    /// Participant identifier
    pub ppt: String,
    /// Declared sample count (advisory)
    pub cnt: u32,
    /// Sample rate in Hz
    pub rate: u32,
}

/// An audio frame ready for encoding
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Frame header
    pub header: AudioHeader,
    /// Signed 16-bit samples
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Build a frame, forcing the header count to match the samples
    pub fn new(mut header: AudioHeader, samples: Vec<i16>) -> Self {
        header.cnt = samples.len() as u32;
        Self { header, samples }
    }

    /// Encode this frame into wire bytes
    pub fn encode(&self) -> Result<Bytes> {
        encode(&self.header, &self.samples)
    }
}

/// Encode a header and sample sequence into one wire frame
pub fn encode(header: &AudioHeader, samples: &[i16]) -> Result<Bytes> {
    let record = serde_json::to_vec(header)
        .map_err(|e| Error::Serialization(format!("Failed to serialize audio header: {}", e)))?;

    let mut buf = BytesMut::with_capacity(record.len() + 1 + samples.len() * 2);
    buf.put_slice(&record);
    buf.put_u8(FRAME_DELIMITER);
    for sample in samples {
        buf.put_i16_le(*sample);
    }

    Ok(buf.freeze())
}

/// Extract the sample payload from a wire frame
///
/// The boundary is the first delimiter byte; the header's declared
/// count is ignored. A trailing odd byte is dropped.
///
/// # Errors
///
/// Returns `Error::MalformedFrame` if no delimiter byte is present.
pub fn decode(frame: &[u8]) -> Result<Vec<i16>> {
    let boundary = frame
        .iter()
        .position(|b| *b == FRAME_DELIMITER)
        .ok_or_else(|| Error::MalformedFrame("no frame delimiter found".to_string()))?;

    let payload = &frame[boundary + 1..];
    Ok(payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Parse the header record of a wire frame (diagnostic use)
pub fn decode_header(frame: &[u8]) -> Result<AudioHeader> {
    let boundary = frame
        .iter()
        .position(|b| *b == FRAME_DELIMITER)
        .ok_or_else(|| Error::MalformedFrame("no frame delimiter found".to_string()))?;

    serde_json::from_slice(&frame[..boundary])
        .map_err(|e| Error::MalformedFrame(format!("invalid header record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(count: u32) -> AudioHeader {
        AudioHeader {
            acnt: "000-account".to_string(),
            rm: "000-room".to_string(),
            ppt: "000-participant".to_string(),
            cnt: count,
            rate: 48000,
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let samples = vec![1, 12, 123, 1234, -1, -32768, 32767];
        let frame = encode(&header(samples.len() as u32), &samples).unwrap();
        assert_eq!(decode(&frame).unwrap(), samples);
    }

    #[test]
    fn test_payload_may_contain_delimiter_byte() {
        // 10 = 0x000A encodes a raw line feed in the low byte;
        // 2570 = 0x0A0A puts one in both bytes.
        let samples = vec![10, 2570, 0, 10, -22006];
        let frame = encode(&header(samples.len() as u32), &samples).unwrap();
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.len(), samples.len());
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_decode_ignores_declared_count() {
        let samples = vec![5, 6, 7];
        let mut hdr = header(999);
        hdr.cnt = 999;
        let frame = encode(&hdr, &samples).unwrap();
        assert_eq!(decode(&frame).unwrap(), samples);
    }

    #[test]
    fn test_decode_empty_payload() {
        let frame = encode(&header(0), &[]).unwrap();
        assert_eq!(decode(&frame).unwrap(), Vec::<i16>::new());
    }

    #[test]
    fn test_decode_drops_odd_trailing_byte() {
        let mut frame = encode(&header(2), &[100, 200]).unwrap().to_vec();
        frame.push(0x7F);
        assert_eq!(decode(&frame).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_decode_without_delimiter_fails() {
        let err = decode(&[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn test_header_record_is_single_line() {
        let frame = encode(&header(4), &[1, 2, 3, 4]).unwrap();
        let boundary = frame.iter().position(|b| *b == FRAME_DELIMITER).unwrap();
        assert!(!frame[..boundary].contains(&FRAME_DELIMITER));
    }

    #[test]
    fn test_decode_header_fields() {
        let samples = vec![1, 12, 123, 1234];
        let frame = encode(&header(samples.len() as u32), &samples).unwrap();
        let hdr = decode_header(&frame).unwrap();
        assert_eq!(hdr.acnt, "000-account");
        assert_eq!(hdr.rm, "000-room");
        assert_eq!(hdr.ppt, "000-participant");
        assert_eq!(hdr.cnt, 4);
        assert_eq!(hdr.rate, 48000);
    }

    #[test]
    fn test_frame_new_forces_count() {
        let frame = AudioFrame::new(header(0), vec![1, 2, 3]);
        assert_eq!(frame.header.cnt, 3);
        let decoded = decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }
}
