//! Warm-up log codec.
//!
//! The log is a fixed header followed by a flat, length-prefixed sequence of
//! records. All integers are little-endian; string and identity encodings are
//! fixed for a given format version. The file is written once at the end of
//! the recording phase and read once at replay start, never both at the same
//! time.
//!
//! Decoding is deliberately strict about what it does not understand and
//! lenient about what it merely lost: an unknown format version is a hard
//! error (replaying a log we cannot fully interpret would produce wrong
//! warm-up decisions), while a log truncated mid-write keeps every record
//! before the truncation point and flags the loss, since partial warm-up
//! data is still useful.

use ember_core::{CallSiteShapes, HolderFingerprint, MethodKey, ReceiverTypeHint, WarmUpRecord};

// =============================================================================
// Format Constants
// =============================================================================

/// Magic bytes identifying a warm-up log.
pub const MAGIC: [u8; 4] = *b"EWUP";

/// Current log format version.
pub const FORMAT_VERSION: u32 = 1;

/// Encoded header size in bytes: magic + version + window + record count.
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// Minimum prefix needed to identify a log at all: magic + version.
const IDENT_LEN: usize = 8;

// =============================================================================
// Header
// =============================================================================

/// Fixed log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Format version the log was written with.
    pub format_version: u32,
    /// Length of the recording window, in milliseconds.
    pub record_window_millis: u64,
    /// Number of records the writer intended to flush.
    pub record_count: u32,
}

// =============================================================================
// Decode Result
// =============================================================================

/// A successfully decoded log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    /// The log header.
    pub header: LogHeader,
    /// Records in original log order, possibly fewer than
    /// `header.record_count` if the log was truncated.
    pub records: Vec<WarmUpRecord>,
    /// Whether the log ended before `record_count` complete records. The
    /// decoded prefix is still usable.
    pub truncated: bool,
}

/// Hard decode failures. None of these carry partial data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes do not begin with a recognizable log identity.
    NotALog,
    /// The log was written by a format this build cannot fully interpret.
    UnsupportedVersion(u32),
    /// A structurally complete frame contained malformed content.
    Corrupt(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NotALog => write!(f, "not a warm-up log"),
            DecodeError::UnsupportedVersion(v) => {
                write!(f, "unsupported log format version {v} (expected {FORMAT_VERSION})")
            }
            DecodeError::Corrupt(what) => write!(f, "corrupt warm-up log: {what}"),
        }
    }
}

impl std::error::Error for DecodeError {}

// =============================================================================
// Encoding
// =============================================================================

/// Encode records into log bytes.
pub fn encode(record_window_millis: u64, records: &[WarmUpRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + records.len() * 64);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&record_window_millis.to_le_bytes());
    out.extend_from_slice(&(records.len() as u32).to_le_bytes());

    let mut body = Vec::with_capacity(64);
    for record in records {
        body.clear();
        encode_record(record, &mut body);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
    }
    out
}

fn encode_record(record: &WarmUpRecord, out: &mut Vec<u8>) {
    out.extend_from_slice(&record.key.holder().as_u64().to_le_bytes());
    encode_str(record.key.name(), out);
    encode_str(record.key.descriptor(), out);
    out.extend_from_slice(&record.invocation_weight.to_le_bytes());
    out.extend_from_slice(&(record.shapes.len() as u32).to_le_bytes());
    for shape in record.shapes.iter() {
        out.push(shape.tag());
        let payload = match shape {
            ReceiverTypeHint::Concrete(t) => t.as_u64(),
            _ => 0,
        };
        out.extend_from_slice(&payload.to_le_bytes());
    }
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode log bytes.
///
/// A log cut off inside the header (before the window and count fields) still
/// identifies itself; it decodes to zero records with the truncation flag
/// set. Anything shorter than the identity prefix, or with the wrong magic,
/// is rejected outright.
pub fn decode(bytes: &[u8]) -> Result<DecodedLog, DecodeError> {
    if bytes.len() < IDENT_LEN || bytes[..4] != MAGIC {
        return Err(DecodeError::NotALog);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    if bytes.len() < HEADER_LEN {
        return Ok(DecodedLog {
            header: LogHeader {
                format_version: version,
                record_window_millis: 0,
                record_count: 0,
            },
            records: Vec::new(),
            truncated: true,
        });
    }

    let mut reader = ByteReader::new(&bytes[IDENT_LEN..]);
    // Both reads are covered by the HEADER_LEN check above.
    let record_window_millis = reader.read_u64().unwrap_or(0);
    let record_count = reader.read_u32().unwrap_or(0);
    let header = LogHeader {
        format_version: version,
        record_window_millis,
        record_count,
    };

    // Capacity hint only; a corrupt count must not drive a huge allocation.
    let mut records = Vec::with_capacity(record_count.min(4096) as usize);
    let mut truncated = false;
    for _ in 0..record_count {
        let Some(frame_len) = reader.read_u32() else {
            truncated = true;
            break;
        };
        let Some(frame) = reader.read_bytes(frame_len as usize) else {
            truncated = true;
            break;
        };
        records.push(decode_record(frame)?);
    }

    if !truncated && !reader.is_empty() {
        return Err(DecodeError::Corrupt("trailing bytes after final record"));
    }

    Ok(DecodedLog {
        header,
        records,
        truncated,
    })
}

fn decode_record(frame: &[u8]) -> Result<WarmUpRecord, DecodeError> {
    let mut r = ByteReader::new(frame);
    let holder = r
        .read_u64()
        .ok_or(DecodeError::Corrupt("record missing holder fingerprint"))?;
    let name = decode_str(&mut r)?;
    let descriptor = decode_str(&mut r)?;
    let weight = r
        .read_u64()
        .ok_or(DecodeError::Corrupt("record missing invocation weight"))?;
    let shape_count = r
        .read_u32()
        .ok_or(DecodeError::Corrupt("record missing shape count"))?;

    let mut shapes = CallSiteShapes::new();
    for _ in 0..shape_count {
        let tag = r
            .read_u8()
            .ok_or(DecodeError::Corrupt("shape entry missing tag"))?;
        let payload = r
            .read_u64()
            .ok_or(DecodeError::Corrupt("shape entry missing payload"))?;
        let hint = ReceiverTypeHint::from_tag(tag, payload)
            .ok_or(DecodeError::Corrupt("unknown receiver shape tag"))?;
        shapes.insert(hint);
    }
    if !r.is_empty() {
        return Err(DecodeError::Corrupt("record frame has trailing bytes"));
    }

    Ok(WarmUpRecord::new(
        MethodKey::new(HolderFingerprint(holder), name, descriptor),
        shapes,
        weight,
    ))
}

fn decode_str(r: &mut ByteReader<'_>) -> Result<String, DecodeError> {
    let len = r
        .read_u32()
        .ok_or(DecodeError::Corrupt("string missing length prefix"))?;
    let bytes = r
        .read_bytes(len as usize)
        .ok_or(DecodeError::Corrupt("string shorter than its length prefix"))?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| DecodeError::Corrupt("string is not valid UTF-8"))
}

// =============================================================================
// Byte Reader
// =============================================================================

/// Minimal forward-only reader over a byte slice.
struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn read_u8(&mut self) -> Option<u8> {
        let (&b, rest) = self.bytes.split_first()?;
        self.bytes = rest;
        Some(b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        let chunk = self.read_bytes(4)?;
        Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    fn read_u64(&mut self) -> Option<u64> {
        let chunk = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        Some(u64::from_le_bytes(buf))
    }

    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < len {
            return None;
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Some(head)
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::TypeFingerprint;

    fn key(holder: &str, name: &str) -> MethodKey {
        MethodKey::new(HolderFingerprint::of(holder.as_bytes()), name, "(I)V")
    }

    fn sample_records() -> Vec<WarmUpRecord> {
        vec![
            WarmUpRecord::new(
                key("com/example/A", "foo"),
                [ReceiverTypeHint::Concrete(TypeFingerprint::of(b"com/example/A"))]
                    .into_iter()
                    .collect(),
                20_000,
            ),
            WarmUpRecord::new(
                key("com/example/B", "bar"),
                [
                    ReceiverTypeHint::Concrete(TypeFingerprint::of(b"com/example/B")),
                    ReceiverTypeHint::NullSeen,
                ]
                .into_iter()
                .collect(),
                500,
            ),
            WarmUpRecord::new(key("com/example/C", "baz"), CallSiteShapes::new(), 1),
        ]
    }

    // =========================================================================
    // Round Trip
    // =========================================================================

    #[test]
    fn test_round_trip_preserves_records() {
        let records = sample_records();
        let bytes = encode(10_000, &records);
        let log = decode(&bytes).unwrap();

        assert!(!log.truncated);
        assert_eq!(log.header.format_version, FORMAT_VERSION);
        assert_eq!(log.header.record_window_millis, 10_000);
        assert_eq!(log.header.record_count, 3);
        assert_eq!(log.records, records);
    }

    #[test]
    fn test_round_trip_empty_log() {
        let bytes = encode(0, &[]);
        let log = decode(&bytes).unwrap();
        assert!(log.records.is_empty());
        assert!(!log.truncated);
    }

    #[test]
    fn test_round_trip_unobserved_shape() {
        let records = vec![WarmUpRecord::new(
            key("a/A", "m"),
            [ReceiverTypeHint::Unobserved].into_iter().collect(),
            7,
        )];
        let bytes = encode(1, &records);
        assert_eq!(decode(&bytes).unwrap().records, records);
    }

    // =========================================================================
    // Hard Failures
    // =========================================================================

    #[test]
    fn test_unknown_version_is_hard_error() {
        let mut bytes = encode(1, &sample_records());
        bytes[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::UnsupportedVersion(FORMAT_VERSION + 1))
        );
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode(1, &sample_records());
        bytes[0] = b'X';
        assert_eq!(decode(&bytes), Err(DecodeError::NotALog));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(decode(&[]), Err(DecodeError::NotALog));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut bytes = encode(1, &sample_records());
        bytes.extend_from_slice(b"junk");
        assert!(matches!(decode(&bytes), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn test_unknown_shape_tag_rejected() {
        let records = vec![WarmUpRecord::new(
            key("a/A", "m"),
            [ReceiverTypeHint::NullSeen].into_iter().collect(),
            1,
        )];
        let mut bytes = encode(1, &records);
        // The shape tag is the 9th byte from the end (tag + u64 payload).
        let tag_at = bytes.len() - 9;
        bytes[tag_at] = 0xFF;
        assert!(matches!(decode(&bytes), Err(DecodeError::Corrupt(_))));
    }

    // =========================================================================
    // Truncation
    // =========================================================================

    #[test]
    fn test_truncated_after_one_record_keeps_it() {
        let records = sample_records();
        let full = encode(10_000, &records);

        // Find the end of the first frame: header, then 4-byte frame length.
        let first_len =
            u32::from_le_bytes([full[20], full[21], full[22], full[23]]) as usize;
        let cut = 20 + 4 + first_len + 3; // a few bytes into the second frame
        let log = decode(&full[..cut]).unwrap();

        assert!(log.truncated);
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.records[0], records[0]);
        assert_eq!(log.header.record_count, 3);
    }

    #[test]
    fn test_truncated_inside_header_keeps_nothing() {
        let full = encode(10_000, &sample_records());
        let log = decode(&full[..10]).unwrap();
        assert!(log.truncated);
        assert!(log.records.is_empty());
    }

    #[test]
    fn test_truncated_at_frame_boundary() {
        let records = sample_records();
        let full = encode(10_000, &records);
        let first_len =
            u32::from_le_bytes([full[20], full[21], full[22], full[23]]) as usize;
        let cut = 20 + 4 + first_len; // exactly one complete frame
        let log = decode(&full[..cut]).unwrap();

        assert!(log.truncated);
        assert_eq!(log.records.len(), 1);
    }
}
