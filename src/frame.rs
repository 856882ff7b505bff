//! Framing of the scale's serial protocol.
//!
//! The scale exposes a write characteristic and a notify characteristic. Both directions
//! carry frames that start with a constant two byte marker. Notifications are not aligned
//! to frames: one notification may carry a fragment of a frame, exactly one frame, or
//! several frames back to back, so inbound bytes are accumulated in a [`ReceiveBuffer`]
//! and complete frames are cut from its front.
//!
//! Inbound frame format:
//!
//! Start Byte | End Byte     | Meaning
//! 0          | 1            | The marker [0xef, 0xdd]
//! 2          | 2            | The message type
//! 3          | 3            | The payload length in bytes
//! 4          | 3 + length   | The payload
//!
//! Outbound commands are the marker, a message type and a fixed payload. See [`Command`].

/// The constant marker which starts every frame
pub const MARKER: [u8; 2] = [0xef, 0xdd];

/// Marker, message type and payload length
pub const HEADER_LEN: usize = 4;

/// A complete inbound frame.
///
/// Only ever built from a byte run that starts with [`MARKER`] and holds the whole payload,
/// so a partial frame can never reach the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    message_type: u8,
    payload: Vec<u8>,
}

impl Frame {
    pub fn header(&self) -> [u8; 2] {
        MARKER
    }

    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    pub fn payload_length(&self) -> u8 {
        // The length was read from a single byte so this never truncates
        self.payload.len() as u8
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total number of bytes this frame occupied on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Result of cutting frames from the front of a [`ReceiveBuffer`]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Complete frames in arrival order
    pub frames: Vec<Frame>,
    /// Bytes dropped because they did not belong to any frame
    pub discarded: usize,
    /// The scan ended without finding a marker and threw bytes away
    pub malformed: bool,
}

/// Bytes received from the scale which have not yet formed a complete frame.
#[derive(Debug, Default, Clone)]
pub struct ReceiveBuffer {
    bytes: Vec<u8>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a notification's worth of bytes
    pub fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Cut every complete frame from the front of the buffer.
    ///
    /// Bytes ahead of a marker are dropped. If no marker can be found at all the buffer is
    /// emptied, except for a trailing `0xef` which may be the first half of a marker whose
    /// second half has not arrived yet. Afterwards the buffer holds nothing but the start of
    /// an incomplete frame.
    pub fn drain_frames(&mut self) -> Drained {
        let mut drained = Drained::default();
        let mut cursor = 0;

        loop {
            let rest = &self.bytes[cursor..];
            let Some(offset) = find_marker(rest) else {
                let keep = usize::from(rest.last() == Some(&MARKER[0]));
                let dropped = rest.len() - keep;
                if dropped > 0 {
                    drained.malformed = true;
                    drained.discarded += dropped;
                }
                cursor += dropped;
                break;
            };

            drained.discarded += offset;
            cursor += offset;

            match try_parse_frame(&self.bytes[cursor..]) {
                TryParseFrameResult::Ok(frame) => {
                    cursor += frame.wire_len();
                    drained.frames.push(frame);
                }
                TryParseFrameResult::Incomplete => break,
            }
        }

        self.bytes.drain(..cursor);
        drained
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<&[u8]> for ReceiveBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec() }
    }
}

/// Extract every complete frame from `buffer`, returning the frames and the unconsumed tail.
///
/// Feeding the tail back in front of the next chunk yields the same frames as feeding the
/// whole stream at once, however it was split.
pub fn extract_frames(buffer: &[u8]) -> (Vec<Frame>, Vec<u8>) {
    let mut buffer = ReceiveBuffer::from(buffer);
    let drained = buffer.drain_frames();
    (drained.frames, buffer.into_vec())
}

fn find_marker(buffer: &[u8]) -> Option<usize> {
    buffer.windows(MARKER.len()).position(|w| w == MARKER)
}

#[derive(PartialEq, Eq, Debug)]
enum TryParseFrameResult {
    Ok(Frame),
    Incomplete,
}

/// Attempt to parse one frame from a buffer which starts with the marker.
fn try_parse_frame(buffer: &[u8]) -> TryParseFrameResult {
    if buffer.len() < HEADER_LEN {
        return TryParseFrameResult::Incomplete;
    }

    let message_type = buffer[2];
    let payload_length = buffer[3] as usize;
    let frame_len = HEADER_LEN + payload_length;
    if buffer.len() < frame_len {
        return TryParseFrameResult::Incomplete;
    }

    TryParseFrameResult::Ok(Frame {
        message_type,
        payload: buffer[HEADER_LEN..frame_len].to_vec(),
    })
}

/// A command sent to the scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Introduce ourselves. The scale ignores every other command until it has been identified.
    Identify,
    /// Ask the scale to start streaming weight, battery and button events
    NotificationRequest,
    /// Keep the session alive. The scale drops idle connections after a few seconds.
    Heartbeat,
    /// Zero the scale
    Tare,
}

// The payloads are verbatim, captured from the vendor app
const IDENTIFY_PAYLOAD: [u8; 17] = [
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x30, 0x31, 0x32, 0x33, 0x34, 0x9a,
    0x6d,
];
const NOTIFICATION_REQUEST_PAYLOAD: [u8; 11] =
    [0x09, 0x00, 0x01, 0x01, 0x02, 0x02, 0x05, 0x03, 0x04, 0x15, 0x06];
const HEARTBEAT_PAYLOAD: [u8; 4] = [0x02, 0x00, 0x02, 0x00];
const TARE_PAYLOAD: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

impl Command {
    pub const fn message_type(self) -> u8 {
        match self {
            Command::Identify => 0x0b,
            Command::NotificationRequest => 0x0c,
            Command::Heartbeat => 0x00,
            Command::Tare => 0x04,
        }
    }

    const fn payload(self) -> &'static [u8] {
        match self {
            Command::Identify => &IDENTIFY_PAYLOAD,
            Command::NotificationRequest => &NOTIFICATION_REQUEST_PAYLOAD,
            Command::Heartbeat => &HEARTBEAT_PAYLOAD,
            Command::Tare => &TARE_PAYLOAD,
        }
    }
}

/// Encode a command into the bytes to write to the scale
pub fn encode(command: Command) -> Vec<u8> {
    let payload = command.payload();
    let mut bytes = Vec::with_capacity(MARKER.len() + 1 + payload.len());
    bytes.extend_from_slice(&MARKER);
    bytes.push(command.message_type());
    bytes.extend_from_slice(payload);
    bytes
}

#[test]
fn test_extract_single_weight_frame() {
    let stream = hex::decode("efdd050400001388").unwrap();
    let (frames, remaining) = extract_frames(&stream);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header(), MARKER);
    assert_eq!(frames[0].message_type(), 0x05);
    assert_eq!(frames[0].payload_length(), 4);
    assert_eq!(frames[0].payload(), &[0x00, 0x00, 0x13, 0x88]);
    assert!(remaining.is_empty());
}

#[test]
fn test_frame_split_after_three_bytes() {
    let mut buffer = ReceiveBuffer::new();
    buffer.extend(&hex::decode("efdd05").unwrap());
    let first = buffer.drain_frames();
    assert!(first.frames.is_empty());
    assert_eq!(buffer.as_slice(), &[0xef, 0xdd, 0x05]);

    buffer.extend(&hex::decode("0400001388").unwrap());
    let second = buffer.drain_frames();
    assert_eq!(second.frames.len(), 1);
    assert!(buffer.is_empty());
}

#[test]
fn test_incomplete_payload_is_kept() {
    let stream = hex::decode("efdd0504000013").unwrap();
    let (frames, remaining) = extract_frames(&stream);
    assert!(frames.is_empty());
    assert_eq!(remaining, stream);
}

#[test]
fn test_garbage_before_marker_is_dropped() {
    let bytes = hex::decode("0102efefdd080164efdd08").unwrap();
    let mut buffer = ReceiveBuffer::from(&bytes[..]);
    let drained = buffer.drain_frames();
    assert_eq!(drained.frames.len(), 1);
    assert_eq!(drained.frames[0].payload(), &[0x64]);
    assert_eq!(drained.discarded, 3);
    assert!(!drained.malformed);
    assert_eq!(buffer.as_slice(), &[0xef, 0xdd, 0x08]);
}

#[test]
fn test_batched_frames() {
    let stream = hex::decode("efdd050400001388efdd080164efdd0c00").unwrap();
    let (frames, remaining) = extract_frames(&stream);
    let types: Vec<u8> = frames.iter().map(Frame::message_type).collect();
    assert_eq!(types, vec![0x05, 0x08, 0x0c]);
    assert_eq!(frames[2].payload_length(), 0);
    assert!(remaining.is_empty());
}

#[test]
fn test_no_marker_discards_buffer() {
    let mut buffer = ReceiveBuffer::from(&[0x01, 0x02, 0x03][..]);
    let drained = buffer.drain_frames();
    assert!(drained.frames.is_empty());
    assert!(drained.malformed);
    assert_eq!(drained.discarded, 3);
    assert!(buffer.is_empty());
}

#[test]
fn test_marker_split_across_chunks() {
    let mut buffer = ReceiveBuffer::from(&[0x55, 0xef][..]);
    let drained = buffer.drain_frames();
    assert!(drained.frames.is_empty());
    assert_eq!(buffer.as_slice(), &[0xef]);

    buffer.extend(&hex::decode("dd080164").unwrap());
    let drained = buffer.drain_frames();
    assert_eq!(drained.frames.len(), 1);
    assert!(buffer.is_empty());
}

#[test]
fn test_fragmentation_invariance() {
    let stream =
        hex::decode("aa55efdd050400001388ef00efdd0c0705a00f00000100efdd080164efdd05040002").unwrap();
    let (expected, expected_tail) = extract_frames(&stream);
    assert_eq!(expected.len(), 3);

    for chunk_size in 1..=stream.len() {
        let mut buffer = ReceiveBuffer::new();
        let mut frames = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            buffer.extend(chunk);
            frames.extend(buffer.drain_frames().frames);
        }
        assert_eq!(frames, expected, "chunk size {chunk_size}");
        assert_eq!(buffer.as_slice(), &expected_tail[..], "chunk size {chunk_size}");
    }
}

#[test]
fn test_encode_commands() {
    assert_eq!(hex::encode(encode(Command::Tare)), "efdd0400000000");
    assert_eq!(hex::encode(encode(Command::Heartbeat)), "efdd0002000200");
    assert_eq!(
        hex::encode(encode(Command::NotificationRequest)),
        "efdd0c0900010102020503041506"
    );
    let identify = encode(Command::Identify);
    assert_eq!(&identify[..3], &[0xef, 0xdd, 0x0b]);
    assert_eq!(&identify[3..18], b"012345678901234");
}
