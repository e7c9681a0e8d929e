//! The wire form of messages: a fixed header, a timestamp, and a body of records.
//!
//! Each serialized message is laid out contiguously as
//!
//! ```text
//! | MessageHeader (9 x u64, big endian) | timestamp (time_length bytes) | records (length bytes) |
//! ```
//!
//! The timestamp and each record are encoded with `bincode`. A header fully describes the bytes
//! that follow it; a reader never interprets a frame whose declared lengths exceed what is
//! available, or whose body does not decode to exactly the declared number of records.

use std::io::{self, Read};

use byteorder::{ByteOrder as _, ReadBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use braid_bytes::pool::{BufferPool, Bytes, PageMut};

use crate::error::FramingError;
use crate::dataflow::channels::{Message, Postmark};

/// The byte order for writing message headers.
type ByteOrder = byteorder::BigEndian;

/// Framing data for each serialized message.
// *Warning*: Adding, removing and altering fields requires to adjust the implementation below!
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MessageHeader {
    /// Destination stage.
    pub stage: usize,
    /// Destination vertex, within its stage.
    pub vertex: usize,
    /// Channel identifier.
    pub channel: usize,
    /// Worker hosting the sending vertex.
    pub sender_worker: usize,
    /// Sending vertex, within its stage.
    pub sender_vertex: usize,
    /// Sequence number of the message from this sender to this destination.
    pub seqno: usize,
    /// Number of records in the body.
    pub records: usize,
    /// Number of bytes encoding the timestamp.
    pub time_length: usize,
    /// Number of bytes in the body.
    pub length: usize,
}

impl MessageHeader {

    /// The number of `u64` fields in [MessageHeader].
    const FIELDS: usize = 9;

    /// The number of bytes the header occupies.
    pub const BYTES: usize = std::mem::size_of::<u64>() * Self::FIELDS;

    /// Reads a header from the front of `bytes`, if enough bytes are present for a header.
    ///
    /// The header's declared lengths are not validated; see [`MessageHeader::validate`].
    #[inline]
    pub fn try_read(bytes: &[u8]) -> Option<MessageHeader> {
        let mut cursor = io::Cursor::new(bytes);
        let mut buffer = [0; Self::FIELDS];
        cursor.read_u64_into::<ByteOrder>(&mut buffer).ok()?;
        Some(MessageHeader {
            // Order must match writing order.
            stage: buffer[0] as usize,
            vertex: buffer[1] as usize,
            channel: buffer[2] as usize,
            sender_worker: buffer[3] as usize,
            sender_vertex: buffer[4] as usize,
            seqno: buffer[5] as usize,
            records: buffer[6] as usize,
            time_length: buffer[7] as usize,
            length: buffer[8] as usize,
        })
    }

    /// The header as binary data.
    #[inline]
    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        // Order must match reading order.
        let fields = [
            self.stage as u64,
            self.vertex as u64,
            self.channel as u64,
            self.sender_worker as u64,
            self.sender_vertex as u64,
            self.seqno as u64,
            self.records as u64,
            self.time_length as u64,
            self.length as u64,
        ];
        let mut buffer = [0u8; Self::BYTES];
        ByteOrder::write_u64_into(&fields, &mut buffer);
        buffer
    }

    /// Writes the header as binary data.
    #[inline]
    pub fn write_to<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// The number of bytes required for the header, timestamp and body.
    #[inline]
    pub fn required_bytes(&self) -> usize {
        Self::BYTES
            .saturating_add(self.time_length)
            .saturating_add(self.length)
    }

    /// Checks the declared lengths against the `available` bytes, header included.
    pub fn validate(&self, available: usize) -> Result<(), FramingError> {
        if available < self.required_bytes() {
            Err(FramingError::LengthMismatch {
                declared: self.required_bytes(),
                available,
            })
        }
        else {
            Ok(())
        }
    }

    /// The sender identity recorded in the header.
    pub fn from(&self) -> Postmark {
        Postmark { worker: self.sender_worker, vertex: self.sender_vertex }
    }
}

/// A message in wire form, backed by a (typically pooled) page.
///
/// Dropping the message returns its page to the pool once no other slice of the
/// page remains.
#[derive(Clone, Debug)]
pub struct SerializedMessage {
    header: MessageHeader,
    /// The full frame: header, timestamp, and body.
    bytes: Bytes,
}

impl SerializedMessage {

    /// Extracts the frame at the front of `bytes`, advancing `bytes` past it.
    ///
    /// Returns `Ok(None)` if `bytes` is empty, and an error if `bytes` holds only part of a
    /// frame. Nothing is extracted on error.
    pub fn extract(bytes: &mut Bytes) -> Result<Option<SerializedMessage>, FramingError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let header = MessageHeader::try_read(&bytes[..]).ok_or(FramingError::IncompleteHeader {
            available: bytes.len(),
            required: MessageHeader::BYTES,
        })?;
        header.validate(bytes.len())?;
        let frame = bytes.extract_to(header.required_bytes());
        Ok(Some(SerializedMessage { header, bytes: frame }))
    }

    /// Validates and wraps a single frame occupying all of `bytes`.
    pub fn from_bytes(mut bytes: Bytes) -> Result<SerializedMessage, FramingError> {
        let available = bytes.len();
        match SerializedMessage::extract(&mut bytes)? {
            Some(message) if bytes.is_empty() => Ok(message),
            Some(message) => Err(FramingError::LengthMismatch {
                declared: message.header.required_bytes(),
                available,
            }),
            None => Err(FramingError::IncompleteHeader { available: 0, required: MessageHeader::BYTES }),
        }
    }

    /// The message header.
    #[inline]
    pub fn header(&self) -> &MessageHeader { &self.header }

    /// The encoded timestamp.
    pub fn time_bytes(&self) -> &[u8] {
        &self.bytes[MessageHeader::BYTES .. MessageHeader::BYTES + self.header.time_length]
    }

    /// The encoded records.
    pub fn body(&self) -> &[u8] {
        &self.bytes[MessageHeader::BYTES + self.header.time_length ..]
    }

    /// The full frame, as written to the wire or a log.
    pub fn as_bytes(&self) -> &[u8] { &self.bytes[..] }
}

/// Serializes messages onto pages drawn from a shared pool.
pub struct Encoder {
    pool: BufferPool,
    /// Encoded form of the record being placed.
    scratch: Vec<u8>,
    /// Encoded form of the current timestamp.
    time: Vec<u8>,
}

impl Encoder {
    /// Creates an encoder drawing pages from `pool`.
    pub fn new(pool: BufferPool) -> Self {
        Encoder {
            pool,
            scratch: Vec::new(),
            time: Vec::new(),
        }
    }

    /// The nominal page size, bounding the frames this encoder produces.
    pub fn page_size(&self) -> usize { self.pool.page_size() }

    /// Encodes `message` for vertex `vertex` of stage `stage`, appending frames to `output`.
    ///
    /// Records are appended to a page until the next record would exceed the page size; the
    /// page is then sealed as a frame and encoding continues on a fresh page. A record too large
    /// for any page is placed alone on a dedicated page. Frames preserve record order, and each
    /// carries the message's timestamp.
    pub fn encode<T: Serialize, D: Serialize>(
        &mut self,
        stage: usize,
        vertex: usize,
        message: &Message<T, D>,
        output: &mut Vec<SerializedMessage>,
    ) -> Result<(), FramingError>
    {
        self.time.clear();
        bincode::serialize_into(&mut self.time, &message.time)?;

        let mut header = MessageHeader {
            stage,
            vertex,
            channel: message.channel,
            sender_worker: message.from.worker,
            sender_vertex: message.from.vertex,
            seqno: message.seq,
            records: 0,
            time_length: self.time.len(),
            length: 0,
        };

        let mut page = self.start_page(0);
        for record in message.data.iter() {
            self.scratch.clear();
            bincode::serialize_into(&mut self.scratch, record)?;

            let fits = page.len() + self.scratch.len() <= self.pool.page_size();
            if !fits && header.records > 0 {
                let full = std::mem::replace(&mut page, self.start_page(self.scratch.len()));
                output.push(Self::seal(full, &mut header));
            }
            else if !fits {
                page = self.start_page(self.scratch.len());
            }

            page.extend_from_slice(&self.scratch);
            header.records += 1;
        }

        if header.records > 0 || message.data.is_empty() {
            output.push(Self::seal(page, &mut header));
        }
        Ok(())
    }

    /// A page holding a placeholder header and the current timestamp, with room for `record` bytes.
    fn start_page(&self, record: usize) -> PageMut {
        let prefix = MessageHeader::BYTES + self.time.len();
        let mut page = self.pool.checkout_at_least(prefix + record);
        page.extend_from_slice(&[0u8; MessageHeader::BYTES]);
        page.extend_from_slice(&self.time);
        page
    }

    /// Completes the header for the page's contents, and freezes the page into a frame.
    ///
    /// Resets the header's record count for the next frame.
    fn seal(mut page: PageMut, header: &mut MessageHeader) -> SerializedMessage {
        header.length = page.len() - MessageHeader::BYTES - header.time_length;
        page[.. MessageHeader::BYTES].copy_from_slice(&header.to_bytes());
        let sealed = SerializedMessage { header: *header, bytes: page.freeze() };
        header.records = 0;
        sealed
    }
}

/// Decodes a frame into a typed message, reusing `buffer` for its records.
///
/// Fails if the timestamp does not decode, or the body does not decode to exactly the declared
/// number of records. Every record must occupy at least one byte of the body, so the declared
/// count is bounded by the body's length before anything is allocated for it.
pub fn decode<T: DeserializeOwned, D: DeserializeOwned>(
    message: &SerializedMessage,
    mut buffer: Vec<D>,
) -> Result<Message<T, D>, FramingError>
{
    let header = message.header();
    let time = bincode::deserialize(message.time_bytes())?;

    buffer.clear();
    let mut body = message.body();
    buffer.reserve(header.records.min(body.len()));
    for decoded in 0 .. header.records {
        let remaining = body.len();
        match bincode::deserialize_from(&mut body) {
            Ok(record) if body.len() < remaining => buffer.push(record),
            _ => {
                return Err(FramingError::RecordCountMismatch { declared: header.records, decoded });
            }
        }
    }
    if !body.is_empty() {
        return Err(FramingError::TrailingBytes { declared: header.records, remaining: body.len() });
    }

    Ok(Message::new(time, buffer, header.from(), header.channel, header.seqno))
}

/// Iterates the frames of a contiguous byte stream, as read from a log.
///
/// Iteration stops after the first error; nothing past a corrupt header is interpreted.
pub struct FramedReader {
    bytes: Bytes,
    failed: bool,
}

impl FramedReader {
    /// Reads frames from `bytes`.
    pub fn new(bytes: Bytes) -> Self {
        FramedReader { bytes, failed: false }
    }

    /// Reads all of `reader` and iterates the frames it contains.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(FramedReader::new(Bytes::from_vec(buffer)))
    }

    /// Decodes each frame into a typed message.
    pub fn messages<T: DeserializeOwned, D: DeserializeOwned>(self) -> impl Iterator<Item=Result<Message<T, D>, FramingError>> {
        self.map(|frame| frame.and_then(|frame| decode(&frame, Vec::new())))
    }
}

impl Iterator for FramedReader {
    type Item = Result<SerializedMessage, FramingError>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match SerializedMessage::extract(&mut self.bytes) {
            Ok(frame) => frame.map(Ok),
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use braid_bytes::pool::{BufferPool, Bytes};

    use crate::dataflow::channels::{Message, Postmark};
    use crate::error::FramingError;
    use crate::progress::Pointstamp;
    use super::{decode, Encoder, FramedReader, MessageHeader, SerializedMessage};

    fn message(records: Vec<(u64, String)>) -> Message<Pointstamp, (u64, String)> {
        Message::new(Pointstamp::with_iterations(3, &[1]), records, Postmark { worker: 1, vertex: 2 }, 5, 8)
    }

    fn concatenate(frames: &[SerializedMessage]) -> Bytes {
        let mut buffer = Vec::new();
        for frame in frames { buffer.extend_from_slice(frame.as_bytes()); }
        Bytes::from_vec(buffer)
    }

    #[test]
    fn round_trip() {
        let mut encoder = Encoder::new(BufferPool::new(1 << 12, 4));
        let original = message(vec![(1, "x".to_string()), (2, "y".to_string())]);
        let mut frames = Vec::new();
        encoder.encode(7, 1, &original, &mut frames).unwrap();
        assert_eq!(frames.len(), 1);

        let header = *frames[0].header();
        assert_eq!((header.stage, header.vertex, header.channel, header.records), (7, 1, 5, 2));
        assert_eq!(header.from(), Postmark { worker: 1, vertex: 2 });

        let decoded = decode::<Pointstamp, (u64, String)>(&frames[0], Vec::new()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn empty_messages_keep_their_timestamp() {
        let mut encoder = Encoder::new(BufferPool::new(256, 4));
        let mut frames = Vec::new();
        encoder.encode(0, 0, &message(Vec::new()), &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
        let decoded = decode::<Pointstamp, (u64, String)>(&frames[0], Vec::new()).unwrap();
        assert_eq!(decoded.time, Pointstamp::with_iterations(3, &[1]));
        assert!(decoded.is_empty());
    }

    #[test]
    fn oversized_records_get_their_own_page() {
        let mut encoder = Encoder::new(BufferPool::new(128, 4));
        let big = "z".repeat(1000);
        let original = message(vec![(1, "a".to_string()), (2, big.clone()), (3, "c".to_string())]);
        let mut frames = Vec::new();
        encoder.encode(0, 0, &original, &mut frames).unwrap();
        assert_eq!(frames.len(), 3);
        let records =
        frames
            .iter()
            .flat_map(|frame| decode::<Pointstamp, (u64, String)>(frame, Vec::new()).unwrap().data)
            .collect::<Vec<_>>();
        assert_eq!(records, original.data);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let mut encoder = Encoder::new(BufferPool::new(1 << 12, 4));
        let mut frames = Vec::new();
        encoder.encode(0, 0, &message(vec![(1, "x".to_string())]), &mut frames).unwrap();
        let whole = frames[0].as_bytes();

        let torn = Bytes::from_vec(whole[.. whole.len() - 1].to_vec());
        assert!(matches!(SerializedMessage::from_bytes(torn), Err(FramingError::LengthMismatch { .. })));

        let headless = Bytes::from_vec(whole[.. MessageHeader::BYTES - 1].to_vec());
        assert!(matches!(SerializedMessage::from_bytes(headless), Err(FramingError::IncompleteHeader { .. })));
    }

    #[test]
    fn record_counts_are_checked() {
        let mut encoder = Encoder::new(BufferPool::new(1 << 12, 4));
        let mut frames = Vec::new();
        encoder.encode(0, 0, &message(vec![(1, "x".to_string())]), &mut frames).unwrap();

        // Claim two records where the body holds one.
        let mut forged = frames[0].as_bytes().to_vec();
        let mut header = *frames[0].header();
        header.records = 2;
        header.write_to(&mut &mut forged[.. MessageHeader::BYTES]).unwrap();
        let forged = SerializedMessage::from_bytes(Bytes::from_vec(forged)).unwrap();
        assert!(matches!(
            decode::<Pointstamp, (u64, String)>(&forged, Vec::new()),
            Err(FramingError::RecordCountMismatch { declared: 2, decoded: 1 })
        ));

        // Claim no records where the body holds one.
        let mut forged = frames[0].as_bytes().to_vec();
        header.records = 0;
        header.write_to(&mut &mut forged[.. MessageHeader::BYTES]).unwrap();
        let forged = SerializedMessage::from_bytes(Bytes::from_vec(forged)).unwrap();
        assert!(matches!(
            decode::<Pointstamp, (u64, String)>(&forged, Vec::new()),
            Err(FramingError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn huge_record_counts_are_rejected() {
        let mut encoder = Encoder::new(BufferPool::new(1 << 12, 4));
        let original = Message::new(Pointstamp::new(0), vec![9u64], Postmark { worker: 0, vertex: 0 }, 0, 0);
        let mut frames = Vec::new();
        encoder.encode(0, 0, &original, &mut frames).unwrap();

        let mut forged = frames[0].as_bytes().to_vec();
        let mut header = *frames[0].header();
        header.records = usize::MAX / 2;
        header.write_to(&mut &mut forged[.. MessageHeader::BYTES]).unwrap();
        let forged = SerializedMessage::from_bytes(Bytes::from_vec(forged)).unwrap();
        assert!(matches!(
            decode::<Pointstamp, u64>(&forged, Vec::new()),
            Err(FramingError::RecordCountMismatch { decoded: 1, .. })
        ));
        assert!(matches!(
            decode::<Pointstamp, ()>(&forged, Vec::new()),
            Err(FramingError::RecordCountMismatch { decoded: 0, .. })
        ));
    }

    #[test]
    fn framed_reader_stops_at_corruption() {
        let mut encoder = Encoder::new(BufferPool::new(1 << 12, 4));
        let mut frames = Vec::new();
        encoder.encode(0, 0, &message(vec![(1, "x".to_string())]), &mut frames).unwrap();
        encoder.encode(0, 0, &message(vec![(2, "y".to_string())]), &mut frames).unwrap();

        let mut stream = concatenate(&frames)[..].to_vec();
        stream.extend_from_slice(&[0u8; 10]);
        let results = FramedReader::new(Bytes::from_vec(stream)).messages::<Pointstamp, (u64, String)>().collect::<Vec<_>>();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().data, vec![(1, "x".to_string())]);
        assert_eq!(results[1].as_ref().unwrap().data, vec![(2, "y".to_string())]);
        assert!(results[2].is_err());
    }

    #[test]
    fn pages_return_to_the_pool() {
        let pool = BufferPool::new(1 << 12, 4);
        let mut encoder = Encoder::new(pool.clone());
        let mut frames = Vec::new();
        encoder.encode(0, 0, &message(vec![(1, "x".to_string())]), &mut frames).unwrap();
        assert_eq!(pool.stashed(), 0);
        frames.clear();
        assert_eq!(pool.stashed(), 1);
    }
}
