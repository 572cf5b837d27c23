//! Logical application messages: splitting an outgoing payload into per-fragment wire
//! frames (split/assemble) and reassembling incoming fragments back into a whole
//! (merge), plus the two read contracts callbacks see (`read`/`read_iter`).

use crate::compression::Compressor;
use crate::error::Error;
use crate::frame::{encode_length, FrameHeader, OpCode};
use crate::streamid::StreamHeader;
use crate::utils::{effective_mask, xor_mask};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default bound of the chunk channel `ReadIter` streams through when the caller hasn't
/// asked for a specific buffer size yet.
const DEFAULT_CHUNK_CHANNEL_CAPACITY: usize = 16;

/// The five message types this crate delivers, matching their wire opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text = 1,
    Binary = 2,
    Close = 8,
    Ping = 9,
    Pong = 10,
}

impl MessageType {
    pub(crate) fn opcode(self) -> OpCode {
        match self {
            MessageType::Text => OpCode::Text,
            MessageType::Binary => OpCode::Binary,
            MessageType::Close => OpCode::Close,
            MessageType::Ping => OpCode::Ping,
            MessageType::Pong => OpCode::Pong,
        }
    }

    pub(crate) fn from_opcode(opcode: OpCode) -> Result<Self, Error> {
        match opcode {
            OpCode::Text => Ok(MessageType::Text),
            OpCode::Binary => Ok(MessageType::Binary),
            OpCode::Close => Ok(MessageType::Close),
            OpCode::Ping => Ok(MessageType::Ping),
            OpCode::Pong => Ok(MessageType::Pong),
            OpCode::Continuation => Err(Error::InvalidContinuationFrame),
        }
    }

    pub(crate) fn is_control(self) -> bool {
        self.opcode().is_control()
    }
}

/// Send-side options threaded through `split`/`assemble`.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub compress: bool,
    pub streamlize: bool,
    pub stream_id: u16,
    pub cancel: bool,
}

/// Receive-side bookkeeping kept alongside a `Message`.
#[derive(Debug, Clone)]
pub struct RecvMeta {
    pub compressed: bool,
    pub is_stream: bool,
    pub stream_id: u16,
    pub cancel: bool,
    pub declared_size: usize,
    pub masked: bool,
    pub from_initiator: bool,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub reading_as_chunks: bool,
}

impl RecvMeta {
    fn new(is_stream: bool, stream_id: u16, masked: bool, from_initiator: bool) -> Self {
        let now = Instant::now();
        RecvMeta {
            compressed: false,
            is_stream,
            stream_id,
            cancel: false,
            declared_size: 0,
            masked,
            from_initiator,
            created_at: now,
            updated_at: now,
            reading_as_chunks: false,
        }
    }
}

/// One outgoing wire frame's worth of a message, produced by `split` and turned into
/// bytes by `assemble`. Kept distinct from the receive-side `Message` type.
pub(crate) struct Fragment {
    pub is_final: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    pub stream_id: u16,
    pub cancel: bool,
}

/// Splits `payload` into `Fragment`s of at most `chunk_size` bytes each. An empty
/// payload still yields one final fragment.
pub(crate) fn split(message_type: MessageType, payload: Vec<u8>, chunk_size: usize, stream_id: u16) -> Vec<Fragment> {
    let opcode = message_type.opcode();
    if payload.is_empty() {
        return vec![Fragment {
            is_final: true,
            opcode,
            payload,
            stream_id,
            cancel: false,
        }];
    }

    let chunk_size = chunk_size.max(1);
    let chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Fragment {
            is_final: i == last,
            opcode: if i == 0 { opcode } else { OpCode::Continuation },
            payload: chunk.to_vec(),
            stream_id,
            cancel: false,
        })
        .collect()
}

/// Turns one `Fragment` into wire bytes: compress, prepend the stream header, compute
/// the frame header and length, mask, and concatenate.
pub(crate) fn assemble(
    fragment: Fragment,
    negotiated_compress: bool,
    compressor: Option<&mut Compressor>,
    negotiated_streams: bool,
    mask_key: Option<[u8; 4]>,
    private_mask: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    let is_control = fragment.opcode.is_control();
    let mut payload = fragment.payload;

    let ext_compress = negotiated_compress && !is_control && !payload.is_empty();
    if ext_compress {
        let compressor = compressor.expect("compressor must be configured when compression is negotiated");
        payload = compressor.compress(&payload)?;
    }

    let ext_stream = negotiated_streams && !is_control;
    if ext_stream {
        let header = StreamHeader {
            cancel: fragment.cancel,
            stream_id: fragment.stream_id,
        }
        .encode();
        let mut tagged = Vec::with_capacity(2 + payload.len());
        tagged.extend_from_slice(&header);
        tagged.extend_from_slice(&payload);
        payload = tagged;
    }

    let masked = mask_key.is_some();
    if let Some(wire_key) = mask_key {
        let effective = effective_mask(wire_key, private_mask);
        xor_mask(&mut payload, &effective);
    }

    let (len7, extended) = encode_length(payload.len());
    let header = FrameHeader {
        fin: fragment.is_final,
        ext_compress,
        ext_stream,
        opcode: fragment.opcode,
        masked,
        len7,
    };

    let mut out = Vec::with_capacity(2 + extended.len() + 4 + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&extended);
    if let Some(wire_key) = mask_key {
        out.extend_from_slice(&wire_key);
    }
    out.extend_from_slice(&payload);
    Ok(out)
}

/// A single post-unmask, post-stream-header-strip frame handed to `merge` by the
/// connection read loop.
pub(crate) struct IncomingFragment {
    pub fin: bool,
    pub compressed: bool,
    pub opcode: OpCode,
    pub stream_id: u16,
    pub cancel: bool,
    pub payload: Vec<u8>,
    pub masked: bool,
    pub from_initiator: bool,
}

/// What the reader should do after folding one fragment into the pending-fragments
/// table.
pub(crate) enum MergeOutcome {
    /// First fragment of a fresh `TriggerOnStart` message: deliver now, more chunks
    /// still arrive through the message's own chunk channel.
    DeliverOnStart(Arc<Message>),
    /// The completing fragment arrived; deliver once, either because this is the only
    /// delivery (normal case) or because `TriggerOnStart` didn't apply.
    DeliverComplete(Arc<Message>),
    /// An interior fragment was appended; nothing to deliver yet.
    Pending,
}

/// Messages currently being assembled, keyed by stream id (0 for the non-multiplexed
/// case).
pub(crate) struct PendingFragments {
    table: HashMap<u16, Arc<Message>>,
}

impl PendingFragments {
    pub(crate) fn new() -> Self {
        Self { table: HashMap::new() }
    }

    /// Folds one incoming fragment into the table and returns what the caller should
    /// deliver, if anything. The fragment's payload must already be decompressed — the
    /// caller decompresses before calling in, so this method never needs to hold the
    /// connection's decompressor lock across the chunk-channel send below.
    pub(crate) async fn merge(
        &mut self,
        fragment: IncomingFragment,
        explicit_chunk_capacity: Option<usize>,
        trigger_on_start: bool,
        synchronized: bool,
        default_chunk_capacity: usize,
    ) -> Result<MergeOutcome, Error> {
        let chunk_capacity = explicit_chunk_capacity.unwrap_or(default_chunk_capacity).max(1);
        let key = fragment.stream_id;
        let payload = fragment.payload;

        if let Some(existing) = self.table.get(&key).cloned() {
            existing.append_chunk(payload).await;
            if fragment.fin || fragment.cancel {
                existing.mark_complete();
                self.table.remove(&key);
                if trigger_on_start {
                    return Ok(MergeOutcome::Pending);
                }
                return Ok(MergeOutcome::DeliverComplete(existing));
            }
            return Ok(MergeOutcome::Pending);
        }

        let message_type = MessageType::from_opcode(fragment.opcode)?;
        let recv_meta = RecvMeta::new(key != 0, key, fragment.masked, fragment.from_initiator);
        let message = Arc::new(Message::new(
            message_type,
            recv_meta,
            trigger_on_start && !message_type.is_control(),
            synchronized,
            chunk_capacity,
        ));
        message.append_chunk(payload).await;

        if fragment.fin || fragment.cancel {
            message.mark_complete();
            return Ok(MergeOutcome::DeliverComplete(message));
        }

        self.table.insert(key, Arc::clone(&message));
        if trigger_on_start && !message_type.is_control() {
            Ok(MergeOutcome::DeliverOnStart(message))
        } else {
            Ok(MergeOutcome::Pending)
        }
    }

    /// Drains the table, marking every still-open message complete so any `ReadIter`
    /// consumer observes end-of-sequence instead of hanging forever.
    pub(crate) fn force_close_all(&mut self) {
        for (_, message) in self.table.drain() {
            message.mark_complete();
        }
    }
}

/// One logical application message, possibly still being assembled. Shared via `Arc`
/// between the reader, the dispatcher, and whatever callback is holding it.
pub struct Message {
    message_type: MessageType,
    entity: Mutex<Vec<u8>>,
    complete: AtomicBool,
    recv_meta: Mutex<RecvMeta>,
    chunk_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    chunk_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    trigger_on_start: bool,
    synchronized: bool,
}

impl Message {
    pub(crate) fn new(
        message_type: MessageType,
        recv_meta: RecvMeta,
        trigger_on_start: bool,
        synchronized: bool,
        chunk_capacity: usize,
    ) -> Self {
        let capacity = chunk_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Message {
            message_type,
            entity: Mutex::new(Vec::new()),
            complete: AtomicBool::new(false),
            recv_meta: Mutex::new(recv_meta),
            chunk_tx: Mutex::new(Some(tx)),
            chunk_rx: Mutex::new(Some(rx)),
            trigger_on_start,
            synchronized,
        }
    }

    pub(crate) async fn append_chunk(&self, chunk: Vec<u8>) {
        self.entity.lock().unwrap().extend_from_slice(&chunk);
        self.recv_meta.lock().unwrap().updated_at = Instant::now();
        let tx = self.chunk_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(chunk).await;
        }
    }

    pub(crate) fn mark_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
        // Drop the sender so any open `ReadIter` stream observes end-of-sequence.
        self.chunk_tx.lock().unwrap().take();
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn recv_meta(&self) -> RecvMeta {
        self.recv_meta.lock().unwrap().clone()
    }

    /// Returns the whole assembled payload. Under `TriggerOnStart`, returns
    /// `Error::MsgYetComplete` until the completing fragment has landed.
    pub fn read(&self) -> Result<Vec<u8>, Error> {
        if self.trigger_on_start && !self.is_complete() {
            return Err(Error::MsgYetComplete);
        }
        Ok(self.entity.lock().unwrap().clone())
    }

    pub fn read_text(&self) -> Result<String, Error> {
        Ok(String::from_utf8(self.read()?)?)
    }

    /// A bounded lazy sequence of payload chunks. Already-complete messages stream
    /// their one assembled chunk then end. Unavailable under synchronized delivery,
    /// since the reader would block itself waiting on its own channel.
    pub fn read_iter(&self, buffer: Option<usize>) -> Result<Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>, Error> {
        if self.synchronized {
            return Err(Error::ReadIterUnsupportedSynchronized);
        }
        if let Some(n) = buffer {
            if n < 1 {
                return Err(Error::ReadIterBufferTooSmall);
            }
        }
        self.recv_meta.lock().unwrap().reading_as_chunks = true;

        if let Some(rx) = self.chunk_rx.lock().unwrap().take() {
            return Ok(Box::pin(ReceiverStream::new(rx)));
        }
        let whole = self.entity.lock().unwrap().clone();
        Ok(Box::pin(futures::stream::once(async move { whole })))
    }
}

pub(crate) fn default_chunk_channel_capacity() -> usize {
    DEFAULT_CHUNK_CHANNEL_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_empty_payload_yields_one_final_fragment() {
        let fragments = split(MessageType::Text, Vec::new(), 4096, 0);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].is_final);
    }

    #[test]
    fn split_divides_into_chunk_size_pieces_with_only_last_final() {
        let payload = vec![0u8; 10];
        let fragments = split(MessageType::Binary, payload, 4, 0);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].payload.len(), 4);
        assert_eq!(fragments[1].payload.len(), 4);
        assert_eq!(fragments[2].payload.len(), 2);
        assert!(!fragments[0].is_final && !fragments[1].is_final);
        assert!(fragments[2].is_final);
        assert_eq!(fragments[0].opcode, OpCode::Binary);
        assert_eq!(fragments[1].opcode, OpCode::Continuation);
    }

    #[test]
    fn assemble_without_extensions_produces_a_plain_frame() {
        let fragment = Fragment {
            is_final: true,
            opcode: OpCode::Text,
            payload: b"hi".to_vec(),
            stream_id: 0,
            cancel: false,
        };
        let bytes = assemble(fragment, false, None, false, None, None).unwrap();
        assert_eq!(bytes, vec![0b1000_0001, 2, b'h', b'i']);
    }

    #[test]
    fn assemble_with_streaming_prepends_stream_header() {
        let fragment = Fragment {
            is_final: true,
            opcode: OpCode::Binary,
            payload: b"hi".to_vec(),
            stream_id: 7,
            cancel: false,
        };
        let bytes = assemble(fragment, false, None, true, None, None).unwrap();
        // byte0: FIN=1, EXT_STREAM=1, opcode=Binary(2) -> 1010_0010
        assert_eq!(bytes[0], 0b1010_0010);
        assert_eq!(bytes[1], 4); // len7 = 2 header bytes + 2 payload bytes
        assert_eq!(&bytes[2..4], 7u16.to_be_bytes().as_slice());
        assert_eq!(&bytes[4..], b"hi");
    }

    #[tokio::test]
    async fn merge_delivers_once_complete_for_a_single_frame_message() {
        let mut pending = PendingFragments::new();
        let fragment = IncomingFragment {
            fin: true,
            compressed: false,
            opcode: OpCode::Text,
            stream_id: 0,
            cancel: false,
            payload: b"hello".to_vec(),
            masked: true,
            from_initiator: true,
        };
        let outcome = pending.merge(fragment, None, false, false, 16).await.unwrap();
        match outcome {
            MergeOutcome::DeliverComplete(message) => {
                assert!(message.is_complete());
                assert_eq!(message.read().unwrap(), b"hello");
            }
            _ => panic!("expected DeliverComplete"),
        }
    }

    #[tokio::test]
    async fn merge_accumulates_across_fragments_on_the_same_stream() {
        let mut pending = PendingFragments::new();
        let first = IncomingFragment {
            fin: false,
            compressed: false,
            opcode: OpCode::Text,
            stream_id: 0,
            cancel: false,
            payload: b"hel".to_vec(),
            masked: true,
            from_initiator: true,
        };
        assert!(matches!(
            pending.merge(first, None, false, false, 16).await.unwrap(),
            MergeOutcome::Pending
        ));

        let second = IncomingFragment {
            fin: true,
            compressed: false,
            opcode: OpCode::Continuation,
            stream_id: 0,
            cancel: false,
            payload: b"lo".to_vec(),
            masked: true,
            from_initiator: true,
        };
        match pending.merge(second, None, false, false, 16).await.unwrap() {
            MergeOutcome::DeliverComplete(message) => assert_eq!(message.read().unwrap(), b"hello"),
            _ => panic!("expected DeliverComplete"),
        }
    }

    #[tokio::test]
    async fn trigger_on_start_delivers_before_completion_and_msg_yet_complete_until_then() {
        let mut pending = PendingFragments::new();
        let first = IncomingFragment {
            fin: false,
            compressed: false,
            opcode: OpCode::Binary,
            stream_id: 0,
            cancel: false,
            payload: b"par".to_vec(),
            masked: true,
            from_initiator: true,
        };
        let message = match pending.merge(first, None, true, false, 16).await.unwrap() {
            MergeOutcome::DeliverOnStart(message) => message,
            _ => panic!("expected DeliverOnStart"),
        };
        assert!(matches!(message.read(), Err(Error::MsgYetComplete)));

        let second = IncomingFragment {
            fin: true,
            compressed: false,
            opcode: OpCode::Continuation,
            stream_id: 0,
            cancel: false,
            payload: b"t".to_vec(),
            masked: true,
            from_initiator: true,
        };
        assert!(matches!(
            pending.merge(second, None, true, false, 16).await.unwrap(),
            MergeOutcome::Pending
        ));
        assert_eq!(message.read().unwrap(), b"part");
    }

    #[test]
    fn read_iter_rejects_synchronized_delivery() {
        let message = Message::new(
            MessageType::Text,
            RecvMeta::new(false, 0, true, true),
            false,
            true,
            4,
        );
        assert!(matches!(
            message.read_iter(None),
            Err(Error::ReadIterUnsupportedSynchronized)
        ));
    }

    #[test]
    fn read_iter_rejects_zero_buffer() {
        let message = Message::new(
            MessageType::Text,
            RecvMeta::new(false, 0, true, true),
            false,
            false,
            4,
        );
        assert!(matches!(message.read_iter(Some(0)), Err(Error::ReadIterBufferTooSmall)));
    }
}
