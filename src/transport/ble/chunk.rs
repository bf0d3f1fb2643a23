//! Continuation-prefix chunk codec for the GATT data-transfer flow.
//!
//! Every characteristic payload is `[1-byte continuation flag][fragment]`:
//! `0x01` means more data follows, `0x00` marks the final fragment. The
//! writing side splits a message into MTU-bounded chunks and advances one
//! chunk per hardware ready-event; the receiving side strips prefixes in
//! arrival order and signals completion exactly when the `0x00` chunk lands.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Continuation flag: more chunks follow.
pub const CHUNK_MORE: u8 = 0x01;

/// Continuation flag: final chunk of the message.
pub const CHUNK_FINAL: u8 = 0x00;

/// Platform ceiling on a single characteristic payload.
pub const MAX_CHARACTERISTIC_SIZE: usize = 512;

/// Default bound on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Errors for chunk framing and reassembly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk size {0} is too small, need at least 2 bytes")]
    ChunkSizeTooSmall(usize),
    #[error("unknown data transfer prefix {0:#04x}")]
    UnknownPrefix(u8),
    #[error("empty chunk")]
    EmptyChunk,
    #[error("reassembled message exceeds the {limit} byte limit")]
    MessageTooLarge { limit: usize },
}

/// Chunk size usable with a peer, from its negotiated MTU. Fixed once at
/// transfer start, never renegotiated mid-transfer.
pub fn max_chunk_size(peer_mtu: usize) -> usize {
    peer_mtu.min(MAX_CHARACTERISTIC_SIZE)
}

/// Split a message into prefixed chunks of at most `max_chunk_size` bytes.
///
/// Every chunk carries `max_chunk_size - 1` payload bytes except the last,
/// which carries the remainder and the `0x00` prefix. An empty message
/// still produces one final chunk so the receiver observes completion.
pub fn split(payload: &[u8], max_chunk_size: usize) -> Result<Vec<Vec<u8>>, ChunkError> {
    if max_chunk_size < 2 {
        return Err(ChunkError::ChunkSizeTooSmall(max_chunk_size));
    }
    if payload.is_empty() {
        return Ok(vec![vec![CHUNK_FINAL]]);
    }

    let fragment_size = max_chunk_size - 1;
    let mut chunks = Vec::with_capacity(payload.len().div_ceil(fragment_size));
    let mut parts = payload.chunks(fragment_size).peekable();
    while let Some(part) = parts.next() {
        let prefix = if parts.peek().is_some() {
            CHUNK_MORE
        } else {
            CHUNK_FINAL
        };
        let mut chunk = Vec::with_capacity(part.len() + 1);
        chunk.push(prefix);
        chunk.extend_from_slice(part);
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Pre-split outbound message with a transmission cursor.
///
/// One chunk is taken per hardware ready-event; a chunk the platform could
/// not accept is requeued and retried on the next event.
#[derive(Debug)]
pub struct WritingQueue {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
    sent: usize,
}

impl WritingQueue {
    pub fn new(payload: &[u8], max_chunk_size: usize) -> Result<Self, ChunkError> {
        let chunks: VecDeque<Vec<u8>> = split(payload, max_chunk_size)?.into();
        let total = chunks.len();
        Ok(Self {
            chunks,
            total,
            sent: 0,
        })
    }

    /// Take the next chunk, advancing the cursor.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop_front()?;
        self.sent += 1;
        Some(chunk)
    }

    /// Put back a chunk the platform refused; the cursor rewinds with it.
    pub fn requeue(&mut self, chunk: Vec<u8>) {
        self.sent = self.sent.saturating_sub(1);
        self.chunks.push_front(chunk);
    }

    /// Chunks sent so far and the total to be sent.
    pub fn progress(&self) -> (usize, usize) {
        (self.sent, self.total)
    }

    pub fn is_drained(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Outcome of feeding one chunk to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkProgress {
    /// More chunks expected; count received so far for this message.
    Partial { chunks_received: usize },
    /// The final chunk landed; the full message.
    Complete(Vec<u8>),
}

/// Accumulates inbound chunks into a bounded message buffer.
#[derive(Debug)]
pub struct Reassembler {
    buffer: Vec<u8>,
    chunks_received: usize,
    max_message_size: usize,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            chunks_received: 0,
            max_message_size,
        }
    }

    /// Consume one chunk in arrival order.
    pub fn accept(&mut self, chunk: &[u8]) -> Result<ChunkProgress, ChunkError> {
        let (&prefix, fragment) = chunk.split_first().ok_or(ChunkError::EmptyChunk)?;
        if self.buffer.len() + fragment.len() > self.max_message_size {
            return Err(ChunkError::MessageTooLarge {
                limit: self.max_message_size,
            });
        }
        match prefix {
            CHUNK_MORE => {
                self.buffer.extend_from_slice(fragment);
                self.chunks_received += 1;
                Ok(ChunkProgress::Partial {
                    chunks_received: self.chunks_received,
                })
            }
            CHUNK_FINAL => {
                self.buffer.extend_from_slice(fragment);
                self.chunks_received = 0;
                Ok(ChunkProgress::Complete(std::mem::take(&mut self.buffer)))
            }
            byte => Err(ChunkError::UnknownPrefix(byte)),
        }
    }

    /// Discard any partial message, e.g. on session teardown.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.chunks_received = 0;
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
