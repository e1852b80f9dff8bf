// ChunkPool - lock-free chunk recycling between a capture callback and the pump
//
// Two SPSC ring buffers move pre-allocated sample chunks back and forth so
// the capture side never allocates:
// - data queue: capture thread pushes filled chunks, pump task consumes
// - pool queue: pump task returns drained chunks, capture thread recycles
//
// Chunks are allocated with full capacity and length zero; the capture side
// fills them with `extend_from_slice` up to capacity, the pump side `clear()`s
// them before returning, so capacity (and thus the allocation) is retained.

use rtrb::{Consumer, Producer, RingBuffer};

pub const DEFAULT_CHUNK_COUNT: usize = 16;
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// A recyclable sample chunk
pub type SampleChunk = Vec<f32>;

/// Both ends of both queues, split between the capture and pump sides
pub struct ChunkPoolChannels {
    /// Capture side: sends filled chunks
    pub data_producer: Producer<SampleChunk>,
    /// Pump side: receives filled chunks
    pub data_consumer: Consumer<SampleChunk>,
    /// Pump side: returns drained chunks
    pub pool_producer: Producer<SampleChunk>,
    /// Capture side: takes empty chunks
    pub pool_consumer: Consumer<SampleChunk>,
}

/// Lock-free chunk pool using dual SPSC ring buffers
///
/// All heap allocation happens in [`ChunkPool::new`]. Push/pop on either
/// queue is wait-free, so the capture side is safe to call from a real-time
/// audio callback.
pub struct ChunkPool;

impl ChunkPool {
    /// Pre-allocate `chunk_count` chunks of `chunk_size` samples capacity
    ///
    /// Zero counts or sizes are raised to one.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(chunk_count: usize, chunk_size: usize) -> ChunkPoolChannels {
        let chunk_count = chunk_count.max(1);
        let chunk_size = chunk_size.max(1);

        let (mut pool_producer, pool_consumer) = RingBuffer::new(chunk_count);
        let (data_producer, data_consumer) = RingBuffer::new(chunk_count);

        for _ in 0..chunk_count {
            // The pool queue has exactly `chunk_count` slots
            if pool_producer.push(Vec::with_capacity(chunk_size)).is_err() {
                break;
            }
        }

        ChunkPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}
