use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::BytesMut;
use tokio::sync::Semaphore;
use tracing::trace;

/// frame size limit on the control and ordinary streams
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
/// frame size limit on the large-message stream
pub const MAX_LARGE_FRAME_SIZE: usize = 5 * 1024 * 1024;
/// number of buffers a pool hands out before `acquire` blocks
pub const MAX_POOLED_BUFFERS: usize = 256;

/// A bounded pool of fixed-capacity frame buffers. There is one pool per frame size class
///  (ordinary and large); buffers are acquired at a stream's head and must be released at its
///  terminal sink.
///
/// When all buffers are handed out, `acquire` *blocks* until one is released - the bound acts
///  as backpressure on the streams rather than an error condition. Buffers are allocated
///  lazily, so an idle pool costs (almost) nothing.
///
/// Releasing a buffer that was not handed out by this pool (or releasing one twice) is a
///  programming error and panics.
pub struct EnvelopeBufferPool {
    buf_size: usize,
    buffers: Mutex<Vec<BytesMut>>,
    available: Semaphore,
    num_outstanding: AtomicUsize,
}

impl EnvelopeBufferPool {
    pub fn new(buf_size: usize, max_pool_size: usize) -> EnvelopeBufferPool {
        EnvelopeBufferPool {
            buf_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
            available: Semaphore::new(max_pool_size),
            num_outstanding: AtomicUsize::new(0),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub async fn acquire(&self) -> BytesMut {
        self.available.acquire().await
            .expect("pool semaphore is never closed")
            .forget();
        self.num_outstanding.fetch_add(1, Ordering::AcqRel);

        if let Some(buffer) = self.buffers.lock().unwrap().pop() {
            trace!("returning buffer from pool");
            return buffer;
        }

        trace!("no buffer in pool: creating new buffer");
        BytesMut::with_capacity(self.buf_size)
    }

    pub fn release(&self, mut buffer: BytesMut) {
        assert!(buffer.capacity() >= self.buf_size,
                "released buffer has capacity {} < the pool's buffer size {} - was it acquired from a different pool?",
                buffer.capacity(), self.buf_size);

        let prev = self.num_outstanding.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "released a buffer that was not handed out by this pool");

        buffer.clear();
        self.buffers.lock().unwrap().push(buffer);
        self.available.add_permits(1);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::BufMut;
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_cleared_on_release() {
        let pool = EnvelopeBufferPool::new(10, 4);

        let mut buf = pool.acquire().await;
        buf.put_u8(1);
        pool.release(buf);

        assert!(pool.acquire().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_when_exhausted() {
        let pool = Arc::new(EnvelopeBufferPool::new(10, 2));

        let buf1 = pool.acquire().await;
        let _buf2 = pool.acquire().await;

        assert!(timeout(Duration::from_millis(100), pool.acquire()).await.is_err());

        pool.release(buf1);
        let buf3 = timeout(Duration::from_millis(100), pool.acquire()).await;
        assert!(buf3.is_ok());
    }

    #[tokio::test]
    #[should_panic(expected = "not handed out by this pool")]
    async fn test_double_release_panics() {
        let pool = EnvelopeBufferPool::new(10, 4);

        let buf = pool.acquire().await;
        pool.release(buf);
        pool.release(BytesMut::with_capacity(10));
    }
}
