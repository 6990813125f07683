use std::sync::Mutex;

use tracing::trace;

/// A bounded pool of reusable objects. Unlike [super::buffer_pool::EnvelopeBufferPool], an
///  exhausted object pool does not block: it hands out a freshly allocated instance, and a
///  release that would exceed the pool's capacity simply drops the instance. The bound thus
///  limits retained memory, not the number of live objects.
pub struct ObjectPool<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    pooled: Mutex<Vec<T>>,
    max_pooled: usize,
}

impl<T> ObjectPool<T> {
    pub fn new(max_pooled: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> ObjectPool<T> {
        ObjectPool {
            factory: Box::new(factory),
            pooled: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        }
    }

    pub fn acquire(&self) -> T {
        if let Some(instance) = self.pooled.lock().unwrap().pop() {
            return instance;
        }
        trace!("object pool is empty: allocating a new instance");
        (self.factory)()
    }

    /// NB: Callers are responsible for resetting the instance's state before release.
    pub fn release(&self, instance: T) {
        let mut pooled = self.pooled.lock().unwrap();
        if pooled.len() < self.max_pooled {
            pooled.push(instance);
        }
        else {
            trace!("object pool is full: dropping released instance");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reuse() {
        let pool = ObjectPool::new(2, Vec::<u8>::new);

        let mut v = pool.acquire();
        v.push(17);
        pool.release(v);

        // the pooled instance comes back as-is: resetting is the caller's job
        assert_eq!(pool.acquire(), vec![17]);
    }

    #[test]
    fn test_exhaustion_allocates() {
        let pool = ObjectPool::new(1, || 42u32);
        let _a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(b, 42);
    }

    #[test]
    fn test_release_beyond_capacity_drops() {
        let pool = ObjectPool::new(1, || 0u32);
        pool.release(1);
        pool.release(2);

        assert_eq!(pool.acquire(), 1);
        assert_eq!(pool.acquire(), 0);
    }
}
