//! Lock-free object pools for the hot-path log message types (spec §4.8,
//! §9: "object pools for log messages... a ring/free-list pool per hot
//! type"). Backed by `crossbeam_queue::ArrayQueue` rather than a
//! mutex-guarded `Vec` so `get`/`put` never block a worker.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// A bounded free-list of `T`. `get` pops a recycled value or builds a
/// fresh one via `Default`; `put` clears it (via `T::reset`) and pushes it
/// back, dropping it instead if the pool is already full.
pub struct Pool<T: Default> {
    free: Arc<ArrayQueue<T>>,
}

impl<T: Default> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self { free: self.free.clone() }
    }
}

impl<T: Default> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Self { free: Arc::new(ArrayQueue::new(capacity.max(1))) }
    }

    pub fn get(&self) -> T {
        self.free.pop().unwrap_or_default()
    }

    pub fn put(&self, mut value: T, reset: impl FnOnce(&mut T)) {
        reset(&mut value);
        // A full pool just drops the value; pooling is an optimization, not
        // a correctness requirement.
        let _ = self.free.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogMessage;

    #[test]
    fn recycled_value_is_cleared_before_reuse() {
        let pool: Pool<LogMessage> = Pool::new(4);
        let mut msg = pool.get();
        msg.id = "req-1".into();
        msg.provider = "openai".into();
        pool.put(msg, LogMessage::reset);

        let recycled = pool.get();
        assert_eq!(recycled.id, "");
        assert_eq!(recycled.provider, "");
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let pool: Pool<LogMessage> = Pool::new(1);
        pool.put(LogMessage::default(), LogMessage::reset);
        pool.put(LogMessage::default(), LogMessage::reset);
        assert!(pool.free.len() <= 1);
    }
}
