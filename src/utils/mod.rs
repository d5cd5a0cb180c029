// Utility functions

use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

/// Safely acquire a mutex lock, recovering from poisoning by returning the
/// guard. The state may be inconsistent after a panic in another thread, so
/// callers should only keep idempotent data behind these locks.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

/// Generate a unique id (timestamp + random suffix)
pub fn generate_id() -> String {
    let now = Utc::now().timestamp_millis();
    format!("{}-{}", now, rand_string(8))
}

fn rand_string(len: usize) -> String {
    use rand::Rng;
    use std::iter;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    iter::repeat_with(|| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .take(len)
        .collect()
}
