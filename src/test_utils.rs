use std::sync::{Mutex, OnceLock};

/// Process-wide mutex serializing tests that mutate environment variables.
pub fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}
