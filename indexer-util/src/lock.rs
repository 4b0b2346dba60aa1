use super::dirs::get_service_dir;
use named_lock::{NamedLock, NamedLockGuard};
use std::process::exit;

pub fn init_process_lock(service_name: &str) -> (NamedLock, NamedLockGuard) {
    let dir = get_service_dir(service_name);
    std::fs::create_dir_all(&dir).unwrap_or_else(|e| {
        println!("Failed to create service directory {:?}: {}", dir, e);
        exit(1);
    });

    // Acquire application lock to prevent multiple instances
    let lock_name = format!("{}_lock", service_name);
    let lock = match NamedLock::create(&lock_name) {
        Ok(lock) => lock,
        Err(e) => {
            println!("Failed to acquire application lock: {}", e);
            exit(1);
        }
    };

    let guard = match lock.lock() {
        Ok(lock_guard) => lock_guard,
        Err(e) => {
            println!("Another instance is already running: {}", e);
            exit(1);
        }
    };

    (lock, guard)
}

// Only one pass per named stream may run at a time, across processes as well.
// Fails immediately instead of waiting when another pass holds the stream.
pub fn try_lock_stream(
    service_name: &str,
    set_name: &str,
    stream_name: &str,
) -> Result<(NamedLock, NamedLockGuard), String> {
    let lock_name = format!("{}_{}_{}", service_name, set_name, stream_name);
    let lock = NamedLock::create(&lock_name).map_err(|e| {
        let msg = format!("Failed to create stream lock {}: {}", lock_name, e);
        error!("{}", msg);
        msg
    })?;

    let guard = lock.try_lock().map_err(|e| {
        let msg = format!(
            "Stream {} of checkpoint set {} is already being indexed: {}",
            stream_name, set_name, e
        );
        error!("{}", msg);
        msg
    })?;

    Ok((lock, guard))
}
