mod config;
mod constants;
mod dirs;
mod hash;
mod lock;
mod log_util;

pub use config::*;
pub use constants::*;
pub use dirs::*;
pub use hash::*;
pub use lock::*;
pub use log_util::*;

pub use named_lock::{NamedLock, NamedLockGuard};

#[macro_use]
extern crate log;
