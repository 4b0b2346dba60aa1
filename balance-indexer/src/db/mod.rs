mod db;
#[cfg(test)]
mod memory;
mod store;

pub use db::*;
#[cfg(test)]
pub use memory::*;
pub use store::*;
