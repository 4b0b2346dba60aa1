mod indexer;
mod task;
mod writer;

pub use indexer::*;
pub use task::*;
pub use writer::*;
