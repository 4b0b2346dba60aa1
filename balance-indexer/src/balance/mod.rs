mod change;
mod id;
mod locator;
mod resolve;
mod row;
mod rule;

pub use change::*;
pub use id::*;
pub use locator::*;
pub use resolve::*;
pub use row::*;
pub use rule::*;
