mod sync;
mod view;

pub use sync::*;
pub use view::*;
