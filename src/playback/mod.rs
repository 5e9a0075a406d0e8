mod pool;
mod recycler;
mod session;

pub use pool::*;
pub use recycler::*;
pub use session::*;
