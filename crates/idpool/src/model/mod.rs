mod pool;
mod range;
mod released;

pub use pool::*;
pub use range::*;
pub use released::*;

/// The integer type handed out by pools.
pub type IdValue = u32;
