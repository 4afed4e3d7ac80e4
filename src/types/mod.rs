//! Type definitions

pub mod coordinates;
pub mod scenario;
pub mod time;

pub use coordinates::*;
pub use scenario::*;
pub use time::*;
