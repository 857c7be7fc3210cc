//! Core data types.

pub mod payload;
pub mod request;
pub mod result;
pub mod stream;
pub mod usage;

pub use payload::*;
pub use request::*;
pub use result::*;
pub use stream::*;
pub use usage::*;
