#![allow(clippy::missing_safety_doc)]

mod base;
pub use self::base::*;

mod buffer;
pub use self::buffer::*;

mod error;
pub use self::error::*;

mod flat;
pub use self::flat::*;

mod fundamental;
pub use self::fundamental::*;

mod layout;
pub use self::layout::*;

mod local;
#[allow(unused_imports)]
pub use self::local::*;

mod port;
pub use self::port::*;

mod ret_area;
pub use self::ret_area::*;

pub mod sim;

mod utils;

mod tests;
