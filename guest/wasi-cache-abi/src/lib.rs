mod cache;
pub use self::cache::*;

mod test_world;
pub use self::test_world::*;
