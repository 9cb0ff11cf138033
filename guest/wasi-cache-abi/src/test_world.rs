use cachelink::marshal_enum;

/// The export a test module provides. It takes no arguments and returns the address of a
/// [`TestResult`] inside its own memory.
pub const TEST_EXPORT: &str = "test";

marshal_enum! {
    pub enum TestError: u8 {
        Success = 0,
        Failure = 1,
    }
}

pub type TestResult = Result<(), TestError>;
