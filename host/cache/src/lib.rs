mod backend;
pub use self::backend::*;

mod config;
pub use self::config::*;

mod linker;
pub use self::linker::*;

mod runner;
pub use self::runner::*;

mod serve;
pub use self::serve::*;
