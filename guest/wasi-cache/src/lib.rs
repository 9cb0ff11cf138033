pub use wasi_cache_abi as abi;

mod client;
pub use self::client::*;

mod linked;
#[allow(unused_imports)]
pub use self::linked::*;

mod status;
pub use self::status::*;
