use std::fmt;

use cachelink::ProtocolViolation;
use wasi_cache_abi::CacheError;

/// A cache outcome collapsed into a single signed word.
///
/// Success is the out-of-band sentinel [`Status::OK`]; every other value is the discriminant of
/// the [`CacheError`] that was returned. `CacheError::Success` is therefore a failure status
/// distinct from `OK`.
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Status(i32);

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            f.write_str("Status::OK")
        } else {
            write!(f, "Status({})", self.0)
        }
    }
}

impl Status {
    pub const OK: Self = Self(-1);

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn of<T>(res: &Result<T, CacheError>) -> Self {
        match res {
            Ok(_) => Self::OK,
            Err(err) => Self(i32::from(err.to_raw())),
        }
    }

    /// Splits a result into its status and, on success, its value.
    pub fn split<T>(res: Result<T, CacheError>) -> (Self, Option<T>) {
        let status = Self::of(&res);

        (status, res.ok())
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == Self::OK.0
    }

    pub fn error(self) -> anyhow::Result<Option<CacheError>> {
        if self.is_ok() {
            return Ok(None);
        }

        u8::try_from(self.0)
            .ok()
            .and_then(CacheError::from_raw)
            .map(Some)
            .ok_or_else(|| {
                ProtocolViolation::UnknownDiscriminant {
                    ty: "CacheError",
                    value: self.0 as u32 as u64,
                }
                .into()
            })
    }
}
