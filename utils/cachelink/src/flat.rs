use std::fmt;

use anyhow::Context;

use crate::{FfiPtr, FfiSlice, ProtocolViolation};

// === FlatArgs === //

/// An argument list lowered to the flat sequence of 32-bit words passed to a foreign call.
///
/// The words always end with the address of the caller's return area.
pub trait FlatArgs: Sized {
    const WORDS: usize;

    type Words: Copy + fmt::Debug + AsRef<[u32]> + for<'a> TryFrom<&'a [u32]>;

    fn flatten(&self, ret: FfiPtr<()>) -> Self::Words;

    fn unflatten(words: Self::Words) -> anyhow::Result<(Self, FfiPtr<()>)>;

    fn words_from_slice(words: &[u32]) -> anyhow::Result<Self::Words> {
        Self::Words::try_from(words).ok().with_context(|| {
            format!(
                "expected {} flat words, got {}",
                Self::WORDS,
                words.len(),
            )
        })
    }
}

pub type FlatWords<A> = <A as FlatArgs>::Words;

// === Primitive Lowering === //

pub fn lower_slice<T>(slice: FfiSlice<T>) -> [u32; 2] {
    [slice.base().addr(), slice.len()]
}

pub fn lift_slice<T>([base, len]: [u32; 2]) -> FfiSlice<T> {
    FfiSlice::new(FfiPtr::new(base), len)
}

/// Lowers to `(present, value)`. An absent value always carries a zero payload word.
pub fn lower_option(value: Option<u32>) -> [u32; 2] {
    match value {
        Some(value) => [1, value],
        None => [0, 0],
    }
}

/// Lifts `(present, value)`, only looking at `value` once `present` is known to be `1`.
pub fn lift_option([present, value]: [u32; 2]) -> anyhow::Result<Option<u32>> {
    match present {
        0 => Ok(None),
        1 => Ok(Some(value)),
        flag => Err(ProtocolViolation::InvalidOptionFlag(flag).into()),
    }
}
