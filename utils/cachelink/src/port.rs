use std::marker::PhantomData;

use derive_where::derive_where;

use crate::{AbiLayout, FlatArgs, Marshal};

// === Ports === //

/// A named foreign entry point taking the flat arguments `I` and writing an `O` into the
/// return area passed as its last word.
#[derive_where(Debug, Copy, Clone)]
#[expect(clippy::type_complexity)]
pub struct Port<I, O = ()>
where
    I: FlatArgs,
    O: Marshal,
{
    _ty: PhantomData<fn(I, O) -> (I, O)>,
    module: &'static str,
    func_name: &'static str,
}

impl<I, O> Port<I, O>
where
    I: FlatArgs,
    O: Marshal,
{
    pub const fn new(module: &'static str, func_name: &'static str) -> Self {
        Self {
            _ty: PhantomData,
            module,
            func_name,
        }
    }

    pub const fn module(self) -> &'static str {
        self.module
    }

    pub const fn func_name(self) -> &'static str {
        self.func_name
    }

    pub const fn word_count(self) -> usize {
        I::WORDS
    }

    pub const fn result_layout(self) -> AbiLayout {
        O::LAYOUT
    }

    pub const fn is_compatible(self, other: Port<I, O>) -> bool {
        str_eq(self.module, other.module) && str_eq(self.func_name, other.func_name)
    }

    pub const fn assert_compatible(self, other: Port<I, O>) {
        if !self.is_compatible(other) {
            panic!("incompatible ports");
        }
    }
}

const fn str_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut i = 0;

    while i < a.len() {
        if a.as_bytes()[i] != b.as_bytes()[i] {
            return false;
        }

        i += 1;
    }

    true
}

// === Guest Exports === //

pub const BUILTIN_MEMORY: &str = "memory";
pub const BUILTIN_REALLOC: &str = "canonical_abi_realloc";
pub const BUILTIN_FREE: &str = "canonical_abi_free";
