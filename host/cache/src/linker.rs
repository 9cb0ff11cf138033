use cachelink::{FfiPtr, GuestAlloc, GuestMemory};
use cachelink_wasmtime::{LinkContext, LinkState, define};
use wasi_cache_abi as abi;

use crate::{CacheHost, CacheState, serve_delete, serve_get, serve_set};

/// Defines `wasi-cache.set`, `wasi-cache.get` and `wasi-cache.delete` in `linker`, serving them
/// from the [`CacheState`] returned by `get_state`.
pub fn add_to_linker<T: 'static>(
    linker: &mut wasmtime::Linker<LinkState<T>>,
    get_state: fn(&mut T) -> &mut CacheState,
) -> anyhow::Result<()> {
    define(linker, abi::CACHE_SET, move |cx, words| {
        serve_set(&mut LinkedHost { cx, get_state }, words)
    })?;

    define(linker, abi::CACHE_GET, move |cx, words| {
        serve_get(&mut LinkedHost { cx, get_state }, words)
    })?;

    define(linker, abi::CACHE_DELETE, move |cx, words| {
        serve_delete(&mut LinkedHost { cx, get_state }, words)
    })?;

    Ok(())
}

struct LinkedHost<'a, 'b, T: 'static> {
    cx: &'a mut LinkContext<'b, T>,
    get_state: fn(&mut T) -> &mut CacheState,
}

impl<T: 'static> GuestMemory for LinkedHost<'_, '_, T> {
    fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]> {
        self.cx.bytes(base, len)
    }

    fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]> {
        self.cx.bytes_mut(base, len)
    }
}

impl<T: 'static> GuestAlloc for LinkedHost<'_, '_, T> {
    fn realloc(
        &mut self,
        old: FfiPtr<()>,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> anyhow::Result<FfiPtr<()>> {
        self.cx.realloc(old, old_size, align, new_size)
    }

    fn free(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> anyhow::Result<()> {
        self.cx.free(ptr, size, align)
    }
}

impl<T: 'static> CacheHost for LinkedHost<'_, '_, T> {
    fn cache(&mut self) -> &mut CacheState {
        (self.get_state)(self.cx.data_mut())
    }
}
