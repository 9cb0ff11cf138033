use anyhow::Context;
use cachelink::{
    BorrowedBuf, FlatArgs, FlatWords, GuestAlloc, OwnedBuf, ReturnArea, with_duplicate,
};
use wasi_cache_abi::{self as abi, CacheError, KeyArgs, PayloadResult, SetArgs, UnitResult};

// === CacheImports === //

/// The three foreign entry points of `wasi-cache`, each receiving its flattened arguments with
/// the return area address last.
///
/// An implementation must write the operation's result into the return area before returning
/// `Ok`. An `Err` reports a transport failure such as a trap.
pub trait CacheImports<M: ?Sized> {
    fn set(&mut self, cx: &mut M, words: FlatWords<SetArgs>) -> anyhow::Result<()>;

    fn get(&mut self, cx: &mut M, words: FlatWords<KeyArgs>) -> anyhow::Result<()>;

    fn delete(&mut self, cx: &mut M, words: FlatWords<KeyArgs>) -> anyhow::Result<()>;
}

// === CacheClient === //

/// The call adapter for `wasi-cache`.
///
/// Every operation returns `Ok(Err(_))` for a failed cache operation and `Err(_)` when the call
/// itself could not be completed or its result violated the ABI.
#[derive(Debug)]
pub struct CacheClient<M, I> {
    memory: M,
    imports: I,
    ret_area: ReturnArea,
}

impl<M, I> CacheClient<M, I>
where
    M: GuestAlloc,
    I: CacheImports<M>,
{
    pub fn new(memory: M, imports: I, ret_area: ReturnArea) -> anyhow::Result<Self> {
        if !abi::RETURN_AREA.fits_in(ret_area.layout()) {
            anyhow::bail!(
                "return area of layout {:?} cannot hold every `wasi-cache` result (needs {:?})",
                ret_area.layout(),
                abi::RETURN_AREA,
            );
        }

        Ok(Self {
            memory,
            imports,
            ret_area,
        })
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn ret_area(&self) -> &ReturnArea {
        &self.ret_area
    }

    // === Borrowed Arguments === //

    /// Stores `value` under `key`, expiring after `ttl` seconds if given.
    pub fn set(
        &mut self,
        key: BorrowedBuf<'_, str>,
        value: BorrowedBuf<'_, [u8]>,
        ttl: Option<u32>,
    ) -> anyhow::Result<Result<(), CacheError>> {
        let Self {
            memory,
            imports,
            ret_area,
        } = self;

        Self::call_set(memory, imports, ret_area, key, value, ttl)
    }

    /// Looks up `key`. The returned payload belongs to the caller, who must release it.
    pub fn get(
        &mut self,
        key: BorrowedBuf<'_, str>,
    ) -> anyhow::Result<Result<OwnedBuf<[u8]>, CacheError>> {
        let Self {
            memory,
            imports,
            ret_area,
        } = self;

        Self::call_get(memory, imports, ret_area, key)
    }

    pub fn delete(&mut self, key: BorrowedBuf<'_, str>) -> anyhow::Result<Result<(), CacheError>> {
        let Self {
            memory,
            imports,
            ret_area,
        } = self;

        Self::call_delete(memory, imports, ret_area, key)
    }

    // === Copied Arguments === //

    /// Like [`CacheClient::set`] but copies `key` and `value` into guest memory for the duration
    /// of the call.
    pub fn set_copied(
        &mut self,
        key: &str,
        value: &[u8],
        ttl: Option<u32>,
    ) -> anyhow::Result<Result<(), CacheError>> {
        let Self {
            memory,
            imports,
            ret_area,
        } = self;

        with_duplicate(memory, key, |memory, key| {
            with_duplicate(memory, value, |memory, value| {
                Self::call_set(memory, imports, ret_area, key, value, ttl)
            })
        })
    }

    /// Like [`CacheClient::get`] but copies the payload out and releases it.
    pub fn get_copied(&mut self, key: &str) -> anyhow::Result<Result<Vec<u8>, CacheError>> {
        let Self {
            memory,
            imports,
            ret_area,
        } = self;

        with_duplicate(memory, key, |memory, key| {
            match Self::call_get(memory, imports, ret_area, key)? {
                Ok(payload) => {
                    let bytes = payload.read(memory).map(<[u8]>::to_vec);
                    payload.release(memory)?;

                    Ok(Ok(bytes?))
                }
                Err(err) => Ok(Err(err)),
            }
        })
    }

    pub fn delete_copied(&mut self, key: &str) -> anyhow::Result<Result<(), CacheError>> {
        let Self {
            memory,
            imports,
            ret_area,
        } = self;

        with_duplicate(memory, key, |memory, key| {
            Self::call_delete(memory, imports, ret_area, key)
        })
    }

    // === Adapters === //

    fn call_set(
        memory: &mut M,
        imports: &mut I,
        ret_area: &mut ReturnArea,
        key: BorrowedBuf<'_, str>,
        value: BorrowedBuf<'_, [u8]>,
        ttl: Option<u32>,
    ) -> anyhow::Result<UnitResult> {
        let args = SetArgs {
            key: key.slice(),
            value: value.slice(),
            ttl,
        };

        tracing::debug!("calling `wasi-cache.set` with {args:?}");

        ret_area
            .call(memory, |memory, ret| imports.set(memory, args.flatten(ret)))
            .context("`wasi-cache.set` failed")
    }

    fn call_get(
        memory: &mut M,
        imports: &mut I,
        ret_area: &mut ReturnArea,
        key: BorrowedBuf<'_, str>,
    ) -> anyhow::Result<Result<OwnedBuf<[u8]>, CacheError>> {
        let args = KeyArgs { key: key.slice() };

        tracing::debug!("calling `wasi-cache.get` with {args:?}");

        let res: PayloadResult = ret_area
            .call(memory, |memory, ret| imports.get(memory, args.flatten(ret)))
            .context("`wasi-cache.get` failed")?;

        // The host allocated the payload through our allocator and handed it over to us.
        Ok(res.map(|raw| unsafe { OwnedBuf::from_raw(raw) }))
    }

    fn call_delete(
        memory: &mut M,
        imports: &mut I,
        ret_area: &mut ReturnArea,
        key: BorrowedBuf<'_, str>,
    ) -> anyhow::Result<UnitResult> {
        let args = KeyArgs { key: key.slice() };

        tracing::debug!("calling `wasi-cache.delete` with {args:?}");

        ret_area
            .call(memory, |memory, ret| {
                imports.delete(memory, args.flatten(ret))
            })
            .context("`wasi-cache.delete` failed")
    }
}
