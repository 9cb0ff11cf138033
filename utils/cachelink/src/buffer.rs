use std::{fmt, marker::PhantomData, mem, str};

use derive_where::derive_where;
use scopeguard::ScopeGuard;

use crate::{FfiSlice, GuestAlloc, GuestMemory, ProtocolViolation};

// === BufKind === //

/// The element view of a buffer crossing the boundary: UTF-8 text or opaque bytes.
///
/// Both are stored as `{ offset, length }` over bytes allocated with alignment `1`.
pub trait BufKind: 'static {
    fn view(bytes: &[u8]) -> anyhow::Result<&Self>;

    fn as_bytes(&self) -> &[u8];
}

impl BufKind for str {
    fn view(bytes: &[u8]) -> anyhow::Result<&Self> {
        str::from_utf8(bytes).map_err(|_| ProtocolViolation::InvalidUtf8.into())
    }

    fn as_bytes(&self) -> &[u8] {
        str::as_bytes(self)
    }
}

impl BufKind for [u8] {
    fn view(bytes: &[u8]) -> anyhow::Result<&Self> {
        Ok(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        self
    }
}

// === OwnedBuf === //

pub type GuestString = OwnedBuf<str>;
pub type Payload = OwnedBuf<[u8]>;

/// A buffer in guest memory which the holder must release exactly once.
///
/// Releasing consumes the handle. A handle which is dropped without being released leaks its
/// buffer, which is logged.
#[must_use = "owned buffers must be released with `OwnedBuf::release`"]
pub struct OwnedBuf<K: ?Sized + BufKind> {
    _ty: PhantomData<fn() -> *const K>,
    raw: FfiSlice<u8>,
}

impl<K: ?Sized + BufKind> fmt::Debug for OwnedBuf<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedBuf").field(&self.raw).finish()
    }
}

impl<K: ?Sized + BufKind> OwnedBuf<K> {
    /// Copies `value` into a fresh allocation obtained through the allocator bridge.
    pub fn duplicate(cx: &mut (impl ?Sized + GuestAlloc), value: &K) -> anyhow::Result<Self> {
        let bytes = value.as_bytes();
        let len = u32::try_from(bytes.len())?;

        let base = cx.alloc(1, len)?.cast::<u8>();
        let raw = FfiSlice::new(base, len);

        raw.write(cx)?.copy_from_slice(bytes);

        tracing::trace!("duplicated {len} byte(s) into {raw:?}");

        Ok(Self {
            _ty: PhantomData,
            raw,
        })
    }

    /// Takes ownership of a buffer which was allocated with alignment `1` through the allocator
    /// bridge and is not owned by anyone else.
    pub unsafe fn from_raw(raw: FfiSlice<u8>) -> Self {
        Self {
            _ty: PhantomData,
            raw,
        }
    }

    pub fn into_raw(self) -> FfiSlice<u8> {
        let raw = self.raw;
        mem::forget(self);
        raw
    }

    pub fn slice(&self) -> FfiSlice<u8> {
        self.raw
    }

    pub fn len(&self) -> u32 {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn borrow(&self) -> BorrowedBuf<'_, K> {
        unsafe { BorrowedBuf::from_raw(self.raw) }
    }

    pub fn read<'m>(&self, cx: &'m (impl ?Sized + GuestMemory)) -> anyhow::Result<&'m K> {
        K::view(self.raw.read(cx)?)
    }

    pub fn release(self, cx: &mut (impl ?Sized + GuestAlloc)) -> anyhow::Result<()> {
        release_raw(cx, &mut self.into_raw())
    }
}

impl<K: ?Sized + BufKind> Drop for OwnedBuf<K> {
    fn drop(&mut self) {
        tracing::warn!("leaked owned buffer {:?}", self.raw);
    }
}

/// Frees a buffer allocated with alignment `1` and zeroes its flat value.
pub fn release_raw(
    cx: &mut (impl ?Sized + GuestAlloc),
    raw: &mut FfiSlice<u8>,
) -> anyhow::Result<()> {
    cx.free(raw.base().cast(), raw.len(), 1)?;

    tracing::trace!("released {raw:?}");
    *raw = FfiSlice::empty();

    Ok(())
}

/// Duplicates `value` into guest memory for the duration of `f`.
///
/// The copy is released once `f` returns, including when it returns an error or unwinds.
pub fn with_duplicate<M, K, R>(
    cx: &mut M,
    value: &K,
    f: impl FnOnce(&mut M, BorrowedBuf<'_, K>) -> anyhow::Result<R>,
) -> anyhow::Result<R>
where
    M: ?Sized + GuestAlloc,
    K: ?Sized + BufKind,
{
    let owned = OwnedBuf::duplicate(cx, value)?;
    let raw = owned.into_raw();

    let mut guard = scopeguard::guard(cx, move |cx| {
        if let Err(err) = release_raw(cx, &mut { raw }) {
            tracing::error!("failed to release temporary buffer {raw:?}: {err:?}");
        }
    });

    let res = f(&mut **guard, unsafe { BorrowedBuf::from_raw(raw) });

    let cx = ScopeGuard::into_inner(guard);
    release_raw(cx, &mut { raw })?;

    res
}

// === BorrowedBuf === //

/// A view of bytes owned by somebody else. Passing one across the boundary never transfers
/// ownership.
#[derive_where(Copy, Clone)]
pub struct BorrowedBuf<'a, K: ?Sized + BufKind> {
    _ty: PhantomData<&'a K>,
    raw: FfiSlice<u8>,
}

impl<K: ?Sized + BufKind> fmt::Debug for BorrowedBuf<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BorrowedBuf").field(&self.raw).finish()
    }
}

impl<'a, K: ?Sized + BufKind> BorrowedBuf<'a, K> {
    /// Wraps bytes which already live in this module's linear memory.
    pub fn new_guest(value: &'a K) -> Self {
        Self {
            _ty: PhantomData,
            raw: FfiSlice::new_guest(value.as_bytes()),
        }
    }

    /// Wraps a buffer which stays valid and unchanged for `'a`.
    pub unsafe fn from_raw(raw: FfiSlice<u8>) -> Self {
        Self {
            _ty: PhantomData,
            raw,
        }
    }

    pub fn slice(self) -> FfiSlice<u8> {
        self.raw
    }

    pub fn len(self) -> u32 {
        self.raw.len()
    }

    pub fn is_empty(self) -> bool {
        self.raw.is_empty()
    }

    pub fn read<'m>(self, cx: &'m (impl ?Sized + GuestMemory)) -> anyhow::Result<&'m K> {
        K::view(self.raw.read(cx)?)
    }
}
