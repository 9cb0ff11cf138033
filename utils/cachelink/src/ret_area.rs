use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering::Relaxed},
};

use crate::{AbiLayout, FfiPtr, GuestMemory, Marshal, ProtocolViolation, utils::is_wasm};

// === ReturnArea === //

/// Byte written over the whole return area before every call. No tag is ever `0xFF` so a callee
/// which never writes its result is caught on decode.
pub const RETURN_AREA_POISON: u8 = 0xFF;

/// Exclusive access to the scratch region a foreign call writes its result into.
///
/// Only one call may be in flight at a time, which `&mut self` on [`ReturnArea::call`]
/// enforces. Results are decoded into owned values before `call` returns so no reference into
/// the region ever outlives it.
#[derive(Debug)]
pub struct ReturnArea {
    base: FfiPtr<()>,
    layout: AbiLayout,
}

impl ReturnArea {
    pub fn new(base: FfiPtr<()>, layout: AbiLayout) -> anyhow::Result<Self> {
        if base.is_null() {
            anyhow::bail!("return area cannot live at the null address");
        }

        if !base.is_aligned_to(layout.align) {
            anyhow::bail!(
                "return area {base:?} is not aligned to {} byte(s)",
                layout.align,
            );
        }

        Ok(Self { base, layout })
    }

    /// Claims a static storage region of this module. Each region can only be claimed once.
    pub fn from_static<const N: usize>(
        storage: &'static ReturnAreaStorage<N>,
        layout: AbiLayout,
    ) -> anyhow::Result<Self> {
        if layout.size as usize > N || layout.align > 8 {
            anyhow::bail!("return area storage of {N} byte(s) cannot hold layout {layout:?}");
        }

        if storage.claimed.swap(true, Relaxed) {
            anyhow::bail!("return area storage was already claimed");
        }

        Self::new(storage.guest_ptr(), layout)
    }

    pub fn base(&self) -> FfiPtr<()> {
        self.base
    }

    pub fn layout(&self) -> AbiLayout {
        self.layout
    }

    /// Runs a foreign call which writes a `T` at the address it is handed and decodes it.
    pub fn call<M, T>(
        &mut self,
        cx: &mut M,
        invoke: impl FnOnce(&mut M, FfiPtr<()>) -> anyhow::Result<()>,
    ) -> anyhow::Result<T>
    where
        M: ?Sized + GuestMemory,
        T: Marshal,
    {
        if !T::LAYOUT.fits_in(self.layout) {
            return Err(ProtocolViolation::ReturnAreaTooSmall {
                needed: T::LAYOUT,
                area: self.layout,
            }
            .into());
        }

        cx.bytes_mut(self.base.addr(), self.layout.size)?
            .fill(RETURN_AREA_POISON);

        invoke(cx, self.base)?;

        T::load(cx, self.base.cast())
    }
}

// === ReturnAreaStorage === //

/// Statically allocated backing bytes for a [`ReturnArea`], aligned to `8`.
#[repr(C, align(8))]
pub struct ReturnAreaStorage<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
    claimed: AtomicBool,
}

unsafe impl<const N: usize> Sync for ReturnAreaStorage<N> {}

impl<const N: usize> Default for ReturnAreaStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ReturnAreaStorage<N> {
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Relaxed)
    }

    fn guest_ptr(&'static self) -> FfiPtr<()> {
        cfgenius::cond! {
            if macro(is_wasm) {
                FfiPtr::new_guest(self.bytes.get().cast::<()>())
            } else {
                unimplemented!("static return areas only exist inside a guest")
            }
        }
    }
}
