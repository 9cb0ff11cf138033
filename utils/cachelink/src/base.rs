use std::{fmt, marker::PhantomData, mem, ptr, slice};

use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use derive_where::derive_where;

use crate::{
    ProtocolViolation,
    utils::{guest_usize_to_u32, is_wasm, size_of_u32},
};

// === Memory Traits === //

/// A guest's linear memory, addressed by 32-bit offsets.
pub trait GuestMemory {
    fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]>;

    fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]>;

    fn read_slice<T: Pod>(&self, base: u32, len: u32) -> anyhow::Result<&[T]> {
        if mem::size_of::<T>() == 0 {
            return Ok(unsafe { slice::from_raw_parts(ptr::dangling::<T>(), len as usize) });
        }

        let byte_len = size_of_u32::<T>()
            .checked_mul(len)
            .context("arithmetic overflow during addressing")?;

        let bytes = self.bytes(base, byte_len)?;

        bytemuck::try_cast_slice::<u8, T>(bytes)
            .ok()
            .context("failed to convert byte view to POD slice")
    }

    fn write_slice<T: Pod>(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [T]> {
        if mem::size_of::<T>() == 0 {
            return Ok(unsafe {
                slice::from_raw_parts_mut(ptr::dangling_mut::<T>(), len as usize)
            });
        }

        let byte_len = size_of_u32::<T>()
            .checked_mul(len)
            .context("arithmetic overflow during addressing")?;

        let bytes = self.bytes_mut(base, byte_len)?;

        bytemuck::try_cast_slice_mut::<u8, T>(bytes)
            .ok()
            .context("failed to convert byte view to POD slice")
    }

    fn read_array<T: Pod, const N: usize>(&self, addr: u32) -> anyhow::Result<&[T; N]> {
        self.read_slice(addr, N as u32)
            .map(|v| &bytemuck::cast_slice::<T, [T; N]>(v)[0])
    }

    fn write_array<T: Pod, const N: usize>(&mut self, addr: u32) -> anyhow::Result<&mut [T; N]> {
        self.write_slice(addr, N as u32)
            .map(|v| &mut bytemuck::cast_slice_mut::<T, [T; N]>(v)[0])
    }
}

/// The allocator bridge: every buffer crossing the boundary is obtained and released through
/// these two primitives.
pub trait GuestAlloc: GuestMemory {
    /// Reallocates `old` (or allocates afresh when `old` is null) to `new_size` bytes.
    ///
    /// Never yields a null pointer. A zero-sized request yields a dangling pointer equal to
    /// `align`. On a real guest an allocation failure aborts the instance, which a host observes
    /// as a trap and therefore as an `Err`.
    fn realloc(
        &mut self,
        old: FfiPtr<()>,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> anyhow::Result<FfiPtr<()>>;

    /// Releases exactly `size` bytes obtained with the same `align`. Zero-sized frees are no-ops.
    fn free(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> anyhow::Result<()>;

    fn alloc(&mut self, align: u32, size: u32) -> anyhow::Result<FfiPtr<()>> {
        self.realloc(FfiPtr::null(), 0, align, size)
    }
}

impl GuestMemory for [u8] {
    fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]> {
        self.get(base as usize..)
            .context("memory base address too large")?
            .get(..len as usize)
            .context("read past bounds of memory")
    }

    fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]> {
        self.get_mut(base as usize..)
            .context("memory base address too large")?
            .get_mut(..len as usize)
            .context("write past bounds of memory")
    }
}

impl<M: ?Sized + GuestMemory> GuestMemory for &mut M {
    fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]> {
        (**self).bytes(base, len)
    }

    fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]> {
        (**self).bytes_mut(base, len)
    }
}

impl<M: ?Sized + GuestAlloc> GuestAlloc for &mut M {
    fn realloc(
        &mut self,
        old: FfiPtr<()>,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> anyhow::Result<FfiPtr<()>> {
        (**self).realloc(old, old_size, align, new_size)
    }

    fn free(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> anyhow::Result<()> {
        (**self).free(ptr, size, align)
    }
}

// === FFI Types === //

#[derive_where(Copy, Clone, Hash, Eq, PartialEq)]
#[repr(transparent)]
pub struct FfiPtr<T> {
    _ty: PhantomData<fn(T) -> T>,
    addr: u32,
}

unsafe impl<T: 'static> Pod for FfiPtr<T> {}

unsafe impl<T: 'static> Zeroable for FfiPtr<T> {}

impl<T> fmt::Debug for FfiPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FfiPtr({:#x})", self.addr)
    }
}

impl<T> FfiPtr<T> {
    pub const fn new(addr: u32) -> Self {
        Self {
            _ty: PhantomData,
            addr,
        }
    }

    pub const fn null() -> Self {
        Self::new(0)
    }

    pub fn new_guest(ptr: *const T) -> Self {
        Self::new(guest_usize_to_u32(ptr as usize))
    }

    pub const fn guest_ptr(self) -> *mut T {
        cfgenius::cond! {
            if macro(is_wasm) {
                self.addr as usize as *mut T
            } else {
                unimplemented!()
            }
        }
    }

    pub const fn addr(self) -> u32 {
        self.addr
    }

    pub const fn is_null(self) -> bool {
        self.addr == 0
    }

    pub const fn is_aligned_to(self, align: u32) -> bool {
        self.addr % align == 0
    }

    pub const fn cast<V>(self) -> FfiPtr<V> {
        FfiPtr::new(self.addr())
    }

    /// Offsets the address by `offset` bytes. Guest-supplied addresses may sit anywhere, so
    /// wrapping past the end of the address space is reported rather than assumed away.
    pub fn byte_add(self, offset: u32) -> anyhow::Result<FfiPtr<T>> {
        match self.addr.checked_add(offset) {
            Some(addr) => Ok(Self::new(addr)),
            None => Err(ProtocolViolation::AddressOverflow {
                base: self.addr,
                offset,
            }
            .into()),
        }
    }
}

impl<T: Pod> FfiPtr<T> {
    pub fn read(self, cx: &(impl ?Sized + GuestMemory)) -> anyhow::Result<&T> {
        let [value] = cx.read_array(self.addr())?;
        Ok(value)
    }

    pub fn write(self, cx: &mut (impl ?Sized + GuestMemory)) -> anyhow::Result<&mut T> {
        let [value] = cx.write_array(self.addr())?;
        Ok(value)
    }
}

#[derive_where(Copy, Clone, Hash, Eq, PartialEq)]
#[repr(C)]
pub struct FfiSlice<T> {
    _ty: PhantomData<fn(T) -> T>,
    base: FfiPtr<T>,
    len: u32,
}

unsafe impl<T: 'static> Pod for FfiSlice<T> {}

unsafe impl<T: 'static> Zeroable for FfiSlice<T> {}

impl<T> fmt::Debug for FfiSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FfiSlice({:#x}, len: {})", self.base.addr, self.len)
    }
}

impl<T> FfiSlice<T> {
    pub const fn new(base: FfiPtr<T>, len: u32) -> Self {
        Self {
            _ty: PhantomData,
            base,
            len,
        }
    }

    pub const fn empty() -> Self {
        Self::new(FfiPtr::null(), 0)
    }

    pub fn new_guest(ptr: *const [T]) -> Self {
        Self::new(
            FfiPtr::new_guest(ptr as *const T),
            guest_usize_to_u32(ptr.len()),
        )
    }

    pub const fn guest_ptr(self) -> *mut [T] {
        cfgenius::cond! {
            if macro(is_wasm) {
                std::ptr::slice_from_raw_parts_mut(self.base.guest_ptr(), self.len as usize)
            } else {
                unimplemented!()
            }
        }
    }

    pub const fn base(self) -> FfiPtr<T> {
        self.base
    }

    pub const fn len(self) -> u32 {
        self.len
    }

    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    pub const fn cast<V>(self) -> FfiSlice<V> {
        FfiSlice::new(self.base.cast(), self.len)
    }
}

impl<T: Pod> FfiSlice<T> {
    pub fn read(self, cx: &(impl ?Sized + GuestMemory)) -> anyhow::Result<&[T]> {
        cx.read_slice(self.base().addr(), self.len())
    }

    pub fn write(self, cx: &mut (impl ?Sized + GuestMemory)) -> anyhow::Result<&mut [T]> {
        cx.write_slice(self.base().addr(), self.len())
    }
}
