use crate::utils::is_wasm;

cfgenius::cond! {
    if macro(is_wasm) {
        use std::{alloc, process, ptr::NonNull, slice};

        use crate::{FfiPtr, GuestAlloc, GuestMemory};

        // === LocalMemory === //

        /// The linear memory of the module this code is compiled into.
        #[derive(Debug, Copy, Clone, Default)]
        pub struct LocalMemory;

        impl GuestMemory for LocalMemory {
            fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]> {
                if len == 0 {
                    return Ok(&[]);
                }

                let Some(base) = NonNull::new(base as usize as *mut u8) else {
                    anyhow::bail!("attempted to read from the null address");
                };

                Ok(unsafe { slice::from_raw_parts(base.as_ptr(), len as usize) })
            }

            fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]> {
                if len == 0 {
                    return Ok(&mut []);
                }

                let Some(base) = NonNull::new(base as usize as *mut u8) else {
                    anyhow::bail!("attempted to write to the null address");
                };

                Ok(unsafe { slice::from_raw_parts_mut(base.as_ptr(), len as usize) })
            }
        }

        impl GuestAlloc for LocalMemory {
            fn realloc(
                &mut self,
                old: FfiPtr<()>,
                old_size: u32,
                align: u32,
                new_size: u32,
            ) -> anyhow::Result<FfiPtr<()>> {
                let ptr = unsafe {
                    canonical_abi_realloc(
                        old.guest_ptr().cast(),
                        old_size as usize,
                        align as usize,
                        new_size as usize,
                    )
                };

                Ok(FfiPtr::new_guest(ptr.cast::<()>()))
            }

            fn free(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> anyhow::Result<()> {
                unsafe { canonical_abi_free(ptr.guest_ptr().cast(), size as usize, align as usize) };

                Ok(())
            }
        }

        // === Allocator Exports === //

        /// Reallocates `old_ptr` (or allocates afresh when it is null). Never returns null: an
        /// allocation failure aborts the instance.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn canonical_abi_realloc(
            old_ptr: *mut u8,
            old_size: usize,
            align: usize,
            new_size: usize,
        ) -> *mut u8 {
            let Ok(new_layout) = alloc::Layout::from_size_align(new_size, align) else {
                process::abort();
            };

            if new_size == 0 {
                unsafe { canonical_abi_free(old_ptr, old_size, align) };

                return align as *mut u8;
            }

            let ptr = if old_ptr.is_null() || old_size == 0 {
                unsafe { alloc::alloc(new_layout) }
            } else {
                let Ok(old_layout) = alloc::Layout::from_size_align(old_size, align) else {
                    process::abort();
                };

                unsafe { alloc::realloc(old_ptr, old_layout, new_size) }
            };

            if ptr.is_null() {
                alloc::handle_alloc_error(new_layout);
            }

            ptr
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn canonical_abi_free(ptr: *mut u8, size: usize, align: usize) {
            if size == 0 || ptr.is_null() {
                return;
            }

            let Ok(layout) = alloc::Layout::from_size_align(size, align) else {
                process::abort();
            };

            unsafe { alloc::dealloc(ptr, layout) };
        }
    }
}
