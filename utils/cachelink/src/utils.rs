use std::mem;

cfgenius::define! {
    pub is_wasm = cfg(target_arch = "wasm32");
}

pub const fn align_of_u32<T>() -> u32 {
    const {
        let align = mem::align_of::<T>() as u64;

        if align > u32::MAX as u64 {
            panic!("alignment is too large for guest")
        }

        align as u32
    }
}

pub const fn size_of_u32<T>() -> u32 {
    const {
        let size = mem::size_of::<T>() as u64;

        if size > u32::MAX as u64 {
            panic!("size is too large for guest")
        }

        size as u32
    }
}

pub const fn guest_usize_to_u32(val: usize) -> u32 {
    cfgenius::cond! {
        if macro(is_wasm) {
            val as u32
        } else {
            _ = val;

            unimplemented!();
        }
    }
}

pub const fn align_up(offset: u32, align: u32) -> u32 {
    (offset + align - 1) & !(align - 1)
}
