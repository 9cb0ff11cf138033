use crate::{AbiLayout, FfiPtr, FfiSlice, GuestMemory, ProtocolViolation, VariantLayout};

// === Marshal Trait === //

/// A value with a canonical in-memory representation inside a guest's linear memory.
///
/// `load` always produces an owned value: nothing returned by it borrows from the memory it was
/// read out of, which is what lets a return area be reused as soon as a load finishes.
pub trait Marshal: Sized {
    const LAYOUT: AbiLayout;

    fn load(cx: &(impl ?Sized + GuestMemory), ptr: FfiPtr<Self>) -> anyhow::Result<Self>;

    fn store(&self, cx: &mut (impl ?Sized + GuestMemory), ptr: FfiPtr<Self>)
    -> anyhow::Result<()>;
}

/// A [`Marshal`] type laid out as a tagged variant.
pub trait VariantMarshal: Marshal {
    const VARIANT: VariantLayout;
}

// === Primitives === //

macro_rules! impl_pod_marshal {
    ( $($ty:ty),*$(,)? ) => {$(
        impl Marshal for $ty {
            const LAYOUT: AbiLayout = AbiLayout::of_pod::<$ty>();

            fn load(cx: &(impl ?Sized + GuestMemory), ptr: FfiPtr<Self>) -> anyhow::Result<Self> {
                ptr.read(cx).copied()
            }

            fn store(
                &self,
                cx: &mut (impl ?Sized + GuestMemory),
                ptr: FfiPtr<Self>,
            ) -> anyhow::Result<()> {
                *ptr.write(cx)? = *self;

                Ok(())
            }
        }
    )*};
}

impl_pod_marshal! {
    u8,
    u16,
    u32,
    u64,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
}

impl Marshal for () {
    const LAYOUT: AbiLayout = AbiLayout::UNIT;

    fn load(_cx: &(impl ?Sized + GuestMemory), _ptr: FfiPtr<Self>) -> anyhow::Result<Self> {
        Ok(())
    }

    fn store(
        &self,
        _cx: &mut (impl ?Sized + GuestMemory),
        _ptr: FfiPtr<Self>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Marshal for bool {
    const LAYOUT: AbiLayout = AbiLayout::of_pod::<u8>();

    fn load(cx: &(impl ?Sized + GuestMemory), ptr: FfiPtr<Self>) -> anyhow::Result<Self> {
        match *ptr.cast::<u8>().read(cx)? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(ProtocolViolation::InvalidBool(v).into()),
        }
    }

    fn store(
        &self,
        cx: &mut (impl ?Sized + GuestMemory),
        ptr: FfiPtr<Self>,
    ) -> anyhow::Result<()> {
        *ptr.cast::<u8>().write(cx)? = *self as u8;

        Ok(())
    }
}

// Strings and byte lists are a `(offset, length)` pair of words.
impl<T: 'static> Marshal for FfiSlice<T> {
    const LAYOUT: AbiLayout = AbiLayout::new(8, 4);

    fn load(cx: &(impl ?Sized + GuestMemory), ptr: FfiPtr<Self>) -> anyhow::Result<Self> {
        ptr.read(cx).copied()
    }

    fn store(
        &self,
        cx: &mut (impl ?Sized + GuestMemory),
        ptr: FfiPtr<Self>,
    ) -> anyhow::Result<()> {
        *ptr.write(cx)? = *self;

        Ok(())
    }
}

// === Option === //

impl<T: Marshal> VariantMarshal for Option<T> {
    const VARIANT: VariantLayout = VariantLayout::new(&[AbiLayout::UNIT, T::LAYOUT]);
}

impl<T: Marshal> Marshal for Option<T> {
    const LAYOUT: AbiLayout = <Self as VariantMarshal>::VARIANT.layout;

    fn load(cx: &(impl ?Sized + GuestMemory), ptr: FfiPtr<Self>) -> anyhow::Result<Self> {
        let payload = ptr
            .byte_add(<Self as VariantMarshal>::VARIANT.payload_offset)?
            .cast::<T>();

        match *ptr.cast::<u8>().read(cx)? {
            0 => Ok(None),
            1 => Ok(Some(T::load(cx, payload)?)),
            tag => Err(ProtocolViolation::MalformedTag { ty: "option", tag }.into()),
        }
    }

    fn store(
        &self,
        cx: &mut (impl ?Sized + GuestMemory),
        ptr: FfiPtr<Self>,
    ) -> anyhow::Result<()> {
        *ptr.cast::<u8>().write(cx)? = self.is_some() as u8;

        if let Some(value) = self {
            value.store(
                cx,
                ptr.byte_add(<Self as VariantMarshal>::VARIANT.payload_offset)?
                    .cast(),
            )?;
        }

        Ok(())
    }
}

// === Result === //

impl<T: Marshal, E: Marshal> VariantMarshal for Result<T, E> {
    const VARIANT: VariantLayout = VariantLayout::new(&[T::LAYOUT, E::LAYOUT]);
}

impl<T: Marshal, E: Marshal> Marshal for Result<T, E> {
    const LAYOUT: AbiLayout = <Self as VariantMarshal>::VARIANT.layout;

    fn load(cx: &(impl ?Sized + GuestMemory), ptr: FfiPtr<Self>) -> anyhow::Result<Self> {
        let payload = ptr.byte_add(<Self as VariantMarshal>::VARIANT.payload_offset)?;
        let tag = *ptr.cast::<u8>().read(cx)?;

        tracing::trace!("loading result with tag {tag} from {ptr:?}");

        // Only the arm selected by the tag is ever read; the other arm's bytes are undefined.
        match tag {
            0 => Ok(Ok(T::load(cx, payload.cast())?)),
            1 => Ok(Err(E::load(cx, payload.cast())?)),
            tag => Err(ProtocolViolation::MalformedTag { ty: "result", tag }.into()),
        }
    }

    fn store(
        &self,
        cx: &mut (impl ?Sized + GuestMemory),
        ptr: FfiPtr<Self>,
    ) -> anyhow::Result<()> {
        let payload = ptr.byte_add(<Self as VariantMarshal>::VARIANT.payload_offset)?;

        *ptr.cast::<u8>().write(cx)? = self.is_err() as u8;

        match self {
            Ok(value) => value.store(cx, payload.cast()),
            Err(value) => value.store(cx, payload.cast()),
        }
    }
}

// === Enum Marshalling === //

// Macro
pub mod marshal_enum_internals {
    pub use {
        crate::{AbiLayout, FfiPtr, GuestMemory, Marshal, ProtocolViolation},
        anyhow::Result,
        std::{
            clone::Clone,
            cmp::{Eq, Ord, PartialEq, PartialOrd},
            fmt::Debug,
            hash::Hash,
            marker::Copy,
            option::Option,
            stringify,
        },
    };

    pub mod primitives {
        // From: https://doc.rust-lang.org/reference/type-layout.html#r-layout.repr.primitive.intro
        pub use std::primitive::{u8, u16, u32};
    }
}

#[macro_export]
macro_rules! marshal_enum {
    ($(
        $(#[$($item_meta:tt)*])*
        $item_vis:vis enum $item_name:ident : $repr:ident {
            $(
                $(#[$($field_meta:tt)*])*
                $variant_name:ident = $variant_val:expr
            ),+
            $(,)?
        }
    )*) => {$(
        #[derive(
            $crate::marshal_enum_internals::Debug,
            $crate::marshal_enum_internals::Copy,
            $crate::marshal_enum_internals::Clone,
            $crate::marshal_enum_internals::Hash,
            $crate::marshal_enum_internals::Eq,
            $crate::marshal_enum_internals::PartialEq,
            $crate::marshal_enum_internals::Ord,
            $crate::marshal_enum_internals::PartialOrd,
        )]
        $(#[$($item_meta)*])*
        #[repr($repr)]
        $item_vis enum $item_name {
            $(
                $(#[$($field_meta)*])*
                $variant_name = $variant_val,
            )*
        }

        impl $item_name {
            pub const ALL: &'static [Self] = &[$(Self::$variant_name,)*];

            #[allow(non_upper_case_globals)]
            pub const fn from_raw(
                raw: $crate::marshal_enum_internals::primitives::$repr,
            ) -> $crate::marshal_enum_internals::Option<Self> {
                $(
                    const $variant_name: $crate::marshal_enum_internals::primitives::$repr
                        = $item_name::$variant_name as $crate::marshal_enum_internals::primitives::$repr;
                )*

                match raw {
                    $($variant_name => Some(Self::$variant_name),)*
                    _ => None,
                }
            }

            pub const fn to_raw(self) -> $crate::marshal_enum_internals::primitives::$repr {
                self as $crate::marshal_enum_internals::primitives::$repr
            }
        }

        impl $crate::marshal_enum_internals::Marshal for $item_name {
            const LAYOUT: $crate::marshal_enum_internals::AbiLayout =
                $crate::marshal_enum_internals::AbiLayout::of_pod::<
                    $crate::marshal_enum_internals::primitives::$repr,
                >();

            fn load(
                cx: &(impl ?Sized + $crate::marshal_enum_internals::GuestMemory),
                ptr: $crate::marshal_enum_internals::FfiPtr<Self>,
            ) -> $crate::marshal_enum_internals::Result<Self> {
                let raw = *ptr
                    .cast::<$crate::marshal_enum_internals::primitives::$repr>()
                    .read(cx)?;

                Self::from_raw(raw).ok_or_else(|| {
                    $crate::marshal_enum_internals::ProtocolViolation::UnknownDiscriminant {
                        ty: $crate::marshal_enum_internals::stringify!($item_name),
                        value: raw as u64,
                    }
                    .into()
                })
            }

            fn store(
                &self,
                cx: &mut (impl ?Sized + $crate::marshal_enum_internals::GuestMemory),
                ptr: $crate::marshal_enum_internals::FfiPtr<Self>,
            ) -> $crate::marshal_enum_internals::Result<()> {
                *ptr.cast::<$crate::marshal_enum_internals::primitives::$repr>().write(cx)?
                    = self.to_raw();

                Ok(())
            }
        }
    )*};
}
