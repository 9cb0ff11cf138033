use cachelink::{
    AbiLayout, FfiPtr, FfiSlice, FlatArgs, Port, VariantLayout, VariantMarshal, lift_option,
    lift_slice, lower_option, lower_slice, marshal_enum,
};

// === Interface === //

pub const IMPORT_MODULE: &str = "wasi-cache";

pub const CACHE_SET: Port<SetArgs, UnitResult> = Port::new(IMPORT_MODULE, "set");

pub const CACHE_GET: Port<KeyArgs, PayloadResult> = Port::new(IMPORT_MODULE, "get");

pub const CACHE_DELETE: Port<KeyArgs, UnitResult> = Port::new(IMPORT_MODULE, "delete");

marshal_enum! {
    /// The error payload of every cache operation.
    ///
    /// `Success` is a value of the error arm and is never produced by a successful call: success
    /// is signalled by the `ok` tag alone.
    pub enum CacheError: u8 {
        Success = 0,
        Error = 1,
    }
}

pub type UnitResult = Result<(), CacheError>;

pub type PayloadResult = Result<FfiSlice<u8>, CacheError>;

// === Layout Tables === //

pub const SET_RESULT: VariantLayout = UnitResult::VARIANT;

pub const GET_RESULT: VariantLayout = PayloadResult::VARIANT;

pub const DELETE_RESULT: VariantLayout = UnitResult::VARIANT;

/// The largest result any operation of the interface writes.
pub const RETURN_AREA: AbiLayout = CACHE_SET
    .result_layout()
    .union(CACHE_GET.result_layout())
    .union(CACHE_DELETE.result_layout());

pub const RETURN_AREA_SIZE: usize = RETURN_AREA.size as usize;

// === Arguments === //

/// Arguments of `set`, lowered to
/// `[key.ptr, key.len, value.ptr, value.len, ttl.present, ttl.value, ret]`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SetArgs {
    pub key: FfiSlice<u8>,
    pub value: FfiSlice<u8>,
    /// Time to live in seconds. `None` never expires.
    pub ttl: Option<u32>,
}

impl FlatArgs for SetArgs {
    const WORDS: usize = 7;

    type Words = [u32; 7];

    fn flatten(&self, ret: FfiPtr<()>) -> Self::Words {
        let [key_ptr, key_len] = lower_slice(self.key);
        let [value_ptr, value_len] = lower_slice(self.value);
        let [ttl_present, ttl_value] = lower_option(self.ttl);

        [
            key_ptr,
            key_len,
            value_ptr,
            value_len,
            ttl_present,
            ttl_value,
            ret.addr(),
        ]
    }

    fn unflatten(words: Self::Words) -> anyhow::Result<(Self, FfiPtr<()>)> {
        let [key_ptr, key_len, value_ptr, value_len, ttl_present, ttl_value, ret] = words;

        Ok((
            Self {
                key: lift_slice([key_ptr, key_len]),
                value: lift_slice([value_ptr, value_len]),
                ttl: lift_option([ttl_present, ttl_value])?,
            },
            FfiPtr::new(ret),
        ))
    }
}

/// Arguments of `get` and `delete`, lowered to `[key.ptr, key.len, ret]`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KeyArgs {
    pub key: FfiSlice<u8>,
}

impl FlatArgs for KeyArgs {
    const WORDS: usize = 3;

    type Words = [u32; 3];

    fn flatten(&self, ret: FfiPtr<()>) -> Self::Words {
        let [key_ptr, key_len] = lower_slice(self.key);

        [key_ptr, key_len, ret.addr()]
    }

    fn unflatten([key_ptr, key_len, ret]: Self::Words) -> anyhow::Result<(Self, FfiPtr<()>)> {
        Ok((
            Self {
                key: lift_slice([key_ptr, key_len]),
            },
            FfiPtr::new(ret),
        ))
    }
}
