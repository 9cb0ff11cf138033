#![cfg(test)]

use super::*;

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::sim::{FREED_FILL, SimFault, SimMemory};

crate::marshal_enum! {
    enum Code: u8 {
        Fine = 0,
        Broken = 1,
    }
}

type UnitResult = Result<(), Code>;
type SliceResult = Result<FfiSlice<u8>, Code>;

fn violation(err: &anyhow::Error) -> Option<&ProtocolViolation> {
    err.downcast_ref::<ProtocolViolation>()
}

fn scratch(mem: &mut SimMemory, layout: AbiLayout) -> FfiPtr<()> {
    mem.reserve_static(layout).unwrap()
}

// === Layouts === //

#[test]
fn unit_result_layout() {
    assert_eq!(UnitResult::LAYOUT, AbiLayout::new(2, 1));
    assert_eq!(UnitResult::VARIANT.tag_size, 1);
    assert_eq!(UnitResult::VARIANT.payload_offset, 1);
}

#[test]
fn slice_result_layout() {
    assert_eq!(SliceResult::LAYOUT, AbiLayout::new(12, 4));
    assert_eq!(SliceResult::VARIANT.payload_offset, 4);
}

#[test]
fn option_layout() {
    assert_eq!(<Option<u32>>::LAYOUT, AbiLayout::new(8, 4));
    assert_eq!(<Option<u8>>::LAYOUT, AbiLayout::new(2, 1));
    assert_eq!(<Option<u64>>::VARIANT.payload_offset, 8);
}

#[test]
fn layout_union_and_fit() {
    let area = UnitResult::LAYOUT.union(SliceResult::LAYOUT);

    assert_eq!(area, AbiLayout::new(12, 4));
    assert!(UnitResult::LAYOUT.fits_in(area));
    assert!(!<Option<u64>>::LAYOUT.fits_in(area));
}

// === Composite Encoders === //

#[test]
fn result_reads_err_arm_at_payload_offset() {
    let mut mem = SimMemory::new();
    let ptr = scratch(&mut mem, SliceResult::LAYOUT);

    mem.bytes_mut(ptr.addr(), 12)
        .unwrap()
        .copy_from_slice(&[1, 0xAA, 0xAA, 0xAA, 1, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]);

    let res = SliceResult::load(&mem, ptr.cast()).unwrap();
    assert_eq!(res, Err(Code::Broken));
}

#[test]
fn result_store_then_load() {
    let mut mem = SimMemory::new();
    let ptr = scratch(&mut mem, SliceResult::LAYOUT).cast::<SliceResult>();

    let value: SliceResult = Ok(FfiSlice::new(FfiPtr::new(0x40), 3));
    value.store(&mut mem, ptr).unwrap();

    assert_eq!(*ptr.cast::<u8>().read(&mem).unwrap(), 0);
    assert_eq!(*ptr.byte_add(4).unwrap().cast::<u32>().read(&mem).unwrap(), 0x40);
    assert_eq!(*ptr.byte_add(8).unwrap().cast::<u32>().read(&mem).unwrap(), 3);
    assert_eq!(SliceResult::load(&mem, ptr).unwrap(), value);

    let unit = scratch(&mut mem, UnitResult::LAYOUT).cast::<UnitResult>();
    Err::<(), _>(Code::Broken).store(&mut mem, unit).unwrap();

    assert_eq!(mem.bytes(unit.addr(), 2).unwrap(), &[1, 1]);
}

#[test]
fn result_rejects_unknown_tag() {
    let mut mem = SimMemory::new();
    let ptr = scratch(&mut mem, UnitResult::LAYOUT);

    mem.bytes_mut(ptr.addr(), 2).unwrap().copy_from_slice(&[2, 0]);

    let err = UnitResult::load(&mem, ptr.cast()).unwrap_err();
    assert_eq!(
        violation(&err),
        Some(&ProtocolViolation::MalformedTag {
            ty: "result",
            tag: 2
        }),
    );
}

#[test]
fn results_at_the_end_of_the_address_space() {
    let mut mem = SimMemory::new();
    let overflow = ProtocolViolation::AddressOverflow {
        base: u32::MAX,
        offset: 1,
    };

    let err = FfiPtr::<u8>::new(u32::MAX).byte_add(1).unwrap_err();
    assert_eq!(violation(&err), Some(&overflow));
    assert_eq!(FfiPtr::<u8>::new(u32::MAX - 1).byte_add(1).unwrap().addr(), u32::MAX);

    let err = UnitResult::load(&mem, FfiPtr::new(u32::MAX)).unwrap_err();
    assert_eq!(violation(&err), Some(&overflow));

    let err = Err::<(), _>(Code::Broken)
        .store(&mut mem, FfiPtr::new(u32::MAX))
        .unwrap_err();
    assert_eq!(violation(&err), Some(&overflow));

    let err = Some(3u32).store(&mut mem, FfiPtr::new(u32::MAX - 2)).unwrap_err();
    assert_eq!(
        violation(&err),
        Some(&ProtocolViolation::AddressOverflow {
            base: u32::MAX - 2,
            offset: 4,
        }),
    );
}

#[test]
fn enum_rejects_unknown_discriminant() {
    let mut mem = SimMemory::new();
    let ptr = scratch(&mut mem, UnitResult::LAYOUT);

    mem.bytes_mut(ptr.addr(), 2).unwrap().copy_from_slice(&[1, 7]);

    let err = UnitResult::load(&mem, ptr.cast()).unwrap_err();
    assert_eq!(
        violation(&err),
        Some(&ProtocolViolation::UnknownDiscriminant {
            ty: "Code",
            value: 7
        }),
    );

    assert_eq!(Code::from_raw(1), Some(Code::Broken));
    assert_eq!(Code::from_raw(2), None);
    assert_eq!(Code::ALL, &[Code::Fine, Code::Broken]);
}

#[test]
fn option_memory_form() {
    let mut mem = SimMemory::new();
    let ptr = scratch(&mut mem, <Option<u32>>::LAYOUT).cast::<Option<u32>>();

    Some(1234u32).store(&mut mem, ptr).unwrap();
    assert_eq!(<Option<u32>>::load(&mem, ptr).unwrap(), Some(1234));

    None::<u32>.store(&mut mem, ptr).unwrap();
    assert_eq!(<Option<u32>>::load(&mem, ptr).unwrap(), None);
}

#[test]
fn bool_rejects_out_of_range() {
    let mut mem = SimMemory::new();
    let ptr = scratch(&mut mem, bool::LAYOUT);

    *ptr.cast::<u8>().write(&mut mem).unwrap() = 1;
    assert!(bool::load(&mem, ptr.cast()).unwrap());

    *ptr.cast::<u8>().write(&mut mem).unwrap() = 3;
    let err = bool::load(&mem, ptr.cast()).unwrap_err();
    assert_eq!(violation(&err), Some(&ProtocolViolation::InvalidBool(3)));
}

// === Flat Encoders === //

#[test]
fn option_flat_form() {
    assert_eq!(lower_option(None), [0, 0]);
    assert_eq!(lower_option(Some(0)), [1, 0]);
    assert_eq!(lower_option(Some(u32::MAX)), [1, u32::MAX]);

    // The value word of an absent option is never inspected.
    assert_eq!(lift_option([0, 1234]).unwrap(), None);
    assert_eq!(lift_option([1, 1234]).unwrap(), Some(1234));

    let err = lift_option([2, 0]).unwrap_err();
    assert_eq!(violation(&err), Some(&ProtocolViolation::InvalidOptionFlag(2)));
}

#[test]
fn slice_flat_form() {
    let slice = FfiSlice::<u8>::new(FfiPtr::new(0x100), 9);

    assert_eq!(lower_slice(slice), [0x100, 9]);
    assert_eq!(lift_slice::<u8>([0x100, 9]), slice);
}

// === Buffers === //

#[test]
fn duplicate_then_release() {
    let mut mem = SimMemory::new();

    let owned = GuestString::duplicate(&mut mem, "hello").unwrap();
    assert_eq!(owned.len(), 5);
    assert_eq!(owned.read(&mem).unwrap(), "hello");
    assert_eq!(mem.live_count(), 1);

    let mut raw = owned.into_raw();
    let freed = raw;
    release_raw(&mut mem, &mut raw).unwrap();

    assert_eq!(raw, FfiSlice::empty());
    assert_eq!(freed.read(&mem).unwrap(), &[FREED_FILL; 5]);
    mem.check_leaks().unwrap();
}

#[test]
fn empty_buffers_are_dangling() {
    let mut mem = SimMemory::new();

    let owned = Payload::duplicate(&mut mem, &[]).unwrap();
    assert_eq!(owned.slice().base().addr(), 1);
    assert!(owned.read(&mem).unwrap().is_empty());

    owned.release(&mut mem).unwrap();
    assert_eq!(mem.alloc_count(), 0);
    mem.check_leaks().unwrap();
}

#[test]
fn double_free_is_flagged() {
    let mut mem = SimMemory::new();

    let raw = Payload::duplicate(&mut mem, b"xyz").unwrap().into_raw();
    release_raw(&mut mem, &mut { raw }).unwrap();

    let err = release_raw(&mut mem, &mut { raw }).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SimFault>(),
        Some(SimFault::DoubleFree(_))
    ));
}

#[test]
fn size_mismatch_is_flagged() {
    let mut mem = SimMemory::new();
    let ptr = mem.alloc(4, 16).unwrap();

    let err = mem.free(ptr, 8, 4).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SimFault>(),
        Some(SimFault::SizeMismatch {
            actual: 16,
            claimed: 8,
            ..
        })
    ));

    mem.free(ptr, 16, 4).unwrap();
    mem.check_leaks().unwrap();
}

#[test]
fn leaks_are_flagged() {
    let mut mem = SimMemory::new();

    let leaked = Payload::duplicate(&mut mem, b"leak").unwrap();
    let raw = leaked.into_raw();

    assert!(mem.check_leaks().is_err());
    assert_eq!(mem.live_allocations().next().unwrap().0, raw.base().cast());

    release_raw(&mut mem, &mut { raw }).unwrap();
    mem.check_leaks().unwrap();
}

#[test]
fn invalid_utf8_is_rejected() {
    let mut mem = SimMemory::new();

    let bytes = Payload::duplicate(&mut mem, &[0xC3, 0x28]).unwrap();
    let text = unsafe { OwnedBuf::<str>::from_raw(bytes.into_raw()) };

    let err = text.read(&mem).unwrap_err();
    assert_eq!(violation(&err), Some(&ProtocolViolation::InvalidUtf8));

    text.release(&mut mem).unwrap();
}

#[test]
fn with_duplicate_releases_on_success_and_error() {
    let mut mem = SimMemory::new();

    let len = with_duplicate(&mut mem, "abc", |mem, buf| {
        assert_eq!(buf.read(mem)?, "abc");
        Ok(buf.len())
    })
    .unwrap();

    assert_eq!(len, 3);
    mem.check_leaks().unwrap();

    let res = with_duplicate(&mut mem, b"abc".as_slice(), |_, _| -> anyhow::Result<()> {
        anyhow::bail!("callee failed")
    });

    assert!(res.is_err());
    mem.check_leaks().unwrap();
    assert_eq!(mem.alloc_count(), mem.free_count());
}

#[test]
fn with_duplicate_releases_on_unwind() {
    let mut mem = SimMemory::new();

    let res = catch_unwind(AssertUnwindSafe(|| {
        with_duplicate(&mut mem, "boom", |_, _| -> anyhow::Result<()> {
            panic!("callee panicked")
        })
    }));

    assert!(res.is_err());
    mem.check_leaks().unwrap();
}

// === Allocator === //

#[test]
fn realloc_moves_contents() {
    let mut mem = SimMemory::new();

    let old = mem.alloc(1, 4).unwrap();
    mem.bytes_mut(old.addr(), 4).unwrap().copy_from_slice(b"abcd");

    let grown = mem.realloc(old, 4, 1, 8).unwrap();
    assert_eq!(mem.bytes(grown.addr(), 4).unwrap(), b"abcd");
    assert_eq!(mem.live_count(), 1);

    let shrunk = mem.realloc(grown, 8, 1, 2).unwrap();
    assert_eq!(mem.bytes(shrunk.addr(), 2).unwrap(), b"ab");

    assert_eq!(mem.realloc(shrunk, 2, 1, 0).unwrap(), FfiPtr::new(1));
    mem.check_leaks().unwrap();
}

#[test]
fn alloc_respects_alignment() {
    let mut mem = SimMemory::new();

    mem.alloc(1, 3).unwrap();
    let ptr = mem.alloc(8, 8).unwrap();

    assert!(ptr.is_aligned_to(8));
    assert!(!ptr.is_null());
}

#[test]
fn alloc_fails_past_limit() {
    let mut mem = SimMemory::with_limit(64);

    let err = mem.alloc(1, 128).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SimFault>(),
        Some(SimFault::Exhausted { size: 128, .. })
    ));
}

#[test]
fn reads_are_bounds_checked() {
    let mut mem = SimMemory::new();
    let ptr = mem.alloc(1, 4).unwrap();

    assert!(mem.bytes(ptr.addr(), 1 << 20).is_err());
    assert!(mem.bytes(u32::MAX, 1).is_err());

    mem.free(ptr, 4, 1).unwrap();
}

#[test]
fn arrays_of_any_length() {
    let mut mem = SimMemory::new();
    let ptr = mem.alloc(4, 12).unwrap();

    *mem.write_array::<u32, 3>(ptr.addr()).unwrap() = [7, 8, 9];
    assert_eq!(mem.read_array::<u32, 3>(ptr.addr()).unwrap(), &[7, 8, 9]);
    assert_eq!(mem.read_array::<u8, 1>(ptr.addr()).unwrap(), &[7]);

    // Misaligned views are refused rather than faulting.
    assert!(mem.read_array::<u32, 2>(ptr.addr() + 1).is_err());

    mem.free(ptr, 12, 4).unwrap();
}

// === Return Area === //

#[test]
fn return_area_is_poisoned_before_call() {
    let mut mem = SimMemory::new();
    let layout = UnitResult::LAYOUT.union(SliceResult::LAYOUT);
    let mut area = ReturnArea::new(scratch(&mut mem, layout), layout).unwrap();

    let res = area
        .call::<_, UnitResult>(&mut mem, |mem, ret| {
            Ok::<(), Code>(()).store(mem, ret.cast())
        })
        .unwrap();
    assert_eq!(res, Ok(()));

    // A callee which writes nothing must not see the previous call's tag.
    let err = area
        .call::<_, UnitResult>(&mut mem, |_, _| Ok(()))
        .unwrap_err();

    assert_eq!(
        violation(&err),
        Some(&ProtocolViolation::MalformedTag {
            ty: "result",
            tag: RETURN_AREA_POISON
        }),
    );
}

#[test]
fn return_area_rejects_oversized_results() {
    let mut mem = SimMemory::new();
    let mut area = ReturnArea::new(scratch(&mut mem, UnitResult::LAYOUT), UnitResult::LAYOUT)
        .unwrap();

    let err = area
        .call::<_, SliceResult>(&mut mem, |_, _| unreachable!())
        .unwrap_err();

    assert!(matches!(
        violation(&err),
        Some(ProtocolViolation::ReturnAreaTooSmall { .. })
    ));
}

#[test]
fn return_area_must_be_aligned() {
    assert!(ReturnArea::new(FfiPtr::new(0x41), SliceResult::LAYOUT).is_err());
    assert!(ReturnArea::new(FfiPtr::null(), UnitResult::LAYOUT).is_err());
    assert!(ReturnArea::new(FfiPtr::new(0x41), UnitResult::LAYOUT).is_ok());
}

#[test]
fn return_area_storage_starts_unclaimed() {
    static STORAGE: ReturnAreaStorage<12> = ReturnAreaStorage::new();

    assert!(!STORAGE.is_claimed());
    assert_eq!(std::mem::align_of::<ReturnAreaStorage<12>>(), 8);
}

// === Ports === //

#[test]
fn ports_compare_by_name() {
    struct NoArgs;

    impl FlatArgs for NoArgs {
        const WORDS: usize = 1;

        type Words = [u32; 1];

        fn flatten(&self, ret: FfiPtr<()>) -> Self::Words {
            [ret.addr()]
        }

        fn unflatten([ret]: Self::Words) -> anyhow::Result<(Self, FfiPtr<()>)> {
            Ok((NoArgs, FfiPtr::new(ret)))
        }
    }

    const A: Port<NoArgs, UnitResult> = Port::new("mod", "a");
    const B: Port<NoArgs, UnitResult> = Port::new("mod", "b");

    assert!(A.is_compatible(Port::new("mod", "a")));
    assert!(!A.is_compatible(B));
    assert_eq!(A.word_count(), 1);
    assert_eq!(A.result_layout(), AbiLayout::new(2, 1));

    assert!(NoArgs::words_from_slice(&[1, 2]).is_err());
    assert_eq!(NoArgs::words_from_slice(&[8]).unwrap(), [8]);
}
