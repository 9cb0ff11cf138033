use anyhow::Context;
use cachelink::{FfiPtr, Marshal};
use cachelink_wasmtime::{LinkState, LinkStoreExt};
use wasi_cache_abi::TestResult;

use crate::{CacheState, add_to_linker};

fn cache_state(state: &mut CacheState) -> &mut CacheState {
    state
}

/// Instantiates a test module against `state`, calls its `export` and decodes the
/// `result<_, test-error>` it points at.
///
/// The outer error reports a module which could not be run. The inner one is the module's own
/// verdict.
///
/// The result is read with the canonical byte layout, where the error sits at offset `1`. A
/// module built against the older word-slot layout stores its error as an `i32` at offset `8`;
/// such a failure still decodes as `Err` but reports [`TestError::Success`] as its code.
///
/// [`TestError::Success`]: wasi_cache_abi::TestError::Success
pub fn run_module(
    wasm: &[u8],
    export: &str,
    state: CacheState,
) -> anyhow::Result<(TestResult, CacheState)> {
    let engine = wasmtime::Engine::default();
    let module = wasmtime::Module::new(&engine, wasm).context("failed to compile module")?;

    let mut linker = wasmtime::Linker::new(&engine);
    add_to_linker(&mut linker, cache_state)?;

    let mut store = wasmtime::Store::new(&engine, LinkState::new(state));
    let instance = linker
        .instantiate(&mut store, &module)
        .context("failed to instantiate module")?;

    store.setup_exports(instance)?;

    let func = instance
        .get_typed_func::<(), u32>(&mut store, export)
        .with_context(|| format!("failed to find test export {export:?}"))?;

    tracing::info!("calling {export:?}");

    let ret = func
        .call(&mut store, ())
        .with_context(|| format!("{export:?} trapped"))?;

    let res = TestResult::load(&store.root(), FfiPtr::new(ret))
        .with_context(|| format!("{export:?} returned a malformed result"))?;

    Ok((res, store.into_data().into_data()))
}
