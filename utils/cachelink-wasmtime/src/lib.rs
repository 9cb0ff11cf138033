use std::iter;

use anyhow::Context;
use cachelink::{
    BUILTIN_FREE, BUILTIN_MEMORY, BUILTIN_REALLOC, FfiPtr, FlatArgs, GuestAlloc, GuestMemory,
    Marshal, Port,
};

// === LinkState === //

/// Store data for instances linked against a `cachelink` interface.
///
/// The guest's memory and allocator exports are only known after instantiation and must be
/// registered with [`LinkStoreExt::setup_exports`] before the guest is entered.
pub struct LinkState<T> {
    exports: Option<LinkExports>,
    data: T,
}

#[derive(Clone)]
struct LinkExports {
    memory: wasmtime::Memory,
    realloc: wasmtime::TypedFunc<(u32, u32, u32, u32), u32>,
    free: wasmtime::TypedFunc<(u32, u32, u32), ()>,
}

impl<T> LinkState<T> {
    pub fn new(data: T) -> Self {
        Self {
            exports: None,
            data,
        }
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

pub trait LinkStoreExt<T: 'static> {
    fn setup_exports(&mut self, instance: wasmtime::Instance) -> anyhow::Result<()>;

    fn root(&mut self) -> LinkContext<'_, T>;
}

impl<T: 'static> LinkStoreExt<T> for wasmtime::Store<LinkState<T>> {
    fn setup_exports(&mut self, instance: wasmtime::Instance) -> anyhow::Result<()> {
        let exports = LinkExports {
            memory: instance
                .get_memory(&mut *self, BUILTIN_MEMORY)
                .context("failed to find guest memory export")?,
            realloc: instance
                .get_typed_func(&mut *self, BUILTIN_REALLOC)
                .with_context(|| format!("failed to find {BUILTIN_REALLOC}"))?,
            free: instance
                .get_typed_func(&mut *self, BUILTIN_FREE)
                .with_context(|| format!("failed to find {BUILTIN_FREE}"))?,
        };

        self.data_mut().exports = Some(exports);

        Ok(())
    }

    fn root(&mut self) -> LinkContext<'_, T> {
        LinkContext(LinkContextInner::Root(self))
    }
}

// === LinkContext === //

/// A view of a linked guest, either from outside of it or from inside a host call.
pub struct LinkContext<'a, T: 'static>(LinkContextInner<'a, T>);

enum LinkContextInner<'a, T: 'static> {
    Root(&'a mut wasmtime::Store<LinkState<T>>),
    Call(wasmtime::Caller<'a, LinkState<T>>),
}

impl<T: 'static> LinkContext<'_, T> {
    pub fn data_mut(&mut self) -> &mut T {
        match &mut self.0 {
            LinkContextInner::Root(store) => store.data_mut().data_mut(),
            LinkContextInner::Call(caller) => caller.data_mut().data_mut(),
        }
    }

    fn cx(&self) -> wasmtime::StoreContext<'_, LinkState<T>> {
        match &self.0 {
            LinkContextInner::Root(store) => (&**store).into(),
            LinkContextInner::Call(caller) => caller.into(),
        }
    }

    fn cx_mut(&mut self) -> wasmtime::StoreContextMut<'_, LinkState<T>> {
        match &mut self.0 {
            LinkContextInner::Root(store) => (&mut **store).into(),
            LinkContextInner::Call(caller) => caller.into(),
        }
    }

    fn exports(&self) -> anyhow::Result<&LinkExports> {
        self.cx()
            .data()
            .exports
            .as_ref()
            .context("exports never initialized with `LinkStoreExt::setup_exports`")
    }
}

impl<T: 'static> GuestMemory for LinkContext<'_, T> {
    fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]> {
        self.exports()?.memory.data(self.cx()).bytes(base, len)
    }

    fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]> {
        let memory = self.exports()?.memory;

        memory.data_mut(self.cx_mut()).bytes_mut(base, len)
    }
}

impl<T: 'static> GuestAlloc for LinkContext<'_, T> {
    fn realloc(
        &mut self,
        old: FfiPtr<()>,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> anyhow::Result<FfiPtr<()>> {
        let realloc = self.exports()?.realloc.clone();

        let ptr = realloc
            .call(self.cx_mut(), (old.addr(), old_size, align, new_size))
            .with_context(|| format!("failed to allocate {new_size} byte(s) on guest"))?;

        if ptr == 0 {
            anyhow::bail!("guest allocator returned a null pointer");
        }

        Ok(FfiPtr::new(ptr))
    }

    fn free(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> anyhow::Result<()> {
        let free = self.exports()?.free.clone();

        free.call(self.cx_mut(), (ptr.addr(), size, align))
            .with_context(|| format!("failed to free {ptr:?} on guest"))
    }
}

// === Function Definitions === //

/// Defines `port` in `linker` as a function taking `I::WORDS` 32-bit integers and returning
/// nothing. The last word is the address the result must be written to.
pub fn define<T, I, O, F>(
    linker: &mut wasmtime::Linker<LinkState<T>>,
    port: Port<I, O>,
    func: F,
) -> anyhow::Result<()>
where
    T: 'static,
    I: 'static + FlatArgs,
    O: 'static + Marshal,
    F: 'static + Send + Sync + Fn(&mut LinkContext<'_, T>, I::Words) -> anyhow::Result<()>,
{
    let ty = wasmtime::FuncType::new(
        linker.engine(),
        iter::repeat_n(wasmtime::ValType::I32, I::WORDS),
        iter::empty(),
    );

    let module = port.module();
    let func_name = port.func_name();

    linker.func_new(
        module,
        func_name,
        ty,
        move |caller: wasmtime::Caller<'_, LinkState<T>>,
              params: &[wasmtime::Val],
              _results: &mut [wasmtime::Val]|
              -> anyhow::Result<()> {
            let words = params
                .iter()
                .map(|val| val.i32().map(|v| v as u32))
                .collect::<Option<Vec<u32>>>()
                .context("expected only i32 arguments")?;

            let words = I::words_from_slice(&words)?;

            tracing::trace!("host call `{module}.{func_name}` with {words:?}");

            func(&mut LinkContext(LinkContextInner::Call(caller)), words)
                .with_context(|| format!("host function `{module}.{func_name}` failed"))
        },
    )?;

    Ok(())
}
