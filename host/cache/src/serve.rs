use std::{fmt, time::Duration};

use cachelink::{
    BufKind, FfiPtr, FfiSlice, FlatArgs, FlatWords, GuestAlloc, GuestMemory, Marshal, OwnedBuf,
};
use wasi_cache_abi::{CacheError, KeyArgs, PayloadResult, SetArgs, UnitResult};

use crate::{CacheBackend, HostConfig, MemoryBackend};

// === CacheState === //

/// The host side of the capability: a backend plus the limits requests are checked against.
pub struct CacheState {
    backend: Box<dyn CacheBackend>,
    config: HostConfig,
}

impl fmt::Debug for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheState {
    pub fn new(backend: impl 'static + CacheBackend, config: HostConfig) -> Self {
        Self {
            backend: Box::new(backend),
            config,
        }
    }

    pub fn in_memory(config: HostConfig) -> Self {
        Self::new(MemoryBackend::new(), config)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn set(&mut self, key: &str, value: Vec<u8>, ttl: Option<u32>) -> Result<(), CacheError> {
        self.check_key(key)?;

        if value.len() > self.config.max_value_len as usize {
            tracing::warn!(
                "rejecting value of {} byte(s) for {key:?}: limit is {}",
                value.len(),
                self.config.max_value_len,
            );
            return Err(CacheError::Error);
        }

        let ttl = ttl.map(|secs| Duration::from_secs(secs.into()));

        self.backend.set(key, value, ttl)
    }

    pub fn get(&mut self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.check_key(key)?;
        self.backend.get(key)
    }

    pub fn delete(&mut self, key: &str) -> Result<(), CacheError> {
        self.check_key(key)?;
        self.backend.delete(key)
    }

    fn check_key(&self, key: &str) -> Result<(), CacheError> {
        if key.len() > self.config.max_key_len as usize {
            tracing::warn!(
                "rejecting key of {} byte(s): limit is {}",
                key.len(),
                self.config.max_key_len,
            );
            return Err(CacheError::Error);
        }

        Ok(())
    }
}

// === CacheHost === //

/// A guest's memory and allocator paired with the cache serving it.
pub trait CacheHost: GuestAlloc {
    fn cache(&mut self) -> &mut CacheState;
}

/// A [`CacheHost`] over a memory which is directly accessible, such as a simulated one.
#[derive(Debug)]
pub struct LocalHost<'a, M: ?Sized> {
    memory: &'a mut M,
    state: &'a mut CacheState,
}

impl<'a, M: ?Sized + GuestAlloc> LocalHost<'a, M> {
    pub fn new(memory: &'a mut M, state: &'a mut CacheState) -> Self {
        Self { memory, state }
    }
}

impl<M: ?Sized + GuestAlloc> GuestMemory for LocalHost<'_, M> {
    fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]> {
        self.memory.bytes(base, len)
    }

    fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]> {
        self.memory.bytes_mut(base, len)
    }
}

impl<M: ?Sized + GuestAlloc> GuestAlloc for LocalHost<'_, M> {
    fn realloc(
        &mut self,
        old: FfiPtr<()>,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> anyhow::Result<FfiPtr<()>> {
        self.memory.realloc(old, old_size, align, new_size)
    }

    fn free(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> anyhow::Result<()> {
        self.memory.free(ptr, size, align)
    }
}

impl<M: ?Sized + GuestAlloc> CacheHost for LocalHost<'_, M> {
    fn cache(&mut self) -> &mut CacheState {
        self.state
    }
}

// === Serving === //

// Argument buffers belong to the guest and are only ever read.
fn lift_key(host: &(impl ?Sized + CacheHost), key: FfiSlice<u8>) -> anyhow::Result<String> {
    Ok(<str as BufKind>::view(key.read(host)?)?.to_string())
}

pub fn serve_set(
    host: &mut (impl ?Sized + CacheHost),
    words: FlatWords<SetArgs>,
) -> anyhow::Result<()> {
    let (args, ret) = SetArgs::unflatten(words)?;

    let key = lift_key(host, args.key)?;
    let value = args.value.read(host)?.to_vec();

    tracing::debug!("set {key:?} ({} byte(s), ttl: {:?})", value.len(), args.ttl);

    let res: UnitResult = host.cache().set(&key, value, args.ttl);

    res.store(host, ret.cast())
}

pub fn serve_get(
    host: &mut (impl ?Sized + CacheHost),
    words: FlatWords<KeyArgs>,
) -> anyhow::Result<()> {
    let (args, ret) = KeyArgs::unflatten(words)?;

    let key = lift_key(host, args.key)?;

    tracing::debug!("get {key:?}");

    // Ownership of the payload passes to the guest, which releases it.
    let res: PayloadResult = match host.cache().get(&key) {
        Ok(value) => Ok(OwnedBuf::<[u8]>::duplicate(host, &value)?.into_raw()),
        Err(err) => Err(err),
    };

    res.store(host, ret.cast())
}

pub fn serve_delete(
    host: &mut (impl ?Sized + CacheHost),
    words: FlatWords<KeyArgs>,
) -> anyhow::Result<()> {
    let (args, ret) = KeyArgs::unflatten(words)?;

    let key = lift_key(host, args.key)?;

    tracing::debug!("delete {key:?}");

    let res: UnitResult = host.cache().delete(&key);

    res.store(host, ret.cast())
}
