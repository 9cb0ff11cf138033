cfgenius::define! {
    is_wasm = cfg(target_arch = "wasm32");
}

cfgenius::cond! {
    if macro(is_wasm) {
        use std::cell::RefCell;

        use cachelink::{
            BorrowedBuf, FlatWords, LocalMemory, Port, ReturnArea, ReturnAreaStorage,
        };
        use wasi_cache_abi::{self as abi, CacheError, KeyArgs, SetArgs};

        use crate::{CacheClient, CacheImports};

        // === Imports === //

        mod raw {
            #[link(wasm_import_module = "wasi-cache")]
            unsafe extern "C" {
                #[link_name = "set"]
                pub fn cache_set(
                    key_ptr: u32,
                    key_len: u32,
                    value_ptr: u32,
                    value_len: u32,
                    ttl_present: u32,
                    ttl_value: u32,
                    ret: u32,
                );

                #[link_name = "get"]
                pub fn cache_get(key_ptr: u32, key_len: u32, ret: u32);

                #[link_name = "delete"]
                pub fn cache_delete(key_ptr: u32, key_len: u32, ret: u32);
            }
        }

        const _: () = {
            abi::CACHE_SET.assert_compatible(Port::new("wasi-cache", "set"));
            abi::CACHE_GET.assert_compatible(Port::new("wasi-cache", "get"));
            abi::CACHE_DELETE.assert_compatible(Port::new("wasi-cache", "delete"));
        };

        /// The entry points the embedder links under `wasi-cache`.
        #[derive(Debug, Default)]
        pub struct LinkedImports;

        impl CacheImports<LocalMemory> for LinkedImports {
            fn set(&mut self, _cx: &mut LocalMemory, words: FlatWords<SetArgs>) -> anyhow::Result<()> {
                let [key_ptr, key_len, value_ptr, value_len, ttl_present, ttl_value, ret] = words;

                unsafe {
                    raw::cache_set(key_ptr, key_len, value_ptr, value_len, ttl_present, ttl_value, ret)
                };

                Ok(())
            }

            fn get(&mut self, _cx: &mut LocalMemory, words: FlatWords<KeyArgs>) -> anyhow::Result<()> {
                let [key_ptr, key_len, ret] = words;

                unsafe { raw::cache_get(key_ptr, key_len, ret) };

                Ok(())
            }

            fn delete(&mut self, _cx: &mut LocalMemory, words: FlatWords<KeyArgs>) -> anyhow::Result<()> {
                let [key_ptr, key_len, ret] = words;

                unsafe { raw::cache_delete(key_ptr, key_len, ret) };

                Ok(())
            }
        }

        // === Module Client === //

        pub type LinkedClient = CacheClient<LocalMemory, LinkedImports>;

        static RETURN_AREA: ReturnAreaStorage<{ abi::RETURN_AREA_SIZE }> = ReturnAreaStorage::new();

        thread_local! {
            static CLIENT: RefCell<Option<LinkedClient>> = const { RefCell::new(None) };
        }

        /// Runs `f` with this module's client, creating it on first use.
        ///
        /// Calls cannot nest: the return area is shared by the whole module, so a reentrant call
        /// panics.
        pub fn with_client<R>(f: impl FnOnce(&mut LinkedClient) -> anyhow::Result<R>) -> anyhow::Result<R> {
            CLIENT.with_borrow_mut(|client| {
                if client.is_none() {
                    let ret_area = ReturnArea::from_static(&RETURN_AREA, abi::RETURN_AREA)?;

                    *client = Some(CacheClient::new(LocalMemory, LinkedImports, ret_area)?);
                }

                let Some(client) = client else {
                    unreachable!();
                };

                f(client)
            })
        }

        pub fn set(key: &str, value: &[u8], ttl: Option<u32>) -> anyhow::Result<Result<(), CacheError>> {
            with_client(|client| {
                client.set(BorrowedBuf::new_guest(key), BorrowedBuf::new_guest(value), ttl)
            })
        }

        pub fn get(key: &str) -> anyhow::Result<Result<Vec<u8>, CacheError>> {
            with_client(|client| match client.get(BorrowedBuf::new_guest(key))? {
                Ok(payload) => {
                    let bytes = payload.read(client.memory()).map(<[u8]>::to_vec);
                    payload.release(client.memory_mut())?;

                    Ok(Ok(bytes?))
                }
                Err(err) => Ok(Err(err)),
            })
        }

        pub fn delete(key: &str) -> anyhow::Result<Result<(), CacheError>> {
            with_client(|client| client.delete(BorrowedBuf::new_guest(key)))
        }
    }
}
