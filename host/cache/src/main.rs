use std::{env, fs, process::ExitCode};

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use wasi_cache_host::{CacheState, HostConfig, run_module};

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Parse config
    let mut config = HostConfig::from_env()?;

    let args = env::args().collect::<Vec<String>>();
    let args = args.iter().map(|v| v.as_str()).collect::<Vec<_>>();

    let mod_path = match *args.as_slice() {
        [_bin_name, mod_path] => mod_path,
        [_bin_name, mod_path, export] => {
            config.export = export.to_string();
            mod_path
        }
        _ => anyhow::bail!("usage: wasi-cache-host <module.wasm> [export]"),
    };

    // Run module
    let wasm = fs::read(mod_path).with_context(|| format!("failed to read {mod_path:?}"))?;
    let export = config.export.clone();

    let (res, _state) = run_module(&wasm, &export, CacheState::in_memory(config))?;

    match res {
        Ok(()) => {
            tracing::info!("{export:?} succeeded");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{export:?} failed with {err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}
