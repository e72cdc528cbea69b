// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use lattica::chain::backend::{create_rocksdb_backend, KeyValueStore};
use lattica::chain::chain_config::ChainConfig;
use lattica::node;
use lattica::settings::SETTINGS;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt::init();

    let exit_code = match run() {
        Ok(()) => lattica::EXIT_OK,
        Err(err) => {
            error!("{err:#}");
            err.downcast_ref::<ExitCode>()
                .map_or(lattica::EXIT_STATE_DIVERGENCE, |code| code.0)
        }
    };

    std::process::exit(exit_code);
}

#[derive(Debug)]
struct ExitCode(i32);

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exiting with code {}", self.0)
    }
}

impl std::error::Error for ExitCode {}

fn run() -> anyhow::Result<()> {
    // Touching SETTINGS loads and validates the configuration; a
    // failure there exits with the configuration error code.
    let data_dir = match &SETTINGS.network.data_dir {
        Some(dir) => PathBuf::from(dir),
        None => {
            let mut dir = dirs::data_dir().ok_or(ExitCode(lattica::EXIT_CONFIG_ERROR))?;
            dir.push("Lattica");
            dir.push(&SETTINGS.network.name);
            dir
        }
    };

    info!(
        "starting lattica node on {} (groups: {}, broker {}/{})",
        SETTINGS.network.name,
        SETTINGS.consensus.groups,
        SETTINGS.broker.broker_id,
        SETTINGS.broker.broker_num,
    );

    let backend = create_rocksdb_backend(&data_dir).map_err(|err| {
        error!("storage initialization failed: {err}");
        ExitCode(lattica::EXIT_STORAGE_ERROR)
    })?;
    let store: Arc<dyn KeyValueStore> = Arc::new(backend);

    let config = ChainConfig::new(
        &SETTINGS.network.name,
        SETTINGS.network.network_id,
        SETTINGS.consensus.groups,
        SETTINGS.consensus.block_confirm_num,
    )
    .with_brokers(SETTINGS.broker.broker_num, SETTINGS.broker.broker_id);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (handle, task) = node::spawn(store, config).map_err(|err| {
            error!("node startup failed: {err:?}");
            ExitCode(lattica::EXIT_STORAGE_ERROR)
        })?;

        // The networking, REST, WebSocket and miner-api layers attach
        // to `handle` here; the core runs until a termination signal.
        let _ = &handle;

        tokio::signal::ctrl_c().await?;
        info!("termination signal received, shutting down");

        drop(handle);
        let _ = task.await;
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}
