//! Sync server binary, spec §4.I: accounts, devices, the append-only
//! change log, and the key-envelope endpoint.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use vault_server::db::ServerStore;
use vault_server::router::{self, AppState};
use vault_server::settings::ServerConfig;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ServerConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let store = match ServerStore::open(std::path::Path::new(&config.db_path)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let server = match tiny_http::Server::http(config.bind_addr.as_str()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, bind_addr = %config.bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(bind_addr = %config.bind_addr, workers = config.worker_threads, "vault-server listening");

    let server = Arc::new(server);
    let state = Arc::new(AppState { store });

    let mut handles = Vec::with_capacity(config.worker_threads);
    for worker_id in 0..config.worker_threads.max(1) {
        let server = server.clone();
        let state = state.clone();
        handles.push(std::thread::spawn(move || {
            tracing::debug!(worker_id, "worker thread started");
            loop {
                match server.recv() {
                    Ok(request) => router::handle(&state, request),
                    Err(e) => {
                        tracing::error!(error = %e, worker_id, "error receiving request");
                        break;
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }
}
