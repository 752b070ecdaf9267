use std::sync::Arc;

use loghub_client::{Client, ClientOptions, MemoryProtocolHandler, MemoryStore};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a JSON log subscriber once per test binary.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .json(),
        )
        .try_init();
}

pub fn memory_client(store: &MemoryStore) -> Client {
    let handler = Arc::new(MemoryProtocolHandler::with_store(store.clone()));
    Client::in_memory(handler, ClientOptions::default()).expect("client")
}
