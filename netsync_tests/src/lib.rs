//! Helpers for the integration tests: an in-process session of one server
//! runtime and any number of client runtimes wired through a `MemoryHub`.

use std::collections::BTreeMap;

use netsync_shared::{
    identity::Identity,
    relevance::ObserverTable,
    runtime::{ClientRuntime, Runtime, ServerRuntime},
    transport::{MemoryHub, MemoryTransport},
};

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub struct Session {
    pub hub: MemoryHub,
    pub server: ServerRuntime<MemoryTransport, ObserverTable>,
    pub clients: BTreeMap<Identity, ClientRuntime<MemoryTransport>>,
    pub now_ms: u64,
    pub step_ms: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        init_tracing();
        let hub = MemoryHub::new();
        let server = Runtime::server(hub.endpoint(Identity::SERVER), ObserverTable::new());
        Self {
            hub,
            server,
            clients: BTreeMap::new(),
            now_ms: 0,
            step_ms: 50,
        }
    }

    /// Adds a client runtime without connecting it.
    pub fn add_client(&mut self, id: Identity) -> &mut ClientRuntime<MemoryTransport> {
        let client = Runtime::client(self.hub.endpoint(id));
        self.clients.entry(id).or_insert(client)
    }

    pub fn connect(&self, id: Identity) {
        self.hub.connect(Identity::SERVER, id);
    }

    pub fn disconnect(&self, id: Identity) {
        self.hub.disconnect(Identity::SERVER, id);
    }

    /// Adds, connects and settles a client.
    pub fn join(&mut self, id: Identity) {
        self.add_client(id);
        self.connect(id);
        self.tick();
    }

    pub fn client(&self, id: Identity) -> &ClientRuntime<MemoryTransport> {
        &self.clients[&id]
    }

    pub fn client_mut(&mut self, id: Identity) -> &mut ClientRuntime<MemoryTransport> {
        self.clients
            .get_mut(&id)
            .unwrap_or_else(|| panic!("no client {id}"))
    }

    pub fn tick_server(&mut self) {
        self.hub.set_time(self.now_ms as u32);
        self.server.update(self.now_ms);
    }

    pub fn tick_clients(&mut self) {
        self.hub.set_time(self.now_ms as u32);
        for client in self.clients.values_mut() {
            client.update(self.now_ms);
        }
    }

    /// Server then clients, then advance the clock.
    pub fn tick(&mut self) {
        self.tick_server();
        self.tick_clients();
        self.now_ms += self.step_ms;
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }
}
