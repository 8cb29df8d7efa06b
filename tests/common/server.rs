//! In-process test server.
//!
//! Spins up a `Gateway` accept loop on an ephemeral port with in-memory
//! collaborators, and hands tests direct access to the shared state and
//! the remote routing sink so they can assert on nonlocal traffic.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use perchd::accounts::StaticDirectory;
use perchd::cache::MemoryCache;
use perchd::cluster::LocalBus;
use perchd::config::Config;
use perchd::network::Gateway;
use perchd::offline::MemoryOfflineStore;
use perchd::roster::{RecvState, RosterItem, SubState};
use perchd::state::Aviary;
use perch_proto::Stanza;

use super::client::TestClient;

pub const TEST_DOMAIN: &str = "example.org";

pub struct TestServer {
    addr: SocketAddr,
    pub state: Arc<Aviary>,
    /// Stanzas routed off-node land here.
    pub remote_rx: mpsc::UnboundedReceiver<Stanza>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    /// Start a server for the given local account names on an ephemeral port.
    pub async fn spawn(accounts: &[&str]) -> Self {
        let config: Config = toml::from_str(&format!(
            r#"
            [server]
            domain = "{TEST_DOMAIN}"
            listen = "127.0.0.1:0"
            "#
        ))
        .expect("test config parses");

        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let directory = StaticDirectory::new(
            TEST_DOMAIN,
            accounts.iter().map(|a| a.to_string()).collect(),
        );
        let state = Aviary::new(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(directory),
            Arc::new(MemoryOfflineStore::new()),
            Arc::new(LocalBus::new()),
            remote_tx,
        );

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral listener");
        let addr = listener.local_addr().expect("listener addr");

        let gateway = Arc::new(Gateway::new(state.clone()));
        let accept_task = tokio::spawn(async move {
            let _ = gateway.serve(listener).await;
        });

        Self {
            addr,
            state,
            remote_rx,
            accept_task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connect and bind a session for `address` (a full address string).
    pub async fn connect(&self, address: &str) -> TestClient {
        TestClient::connect(self.addr, address).await
    }

    /// Plant a roster item directly, bypassing the negotiation flow.
    /// Lets tests start from an established subscription state.
    pub async fn seed_item(&self, owner: &str, contact: &str, sub: SubState, recv: RecvState) {
        let owner = owner.parse().expect("owner parses");
        let roster = self
            .state
            .rosters
            .roster(&owner)
            .await
            .expect("load roster");
        {
            let mut guard = roster.write();
            let mut item = RosterItem::new(contact.parse().expect("contact parses"));
            item.sub = sub;
            item.recv = recv;
            guard.create(item).expect("seed item");
        }
        self.state.rosters.save(&roster).await.expect("save roster");
    }

    /// Pop the next stanza routed toward a remote domain, if any arrives
    /// within the default timeout.
    pub async fn recv_remote(&mut self) -> Option<Stanza> {
        tokio::time::timeout(super::client::RECV_TIMEOUT, self.remote_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
