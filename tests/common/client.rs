//! Line-protocol test client.
//!
//! Speaks the newline-delimited JSON stanza framing: one bind line, a
//! `bound` acknowledgement, then stanzas in both directions. Helpers panic
//! on protocol surprises so test failures point at the assertion site.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use perch_proto::{
    Address, Presence, PresenceKind, RosterItemPayload, RosterQuery, RosterQueryKind, Stanza,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding that no stanza is coming.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(300);

pub struct TestClient {
    pub address: Address,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect to the server and bind `address` (e.g. "alice@example.org/home").
    pub async fn connect(server: SocketAddr, address: &str) -> Self {
        let stream = TcpStream::connect(server).await.expect("connect");
        let (read, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read);

        writer
            .write_all(format!("{address}\n").as_bytes())
            .await
            .expect("send bind line");
        writer.flush().await.expect("flush bind line");

        let mut line = String::new();
        timeout(RECV_TIMEOUT, reader.read_line(&mut line))
            .await
            .expect("bind ack timed out")
            .expect("read bind ack");
        let line = line.trim();
        assert!(
            line.starts_with("bound "),
            "bind for {address} failed: {line}"
        );

        Self {
            address: address.parse().expect("test address parses"),
            reader,
            writer,
        }
    }

    // ==================================================================
    // Sending
    // ==================================================================

    pub async fn send(&mut self, stanza: &Stanza) {
        let mut line = serde_json::to_string(stanza).expect("stanza serializes");
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("send stanza");
        self.writer.flush().await.expect("flush stanza");
    }

    pub async fn send_available(&mut self) {
        self.send(&Stanza::Presence(Presence::available())).await;
    }

    /// Broadcast availability carrying status text.
    pub async fn send_available_with_status(&mut self, status: &str) {
        let p = Presence {
            status: Some(status.into()),
            ..Presence::available()
        };
        self.send(&Stanza::Presence(p)).await;
    }

    pub async fn send_unavailable(&mut self) {
        self.send(&Stanza::Presence(Presence::unavailable())).await;
    }

    /// Directed presence to a specific recipient.
    pub async fn send_presence_to(&mut self, kind: PresenceKind, to: &str) {
        let p = Presence {
            kind,
            ..Presence::available()
        }
        .with_to(to.parse().expect("recipient parses"));
        self.send(&Stanza::Presence(p)).await;
    }

    /// Subscription-negotiation presence (subscribe, subscribed, ...).
    pub async fn send_subscription(&mut self, kind: PresenceKind, to: &str) {
        let p = Presence::subscription(
            kind,
            self.address.clone(),
            to.parse().expect("recipient parses"),
        );
        self.send(&Stanza::Presence(p)).await;
    }

    pub async fn send_probe(&mut self, to: &str) {
        let p = Presence::probe(self.address.clone(), to.parse().expect("recipient parses"));
        self.send(&Stanza::Presence(p)).await;
    }

    pub async fn roster_get(&mut self, id: &str, version: Option<&str>) {
        self.send(&Stanza::Roster(RosterQuery {
            id: id.into(),
            from: None,
            to: None,
            kind: RosterQueryKind::Get,
            items: Vec::new(),
            version: version.map(str::to_string),
            error: None,
        }))
        .await;
    }

    pub async fn roster_set(&mut self, id: &str, items: Vec<RosterItemPayload>) {
        self.send(&Stanza::Roster(RosterQuery {
            id: id.into(),
            from: None,
            to: None,
            kind: RosterQueryKind::Set,
            items,
            version: None,
            error: None,
        }))
        .await;
    }

    pub async fn roster_remove(&mut self, id: &str, contact: &str) {
        let item = RosterItemPayload::remove(contact.parse().expect("contact parses"));
        self.roster_set(id, vec![item]).await;
    }

    pub async fn send_message(&mut self, to: &str, body: &str) {
        self.send(&Stanza::Message {
            from: self.address.clone(),
            to: to.parse().expect("recipient parses"),
            body: body.into(),
            delay: None,
        })
        .await;
    }

    // ==================================================================
    // Receiving
    // ==================================================================

    /// Receive the next stanza, panicking after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Stanza {
        self.try_recv(RECV_TIMEOUT)
            .await
            .unwrap_or_else(|| panic!("{}: no stanza within {RECV_TIMEOUT:?}", self.address))
    }

    /// Receive the next stanza if one arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Stanza> {
        let mut line = String::new();
        let n = timeout(wait, self.reader.read_line(&mut line)).await.ok()?;
        let n = n.expect("read stanza line");
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(line.trim()).unwrap_or_else(|e| {
            panic!("{}: undecodable stanza {line:?}: {e}", self.address)
        }))
    }

    /// Keep receiving until `pred` matches, returning the matching stanza.
    /// Earlier non-matching stanzas are discarded.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> Stanza
    where
        F: FnMut(&Stanza) -> bool,
    {
        loop {
            let stanza = self.recv().await;
            if pred(&stanza) {
                return stanza;
            }
        }
    }

    /// Discard stanzas until a presence of `kind` arrives; return it.
    pub async fn recv_presence(&mut self, kind: PresenceKind) -> Presence {
        let stanza = self
            .recv_until(|s| matches!(s, Stanza::Presence(p) if p.kind == kind))
            .await;
        match stanza {
            Stanza::Presence(p) => p,
            _ => unreachable!(),
        }
    }

    /// Discard stanzas until a roster query of `kind` arrives; return it.
    pub async fn recv_roster(&mut self, kind: RosterQueryKind) -> RosterQuery {
        let stanza = self
            .recv_until(|s| matches!(s, Stanza::Roster(r) if r.kind == kind))
            .await;
        match stanza {
            Stanza::Roster(r) => r,
            _ => unreachable!(),
        }
    }

    /// Assert that nothing arrives within the silence window.
    pub async fn expect_silence(&mut self) {
        if let Some(stanza) = self.try_recv(SILENCE_WINDOW).await {
            panic!("{}: expected silence, got {stanza:?}", self.address);
        }
    }
}
