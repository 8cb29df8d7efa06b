//! Client gateway: line-delimited JSON stanzas over TCP.
//!
//! The wire protocol is deliberately thin. The first line of a connection
//! is the full address the client binds as (`user@domain/resource`); the
//! server answers `bound <address>` and every following line in either
//! direction is one JSON-encoded stanza. Transport concerns beyond this
//! framing (TLS, SASL, XML) belong to a fronting layer, not the presence
//! core.

use futures_util::{SinkExt, StreamExt};
use perch_proto::{Address, Stanza};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn, Instrument};

use crate::error::HandlerError;
use crate::handlers::{bounce_for, Context, Registry};
use crate::presence::PresenceRouter;
use crate::state::Aviary;
use crate::telemetry::spans;

const MAX_LINE_LEN: usize = 65536;

pub struct Gateway {
    state: Arc<Aviary>,
    router: Arc<PresenceRouter>,
    registry: Arc<Registry>,
}

impl Gateway {
    pub fn new(state: Arc<Aviary>) -> Self {
        Self {
            router: Arc::new(PresenceRouter::new(state.clone())),
            registry: Arc::new(Registry::new()),
            state,
        }
    }

    /// Bind the configured listen address and serve it.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.state.config.server.listen).await?;
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener. Runs until the
    /// listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "client gateway listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(err) = gateway.handle_connection(socket).await {
                    debug!(%peer, %err, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> anyhow::Result<()> {
        let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

        // Bind handshake: first line is the full session address.
        let Some(line) = framed.next().await else {
            return Ok(());
        };
        let line = line?;
        let address = match self.validate_bind(line.trim()) {
            Ok(address) => address,
            Err(reason) => {
                framed.send(format!("bind-error {reason}")).await?;
                return Ok(());
            }
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = match self.state.sessions.register(address.clone(), tx) {
            Ok(session) => session,
            Err(err) => {
                framed.send(format!("bind-error {err}")).await?;
                return Ok(());
            }
        };
        framed.send(format!("bound {address}")).await?;

        let span = spans::session(&address.to_string());
        let (mut sink, mut stream) = framed.split();

        // Writer task: drains the session channel onto the socket.
        let writer = tokio::spawn(
            async move {
                while let Some(stanza) = rx.recv().await {
                    let line = match serde_json::to_string(&stanza) {
                        Ok(line) => line,
                        Err(err) => {
                            warn!(%err, "stanza not serializable");
                            continue;
                        }
                    };
                    if sink.send(line).await.is_err() {
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        // Read loop.
        let result: anyhow::Result<()> = async {
            while let Some(line) = stream.next().await {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let stanza: Stanza = match serde_json::from_str(&line) {
                    Ok(stanza) => stanza,
                    Err(err) => {
                        debug!(%err, "undecodable stanza line dropped");
                        continue;
                    }
                };

                let mut ctx = Context {
                    session: &session,
                    state: &self.state,
                    router: &self.router,
                };
                if let Err(err) = self.registry.dispatch(&mut ctx, &stanza).await {
                    match &err {
                        // The session channel is gone; nothing more to say.
                        HandlerError::Send(_) => break,
                        _ => {
                            debug!(%err, "stanza rejected");
                            if let Some(bounce) = bounce_for(&stanza, &err) {
                                if session.deliver(bounce).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        .instrument(span.clone())
        .await;

        if let Err(err) = self.router.handle_disconnect(&session).instrument(span).await {
            warn!(%err, "disconnect cleanup incomplete");
        }
        writer.abort();
        result
    }

    fn validate_bind(&self, line: &str) -> Result<Address, String> {
        let address: Address = line
            .parse()
            .map_err(|e: perch_proto::AddressError| e.to_string())?;
        if address.resource().is_none() {
            return Err("session address must carry a resource".into());
        }
        if !self.state.accounts.is_local_account(&address) {
            return Err(format!("unknown account: {}", address.to_bare()));
        }
        Ok(address)
    }
}
