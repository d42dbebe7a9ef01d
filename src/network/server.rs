//! WebSocket Game Server
//!
//! Accepts client connections, answers requests against the engine, and
//! fans the engine's round events out to every connected client so all
//! observers track the same authoritative clock.
//!
//! The server never advances a round itself; the clock task owns that.
//! Handlers here are short and non-blocking: settlement completes before
//! any reply is sent, and nothing money-moving waits on network I/O.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::game::bet::{AccountKind, UserId};
use crate::network::auth::{validate_token, AuthConfig};
use crate::network::protocol::{
    AuthRequest, AuthResult, BetInfo, ClientMessage, ErrorCode, RoundSnapshot, ServerError,
    ServerMessage,
};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Stable user identifier (after auth or guest assignment).
    user_id: Option<UserId>,
    /// Whether the user presented a valid provider JWT. Guests can play
    /// demo; real-balance operations require a JWT-backed identity.
    jwt_backed: bool,
    /// Last activity, for idle cleanup.
    last_activity: Instant,
    /// Message sender for this client.
    sender: mpsc::Sender<ServerMessage>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    auth: AuthConfig,
    engine: Arc<Engine>,
    clients: Clients,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server over an engine.
    pub fn new(config: ServerConfig, auth: AuthConfig, engine: Arc<Engine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            auth,
            engine,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the accept loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("game server listening on {}", self.config.bind_addr);

        // Fan the engine's event stream out to every connected client.
        let fanout_clients = self.clients.clone();
        let mut events = self.engine.subscribe();
        let fanout_handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let msg = ServerMessage::Event(event);
                        let clients = fanout_clients.read().await;
                        for client in clients.values() {
                            // Drop frames for clients that can't keep up
                            // rather than stalling the feed for everyone.
                            let _ = client.sender.try_send(msg.clone());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("event fanout lagged, skipped {missed} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Idle-connection cleanup.
        let cleanup_clients = self.clients.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let mut clients = cleanup_clients.write().await;
                let before = clients.len();
                clients.retain(|_, c| now.duration_since(c.last_activity) < idle_timeout);
                let dropped = before - clients.len();
                if dropped > 0 {
                    info!("dropped {dropped} idle connections");
                }
            }
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.clients.read().await.len() >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {addr}");
                                continue;
                            }
                            debug!("new connection from {addr}");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => error!("accept error: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        fanout_handle.abort();
        cleanup_handle.abort();
        Ok(())
    }

    /// Handle one WebSocket connection for its lifetime.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let engine = self.engine.clone();
        let auth = self.auth.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("websocket handshake failed for {addr}: {e}");
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            {
                let mut clients = clients.write().await;
                clients.insert(
                    addr,
                    ConnectedClient {
                        user_id: None,
                        jwt_backed: false,
                        last_activity: Instant::now(),
                        sender: msg_tx.clone(),
                    },
                );
            }

            // Writer task: serialize and push replies/events.
            let writer = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {e}");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid message from {addr}: {e}");
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                            code: ErrorCode::Validation,
                                            message: "invalid message format".to_string(),
                                        })).await;
                                        continue;
                                    }
                                };

                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                Self::handle_client_message(
                                    addr, client_msg, &clients, &engine, &auth, &config, &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                // tungstenite answers pings at the protocol
                                // level; nothing to do.
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {addr} disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("websocket error for {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            writer.abort();
            clients.write().await.remove(&addr);
            debug!("client {addr} cleaned up");
        });
    }

    /// Dispatch one client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        engine: &Arc<Engine>,
        auth: &AuthConfig,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Auth(req) => {
                Self::handle_auth(addr, req, clients, engine, auth, config, sender).await;
            }
            ClientMessage::PlaceBet(req) => {
                let Some((user, jwt_backed)) = Self::client_identity(addr, clients).await else {
                    Self::send_not_authenticated(sender).await;
                    return;
                };
                if req.account == AccountKind::Real && !jwt_backed {
                    Self::send_not_authenticated(sender).await;
                    return;
                }
                let reply = match engine.place_bet(user, req.round_id, req.amount, req.account, Utc::now()) {
                    Ok(receipt) => ServerMessage::BetAccepted {
                        bet: BetInfo::from(&receipt.bet),
                        new_balance: receipt.new_balance,
                    },
                    Err(err) => ServerMessage::Error(ServerError::from(&err)),
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::CashOut(req) => {
                let Some((user, _)) = Self::client_identity(addr, clients).await else {
                    Self::send_not_authenticated(sender).await;
                    return;
                };
                // A bet can only be cashed out by its owner. An existence
                // probe by a stranger reads the same as a missing bet.
                let owned = engine
                    .bet(req.bet_id)
                    .map(|b| b.user_id == user)
                    .unwrap_or(false);
                let reply = if !owned {
                    ServerMessage::Error(ServerError {
                        code: ErrorCode::NotFound,
                        message: "bet not found".to_string(),
                    })
                } else {
                    match engine.cash_out(req.bet_id, req.claimed_multiplier_bps, Utc::now()) {
                        Ok(receipt) => ServerMessage::CashedOut {
                            bet_id: req.bet_id,
                            profit: receipt.profit,
                            total_payout: receipt.total_payout,
                            cashout_multiplier_bps: receipt.cashout_multiplier_bps,
                            new_balance: receipt.new_balance,
                        },
                        Err(err) => ServerMessage::Error(ServerError::from(&err)),
                    }
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::CreateRound => {
                let reply = match engine.ensure_round(Utc::now()) {
                    Ok(round) => ServerMessage::Round(RoundSnapshot::of(
                        &round,
                        &engine.config().curve,
                        Utc::now(),
                    )),
                    Err(err) => ServerMessage::Error(ServerError::from(&err)),
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::AdvanceRound(req) => {
                // Server-authoritative: the target is re-validated against
                // the engine's clock; req.ended_at is deliberately unused.
                let reply = match engine.request_transition(req.round_id, req.target, Utc::now()) {
                    Ok(round) => ServerMessage::Round(RoundSnapshot::of(
                        &round,
                        &engine.config().curve,
                        Utc::now(),
                    )),
                    Err(err) => ServerMessage::Error(ServerError::from(&err)),
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::SetClientSeed { seed } => {
                let reply = match engine.set_next_client_seed(&seed) {
                    Ok(()) => match engine.current_round() {
                        Some(round) => ServerMessage::Round(RoundSnapshot::of(
                            &round,
                            &engine.config().curve,
                            Utc::now(),
                        )),
                        None => ServerMessage::Error(ServerError {
                            code: ErrorCode::NotFound,
                            message: "no current round".to_string(),
                        }),
                    },
                    Err(err) => ServerMessage::Error(ServerError::from(&err)),
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::GetRound => {
                let reply = match engine.current_round() {
                    Some(round) => ServerMessage::Round(RoundSnapshot::of(
                        &round,
                        &engine.config().curve,
                        Utc::now(),
                    )),
                    None => ServerMessage::Error(ServerError {
                        code: ErrorCode::NotFound,
                        message: "no current round".to_string(),
                    }),
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::GetBalance { account } => {
                let Some((user, jwt_backed)) = Self::client_identity(addr, clients).await else {
                    Self::send_not_authenticated(sender).await;
                    return;
                };
                if account == AccountKind::Real && !jwt_backed {
                    Self::send_not_authenticated(sender).await;
                    return;
                }
                let _ = sender
                    .send(ServerMessage::Balance {
                        account,
                        amount: engine.balance(user, account),
                    })
                    .await;
            }
            ClientMessage::History { limit } => {
                let rounds = engine.history(limit.min(100));
                let _ = sender.send(ServerMessage::History { rounds }).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: Utc::now().timestamp_millis().max(0) as u64,
                    })
                    .await;
            }
        }
    }

    /// Authenticate: JWT when configured, guest identity otherwise.
    async fn handle_auth(
        addr: SocketAddr,
        req: AuthRequest,
        clients: &Clients,
        engine: &Arc<Engine>,
        auth: &AuthConfig,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let (user_id, jwt_backed, error) = if auth.is_configured() {
            match validate_token(&req.token, auth) {
                Ok(claims) => (Some(claims.user_id()), true, None),
                Err(err) => (None, false, Some(err.to_string())),
            }
        } else {
            // No provider configured: demo-only guest identity pinned to
            // the connection address.
            (Some(guest_user_id(addr)), false, None)
        };

        let result = match user_id {
            Some(user) => {
                let demo_balance = engine.ensure_demo_balance(user);
                {
                    let mut clients = clients.write().await;
                    if let Some(client) = clients.get_mut(&addr) {
                        client.user_id = Some(user);
                        client.jwt_backed = jwt_backed;
                    }
                }
                debug!("client {addr} authenticated as {}", user.to_hex());
                AuthResult {
                    success: true,
                    user_id: Some(user.to_hex()),
                    demo_balance: Some(demo_balance),
                    error: None,
                    server_version: config.version.clone(),
                }
            }
            None => AuthResult {
                success: false,
                user_id: None,
                demo_balance: None,
                error,
                server_version: config.version.clone(),
            },
        };

        let _ = sender.send(ServerMessage::AuthResult(result)).await;
    }

    async fn client_identity(addr: SocketAddr, clients: &Clients) -> Option<(UserId, bool)> {
        let clients = clients.read().await;
        let client = clients.get(&addr)?;
        client.user_id.map(|id| (id, client.jwt_backed))
    }

    async fn send_not_authenticated(sender: &mpsc::Sender<ServerMessage>) {
        let _ = sender
            .send(ServerMessage::Error(ServerError {
                code: ErrorCode::NotAuthenticated,
                message: "authenticate first".to_string(),
            }))
            .await;
    }

    /// Signal shutdown to the accept loop and all connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Demo-only identity for connections without an auth provider.
fn guest_user_id(addr: SocketAddr) -> UserId {
    let mut hasher = Sha256::new();
    hasher.update(b"crashpoint-guest:");
    hasher.update(addr.to_string().as_bytes());
    let hash = hasher.finalize();
    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    UserId::new(id)
}
