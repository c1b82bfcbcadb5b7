//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::world::UnknownMove;
use crate::game::MoveCommand;
use crate::http::middleware::verify_jwt;
use crate::rooms::RoomError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::hub::{Group, Outbox, Subscriptions, OUTBOX_CAPACITY};
use crate::ws::protocol::{ClientMsg, ConnectionId, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => {
            let identity = claims.identity().to_string();
            info!(identity = %identity, "WebSocket upgrade for authenticated user");
            ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
        }
        Err(e) => {
            error!(error = %e, "WebSocket auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, identity: String, state: AppState) {
    let connection = Uuid::new_v4();
    info!(connection = %connection, identity = %identity, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbox, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);

    let session = Session::new(connection, identity, outbox);
    run_session(&state, session, ws_sink, ws_stream, outbox_rx).await;

    // Cleanup on disconnect
    state.registry.disconnect(connection);

    info!(connection = %connection, "WebSocket connection closed");
}

/// Per-connection state: identity, outbound queue and group subscriptions
pub(crate) struct Session {
    connection: ConnectionId,
    identity: String,
    outbox: Outbox,
    subscriptions: Subscriptions,
}

impl Session {
    pub(crate) fn new(connection: ConnectionId, identity: String, outbox: Outbox) -> Self {
        Self {
            connection,
            identity,
            subscriptions: Subscriptions::new(connection, outbox.clone()),
            outbox,
        }
    }

    /// Commands may only act for the user the connection signed in as
    fn ensure_identity(&self, username: &str) -> Result<(), CommandError> {
        if username == self.identity {
            Ok(())
        } else {
            Err(CommandError::NotYou)
        }
    }

    /// Queue a direct reply; a full or closed outbox drops it
    fn reply(&self, msg: ServerMsg) {
        if let Err(e) = self.outbox.try_send(msg) {
            warn!(connection = %self.connection, error = %e, "Dropped reply");
        }
    }
}

/// Run the WebSocket session with read/write split
async fn run_session(
    state: &AppState,
    mut session: Session,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut outbox_rx: mpsc::Receiver<ServerMsg>,
) {
    let connection = session.connection;
    let rate_limiter = ConnectionRateLimiter::new();

    // Spawn writer task: outbox -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection = %connection, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> registry
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(connection = %connection, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => dispatch(state, &mut session, client_msg),
                    Err(e) => {
                        warn!(connection = %connection, error = %e, "Failed to parse client message");
                        session.reply(ServerMsg::error("Invalid message"));
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection = %connection, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(connection = %connection, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(connection = %connection, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(connection = %connection, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection = %connection, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Stops the forwarders before the writer goes away
    drop(session);
    writer_handle.abort();
}

/// Failure of one inbound command, reported back as an `error` event
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Move(#[from] UnknownMove),

    #[error("Teams are not full yet")]
    NotReady,

    #[error("Username does not match the signed-in user")]
    NotYou,
}

/// Apply one client command on behalf of a session
pub(crate) fn dispatch(state: &AppState, session: &mut Session, msg: ClientMsg) {
    if let Err(e) = execute(state, session, msg) {
        debug!(connection = %session.connection, error = %e, "Command rejected");
        session.reply(ServerMsg::error(e));
    }
}

fn execute(state: &AppState, session: &mut Session, msg: ClientMsg) -> Result<(), CommandError> {
    let registry = &state.registry;

    match msg {
        ClientMsg::CreateRoom(request) => {
            let summary = registry.create_room(request, &session.identity)?;
            session.reply(ServerMsg::RoomCreatedAck { id: summary.id });
        }

        ClientMsg::JoinLobby => {
            // Subscribe first so nothing published after the listing is missed
            let events = registry.lobby().subscribe();
            session.reply(ServerMsg::AllRooms {
                rooms: registry.summaries(),
            });
            session.subscriptions.subscribe(Group::Lobby, events);
        }

        ClientMsg::JoinTeam {
            room,
            team,
            username,
        } => {
            session.ensure_identity(&username)?;
            let joined = registry.join_team(&room, team, &username, session.connection)?;
            if joined.started {
                debug!(room_id = %room, "Rosters full, match started");
            }
            session.subscriptions.subscribe(Group::Room(room), joined.events);
        }

        ClientMsg::JoinRoom { room, username } => {
            session.ensure_identity(&username)?;
            let joined = registry.join_room(&room, &username, session.connection)?;
            if joined.reconnected {
                debug!(room_id = %room, username = %username, "Player rejoined room");
            }
            session.reply(ServerMsg::JoinedRoom(joined.summary));
            session.subscriptions.subscribe(Group::Room(room), joined.events);
        }

        ClientMsg::StartGame { room, .. } => {
            if !registry.start_game(&room, &session.identity)? {
                return Err(CommandError::NotReady);
            }
        }

        ClientMsg::Move {
            room,
            username,
            action,
        } => {
            session.ensure_identity(&username)?;
            let command: MoveCommand = action.parse()?;
            // Inputs racing a goal reset or the final whistle are dropped quietly
            if let Err(e) = registry.apply_move(&room, &username, command) {
                debug!(room_id = %room, username = %username, error = %e, "Move ignored");
            }
        }

        ClientMsg::Message { room, text, author } => {
            session.ensure_identity(&author)?;
            registry.chat(&room, text, author)?;
        }

        ClientMsg::Ping { t } => session.reply(ServerMsg::Pong { t }),
    }

    Ok(())
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
