//! Per-connection session handling: login, control-frame dispatch, file
//! relay, and teardown. One TCP connection maps to one spawned task running
//! [`handle_connection`]; a single dedicated writer task drains that
//! connection's outbound mailbox so no two tasks ever write to the same
//! socket half (I6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use relay_control::{CallEvent, ClientName, RelayError};

use crate::codec::{self, ClientFrame, ParsedLine, RoomInfoPayload, ServerFrame};
use crate::state::{post, GatewayState, Outbound, OutboundHandle, OUTBOUND_MAILBOX_DEPTH};

pub struct SessionConfig {
    pub login_timeout: Duration,
    pub max_line_bytes: usize,
}

/// Largest file this relay will buffer for a single transfer. Not part of
/// the wire protocol; purely a local guard against an unbounded `filesize`
/// claim forcing an unbounded allocation.
const MAX_FILE_BYTES: u64 = 64 * 1024 * 1024;

pub async fn handle_connection(
    state: Arc<GatewayState>,
    cfg: Arc<SessionConfig>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    state.metrics.conn_accepted();
    if let Err(e) = run(&state, &cfg, stream, peer).await {
        debug!(%peer, error = %e, "session ended");
    }
    state.metrics.conn_closed();
}

async fn run(
    state: &Arc<GatewayState>,
    cfg: &SessionConfig,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_MAILBOX_DEPTH);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let write_result = match &msg {
                Outbound::Control(frame) => codec::write_frame(&mut write_half, frame).await,
                Outbound::File { header, payload } => {
                    async {
                        codec::write_frame(&mut write_half, header).await?;
                        codec::write_file_len(&mut write_half, payload.len() as u32).await?;
                        write_half.write_all(payload).await?;
                        write_half.flush().await
                    }
                    .await
                }
            };
            if let Err(e) = write_result {
                debug!(%peer, error = %e, "outbound write failed, closing writer");
                break;
            }
        }
    });

    let name = match login_phase(state, cfg, &mut reader, &tx, peer).await? {
        Some(name) => name,
        None => return Ok(()),
    };

    let result = dispatch_loop(state, cfg, &mut reader, &tx, &name).await;
    teardown(state, &name);
    result
}

/// Reads and validates the first control line. Returns `Ok(None)` when the
/// connection was rejected cleanly (bad frame, invalid name, name taken) —
/// the caller has nothing left to tear down since registration never
/// happened. Returns `Err` only for a dead or timed-out connection.
async fn login_phase(
    state: &Arc<GatewayState>,
    cfg: &SessionConfig,
    reader: &mut (impl tokio::io::AsyncBufRead + Unpin),
    tx: &OutboundHandle,
    peer: SocketAddr,
) -> Result<Option<ClientName>> {
    let mut line = String::new();
    let read = timeout(cfg.login_timeout, reader.read_line(&mut line))
        .await
        .context("login timed out")??;
    if read == 0 {
        return Err(anyhow!("connection closed before login"));
    }

    let parsed = codec::parse_line(line.trim())
        .map_err(|e| anyhow!("malformed login frame: {e}"))?;
    let raw_name = match parsed {
        ParsedLine::Frame(ClientFrame::Login { payload }) => payload,
        _ => {
            state.metrics.login_rejected("not_login_frame");
            post(tx, Outbound::Control(ServerFrame::Error {
                payload: "expected a login frame".to_string(),
            }));
            return Ok(None);
        }
    };

    let name = match ClientName::parse(&raw_name) {
        Some(n) => n,
        None => {
            state.metrics.login_rejected("invalid_name");
            post(tx, Outbound::Control(ServerFrame::Error {
                payload: "invalid name".to_string(),
            }));
            return Ok(None);
        }
    };

    if let Err(err) = state.registry.register(name.clone(), tx.clone()) {
        debug_assert!(matches!(err, RelayError::NameTaken));
        state.metrics.login_rejected("name_taken");
        post(tx, Outbound::Control(ServerFrame::Error {
            payload: err.to_string(),
        }));
        return Ok(None);
    }

    state.metrics.login_succeeded();
    info!(%peer, name = %name, "client logged in");

    let room = state.registry.default_room().to_string();
    post(tx, Outbound::Control(ServerFrame::LoginSuccess));
    post(tx, Outbound::Control(ServerFrame::RoomInfo {
        payload: room_info_payload(state, &room),
    }));

    broadcast_user_list(state);
    notify_room(state, &room, &name, format!("{name} joined the chat!"));

    Ok(Some(name))
}

async fn dispatch_loop(
    state: &Arc<GatewayState>,
    cfg: &SessionConfig,
    reader: &mut (impl tokio::io::AsyncBufRead + Unpin),
    tx: &OutboundHandle,
    name: &ClientName,
) -> Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .context("read control line")?;
        if read == 0 {
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() > cfg.max_line_bytes {
            warn!(name = %name, len = trimmed.len(), "control line exceeds limit, skipping");
            continue;
        }

        match codec::parse_line(trimmed) {
            Ok(ParsedLine::Frame(frame)) => {
                dispatch_frame(state, reader, tx, name, frame).await;
            }
            Ok(ParsedLine::UnknownType(ty)) => {
                debug!(name = %name, ty = %ty, "ignoring frame of unknown type");
            }
            Err(e) => {
                warn!(name = %name, error = %e, "malformed control frame, skipping");
            }
        }
    }
}

async fn dispatch_frame(
    state: &Arc<GatewayState>,
    reader: &mut (impl tokio::io::AsyncBufRead + Unpin),
    tx: &OutboundHandle,
    name: &ClientName,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Login { .. } => {
            // Already past login; a repeat is silently ignored.
        }

        ClientFrame::Message { payload } => {
            state.metrics.control_msg_rx("message");
            if payload.is_empty() {
                return;
            }
            let room = state
                .registry
                .room_of(name)
                .unwrap_or_else(|| state.registry.default_room().to_string());
            for handle in state.registry.room_handles_excluding(&room, name) {
                post(&handle, Outbound::Control(ServerFrame::Message {
                    sender: name.to_string(),
                    room: room.clone(),
                    payload: payload.clone(),
                }));
            }
        }

        ClientFrame::PrivateMessage { target, payload } => {
            state.metrics.control_msg_rx("private_message");
            let delivered = ClientName::parse(&target).and_then(|t| state.registry.handle_of(&t));
            match delivered {
                Some(handle) => {
                    post(&handle, Outbound::Control(ServerFrame::PrivateMessage {
                        sender: name.to_string(),
                        payload: payload.clone(),
                    }));
                    post(tx, Outbound::Control(ServerFrame::PrivateSent { target, payload }));
                }
                None => {
                    post(tx, Outbound::Control(ServerFrame::Error {
                        payload: format!("user '{target}' not found"),
                    }));
                }
            }
        }

        ClientFrame::JoinRoom { payload: new_room } => {
            state.metrics.control_msg_rx("join_room");
            let new_room = new_room.trim().to_string();
            match state.registry.set_room(name, &new_room) {
                Ok(old_room) => {
                    if old_room != new_room {
                        notify_room(state, &old_room, name, format!("{name} left the room"));
                        notify_room(state, &new_room, name, format!("{name} joined the room"));
                        post(tx, Outbound::Control(ServerFrame::RoomInfo {
                            payload: room_info_payload(state, &new_room),
                        }));
                        broadcast_user_list(state);
                    }
                    // Switching rooms never touches an in-progress call (Open
                    // Question resolved in favor of leaving calls room-independent).
                }
                Err(RelayError::InvalidRoomName) => {
                    post(tx, Outbound::Control(ServerFrame::Error {
                        payload: "Room name cannot be empty".to_string(),
                    }));
                }
                Err(_) => {
                    post(tx, Outbound::Control(ServerFrame::Error {
                        payload: "not logged in".to_string(),
                    }));
                }
            }
        }

        ClientFrame::ListRooms => {
            state.metrics.control_msg_rx("list_rooms");
            let payload = state
                .registry
                .snapshot_rooms()
                .into_iter()
                .map(|(room, members)| {
                    (room, members.into_iter().map(String::from).collect())
                })
                .collect();
            post(tx, Outbound::Control(ServerFrame::RoomList { payload }));
        }

        ClientFrame::CallRequest { payload: target } => {
            state.metrics.control_msg_rx("call_request");
            handle_call_request(state, tx, name, target);
        }

        ClientFrame::CallAccept { payload: caller } => {
            state.metrics.control_msg_rx("call_accept");
            handle_call_accept(state, name, caller);
        }

        ClientFrame::CallReject { payload: caller } => {
            state.metrics.control_msg_rx("call_reject");
            handle_call_reject(state, name, caller);
        }

        ClientFrame::CallEnd { .. } => {
            state.metrics.control_msg_rx("call_end");
            // The payload's caller name, if present, is advisory only; the
            // active-call map alone decides who `name`'s partner really is.
            let events = state.calls.end(name);
            if !events.is_empty() {
                state.metrics.call_transition("end");
            }
            dispatch_call_events(state, events);
        }

        ClientFrame::FileTransfer { filename, filesize, target } => {
            state.metrics.control_msg_rx("file_transfer");
            run_file_relay(state, reader, tx, name, filename, filesize, target).await;
        }
    }
}

fn handle_call_request(state: &GatewayState, tx: &OutboundHandle, caller: &ClientName, target_raw: String) {
    let target = match ClientName::parse(&target_raw).filter(|t| state.registry.contains(t)) {
        Some(t) => t,
        None => {
            post(tx, Outbound::Control(ServerFrame::Error {
                payload: format!("user '{target_raw}' not found"),
            }));
            return;
        }
    };

    match state.calls.request(caller.clone(), target) {
        Ok(events) => {
            state.metrics.call_transition("request");
            dispatch_call_events(state, events);
        }
        Err(e) => {
            post(tx, Outbound::Control(ServerFrame::Error { payload: e.to_string() }));
        }
    }
}

fn handle_call_accept(state: &GatewayState, callee: &ClientName, caller_raw: String) {
    let Some(caller) = ClientName::parse(&caller_raw).filter(|c| state.registry.contains(c)) else {
        if let Some(handle) = state.registry.handle_of(callee) {
            post(&handle, Outbound::Control(ServerFrame::Error {
                payload: format!("user '{caller_raw}' not found"),
            }));
        }
        return;
    };
    let events = state.calls.accept(callee.clone(), caller);
    state.metrics.call_transition("accept");
    dispatch_call_events(state, events);
}

fn handle_call_reject(state: &GatewayState, callee: &ClientName, caller_raw: String) {
    if let Some(caller) = ClientName::parse(&caller_raw) {
        let events = state.calls.reject(callee.clone(), caller);
        state.metrics.call_transition("reject");
        dispatch_call_events(state, events);
    }
}

/// Translates Call controller effects into outbound wire frames, looking up
/// each recipient's current handle fresh (it may have disconnected between
/// the controller call and now).
fn dispatch_call_events(state: &GatewayState, events: Vec<CallEvent>) {
    for event in events {
        let (to, frame) = match event {
            CallEvent::CallIncoming { to, caller } => {
                (to, ServerFrame::CallIncoming { payload: caller.to_string() })
            }
            CallEvent::CallRinging { to, callee } => {
                (to, ServerFrame::CallRinging { payload: format!("Calling {callee}...") })
            }
            CallEvent::CallStarted { to, partner } => {
                (to, ServerFrame::CallStarted { payload: partner.to_string() })
            }
            CallEvent::CallRejected { to, message } => (to, ServerFrame::CallRejected { payload: message }),
            CallEvent::CallEnded { to, message } => (to, ServerFrame::CallEnded { payload: message }),
        };
        if let Some(handle) = state.registry.handle_of(&to) {
            post(&handle, Outbound::Control(frame));
        }
    }
}

async fn run_file_relay(
    state: &Arc<GatewayState>,
    reader: &mut (impl tokio::io::AsyncBufRead + Unpin),
    tx: &OutboundHandle,
    sender: &ClientName,
    filename: String,
    filesize: u64,
    target: Option<String>,
) {
    if filesize > MAX_FILE_BYTES {
        post(tx, Outbound::Control(ServerFrame::Error {
            payload: format!("file too large: {filesize} bytes"),
        }));
        return;
    }

    let recipients = match resolve_file_recipients(state, sender, target.as_deref()) {
        Ok(handles) => handles,
        Err(message) => {
            post(tx, Outbound::Control(ServerFrame::Error { payload: message }));
            return;
        }
    };

    state.metrics.file_transfer_started();
    post(tx, Outbound::Control(ServerFrame::FileTransferReady));

    // The client echoes a raw 4-byte size prefix before streaming payload
    // bytes, independent of the `filesize` already declared in the control
    // frame; a mismatch aborts the transfer without tearing down the session.
    let declared = match codec::read_file_len(reader).await {
        Ok(n) => n,
        Err(e) => {
            warn!(name = %sender, error = %e, "file transfer aborted: no size prefix");
            state.metrics.file_transfer_aborted("read_failed");
            return;
        }
    };
    if declared as u64 != filesize {
        warn!(name = %sender, declared, filesize, "file transfer aborted: size mismatch");
        post(tx, Outbound::Control(ServerFrame::Error {
            payload: "declared file size does not match size prefix".to_string(),
        }));
        state.metrics.file_transfer_aborted("size_mismatch");
        return;
    }

    // A transfer that dies mid-payload is an own-connection read failure:
    // abort this transfer only and let the session's normal read loop
    // discover the dead connection on its next line read.
    let payload = match read_exact_chunked(reader, filesize).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(name = %sender, error = %e, "file transfer aborted mid-payload");
            post(tx, Outbound::Control(ServerFrame::Error {
                payload: "File transfer failed - incomplete data".to_string(),
            }));
            state.metrics.file_transfer_aborted("read_failed");
            return;
        }
    };

    let header = ServerFrame::FileIncoming {
        sender: sender.to_string(),
        filename,
        filesize,
        target,
    };
    for handle in &recipients {
        post(handle, Outbound::File { header: header.clone(), payload: payload.clone() });
    }

    post(tx, Outbound::Control(ServerFrame::FileSentConfirm));
    state.metrics.file_transfer_completed(filesize);
}

fn resolve_file_recipients(
    state: &GatewayState,
    sender: &ClientName,
    target: Option<&str>,
) -> std::result::Result<Vec<OutboundHandle>, String> {
    match target {
        Some(raw) => {
            let name = ClientName::parse(raw).ok_or_else(|| "invalid target name".to_string())?;
            let handle = state
                .registry
                .handle_of(&name)
                .ok_or_else(|| format!("user '{raw}' not found"))?;
            Ok(vec![handle])
        }
        None => {
            let room = state
                .registry
                .room_of(sender)
                .ok_or_else(|| "not logged in".to_string())?;
            Ok(state.registry.room_handles_excluding(&room, sender))
        }
    }
}

/// Reads exactly `total` bytes in 4096-byte chunks, matching the buffering
/// granularity of the system this relay replaces.
async fn read_exact_chunked(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
    total: u64,
) -> std::io::Result<Bytes> {
    const CHUNK: usize = 4096;
    let mut buf = BytesMut::with_capacity(total.min(1 << 20) as usize);
    let mut remaining = total;
    let mut chunk = [0u8; CHUNK];
    while remaining > 0 {
        let take = remaining.min(CHUNK as u64) as usize;
        reader.read_exact(&mut chunk[..take]).await?;
        buf.extend_from_slice(&chunk[..take]);
        remaining -= take as u64;
    }
    Ok(buf.freeze())
}

fn room_info_payload(state: &GatewayState, room: &str) -> RoomInfoPayload {
    RoomInfoPayload {
        room: room.to_string(),
        members: state.registry.snapshot_room(room).into_iter().map(String::from).collect(),
    }
}

fn broadcast_user_list(state: &GatewayState) {
    let users: Vec<String> = state.registry.snapshot_users().into_iter().map(String::from).collect();
    for handle in state.registry.all_handles() {
        post(&handle, Outbound::Control(ServerFrame::UserList { payload: users.clone() }));
    }
}

fn notify_room(state: &GatewayState, room: &str, exclude: &ClientName, message: String) {
    for handle in state.registry.room_handles_excluding(room, exclude) {
        post(&handle, Outbound::Control(ServerFrame::Notification { payload: message.clone() }));
    }
}

/// Call teardown first (only the partner needs telling; `name`'s own
/// channel is already gone), then registry teardown (tells the room).
fn teardown(state: &GatewayState, name: &ClientName) {
    let events = state.calls.disconnect(name);
    if !events.is_empty() {
        state.metrics.call_transition("disconnect");
    }
    dispatch_call_events(state, events);

    if let Some(room) = state.registry.unregister(name) {
        notify_room(state, &room, name, format!("{name} left the chat!"));
        broadcast_user_list(state);
        info!(name = %name, "client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader as TokioBufReader};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// A client's connection in these tests: `BufReader` buffers reads but
    /// forwards writes straight to the socket, so one handle does both.
    type Client = TokioBufReader<TcpStream>;

    async fn start_server() -> (std::net::SocketAddr, Arc<GatewayState>) {
        let state = Arc::new(GatewayState::new("lobby", "test"));
        let cfg = Arc::new(SessionConfig {
            login_timeout: Duration::from_secs(2),
            max_line_bytes: 64 * 1024,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer) = listener.accept().await.unwrap();
                let state = accept_state.clone();
                let cfg = cfg.clone();
                tokio::spawn(handle_connection(state, cfg, stream, peer));
            }
        });

        (addr, state)
    }

    async fn login(addr: std::net::SocketAddr, name: &str) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = TokioBufReader::new(stream);
        send_line(&mut client, &json!({"type": "login", "payload": name})).await;
        assert_eq!(recv_line(&mut client).await["type"], "login_success");
        assert_eq!(recv_line(&mut client).await["type"], "room_info");
        client
    }

    async fn send_line(client: &mut Client, value: &Value) {
        let mut line = serde_json::to_vec(value).unwrap();
        line.push(b'\n');
        client.write_all(&line).await.unwrap();
    }

    async fn recv_line(client: &mut Client) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(2), client.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Drains the `user_list` broadcast a fresh login sends to itself.
    async fn drain_own_user_list(client: &mut Client) {
        assert_eq!(recv_line(client).await["type"], "user_list");
    }

    #[tokio::test]
    async fn two_user_room_broadcast_has_no_echo() {
        let (addr, _state) = start_server().await;
        let mut alice = login(addr, "Alice").await;
        drain_own_user_list(&mut alice).await;

        let mut bob = login(addr, "Bob").await;
        drain_own_user_list(&mut bob).await;
        // Alice sees Bob join: a refreshed user_list, then a notification.
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut alice).await["type"], "notification");

        send_line(&mut alice, &json!({"type": "message", "payload": "hi"})).await;

        let got = recv_line(&mut bob).await;
        assert_eq!(got["type"], "message");
        assert_eq!(got["sender"], "Alice");
        assert_eq!(got["room"], "lobby");
        assert_eq!(got["payload"], "hi");

        // Alice never sees her own message echoed back.
        let next = timeout(Duration::from_millis(300), recv_line(&mut alice)).await;
        assert!(next.is_err(), "Alice should not receive her own broadcast");
    }

    #[tokio::test]
    async fn join_room_notifies_old_and_new_rooms() {
        let (addr, _state) = start_server().await;
        let mut alice = login(addr, "Alice").await;
        drain_own_user_list(&mut alice).await;
        let mut bob = login(addr, "Bob").await;
        drain_own_user_list(&mut bob).await;
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut alice).await["type"], "notification");

        send_line(&mut alice, &json!({"type": "join_room", "payload": "dev"})).await;

        let left = recv_line(&mut bob).await;
        assert_eq!(left["type"], "notification");
        assert_eq!(left["payload"], "Alice left the room");

        let room_info = recv_line(&mut alice).await;
        assert_eq!(room_info["type"], "room_info");
        assert_eq!(room_info["payload"]["room"], "dev");
        assert_eq!(room_info["payload"]["members"], json!(["Alice"]));

        // A room switch refreshes everyone's user_list but touches no call state.
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut bob).await["type"], "user_list");
    }

    #[tokio::test]
    async fn join_room_rejects_empty_or_whitespace_name() {
        let (addr, _state) = start_server().await;
        let mut alice = login(addr, "Alice").await;
        drain_own_user_list(&mut alice).await;

        send_line(&mut alice, &json!({"type": "join_room", "payload": "   "})).await;
        let err = recv_line(&mut alice).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["payload"], "Room name cannot be empty");

        // Alice never left the lobby; a follow-up message still reaches it.
        let mut bob = login(addr, "Bob").await;
        drain_own_user_list(&mut bob).await;
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut alice).await["type"], "notification");

        send_line(&mut alice, &json!({"type": "message", "payload": "still here"})).await;
        let got = recv_line(&mut bob).await;
        assert_eq!(got["room"], "lobby");
        assert_eq!(got["payload"], "still here");
    }

    #[tokio::test]
    async fn private_message_confirms_to_sender() {
        let (addr, _state) = start_server().await;
        let mut alice = login(addr, "Alice").await;
        drain_own_user_list(&mut alice).await;
        let mut bob = login(addr, "Bob").await;
        drain_own_user_list(&mut bob).await;
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut alice).await["type"], "notification");

        send_line(&mut alice, &json!({
            "type": "private_message", "target": "Bob", "payload": "psst"
        }))
        .await;

        let got = recv_line(&mut bob).await;
        assert_eq!(got["type"], "private_message");
        assert_eq!(got["sender"], "Alice");
        assert_eq!(got["payload"], "psst");

        let confirm = recv_line(&mut alice).await;
        assert_eq!(confirm["type"], "private_sent");
        assert_eq!(confirm["target"], "Bob");
    }

    #[tokio::test]
    async fn private_file_transfer_round_trips() {
        let (addr, _state) = start_server().await;
        let mut alice = login(addr, "Alice").await;
        drain_own_user_list(&mut alice).await;
        let mut bob = login(addr, "Bob").await;
        drain_own_user_list(&mut bob).await;
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut alice).await["type"], "notification");

        send_line(&mut alice, &json!({
            "type": "file_transfer", "filename": "a.txt", "filesize": 5, "target": "Bob"
        }))
        .await;
        assert_eq!(recv_line(&mut alice).await["type"], "file_transfer_ready");

        alice.write_all(&5u32.to_be_bytes()).await.unwrap();
        alice.write_all(b"hello").await.unwrap();

        let header = recv_line(&mut bob).await;
        assert_eq!(header["type"], "file_incoming");
        assert_eq!(header["sender"], "Alice");
        assert_eq!(header["filename"], "a.txt");
        assert_eq!(header["filesize"], 5);
        let mut len_buf = [0u8; 4];
        bob.read_exact(&mut len_buf).await.unwrap();
        assert_eq!(u32::from_be_bytes(len_buf), 5);
        let mut payload = [0u8; 5];
        bob.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"hello");

        assert_eq!(recv_line(&mut alice).await["type"], "file_sent_confirm");
    }

    #[tokio::test]
    async fn call_lifecycle_request_accept_end() {
        let (addr, _state) = start_server().await;
        let mut alice = login(addr, "Alice").await;
        drain_own_user_list(&mut alice).await;
        let mut bob = login(addr, "Bob").await;
        drain_own_user_list(&mut bob).await;
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut alice).await["type"], "notification");

        send_line(&mut alice, &json!({"type": "call_request", "payload": "Bob"})).await;

        let incoming = recv_line(&mut bob).await;
        assert_eq!(incoming["type"], "call_incoming");
        assert_eq!(incoming["payload"], "Alice");
        assert_eq!(recv_line(&mut alice).await["type"], "call_ringing");

        send_line(&mut bob, &json!({"type": "call_accept", "payload": "Alice"})).await;

        let started_alice = recv_line(&mut alice).await;
        assert_eq!(started_alice["type"], "call_started");
        assert_eq!(started_alice["payload"], "Bob");
        let started_bob = recv_line(&mut bob).await;
        assert_eq!(started_bob["type"], "call_started");
        assert_eq!(started_bob["payload"], "Alice");

        send_line(&mut alice, &json!({"type": "call_end"})).await;

        let ended_bob = recv_line(&mut bob).await;
        assert_eq!(ended_bob["type"], "call_ended");
        assert_eq!(ended_bob["payload"], "Alice ended the call");
        let ended_alice = recv_line(&mut alice).await;
        assert_eq!(ended_alice["type"], "call_ended");
        assert_eq!(ended_alice["payload"], "Call ended");
    }

    #[tokio::test]
    async fn disconnect_during_call_notifies_partner() {
        let (addr, state) = start_server().await;
        let mut alice = login(addr, "Alice").await;
        drain_own_user_list(&mut alice).await;
        let mut bob = login(addr, "Bob").await;
        drain_own_user_list(&mut bob).await;
        assert_eq!(recv_line(&mut alice).await["type"], "user_list");
        assert_eq!(recv_line(&mut alice).await["type"], "notification");

        send_line(&mut alice, &json!({"type": "call_request", "payload": "Bob"})).await;
        assert_eq!(recv_line(&mut bob).await["type"], "call_incoming");
        assert_eq!(recv_line(&mut alice).await["type"], "call_ringing");

        send_line(&mut bob, &json!({"type": "call_accept", "payload": "Alice"})).await;
        assert_eq!(recv_line(&mut alice).await["type"], "call_started");
        assert_eq!(recv_line(&mut bob).await["type"], "call_started");

        // Alice disconnects; her TCP connection simply drops.
        drop(alice);

        let ended = recv_line(&mut bob).await;
        assert_eq!(ended["type"], "call_ended");
        assert_eq!(ended["payload"], "Alice disconnected");

        // Give the teardown path a moment to run before asserting state.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let alice_name = ClientName::parse("Alice").unwrap();
        assert!(!state.calls.is_in_call(&alice_name));
        assert!(!state.registry.contains(&alice_name));
    }
}
