//! Wire codec: one JSON object per newline-terminated control line, plus a
//! raw 4-byte big-endian length prefix for file-transfer payload bytes.
//!
//! Unlike a derive-based tagged enum, inbound frames are parsed through a
//! `serde_json::Value` first so that an unrecognized `type` can be treated
//! as forward-compatible no-op rather than a hard parse error, matching the
//! dispatch table's "unknown type -> silently ignore" rule.

use std::collections::HashMap;

use serde::de::Error as _;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone)]
pub enum ClientFrame {
    Login { payload: String },
    Message { payload: String },
    PrivateMessage { target: String, payload: String },
    JoinRoom { payload: String },
    ListRooms,
    FileTransfer {
        filename: String,
        filesize: u64,
        target: Option<String>,
    },
    CallRequest { payload: String },
    CallAccept { payload: String },
    CallReject { payload: String },
    CallEnd { payload: Option<String> },
}

pub enum ParsedLine {
    Frame(ClientFrame),
    UnknownType(String),
}

/// Parses one control line. A malformed line (invalid JSON, missing
/// required field for a recognized type) surfaces as `Err` for the caller
/// to log and skip — the session itself is never torn down for this.
pub fn parse_line(line: &str) -> Result<ParsedLine, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let ty = value
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let frame = match ty.as_str() {
        "login" => ClientFrame::Login {
            payload: field_str(&value, "payload")?,
        },
        "message" => ClientFrame::Message {
            payload: field_str(&value, "payload")?,
        },
        "private_message" => ClientFrame::PrivateMessage {
            target: field_str(&value, "target")?,
            payload: field_str(&value, "payload")?,
        },
        "join_room" => ClientFrame::JoinRoom {
            payload: field_str(&value, "payload")?,
        },
        "list_rooms" => ClientFrame::ListRooms,
        "file_transfer" => {
            let filename = field_str(&value, "filename")?;
            let filesize = value
                .get("filesize")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| serde_json::Error::custom("missing field filesize"))?;
            let target = value
                .get("target")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            ClientFrame::FileTransfer {
                filename,
                filesize,
                target,
            }
        }
        "call_request" => ClientFrame::CallRequest {
            payload: field_str(&value, "payload")?,
        },
        "call_accept" => ClientFrame::CallAccept {
            payload: field_str(&value, "payload")?,
        },
        "call_reject" => ClientFrame::CallReject {
            payload: field_str(&value, "payload")?,
        },
        "call_end" => ClientFrame::CallEnd {
            payload: value
                .get("payload")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        },
        other => return Ok(ParsedLine::UnknownType(other.to_string())),
    };
    Ok(ParsedLine::Frame(frame))
}

fn field_str(value: &serde_json::Value, key: &str) -> Result<String, serde_json::Error> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| serde_json::Error::custom(format!("missing field {key}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomInfoPayload {
    pub room: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "login_success")]
    LoginSuccess,
    #[serde(rename = "error")]
    Error { payload: String },
    #[serde(rename = "notification")]
    Notification { payload: String },
    #[serde(rename = "message")]
    Message {
        sender: String,
        room: String,
        payload: String,
    },
    #[serde(rename = "private_message")]
    PrivateMessage { sender: String, payload: String },
    #[serde(rename = "private_sent")]
    PrivateSent { target: String, payload: String },
    #[serde(rename = "room_info")]
    RoomInfo { payload: RoomInfoPayload },
    #[serde(rename = "room_list")]
    RoomList {
        payload: HashMap<String, Vec<String>>,
    },
    #[serde(rename = "user_list")]
    UserList { payload: Vec<String> },
    #[serde(rename = "file_incoming")]
    FileIncoming {
        sender: String,
        filename: String,
        filesize: u64,
        target: Option<String>,
    },
    #[serde(rename = "file_transfer_ready")]
    FileTransferReady,
    #[serde(rename = "file_sent_confirm")]
    FileSentConfirm,
    #[serde(rename = "call_incoming")]
    CallIncoming { payload: String },
    #[serde(rename = "call_ringing")]
    CallRinging { payload: String },
    #[serde(rename = "call_started")]
    CallStarted { payload: String },
    #[serde(rename = "call_rejected")]
    CallRejected { payload: String },
    #[serde(rename = "call_ended")]
    CallEnded { payload: String },
}

/// Writes one newline-terminated frame. Flushes so it reaches the peer
/// before the writer task picks up its next queued message.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &ServerFrame,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(frame).map_err(std::io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

pub async fn read_file_len<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

pub async fn write_file_len<W: AsyncWrite + Unpin>(
    writer: &mut W,
    len: u32,
) -> std::io::Result<()> {
    writer.write_all(&len.to_be_bytes()).await
}
