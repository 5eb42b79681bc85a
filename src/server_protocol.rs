use serde::Serialize;
use serde_json::Value;

use crate::error::SessionError;
use crate::grid::Grid;
use crate::room_code::RoomCode;
use crate::server_utils::parse_grid_size_name;
use crate::types::{GridSize, LastMove, PlayerId, ReactionEvent};

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    CreateRoom { grid_size: Option<GridSize> },
    AutoMatch { grid_size: Option<GridSize> },
    JoinRoom { room_code: String },
    Move { row: i64, col: i64 },
    CancelWaiting,
    LeaveRoom,
    RequestRematch,
    DeclineRematch,
    Ping { t: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Waiting {
        message: String,
    },
    RoomCreated {
        #[serde(rename = "roomCode")]
        room_code: RoomCode,
    },
    GameStart {
        #[serde(rename = "roomCode")]
        room_code: RoomCode,
        #[serde(rename = "playerIndex")]
        player_index: PlayerId,
        grid: Grid,
        rows: usize,
        cols: usize,
        #[serde(rename = "currentTurn")]
        current_turn: PlayerId,
    },
    MoveMade {
        grid: Grid,
        #[serde(rename = "currentTurn")]
        current_turn: PlayerId,
        #[serde(rename = "lastMove")]
        last_move: LastMove,
        events: Vec<ReactionEvent>,
    },
    GameOver {
        winner: PlayerId,
    },
    OpponentDisconnected {
        winner: PlayerId,
        #[serde(rename = "playerWhoLeft")]
        player_who_left: PlayerId,
    },
    WaitingCancelled,
    RoomCancelled {
        #[serde(rename = "roomCode")]
        room_code: RoomCode,
    },
    RoomExpired {
        #[serde(rename = "roomCode")]
        room_code: RoomCode,
    },
    RematchRequested {
        player0: bool,
        player1: bool,
    },
    RematchDeclined {
        #[serde(rename = "declinedBy")]
        declined_by: PlayerId,
    },
    Error {
        reason: String,
        message: String,
    },
    Pong {
        t: f64,
    },
}

impl ServerMessage {
    pub fn error(error: &SessionError) -> Self {
        Self::Error {
            reason: error.reason().to_string(),
            message: error.to_string(),
        }
    }
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?.replace('_', "-");

    match message_type.as_str() {
        "create-room" => Some(ParsedClientMessage::CreateRoom {
            grid_size: parse_optional_grid_size(object.get("gridSize"))?,
        }),
        "auto-match" => Some(ParsedClientMessage::AutoMatch {
            grid_size: parse_optional_grid_size(object.get("gridSize"))?,
        }),
        "join-room" => {
            let room_code = object.get("roomCode")?.as_str()?.to_string();
            Some(ParsedClientMessage::JoinRoom { room_code })
        }
        "move" => {
            let row = parse_coordinate(object.get("row").or_else(|| object.get("r")))?;
            let col = parse_coordinate(object.get("col").or_else(|| object.get("c")))?;
            Some(ParsedClientMessage::Move { row, col })
        }
        "cancel-waiting" => Some(ParsedClientMessage::CancelWaiting),
        "leave-room" => Some(ParsedClientMessage::LeaveRoom),
        "request-rematch" | "accept-rematch" => Some(ParsedClientMessage::RequestRematch),
        "decline-rematch" => Some(ParsedClientMessage::DeclineRematch),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_optional_grid_size(value: Option<&Value>) -> Option<Option<GridSize>> {
    let Some(value) = value else {
        return Some(None);
    };
    if value.is_null() {
        return Some(None);
    }
    parse_grid_size_name(value.as_str()?).map(Some)
}

fn parse_coordinate(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(number) = value.as_i64() {
        return Some(number);
    }
    let number = value.as_f64()?;
    if number.is_finite() && number.fract() == 0.0 && number.abs() <= i32::MAX as f64 {
        return Some(number as i64);
    }
    None
}
