use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum IllegalMoveReason {
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("cell is outside the board")]
    OutOfBounds,
    #[error("cell is owned by another player")]
    CellOwnedByOpponent,
    #[error("the game is already over")]
    GameOver,
    #[error("player is not part of this game")]
    PlayerOutOfRange,
}

impl IllegalMoveReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotYourTurn => "not_your_turn",
            Self::OutOfBounds => "out_of_bounds",
            Self::CellOwnedByOpponent => "cell_owned_by_opponent",
            Self::GameOver => "game_over",
            Self::PlayerOutOfRange => "player_out_of_range",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("illegal move: {0}")]
    IllegalMove(#[from] IllegalMoveReason),
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("room {0} is full")]
    RoomFull(String),
    #[error("game is not active")]
    GameNotActive,
    #[error("already in a session")]
    AlreadyInSession,
    #[error("not in a room")]
    NotInRoom,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("room {0} expired due to inactivity")]
    StaleRoomExpired(String),
    #[error("invalid message")]
    InvalidMessage,
}

impl SessionError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::IllegalMove(reason) => reason.code(),
            Self::RoomNotFound(_) => "room_not_found",
            Self::RoomFull(_) => "room_full",
            Self::GameNotActive => "game_not_active",
            Self::AlreadyInSession => "already_in_session",
            Self::NotInRoom => "not_in_room",
            Self::AuthenticationFailed => "authentication_failed",
            Self::StaleRoomExpired(_) => "stale_room_expired",
            Self::InvalidMessage => "invalid_message",
        }
    }
}
