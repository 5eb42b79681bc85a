use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::constants::ROOM_PLAYERS;
use crate::engine::ResolveOptions;
use crate::error::{IllegalMoveReason, SessionError};
use crate::game::{Game, MoveOutcome};
use crate::grid::Grid;
use crate::room_code::RoomCode;
use crate::types::{GridSize, LastMove, PlayerId, Position, ReactionEvent, RoomStatus};

const AUTO_MATCH_SCAN: usize = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchState {
    pub player0: bool,
    pub player1: bool,
    pub declined: Option<PlayerId>,
}

impl RematchState {
    fn flag_mut(&mut self, seat: PlayerId) -> &mut bool {
        if seat == 0 {
            &mut self.player0
        } else {
            &mut self.player1
        }
    }

    fn both(&self) -> bool {
        self.player0 && self.player1
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRoom {
    pub host: String,
    pub guest: Option<String>,
    #[serde(rename = "gridSize")]
    pub grid_size: GridSize,
    pub rows: usize,
    pub cols: usize,
    pub grid: Grid,
    #[serde(rename = "currentTurn")]
    pub current_turn: PlayerId,
    pub status: RoomStatus,
    #[serde(rename = "lastMove")]
    pub last_move: Option<LastMove>,
    pub winner: Option<PlayerId>,
    #[serde(rename = "playerWhoLeft")]
    pub player_who_left: Option<PlayerId>,
    pub rematch: RematchState,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: u64,
    #[serde(rename = "updatedAtMs")]
    pub updated_at_ms: u64,
}

impl SharedRoom {
    fn new(host: &str, size: GridSize, now_ms: u64) -> Self {
        let grid = Grid::with_size(size);
        Self {
            host: host.to_string(),
            guest: None,
            grid_size: size,
            rows: grid.rows(),
            cols: grid.cols(),
            grid,
            current_turn: 0,
            status: RoomStatus::Waiting,
            last_move: None,
            winner: None,
            player_who_left: None,
            rematch: RematchState::default(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    fn reset_board(&mut self) {
        self.grid = Grid::new(self.rows, self.cols);
        self.current_turn = 0;
        self.last_move = None;
        self.winner = None;
        self.player_who_left = None;
        self.rematch = RematchState::default();
    }
}

pub trait SharedStore {
    fn get(&self, code: &RoomCode) -> Option<SharedRoom>;
    fn put(&mut self, code: &RoomCode, room: SharedRoom);
    fn remove(&mut self, code: &RoomCode);
    fn waiting_rooms(&self, limit: usize) -> Vec<(RoomCode, SharedRoom)>;

    fn contains(&self, code: &RoomCode) -> bool {
        self.get(code).is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    rooms: BTreeMap<RoomCode, SharedRoom>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl SharedStore for InMemoryStore {
    fn get(&self, code: &RoomCode) -> Option<SharedRoom> {
        self.rooms.get(code).cloned()
    }

    fn put(&mut self, code: &RoomCode, room: SharedRoom) {
        self.rooms.insert(code.clone(), room);
    }

    fn remove(&mut self, code: &RoomCode) {
        self.rooms.remove(code);
    }

    fn waiting_rooms(&self, limit: usize) -> Vec<(RoomCode, SharedRoom)> {
        let mut waiting: Vec<(RoomCode, SharedRoom)> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.status == RoomStatus::Waiting)
            .map(|(code, room)| (code.clone(), room.clone()))
            .collect();
        waiting.sort_by_key(|(code, room)| (room.created_at_ms, code.clone()));
        waiting.truncate(limit);
        waiting
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    OpponentJoined,
    OpponentMoved {
        last_move: LastMove,
        events: Vec<ReactionEvent>,
    },
    GridAdopted,
    GameOver {
        winner: PlayerId,
    },
    OpponentLeft {
        winner: PlayerId,
        player_who_left: PlayerId,
    },
    OpponentLeftWaiting,
    RematchRequested {
        player0: bool,
        player1: bool,
    },
    RematchDeclined {
        declined_by: PlayerId,
    },
    RematchStarted,
    RoomCancelled,
}

#[derive(Clone, Debug)]
struct PeerSession {
    code: RoomCode,
    seat: PlayerId,
    game: Game,
    status: RoomStatus,
    rematch: RematchState,
}

impl PeerSession {
    fn new(code: RoomCode, seat: PlayerId, room: &SharedRoom) -> Self {
        Self {
            code,
            seat,
            game: Game::with_grid(
                Grid::new(room.rows, room.cols),
                ROOM_PLAYERS,
                ResolveOptions::interactive(),
            ),
            status: room.status,
            rematch: room.rematch,
        }
    }
}

pub struct PeerClient {
    user_id: Option<String>,
    rng: StdRng,
    session: Option<PeerSession>,
}

impl PeerClient {
    pub fn new(user_id: Option<String>) -> Self {
        Self::with_rng(user_id, StdRng::from_os_rng())
    }

    pub fn with_seed(user_id: Option<String>, seed: u64) -> Self {
        Self::with_rng(user_id, StdRng::seed_from_u64(seed))
    }

    fn with_rng(user_id: Option<String>, rng: StdRng) -> Self {
        Self {
            user_id,
            rng,
            session: None,
        }
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        self.session.as_ref().map(|session| &session.code)
    }

    pub fn seat(&self) -> Option<PlayerId> {
        self.session.as_ref().map(|session| session.seat)
    }

    pub fn game(&self) -> Option<&Game> {
        self.session.as_ref().map(|session| &session.game)
    }

    pub fn create_room<S: SharedStore>(
        &mut self,
        store: &mut S,
        size: GridSize,
        now_ms: u64,
    ) -> Result<RoomCode, SessionError> {
        let user_id = self.identity()?.to_string();
        self.ensure_free()?;

        let code = RoomCode::generate_unique(&mut self.rng, |candidate| store.contains(candidate));
        let room = SharedRoom::new(&user_id, size, now_ms);
        self.session = Some(PeerSession::new(code.clone(), 0, &room));
        store.put(&code, room);
        info!(room = %code, user = %user_id, "shared room created");
        Ok(code)
    }

    pub fn join_room<S: SharedStore>(
        &mut self,
        store: &mut S,
        raw_code: &str,
        now_ms: u64,
    ) -> Result<RoomCode, SessionError> {
        let user_id = self.identity()?.to_string();
        self.ensure_free()?;
        let code = RoomCode::parse(raw_code)
            .map_err(|_| SessionError::RoomNotFound(raw_code.trim().to_ascii_uppercase()))?;
        let mut room = store
            .get(&code)
            .ok_or_else(|| SessionError::RoomNotFound(code.to_string()))?;

        if room.status != RoomStatus::Waiting {
            if room.guest.is_some() {
                return Err(SessionError::RoomFull(code.to_string()));
            }
            return Err(SessionError::GameNotActive);
        }
        if room.host == user_id {
            return Err(SessionError::AlreadyInSession);
        }

        room.guest = Some(user_id.clone());
        room.status = RoomStatus::Playing;
        room.reset_board();
        room.updated_at_ms = now_ms;
        self.session = Some(PeerSession::new(code.clone(), 1, &room));
        store.put(&code, room);
        info!(room = %code, user = %user_id, "joined shared room");
        Ok(code)
    }

    pub fn auto_match<S: SharedStore>(
        &mut self,
        store: &mut S,
        size: GridSize,
        now_ms: u64,
    ) -> Result<RoomCode, SessionError> {
        let user_id = self.identity()?.to_string();
        self.ensure_free()?;

        let candidate = store
            .waiting_rooms(AUTO_MATCH_SCAN)
            .into_iter()
            .find(|(_, room)| room.host != user_id);
        match candidate {
            Some((code, _)) => self.join_room(store, code.as_str(), now_ms),
            None => self.create_room(store, size, now_ms),
        }
    }

    pub fn local_move<S: SharedStore>(
        &mut self,
        store: &mut S,
        row: i64,
        col: i64,
        now_ms: u64,
    ) -> Result<MoveOutcome, SessionError> {
        self.identity()?;
        let session = self.session.as_mut().ok_or(SessionError::NotInRoom)?;
        let mut room = store
            .get(&session.code)
            .ok_or_else(|| SessionError::RoomNotFound(session.code.to_string()))?;
        if room.status != RoomStatus::Playing {
            return Err(SessionError::GameNotActive);
        }
        if room.current_turn != session.seat {
            return Err(IllegalMoveReason::NotYourTurn.into());
        }
        let pos = Position::from_signed(row, col).ok_or(IllegalMoveReason::OutOfBounds)?;
        let outcome = session.game.apply_move(session.seat, pos)?;
        if outcome.exhausted {
            error!(
                room = %session.code,
                row = pos.row,
                col = pos.col,
                "chain reaction hit the iteration cap; board left unresolved"
            );
        }

        room.grid = session.game.grid().clone();
        room.current_turn = (session.seat + 1) % ROOM_PLAYERS;
        room.last_move = Some(LastMove {
            row: pos.row,
            col: pos.col,
            player: session.seat,
        });
        room.updated_at_ms = now_ms;
        if let Some(winner) = outcome.winner {
            room.status = RoomStatus::Finished;
            room.winner = Some(winner);
            session.status = RoomStatus::Finished;
        }
        store.put(&session.code, room);
        Ok(outcome)
    }

    pub fn report_game_over<S: SharedStore>(
        &mut self,
        store: &mut S,
        winner: PlayerId,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        self.identity()?;
        let session = self.session.as_mut().ok_or(SessionError::NotInRoom)?;
        let mut room = store
            .get(&session.code)
            .ok_or_else(|| SessionError::RoomNotFound(session.code.to_string()))?;
        room.status = RoomStatus::Finished;
        room.winner = Some(winner);
        room.updated_at_ms = now_ms;
        session.status = RoomStatus::Finished;
        session.game.declare_winner(winner);
        store.put(&session.code, room);
        Ok(())
    }

    pub fn request_rematch<S: SharedStore>(
        &mut self,
        store: &mut S,
        now_ms: u64,
    ) -> Result<bool, SessionError> {
        self.identity()?;
        let session = self.session.as_mut().ok_or(SessionError::NotInRoom)?;
        let mut room = store
            .get(&session.code)
            .ok_or_else(|| SessionError::RoomNotFound(session.code.to_string()))?;
        if room.status != RoomStatus::Finished {
            return Err(SessionError::GameNotActive);
        }

        room.rematch.declined = None;
        *room.rematch.flag_mut(session.seat) = true;
        room.updated_at_ms = now_ms;
        let started = room.rematch.both();
        if started {
            room.reset_board();
            room.status = RoomStatus::Playing;
            session.game.reset();
            session.status = RoomStatus::Playing;
            info!(room = %session.code, "shared rematch started");
        }
        session.rematch = room.rematch;
        store.put(&session.code, room);
        Ok(started)
    }

    pub fn decline_rematch<S: SharedStore>(
        &mut self,
        store: &mut S,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        self.identity()?;
        let session = self.session.as_mut().ok_or(SessionError::NotInRoom)?;
        let mut room = store
            .get(&session.code)
            .ok_or_else(|| SessionError::RoomNotFound(session.code.to_string()))?;
        if room.status != RoomStatus::Finished {
            return Err(SessionError::GameNotActive);
        }

        room.rematch = RematchState {
            player0: false,
            player1: false,
            declined: Some(session.seat),
        };
        room.updated_at_ms = now_ms;
        session.rematch = room.rematch;
        store.put(&session.code, room);
        Ok(())
    }

    pub fn leave<S: SharedStore>(&mut self, store: &mut S, now_ms: u64) -> Result<(), SessionError> {
        self.identity()?;
        let session = self.session.take().ok_or(SessionError::NotInRoom)?;
        let Some(mut room) = store.get(&session.code) else {
            return Ok(());
        };

        match room.status {
            RoomStatus::Playing => {
                room.status = RoomStatus::PlayerLeft;
                room.player_who_left = Some(session.seat);
                room.winner = Some((session.seat + 1) % ROOM_PLAYERS);
            }
            _ if session.seat == 0 => {
                room.status = RoomStatus::Cancelled;
            }
            _ => {
                room.guest = None;
                room.status = RoomStatus::Waiting;
                room.reset_board();
            }
        }
        room.updated_at_ms = now_ms;
        info!(room = %session.code, seat = session.seat, status = ?room.status, "left shared room");
        store.put(&session.code, room);
        Ok(())
    }

    pub fn on_remote_update(&mut self, snapshot: Option<&SharedRoom>) -> Vec<PeerEvent> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let Some(room) = snapshot else {
            self.session = None;
            return vec![PeerEvent::RoomCancelled];
        };

        let mut events = Vec::new();
        let previous = session.status;
        session.status = room.status;

        match room.status {
            RoomStatus::Cancelled => {
                self.session = None;
                return vec![PeerEvent::RoomCancelled];
            }
            RoomStatus::Waiting => {
                if previous != RoomStatus::Waiting {
                    session.game.reset();
                    events.push(PeerEvent::OpponentLeftWaiting);
                }
            }
            RoomStatus::Playing => {
                if previous == RoomStatus::Waiting {
                    events.push(PeerEvent::OpponentJoined);
                } else if previous == RoomStatus::Finished {
                    session.game.reset();
                    events.push(PeerEvent::RematchStarted);
                }
                sync_board(session, room, &mut events);
            }
            RoomStatus::Finished => {
                if previous == RoomStatus::Playing {
                    sync_board(session, room, &mut events);
                }
                if let Some(winner) = room.winner {
                    session.game.declare_winner(winner);
                    if previous != RoomStatus::Finished {
                        events.push(PeerEvent::GameOver { winner });
                    }
                }
            }
            RoomStatus::PlayerLeft => {
                if let Some(winner) = room.winner {
                    session.game.declare_winner(winner);
                    if previous != RoomStatus::PlayerLeft {
                        events.push(PeerEvent::OpponentLeft {
                            winner,
                            player_who_left: room
                                .player_who_left
                                .unwrap_or((winner + 1) % ROOM_PLAYERS),
                        });
                    }
                }
            }
        }

        if room.rematch != session.rematch {
            session.rematch = room.rematch;
            if let Some(declined_by) = room.rematch.declined {
                events.push(PeerEvent::RematchDeclined { declined_by });
            } else if room.status == RoomStatus::Finished
                && (room.rematch.player0 || room.rematch.player1)
            {
                events.push(PeerEvent::RematchRequested {
                    player0: room.rematch.player0,
                    player1: room.rematch.player1,
                });
            }
        }
        events
    }

    fn identity(&self) -> Result<&str, SessionError> {
        self.user_id
            .as_deref()
            .ok_or(SessionError::AuthenticationFailed)
    }

    fn ensure_free(&self) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyInSession);
        }
        Ok(())
    }
}

fn sync_board(session: &mut PeerSession, room: &SharedRoom, events: &mut Vec<PeerEvent>) {
    let pending = room.last_move.filter(|last| {
        last.player != session.seat && session.game.current_turn() == Some(last.player)
    });

    if let Some(last) = pending {
        match session
            .game
            .apply_move(last.player, Position::new(last.row, last.col))
        {
            Ok(outcome) => {
                if outcome.exhausted {
                    error!(room = %session.code, "replayed chain reaction hit the iteration cap");
                }
                events.push(PeerEvent::OpponentMoved {
                    last_move: last,
                    events: outcome.events,
                });
            }
            Err(reason) => {
                debug!(room = %session.code, %reason, "last move could not be replayed");
            }
        }
    }

    if *session.game.grid() != room.grid {
        let local = session.game.grid();
        if !room.grid.is_well_formed()
            || room.grid.rows() != local.rows()
            || room.grid.cols() != local.cols()
        {
            warn!(
                room = %session.code,
                rows = room.grid.rows(),
                cols = room.grid.cols(),
                "published board is malformed; keeping local board"
            );
        } else {
            if pending.is_some() {
                warn!(room = %session.code, "replayed board diverged from published board");
            }
            session.game.adopt_grid(room.grid.clone());
            events.push(PeerEvent::GridAdopted);
        }
    }
    if room.status == RoomStatus::Playing {
        session.game.set_turn(room.current_turn);
    }
}
