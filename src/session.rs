use std::collections::{HashMap, HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::constants::{EXPIRED_CODE_MEMORY, ROOM_PLAYERS, STALE_ROOM_MS};
use crate::engine::ResolveOptions;
use crate::error::{IllegalMoveReason, SessionError};
use crate::game::Game;
use crate::grid::Grid;
use crate::room_code::RoomCode;
use crate::server_protocol::ServerMessage;
use crate::types::{ConnectionId, GridSize, LastMove, PlayerId, Position, RoomStatus};

const WAITING_FOR_OPPONENT: &str = "Finding opponent...";
const OPPONENT_LEFT_WAITING: &str = "Opponent left. Waiting for a new opponent...";

#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    pub stale_after_ms: u64,
    pub expired_memory: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stale_after_ms: STALE_ROOM_MS,
            expired_memory: EXPIRED_CODE_MEMORY,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub to: ConnectionId,
    pub message: ServerMessage,
}

impl Dispatch {
    fn new(to: &str, message: ServerMessage) -> Self {
        Self {
            to: to.to_string(),
            message,
        }
    }
}

pub type SessionResult = Result<Vec<Dispatch>, SessionError>;

#[derive(Clone, Debug)]
pub struct Room {
    code: RoomCode,
    players: Vec<ConnectionId>,
    game: Game,
    size: GridSize,
    status: RoomStatus,
    public: bool,
    created_at_ms: u64,
    last_activity_ms: u64,
    rematch: [bool; ROOM_PLAYERS],
}

impl Room {
    fn new(code: RoomCode, creator: &str, size: GridSize, public: bool, now_ms: u64) -> Self {
        Self {
            code,
            players: vec![creator.to_string()],
            game: Game::with_grid(
                Grid::with_size(size),
                ROOM_PLAYERS,
                ResolveOptions::authoritative(),
            ),
            size,
            status: RoomStatus::Waiting,
            public,
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
            rematch: [false; ROOM_PLAYERS],
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn players(&self) -> &[ConnectionId] {
        &self.players
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn grid(&self) -> &Grid {
        self.game.grid()
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn rematch_flags(&self) -> [bool; ROOM_PLAYERS] {
        self.rematch
    }

    pub fn seat_of(&self, connection: &str) -> Option<PlayerId> {
        self.players.iter().position(|id| id == connection)
    }

    fn broadcast(&self, message: ServerMessage) -> Vec<Dispatch> {
        self.players
            .iter()
            .map(|id| Dispatch::new(id, message.clone()))
            .collect()
    }

    fn game_start_dispatches(&self) -> Vec<Dispatch> {
        let grid = self.game.grid();
        let current_turn = self.game.current_turn().unwrap_or(0);
        self.players
            .iter()
            .enumerate()
            .map(|(seat, id)| {
                Dispatch::new(
                    id,
                    ServerMessage::GameStart {
                        room_code: self.code.clone(),
                        player_index: seat,
                        grid: grid.clone(),
                        rows: grid.rows(),
                        cols: grid.cols(),
                        current_turn,
                    },
                )
            })
            .collect()
    }

    fn restart(&mut self, now_ms: u64) {
        self.game.reset();
        self.rematch = [false; ROOM_PLAYERS];
        self.status = RoomStatus::Playing;
        self.last_activity_ms = now_ms;
    }
}

pub struct SessionCoordinator {
    options: SessionOptions,
    rooms: HashMap<RoomCode, Room>,
    room_by_connection: HashMap<ConnectionId, RoomCode>,
    match_queue: VecDeque<RoomCode>,
    connected: HashSet<ConnectionId>,
    expired: VecDeque<RoomCode>,
    rng: StdRng,
}

impl SessionCoordinator {
    pub fn new(options: SessionOptions) -> Self {
        Self::with_rng(options, StdRng::from_os_rng())
    }

    pub fn with_seed(options: SessionOptions, seed: u64) -> Self {
        Self::with_rng(options, StdRng::seed_from_u64(seed))
    }

    fn with_rng(options: SessionOptions, rng: StdRng) -> Self {
        Self {
            options,
            rooms: HashMap::new(),
            room_by_connection: HashMap::new(),
            match_queue: VecDeque::new(),
            connected: HashSet::new(),
            expired: VecDeque::new(),
            rng,
        }
    }

    pub fn room(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn room_of(&self, connection: &str) -> Option<&RoomCode> {
        self.room_by_connection.get(connection)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn queue_len(&self) -> usize {
        self.match_queue.len()
    }

    pub fn is_connected(&self, connection: &str) -> bool {
        self.connected.contains(connection)
    }

    pub fn connect(&mut self, connection: &str) {
        self.connected.insert(connection.to_string());
        debug!(connection, "connection registered");
    }

    pub fn disconnect(&mut self, connection: &str, now_ms: u64) -> Vec<Dispatch> {
        self.connected.remove(connection);
        if !self.room_by_connection.contains_key(connection) {
            return Vec::new();
        }
        match self.leave_room(connection, now_ms) {
            Ok(dispatches) => dispatches,
            Err(error) => {
                warn!(connection, %error, "leave on disconnect failed");
                Vec::new()
            }
        }
    }

    pub fn create_room(&mut self, connection: &str, size: GridSize, now_ms: u64) -> SessionResult {
        self.ensure_free(connection)?;
        let code = self.open_room(connection, size, false, now_ms);
        info!(room = %code, connection, "private room created");
        Ok(vec![Dispatch::new(
            connection,
            ServerMessage::RoomCreated { room_code: code },
        )])
    }

    pub fn auto_match(&mut self, connection: &str, size: GridSize, now_ms: u64) -> SessionResult {
        self.ensure_free(connection)?;

        while let Some(code) = self.match_queue.pop_front() {
            let pairable = self.rooms.get(&code).is_some_and(|room| {
                room.status == RoomStatus::Waiting
                    && room.players.len() == 1
                    && self.connected.contains(&room.players[0])
            });
            if pairable {
                info!(room = %code, connection, "auto-match paired");
                return Ok(self.seat_joiner(&code, connection, now_ms));
            }
            debug!(room = %code, "dropping stale queue entry");
        }

        let code = self.open_room(connection, size, true, now_ms);
        self.match_queue.push_back(code.clone());
        info!(room = %code, connection, "auto-match enqueued");
        Ok(vec![Dispatch::new(
            connection,
            ServerMessage::Waiting {
                message: WAITING_FOR_OPPONENT.to_string(),
            },
        )])
    }

    pub fn join_room(&mut self, connection: &str, raw_code: &str, now_ms: u64) -> SessionResult {
        self.ensure_free(connection)?;
        let code = RoomCode::parse(raw_code)
            .map_err(|_| SessionError::RoomNotFound(raw_code.trim().to_ascii_uppercase()))?;

        let Some(room) = self.rooms.get(&code) else {
            if self.expired.contains(&code) {
                return Err(SessionError::StaleRoomExpired(code.to_string()));
            }
            return Err(SessionError::RoomNotFound(code.to_string()));
        };
        if room.players.len() >= ROOM_PLAYERS {
            return Err(SessionError::RoomFull(code.to_string()));
        }
        if room.status != RoomStatus::Waiting {
            return Err(SessionError::GameNotActive);
        }

        info!(room = %code, connection, "joined by code");
        Ok(self.seat_joiner(&code, connection, now_ms))
    }

    pub fn cancel_waiting(&mut self, connection: &str, now_ms: u64) -> SessionResult {
        let code = self.code_of(connection)?;
        let room = self.room_ref(&code)?;
        if room.status != RoomStatus::Waiting || room.seat_of(connection) != Some(0) {
            return Err(SessionError::GameNotActive);
        }

        self.remove_room(&code);
        info!(room = %code, connection, now_ms, "waiting cancelled");
        Ok(vec![Dispatch::new(connection, ServerMessage::WaitingCancelled)])
    }

    pub fn submit_move(
        &mut self,
        connection: &str,
        row: i64,
        col: i64,
        now_ms: u64,
    ) -> SessionResult {
        let code = self.code_of(connection)?;
        let room = self.room_mut(&code)?;
        if room.status != RoomStatus::Playing {
            return Err(SessionError::GameNotActive);
        }
        let Some(seat) = room.seat_of(connection) else {
            return Err(SessionError::NotInRoom);
        };
        if room.game.current_turn() != Some(seat) {
            return Err(IllegalMoveReason::NotYourTurn.into());
        }
        let pos = Position::from_signed(row, col).ok_or(IllegalMoveReason::OutOfBounds)?;
        let outcome = room.game.apply_move(seat, pos)?;

        if outcome.exhausted {
            error!(
                room = %code,
                row = pos.row,
                col = pos.col,
                rounds = outcome.rounds,
                "chain reaction hit the iteration cap; board left unresolved"
            );
        }
        room.last_activity_ms = now_ms;

        let mut dispatches = room.broadcast(ServerMessage::MoveMade {
            grid: room.game.grid().clone(),
            current_turn: (seat + 1) % ROOM_PLAYERS,
            last_move: LastMove {
                row: pos.row,
                col: pos.col,
                player: seat,
            },
            events: outcome.events,
        });

        if let Some(winner) = outcome.winner {
            room.status = RoomStatus::Finished;
            room.rematch = [false; ROOM_PLAYERS];
            info!(room = %code, winner, "game finished");
            dispatches.extend(room.broadcast(ServerMessage::GameOver { winner }));
        }
        Ok(dispatches)
    }

    pub fn leave_room(&mut self, connection: &str, now_ms: u64) -> SessionResult {
        let code = self.code_of(connection)?;
        let room = self.room_ref(&code)?;
        let Some(seat) = room.seat_of(connection) else {
            self.room_by_connection.remove(connection);
            return Err(SessionError::NotInRoom);
        };

        let status = room.status;
        match status {
            RoomStatus::Playing => Ok(self.forfeit(&code, connection, seat, now_ms)),
            RoomStatus::Waiting | RoomStatus::Finished if seat == 0 => {
                let dispatches: Vec<Dispatch> = room
                    .players
                    .iter()
                    .filter(|id| id.as_str() != connection)
                    .map(|id| {
                        Dispatch::new(
                            id,
                            ServerMessage::RoomCancelled {
                                room_code: code.clone(),
                            },
                        )
                    })
                    .collect();
                self.remove_room(&code);
                info!(room = %code, connection, "creator left; room cancelled");
                Ok(dispatches)
            }
            RoomStatus::Waiting | RoomStatus::Finished => Ok(self.reopen(&code, connection, now_ms)),
            RoomStatus::PlayerLeft | RoomStatus::Cancelled => {
                self.room_by_connection.remove(connection);
                let empty = self.rooms.get_mut(&code).is_some_and(|room| {
                    room.players.retain(|id| id != connection);
                    room.players.is_empty()
                });
                if empty {
                    self.remove_room(&code);
                }
                Ok(Vec::new())
            }
        }
    }

    pub fn request_rematch(&mut self, connection: &str, now_ms: u64) -> SessionResult {
        let code = self.code_of(connection)?;
        let room = self.room_mut(&code)?;
        let seat = finished_seat(room, connection)?;

        room.rematch[seat] = true;
        room.last_activity_ms = now_ms;
        if room.rematch.iter().all(|flag| *flag) {
            room.restart(now_ms);
            info!(room = %code, "rematch started");
            return Ok(room.game_start_dispatches());
        }

        Ok(room.broadcast(ServerMessage::RematchRequested {
            player0: room.rematch[0],
            player1: room.rematch[1],
        }))
    }

    pub fn decline_rematch(&mut self, connection: &str, now_ms: u64) -> SessionResult {
        let code = self.code_of(connection)?;
        let room = self.room_mut(&code)?;
        let seat = finished_seat(room, connection)?;

        room.rematch = [false; ROOM_PLAYERS];
        room.last_activity_ms = now_ms;
        info!(room = %code, declined_by = seat, "rematch declined");
        Ok(room.broadcast(ServerMessage::RematchDeclined { declined_by: seat }))
    }

    pub fn sweep_stale(&mut self, now_ms: u64) -> Vec<Dispatch> {
        let stale_after_ms = self.options.stale_after_ms;
        let mut stale: Vec<RoomCode> = self
            .rooms
            .values()
            .filter(|room| now_ms.saturating_sub(room.last_activity_ms) > stale_after_ms)
            .map(|room| room.code.clone())
            .collect();
        stale.sort();

        let mut dispatches = Vec::new();
        for code in stale {
            if let Some(room) = self.rooms.get(&code) {
                dispatches.extend(room.broadcast(ServerMessage::RoomExpired {
                    room_code: code.clone(),
                }));
                info!(
                    room = %code,
                    idle_ms = now_ms.saturating_sub(room.last_activity_ms),
                    "stale room expired"
                );
            }
            self.remove_room(&code);
            self.remember_expired(code);
        }
        dispatches
    }

    fn ensure_free(&self, connection: &str) -> Result<(), SessionError> {
        if self.room_by_connection.contains_key(connection) {
            return Err(SessionError::AlreadyInSession);
        }
        Ok(())
    }

    fn code_of(&self, connection: &str) -> Result<RoomCode, SessionError> {
        self.room_by_connection
            .get(connection)
            .cloned()
            .ok_or(SessionError::NotInRoom)
    }

    fn room_ref(&self, code: &RoomCode) -> Result<&Room, SessionError> {
        self.rooms
            .get(code)
            .ok_or_else(|| SessionError::RoomNotFound(code.to_string()))
    }

    fn room_mut(&mut self, code: &RoomCode) -> Result<&mut Room, SessionError> {
        self.rooms
            .get_mut(code)
            .ok_or_else(|| SessionError::RoomNotFound(code.to_string()))
    }

    fn open_room(&mut self, connection: &str, size: GridSize, public: bool, now_ms: u64) -> RoomCode {
        let rooms = &self.rooms;
        let code = RoomCode::generate_unique(&mut self.rng, |candidate| rooms.contains_key(candidate));
        self.rooms.insert(
            code.clone(),
            Room::new(code.clone(), connection, size, public, now_ms),
        );
        self.room_by_connection
            .insert(connection.to_string(), code.clone());
        code
    }

    fn seat_joiner(&mut self, code: &RoomCode, connection: &str, now_ms: u64) -> Vec<Dispatch> {
        self.match_queue.retain(|queued| queued != code);
        self.room_by_connection
            .insert(connection.to_string(), code.clone());
        let Some(room) = self.rooms.get_mut(code) else {
            return Vec::new();
        };
        room.players.push(connection.to_string());
        room.restart(now_ms);
        room.game_start_dispatches()
    }

    fn forfeit(&mut self, code: &RoomCode, connection: &str, seat: PlayerId, now_ms: u64) -> Vec<Dispatch> {
        self.room_by_connection.remove(connection);
        let Some(room) = self.rooms.get_mut(code) else {
            return Vec::new();
        };
        let winner = (seat + 1) % ROOM_PLAYERS;
        room.status = RoomStatus::PlayerLeft;
        room.game.declare_winner(winner);
        room.rematch = [false; ROOM_PLAYERS];
        room.last_activity_ms = now_ms;
        room.players.retain(|id| id != connection);
        info!(room = %code, connection, winner, "player left mid-game");

        let dispatches = room.broadcast(ServerMessage::OpponentDisconnected {
            winner,
            player_who_left: seat,
        });
        if room.players.is_empty() {
            self.remove_room(code);
        }
        dispatches
    }

    fn reopen(&mut self, code: &RoomCode, connection: &str, now_ms: u64) -> Vec<Dispatch> {
        self.room_by_connection.remove(connection);
        let Some(room) = self.rooms.get_mut(code) else {
            return Vec::new();
        };
        room.players.retain(|id| id != connection);
        room.game.reset();
        room.rematch = [false; ROOM_PLAYERS];
        room.status = RoomStatus::Waiting;
        room.last_activity_ms = now_ms;
        let public = room.public;
        let dispatches = room.broadcast(ServerMessage::Waiting {
            message: OPPONENT_LEFT_WAITING.to_string(),
        });
        if public && !self.match_queue.contains(code) {
            self.match_queue.push_back(code.clone());
        }
        info!(room = %code, connection, "joiner left; room reopened");
        dispatches
    }

    fn remove_room(&mut self, code: &RoomCode) {
        if let Some(room) = self.rooms.remove(code) {
            for id in &room.players {
                if self.room_by_connection.get(id) == Some(code) {
                    self.room_by_connection.remove(id);
                }
            }
        }
        self.match_queue.retain(|queued| queued != code);
    }

    fn remember_expired(&mut self, code: RoomCode) {
        if self.options.expired_memory == 0 {
            return;
        }
        while self.expired.len() >= self.options.expired_memory {
            self.expired.pop_front();
        }
        self.expired.push_back(code);
    }
}

fn finished_seat(room: &Room, connection: &str) -> Result<PlayerId, SessionError> {
    if room.status != RoomStatus::Finished {
        return Err(SessionError::GameNotActive);
    }
    room.seat_of(connection).ok_or(SessionError::NotInRoom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> SessionCoordinator {
        let mut coordinator = SessionCoordinator::with_seed(SessionOptions::default(), 42);
        for id in ["a", "b", "c"] {
            coordinator.connect(id);
        }
        coordinator
    }

    fn created_code(dispatches: &[Dispatch]) -> RoomCode {
        match &dispatches[0].message {
            ServerMessage::RoomCreated { room_code } => room_code.clone(),
            other => panic!("expected room-created, got {other:?}"),
        }
    }

    fn start_private(coordinator: &mut SessionCoordinator) -> RoomCode {
        let created = coordinator
            .create_room("a", GridSize::Small, 0)
            .expect("room should be created");
        let code = created_code(&created);
        coordinator
            .join_room("b", code.as_str(), 10)
            .expect("join should succeed");
        code
    }

    fn play(coordinator: &mut SessionCoordinator, who: &str, row: i64, col: i64) -> Vec<Dispatch> {
        coordinator
            .submit_move(who, row, col, 20)
            .expect("move should be accepted")
    }

    // a's second orb on (0,0) explodes into b's loaded (1,0) and takes it.
    fn play_to_win(coordinator: &mut SessionCoordinator) -> Vec<Dispatch> {
        play(coordinator, "a", 0, 0);
        play(coordinator, "b", 1, 0);
        play(coordinator, "a", 5, 3);
        play(coordinator, "b", 1, 0);
        play(coordinator, "a", 0, 0)
    }

    #[test]
    fn private_room_lifecycle_starts_game_for_both_seats() {
        let mut coordinator = coordinator();
        let created = coordinator
            .create_room("a", GridSize::Small, 0)
            .expect("room should be created");
        let code = created_code(&created);
        assert_eq!(
            coordinator.room(&code).map(Room::status),
            Some(RoomStatus::Waiting)
        );

        let started = coordinator
            .join_room("b", &code.as_str().to_ascii_lowercase(), 5)
            .expect("join should succeed");
        assert_eq!(started.len(), 2);
        for (dispatch, (who, seat)) in started.iter().zip([("a", 0), ("b", 1)]) {
            assert_eq!(dispatch.to, who);
            match &dispatch.message {
                ServerMessage::GameStart {
                    player_index,
                    rows,
                    cols,
                    current_turn,
                    ..
                } => {
                    assert_eq!(*player_index, seat);
                    assert_eq!((*rows, *cols), (6, 4));
                    assert_eq!(*current_turn, 0);
                }
                other => panic!("expected game-start, got {other:?}"),
            }
        }
        assert_eq!(
            coordinator.room(&code).map(Room::status),
            Some(RoomStatus::Playing)
        );
    }

    #[test]
    fn join_errors_are_distinct() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);

        assert_eq!(
            coordinator.join_room("c", code.as_str(), 20),
            Err(SessionError::RoomFull(code.to_string()))
        );
        assert_eq!(
            coordinator.join_room("c", "ZZZZ", 20),
            Err(SessionError::RoomNotFound("ZZZZ".to_string()))
        );
        assert_eq!(
            coordinator.join_room("c", "??", 20),
            Err(SessionError::RoomNotFound("??".to_string()))
        );
        assert_eq!(
            coordinator.join_room("a", code.as_str(), 20),
            Err(SessionError::AlreadyInSession)
        );
        assert_eq!(
            coordinator.create_room("b", GridSize::Small, 20),
            Err(SessionError::AlreadyInSession)
        );
    }

    #[test]
    fn moves_are_validated_before_any_mutation() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);
        play(&mut coordinator, "a", 2, 2);
        let before = coordinator.room(&code).map(|room| room.grid().clone());

        assert_eq!(
            coordinator.submit_move("a", 1, 1, 30),
            Err(SessionError::IllegalMove(IllegalMoveReason::NotYourTurn))
        );
        assert_eq!(
            coordinator.submit_move("b", 2, 2, 30),
            Err(SessionError::IllegalMove(
                IllegalMoveReason::CellOwnedByOpponent
            ))
        );
        assert_eq!(
            coordinator.submit_move("b", -1, 0, 30),
            Err(SessionError::IllegalMove(IllegalMoveReason::OutOfBounds))
        );
        assert_eq!(
            coordinator.submit_move("c", 0, 0, 30),
            Err(SessionError::NotInRoom)
        );
        assert_eq!(coordinator.room(&code).map(|room| room.grid().clone()), before);
        assert_eq!(
            coordinator.room(&code).and_then(|room| room.game().current_turn()),
            Some(1)
        );
    }

    #[test]
    fn waiting_room_rejects_moves() {
        let mut coordinator = coordinator();
        coordinator
            .create_room("a", GridSize::Small, 0)
            .expect("room should be created");
        assert_eq!(
            coordinator.submit_move("a", 0, 0, 1),
            Err(SessionError::GameNotActive)
        );
    }

    #[test]
    fn accepted_move_broadcasts_grid_turn_and_last_move() {
        let mut coordinator = coordinator();
        start_private(&mut coordinator);
        let dispatches = play(&mut coordinator, "a", 0, 0);
        assert_eq!(dispatches.len(), 2);
        match &dispatches[1].message {
            ServerMessage::MoveMade {
                grid,
                current_turn,
                last_move,
                ..
            } => {
                assert_eq!(*current_turn, 1);
                assert_eq!(
                    *last_move,
                    LastMove {
                        row: 0,
                        col: 0,
                        player: 0
                    }
                );
                assert_eq!(
                    grid.cell(Position::new(0, 0)).map(|c| (c.count, c.owner)),
                    Some((1, Some(0)))
                );
            }
            other => panic!("expected move-made, got {other:?}"),
        }
    }

    #[test]
    fn winning_move_finishes_room_and_announces_winner() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);
        let dispatches = play_to_win(&mut coordinator);

        let winners: Vec<PlayerId> = dispatches
            .iter()
            .filter_map(|dispatch| match dispatch.message {
                ServerMessage::GameOver { winner } => Some(winner),
                _ => None,
            })
            .collect();
        assert_eq!(winners, vec![0, 0]);
        assert_eq!(
            coordinator.room(&code).map(Room::status),
            Some(RoomStatus::Finished)
        );
        assert_eq!(
            coordinator.submit_move("b", 3, 3, 40),
            Err(SessionError::GameNotActive)
        );
    }

    #[test]
    fn rematch_requires_both_seats_and_resets_board() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);
        play_to_win(&mut coordinator);

        let first = coordinator
            .request_rematch("b", 50)
            .expect("request should be accepted");
        assert!(first.iter().all(|dispatch| dispatch.message
            == ServerMessage::RematchRequested {
                player0: false,
                player1: true
            }));

        let second = coordinator
            .request_rematch("a", 60)
            .expect("request should be accepted");
        assert!(second
            .iter()
            .all(|dispatch| matches!(dispatch.message, ServerMessage::GameStart { .. })));
        let room = coordinator.room(&code).expect("room should exist");
        assert_eq!(room.status(), RoomStatus::Playing);
        assert!(room.grid().is_empty());
        assert_eq!(room.game().current_turn(), Some(0));
        assert_eq!(room.rematch_flags(), [false, false]);
    }

    #[test]
    fn decline_clears_requests_and_next_request_starts_fresh() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);
        play_to_win(&mut coordinator);

        coordinator
            .request_rematch("a", 50)
            .expect("request should be accepted");
        let declined = coordinator
            .decline_rematch("b", 55)
            .expect("decline should be accepted");
        assert!(declined
            .iter()
            .all(|dispatch| dispatch.message == ServerMessage::RematchDeclined { declined_by: 1 }));
        assert_eq!(
            coordinator.room(&code).map(Room::rematch_flags),
            Some([false, false])
        );

        let again = coordinator
            .request_rematch("b", 60)
            .expect("request should be accepted");
        assert!(again.iter().all(|dispatch| dispatch.message
            == ServerMessage::RematchRequested {
                player0: false,
                player1: true
            }));
        assert_eq!(
            coordinator.room(&code).map(Room::status),
            Some(RoomStatus::Finished)
        );
    }

    #[test]
    fn rematch_outside_finished_room_is_rejected() {
        let mut coordinator = coordinator();
        start_private(&mut coordinator);
        assert_eq!(
            coordinator.request_rematch("a", 20),
            Err(SessionError::GameNotActive)
        );
        assert_eq!(
            coordinator.decline_rematch("a", 20),
            Err(SessionError::GameNotActive)
        );
    }

    #[test]
    fn disconnect_mid_game_awards_remaining_player() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);
        play(&mut coordinator, "a", 0, 0);

        let dispatches = coordinator.disconnect("a", 30);
        assert_eq!(
            dispatches,
            vec![Dispatch::new(
                "b",
                ServerMessage::OpponentDisconnected {
                    winner: 1,
                    player_who_left: 0
                }
            )]
        );
        let room = coordinator.room(&code).expect("room should remain");
        assert_eq!(room.status(), RoomStatus::PlayerLeft);
        assert_eq!(room.game().winner(), Some(1));
        assert_eq!(
            coordinator.request_rematch("b", 40),
            Err(SessionError::GameNotActive)
        );

        coordinator
            .leave_room("b", 50)
            .expect("leave should succeed");
        assert!(coordinator.room(&code).is_none());
        assert_eq!(coordinator.room_count(), 0);
    }

    #[test]
    fn creator_leaving_waiting_room_cancels_it() {
        let mut coordinator = coordinator();
        let created = coordinator
            .create_room("a", GridSize::Small, 0)
            .expect("room should be created");
        let code = created_code(&created);

        let dispatches = coordinator.disconnect("a", 5);
        assert!(dispatches.is_empty());
        assert!(coordinator.room(&code).is_none());
        assert_eq!(
            coordinator.join_room("b", code.as_str(), 6),
            Err(SessionError::RoomNotFound(code.to_string()))
        );
    }

    #[test]
    fn joiner_leaving_finished_room_reopens_it() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);
        play_to_win(&mut coordinator);

        let dispatches = coordinator
            .leave_room("b", 70)
            .expect("leave should succeed");
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].to, "a");
        let room = coordinator.room(&code).expect("room should remain");
        assert_eq!(room.status(), RoomStatus::Waiting);
        assert_eq!(room.players(), ["a".to_string()]);
        assert!(room.grid().is_empty());

        coordinator
            .join_room("c", code.as_str(), 80)
            .expect("new joiner should be seated");
        assert_eq!(
            coordinator.room(&code).map(Room::status),
            Some(RoomStatus::Playing)
        );
    }

    #[test]
    fn creator_leaving_finished_room_notifies_joiner() {
        let mut coordinator = coordinator();
        let code = start_private(&mut coordinator);
        play_to_win(&mut coordinator);

        let dispatches = coordinator
            .leave_room("a", 70)
            .expect("leave should succeed");
        assert_eq!(
            dispatches,
            vec![Dispatch::new(
                "b",
                ServerMessage::RoomCancelled {
                    room_code: code.clone()
                }
            )]
        );
        assert!(coordinator.room_of("b").is_none());
        assert!(coordinator.room(&code).is_none());
    }

    #[test]
    fn auto_match_pairs_with_connected_queue_head() {
        let mut coordinator = coordinator();
        let waiting = coordinator
            .auto_match("a", GridSize::Medium, 0)
            .expect("auto-match should enqueue");
        assert!(matches!(waiting[0].message, ServerMessage::Waiting { .. }));
        assert_eq!(coordinator.queue_len(), 1);

        let paired = coordinator
            .auto_match("b", GridSize::Small, 5)
            .expect("auto-match should pair");
        assert_eq!(paired.len(), 2);
        assert_eq!(coordinator.queue_len(), 0);
        assert_eq!(coordinator.room_of("a"), coordinator.room_of("b"));
        let code = coordinator.room_of("a").cloned().expect("room should exist");
        assert_eq!(
            coordinator.room(&code).map(Room::size),
            Some(GridSize::Medium)
        );
    }

    #[test]
    fn auto_match_skips_disconnected_queue_entries() {
        let mut coordinator = coordinator();
        coordinator
            .auto_match("a", GridSize::Small, 0)
            .expect("auto-match should enqueue");
        coordinator.connected.remove("a");

        let response = coordinator
            .auto_match("b", GridSize::Small, 5)
            .expect("auto-match should enqueue");
        assert!(matches!(response[0].message, ServerMessage::Waiting { .. }));
        assert_eq!(coordinator.queue_len(), 1);
        assert_ne!(coordinator.room_of("a"), coordinator.room_of("b"));
    }

    #[test]
    fn cancel_waiting_removes_queue_entry() {
        let mut coordinator = coordinator();
        coordinator
            .auto_match("a", GridSize::Small, 0)
            .expect("auto-match should enqueue");
        let dispatches = coordinator
            .cancel_waiting("a", 1)
            .expect("cancel should succeed");
        assert_eq!(
            dispatches,
            vec![Dispatch::new("a", ServerMessage::WaitingCancelled)]
        );
        assert_eq!(coordinator.queue_len(), 0);
        assert_eq!(coordinator.room_count(), 0);
        assert_eq!(
            coordinator.cancel_waiting("a", 2),
            Err(SessionError::NotInRoom)
        );
    }

    #[test]
    fn cancel_after_pairing_is_rejected() {
        let mut coordinator = coordinator();
        start_private(&mut coordinator);
        assert_eq!(
            coordinator.cancel_waiting("a", 20),
            Err(SessionError::GameNotActive)
        );
    }

    #[test]
    fn stale_rooms_are_swept_with_notification() {
        let mut coordinator = SessionCoordinator::with_seed(
            SessionOptions {
                stale_after_ms: 1_000,
                ..SessionOptions::default()
            },
            3,
        );
        for id in ["a", "b", "c"] {
            coordinator.connect(id);
        }
        let code = start_private(&mut coordinator);

        assert!(coordinator.sweep_stale(1_010).is_empty());
        let dispatches = coordinator.sweep_stale(1_011);
        assert_eq!(dispatches.len(), 2);
        assert!(dispatches.iter().all(|dispatch| dispatch.message
            == ServerMessage::RoomExpired {
                room_code: code.clone()
            }));
        assert!(coordinator.room(&code).is_none());
        assert!(coordinator.room_of("a").is_none());
        assert_eq!(
            coordinator.join_room("c", code.as_str(), 1_100),
            Err(SessionError::StaleRoomExpired(code.to_string()))
        );
    }

    #[test]
    fn activity_postpones_staleness() {
        let mut coordinator = SessionCoordinator::with_seed(
            SessionOptions {
                stale_after_ms: 1_000,
                ..SessionOptions::default()
            },
            5,
        );
        for id in ["a", "b"] {
            coordinator.connect(id);
        }
        let code = start_private(&mut coordinator);
        coordinator
            .submit_move("a", 0, 0, 900)
            .expect("move should be accepted");
        assert!(coordinator.sweep_stale(1_500).is_empty());
        assert!(coordinator.room(&code).is_some());
    }
}
