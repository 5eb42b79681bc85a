use serde::Serialize;

use crate::constants::clamp_player_count;
use crate::engine::{self, ResolveOptions, WinGate};
use crate::error::IllegalMoveReason;
use crate::grid::Grid;
use crate::types::{PlayerId, Position, ReactionEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    AwaitingMove { player: PlayerId },
    GameOver { winner: PlayerId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub mover: PlayerId,
    pub position: Position,
    pub events: Vec<ReactionEvent>,
    pub rounds: usize,
    pub newly_eliminated: Vec<PlayerId>,
    pub winner: Option<PlayerId>,
    pub next_turn: Option<PlayerId>,
    pub exhausted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Game {
    grid: Grid,
    player_count: usize,
    phase: Phase,
    has_moved: Vec<bool>,
    eliminated: Vec<bool>,
    options: ResolveOptions,
}

impl Game {
    pub fn new(player_count: usize, rows: usize, cols: usize, options: ResolveOptions) -> Self {
        Self::with_grid(Grid::new(rows, cols), player_count, options)
    }

    pub fn with_grid(grid: Grid, player_count: usize, options: ResolveOptions) -> Self {
        let player_count = clamp_player_count(player_count);
        let mut has_moved = vec![false; player_count];
        for owner in grid.owners_with_orbs() {
            if let Some(slot) = has_moved.get_mut(owner) {
                *slot = true;
            }
        }
        Self {
            grid,
            player_count,
            phase: Phase::AwaitingMove { player: 0 },
            has_moved,
            eliminated: vec![false; player_count],
            options,
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn player_count(&self) -> usize {
        self.player_count
    }

    pub fn options(&self) -> ResolveOptions {
        self.options
    }

    pub fn current_turn(&self) -> Option<PlayerId> {
        match self.phase {
            Phase::AwaitingMove { player } => Some(player),
            Phase::GameOver { .. } => None,
        }
    }

    pub fn winner(&self) -> Option<PlayerId> {
        match self.phase {
            Phase::GameOver { winner } => Some(winner),
            Phase::AwaitingMove { .. } => None,
        }
    }

    pub fn is_over(&self) -> bool {
        matches!(self.phase, Phase::GameOver { .. })
    }

    pub fn has_moved(&self, player: PlayerId) -> bool {
        self.has_moved.get(player).copied().unwrap_or(false)
    }

    pub fn is_eliminated(&self, player: PlayerId) -> bool {
        self.eliminated.get(player).copied().unwrap_or(false)
    }

    pub fn mover_count(&self) -> usize {
        self.has_moved.iter().filter(|moved| **moved).count()
    }

    pub fn orb_counts(&self) -> Vec<u64> {
        self.grid.orb_counts(self.player_count)
    }

    pub fn active_players(&self) -> Vec<PlayerId> {
        (0..self.player_count)
            .filter(|player| !self.eliminated[*player])
            .collect()
    }

    pub fn validate_move(&self, player: PlayerId, pos: Position) -> Result<(), IllegalMoveReason> {
        let current = match self.phase {
            Phase::GameOver { .. } => return Err(IllegalMoveReason::GameOver),
            Phase::AwaitingMove { player } => player,
        };
        if player >= self.player_count {
            return Err(IllegalMoveReason::PlayerOutOfRange);
        }
        if player != current {
            return Err(IllegalMoveReason::NotYourTurn);
        }
        if !self.grid.in_bounds(pos) {
            return Err(IllegalMoveReason::OutOfBounds);
        }
        if !self.grid.is_legal_move(pos, player) {
            return Err(IllegalMoveReason::CellOwnedByOpponent);
        }
        Ok(())
    }

    pub fn apply_move(
        &mut self,
        player: PlayerId,
        pos: Position,
    ) -> Result<MoveOutcome, IllegalMoveReason> {
        self.validate_move(player, pos)?;

        self.has_moved[player] = true;
        let gate = WinGate {
            movers: self.mover_count(),
        };
        let resolution = engine::resolve(&self.grid, pos, player, gate, self.options);
        self.grid = resolution.grid;

        let newly_eliminated = self.check_eliminations();
        let winner = self.check_winner();
        let next_turn = match winner {
            Some(winner) => {
                self.phase = Phase::GameOver { winner };
                None
            }
            None => {
                let next = self.next_active_player(player);
                self.phase = Phase::AwaitingMove { player: next };
                Some(next)
            }
        };

        Ok(MoveOutcome {
            mover: player,
            position: pos,
            events: resolution.events,
            rounds: resolution.rounds,
            newly_eliminated,
            winner,
            next_turn,
            exhausted: resolution.exhausted,
        })
    }

    pub fn check_eliminations(&mut self) -> Vec<PlayerId> {
        let counts = self.orb_counts();
        let mut newly = Vec::new();
        for player in 0..self.player_count {
            if self.has_moved[player] && counts[player] == 0 && !self.eliminated[player] {
                self.eliminated[player] = true;
                newly.push(player);
            }
        }
        newly
    }

    pub fn check_winner(&self) -> Option<PlayerId> {
        if self.mover_count() < 2 {
            return None;
        }
        let survivors: Vec<PlayerId> = (0..self.player_count)
            .filter(|player| self.has_moved[*player] && !self.eliminated[*player])
            .collect();
        let winner = (survivors.len() == 1).then(|| survivors[0]);
        debug_assert_eq!(winner, self.sole_orb_holder(), "win checks disagree");
        winner
    }

    fn sole_orb_holder(&self) -> Option<PlayerId> {
        let holders: Vec<PlayerId> = self
            .orb_counts()
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(player, _)| player)
            .collect();
        (holders.len() == 1).then(|| holders[0])
    }

    pub fn next_active_player(&self, from: PlayerId) -> PlayerId {
        let mut next = from;
        for _ in 0..self.player_count {
            next = (next + 1) % self.player_count;
            if !self.eliminated[next] {
                return next;
            }
        }
        from
    }

    pub fn set_turn(&mut self, player: PlayerId) {
        if player < self.player_count && !self.is_over() {
            self.phase = Phase::AwaitingMove { player };
        }
    }

    pub fn declare_winner(&mut self, winner: PlayerId) {
        if winner < self.player_count {
            self.phase = Phase::GameOver { winner };
        }
    }

    /// Replaces the board wholesale. Eliminations are recomputed from the
    /// adopted board, so a player given orbs back is active again.
    pub fn adopt_grid(&mut self, grid: Grid) {
        for owner in grid.owners_with_orbs() {
            if let Some(slot) = self.has_moved.get_mut(owner) {
                *slot = true;
            }
        }
        self.grid = grid;
        let counts = self.orb_counts();
        for player in 0..self.player_count {
            self.eliminated[player] = self.has_moved[player] && counts[player] == 0;
        }
    }

    pub fn reset(&mut self) {
        let grid = Grid::new(self.grid.rows(), self.grid.cols());
        *self = Self::with_grid(grid, self.player_count, self.options);
    }
}
