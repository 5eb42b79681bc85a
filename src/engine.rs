use crate::constants::{AUTHORITATIVE_MAX_ITERATIONS, INTERACTIVE_MAX_ITERATIONS};
use crate::grid::Grid;
use crate::types::{PlayerId, Position, ReactionEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolveOptions {
    pub max_iterations: usize,
    pub stop_when_won: bool,
}

impl ResolveOptions {
    pub fn interactive() -> Self {
        Self {
            max_iterations: INTERACTIVE_MAX_ITERATIONS,
            stop_when_won: true,
        }
    }

    pub fn authoritative() -> Self {
        Self {
            max_iterations: AUTHORITATIVE_MAX_ITERATIONS,
            stop_when_won: true,
        }
    }

    pub fn exhaustive(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            stop_when_won: false,
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::authoritative()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WinGate {
    pub movers: usize,
}

impl WinGate {
    pub fn is_open(&self) -> bool {
        self.movers >= 2
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub grid: Grid,
    pub events: Vec<ReactionEvent>,
    pub rounds: usize,
    pub stopped_on_win: bool,
    pub exhausted: bool,
}

impl Resolution {
    pub fn explosion_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, ReactionEvent::Explosion { .. }))
            .count()
    }
}

pub fn resolve(
    grid: &Grid,
    pos: Position,
    player: PlayerId,
    gate: WinGate,
    options: ResolveOptions,
) -> Resolution {
    let mut next = grid.clone();
    if let Some(cell) = next.cell_mut(pos) {
        cell.count += 1;
        cell.owner = Some(player);
    }

    let mut events = Vec::new();
    let mut rounds = 0;
    let mut stopped_on_win = false;

    while rounds < options.max_iterations {
        if options.stop_when_won && is_won(&next, gate) {
            stopped_on_win = true;
            break;
        }

        let criticals: Vec<(Position, Option<PlayerId>)> = next
            .critical_positions()
            .into_iter()
            .map(|at| (at, next.cell(at).and_then(|cell| cell.owner)))
            .collect();
        if criticals.is_empty() {
            break;
        }

        explode_round(&mut next, &criticals, rounds, &mut events);
        rounds += 1;
    }

    if !stopped_on_win && rounds == options.max_iterations && options.stop_when_won {
        stopped_on_win = is_won(&next, gate);
    }
    let exhausted = !stopped_on_win && !next.is_stable();

    Resolution {
        grid: next,
        events,
        rounds,
        stopped_on_win,
        exhausted,
    }
}

/// Applies one simultaneous round. Owners are captured when the round's
/// critical set is taken, so a cell emptied by its own explosion still
/// spreads its owner's colour.
fn explode_round(
    grid: &mut Grid,
    criticals: &[(Position, Option<PlayerId>)],
    round: usize,
    events: &mut Vec<ReactionEvent>,
) {
    for (at, owner) in criticals {
        if let Some(cell) = grid.cell_mut(*at) {
            cell.count -= cell.critical_mass;
            if cell.count == 0 {
                cell.owner = None;
            }
        }
        if let Some(player) = owner {
            events.push(ReactionEvent::Explosion {
                round,
                at: *at,
                player: *player,
            });
        }
    }

    for (from, owner) in criticals {
        let targets: Vec<Position> = grid.neighbors(*from).collect();
        for to in targets {
            if let Some(cell) = grid.cell_mut(to) {
                cell.owner = *owner;
                cell.count += 1;
            }
            if let Some(player) = owner {
                events.push(ReactionEvent::Propagation {
                    round,
                    from: *from,
                    to,
                    player: *player,
                });
            }
        }
    }
}

pub fn is_won(grid: &Grid, gate: WinGate) -> bool {
    if !gate.is_open() {
        return false;
    }
    grid.owners_with_orbs().len() == 1
}
