use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::grid_dimensions;
use crate::types::{Cell, GridSize, PlayerId, Position};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid {
    cells: Vec<Vec<Cell>>,
}

pub fn critical_mass(row: usize, col: usize, rows: usize, cols: usize) -> u32 {
    let mut neighbors = 0;
    if row > 0 {
        neighbors += 1;
    }
    if row + 1 < rows {
        neighbors += 1;
    }
    if col > 0 {
        neighbors += 1;
    }
    if col + 1 < cols {
        neighbors += 1;
    }
    neighbors
}

impl Grid {
    /// Empty sides are raised to one. A 1x1 request becomes 1x2, since a lone
    /// cell has critical mass zero.
    pub fn new(rows: usize, cols: usize) -> Self {
        let rows = rows.max(1);
        let mut cols = cols.max(1);
        if rows == 1 && cols == 1 {
            cols = 2;
        }
        let cells = (0..rows)
            .map(|row| {
                (0..cols)
                    .map(|col| Cell::empty(critical_mass(row, col, rows, cols)))
                    .collect()
            })
            .collect();
        Self { cells }
    }

    pub fn with_size(size: GridSize) -> Self {
        let (rows, cols) = grid_dimensions(size);
        Self::new(rows, cols)
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cells.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.row < self.rows() && pos.col < self.cols()
    }

    pub fn cell(&self, pos: Position) -> Option<&Cell> {
        self.cells.get(pos.row).and_then(|row| row.get(pos.col))
    }

    pub(crate) fn cell_mut(&mut self, pos: Position) -> Option<&mut Cell> {
        self.cells.get_mut(pos.row).and_then(|row| row.get_mut(pos.col))
    }

    pub fn is_legal_move(&self, pos: Position, player: PlayerId) -> bool {
        match self.cell(pos) {
            Some(cell) => cell.owner.is_none() || cell.owner == Some(player),
            None => false,
        }
    }

    pub fn legal_moves(&self, player: PlayerId) -> Vec<Position> {
        self.positions()
            .filter(|pos| self.is_legal_move(*pos, player))
            .collect()
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        let cols = self.cols();
        (0..self.rows()).flat_map(move |row| (0..cols).map(move |col| Position::new(row, col)))
    }

    pub fn neighbors(&self, pos: Position) -> impl Iterator<Item = Position> {
        let rows = self.rows();
        let cols = self.cols();
        let up = (pos.row > 0).then(|| Position::new(pos.row - 1, pos.col));
        let down = (pos.row + 1 < rows).then(|| Position::new(pos.row + 1, pos.col));
        let left = (pos.col > 0).then(|| Position::new(pos.row, pos.col - 1));
        let right = (pos.col + 1 < cols).then(|| Position::new(pos.row, pos.col + 1));
        [up, down, left, right].into_iter().flatten()
    }

    pub fn critical_positions(&self) -> Vec<Position> {
        self.positions()
            .filter(|pos| self.cell(*pos).map(Cell::is_critical).unwrap_or(false))
            .collect()
    }

    pub fn is_stable(&self) -> bool {
        self.cells.iter().flatten().all(|cell| !cell.is_critical())
    }

    pub fn total_orbs(&self) -> u64 {
        self.cells.iter().flatten().map(|cell| cell.count as u64).sum()
    }

    pub fn orb_counts(&self, player_count: usize) -> Vec<u64> {
        let mut counts = vec![0u64; player_count];
        for cell in self.cells.iter().flatten() {
            if let Some(owner) = cell.owner {
                if let Some(slot) = counts.get_mut(owner) {
                    *slot += cell.count as u64;
                }
            }
        }
        counts
    }

    pub fn owners_with_orbs(&self) -> BTreeSet<PlayerId> {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| cell.count > 0)
            .filter_map(|cell| cell.owner)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().flatten().all(|cell| cell.count == 0)
    }

    pub fn is_well_formed(&self) -> bool {
        let rows = self.rows();
        let cols = self.cols();
        if rows == 0 || cols == 0 || rows * cols < 2 {
            return false;
        }
        self.cells.iter().enumerate().all(|(row, cells)| {
            cells.len() == cols
                && cells.iter().enumerate().all(|(col, cell)| {
                    cell.critical_mass == critical_mass(row, col, rows, cols)
                        && (cell.count > 0 || cell.owner.is_none())
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    #[test]
    fn critical_mass_follows_neighbor_count() {
        let grid = Grid::with_size(GridSize::Small);
        assert_eq!(grid.rows(), 6);
        assert_eq!(grid.cols(), 4);
        assert_eq!(grid.cell(pos(0, 0)).map(|c| c.critical_mass), Some(2));
        assert_eq!(grid.cell(pos(5, 3)).map(|c| c.critical_mass), Some(2));
        assert_eq!(grid.cell(pos(0, 2)).map(|c| c.critical_mass), Some(3));
        assert_eq!(grid.cell(pos(3, 0)).map(|c| c.critical_mass), Some(3));
        assert_eq!(grid.cell(pos(2, 2)).map(|c| c.critical_mass), Some(4));
        assert!(grid.is_empty());
        assert!(grid.is_well_formed());
    }

    #[test]
    fn single_row_boards_keep_their_size() {
        let strip = Grid::new(1, 5);
        assert_eq!((strip.rows(), strip.cols()), (1, 5));
        let masses: Vec<u32> = strip
            .positions()
            .filter_map(|p| strip.cell(p).map(|c| c.critical_mass))
            .collect();
        assert_eq!(masses, vec![1, 2, 2, 2, 1]);
        assert!(strip.is_well_formed());

        let single = Grid::new(1, 1);
        assert_eq!((single.rows(), single.cols()), (1, 2));
        assert!(single.is_well_formed());
        assert_eq!((Grid::new(1, 0).rows(), Grid::new(1, 0).cols()), (1, 2));
        assert_eq!((Grid::new(0, 3).rows(), Grid::new(0, 3).cols()), (1, 3));
    }

    #[test]
    fn clone_is_independent() {
        let original = Grid::with_size(GridSize::Small);
        let mut copy = original.clone();
        if let Some(cell) = copy.cell_mut(pos(1, 1)) {
            cell.count = 2;
            cell.owner = Some(0);
        }
        assert_eq!(original.cell(pos(1, 1)).map(|c| c.count), Some(0));
        assert_ne!(original, copy);
    }

    #[test]
    fn legality_allows_empty_or_own_cells_only() {
        let mut grid = Grid::with_size(GridSize::Small);
        if let Some(cell) = grid.cell_mut(pos(2, 2)) {
            cell.count = 1;
            cell.owner = Some(1);
        }
        assert!(grid.is_legal_move(pos(0, 0), 0));
        assert!(grid.is_legal_move(pos(2, 2), 1));
        assert!(!grid.is_legal_move(pos(2, 2), 0));
        assert!(!grid.is_legal_move(pos(6, 0), 0));
        assert!(!grid.is_legal_move(pos(0, 4), 0));
        assert_eq!(grid.legal_moves(0).len(), 23);
        assert_eq!(grid.legal_moves(1).len(), 24);
    }

    #[test]
    fn neighbors_stay_in_bounds_in_fixed_order() {
        let grid = Grid::with_size(GridSize::Small);
        let corner: Vec<Position> = grid.neighbors(pos(0, 0)).collect();
        assert_eq!(corner, vec![pos(1, 0), pos(0, 1)]);
        let inner: Vec<Position> = grid.neighbors(pos(2, 2)).collect();
        assert_eq!(inner, vec![pos(1, 2), pos(3, 2), pos(2, 1), pos(2, 3)]);
    }

    #[test]
    fn orb_counts_and_owner_sets() {
        let mut grid = Grid::with_size(GridSize::Medium);
        for (p, count, owner) in [(pos(0, 0), 1, 0), (pos(4, 4), 4, 1), (pos(4, 3), 2, 1)] {
            if let Some(cell) = grid.cell_mut(p) {
                cell.count = count;
                cell.owner = Some(owner);
            }
        }
        assert_eq!(grid.orb_counts(3), vec![1, 6, 0]);
        assert_eq!(grid.total_orbs(), 7);
        assert_eq!(grid.owners_with_orbs().into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(!grid.is_stable());
        assert_eq!(grid.critical_positions(), vec![pos(4, 4)]);
    }

    #[test]
    fn malformed_grids_are_detected() {
        let grid: Grid = serde_json::from_value(serde_json::json!([
            [{ "count": 0, "owner": null, "criticalMass": 2 }, { "count": 0, "owner": 1, "criticalMass": 2 }],
            [{ "count": 0, "owner": null, "criticalMass": 2 }, { "count": 0, "owner": null, "criticalMass": 2 }]
        ]))
        .expect("grid should deserialize");
        assert!(!grid.is_well_formed());

        let ragged: Grid = serde_json::from_value(serde_json::json!([
            [{ "count": 0, "owner": null, "criticalMass": 2 }, { "count": 0, "owner": null, "criticalMass": 2 }],
            [{ "count": 0, "owner": null, "criticalMass": 2 }]
        ]))
        .expect("grid should deserialize");
        assert!(!ragged.is_well_formed());
    }
}
