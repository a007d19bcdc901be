//! Board representation and move rules
//!
//! Everything in here is a pure function of the board. The engine validates
//! with [`is_legal_move`] before calling [`apply_move`].

use serde::{Deserialize, Serialize};

use super::MoveError;

/// Number of cells on the board
pub const CELL_COUNT: usize = 9;

/// Board side length
pub const SIDE: i64 = 3;

/// Every winning triple: rows, columns, diagonals
pub const WIN_LINES: [[usize; 3]; 8] = [
    // Rows
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // Columns
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // Diagonals
    [0, 4, 8],
    [2, 4, 6],
];

/// Per-player marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    X,
    O,
}

impl Symbol {
    /// The other symbol
    #[cfg(test)]
    pub fn other(self) -> Self {
        match self {
            Self::X => Self::O,
            Self::O => Self::X,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::O => "O",
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single board cell. Serialized as `""`, `"X"` or `"O"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    #[serde(rename = "")]
    Empty,
    X,
    O,
}

impl Cell {
    pub fn is_empty(self) -> bool {
        self == Cell::Empty
    }
}

impl From<Symbol> for Cell {
    fn from(symbol: Symbol) -> Self {
        match symbol {
            Symbol::X => Cell::X,
            Symbol::O => Cell::O,
        }
    }
}

/// The 3x3 grid, row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board([Cell; CELL_COUNT]);

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cells(&self) -> &[Cell; CELL_COUNT] {
        &self.0
    }

    pub fn get(&self, cell: usize) -> Option<Cell> {
        self.0.get(cell).copied()
    }

    /// Number of marked cells
    #[cfg(test)]
    pub fn filled(&self) -> usize {
        self.0.iter().filter(|c| !c.is_empty()).count()
    }
}

/// Map a `(row, col)` pair onto a cell index
pub fn cell_index(row: i64, col: i64) -> Result<usize, MoveError> {
    if !(0..SIDE).contains(&row) || !(0..SIDE).contains(&col) {
        return Err(MoveError::OutOfBounds { row, col });
    }
    Ok((row * SIDE + col) as usize)
}

/// Check that `cell` exists and is still empty
pub fn is_legal_move(board: &Board, cell: usize) -> Result<(), MoveError> {
    match board.get(cell) {
        None => Err(MoveError::OutOfBounds {
            row: cell as i64 / SIDE,
            col: cell as i64 % SIDE,
        }),
        Some(Cell::Empty) => Ok(()),
        Some(_) => Err(MoveError::CellOccupied { cell }),
    }
}

/// Place `symbol` on `cell`. Does not validate; call [`is_legal_move`] first.
pub fn apply_move(board: &Board, cell: usize, symbol: Symbol) -> Board {
    let mut next = *board;
    next.0[cell] = symbol.into();
    next
}

/// True if any triple is entirely `symbol`
pub fn check_win(board: &Board, symbol: Symbol) -> bool {
    let mark = Cell::from(symbol);
    WIN_LINES
        .iter()
        .any(|line| line.iter().all(|&i| board.0[i] == mark))
}

/// Board is full. Only meaningful after [`check_win`] came back false.
pub fn is_draw(board: &Board) -> bool {
    board.0.iter().all(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_of(marks: &str) -> Board {
        let mut board = Board::new();
        for (i, ch) in marks.chars().enumerate() {
            board = match ch {
                'X' => apply_move(&board, i, Symbol::X),
                'O' => apply_move(&board, i, Symbol::O),
                _ => board,
            };
        }
        board
    }

    #[test]
    fn every_line_wins() {
        for line in WIN_LINES {
            for symbol in [Symbol::X, Symbol::O] {
                let mut board = Board::new();
                for cell in line {
                    board = apply_move(&board, cell, symbol);
                }
                assert!(check_win(&board, symbol), "{line:?} for {symbol}");
                assert!(!check_win(&board, symbol.other()));
            }
        }
    }

    #[test]
    fn two_in_a_row_is_not_a_win() {
        let board = board_of("XX.......");
        assert!(!check_win(&board, Symbol::X));
    }

    #[test]
    fn full_board_without_line_is_draw() {
        let board = board_of("XOXXOOOXX");
        assert!(!check_win(&board, Symbol::X));
        assert!(!check_win(&board, Symbol::O));
        assert!(is_draw(&board));
    }

    #[test]
    fn every_full_board_without_a_line_is_a_draw() {
        // Lines rebuilt from geometry so the check does not lean on WIN_LINES
        let mut lines: Vec<[usize; 3]> = Vec::new();
        for i in 0..3 {
            lines.push([i * 3, i * 3 + 1, i * 3 + 2]);
            lines.push([i, i + 3, i + 6]);
        }
        lines.push([0, 4, 8]);
        lines.push([2, 4, 6]);

        let mut draws = 0;
        for code in 0..3usize.pow(9) {
            let mut marks = ['.'; 9];
            let mut rest = code;
            for mark in marks.iter_mut() {
                *mark = ['.', 'X', 'O'][rest % 3];
                rest /= 3;
            }
            let full = marks.iter().all(|&m| m != '.');
            let has_line = lines
                .iter()
                .any(|l| marks[l[0]] != '.' && l.iter().all(|&c| marks[c] == marks[l[0]]));

            let board = board_of(&marks.iter().collect::<String>());
            if full && !has_line {
                draws += 1;
                assert!(is_draw(&board), "{marks:?}");
                assert!(!check_win(&board, Symbol::X), "{marks:?}");
                assert!(!check_win(&board, Symbol::O), "{marks:?}");
            }
            if !full {
                assert!(!is_draw(&board), "{marks:?}");
            }
        }
        assert!(draws > 0);
    }

    #[test]
    fn partial_board_is_not_draw() {
        assert!(!is_draw(&board_of("XOXXOOOX.")));
    }

    #[test]
    fn occupied_cell_is_rejected() {
        let board = board_of("....X....");
        assert_eq!(
            is_legal_move(&board, 4),
            Err(MoveError::CellOccupied { cell: 4 })
        );
        assert!(is_legal_move(&board, 3).is_ok());
    }

    #[test]
    fn out_of_range_cell_is_rejected() {
        assert!(matches!(
            is_legal_move(&Board::new(), 9),
            Err(MoveError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn cell_index_checks_row_and_col_separately() {
        assert_eq!(cell_index(1, 2), Ok(5));
        assert!(cell_index(0, 5).is_err());
        assert!(cell_index(-1, 0).is_err());
        assert!(cell_index(3, 0).is_err());
    }

    #[test]
    fn apply_move_leaves_input_untouched() {
        let before = Board::new();
        let after = apply_move(&before, 0, Symbol::O);
        assert_eq!(before.filled(), 0);
        assert_eq!(after.get(0), Some(Cell::O));
    }

    #[test]
    fn serializes_as_string_array() {
        let board = board_of("X...O....");
        let json = serde_json::to_string(&board).unwrap();
        assert_eq!(json, r#"["X","","","","O","","","",""]"#);
    }
}
