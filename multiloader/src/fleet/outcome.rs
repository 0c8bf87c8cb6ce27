//! Per-board results of a batch operation.

use std::fmt;

use crate::error::Error;
use crate::session::BoardSpec;

/// Result of one board within a batch.
#[derive(Debug)]
pub struct BoardOutcome {
    index: usize,
    board: BoardSpec,
    output: String,
    error: Option<Error>,
}

impl BoardOutcome {
    /// A successful board.
    pub(crate) fn succeeded(index: usize, board: BoardSpec, output: String) -> Self {
        Self {
            index,
            board,
            output,
            error: None,
        }
    }

    /// A failed board. Output carried by the error is kept as the board's
    /// captured output.
    pub(crate) fn failed(index: usize, board: BoardSpec, error: Error) -> Self {
        let output = error
            .captured_output()
            .unwrap_or_default()
            .to_string();
        Self {
            index,
            board,
            output,
            error: Some(error),
        }
    }

    /// Position of the board in the fleet table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Configuration the board was driven with.
    pub fn board(&self) -> &BoardSpec {
        &self.board
    }

    /// Whether the operation succeeded on this board.
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Captured tool output (empty if the tool never ran).
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Why the board failed.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }
}

impl fmt::Display for BoardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "[{}] {}: ok", self.index, self.board),
            Some(e) => write!(f, "[{}] {}: FAILED ({e})", self.index, self.board),
        }
    }
}

/// Index-ordered results of one batch operation.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    results: Vec<BoardOutcome>,
}

impl BatchOutcome {
    pub(crate) fn new(mut results: Vec<BoardOutcome>) -> Self {
        results.sort_by_key(BoardOutcome::index);
        Self { results }
    }

    /// Number of boards reported.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no board was reported.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterate over the per-board results in board order.
    pub fn iter(&self) -> std::slice::Iter<'_, BoardOutcome> {
        self.results.iter()
    }

    /// Result for the board at `index`.
    pub fn get(&self, index: usize) -> Option<&BoardOutcome> {
        self.results.get(index)
    }

    /// Number of boards that succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    /// Number of boards that failed.
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Whether every board succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(BoardOutcome::success)
    }
}

impl<'a> IntoIterator for &'a BatchOutcome {
    type Item = &'a BoardOutcome;
    type IntoIter = std::slice::Iter<'a, BoardOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{result}")?;
        }
        write!(f, "{}/{} boards succeeded", self.succeeded(), self.len())
    }
}
