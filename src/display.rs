//! Character-grid output.
//!
//! [`DisplaySink`] is the seam between frame layout and the actual screen.
//! [`TerminalDisplay`] drives a real terminal through crossterm on the
//! alternate screen; [`GridBuffer`] keeps the grid in memory.

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use std::io::{self, Stdout, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("cell ({row}, {column}) is outside the {rows}x{columns} grid")]
    OutOfBounds {
        row: u16,
        column: u16,
        rows: u16,
        columns: u16,
    },
    #[error("terminal I/O: {0}")]
    Io(#[from] io::Error),
}

/// A fixed-size character grid that can be written cell-addressed.
pub trait DisplaySink {
    /// Current grid dimensions as `(rows, columns)`.
    fn size(&self) -> Result<(u16, u16), DisplayError>;

    fn clear(&mut self) -> Result<(), DisplayError>;

    /// Write `text` starting at `(row, column)`, clipped at the right edge.
    fn write_at(&mut self, row: u16, column: u16, text: &str) -> Result<(), DisplayError>;

    /// Make pending writes visible.
    fn flush(&mut self) -> Result<(), DisplayError>;
}

fn check_bounds(row: u16, column: u16, (rows, columns): (u16, u16)) -> Result<usize, DisplayError> {
    if row >= rows || column >= columns {
        return Err(DisplayError::OutOfBounds {
            row,
            column,
            rows,
            columns,
        });
    }
    Ok(usize::from(columns - column))
}

fn clip(text: &str, width: usize) -> &str {
    match text.char_indices().nth(width) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// The controlling terminal, switched to the alternate screen with the cursor hidden.
///
/// The previous screen is restored on drop.
pub struct TerminalDisplay {
    out: Stdout,
}

impl TerminalDisplay {
    pub fn new() -> Result<Self, DisplayError> {
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        Ok(Self { out })
    }
}

impl DisplaySink for TerminalDisplay {
    fn size(&self) -> Result<(u16, u16), DisplayError> {
        let (columns, rows) = terminal::size()?;
        Ok((rows, columns))
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        queue!(self.out, Clear(ClearType::All))?;
        Ok(())
    }

    fn write_at(&mut self, row: u16, column: u16, text: &str) -> Result<(), DisplayError> {
        let width = check_bounds(row, column, self.size()?)?;
        queue!(self.out, MoveTo(column, row), Print(clip(text, width)))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        let _ = restore_terminal();
    }
}

/// Leave the alternate screen and show the cursor again.
///
/// Safe to call when the terminal was never switched.
pub fn restore_terminal() -> io::Result<()> {
    execute!(io::stdout(), Show, LeaveAlternateScreen)
}

/// An in-memory grid with the same write semantics as the terminal.
#[derive(Debug, Clone)]
pub struct GridBuffer {
    rows: u16,
    columns: u16,
    cells: Vec<Vec<char>>,
    /// Number of `clear` calls so far
    pub clears: usize,
    /// Number of `flush` calls so far
    pub flushes: usize,
}

impl GridBuffer {
    pub fn new(rows: u16, columns: u16) -> Self {
        Self {
            rows,
            columns,
            cells: vec![vec![' '; usize::from(columns)]; usize::from(rows)],
            clears: 0,
            flushes: 0,
        }
    }

    /// Change the reported dimensions. Content outside the new grid is lost.
    pub fn resize(&mut self, rows: u16, columns: u16) {
        self.cells
            .resize(usize::from(rows), vec![' '; usize::from(columns)]);
        for line in &mut self.cells {
            line.resize(usize::from(columns), ' ');
        }
        self.rows = rows;
        self.columns = columns;
    }

    /// Row contents with trailing blanks removed.
    pub fn line(&self, row: u16) -> String {
        self.cells
            .get(usize::from(row))
            .map(|line| line.iter().collect::<String>().trim_end().to_string())
            .unwrap_or_default()
    }

    /// All rows, trailing empty rows removed.
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = (0..self.rows).map(|row| self.line(row)).collect();
        while lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        lines
    }
}

impl DisplaySink for GridBuffer {
    fn size(&self) -> Result<(u16, u16), DisplayError> {
        Ok((self.rows, self.columns))
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        for line in &mut self.cells {
            line.fill(' ');
        }
        self.clears += 1;
        Ok(())
    }

    fn write_at(&mut self, row: u16, column: u16, text: &str) -> Result<(), DisplayError> {
        let width = check_bounds(row, column, (self.rows, self.columns))?;
        let line = &mut self.cells[usize::from(row)];
        for (cell, ch) in line[usize::from(column)..].iter_mut().zip(clip(text, width).chars()) {
            *cell = ch;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        self.flushes += 1;
        Ok(())
    }
}
