use std::path::Path;

use anyhow::{bail, Context};
use csv::{ReaderBuilder, Writer};

use crate::AppError;

/// Expansion rules for standings headers: the source reports composite
/// columns that the extractor splits into several cells, so the header row
/// has to grow to match. Unknown headers pass through unchanged, which keeps
/// the mapping forward compatible when the source adds columns.
const STANDINGS_EXPANSIONS: &[(&str, &[&str])] = &[
    ("Players/Teams", &["Username", "Players/Teams"]),
    ("Decklist", &["Leader", "Base", "Decklink"]),
    ("Match Record", &["Match Wins", "Match Losses", "Match Draws"]),
    ("Game Record", &["Game Wins", "Game Losses", "Game Draws"]),
];

/// Expansion rules for pairings headers. Pairings rows carry both players,
/// so the composite columns fan out twice.
const PAIRINGS_EXPANSIONS: &[(&str, &[&str])] = &[
    (
        "Players/Teams",
        &[
            "Player1_username",
            "Player1_displayname",
            "Player2_username",
            "Player2_displayname",
        ],
    ),
    (
        "Decklists",
        &[
            "Player1_leader",
            "Player1_base",
            "Player1_decklink",
            "Player2_leader",
            "Player2_base",
            "Player2_decklink",
        ],
    ),
    ("Result", &["Player1_wins", "Player2_wins", "Draws"]),
];

fn expand(headers: &[String], rules: &[(&str, &[&str])]) -> Vec<String> {
    let mut expanded = Vec::with_capacity(headers.len());
    for header in headers {
        match rules.iter().find(|(name, _)| name == header) {
            Some((_, fields)) => expanded.extend(fields.iter().map(|f| f.to_string())),
            None => expanded.push(header.clone()),
        }
    }
    expanded
}

/// Maps raw standings header labels onto the semantic column set.
pub fn expand_standings_headers(headers: &[String]) -> Vec<String> {
    expand(headers, STANDINGS_EXPANSIONS)
}

/// Maps raw pairings header labels onto the semantic column set. Pairings
/// rows are tagged with the round they came from, so a Round column is
/// prepended.
pub fn expand_pairings_headers(headers: &[String]) -> Vec<String> {
    let mut expanded = vec!["Round".to_string()];
    expanded.extend(expand(headers, PAIRINGS_EXPANSIONS));
    expanded
}

/// A standings snapshot: one header row plus one row of cells per player.
///
/// Cells are plain strings; the table preserves whatever the source emitted
/// and only ever mutates the Rank column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingsTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl StandingsTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Builds a table from raw extractor output, expanding composite headers
    /// so they line up with the already-split cells.
    pub fn from_extracted(raw_headers: &[String], rows: Vec<Vec<String>>) -> Self {
        Self {
            headers: expand_standings_headers(raw_headers),
            rows,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("failed to open standings file {}", path.display()))?;

        let headers = reader
            .headers()
            .context("standings file has no header row")?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.context("malformed standings row")?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), AppError> {
        let mut writer = Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Column index by name, or an error naming the missing column.
    pub fn require_column(&self, name: &str) -> Result<usize, AppError> {
        match self.column(name) {
            Some(index) => Ok(index),
            None => bail!("standings table is missing the {name:?} column"),
        }
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: impl Into<String>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value.into();
        }
    }
}
