use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::bail;
use tracing::{info, warn};

use crate::placements::{self, Placement};
use crate::standings::StandingsTable;
use crate::AppError;

/// A reconciliation finding. These are operator diagnostics, not failures:
/// the batch keeps going and the table is still written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnifyWarning {
    /// A placement entry named a player that no standings row carries.
    /// Usually a typo, a non-melee name, or a post-event username change.
    NoStandingsMatch { player: String },
    /// A standings row sits on a top cut rank but no placement entry names
    /// its player. The standings site miscalculates ranks for dropped
    /// players with zero played games, which shows up exactly like this.
    ExtraTopCutPlayer {
        rank: u32,
        username: String,
        team: String,
    },
}

impl fmt::Display for UnifyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnifyWarning::NoStandingsMatch { player } => {
                write!(f, "could not match player '{player}' in standings")
            }
            UnifyWarning::ExtraTopCutPlayer {
                rank,
                username,
                team,
            } => write!(
                f,
                "extra player in top cut: place {rank}, username '{username}', players/teams '{team}'"
            ),
        }
    }
}

fn canonical(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Merges an authoritative placements list into a standings table.
///
/// Placements carry the organizer-curated truth for the top cut; standings
/// carry everyone but can be wrong at the tail. Each placement's rank is
/// written onto every standings row whose Username or Players/Teams matches
/// the placement's player name (trimmed, case-insensitive). Row order is
/// untouched; only Rank cells change.
pub fn unify_placements(
    table: &mut StandingsTable,
    placements: &[Placement],
) -> Result<Vec<UnifyWarning>, AppError> {
    let username_col = table.require_column("Username")?;
    let team_col = table.require_column("Players/Teams")?;
    let rank_col = table.require_column("Rank")?;

    let placement_names: HashSet<String> = placements
        .iter()
        .map(|p| canonical(&p.player))
        .collect();
    let top_cut_ranks: HashSet<u32> = placements.iter().filter_map(Placement::rank).collect();

    let mut warnings = Vec::new();

    for placement in placements {
        let Some(new_rank) = placement.rank() else {
            continue;
        };
        if placement.player.trim().is_empty() {
            continue;
        }

        let wanted = canonical(&placement.player);
        let mut matched = false;
        for row in 0..table.len() {
            if canonical(table.cell(row, username_col)) == wanted
                || canonical(table.cell(row, team_col)) == wanted
            {
                table.set_cell(row, rank_col, new_rank.to_string());
                matched = true;
            }
        }

        if !matched {
            warnings.push(UnifyWarning::NoStandingsMatch {
                player: placement.player.clone(),
            });
        }
    }

    // Flag standings rows sitting on a top cut rank that the organizer
    // never reported.
    for row in 0..table.len() {
        let Ok(rank) = table.cell(row, rank_col).trim().parse::<u32>() else {
            continue;
        };
        if !top_cut_ranks.contains(&rank) {
            continue;
        }
        let username = table.cell(row, username_col).trim().to_string();
        let team = table.cell(row, team_col).trim().to_string();
        if !placement_names.contains(&username.to_lowercase())
            && !placement_names.contains(&team.to_lowercase())
        {
            warnings.push(UnifyWarning::ExtraTopCutPlayer {
                rank,
                username,
                team,
            });
        }
    }

    Ok(warnings)
}

/// Filename prefix up to the first `_`, which is the melee id both the
/// placements and standings files are named after.
fn base_id(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.split('_').next()
}

/// Finds the standings file belonging to a placements file, preferring the
/// incomplete snapshot when both exist.
fn find_standings_file(dir: &Path, id: &str) -> Option<PathBuf> {
    let candidates = [
        dir.join(format!("{id}_standings_incomplete.csv")),
        dir.join(format!("{id}_standings.csv")),
    ];
    candidates.into_iter().find(|path| path.exists())
}

fn unified_output_path(standings: &Path) -> PathBuf {
    let name = standings
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .replace(".csv", "_unified.csv");
    standings.with_file_name(name)
}

/// Unifies one placements file against its sibling standings file and
/// writes `<id>_standings[_incomplete]_unified.csv` next to it.
pub fn unify_file(placements_path: &Path) -> Result<Vec<UnifyWarning>, AppError> {
    let Some(id) = base_id(placements_path) else {
        bail!(
            "cannot derive a tournament id from {}",
            placements_path.display()
        );
    };
    let dir = placements_path.parent().unwrap_or_else(|| Path::new("."));
    let Some(standings_path) = find_standings_file(dir, id) else {
        bail!("no standings file found for tournament {id}");
    };

    let placements = placements::load_placements(placements_path)?;
    let mut table = StandingsTable::from_path(&standings_path)?;
    let warnings = unify_placements(&mut table, &placements)?;
    for warning in &warnings {
        warn!("{warning}");
    }

    let output = unified_output_path(&standings_path);
    table.write_to_path(&output)?;
    info!("unified placements written to {}", output.display());

    Ok(warnings)
}

/// Unifies every `*_placements.txt` in `dir`. Placements files without a
/// matching standings file are skipped.
pub fn unify_all(dir: &Path) -> Result<(), AppError> {
    let mut processed = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with("_placements.txt") {
            continue;
        }
        let Some(id) = base_id(&path) else {
            continue;
        };
        if find_standings_file(dir, id).is_none() {
            continue;
        }
        info!("processing {}", path.display());
        unify_file(&path)?;
        processed += 1;
    }

    if processed == 0 {
        warn!("no placements files found in {}", dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placements::Placement;

    fn table(rows: &[(&str, &str, &str)]) -> StandingsTable {
        StandingsTable::new(
            vec![
                "Rank".to_string(),
                "Username".to_string(),
                "Players/Teams".to_string(),
            ],
            rows.iter()
                .map(|(rank, username, team)| {
                    vec![rank.to_string(), username.to_string(), team.to_string()]
                })
                .collect(),
        )
    }

    #[test]
    fn overwrites_ranks_from_placements() {
        let mut standings = table(&[("3", "alice", "Alice A."), ("4", "bob", "Bob B.")]);
        let placements = vec![Placement::new("1st", "Alice"), Placement::new("2nd", "Bob")];

        // Matching is case-insensitive against either name column.
        let warnings = unify_placements(&mut standings, &placements).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(standings.cell(0, 0), "1");
        assert_eq!(standings.cell(1, 0), "2");
    }

    #[test]
    fn matches_against_display_name_column() {
        let mut standings = table(&[("5", "xx_gamer_xx", "Charlie")]);
        let placements = vec![Placement::new("1st", "charlie")];

        let warnings = unify_placements(&mut standings, &placements).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(standings.cell(0, 0), "1");
    }

    #[test]
    fn warns_on_unmatched_placement_and_keeps_going() {
        let mut standings = table(&[("1", "alice", "Alice"), ("2", "bob", "Bob")]);
        let placements = vec![
            Placement::new("1st", "Alice"),
            Placement::new("2nd", "Somebody Else"),
        ];

        let warnings = unify_placements(&mut standings, &placements).unwrap();
        assert_eq!(
            warnings,
            vec![UnifyWarning::NoStandingsMatch {
                player: "Somebody Else".to_string()
            }]
        );
        // Alice still got her rank written.
        assert_eq!(standings.cell(0, 0), "1");
    }

    #[test]
    fn warns_on_extra_player_in_top_cut() {
        let mut standings = table(&[("1", "ghost", "Dropped Player"), ("2", "bob", "Bob")]);
        let placements = vec![Placement::new("1st", "Alice"), Placement::new("2nd", "Bob")];

        let warnings = unify_placements(&mut standings, &placements).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.contains(&UnifyWarning::NoStandingsMatch {
            player: "Alice".to_string()
        }));
        assert!(warnings.contains(&UnifyWarning::ExtraTopCutPlayer {
            rank: 1,
            username: "ghost".to_string(),
            team: "Dropped Player".to_string(),
        }));
    }

    #[test]
    fn skips_malformed_placements_and_empty_names() {
        let mut standings = table(&[("7", "alice", "Alice")]);
        let placements = vec![
            Placement::new("not a rank", "Alice"),
            Placement::new("1st", "   "),
        ];

        let warnings = unify_placements(&mut standings, &placements).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(standings.cell(0, 0), "7");
    }

    #[test]
    fn range_placement_uses_better_bound() {
        let mut standings = table(&[("12", "dave", "Dave")]);
        let placements = vec![Placement::new("5th-8th", "Dave")];

        unify_placements(&mut standings, &placements).unwrap();
        assert_eq!(standings.cell(0, 0), "5");
    }

    #[test]
    fn unification_is_idempotent() {
        let mut standings = table(&[("3", "alice", "Alice"), ("4", "bob", "Bob")]);
        let placements = vec![Placement::new("1st", "Alice"), Placement::new("2nd", "Bob")];

        unify_placements(&mut standings, &placements).unwrap();
        let once = standings.clone();
        let warnings = unify_placements(&mut standings, &placements).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(standings, once);
    }

    #[test]
    fn unify_file_pairs_placements_with_standings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("123_placements.txt"), "1st: Alice\n2nd: Bob\n").unwrap();
        table(&[("9", "alice", "Alice"), ("10", "bob", "Bob")])
            .write_to_path(&dir.path().join("123_standings.csv"))
            .unwrap();

        let warnings = unify_file(&dir.path().join("123_placements.txt")).unwrap();
        assert!(warnings.is_empty());

        let unified =
            StandingsTable::from_path(&dir.path().join("123_standings_unified.csv")).unwrap();
        assert_eq!(unified.cell(0, 0), "1");
        assert_eq!(unified.cell(1, 0), "2");
    }

    #[test]
    fn unify_file_prefers_the_incomplete_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("9_placements.txt"), "1st: Alice\n").unwrap();
        table(&[("4", "alice", "Alice")])
            .write_to_path(&dir.path().join("9_standings_incomplete.csv"))
            .unwrap();
        table(&[("8", "alice", "Alice")])
            .write_to_path(&dir.path().join("9_standings.csv"))
            .unwrap();

        unify_file(&dir.path().join("9_placements.txt")).unwrap();

        let unified =
            StandingsTable::from_path(&dir.path().join("9_standings_incomplete_unified.csv"))
                .unwrap();
        assert_eq!(unified.cell(0, 0), "1");
    }

    #[test]
    fn missing_rank_column_is_an_error() {
        let mut standings = StandingsTable::new(
            vec!["Username".to_string(), "Players/Teams".to_string()],
            vec![vec!["alice".to_string(), "Alice".to_string()]],
        );
        let placements = vec![Placement::new("1st", "Alice")];
        assert!(unify_placements(&mut standings, &placements).is_err());
    }
}
