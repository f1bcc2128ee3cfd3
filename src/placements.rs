use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

use crate::AppError;

/// One organizer-reported top cut entry: a free-text placement such as
/// "1st" or "5th-8th" paired with the player's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub placement: String,
    pub player: String,
}

impl Placement {
    pub fn new(placement: impl Into<String>, player: impl Into<String>) -> Self {
        Self {
            placement: placement.into(),
            player: player.into(),
        }
    }

    /// The single best rank this placement denotes, if it parses at all.
    pub fn rank(&self) -> Option<u32> {
        parse_placement(&self.placement)
    }
}

static PLACEMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:st|nd|rd|th)(?:-(\d+)(?:st|nd|rd|th))?")
        .expect("placement pattern is valid")
});

/// Parses an ordinal placement string into a rank.
///
/// Range placements ("5th-8th") collapse to the better bound; the results
/// table carries a single rank per player, so the upper bound is dropped.
/// Anything that does not look like an ordinal yields `None`.
pub fn parse_placement(placement: &str) -> Option<u32> {
    let captures = PLACEMENT_PATTERN.captures(placement)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Loads a placements file: one `<placement>: <player>` entry per line,
/// split on the first colon. Lines without a colon or with an empty player
/// name are skipped.
pub fn load_placements(path: &Path) -> Result<Vec<Placement>, AppError> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read placements file {}", path.display()))?;

    let mut placements = Vec::new();
    for line in contents.lines() {
        let Some((placement, player)) = line.split_once(':') else {
            continue;
        };
        let player = player.trim();
        if player.is_empty() {
            continue;
        }
        placements.push(Placement::new(placement.trim(), player));
    }

    Ok(placements)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_simple_ordinals() {
        assert_eq!(parse_placement("1st"), Some(1));
        assert_eq!(parse_placement("2nd"), Some(2));
        assert_eq!(parse_placement("3rd"), Some(3));
        assert_eq!(parse_placement("4th"), Some(4));
        assert_eq!(parse_placement("22nd"), Some(22));
    }

    #[test]
    fn range_resolves_to_better_bound() {
        assert_eq!(parse_placement("5th-8th"), Some(5));
        assert_eq!(parse_placement("9th-16th"), Some(9));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_placement("garbage"), None);
        assert_eq!(parse_placement(""), None);
        assert_eq!(parse_placement("5"), None);
        assert_eq!(parse_placement("th5"), None);
    }

    #[test]
    fn loads_placements_skipping_blank_players() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1st: Alice").unwrap();
        writeln!(file, "2nd:").unwrap();
        writeln!(file, "no colon here").unwrap();
        writeln!(file, "3rd-4th: Bob: The Builder").unwrap();
        file.flush().unwrap();

        let placements = load_placements(file.path()).unwrap();
        assert_eq!(
            placements,
            vec![
                Placement::new("1st", "Alice"),
                Placement::new("3rd-4th", "Bob: The Builder"),
            ]
        );
    }
}
