use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A tournament within the database.
///
/// Hub-sourced rows carry date/name/location/level; export-sourced rows may
/// be placeholders holding nothing but the melee link until the hub record
/// arrives.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tournament {
    pub tournament_id: i64,
    pub date: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub level: Option<String>,
    pub link: Option<String>,
}

/// Hub-sourced tournament metadata, keyed by (date, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentMeta {
    pub date: NaiveDate,
    pub name: String,
    /// ISO-2 country code.
    pub location: Option<String>,
    pub level: Option<String>,
    pub link: Option<String>,
}

/// A fully-specified deck identity: leader, base and the decklist link.
/// Rows with an unknown leader or base never produce one of these; the
/// result is stored with a NULL deck reference instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckSpec {
    pub leader_name: String,
    pub leader_subtitle: String,
    pub base: String,
    pub decklink: String,
}

impl DeckSpec {
    /// Parses the leader/base/decklink cells of a standings row.
    ///
    /// The extractor writes a literal "-" for anything it could not read.
    /// A leader must decompose into exactly `name, subtitle`, and neither
    /// part nor the base may be the unknown marker; otherwise there is no
    /// deck to record and `None` is returned.
    pub fn parse(leader: &str, base: &str, decklink: &str) -> Option<Self> {
        let leader = leader.trim();
        let base = base.trim();
        if leader.is_empty() || leader == "-" || base.is_empty() || base == "-" {
            return None;
        }
        let parts: Vec<&str> = leader.split(", ").collect();
        let [leader_name, leader_subtitle] = parts.as_slice() else {
            return None;
        };
        if *leader_name == "-" || *leader_subtitle == "-" {
            return None;
        }
        Some(Self {
            leader_name: leader_name.to_string(),
            leader_subtitle: leader_subtitle.to_string(),
            base: base.to_string(),
            decklink: decklink.trim().to_string(),
        })
    }
}

/// Row counts reported after a cleanup sweep. A second sweep over the same
/// store reports all zeroes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub results_updated: u64,
    pub decks_deleted: u64,
    pub leaders_deleted: u64,
    pub bases_deleted: u64,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}
