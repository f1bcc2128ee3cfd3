use std::fs;
use std::path::Path;

use anyhow::bail;
use tracing::{debug, info};

use crate::database::models::DeckSpec;
use crate::database::{
    DeckDatabase, PlayerDatabase, ResultDatabase, SqliteDatabase, TournamentDatabase,
};
use crate::standings::StandingsTable;
use crate::AppError;

/// What one standings import did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub results_inserted: u64,
    /// Rows whose (tournament, player) result was already present.
    pub results_skipped: u64,
    /// Rows with no usable player name or rank.
    pub rows_ignored: u64,
}

/// Ingests every `*_standings*.csv` in `dir`. Each file's melee id is the
/// filename prefix before the first `_`.
pub async fn import_directory(db: &SqliteDatabase, dir: &Path) -> Result<(), AppError> {
    let mut found = false;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains("_standings") || !name.ends_with(".csv") {
            continue;
        }
        found = true;
        let summary = import_file(db, &path).await?;
        info!(
            "{}: {} results inserted, {} already present, {} rows ignored",
            name, summary.results_inserted, summary.results_skipped, summary.rows_ignored
        );
    }
    if !found {
        info!("no standings files found in {}", dir.display());
    }
    Ok(())
}

pub async fn import_file(db: &SqliteDatabase, path: &Path) -> Result<ImportSummary, AppError> {
    let Some(melee_id) = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('_').next())
    else {
        bail!("cannot derive a melee id from {}", path.display());
    };
    let table = StandingsTable::from_path(path)?;
    import_table(db, melee_id, &table).await
}

/// Resolves every row of a standings table into the store.
///
/// Identity resolution is lookup-before-insert at every level, so feeding
/// the same table twice leaves the store unchanged.
pub async fn import_table(
    db: &SqliteDatabase,
    melee_id: &str,
    table: &StandingsTable,
) -> Result<ImportSummary, AppError> {
    let tournament_id = resolve_tournament(db, melee_id).await?;

    // The username column is preferred where the export carries it; older
    // exports only have the display name.
    let name_col = table.column("Username").or_else(|| table.column("Players/Teams"));
    let rank_col = table.require_column("Rank")?;
    let leader_col = table.column("Leader");
    let base_col = table.column("Base");
    let decklink_col = table.column("Decklink");

    let mut summary = ImportSummary::default();

    for row in 0..table.len() {
        let player_name = name_col.map(|col| table.cell(row, col).trim()).unwrap_or("");
        let rank: Option<i64> = table.cell(row, rank_col).trim().parse().ok();
        let (player_name, rank) = match (player_name, rank) {
            ("", _) | (_, None) => {
                summary.rows_ignored += 1;
                continue;
            }
            (name, Some(rank)) => (name, rank),
        };

        let player_id = db.get_or_create_player(player_name).await?;

        if db.result_exists(tournament_id, player_id).await? {
            summary.results_skipped += 1;
            continue;
        }

        let spec = match (leader_col, base_col) {
            (Some(leader), Some(base)) => DeckSpec::parse(
                table.cell(row, leader),
                table.cell(row, base),
                decklink_col.map(|col| table.cell(row, col)).unwrap_or(""),
            ),
            _ => None,
        };
        let deck_id = match spec {
            Some(spec) => Some(resolve_deck(db, &spec).await?),
            None => {
                debug!("no deck recorded for {player_name}");
                None
            }
        };

        db.insert_result(tournament_id, deck_id, rank, player_id).await?;
        summary.results_inserted += 1;
    }

    Ok(summary)
}

/// Melee link first (both canonical forms), then a fresh placeholder. The
/// (date, name) fallback only applies on the hub path, where those fields
/// are known; an export carries nothing but the link.
async fn resolve_tournament(db: &SqliteDatabase, melee_id: &str) -> Result<i64, AppError> {
    match db.get_tournament_by_melee_id(melee_id).await? {
        Some(id) => {
            debug!("tournament {melee_id} already exists with id {id}");
            Ok(id)
        }
        None => db.insert_placeholder_tournament(melee_id).await,
    }
}

async fn resolve_deck(db: &SqliteDatabase, spec: &DeckSpec) -> Result<i64, AppError> {
    let leader_id = db
        .get_or_create_leader(&spec.leader_name, &spec.leader_subtitle)
        .await?;
    let base_id = db.get_or_create_base(&spec.base).await?;
    db.get_or_create_deck(leader_id, base_id, &spec.decklink).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> SqliteDatabase {
        let db = SqliteDatabase::connect_with("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn sample_table() -> StandingsTable {
        let headers = [
            "Rank",
            "Username",
            "Players/Teams",
            "Leader",
            "Base",
            "Decklink",
        ];
        let rows = [
            ["1", "alice", "Alice", "Boba Fett, Daimyo", "Jabba's Palace", "https://melee.gg/Decklist/View/a"],
            ["2", "bob", "Bob", "Han Solo, Audacious Smuggler", "Echo Base", "https://melee.gg/Decklist/View/b"],
            // Unknown deck: the result is kept with a NULL deck reference.
            ["3", "carol", "Carol", "-", "-", "-"],
            // No rank: skipped entirely.
            ["", "dave", "Dave", "-", "-", "-"],
            // No player name: skipped entirely.
            ["5", "", "", "-", "-", "-"],
        ];
        StandingsTable::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    async fn count(db: &SqliteDatabase, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&db.pool).await.unwrap()
    }

    #[tokio::test]
    async fn imports_a_standings_table() {
        let db = test_db().await;

        let summary = import_table(&db, "123", &sample_table()).await.unwrap();
        assert_eq!(summary.results_inserted, 3);
        assert_eq!(summary.results_skipped, 0);
        assert_eq!(summary.rows_ignored, 2);

        assert_eq!(count(&db, "SELECT COUNT(*) FROM tournaments").await, 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM players").await, 3);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM leaders").await, 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM bases").await, 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM decks").await, 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM results").await, 3);
    }

    #[tokio::test]
    async fn reimporting_the_same_table_changes_nothing() {
        let db = test_db().await;

        import_table(&db, "123", &sample_table()).await.unwrap();
        let summary = import_table(&db, "123", &sample_table()).await.unwrap();

        assert_eq!(summary.results_inserted, 0);
        assert_eq!(summary.results_skipped, 3);

        assert_eq!(count(&db, "SELECT COUNT(*) FROM tournaments").await, 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM players").await, 3);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM leaders").await, 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM decks").await, 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM results").await, 3);
    }

    #[tokio::test]
    async fn unknown_leader_never_creates_entities() {
        let db = test_db().await;
        let headers = ["Rank", "Username", "Players/Teams", "Leader", "Base", "Decklink"];
        let table = StandingsTable::new(
            headers.iter().map(|h| h.to_string()).collect(),
            vec![vec![
                "1".to_string(),
                "alice".to_string(),
                "Alice".to_string(),
                "-".to_string(),
                "Echo Base".to_string(),
                "-".to_string(),
            ]],
        );

        import_table(&db, "9", &table).await.unwrap();

        assert_eq!(count(&db, "SELECT COUNT(*) FROM leaders").await, 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM bases").await, 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM decks").await, 0);
        assert_eq!(
            count(&db, "SELECT COUNT(*) FROM results WHERE deck_id IS NULL").await,
            1
        );
    }

    #[tokio::test]
    async fn falls_back_to_display_name_column() {
        let db = test_db().await;
        let table = StandingsTable::new(
            vec!["Rank".to_string(), "Players/Teams".to_string()],
            vec![vec!["1".to_string(), "Alice".to_string()]],
        );

        let summary = import_table(&db, "9", &table).await.unwrap();
        assert_eq!(summary.results_inserted, 1);

        let name: String = sqlx::query_scalar("SELECT name FROM players")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(name, "Alice");
    }

    #[tokio::test]
    async fn import_resolves_into_an_existing_hub_tournament() {
        let db = test_db().await;

        // Hub record first, carrying the melee link.
        sqlx::query(
            "INSERT INTO tournaments (date, name, link) VALUES ('2025-06-01', 'Planetary Qualifier', 'https://www.melee.gg/Tournament/View/42')",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        import_table(&db, "42", &sample_table()).await.unwrap();

        assert_eq!(count(&db, "SELECT COUNT(*) FROM tournaments").await, 1);
    }

    #[tokio::test]
    async fn import_file_uses_the_filename_prefix_as_melee_id() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("314_standings_unified.csv");
        sample_table().write_to_path(&path).unwrap();

        import_file(&db, &path).await.unwrap();

        let link: String = sqlx::query_scalar("SELECT link FROM tournaments")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(link, "https://melee.gg/Tournament/View/314");
    }
}
