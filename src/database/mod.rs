use std::str::FromStr;

use anyhow::{bail, Context};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::AppError;

use self::models::{CleanupReport, Tournament, TournamentMeta};

/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// The SQLite store holding the normalized tournament metagame data.
#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pub pool: SqlitePool,
}

impl SqliteDatabase {
    /// Connects using the `DATABASE_URL` environment variable
    /// (e.g. `sqlite://swu_meta.db`), creating the file if necessary.
    pub async fn connect() -> Result<Self, AppError> {
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        let db_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                return Err(AppError::msg("DATABASE_URL environment variable not found"));
            }
        };
        let database = Self::connect_with(&db_url).await?;
        info!("Successfully connected to the database.");
        Ok(database)
    }

    pub async fn connect_with(db_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid database url {db_url:?}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        // Ingestion is strictly sequential, and a single connection keeps
        // in-memory databases coherent across queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(SqliteDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Tournament identity resolution and creation.
///
/// A tournament seen from the hub is identified by (date, name); one seen
/// from a standings export is identified by its melee link. The same event
/// can arrive from both sources, so lookups try the link first and fall
/// back to (date, name).
#[allow(async_fn_in_trait)]
pub trait TournamentDatabase {
    type Error;

    /// Looks a tournament up by its melee id, trying both the bare and the
    /// `www.`-prefixed canonical link forms.
    async fn get_tournament_by_melee_id(&self, melee_id: &str)
        -> Result<Option<i64>, Self::Error>;

    /// Looks a tournament up by its hub identity.
    async fn get_tournament_by_date_name(
        &self,
        date: &str,
        name: &str,
    ) -> Result<Option<i64>, Self::Error>;

    /// Inserts a placeholder row for a tournament known only by its melee
    /// id. Date and name stay empty until a hub record supplies them.
    async fn insert_placeholder_tournament(&self, melee_id: &str) -> Result<i64, Self::Error>;

    /// Inserts a hub-sourced tournament if its (date, name) identity is new
    /// and returns the row id either way.
    async fn register_tournament(&self, meta: &TournamentMeta) -> Result<i64, Self::Error>;

    async fn get_tournament(&self, tournament_id: i64) -> Result<Option<Tournament>, Self::Error>;
}

impl TournamentDatabase for SqliteDatabase {
    type Error = AppError;

    async fn get_tournament_by_melee_id(
        &self,
        melee_id: &str,
    ) -> Result<Option<i64>, Self::Error> {
        for link in [
            format!("https://melee.gg/Tournament/View/{melee_id}"),
            format!("https://www.melee.gg/Tournament/View/{melee_id}"),
        ] {
            let id: Option<i64> =
                sqlx::query_scalar("SELECT tournament_id FROM tournaments WHERE link = ?")
                    .bind(&link)
                    .fetch_optional(&self.pool)
                    .await?;
            if id.is_some() {
                return Ok(id);
            }
        }
        Ok(None)
    }

    async fn get_tournament_by_date_name(
        &self,
        date: &str,
        name: &str,
    ) -> Result<Option<i64>, Self::Error> {
        let id = sqlx::query_scalar("SELECT tournament_id FROM tournaments WHERE date = ? AND name = ?")
            .bind(date)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_placeholder_tournament(&self, melee_id: &str) -> Result<i64, Self::Error> {
        // The link is kept on the placeholder so that re-ingesting the same
        // export resolves to this row instead of minting a new one.
        let link = format!("https://melee.gg/Tournament/View/{melee_id}");
        info!("inserting placeholder tournament for {link}");
        let id = sqlx::query_scalar(
            "INSERT INTO tournaments (date, name, link) VALUES ('', '', ?) RETURNING tournament_id",
        )
        .bind(&link)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn register_tournament(&self, meta: &TournamentMeta) -> Result<i64, Self::Error> {
        let date = meta.date.format("%Y-%m-%d").to_string();
        if let Some(id) = self.get_tournament_by_date_name(&date, &meta.name).await? {
            return Ok(id);
        }
        info!("inserting tournament: {} on {}", meta.name, date);
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO tournaments (date, name, location, level, link)
            VALUES (?, ?, ?, ?, ?)
            RETURNING tournament_id
            "#,
        )
        .bind(&date)
        .bind(&meta.name)
        .bind(&meta.location)
        .bind(&meta.level)
        .bind(&meta.link)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_tournament(&self, tournament_id: i64) -> Result<Option<Tournament>, Self::Error> {
        let tournament = sqlx::query_as::<_, Tournament>(
            "SELECT * FROM tournaments WHERE tournament_id = ? LIMIT 1",
        )
        .bind(tournament_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tournament)
    }
}

/// Player identity: display name, exact after trimming.
#[allow(async_fn_in_trait)]
pub trait PlayerDatabase {
    type Error;

    /// Returns the single player id for this display name, inserting the
    /// row on first sighting.
    async fn get_or_create_player(&self, name: &str) -> Result<i64, Self::Error>;
}

impl PlayerDatabase for SqliteDatabase {
    type Error = AppError;

    async fn get_or_create_player(&self, name: &str) -> Result<i64, Self::Error> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT player_id FROM players WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = sqlx::query_scalar("INSERT INTO players (name) VALUES (?) RETURNING player_id")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }
}

/// Deck identity and its two components. Leader identity is (name,
/// subtitle); base identity is the name alone; deck identity is the
/// (leader, base, decklink) triple.
#[allow(async_fn_in_trait)]
pub trait DeckDatabase {
    type Error;

    async fn get_or_create_leader(&self, name: &str, subtitle: &str) -> Result<i64, Self::Error>;

    async fn get_or_create_base(&self, name: &str) -> Result<i64, Self::Error>;

    async fn get_or_create_deck(
        &self,
        leader_id: i64,
        base_id: i64,
        decklink: &str,
    ) -> Result<i64, Self::Error>;
}

impl DeckDatabase for SqliteDatabase {
    type Error = AppError;

    async fn get_or_create_leader(&self, name: &str, subtitle: &str) -> Result<i64, Self::Error> {
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT leader_id FROM leaders WHERE name = ? AND subtitle = ?")
                .bind(name)
                .bind(subtitle)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = sqlx::query_scalar(
            "INSERT INTO leaders (name, subtitle) VALUES (?, ?) RETURNING leader_id",
        )
        .bind(name)
        .bind(subtitle)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_or_create_base(&self, name: &str) -> Result<i64, Self::Error> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT base_id FROM bases WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = sqlx::query_scalar("INSERT INTO bases (name) VALUES (?) RETURNING base_id")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn get_or_create_deck(
        &self,
        leader_id: i64,
        base_id: i64,
        decklink: &str,
    ) -> Result<i64, Self::Error> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT deck_id FROM decks WHERE leader_id = ? AND base_id = ? AND decklink = ?",
        )
        .bind(leader_id)
        .bind(base_id)
        .bind(decklink)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = sqlx::query_scalar(
            "INSERT INTO decks (leader_id, base_id, decklink) VALUES (?, ?, ?) RETURNING deck_id",
        )
        .bind(leader_id)
        .bind(base_id)
        .bind(decklink)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

/// Result rows linking a player's rank in a tournament to the deck they
/// played, when known.
#[allow(async_fn_in_trait)]
pub trait ResultDatabase {
    type Error;

    /// Whether a result already exists for this (tournament, player) pair.
    /// At most one result per pair is allowed; callers skip the insert when
    /// this returns true, which is what makes re-ingestion safe.
    async fn result_exists(&self, tournament_id: i64, player_id: i64)
        -> Result<bool, Self::Error>;

    async fn insert_result(
        &self,
        tournament_id: i64,
        deck_id: Option<i64>,
        rank: i64,
        player_id: i64,
    ) -> Result<(), Self::Error>;
}

impl ResultDatabase for SqliteDatabase {
    type Error = AppError;

    async fn result_exists(
        &self,
        tournament_id: i64,
        player_id: i64,
    ) -> Result<bool, Self::Error> {
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM results WHERE tournament_id = ? AND player_id = ? LIMIT 1",
        )
        .bind(tournament_id)
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exists.is_some())
    }

    async fn insert_result(
        &self,
        tournament_id: i64,
        deck_id: Option<i64>,
        rank: i64,
        player_id: i64,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO results (tournament_id, deck_id, result, player_id) VALUES (?, ?, ?, ?)",
        )
        .bind(tournament_id)
        .bind(deck_id)
        .bind(rank)
        .bind(player_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Repair sweep for stores written before unknown leaders/bases were
/// modeled as absent: a literal "-" was stored as if it were a real entity,
/// and every deck built on one is corrupt.
#[allow(async_fn_in_trait)]
pub trait CleanupDatabase {
    type Error;

    /// Nulls out result references to decks with an unknown leader or base,
    /// deletes those decks, and prunes the placeholder leaders/bases that
    /// nothing references any more. Runs in one transaction and is
    /// idempotent.
    async fn remove_unknown_decks(&self) -> Result<CleanupReport, Self::Error>;
}

impl CleanupDatabase for SqliteDatabase {
    type Error = AppError;

    async fn remove_unknown_decks(&self) -> Result<CleanupReport, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let bad_leaders: Vec<i64> =
            sqlx::query_scalar("SELECT leader_id FROM leaders WHERE name = '-'")
                .fetch_all(&mut *tx)
                .await?;
        let bad_bases: Vec<i64> = sqlx::query_scalar("SELECT base_id FROM bases WHERE name = '-'")
            .fetch_all(&mut *tx)
            .await?;

        if bad_leaders.is_empty() && bad_bases.is_empty() {
            info!("no unknown leaders or bases found, nothing to do");
            return Ok(CleanupReport::default());
        }

        let sql = format!(
            "SELECT deck_id FROM decks WHERE leader_id IN ({}) OR base_id IN ({})",
            placeholders(bad_leaders.len()),
            placeholders(bad_bases.len()),
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in bad_leaders.iter().chain(bad_bases.iter()) {
            query = query.bind(id);
        }
        let deck_ids = query.fetch_all(&mut *tx).await?;

        if deck_ids.is_empty() {
            info!("no decks reference the unknown leaders/bases, nothing to do");
            return Ok(CleanupReport::default());
        }

        // Refuse to run against a schema where nulling the reference would
        // fail halfway through, before any row is touched.
        if !column_allows_null(&mut tx, "results", "deck_id").await? {
            bail!("results.deck_id is NOT NULL, cannot null out deck references");
        }

        let sql = format!(
            "UPDATE results SET deck_id = NULL WHERE deck_id IN ({})",
            placeholders(deck_ids.len()),
        );
        let mut query = sqlx::query(&sql);
        for id in &deck_ids {
            query = query.bind(id);
        }
        let results_updated = query.execute(&mut *tx).await?.rows_affected();

        let sql = format!(
            "DELETE FROM decks WHERE deck_id IN ({})",
            placeholders(deck_ids.len()),
        );
        let mut query = sqlx::query(&sql);
        for id in &deck_ids {
            query = query.bind(id);
        }
        let decks_deleted = query.execute(&mut *tx).await?.rows_affected();

        // The placeholder entities themselves go only once no deck is left
        // pointing at them.
        let mut leaders_deleted = 0;
        if !bad_leaders.is_empty() {
            let sql = format!(
                "DELETE FROM leaders WHERE leader_id IN ({}) \
                 AND leader_id NOT IN (SELECT leader_id FROM decks)",
                placeholders(bad_leaders.len()),
            );
            let mut query = sqlx::query(&sql);
            for id in &bad_leaders {
                query = query.bind(id);
            }
            leaders_deleted = query.execute(&mut *tx).await?.rows_affected();
        }

        let mut bases_deleted = 0;
        if !bad_bases.is_empty() {
            let sql = format!(
                "DELETE FROM bases WHERE base_id IN ({}) \
                 AND base_id NOT IN (SELECT base_id FROM decks)",
                placeholders(bad_bases.len()),
            );
            let mut query = sqlx::query(&sql);
            for id in &bad_bases {
                query = query.bind(id);
            }
            bases_deleted = query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        Ok(CleanupReport {
            results_updated,
            decks_deleted,
            leaders_deleted,
            bases_deleted,
        })
    }
}

/// A `?,?,...` list for an `IN` clause, or `NULL` for an empty id set so
/// `IN (NULL)` matches nothing.
fn placeholders(count: usize) -> String {
    if count == 0 {
        "NULL".to_string()
    } else {
        vec!["?"; count].join(",")
    }
}

async fn column_allows_null(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    column: &str,
) -> Result<bool, AppError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut **tx)
        .await?;
    for row in rows {
        let name: String = row.try_get("name")?;
        if name == column {
            let notnull: i64 = row.try_get("notnull")?;
            return Ok(notnull == 0);
        }
    }
    bail!("column {column:?} not found in table {table:?}")
}
