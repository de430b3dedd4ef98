#![allow(clippy::missing_errors_doc)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use funnel_events_core::{
    parse_timestamp, Event, EventStore, EventType, FunnelError, StoredEvent,
};
use rusqlite::{params, Connection, OptionalExtension};

const EVENTS_MIGRATION_VERSION: i64 = 1;

pub const EXPORT_HEADER: [&str; 8] = [
    "user_id",
    "event_type",
    "source",
    "browser",
    "amount",
    "pages_viewed",
    "call_successful",
    "timestamp",
];

const SCHEMA_EVENTS_V1: &str = r"
CREATE TABLE IF NOT EXISTS events (
  event_id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL CHECK (user_id >= 1),
  event_type INTEGER NOT NULL,
  source TEXT,
  browser TEXT,
  amount REAL,
  pages_viewed INTEGER,
  call_successful INTEGER CHECK (call_successful IN (0, 1) OR call_successful IS NULL),
  timestamp TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_events_no_update
BEFORE UPDATE ON events
BEGIN
  SELECT RAISE(FAIL, 'events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_events_no_delete
BEFORE DELETE ON events
BEGIN
  SELECT RAISE(FAIL, 'events is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_events_user_type
  ON events(user_id, event_type);
";

const SELECT_EVENT_COLUMNS: &str = "SELECT
    event_id, user_id, event_type, source, browser,
    amount, pages_viewed, call_successful, timestamp
 FROM events";

pub struct SqliteEventStore {
    conn: Connection,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FunnelSummary {
    pub users: usize,
    pub events: usize,
    /// Number of users that reached each event type.
    pub users_per_event_type: BTreeMap<u8, usize>,
}

#[derive(Debug, serde::Serialize)]
struct ExportRow<'a> {
    user_id: u64,
    event_type: u8,
    source: Option<&'a str>,
    browser: Option<&'a str>,
    amount: Option<f64>,
    pages_viewed: Option<i64>,
    call_successful: Option<u8>,
    timestamp: String,
}

impl SqliteEventStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_EVENTS_V1)
            .context("failed to apply events schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at)
                 VALUES (?1, datetime('now'))",
                params![EVENTS_MIGRATION_VERSION],
            )
            .context("failed to register events schema migration")?;

        Ok(())
    }

    pub fn save_event(&mut self, event: &Event) -> Result<i64> {
        let user_id = i64::try_from(event.user_id)
            .with_context(|| format!("user_id {} does not fit in sqlite INTEGER", event.user_id))?;
        let timestamp = event
            .timestamp_text()
            .map_err(|err| anyhow!(err.to_string()))?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start event transaction")?;

        tx.execute(
            "INSERT INTO events(
                user_id, event_type, source, browser,
                amount, pages_viewed, call_successful, timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                i64::from(event.event_type.get()),
                event.source,
                event.browser,
                event.amount,
                event.pages_viewed,
                event.call_successful.map(i64::from),
                timestamp,
            ],
        )
        .context("failed to append event")?;

        let event_id = tx.last_insert_rowid();
        tx.commit().context("failed to commit event transaction")?;

        Ok(event_id)
    }

    pub fn user_event_types(&self, user_id: u64) -> Result<BTreeSet<EventType>> {
        let user_id = sql_user_id(user_id)?;
        let mut stmt = self
            .conn
            .prepare("SELECT event_type FROM events WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| parse_event_type(row, 0))?;

        let mut recorded = BTreeSet::new();
        for row in rows {
            recorded.insert(row?);
        }
        Ok(recorded)
    }

    pub fn list_user_events(&self, user_id: u64) -> Result<Vec<StoredEvent>> {
        let user_id = sql_user_id(user_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_EVENT_COLUMNS}
             WHERE user_id = ?1
             ORDER BY event_type ASC, event_id ASC"
        ))?;

        let rows = stmt.query_map(params![user_id], parse_event_row)?;
        collect_rows(rows)
    }

    /// All events in export order: user id, then event type.
    pub fn list_events(&self) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_EVENT_COLUMNS}
             ORDER BY user_id ASC, event_type ASC, event_id ASC"
        ))?;

        let rows = stmt.query_map([], parse_event_row)?;
        collect_rows(rows)
    }

    pub fn count_events(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .context("failed to count events")?;
        usize::try_from(count).with_context(|| format!("invalid event count: {count}"))
    }

    pub fn funnel_summary(&self) -> Result<FunnelSummary> {
        let users: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT user_id) FROM events", [], |row| {
                row.get(0)
            })
            .context("failed to count users")?;

        let mut stmt = self.conn.prepare(
            "SELECT event_type, COUNT(DISTINCT user_id)
             FROM events
             GROUP BY event_type
             ORDER BY event_type ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let event_type = parse_event_type(row, 0)?;
            let count: i64 = row.get(1)?;
            Ok((event_type, count))
        })?;

        let mut users_per_event_type = BTreeMap::new();
        for row in rows {
            let (event_type, count) = row?;
            let count = usize::try_from(count)
                .with_context(|| format!("invalid user count: {count}"))?;
            users_per_event_type.insert(event_type.get(), count);
        }

        Ok(FunnelSummary {
            users: usize::try_from(users).with_context(|| format!("invalid user count: {users}"))?,
            events: self.count_events()?,
            users_per_event_type,
        })
    }

    /// Writes every stored event to `path` as CSV, header first, ordered by
    /// user id then event type. Absent optional values become empty cells.
    pub fn export_csv(&self, path: &Path) -> Result<ExportReport> {
        let events = self.list_events()?;

        let file = File::create(path)
            .with_context(|| format!("failed to create export file {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        writer
            .write_record(EXPORT_HEADER)
            .context("failed to write export header")?;

        for stored in &events {
            let event = &stored.event;
            writer
                .serialize(ExportRow {
                    user_id: event.user_id,
                    event_type: event.event_type.get(),
                    source: event.source.as_deref(),
                    browser: event.browser.as_deref(),
                    amount: event.amount,
                    pages_viewed: event.pages_viewed,
                    call_successful: event.call_successful,
                    timestamp: event
                        .timestamp_text()
                        .map_err(|err| anyhow!(err.to_string()))?,
                })
                .with_context(|| format!("failed to write export row for event {}", stored.event_id))?;
        }

        writer
            .flush()
            .with_context(|| format!("failed to flush export file {}", path.display()))?;

        Ok(ExportReport {
            path: path.to_path_buf(),
            rows: events.len(),
        })
    }

    pub fn migration_version(&self) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()
            .context("failed to read schema_migrations")
            .map(Option::flatten)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl EventStore for SqliteEventStore {
    fn save(&mut self, event: &Event) -> Result<i64, FunnelError> {
        self.save_event(event)
            .map_err(|err| FunnelError::Storage(format!("{err:#}")))
    }

    fn user_event_types(&self, user_id: u64) -> Result<BTreeSet<EventType>, FunnelError> {
        SqliteEventStore::user_event_types(self, user_id)
            .map_err(|err| FunnelError::Storage(format!("{err:#}")))
    }
}

fn sql_user_id(user_id: u64) -> Result<i64> {
    i64::try_from(user_id)
        .with_context(|| format!("user_id {user_id} does not fit in sqlite INTEGER"))
}

fn conversion_error(column: usize, kind: rusqlite::types::Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_event_type(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<EventType> {
    let raw: i64 = row.get(column)?;
    u8::try_from(raw).map(EventType).map_err(|_| {
        conversion_error(
            column,
            rusqlite::types::Type::Integer,
            format!("invalid event_type: {raw}"),
        )
    })
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
    let event_id: i64 = row.get(0)?;
    let user_id_raw: i64 = row.get(1)?;
    let call_successful_raw: Option<i64> = row.get(7)?;
    let timestamp_raw: String = row.get(8)?;

    let user_id = u64::try_from(user_id_raw)
        .ok()
        .filter(|value| *value >= 1)
        .ok_or_else(|| {
            conversion_error(
                1,
                rusqlite::types::Type::Integer,
                format!("invalid user_id: {user_id_raw}"),
            )
        })?;

    let call_successful = call_successful_raw
        .map(|raw| match raw {
            0 | 1 => Ok(u8::from(raw == 1)),
            _ => Err(conversion_error(
                7,
                rusqlite::types::Type::Integer,
                format!("invalid call_successful: {raw}"),
            )),
        })
        .transpose()?;

    let timestamp = parse_timestamp(&timestamp_raw)
        .map_err(|err| conversion_error(8, rusqlite::types::Type::Text, err.to_string()))?;

    Ok(StoredEvent {
        event_id,
        event: Event {
            user_id,
            event_type: parse_event_type(row, 2)?,
            timestamp,
            source: row.get(3)?,
            browser: row.get(4)?,
            amount: row.get(5)?,
            pages_viewed: row.get(6)?,
            call_successful,
        },
    })
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use funnel_events_core::{EventBuilder, FunnelEngine};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn fixture_store() -> SqliteEventStore {
        let store = must(SqliteEventStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn fixture_event(user_id: u64, event_type: u8, seed: u64) -> Event {
        let builder = EventBuilder::default();
        match builder.build(user_id, EventType(event_type), &mut StdRng::seed_from_u64(seed)) {
            Ok(event) => event,
            Err(err) => panic!("invalid fixture event: {err}"),
        }
    }

    fn read_export(path: &Path) -> Vec<Vec<String>> {
        let mut reader = match csv::ReaderBuilder::new().has_headers(false).from_path(path) {
            Ok(reader) => reader,
            Err(err) => panic!("failed to open export {}: {err}", path.display()),
        };
        let mut rows = Vec::new();
        for record in reader.records() {
            match record {
                Ok(record) => rows.push(record.iter().map(str::to_string).collect()),
                Err(err) => panic!("invalid export row: {err}"),
            }
        }
        rows
    }

    fn temp_dir() -> tempfile::TempDir {
        match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(err) => panic!("failed to create temp dir: {err}"),
        }
    }

    #[test]
    fn saved_event_types_are_returned_per_user() {
        let mut store = fixture_store();
        must(store.save_event(&fixture_event(1, 1, 1)));
        must(store.save_event(&fixture_event(1, 2, 2)));
        must(store.save_event(&fixture_event(2, 1, 3)));

        assert_eq!(
            must(store.user_event_types(1)),
            BTreeSet::from([EventType(1), EventType(2)])
        );
        assert_eq!(
            must(store.user_event_types(2)),
            BTreeSet::from([EventType(1)])
        );
        assert!(must(store.user_event_types(3)).is_empty());
    }

    #[test]
    fn stored_events_read_back_identically() {
        let mut store = fixture_store();
        let originals = [
            fixture_event(3, 1, 10),
            fixture_event(3, 2, 11),
            fixture_event(3, 3, 12),
            fixture_event(3, 4, 13),
        ];
        for event in &originals {
            must(store.save_event(event));
        }

        let listed = must(store.list_user_events(3));
        let events: Vec<Event> = listed.into_iter().map(|stored| stored.event).collect();
        assert_eq!(events, originals.to_vec());
    }

    #[test]
    fn append_only_trigger_blocks_updates_and_deletes() {
        let mut store = fixture_store();
        let event_id = must(store.save_event(&fixture_event(1, 1, 1)));

        let update_result = store.connection().execute(
            "UPDATE events SET source = 'mutated' WHERE event_id = ?1",
            params![event_id],
        );
        assert!(update_result.is_err());

        let delete_result = store
            .connection()
            .execute("DELETE FROM events WHERE event_id = ?1", params![event_id]);
        assert!(delete_result.is_err());
        assert_eq!(must(store.count_events()), 1);
    }

    #[test]
    fn store_does_not_deduplicate() {
        let mut store = fixture_store();
        must(store.save_event(&fixture_event(1, 1, 1)));
        must(store.save_event(&fixture_event(1, 1, 2)));
        assert_eq!(must(store.count_events()), 2);
        assert_eq!(
            must(store.user_event_types(1)),
            BTreeSet::from([EventType(1)])
        );
    }

    #[test]
    fn export_of_empty_store_is_header_only() {
        let store = fixture_store();
        let dir = temp_dir();
        let path = dir.path().join("stats.csv");

        let report = must(store.export_csv(&path));
        assert_eq!(report.rows, 0);

        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) => panic!("failed to read export: {err}"),
        };
        assert_eq!(
            body,
            "user_id,event_type,source,browser,amount,pages_viewed,call_successful,timestamp\n"
        );
    }

    #[test]
    fn export_orders_rows_and_renders_absent_values_empty() {
        let mut store = fixture_store();
        let mut saved = vec![
            fixture_event(2, 2, 1),
            fixture_event(1, 3, 2),
            fixture_event(2, 1, 3),
            fixture_event(1, 1, 4),
            fixture_event(1, 2, 5),
            fixture_event(1, 4, 6),
        ];
        saved[0].call_successful = Some(0);
        for event in &saved {
            must(store.save_event(event));
        }

        let dir = temp_dir();
        let path = dir.path().join("stats.csv");
        let report = must(store.export_csv(&path));
        assert_eq!(report.rows, saved.len());

        let rows = read_export(&path);
        assert_eq!(rows[0], EXPORT_HEADER.map(str::to_string).to_vec());

        let keys: Vec<(String, String)> = rows[1..]
            .iter()
            .map(|row| (row[0].clone(), row[1].clone()))
            .collect();
        let expected: Vec<(String, String)> = [(1, 1), (1, 2), (1, 3), (1, 4), (2, 1), (2, 2)]
            .iter()
            .map(|(user, event_type)| (user.to_string(), event_type.to_string()))
            .collect();
        assert_eq!(keys, expected);

        let confirm = &rows[4];
        assert!(confirm[2..7].iter().all(String::is_empty));
        assert!(!confirm[7].is_empty());

        let call = &rows[6];
        assert_eq!(call[6], "0");
        assert!(call[3].is_empty());
    }

    #[test]
    fn export_keeps_cyrillic_labels_intact() {
        let mut store = fixture_store();
        let mut event = fixture_event(1, 1, 12);
        event.source = Some("Яндекс".to_string());
        event.browser = Some("Планшет".to_string());
        must(store.save_event(&event));

        let dir = temp_dir();
        let path = dir.path().join("stats.csv");
        must(store.export_csv(&path));

        let rows = read_export(&path);
        assert_eq!(rows[1][2], "Яндекс");
        assert_eq!(rows[1][3], "Планшет");
    }

    #[test]
    fn export_round_trips_every_stored_field() {
        let mut store = fixture_store();
        let engine = FunnelEngine::default();
        let mut rng = StdRng::seed_from_u64(77);
        for _ in 0..3 {
            if let Err(err) = engine.run_batch(&mut store, &mut rng, 12) {
                panic!("batch failed: {err}");
            }
        }

        let dir = temp_dir();
        let path = dir.path().join("stats.csv");
        must(store.export_csv(&path));

        let rows = read_export(&path);
        let stored = must(store.list_events());
        assert_eq!(rows.len(), stored.len() + 1);

        for (row, stored) in rows[1..].iter().zip(&stored) {
            let event = &stored.event;
            assert_eq!(row[0], event.user_id.to_string());
            assert_eq!(row[1], event.event_type.to_string());
            assert_eq!(row[2], event.source.clone().unwrap_or_default());
            assert_eq!(row[3], event.browser.clone().unwrap_or_default());
            match event.amount {
                Some(amount) => match row[4].parse::<f64>() {
                    Ok(parsed) => assert_eq!(parsed, amount),
                    Err(err) => panic!("invalid amount cell {:?}: {err}", row[4]),
                },
                None => assert!(row[4].is_empty()),
            }
            assert_eq!(
                row[5],
                event.pages_viewed.map(|v| v.to_string()).unwrap_or_default()
            );
            assert_eq!(
                row[6],
                event.call_successful.map(|v| v.to_string()).unwrap_or_default()
            );
            assert_eq!(row[7], must(event.timestamp_text().map_err(anyhow::Error::from)));
        }
    }

    #[test]
    fn export_to_missing_directory_fails() {
        let store = fixture_store();
        let dir = temp_dir();
        let path = dir.path().join("missing").join("stats.csv");
        let err = match store.export_csv(&path) {
            Ok(report) => panic!("expected export failure, got {report:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("failed to create export file"));
    }

    #[test]
    fn engine_progresses_against_sqlite_store() {
        let mut store = fixture_store();
        let engine = FunnelEngine::default();
        let mut rng = StdRng::seed_from_u64(4);
        must(store.save_event(&fixture_event(5, 1, 0)));
        must(store.save_event(&fixture_event(5, 2, 0)));

        let third = match engine.progress(&mut store, &mut rng, 5) {
            Ok(progression) => progression,
            Err(err) => panic!("progress failed: {err}"),
        };
        assert_eq!(third.emitted, vec![EventType(3)]);
        let stored = must(store.list_user_events(5));
        assert!(stored[2].event.amount.is_some());
    }

    #[test]
    fn out_of_range_call_flag_is_reported_clearly() {
        let store = fixture_store();
        let forged = store.connection().query_row(
            "SELECT 1, 1, 2, 'Гугл', NULL, NULL, NULL, 5, '2024-01-01 00:00:00'",
            [],
            parse_event_row,
        );
        let err = match forged {
            Ok(value) => panic!("expected conversion failure, got {value:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("invalid call_successful"));
    }

    #[test]
    fn invalid_stored_timestamp_is_reported_clearly() {
        let store = fixture_store();
        if let Err(err) = store.connection().execute(
            "INSERT INTO events(user_id, event_type, timestamp) VALUES (1, 1, '2024-01-01T00:00:00Z')",
            [],
        ) {
            panic!("setup insert failed: {err}");
        }

        let err = match store.list_events() {
            Ok(value) => panic!("expected list failure, got {value:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn schema_contract_contains_expected_columns_and_triggers() {
        let store = fixture_store();
        let mut stmt = match store.connection().prepare("PRAGMA table_info(events)") {
            Ok(stmt) => stmt,
            Err(err) => panic!("failed to inspect events: {err}"),
        };
        let columns = match stmt.query_map([], |row| row.get::<_, String>(1)) {
            Ok(rows) => must(collect_rows(rows)),
            Err(err) => panic!("failed to read table_info: {err}"),
        };
        assert_eq!(
            columns,
            [
                "event_id",
                "user_id",
                "event_type",
                "source",
                "browser",
                "amount",
                "pages_viewed",
                "call_successful",
                "timestamp",
            ]
        );

        let trigger_count = match store.connection().query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='trigger'
               AND name IN ('trg_events_no_update', 'trg_events_no_delete')",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to query trigger contract: {err}"),
        };
        assert_eq!(trigger_count, 2);
    }

    #[test]
    fn migration_is_idempotent_and_preserves_existing_data() {
        let mut store = fixture_store();
        must(store.save_event(&fixture_event(1, 1, 1)));
        must(store.migrate());
        assert_eq!(must(store.count_events()), 1);
        assert_eq!(must(store.migration_version()), Some(EVENTS_MIGRATION_VERSION));
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = temp_dir();
        let path = dir.path().join("events.db");
        {
            let mut store = must(SqliteEventStore::open(&path));
            must(store.migrate());
            must(store.save_event(&fixture_event(1, 1, 1)));
        }

        let store = must(SqliteEventStore::open(&path));
        must(store.migrate());
        assert_eq!(
            must(store.user_event_types(1)),
            BTreeSet::from([EventType(1)])
        );
    }

    #[test]
    fn summary_counts_users_reaching_each_step() {
        let mut store = fixture_store();
        for (user_id, event_type) in [(1, 1), (1, 2), (2, 1), (3, 1), (3, 2), (3, 3)] {
            must(store.save_event(&fixture_event(user_id, event_type, 0)));
        }

        let summary = must(store.funnel_summary());
        assert_eq!(summary.users, 3);
        assert_eq!(summary.events, 6);
        assert_eq!(
            summary.users_per_event_type,
            BTreeMap::from([(1, 3), (2, 2), (3, 1)])
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_progression_keeps_prefix_invariant(
            seed in any::<u64>(),
            calls in prop::collection::vec(1u64..=6, 1..40),
        ) {
            let mut store = fixture_store();
            let engine = FunnelEngine::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut counts = BTreeMap::new();

            for user_id in calls {
                let before = must(store.list_user_events(user_id)).len();
                let progression = match engine.progress(&mut store, &mut rng, user_id) {
                    Ok(value) => value,
                    Err(err) => panic!("progress failed: {err}"),
                };
                let recorded = must(store.user_event_types(user_id));
                let after = must(store.list_user_events(user_id)).len();

                prop_assert_eq!(after, before + progression.emitted.len());
                prop_assert_eq!(after, recorded.len());
                let prefix: BTreeSet<EventType> = (1..=u8::try_from(after).unwrap_or(u8::MAX))
                    .map(EventType)
                    .collect();
                prop_assert_eq!(&recorded, &prefix);
                prop_assert!(after >= *counts.get(&user_id).unwrap_or(&0));
                counts.insert(user_id, after);
            }
        }
    }
}
