//! Embedded relational store (C10, SPEC_FULL.md §6): schema, idempotent
//! migrations, and the batched upserts the engine writes once per admitted
//! marathon tick. Grounded on the donor pack's `sqlx` transaction/upsert
//! idiom (`adamtc007-ob-poc`'s `document_bundles::service` —
//! `tx.begin()` + `INSERT ... ON CONFLICT DO UPDATE ... RETURNING`),
//! adapted to SQLite's `WHERE`-guarded upsert so a split only ever moves
//! forward in time. Logs with `log`, matching the donor's
//! `crawl_engine`/`link_index` layers rather than the `tracing` used at the
//! browser-worker boundary.

use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use sqlx::sqlite::SqlitePoolOptions;

use crate::distance;
use crate::error::PersistError;
use crate::models::AssetKind;

/// Net-time-from-clocks accumulator (SPEC_FULL.md §4.8), expressed as a
/// literal parameterized CTE chain rather than Rust row-processing: dedup
/// each `point_km` to its most-recently-seen `pass_clock` via `ROW_NUMBER()`,
/// parse `HH:MM:SS` to seconds by substring arithmetic, then sum adjacent
/// `LAG()` gaps with a +86400 correction on any backward (midnight) jump.
/// Mirrors the donor's raw-SQL-constant style (`link_index`'s query literals).
const CALC_NET_TIME_SQL: &str = r"
WITH base AS (
    SELECT point_km, pass_clock, seen_at
    FROM splits
    WHERE participant_id = ?
      AND pass_clock IS NOT NULL
      AND LENGTH(pass_clock) >= 8
),
dedup AS (
    SELECT point_km, pass_clock,
        ROW_NUMBER() OVER (PARTITION BY point_km ORDER BY seen_at DESC) AS rn
    FROM base
),
ordered AS (
    SELECT point_km, pass_clock FROM dedup WHERE rn = 1 ORDER BY point_km
),
parsed AS (
    SELECT point_km,
        (CAST(substr(pass_clock,1,2) AS INTEGER) * 3600
            + CAST(substr(pass_clock,4,2) AS INTEGER) * 60
            + CAST(substr(pass_clock,7,2) AS INTEGER)) AS sec
    FROM ordered
),
gaps AS (
    SELECT
        LAG(sec) OVER (ORDER BY point_km) AS prev_sec,
        CASE
            WHEN sec < LAG(sec) OVER (ORDER BY point_km) THEN (sec + 86400) - LAG(sec) OVER (ORDER BY point_km)
            ELSE sec - LAG(sec) OVER (ORDER BY point_km)
        END AS gap_sec
    FROM parsed
)
SELECT SUM(gap_sec) FROM gaps WHERE prev_sec IS NOT NULL;
";

/// Run [`CALC_NET_TIME_SQL`] for one participant, formatting the summed gap
/// seconds as `HH:MM:SS`. `None` when fewer than two distinct clock points
/// are on record.
async fn calc_net_time_from_clocks(tx: &mut Transaction<'_, Sqlite>, participant_id: i64) -> Result<Option<String>, PersistError> {
    let total_seconds: Option<i64> = sqlx::query_scalar(CALC_NET_TIME_SQL)
        .bind(participant_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(total_seconds.map(crate::time::format_duration_hms))
}

/// Open (creating if absent) the embedded SQLite database at `path`, with
/// WAL mode and a 5s busy timeout so the image workers and engine can write
/// concurrently (SPEC_FULL.md §5), and foreign keys enforced.
pub async fn open_pool(path: &std::path::Path) -> Result<SqlitePool, PersistError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await?;
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout=5000;").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON;").execute(&pool).await?;
    Ok(pool)
}

/// `CREATE TABLE IF NOT EXISTS` for every core table plus the required
/// `marathons(join_code)` index. Safe to call on every startup.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), PersistError> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS marathons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            url_template TEXT NOT NULL,
            usedata TEXT NOT NULL,
            total_km REAL NOT NULL DEFAULT 21.1,
            refresh_sec INTEGER NOT NULL DEFAULT 60,
            enabled INTEGER NOT NULL DEFAULT 1,
            event_date TEXT,
            join_code TEXT NOT NULL UNIQUE
        );
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_marathons_join_code ON marathons(join_code);")
        .execute(pool)
        .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS participants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            marathon_id INTEGER NOT NULL REFERENCES marathons(id) ON DELETE CASCADE,
            nameorbibno TEXT NOT NULL,
            alias TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            race_label TEXT,
            race_total_km REAL,
            finish_image_url TEXT,
            finish_image_path TEXT,
            UNIQUE(marathon_id, nameorbibno)
        );
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS splits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            participant_id INTEGER NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
            point_label TEXT NOT NULL,
            point_km REAL,
            net_time TEXT,
            pass_clock TEXT,
            pace TEXT,
            seen_at INTEGER NOT NULL,
            UNIQUE(participant_id, point_label)
        );
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS assets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            participant_id INTEGER NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            url TEXT NOT NULL,
            local_path TEXT,
            host_hint TEXT,
            seen_at INTEGER NOT NULL,
            UNIQUE(participant_id, kind)
        );
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            marathon_id INTEGER NOT NULL REFERENCES marathons(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            group_code TEXT UNIQUE NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT
        );
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_code ON groups(group_code);")
        .execute(pool)
        .await?;

    run_migrations(pool).await?;
    Ok(())
}

/// Idempotent column-adds guarded by `PRAGMA table_info` introspection, so
/// re-running this against an already-migrated database is a no-op.
async fn run_migrations(pool: &SqlitePool) -> Result<(), PersistError> {
    add_column_if_missing(pool, "participants", "finish_image_url", "TEXT").await?;
    add_column_if_missing(pool, "participants", "finish_image_path", "TEXT").await?;
    add_column_if_missing(pool, "splits", "pace", "TEXT").await?;
    Ok(())
}

async fn add_column_if_missing(pool: &SqlitePool, table: &str, column: &str, ddl_type: &str) -> Result<(), PersistError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table});")).fetch_all(pool).await?;
    let exists = rows.iter().any(|r| r.get::<String, _>("name") == column);
    if !exists {
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_type};"))
            .execute(pool)
            .await
            .map_err(|e| PersistError::Migration(format!("adding {table}.{column}: {e}")))?;
    }
    Ok(())
}

/// One parsed participant's worth of updates collected over a tick, queued
/// for the three-batch transaction write.
#[derive(Debug, Clone, Default)]
pub struct MetaUpdate {
    pub participant_id: i64,
    pub race_label: Option<String>,
    pub race_total_km: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SplitUpsert {
    pub participant_id: i64,
    pub point_label: String,
    pub point_km: Option<f64>,
    pub net_time: Option<String>,
    pub pass_clock: Option<String>,
    pub pace: Option<String>,
    pub seen_at: i64,
}

#[derive(Debug, Clone)]
pub struct AssetUpsert {
    pub participant_id: i64,
    pub kind: AssetKind,
    pub url: String,
    pub host_hint: Option<String>,
    pub seen_at: i64,
}

/// Write one tick's `meta_batch`, `split_batch`, and `asset_batch` inside a
/// single transaction, in that order (SPEC_FULL.md §4.7, §5). Rolls back
/// entirely on any failure.
pub async fn write_batch(
    pool: &SqlitePool,
    meta: &[MetaUpdate],
    splits: &[SplitUpsert],
    assets: &[AssetUpsert],
) -> Result<(), PersistError> {
    let mut tx = pool.begin().await?;

    for m in meta {
        write_meta(&mut tx, m).await?;
    }
    for s in splits {
        write_split(&mut tx, s).await?;
    }
    backfill_finish_net_times(&mut tx, splits).await?;
    for a in assets {
        write_asset(&mut tx, a).await?;
    }

    tx.commit().await.inspect_err(|e| log::warn!("batch write rolled back: {e}"))?;
    log::debug!("committed batch: {} meta, {} splits, {} assets", meta.len(), splits.len(), assets.len());
    Ok(())
}

/// Backfill `net_time` for any just-written `Finish` row that still lacks
/// one but carries a `pass_clock` (SPEC_FULL.md §4.7 step 5, §4.8), using
/// [`calc_net_time_from_clocks`] against the rows just committed to `splits`
/// within this same transaction.
async fn backfill_finish_net_times(tx: &mut Transaction<'_, Sqlite>, splits: &[SplitUpsert]) -> Result<(), PersistError> {
    for s in splits {
        if !distance::is_finish_label(&s.point_label) || s.net_time.is_some() || s.pass_clock.is_none() {
            continue;
        }
        if let Some(net_time) = calc_net_time_from_clocks(tx, s.participant_id).await? {
            sqlx::query(
                "UPDATE splits SET net_time = ? WHERE participant_id = ? AND point_label = ? AND net_time IS NULL;",
            )
            .bind(&net_time)
            .bind(s.participant_id)
            .bind(&s.point_label)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

async fn write_meta(tx: &mut Transaction<'_, Sqlite>, m: &MetaUpdate) -> Result<(), PersistError> {
    sqlx::query(
        r"
        UPDATE participants
        SET race_label = COALESCE(race_label, ?),
            race_total_km = COALESCE(race_total_km, ?)
        WHERE id = ?;
        ",
    )
    .bind(&m.race_label)
    .bind(m.race_total_km)
    .bind(m.participant_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Upsert a split keyed on `(participant_id, point_label)`. The `WHERE`
/// guard on the `DO UPDATE` enforces the §3 invariant that a split only
/// ever moves forward in time: an incoming row with an older or equal
/// `seen_at` is silently ignored rather than overwriting fresher data.
async fn write_split(tx: &mut Transaction<'_, Sqlite>, s: &SplitUpsert) -> Result<(), PersistError> {
    sqlx::query(
        r"
        INSERT INTO splits (participant_id, point_label, point_km, net_time, pass_clock, pace, seen_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(participant_id, point_label) DO UPDATE SET
            point_km = excluded.point_km,
            net_time = excluded.net_time,
            pass_clock = excluded.pass_clock,
            pace = excluded.pace,
            seen_at = excluded.seen_at
        WHERE excluded.seen_at > splits.seen_at;
        ",
    )
    .bind(s.participant_id)
    .bind(&s.point_label)
    .bind(s.point_km)
    .bind(&s.net_time)
    .bind(&s.pass_clock)
    .bind(&s.pace)
    .bind(s.seen_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_asset(tx: &mut Transaction<'_, Sqlite>, a: &AssetUpsert) -> Result<(), PersistError> {
    sqlx::query(
        r"
        INSERT INTO assets (participant_id, kind, url, host_hint, seen_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(participant_id, kind) DO UPDATE SET
            url = excluded.url,
            host_hint = excluded.host_hint,
            seen_at = excluded.seen_at
        WHERE excluded.seen_at >= assets.seen_at;
        ",
    )
    .bind(a.participant_id)
    .bind(a.kind.as_str())
    .bind(&a.url)
    .bind(&a.host_hint)
    .bind(a.seen_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Set a participant's local certificate path once a download completes.
pub async fn set_asset_local_path(pool: &SqlitePool, participant_id: i64, kind: AssetKind, local_path: &str) -> Result<(), PersistError> {
    sqlx::query("UPDATE assets SET local_path = ? WHERE participant_id = ? AND kind = ?;")
        .bind(local_path)
        .bind(participant_id)
        .bind(kind.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite connects");
        init_schema(&pool).await.expect("schema inits");
        pool
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = test_pool().await;
        init_schema(&pool).await.expect("second init is a no-op");
    }

    #[tokio::test]
    async fn groups_table_enforces_unique_code_and_cascades_on_marathon_delete() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO marathons (name, url_template, usedata, join_code) VALUES ('m','t','u','ABCD2399');")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO groups (marathon_id, name, group_code) VALUES (1, 'Pace Team', 'PACE01');")
            .execute(&pool)
            .await
            .unwrap();

        let dup = sqlx::query("INSERT INTO groups (marathon_id, name, group_code) VALUES (1, 'Other', 'PACE01');")
            .execute(&pool)
            .await;
        assert!(dup.is_err(), "group_code must be unique");

        sqlx::query("DELETE FROM marathons WHERE id = 1;").execute(&pool).await.unwrap();
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM groups;").fetch_one(&pool).await.unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn split_upsert_never_moves_backward_in_time() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO marathons (name, url_template, usedata, join_code) VALUES ('m','t','u','ABCD2345');")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO participants (marathon_id, nameorbibno) VALUES (1, '123');")
            .execute(&pool)
            .await
            .unwrap();

        let newer = SplitUpsert {
            participant_id: 1,
            point_label: "5km".into(),
            point_km: Some(5.0),
            net_time: Some("00:25:00".into()),
            pass_clock: None,
            pace: None,
            seen_at: 100,
        };
        write_batch(&pool, &[], &[newer.clone()], &[]).await.unwrap();

        let stale = SplitUpsert { seen_at: 50, net_time: Some("99:99:99".into()), ..newer.clone() };
        write_batch(&pool, &[], &[stale], &[]).await.unwrap();

        let row = sqlx::query("SELECT net_time, seen_at FROM splits WHERE participant_id = 1 AND point_label = '5km';")
            .fetch_one(&pool)
            .await
            .unwrap();
        let net_time: String = row.get("net_time");
        assert_eq!(net_time, "00:25:00");
    }

    #[tokio::test]
    async fn meta_upsert_uses_coalesce_and_never_reverts() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO marathons (name, url_template, usedata, join_code) VALUES ('m','t','u','ABCD2346');")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO participants (marathon_id, nameorbibno, race_label) VALUES (1, '123', 'Half');")
            .execute(&pool)
            .await
            .unwrap();

        write_batch(
            &pool,
            &[MetaUpdate { participant_id: 1, race_label: Some("Full".into()), race_total_km: Some(42.2) }],
            &[],
            &[],
        )
        .await
        .unwrap();

        let row = sqlx::query("SELECT race_label, race_total_km FROM participants WHERE id = 1;")
            .fetch_one(&pool)
            .await
            .unwrap();
        let label: String = row.get("race_label");
        assert_eq!(label, "Half");
        let km: f64 = row.get("race_total_km");
        assert_eq!(km, 42.2);
    }

    #[tokio::test]
    async fn write_batch_backfills_finish_net_time_from_persisted_clocks() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO marathons (name, url_template, usedata, join_code) VALUES ('m','t','u','ABCD2347');")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO participants (marathon_id, nameorbibno) VALUES (1, '123');")
            .execute(&pool)
            .await
            .unwrap();

        let splits = vec![
            SplitUpsert {
                participant_id: 1,
                point_label: "5km".into(),
                point_km: Some(5.0),
                net_time: None,
                pass_clock: Some("09:00:00".into()),
                pace: None,
                seen_at: 1,
            },
            SplitUpsert {
                participant_id: 1,
                point_label: "Finish".into(),
                point_km: Some(21.1),
                net_time: None,
                pass_clock: Some("09:25:00".into()),
                pace: None,
                seen_at: 1,
            },
        ];
        write_batch(&pool, &[], &splits, &[]).await.unwrap();

        let row = sqlx::query("SELECT net_time FROM splits WHERE participant_id = 1 AND point_label = 'Finish';")
            .fetch_one(&pool)
            .await
            .unwrap();
        let net_time: Option<String> = row.get("net_time");
        assert_eq!(net_time.as_deref(), Some("00:25:00"));
    }

    #[tokio::test]
    async fn write_batch_backfill_adds_86400_on_midnight_crossing() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO marathons (name, url_template, usedata, join_code) VALUES ('m','t','u','ABCD2348');")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO participants (marathon_id, nameorbibno) VALUES (1, '123');")
            .execute(&pool)
            .await
            .unwrap();

        let splits = vec![
            SplitUpsert {
                participant_id: 1,
                point_label: "38km".into(),
                point_km: Some(38.0),
                net_time: None,
                pass_clock: Some("23:58:00".into()),
                pace: None,
                seen_at: 1,
            },
            SplitUpsert {
                participant_id: 1,
                point_label: "40km".into(),
                point_km: Some(40.0),
                net_time: None,
                pass_clock: Some("00:02:00".into()),
                pace: None,
                seen_at: 1,
            },
            SplitUpsert {
                participant_id: 1,
                point_label: "Finish".into(),
                point_km: Some(42.2),
                net_time: None,
                pass_clock: Some("00:10:00".into()),
                pace: None,
                seen_at: 1,
            },
        ];
        write_batch(&pool, &[], &splits, &[]).await.unwrap();

        let row = sqlx::query("SELECT net_time FROM splits WHERE participant_id = 1 AND point_label = 'Finish';")
            .fetch_one(&pool)
            .await
            .unwrap();
        let net_time: Option<String> = row.get("net_time");
        assert_eq!(net_time.as_deref(), Some("00:12:00"));
    }
}
