use crate::errors::{AppError, AppResult};
use crate::models::{AnalyticsRecord, PerformanceMetric, SalesRecord, UserRecord};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const ANALYTICS_WINDOW: u32 = 30;

const SEED_MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const SEED_ANALYTICS_DAYS: i64 = 45;
const SEED_METRIC_SAMPLES: i64 = 6;
const SEED_METRICS: [(&str, &str, f64, f64); 6] = [
    ("Response Time", "Performance", 120.0, 6.5),
    ("Page Load Time", "Performance", 1.8, 0.05),
    ("Uptime", "Reliability", 99.9, -0.01),
    ("Error Rate", "Reliability", 0.4, 0.03),
    ("Conversion Rate", "Engagement", 3.6, 0.1),
    ("Retention", "Engagement", 68.0, 0.75),
];

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.seed_sales_data()?;
        db.seed_user_analytics()?;
        db.seed_performance_metrics()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn list_sales(&self) -> AppResult<Vec<SalesRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, month, revenue, orders, customers, created_at, updated_at
             FROM sales_data ORDER BY id",
        )?;
        let rows = stmt.query_map([], parse_sales_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn list_recent_analytics(&self, limit: u32) -> AppResult<Vec<AnalyticsRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, date, active_users, new_users, session_duration, bounce_rate, created_at, updated_at
             FROM user_analytics ORDER BY date DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], parse_analytics_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn list_performance_metrics(&self) -> AppResult<Vec<PerformanceMetric>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, metric_name, metric_value, timestamp, category, created_at, updated_at
             FROM performance_metrics ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map([], parse_metric_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn insert_sales(&self, month: &str, revenue: f64, orders: i64, customers: i64) -> AppResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sales_data (month, revenue, orders, customers) VALUES (?1, ?2, ?3, ?4)",
            params![month, revenue, orders, customers],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_analytics(
        &self,
        date: &str,
        active_users: i64,
        new_users: i64,
        session_duration: f64,
        bounce_rate: f64,
    ) -> AppResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_analytics (date, active_users, new_users, session_duration, bounce_rate)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![date, active_users, new_users, session_duration, bounce_rate],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_performance_metric(
        &self,
        metric_name: &str,
        metric_value: f64,
        timestamp: &str,
        category: &str,
    ) -> AppResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO performance_metrics (metric_name, metric_value, timestamp, category)
             VALUES (?1, ?2, ?3, ?4)",
            params![metric_name, metric_value, timestamp, category],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Creates the user on first sign-in, refreshes profile fields otherwise.
    pub fn upsert_user(&self, email: &str, name: &str, role: &str) -> AppResult<UserRecord> {
        let now = Utc::now();
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| row.get(0))
            .optional()?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE users SET name = ?1, role = ?2, last_signed_in_at = ?3 WHERE id = ?4",
                    params![name, role, format_time(now), id],
                )?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO users (id, email, name, role, created_at, last_signed_in_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![id, email, name, role, format_time(now)],
                )?;
                id
            }
        };

        conn.query_row(
            "SELECT id, email, name, role, created_at, last_signed_in_at FROM users WHERE id = ?1",
            [&id],
            parse_user_row,
        )
        .map_err(AppError::from)
    }

    pub fn insert_user_session(&self, token: &str, user_id: &str, expires_at: DateTime<Utc>) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![token, user_id, format_time(Utc::now()), format_time(expires_at)],
        )?;
        Ok(())
    }

    pub fn find_user_by_session(&self, token: &str, now: DateTime<Utc>) -> AppResult<Option<UserRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT u.id, u.email, u.name, u.role, u.created_at, u.last_signed_in_at
             FROM user_sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > ?2",
            params![token, format_time(now)],
            parse_user_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn delete_user_session(&self, token: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM user_sessions WHERE token = ?1", [token])?;
        Ok(deleted > 0)
    }

    pub fn prune_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let conn = self.lock()?;
        let pruned = conn.execute(
            "DELETE FROM user_sessions WHERE expires_at <= ?1",
            [format_time(now)],
        )?;
        Ok(pruned as u64)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn seed_sales_data(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM sales_data", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        for (index, month) in SEED_MONTHS.iter().enumerate() {
            let step = index as i64;
            let revenue = 120_000.0 + step as f64 * 8_500.0 + (step % 3) as f64 * 4_000.0;
            conn.execute(
                "INSERT INTO sales_data (month, revenue, orders, customers) VALUES (?1, ?2, ?3, ?4)",
                params![month, revenue, 400 + step * 25, 300 + step * 18],
            )?;
        }
        Ok(())
    }

    fn seed_user_analytics(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM user_analytics", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .ok_or_else(|| AppError::Internal("invalid seed start date".to_string()))?;
        for day in 0..SEED_ANALYTICS_DAYS {
            let date = start + Duration::days(day);
            conn.execute(
                "INSERT INTO user_analytics (date, active_users, new_users, session_duration, bounce_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    date.format("%Y-%m-%d").to_string(),
                    12_000 + (day * 137) % 3_000,
                    800 + (day * 53) % 400,
                    180.0 + ((day * 17) % 240) as f64,
                    32.5 + ((day * 7) % 15) as f64 * 0.5,
                ],
            )?;
        }
        Ok(())
    }

    fn seed_performance_metrics(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM performance_metrics", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }

        let start = NaiveDate::from_ymd_opt(2024, 2, 14)
            .and_then(|date| date.and_hms_opt(8, 0, 0))
            .ok_or_else(|| AppError::Internal("invalid seed start timestamp".to_string()))?;
        for sample in 0..SEED_METRIC_SAMPLES {
            let timestamp = (start + Duration::hours(sample)).format("%Y-%m-%d %H:%M:%S").to_string();
            for (name, category, base, step) in SEED_METRICS {
                conn.execute(
                    "INSERT INTO performance_metrics (metric_name, metric_value, timestamp, category)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![name, base + step * sample as f64, timestamp, category],
                )?;
            }
        }
        Ok(())
    }
}

fn parse_sales_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SalesRecord> {
    Ok(SalesRecord {
        id: row.get(0)?,
        month: row.get(1)?,
        revenue: row.get(2)?,
        orders: row.get(3)?,
        customers: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn parse_analytics_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalyticsRecord> {
    Ok(AnalyticsRecord {
        id: row.get(0)?,
        date: row.get(1)?,
        active_users: row.get(2)?,
        new_users: row.get(3)?,
        session_duration: row.get(4)?,
        bounce_rate: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn parse_metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerformanceMetric> {
    Ok(PerformanceMetric {
        id: row.get(0)?,
        metric_name: row.get(1)?,
        metric_value: row.get(2)?,
        timestamp: row.get(3)?,
        category: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
        last_signed_in_at: parse_time(&row.get::<_, String>(5)?)?,
    })
}

/// Fixed-width UTC timestamps so that SQL string comparison orders them.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::{Database, ANALYTICS_WINDOW, SEED_ANALYTICS_DAYS};
    use chrono::{Duration, Utc};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn seeds_each_collection_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let first = Database::new(&path).expect("first open");
        let sales_before = first.list_sales().expect("list sales").len();
        drop(first);

        let second = Database::new(&path).expect("second open");
        assert_eq!(second.list_sales().expect("list sales").len(), sales_before);
        assert_eq!(sales_before, 12);
    }

    #[test]
    fn sales_are_ordered_by_id() {
        let (_dir, db) = open();
        db.insert_sales("Jan", 1.0, 1, 1).expect("insert");
        let sales = db.list_sales().expect("list sales");
        assert!(sales.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[test]
    fn analytics_are_recent_first_and_capped() {
        let (_dir, db) = open();
        let analytics = db.list_recent_analytics(ANALYTICS_WINDOW).expect("list analytics");
        assert!(SEED_ANALYTICS_DAYS > i64::from(ANALYTICS_WINDOW));
        assert_eq!(analytics.len(), ANALYTICS_WINDOW as usize);
        assert!(analytics.windows(2).all(|pair| pair[0].date > pair[1].date));
        assert_eq!(analytics[0].date, "2024-02-14");
    }

    #[test]
    fn inserted_newer_day_leads_the_window() {
        let (_dir, db) = open();
        db.insert_analytics("2024-03-01", 15_000, 900, 240.0, 31.0)
            .expect("insert analytics");
        let analytics = db.list_recent_analytics(ANALYTICS_WINDOW).expect("list analytics");
        assert_eq!(analytics.len(), ANALYTICS_WINDOW as usize);
        assert_eq!(analytics[0].date, "2024-03-01");
        assert_eq!(analytics[0].session_duration, 240.0);
        assert_eq!(analytics[1].date, "2024-02-14");
    }

    #[test]
    fn metrics_are_newest_first() {
        let (_dir, db) = open();
        db.insert_performance_metric("Response Time", 90.0, "2030-01-01 00:00:00", "Performance")
            .expect("insert metric");
        let metrics = db.list_performance_metrics().expect("list metrics");
        assert_eq!(metrics[0].timestamp, "2030-01-01 00:00:00");
        assert!(metrics.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
    }

    #[test]
    fn user_sessions_resolve_until_deleted() {
        let (_dir, db) = open();
        let user = db
            .upsert_user("google-user@dataflow.com", "Google User", "Analyst")
            .expect("upsert user");
        let again = db
            .upsert_user("google-user@dataflow.com", "Renamed", "Analyst")
            .expect("upsert again");
        assert_eq!(user.id, again.id);
        assert_eq!(again.name, "Renamed");

        let now = Utc::now();
        db.insert_user_session("token-1", &user.id, now + Duration::days(60))
            .expect("insert session");
        let found = db.find_user_by_session("token-1", now).expect("find");
        assert_eq!(found.map(|record| record.email), Some(user.email.clone()));

        assert!(db.delete_user_session("token-1").expect("delete"));
        assert!(!db.delete_user_session("token-1").expect("delete twice"));
        assert!(db.find_user_by_session("token-1", now).expect("find").is_none());
    }

    #[test]
    fn expired_sessions_do_not_resolve_and_get_pruned() {
        let (_dir, db) = open();
        let user = db.upsert_user("a@dataflow.com", "A", "User").expect("upsert user");
        let now = Utc::now();
        db.insert_user_session("old", &user.id, now - Duration::seconds(1))
            .expect("insert session");
        assert!(db.find_user_by_session("old", now).expect("find").is_none());
        assert_eq!(db.prune_expired_sessions(now).expect("prune"), 1);
    }
}
