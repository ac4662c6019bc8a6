//! SQLite-backed persistence for fetcher configurations and their schedules.

use std::collections::HashMap;
use std::str::FromStr;

use fetchdir_core::{Fetcher, FetcherPatch, FetcherSchedule, NewFetcher, NewFetcherSchedule};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "fetchdir-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fetcher with ID {0} was not found.")]
    FetcherNotFound(i64),
    #[error("Fetcher with configuration name '{0}' was not found.")]
    FetcherNotFoundByName(String),
    #[error("Fetcher schedule with ID {0} was not found.")]
    ScheduleNotFound(i64),
    #[error("Configuration name '{0}' is already used by another fetcher.")]
    ConfnameTaken(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Sortable fields accepted by the fetcher list operation, each bound to its
/// storage column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    Server,
    Protocol,
    Active,
}

impl SortField {
    fn parse(field: &str) -> Result<Self> {
        match field {
            "name" => Ok(Self::Name),
            "server" => Ok(Self::Server),
            "protocol" => Ok(Self::Protocol),
            "active" => Ok(Self::Active),
            other => Err(StoreError::Validation(format!(
                "The field {other} has no column mapping."
            ))),
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Name => "confname",
            Self::Server => "server",
            Self::Protocol => "protocol",
            Self::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// One entry of an ordering plan; a list query applies entries left to right,
/// so later entries break ties among earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Parse one `order_by` token: either a bare field name (implicit
    /// ascending) or "field direction", split on the last whitespace run.
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let (field, direction) = match token.rsplit_once(|c: char| c.is_whitespace()) {
            Some((field, word)) => {
                let direction = match word {
                    "asc" => SortDirection::Ascending,
                    "desc" => SortDirection::Descending,
                    other => {
                        return Err(StoreError::Validation(format!(
                            "Direction must be asc or desc, but it was {other} instead."
                        )))
                    }
                };
                (field.trim_end(), direction)
            }
            None => (token, SortDirection::Ascending),
        };
        Ok(Self {
            field: SortField::parse(field)?,
            direction,
        })
    }
}

/// Ordering applied when a list request carries no `order_by` tokens:
/// active fetchers first, then configuration name.
pub fn default_fetcher_order() -> Vec<SortSpec> {
    vec![
        SortSpec {
            field: SortField::Active,
            direction: SortDirection::Descending,
        },
        SortSpec {
            field: SortField::Name,
            direction: SortDirection::Ascending,
        },
    ]
}

fn order_by_sql(specs: &[SortSpec]) -> String {
    specs
        .iter()
        .map(|spec| format!("{} {}", spec.field.column(), spec.direction.sql()))
        .collect::<Vec<_>>()
        .join(", ")
}

const FETCHER_COLUMNS: &str = "id, confname, server, description, userid, password, protocol, \
     port, quick_delete, active, uid_validity_key, time_limit, mailbox, domains";

const SCHEDULE_COLUMNS: &str = "id, fetcher_id, downtime_days, downtime_start, downtime_end";

/// Handle over the fetcher tables. Clones share one connection pool; every
/// operation acquires a scoped connection or transaction and releases it on
/// every exit path.
#[derive(Debug, Clone)]
pub struct FetcherStore {
    pool: SqlitePool,
}

impl FetcherStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// In-memory database pinned to a single pooled connection so the data
    /// outlives individual acquires.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("fetcher store migrations applied");
        Ok(())
    }

    pub async fn create_fetcher(&self, new: &NewFetcher) -> Result<Fetcher> {
        check_fetcher_fields(&new.server, &new.description, &new.mailbox, new.port)?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO fetchers (confname, server, description, userid, password, protocol, \
             port, quick_delete, active, uid_validity_key, time_limit, mailbox, domains) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.confname)
        .bind(&new.server)
        .bind(&new.description)
        .bind(&new.userid)
        .bind(&new.password)
        .bind(&new.protocol)
        .bind(new.port)
        .bind(new.quick_delete)
        .bind(new.active)
        .bind(new.uid_validity_key)
        .bind(new.time_limit)
        .bind(&new.mailbox)
        .bind(&new.domains)
        .execute(&mut *tx)
        .await
        .map_err(|err| confname_conflict(err, &new.confname))?;

        let fetcher = fetch_fetcher(&mut tx, result.last_insert_rowid()).await?;
        tx.commit().await?;
        Ok(fetcher)
    }

    pub async fn list_fetchers(&self, order: &[SortSpec]) -> Result<Vec<Fetcher>> {
        let specs = if order.is_empty() {
            default_fetcher_order()
        } else {
            order.to_vec()
        };
        let sql = format!(
            "SELECT {FETCHER_COLUMNS} FROM fetchers ORDER BY {}",
            order_by_sql(&specs)
        );

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        let mut fetchers = rows
            .iter()
            .map(fetcher_from_row)
            .collect::<Result<Vec<_>>>()?;

        let schedule_rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM fetcher_schedules ORDER BY id"
        ))
        .fetch_all(&mut *conn)
        .await?;
        let mut by_fetcher: HashMap<i64, Vec<FetcherSchedule>> = HashMap::new();
        for row in &schedule_rows {
            let schedule = schedule_from_row(row)?;
            by_fetcher.entry(schedule.fetcher_id).or_default().push(schedule);
        }
        for fetcher in &mut fetchers {
            fetcher.schedules = by_fetcher.remove(&fetcher.id).unwrap_or_default();
        }
        Ok(fetchers)
    }

    pub async fn get_fetcher(&self, id: i64) -> Result<Fetcher> {
        let mut conn = self.pool.acquire().await?;
        fetch_fetcher(&mut conn, id).await
    }

    pub async fn get_fetcher_by_name(&self, confname: &str) -> Result<Fetcher> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {FETCHER_COLUMNS} FROM fetchers WHERE confname = ?"
        ))
        .bind(confname)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::FetcherNotFoundByName(confname.to_string()))?;
        let mut fetcher = fetcher_from_row(&row)?;
        fetcher.schedules = schedules_for_fetcher(&mut conn, fetcher.id).await?;
        Ok(fetcher)
    }

    /// Full replace: every scalar column is overwritten from the input,
    /// whether or not the caller set it explicitly.
    pub async fn replace_fetcher(&self, id: i64, new: &NewFetcher) -> Result<Fetcher> {
        check_fetcher_fields(&new.server, &new.description, &new.mailbox, new.port)?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE fetchers SET confname = ?, server = ?, description = ?, userid = ?, \
             password = ?, protocol = ?, port = ?, quick_delete = ?, active = ?, \
             uid_validity_key = ?, time_limit = ?, mailbox = ?, domains = ? WHERE id = ?",
        )
        .bind(&new.confname)
        .bind(&new.server)
        .bind(&new.description)
        .bind(&new.userid)
        .bind(&new.password)
        .bind(&new.protocol)
        .bind(new.port)
        .bind(new.quick_delete)
        .bind(new.active)
        .bind(new.uid_validity_key)
        .bind(new.time_limit)
        .bind(&new.mailbox)
        .bind(&new.domains)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|err| confname_conflict(err, &new.confname))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::FetcherNotFound(id));
        }
        let fetcher = fetch_fetcher(&mut tx, id).await?;
        tx.commit().await?;
        Ok(fetcher)
    }

    /// Partial update: reads the current record, applies the provided fields,
    /// validates the combined record, and writes it back in one transaction.
    pub async fn patch_fetcher(&self, id: i64, patch: FetcherPatch) -> Result<Fetcher> {
        let mut tx = self.pool.begin().await?;
        let mut fetcher = fetch_fetcher(&mut tx, id).await?;
        patch.merge_into(&mut fetcher);
        check_fetcher_fields(
            &fetcher.server,
            &fetcher.description,
            &fetcher.mailbox,
            fetcher.port,
        )?;

        sqlx::query(
            "UPDATE fetchers SET confname = ?, server = ?, description = ?, userid = ?, \
             password = ?, protocol = ?, port = ?, quick_delete = ?, active = ?, \
             uid_validity_key = ?, time_limit = ?, mailbox = ?, domains = ? WHERE id = ?",
        )
        .bind(&fetcher.confname)
        .bind(&fetcher.server)
        .bind(&fetcher.description)
        .bind(&fetcher.userid)
        .bind(&fetcher.password)
        .bind(&fetcher.protocol)
        .bind(fetcher.port)
        .bind(fetcher.quick_delete)
        .bind(fetcher.active)
        .bind(fetcher.uid_validity_key)
        .bind(fetcher.time_limit)
        .bind(&fetcher.mailbox)
        .bind(&fetcher.domains)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|err| confname_conflict(err, &fetcher.confname))?;

        let fetcher = fetch_fetcher(&mut tx, id).await?;
        tx.commit().await?;
        Ok(fetcher)
    }

    /// Delete one fetcher, returning its prior full representation.
    pub async fn delete_fetcher(&self, id: i64) -> Result<Fetcher> {
        let mut tx = self.pool.begin().await?;
        let fetcher = fetch_fetcher(&mut tx, id).await?;
        sqlx::query("DELETE FROM fetchers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(fetcher)
    }

    /// Set the active flag on every requested ID that exists; IDs with no
    /// matching record are silently ignored.
    pub async fn batch_set_active(&self, ids: &[i64], active: bool) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE fetchers SET active = ? WHERE id IN ({})",
            id_placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(active);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&mut *tx).await?;
        tx.commit().await?;
        debug!(
            requested = ids.len(),
            updated = result.rows_affected(),
            active,
            "batch active flag update"
        );
        Ok(())
    }

    /// Delete every requested ID that exists; IDs with no matching record are
    /// silently ignored.
    pub async fn batch_delete(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "DELETE FROM fetchers WHERE id IN ({})",
            id_placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&mut *tx).await?;
        tx.commit().await?;
        debug!(
            requested = ids.len(),
            deleted = result.rows_affected(),
            "batch delete"
        );
        Ok(())
    }

    pub async fn create_schedule(&self, new: &NewFetcherSchedule) -> Result<FetcherSchedule> {
        check_downtime_days(&new.downtime_days)?;
        let mut tx = self.pool.begin().await?;
        ensure_fetcher_exists(&mut tx, new.fetcher_id).await?;
        let result = sqlx::query(
            "INSERT INTO fetcher_schedules (fetcher_id, downtime_days, downtime_start, downtime_end) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(new.fetcher_id)
        .bind(&new.downtime_days)
        .bind(new.downtime_start)
        .bind(new.downtime_end)
        .execute(&mut *tx)
        .await?;

        let schedule = fetch_schedule(&mut tx, result.last_insert_rowid()).await?;
        tx.commit().await?;
        Ok(schedule)
    }

    pub async fn list_schedules(&self) -> Result<Vec<FetcherSchedule>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM fetcher_schedules ORDER BY id"
        ))
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    pub async fn get_schedule(&self, id: i64) -> Result<FetcherSchedule> {
        let mut conn = self.pool.acquire().await?;
        fetch_schedule(&mut conn, id).await
    }

    pub async fn replace_schedule(
        &self,
        id: i64,
        new: &NewFetcherSchedule,
    ) -> Result<FetcherSchedule> {
        check_downtime_days(&new.downtime_days)?;
        let mut tx = self.pool.begin().await?;
        ensure_fetcher_exists(&mut tx, new.fetcher_id).await?;
        let result = sqlx::query(
            "UPDATE fetcher_schedules SET fetcher_id = ?, downtime_days = ?, \
             downtime_start = ?, downtime_end = ? WHERE id = ?",
        )
        .bind(new.fetcher_id)
        .bind(&new.downtime_days)
        .bind(new.downtime_start)
        .bind(new.downtime_end)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ScheduleNotFound(id));
        }
        let schedule = fetch_schedule(&mut tx, id).await?;
        tx.commit().await?;
        Ok(schedule)
    }

    /// Delete one schedule, returning its prior representation. The owning
    /// fetcher is left in place.
    pub async fn delete_schedule(&self, id: i64) -> Result<FetcherSchedule> {
        let mut tx = self.pool.begin().await?;
        let schedule = fetch_schedule(&mut tx, id).await?;
        sqlx::query("DELETE FROM fetcher_schedules WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(schedule)
    }
}

fn id_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn confname_conflict(err: sqlx::Error, confname: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db)
            if db.is_unique_violation() && db.message().contains("confname") =>
        {
            StoreError::ConfnameTaken(confname.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn check_fetcher_fields(
    server: &str,
    description: &str,
    mailbox: &str,
    port: Option<i64>,
) -> Result<()> {
    if server.trim().is_empty() {
        return Err(StoreError::Validation("Server must not be empty.".into()));
    }
    if description.trim().is_empty() {
        return Err(StoreError::Validation(
            "Description must not be empty.".into(),
        ));
    }
    if mailbox.trim().is_empty() {
        return Err(StoreError::Validation("Mailbox must not be empty.".into()));
    }
    if let Some(port) = port {
        if !(1..=65535).contains(&port) {
            return Err(StoreError::Validation(format!(
                "Port must be between 1 and 65535, but it was {port} instead."
            )));
        }
    }
    Ok(())
}

fn check_downtime_days(days: &str) -> Result<()> {
    if days.is_empty() || days.chars().any(|c| !('0'..='6').contains(&c)) {
        return Err(StoreError::Validation(format!(
            "Downtime days must be a string of digits 0-6, but it was '{days}' instead."
        )));
    }
    Ok(())
}

async fn fetch_fetcher(conn: &mut SqliteConnection, id: i64) -> Result<Fetcher> {
    let row = sqlx::query(&format!(
        "SELECT {FETCHER_COLUMNS} FROM fetchers WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::FetcherNotFound(id))?;
    let mut fetcher = fetcher_from_row(&row)?;
    fetcher.schedules = schedules_for_fetcher(conn, id).await?;
    Ok(fetcher)
}

async fn schedules_for_fetcher(
    conn: &mut SqliteConnection,
    fetcher_id: i64,
) -> Result<Vec<FetcherSchedule>> {
    let rows = sqlx::query(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM fetcher_schedules WHERE fetcher_id = ? ORDER BY id"
    ))
    .bind(fetcher_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(schedule_from_row).collect()
}

async fn fetch_schedule(conn: &mut SqliteConnection, id: i64) -> Result<FetcherSchedule> {
    let row = sqlx::query(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM fetcher_schedules WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::ScheduleNotFound(id))?;
    schedule_from_row(&row)
}

async fn ensure_fetcher_exists(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("SELECT id FROM fetchers WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::FetcherNotFound(id))?;
    Ok(())
}

fn fetcher_from_row(row: &SqliteRow) -> Result<Fetcher> {
    Ok(Fetcher {
        id: row.try_get("id")?,
        confname: row.try_get("confname")?,
        server: row.try_get("server")?,
        description: row.try_get("description")?,
        userid: row.try_get("userid")?,
        password: row.try_get("password")?,
        protocol: row.try_get("protocol")?,
        port: row.try_get("port")?,
        quick_delete: row.try_get("quick_delete")?,
        active: row.try_get("active")?,
        uid_validity_key: row.try_get("uid_validity_key")?,
        time_limit: row.try_get("time_limit")?,
        mailbox: row.try_get("mailbox")?,
        domains: row.try_get("domains")?,
        schedules: Vec::new(),
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<FetcherSchedule> {
    Ok(FetcherSchedule {
        id: row.try_get("id")?,
        fetcher_id: row.try_get("fetcher_id")?,
        downtime_days: row.try_get("downtime_days")?,
        downtime_start: row.try_get("downtime_start")?,
        downtime_end: row.try_get("downtime_end")?,
    })
}
