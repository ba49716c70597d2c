use super::{LockMode, Locker, RowLocker, Store, StoreTx};
use crate::error::{EngineError, Result};
use crate::models::{
    Booking, City, IdempotencyRecord, Operator, Route, Ticket, Trip, TripStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeSet;
use std::sync::Arc;

pub async fn connect(db_url: &str, max_connections: u32) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(db_url)
        .await
}

#[derive(Debug)]
struct TableNames {
    schema: Option<String>,
    cities: String,
    operators: String,
    routes: String,
    trips: String,
    bookings: String,
    tickets: String,
    idempotency: String,
}

impl TableNames {
    fn new(schema: Option<String>) -> Self {
        let table = |name: &str| match &schema {
            Some(s) => format!("{s}.{name}"),
            None => name.to_string(),
        };
        Self {
            cities: table("cities"),
            operators: table("bus_operators"),
            routes: table("routes"),
            trips: table("trips"),
            bookings: table("bookings"),
            tickets: table("tickets"),
            idempotency: table("idempotency"),
            schema,
        }
    }
}

/// PostgreSQL store. Exclusive reads go through the configured [`Locker`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    tables: Arc<TableNames>,
    locker: Arc<dyn Locker>,
}

impl PgStore {
    /// `schema` must already be validated as a plain SQL identifier.
    pub fn new(pool: PgPool, schema: Option<String>) -> Self {
        Self {
            pool,
            tables: Arc::new(TableNames::new(schema)),
            locker: Arc::new(RowLocker),
        }
    }

    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = locker;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> std::result::Result<(), sqlx::Error> {
        let t = &self.tables;
        if let Some(schema) = &t.schema {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
                .execute(&self.pool)
                .await?;
        }

        let ddls = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id VARCHAR(36) PRIMARY KEY,\
                 name VARCHAR(120) NOT NULL,\
                 country VARCHAR(64)\
                 )",
                t.cities
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id VARCHAR(36) PRIMARY KEY,\
                 name VARCHAR(120) NOT NULL,\
                 wallet_id VARCHAR(36),\
                 is_online INTEGER NOT NULL DEFAULT 0\
                 )",
                t.operators
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id VARCHAR(36) PRIMARY KEY,\
                 origin_city_id VARCHAR(36) NOT NULL,\
                 dest_city_id VARCHAR(36) NOT NULL,\
                 operator_id VARCHAR(36) NOT NULL,\
                 bus_model VARCHAR(120),\
                 features VARCHAR(1024)\
                 )",
                t.routes
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id VARCHAR(36) PRIMARY KEY,\
                 route_id VARCHAR(36) NOT NULL,\
                 depart_at TEXT NOT NULL,\
                 arrive_at TEXT NOT NULL,\
                 price_cents BIGINT NOT NULL,\
                 currency VARCHAR(3) NOT NULL DEFAULT 'SYP',\
                 seats_total INTEGER NOT NULL DEFAULT 40,\
                 seats_available INTEGER NOT NULL DEFAULT 40,\
                 status VARCHAR(16) NOT NULL DEFAULT 'draft'\
                 )",
                t.trips
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id VARCHAR(36) PRIMARY KEY,\
                 trip_id VARCHAR(36) NOT NULL,\
                 price_cents BIGINT,\
                 customer_phone VARCHAR(32),\
                 wallet_id VARCHAR(36),\
                 seats INTEGER NOT NULL DEFAULT 1,\
                 status VARCHAR(16) NOT NULL DEFAULT 'pending',\
                 payments_txn_id VARCHAR(64),\
                 created_at TEXT NOT NULL\
                 )",
                t.bookings
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id VARCHAR(36) PRIMARY KEY,\
                 booking_id VARCHAR(36) NOT NULL,\
                 trip_id VARCHAR(36) NOT NULL,\
                 seat_no INTEGER NOT NULL,\
                 status VARCHAR(16) NOT NULL DEFAULT 'issued',\
                 issued_at TEXT,\
                 boarded_at TEXT\
                 )",
                t.tickets
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 key VARCHAR(120) PRIMARY KEY,\
                 trip_id VARCHAR(36) NOT NULL,\
                 wallet_id VARCHAR(36),\
                 seats INTEGER NOT NULL,\
                 seat_numbers_hash VARCHAR(128),\
                 booking_id VARCHAR(36),\
                 created_at TEXT NOT NULL\
                 )",
                t.idempotency
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_cities_name ON {}(name)", t.cities),
            format!("CREATE INDEX IF NOT EXISTS idx_routes_operator ON {}(operator_id)", t.routes),
            format!("CREATE INDEX IF NOT EXISTS idx_trips_route ON {}(route_id)", t.trips),
            format!("CREATE INDEX IF NOT EXISTS idx_trips_depart_at ON {}(depart_at)", t.trips),
            format!("CREATE INDEX IF NOT EXISTS idx_bookings_trip ON {}(trip_id)", t.bookings),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_bookings_created_at ON {}(created_at)",
                t.bookings
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_tickets_trip ON {}(trip_id)", t.tickets),
            format!("CREATE INDEX IF NOT EXISTS idx_tickets_booking ON {}(booking_id)", t.tickets),
            // A seat can be held by at most one live ticket.
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS ux_tickets_trip_seat_live \
                 ON {}(trip_id, seat_no) WHERE status <> 'canceled'",
                t.tickets
            ),
        ];
        for ddl in ddls {
            sqlx::query(&ddl).execute(&self.pool).await?;
        }

        // Columns added after the first deployments.
        let upgrades = [
            format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS status VARCHAR(16) DEFAULT 'draft'",
                t.trips
            ),
            format!("UPDATE {} SET status='draft' WHERE status IS NULL", t.trips),
            format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS price_cents BIGINT", t.bookings),
            format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS bus_model VARCHAR(120)",
                t.routes
            ),
            format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS features VARCHAR(1024)",
                t.routes
            ),
        ];
        for ddl in upgrades {
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(db_error("begin"))?;
        Ok(Box::new(PgTx {
            tx,
            tables: self.tables.clone(),
            locker: self.locker.clone(),
        }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
    tables: Arc<TableNames>,
    locker: Arc<dyn Locker>,
}

impl PgTx {
    fn lock(&self, mode: LockMode) -> &'static str {
        match mode {
            LockMode::Shared => "",
            LockMode::Exclusive => self.locker.for_update(),
        }
    }
}

fn db_error(op: &'static str) -> impl FnOnce(sqlx::Error) -> EngineError {
    move |e| {
        tracing::error!(error = %e, op, "db operation failed");
        EngineError::Storage(op)
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_err<E>(e: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(e))
}

fn row_ts(row: &PgRow, col: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(decode_err)
}

fn row_ts_opt(row: &PgRow, col: &str) -> std::result::Result<Option<DateTime<Utc>>, sqlx::Error> {
    let raw: Option<String> = row.try_get(col)?;
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(decode_err)
        })
        .transpose()
}

fn row_status<S>(row: &PgRow, col: &str) -> std::result::Result<S, sqlx::Error>
where
    S: std::str::FromStr,
    S::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(col)?;
    raw.parse::<S>().map_err(decode_err)
}

fn city_from_row(row: &PgRow) -> std::result::Result<City, sqlx::Error> {
    Ok(City {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        country: row.try_get("country")?,
    })
}

fn operator_from_row(row: &PgRow) -> std::result::Result<Operator, sqlx::Error> {
    let is_online: i32 = row.try_get("is_online")?;
    Ok(Operator {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        wallet_id: row.try_get("wallet_id")?,
        is_online: is_online != 0,
    })
}

fn route_from_row(row: &PgRow) -> std::result::Result<Route, sqlx::Error> {
    Ok(Route {
        id: row.try_get("id")?,
        origin_city_id: row.try_get("origin_city_id")?,
        dest_city_id: row.try_get("dest_city_id")?,
        operator_id: row.try_get("operator_id")?,
        bus_model: row.try_get("bus_model")?,
        features: row.try_get("features")?,
    })
}

fn trip_from_row(row: &PgRow) -> std::result::Result<Trip, sqlx::Error> {
    Ok(Trip {
        id: row.try_get("id")?,
        route_id: row.try_get("route_id")?,
        depart_at: row_ts(row, "depart_at")?,
        arrive_at: row_ts(row, "arrive_at")?,
        price_cents: row.try_get("price_cents")?,
        currency: row.try_get("currency")?,
        seats_total: row.try_get("seats_total")?,
        seats_available: row.try_get("seats_available")?,
        status: row_status(row, "status")?,
    })
}

fn booking_from_row(row: &PgRow) -> std::result::Result<Booking, sqlx::Error> {
    Ok(Booking {
        id: row.try_get("id")?,
        trip_id: row.try_get("trip_id")?,
        price_cents: row.try_get("price_cents")?,
        customer_phone: row.try_get("customer_phone")?,
        wallet_id: row.try_get("wallet_id")?,
        seats: row.try_get("seats")?,
        status: row_status(row, "status")?,
        payments_txn_id: row.try_get("payments_txn_id")?,
        created_at: row_ts(row, "created_at")?,
    })
}

fn ticket_from_row(row: &PgRow) -> std::result::Result<Ticket, sqlx::Error> {
    Ok(Ticket {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        trip_id: row.try_get("trip_id")?,
        seat_no: row.try_get("seat_no")?,
        status: row_status(row, "status")?,
        issued_at: row_ts_opt(row, "issued_at")?,
        boarded_at: row_ts_opt(row, "boarded_at")?,
    })
}

fn idempotency_from_row(row: &PgRow) -> std::result::Result<IdempotencyRecord, sqlx::Error> {
    Ok(IdempotencyRecord {
        key: row.try_get("key")?,
        trip_id: row.try_get("trip_id")?,
        wallet_id: row.try_get("wallet_id")?,
        seats: row.try_get("seats")?,
        seat_numbers_hash: row.try_get("seat_numbers_hash")?,
        booking_id: row.try_get("booking_id")?,
        created_at: row_ts(row, "created_at")?,
    })
}

const TRIP_COLS: &str =
    "id,route_id,depart_at,arrive_at,price_cents,currency,seats_total,seats_available,status";
const BOOKING_COLS: &str =
    "id,trip_id,price_cents,customer_phone,wallet_id,seats,status,payments_txn_id,created_at";
const TICKET_COLS: &str = "id,booking_id,trip_id,seat_no,status,issued_at,boarded_at";

// Timestamps are stored as fixed-width UTC text (`fmt_ts`), so the window
// bounds below compare as strings.

fn trips_since_sql(t: &TableNames) -> String {
    format!(
        "SELECT {TRIP_COLS} FROM {} WHERE route_id = ANY($1) AND depart_at >= $2 \
         ORDER BY depart_at, id",
        t.trips
    )
}

fn bookings_since_sql(t: &TableNames) -> String {
    format!(
        "SELECT {BOOKING_COLS} FROM {} WHERE trip_id = ANY($1) AND created_at >= $2 \
         ORDER BY created_at",
        t.bookings
    )
}

fn boarded_since_sql(t: &TableNames) -> String {
    format!(
        "SELECT {TICKET_COLS} FROM {} WHERE trip_id = ANY($1) AND status = 'boarded' \
         AND boarded_at >= $2 ORDER BY trip_id, seat_no",
        t.tickets
    )
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_city(&mut self, city: &City) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id,name,country) VALUES ($1,$2,$3)",
            self.tables.cities
        );
        sqlx::query(&sql)
            .bind(&city.id)
            .bind(&city.name)
            .bind(&city.country)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert city"))?;
        Ok(())
    }

    async fn city(&mut self, id: &str) -> Result<Option<City>> {
        let sql = format!("SELECT id,name,country FROM {} WHERE id=$1", self.tables.cities);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("city lookup"))?;
        row.as_ref()
            .map(city_from_row)
            .transpose()
            .map_err(db_error("city decode"))
    }

    async fn insert_operator(&mut self, operator: &Operator) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id,name,wallet_id,is_online) VALUES ($1,$2,$3,$4)",
            self.tables.operators
        );
        sqlx::query(&sql)
            .bind(&operator.id)
            .bind(&operator.name)
            .bind(&operator.wallet_id)
            .bind(i32::from(operator.is_online))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert operator"))?;
        Ok(())
    }

    async fn operator(&mut self, id: &str) -> Result<Option<Operator>> {
        let sql = format!(
            "SELECT id,name,wallet_id,is_online FROM {} WHERE id=$1",
            self.tables.operators
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("operator lookup"))?;
        row.as_ref()
            .map(operator_from_row)
            .transpose()
            .map_err(db_error("operator decode"))
    }

    async fn set_operator_online(&mut self, id: &str, online: bool) -> Result<bool> {
        let sql = format!("UPDATE {} SET is_online=$1 WHERE id=$2", self.tables.operators);
        let res = sqlx::query(&sql)
            .bind(i32::from(online))
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("operator online toggle"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn insert_route(&mut self, route: &Route) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id,origin_city_id,dest_city_id,operator_id,bus_model,features) \
             VALUES ($1,$2,$3,$4,$5,$6)",
            self.tables.routes
        );
        sqlx::query(&sql)
            .bind(&route.id)
            .bind(&route.origin_city_id)
            .bind(&route.dest_city_id)
            .bind(&route.operator_id)
            .bind(&route.bus_model)
            .bind(&route.features)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert route"))?;
        Ok(())
    }

    async fn route(&mut self, id: &str) -> Result<Option<Route>> {
        let sql = format!(
            "SELECT id,origin_city_id,dest_city_id,operator_id,bus_model,features \
             FROM {} WHERE id=$1",
            self.tables.routes
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("route lookup"))?;
        row.as_ref()
            .map(route_from_row)
            .transpose()
            .map_err(db_error("route decode"))
    }

    async fn routes_for_operator(&mut self, operator_id: &str) -> Result<Vec<Route>> {
        let sql = format!(
            "SELECT id,origin_city_id,dest_city_id,operator_id,bus_model,features \
             FROM {} WHERE operator_id=$1 ORDER BY id",
            self.tables.routes
        );
        let rows = sqlx::query(&sql)
            .bind(operator_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("operator routes"))?;
        rows.iter()
            .map(route_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(db_error("route decode"))
    }

    async fn trip(&mut self, id: &str, lock: LockMode) -> Result<Option<Trip>> {
        let sql = format!(
            "SELECT {TRIP_COLS} FROM {} WHERE id=$1{}",
            self.tables.trips,
            self.lock(lock)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("trip lookup"))?;
        row.as_ref()
            .map(trip_from_row)
            .transpose()
            .map_err(db_error("trip decode"))
    }

    async fn insert_trip(&mut self, trip: &Trip) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({TRIP_COLS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            self.tables.trips
        );
        sqlx::query(&sql)
            .bind(&trip.id)
            .bind(&trip.route_id)
            .bind(fmt_ts(trip.depart_at))
            .bind(fmt_ts(trip.arrive_at))
            .bind(trip.price_cents)
            .bind(&trip.currency)
            .bind(trip.seats_total)
            .bind(trip.seats_available)
            .bind(trip.status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert trip"))?;
        Ok(())
    }

    async fn set_trip_status(&mut self, id: &str, status: TripStatus) -> Result<()> {
        let sql = format!("UPDATE {} SET status=$1 WHERE id=$2", self.tables.trips);
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("update trip status"))?;
        Ok(())
    }

    async fn set_seats_available(&mut self, id: &str, seats_available: i32) -> Result<()> {
        let sql = format!("UPDATE {} SET seats_available=$1 WHERE id=$2", self.tables.trips);
        sqlx::query(&sql)
            .bind(seats_available)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("update trip seats"))?;
        Ok(())
    }

    async fn trips_for_routes(
        &mut self,
        route_ids: &[String],
        departing_since: DateTime<Utc>,
    ) -> Result<Vec<Trip>> {
        if route_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&trips_since_sql(&self.tables))
            .bind(route_ids.to_vec())
            .bind(fmt_ts(departing_since))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("trips for routes"))?;
        rows.iter()
            .map(trip_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(db_error("trip decode"))
    }

    async fn taken_seats(&mut self, trip_id: &str, lock: LockMode) -> Result<BTreeSet<i32>> {
        let sql = format!(
            "SELECT seat_no FROM {} WHERE trip_id=$1 AND status <> 'canceled'{}",
            self.tables.tickets,
            self.lock(lock)
        );
        let rows = sqlx::query(&sql)
            .bind(trip_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("taken seats"))?;
        rows.iter()
            .map(|r| r.try_get::<i32, _>("seat_no"))
            .collect::<std::result::Result<_, _>>()
            .map_err(db_error("taken seats decode"))
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({TICKET_COLS}) VALUES ($1,$2,$3,$4,$5,$6,$7)",
            self.tables.tickets
        );
        sqlx::query(&sql)
            .bind(&ticket.id)
            .bind(&ticket.booking_id)
            .bind(&ticket.trip_id)
            .bind(ticket.seat_no)
            .bind(ticket.status.as_str())
            .bind(ticket.issued_at.map(fmt_ts))
            .bind(ticket.boarded_at.map(fmt_ts))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert ticket"))?;
        Ok(())
    }

    async fn ticket(&mut self, id: &str, lock: LockMode) -> Result<Option<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLS} FROM {} WHERE id=$1{}",
            self.tables.tickets,
            self.lock(lock)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("ticket lookup"))?;
        row.as_ref()
            .map(ticket_from_row)
            .transpose()
            .map_err(db_error("ticket decode"))
    }

    async fn tickets_for_booking(
        &mut self,
        booking_id: &str,
        lock: LockMode,
    ) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLS} FROM {} WHERE booking_id=$1 ORDER BY seat_no{}",
            self.tables.tickets,
            self.lock(lock)
        );
        let rows = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("booking tickets"))?;
        rows.iter()
            .map(ticket_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(db_error("ticket decode"))
    }

    async fn boarded_tickets_for_trips(
        &mut self,
        trip_ids: &[String],
        boarded_since: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        if trip_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&boarded_since_sql(&self.tables))
            .bind(trip_ids.to_vec())
            .bind(fmt_ts(boarded_since))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("trip tickets"))?;
        rows.iter()
            .map(ticket_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(db_error("ticket decode"))
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status=$1, issued_at=$2, boarded_at=$3 WHERE id=$4",
            self.tables.tickets
        );
        sqlx::query(&sql)
            .bind(ticket.status.as_str())
            .bind(ticket.issued_at.map(fmt_ts))
            .bind(ticket.boarded_at.map(fmt_ts))
            .bind(&ticket.id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("update ticket"))?;
        Ok(())
    }

    async fn booking(&mut self, id: &str, lock: LockMode) -> Result<Option<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLS} FROM {} WHERE id=$1{}",
            self.tables.bookings,
            self.lock(lock)
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("booking lookup"))?;
        row.as_ref()
            .map(booking_from_row)
            .transpose()
            .map_err(db_error("booking decode"))
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({BOOKING_COLS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            self.tables.bookings
        );
        sqlx::query(&sql)
            .bind(&booking.id)
            .bind(&booking.trip_id)
            .bind(booking.price_cents)
            .bind(&booking.customer_phone)
            .bind(&booking.wallet_id)
            .bind(booking.seats)
            .bind(booking.status.as_str())
            .bind(&booking.payments_txn_id)
            .bind(fmt_ts(booking.created_at))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert booking"))?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status=$1, payments_txn_id=$2 WHERE id=$3",
            self.tables.bookings
        );
        sqlx::query(&sql)
            .bind(booking.status.as_str())
            .bind(&booking.payments_txn_id)
            .bind(&booking.id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("update booking"))?;
        Ok(())
    }

    async fn bookings_for_trips(
        &mut self,
        trip_ids: &[String],
        created_since: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        if trip_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&bookings_since_sql(&self.tables))
            .bind(trip_ids.to_vec())
            .bind(fmt_ts(created_since))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("trip bookings"))?;
        rows.iter()
            .map(booking_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(db_error("booking decode"))
    }

    async fn idempotency(
        &mut self,
        key: &str,
        lock: LockMode,
    ) -> Result<Option<IdempotencyRecord>> {
        let sql = format!(
            "SELECT key,trip_id,wallet_id,seats,seat_numbers_hash,booking_id,created_at \
             FROM {} WHERE key=$1{}",
            self.tables.idempotency,
            self.lock(lock)
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("idempotency lookup"))?;
        row.as_ref()
            .map(idempotency_from_row)
            .transpose()
            .map_err(db_error("idempotency decode"))
    }

    async fn insert_idempotency(&mut self, record: &IdempotencyRecord) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} (key,trip_id,wallet_id,seats,seat_numbers_hash,booking_id,created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) ON CONFLICT (key) DO NOTHING",
            self.tables.idempotency
        );
        let res = sqlx::query(&sql)
            .bind(&record.key)
            .bind(&record.trip_id)
            .bind(&record.wallet_id)
            .bind(record.seats)
            .bind(&record.seat_numbers_hash)
            .bind(&record.booking_id)
            .bind(fmt_ts(record.created_at))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("insert idempotency"))?;
        Ok(res.rows_affected() == 1)
    }

    async fn attach_idempotency_booking(&mut self, key: &str, booking_id: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET booking_id=$1 WHERE key=$2",
            self.tables.idempotency
        );
        sqlx::query(&sql)
            .bind(booking_id)
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error("attach idempotency booking"))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_error("commit"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NoopLocker;

    #[test]
    fn table_names_carry_the_schema_prefix() {
        let t = TableNames::new(Some("bus".into()));
        assert_eq!(t.trips, "bus.trips");
        assert_eq!(t.operators, "bus.bus_operators");
        let t = TableNames::new(None);
        assert_eq!(t.idempotency, "idempotency");
    }

    #[test]
    fn timestamps_are_written_in_a_fixed_width_utc_form() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T08:30:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(fmt_ts(ts), "2026-03-01T06:30:00.000000Z");
    }

    #[test]
    fn fixed_width_timestamps_sort_as_text_in_time_order() {
        let base = DateTime::parse_from_rfc3339("2026-03-09T23:59:59.999999Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = [
            base + chrono::Duration::microseconds(1),
            base + chrono::Duration::hours(1),
            base + chrono::Duration::days(400),
        ];
        for at in later {
            assert!(fmt_ts(at) > fmt_ts(base), "{} vs {}", fmt_ts(at), fmt_ts(base));
        }
        assert!(fmt_ts(base - chrono::Duration::microseconds(1)) < fmt_ts(base));
    }

    #[test]
    fn stats_queries_bound_the_window_in_sql() {
        let t = TableNames::new(Some("bus".into()));
        let trips = trips_since_sql(&t);
        assert!(trips.contains("FROM bus.trips WHERE route_id = ANY($1) AND depart_at >= $2"));
        let bookings = bookings_since_sql(&t);
        assert!(bookings.contains("FROM bus.bookings WHERE trip_id = ANY($1) AND created_at >= $2"));
        let boarded = boarded_since_sql(&t);
        assert!(boarded.contains("status = 'boarded'"));
        assert!(boarded.contains("boarded_at >= $2"));
    }

    #[test]
    fn lockers_render_their_clause() {
        assert_eq!(RowLocker.for_update(), " FOR UPDATE");
        assert_eq!(NoopLocker.for_update(), "");
    }
}
