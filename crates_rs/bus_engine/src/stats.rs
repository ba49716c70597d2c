use crate::engine::BusEngine;
use crate::error::{EngineError, Result};
use crate::models::BookingStatus;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsPeriod {
    #[default]
    Today,
    Last7Days,
    Last30Days,
}

impl StatsPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Last7Days => "7d",
            Self::Last30Days => "30d",
        }
    }

    /// Start of the window ending at `now`. `Today` starts at UTC midnight.
    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Today => now.date_naive().and_time(NaiveTime::MIN).and_utc(),
            Self::Last7Days => now - Duration::days(7),
            Self::Last30Days => now - Duration::days(30),
        }
    }
}

impl fmt::Display for StatsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatsPeriod {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "today" => Ok(Self::Today),
            "7d" => Ok(Self::Last7Days),
            "30d" => Ok(Self::Last30Days),
            _ => Err(EngineError::validation("invalid period")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperatorStats {
    pub operator_id: String,
    pub period: String,
    pub trips: i32,
    pub bookings: i32,
    pub confirmed_bookings: i32,
    pub seats_sold: i32,
    pub seats_total: i32,
    pub seats_boarded: i32,
    pub revenue_cents: i64,
}

impl BusEngine {
    /// Activity on trips of the operator's routes departing inside the period.
    pub async fn operator_stats(
        &self,
        operator_id: &str,
        period: StatsPeriod,
    ) -> Result<OperatorStats> {
        let operator_id = operator_id.trim();
        let start = period.start(self.now());
        let mut stats = OperatorStats {
            operator_id: operator_id.to_string(),
            period: period.to_string(),
            ..OperatorStats::default()
        };

        let mut tx = self.store.begin().await?;
        if tx.operator(operator_id).await?.is_none() {
            return Err(EngineError::not_found("operator", operator_id));
        }
        let route_ids: Vec<String> = tx
            .routes_for_operator(operator_id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let trips = tx.trips_for_routes(&route_ids, start).await?;
        if trips.is_empty() {
            return Ok(stats);
        }

        let trip_ids: Vec<String> = trips.iter().map(|t| t.id.clone()).collect();
        let price_by_trip: HashMap<&str, i64> =
            trips.iter().map(|t| (t.id.as_str(), t.price_cents)).collect();
        stats.trips = i32::try_from(trips.len()).unwrap_or(i32::MAX);
        stats.seats_total = trips.iter().map(|t| t.seats_total).sum();

        let bookings = tx.bookings_for_trips(&trip_ids, start).await?;
        stats.bookings = i32::try_from(bookings.len()).unwrap_or(i32::MAX);
        for b in bookings.iter().filter(|b| b.status == BookingStatus::Confirmed) {
            stats.confirmed_bookings += 1;
            stats.seats_sold += b.seats;
            let fallback = price_by_trip.get(b.trip_id.as_str()).copied().unwrap_or(0);
            stats.revenue_cents += b.amount_cents(fallback);
        }

        let boarded = tx.boarded_tickets_for_trips(&trip_ids, start).await?.len();
        stats.seats_boarded = i32::try_from(boarded).unwrap_or(i32::MAX);
        Ok(stats)
    }
}
