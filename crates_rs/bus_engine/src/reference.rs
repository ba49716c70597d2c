//! Reference data: cities, operators and routes. Imported administratively and
//! read by the rest of the engine.

use crate::engine::BusEngine;
use crate::error::{EngineError, Result};
use crate::models::{City, Operator, Route, Trip};
use crate::store::StoreTx;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoute {
    pub origin_city_id: String,
    pub dest_city_id: String,
    pub operator_id: String,
    pub bus_model: Option<String>,
    pub features: Option<String>,
}

fn required_text(field: &str, raw: &str, max_len: usize) -> Result<String> {
    let v = raw.trim();
    if v.is_empty() {
        return Err(EngineError::validation(format!("{field} required")));
    }
    if v.chars().count() > max_len {
        return Err(EngineError::validation(format!("{field} too long")));
    }
    Ok(v.to_string())
}

fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl BusEngine {
    pub async fn create_city(&self, name: &str, country: Option<&str>) -> Result<City> {
        let city = City {
            id: Uuid::new_v4().to_string(),
            name: required_text("name", name, 120)?,
            country: optional_text(country),
        };
        let mut tx = self.store.begin().await?;
        tx.insert_city(&city).await?;
        tx.commit().await?;
        tracing::info!(city_id = %city.id, name = %city.name, "city created");
        Ok(city)
    }

    /// Operators start offline; they go online explicitly before publishing.
    pub async fn create_operator(&self, name: &str, wallet_id: Option<&str>) -> Result<Operator> {
        let operator = Operator {
            id: Uuid::new_v4().to_string(),
            name: required_text("name", name, 120)?,
            wallet_id: optional_text(wallet_id),
            is_online: false,
        };
        let mut tx = self.store.begin().await?;
        tx.insert_operator(&operator).await?;
        tx.commit().await?;
        tracing::info!(operator_id = %operator.id, "operator created");
        Ok(operator)
    }

    pub async fn set_operator_online(&self, operator_id: &str, online: bool) -> Result<Operator> {
        let mut tx = self.store.begin().await?;
        if !tx.set_operator_online(operator_id, online).await? {
            return Err(EngineError::not_found("operator", operator_id));
        }
        let operator = tx
            .operator(operator_id)
            .await?
            .ok_or_else(|| EngineError::not_found("operator", operator_id))?;
        tx.commit().await?;
        tracing::info!(operator_id, online, "operator availability changed");
        Ok(operator)
    }

    pub async fn create_route(&self, new: NewRoute) -> Result<Route> {
        let origin_city_id = required_text("origin_city_id", &new.origin_city_id, 36)?;
        let dest_city_id = required_text("dest_city_id", &new.dest_city_id, 36)?;
        let operator_id = required_text("operator_id", &new.operator_id, 36)?;
        if origin_city_id == dest_city_id {
            return Err(EngineError::validation(
                "origin and destination must differ",
            ));
        }

        let mut tx = self.store.begin().await?;
        for city_id in [&origin_city_id, &dest_city_id] {
            if tx.city(city_id).await?.is_none() {
                return Err(EngineError::not_found("city", city_id.as_str()));
            }
        }
        if tx.operator(&operator_id).await?.is_none() {
            return Err(EngineError::not_found("operator", operator_id));
        }

        let route = Route {
            id: Uuid::new_v4().to_string(),
            origin_city_id,
            dest_city_id,
            operator_id,
            bus_model: optional_text(new.bus_model.as_deref()),
            features: optional_text(new.features.as_deref()),
        };
        tx.insert_route(&route).await?;
        tx.commit().await?;
        Ok(route)
    }

    pub async fn city(&self, city_id: &str) -> Result<City> {
        let mut tx = self.store.begin().await?;
        tx.city(city_id)
            .await?
            .ok_or_else(|| EngineError::not_found("city", city_id))
    }

    pub async fn operator(&self, operator_id: &str) -> Result<Operator> {
        let mut tx = self.store.begin().await?;
        tx.operator(operator_id)
            .await?
            .ok_or_else(|| EngineError::not_found("operator", operator_id))
    }

    pub async fn route(&self, route_id: &str) -> Result<Route> {
        let mut tx = self.store.begin().await?;
        tx.route(route_id)
            .await?
            .ok_or_else(|| EngineError::not_found("route", route_id))
    }
}

/// Operator that runs `trip`, resolved through its route.
pub(crate) async fn operator_for_trip(tx: &mut dyn StoreTx, trip: &Trip) -> Result<Operator> {
    let route = tx
        .route(&trip.route_id)
        .await?
        .ok_or_else(|| EngineError::not_found("route", trip.route_id.as_str()))?;
    tx.operator(&route.operator_id)
        .await?
        .ok_or_else(|| EngineError::not_found("operator", route.operator_id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_fields_are_trimmed_and_bounded() {
        assert_eq!(required_text("name", "  Damascus ", 120).unwrap(), "Damascus");
        assert!(required_text("name", "   ", 120).is_err());
        assert!(required_text("name", &"x".repeat(121), 120).is_err());
        assert_eq!(optional_text(Some("  ")), None);
    }
}
