use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use bus_engine::{BookRequest, StatsPeriod, MAX_IDEMPOTENCY_KEY_LEN};

pub async fn health(State(state): State<AppState>) -> axum::Json<HealthOut> {
    axum::Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "Bus API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn create_city(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CityIn>,
) -> ApiResult<axum::Json<CityOut>> {
    let city = state
        .engine
        .create_city(&body.name, body.country.as_deref())
        .await?;
    Ok(axum::Json(city.into()))
}

pub async fn create_operator(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<OperatorIn>,
) -> ApiResult<axum::Json<OperatorOut>> {
    let op = state
        .engine
        .create_operator(&body.name, body.wallet_id.as_deref())
        .await?;
    Ok(axum::Json(op.into()))
}

pub async fn operator_online(
    Path(operator_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<OperatorOut>> {
    set_operator_online(&state, &operator_id, true).await
}

pub async fn operator_offline(
    Path(operator_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<OperatorOut>> {
    set_operator_online(&state, &operator_id, false).await
}

async fn set_operator_online(
    state: &AppState,
    operator_id: &str,
    online: bool,
) -> ApiResult<axum::Json<OperatorOut>> {
    let op = state.engine.set_operator_online(operator_id, online).await?;
    Ok(axum::Json(op.into()))
}

pub async fn operator_stats(
    Path(operator_id): Path<String>,
    State(state): State<AppState>,
    Query(params): Query<OperatorStatsParams>,
) -> ApiResult<axum::Json<OperatorStatsOut>> {
    let period = match params.period.as_deref() {
        Some(raw) => raw.parse::<StatsPeriod>()?,
        None => StatsPeriod::Today,
    };
    let stats = state.engine.operator_stats(&operator_id, period).await?;
    Ok(axum::Json(stats.into()))
}

pub async fn create_route(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<RouteIn>,
) -> ApiResult<axum::Json<RouteOut>> {
    let route = state.engine.create_route(body.into()).await?;
    Ok(axum::Json(route.into()))
}

pub async fn create_trip(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<TripIn>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.engine.create_trip(body.into()).await?;
    Ok(axum::Json(trip.into()))
}

pub async fn trip_detail(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.engine.trip(&trip_id).await?;
    Ok(axum::Json(trip.into()))
}

pub async fn publish_trip(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.engine.publish_trip(&trip_id).await?;
    Ok(axum::Json(trip.into()))
}

pub async fn unpublish_trip(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.engine.unpublish_trip(&trip_id).await?;
    Ok(axum::Json(trip.into()))
}

pub async fn cancel_trip(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.engine.cancel_trip(&trip_id).await?;
    Ok(axum::Json(trip.into()))
}

pub async fn quote(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
    Query(params): Query<QuoteParams>,
) -> ApiResult<axum::Json<QuoteOut>> {
    let seats = params.seats.unwrap_or(1);
    let quote = state.engine.quote(&trip_id, seats).await?;
    Ok(axum::Json(quote.into()))
}

fn idempotency_key(headers: &HeaderMap) -> ApiResult<Option<String>> {
    let Some(raw) = headers.get("idempotency-key") else {
        return Ok(None);
    };
    let key = raw
        .to_str()
        .map_err(|_| ApiError::bad_request("invalid Idempotency-Key"))?
        .trim();
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::bad_request("Idempotency-Key too long"));
    }
    Ok(Some(key.to_string()).filter(|k| !k.is_empty()))
}

pub async fn book_trip(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<BookReq>,
) -> ApiResult<axum::Json<BookingOut>> {
    let req = BookRequest {
        seats: body.seat_request(),
        wallet_id: body.wallet_id,
        customer_phone: body.customer_phone,
        idempotency_key: idempotency_key(&headers)?,
    };
    let receipt = state.engine.book(&trip_id, req).await?;
    Ok(axum::Json(BookingOut::new(
        receipt.booking,
        Some(receipt.tickets),
        receipt.replayed,
    )))
}

pub async fn booking_status(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<BookingOut>> {
    let view = state.engine.booking_tickets(&booking_id).await?;
    Ok(axum::Json(view.into()))
}

pub async fn cancel_booking(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<BookingCancelOut>> {
    let outcome = state.engine.cancel_booking(&booking_id).await?;
    Ok(axum::Json(outcome.into()))
}

pub async fn ticket_board(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<BoardReq>,
) -> ApiResult<axum::Json<BoardOut>> {
    let outcome = state.engine.board(&body.payload).await?;
    Ok(axum::Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn idempotency_header_is_trimmed_and_optional() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers).unwrap(), None);

        headers.insert("idempotency-key", HeaderValue::from_static("  abc-1 "));
        assert_eq!(idempotency_key(&headers).unwrap(), Some("abc-1".to_string()));

        headers.insert("idempotency-key", HeaderValue::from_static("   "));
        assert_eq!(idempotency_key(&headers).unwrap(), None);
    }

    #[test]
    fn overlong_idempotency_header_is_rejected() {
        let mut headers = HeaderMap::new();
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        headers.insert("idempotency-key", HeaderValue::from_str(&long).unwrap());
        let err = idempotency_key(&headers).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }
}
