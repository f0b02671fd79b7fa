//! HTTP API over the ride service
//!
//! Every response uses the same envelope: `{success, message, data?}`.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use super::cancel::CancelOutcome;
use super::error::{RideError, ValidationError};
use super::identity::{Identity, TokenIssuer};
use super::profile::RideView;
use super::ride::{Consent, RideRecord, RideRequest, TimeStamp};
use super::service::{BookingOutcome, RideService};

pub struct AppState {
    pub service: RideService,
    pub tokens: TokenIssuer,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

#[derive(Debug)]
pub struct ApiError(pub RideError);

/// The authenticated caller.
pub struct AuthUser(pub Identity);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentBody {
    ride_id: Option<String>,
    consent: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentReceipt {
    #[serde(flatten)]
    ride: RideRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    spin_off: Option<RideRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReceipt {
    ride_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancelled_ride_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            count: None,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            count: None,
            data: None,
        }
    }
}

impl From<RideError> for ApiError {
    fn from(value: RideError) -> Self {
        Self(value)
    }
}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        Self(value.into())
    }
}

pub fn status_for(error: &RideError) -> StatusCode {
    match error {
        RideError::Validation(_) => StatusCode::BAD_REQUEST,
        RideError::Authentication(_) => StatusCode::UNAUTHORIZED,
        RideError::Forbidden { .. } => StatusCode::FORBIDDEN,
        RideError::NotFound(_) => StatusCode::NOT_FOUND,
        RideError::Conflict(_) => StatusCode::CONFLICT,
        RideError::Storage(_) | RideError::Codec(_) | RideError::Dependency(_) | RideError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            RideError::Forbidden { .. } => "You are not authorized to access this ride".to_string(),
            e if e.is_dependency() => {
                error!(error = %e, "request failed on a dependency");
                "Internal server error".to_string()
            }
            e => e.to_string(),
        };

        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

#[async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers))
            .ok_or_else(|| RideError::Authentication("Token is missing".into()))?;

        Ok(AuthUser(state.tokens.verify(&token)?))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|pair| pair.trim().strip_prefix("token="))
        .map(str::to_string)
        .filter(|t| !t.is_empty())
}

// sled calls block, so service work runs off the async workers
async fn blocking<T, F>(state: &SharedState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&RideService) -> Result<T, RideError> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || work(&state.service))
        .await
        .map_err(|e| RideError::Dependency(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn health() -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        message: "Your server is up and running....".into(),
        count: None,
        data: None,
    })
}

async fn create_ride(
    State(state): State<SharedState>,
    AuthUser(caller): AuthUser,
    body: Result<Json<RideRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<RideRecord>>), ApiError> {
    let Json(request) = body.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;

    let booking = blocking(&state, move |service| service.request_ride(&caller.user_id, &request)).await?;

    let status = match booking.outcome {
        BookingOutcome::Matched => StatusCode::OK,
        BookingOutcome::Private | BookingOutcome::Waiting => StatusCode::CREATED,
    };
    Ok((status, Json(ApiResponse::ok(booking.outcome.message(), booking.ride))))
}

async fn list_rides(
    State(state): State<SharedState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<ApiResponse<Vec<RideRecord>>>, ApiError> {
    let rides = blocking(&state, move |service| service.list_rides_for_user(&caller.user_id)).await?;

    let count = rides.len();
    Ok(Json(ApiResponse {
        count: Some(count),
        ..ApiResponse::ok("Rides fetched", rides)
    }))
}

async fn get_ride(
    State(state): State<SharedState>,
    AuthUser(caller): AuthUser,
    Path(ride_id): Path<String>,
) -> Result<Json<ApiResponse<RideView>>, ApiError> {
    let view = blocking(&state, move |service| service.get_ride(&caller.user_id, &ride_id)).await?;

    Ok(Json(ApiResponse::ok("Ride fetched", view)))
}

async fn update_consent(
    State(state): State<SharedState>,
    AuthUser(caller): AuthUser,
    body: Result<Json<ConsentBody>, JsonRejection>,
) -> Result<Json<ApiResponse<ConsentReceipt>>, ApiError> {
    let Json(body) = body.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;
    let ride_id = body.ride_id.ok_or(ValidationError::MissingField("rideId"))?;
    let consent = Consent::decision(&body.consent.ok_or(ValidationError::MissingField("consent"))?)?;

    let step = blocking(&state, move |service| service.set_consent(&caller.user_id, &ride_id, consent)).await?;

    Ok(Json(ApiResponse::ok(
        step.outcome.message(),
        ConsentReceipt {
            ride: step.ride,
            spin_off: step.spin_off,
        },
    )))
}

async fn cancel_ride(
    State(state): State<SharedState>,
    AuthUser(caller): AuthUser,
    Path(ride_id): Path<String>,
) -> Result<Json<ApiResponse<CancelReceipt>>, ApiError> {
    let step = blocking(&state, move |service| service.cancel_ride(&caller.user_id, &ride_id)).await?;

    let receipt = match &step.outcome {
        CancelOutcome::OwnershipTransferred { new_owner, audit_id } => CancelReceipt {
            ride_id: step.ride.id.clone(),
            new_owner_id: Some(new_owner.clone()),
            cancelled_ride_id: Some(audit_id.clone()),
        },
        CancelOutcome::Left | CancelOutcome::Cancelled => CancelReceipt {
            ride_id: step.ride.id.clone(),
            new_owner_id: None,
            cancelled_ride_id: None,
        },
    };
    Ok(Json(ApiResponse::ok(step.outcome.message(), receipt)))
}

pub fn router(state: SharedState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(health))
        .route("/rides", post(create_ride).get(list_rides))
        .route("/rides/consent", post(update_consent))
        .route("/rides/:id", get(get_ride).delete(cancel_ride))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically cancels waiting rides older than `max_wait` past pickup.
pub fn spawn_expiry_sweep(state: SharedState, max_wait: chrono::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            if let Err(e) = blocking(&state, move |service| service.expire_waiting(TimeStamp::new(), max_wait)).await {
                error!(error = %e.0, "expiry sweep failed");
            }
        }
    })
}

pub async fn start_server(listener: TcpListener, app: Router) -> std::io::Result<()> {
    info!("Server running on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
