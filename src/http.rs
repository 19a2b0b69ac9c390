use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{MatchedPath, Path, Query, Request, State as AxumState},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use time::Date;
use ulid::Ulid;

use crate::engine::{BookingRequest, Engine, EngineError, ReservationFilter};
use crate::model::{
    BookableAircraft, CancelActor, FlightMinutes, FlightType, MemberSnapshot, Minute,
    QualificationRecord, Rating, Requirement, RequirementKind, ReservationInfo,
    ReservationStatus, Window, iso_date,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// ── Wire formats ─────────────────────────────────────────

/// Minutes-of-day as `"HH:MM"` on the wire.
mod hhmm {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::model::{Minute, fmt_hhmm, parse_hhmm};

    pub fn serialize<S: Serializer>(m: &Minute, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&fmt_hhmm(*m))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Minute, D::Error> {
        let s = String::deserialize(de)?;
        parse_hhmm(&s).ok_or_else(|| D::Error::custom(format!("invalid time of day: {s}")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateReservationRequest {
    member_id: Ulid,
    aircraft_id: Ulid,
    #[serde(with = "iso_date")]
    date: Date,
    #[serde(with = "hhmm")]
    start: Minute,
    #[serde(with = "hhmm")]
    end: Minute,
    flight_type: FlightType,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReservationResponse {
    id: Ulid,
    aircraft_id: Ulid,
    member_id: Ulid,
    #[serde(with = "iso_date")]
    date: Date,
    #[serde(with = "hhmm")]
    start: Minute,
    #[serde(with = "hhmm")]
    end: Minute,
    flight_type: FlightType,
    status: ReservationStatus,
}

impl From<ReservationInfo> for ReservationResponse {
    fn from(info: ReservationInfo) -> Self {
        Self {
            id: info.id,
            aircraft_id: info.aircraft_id,
            member_id: info.member_id,
            date: info.date,
            start: info.window.start,
            end: info.window.end,
            flight_type: info.flight_type,
            status: info.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AvailabilityQuery {
    member: Ulid,
    #[serde(alias = "flightType")]
    flight_type: FlightType,
    #[serde(with = "iso_date")]
    date: Date,
}

#[derive(Debug, Serialize, Deserialize)]
struct WindowDto {
    #[serde(with = "hhmm")]
    start: Minute,
    #[serde(with = "hhmm")]
    end: Minute,
}

#[derive(Debug, Serialize, Deserialize)]
struct AvailableAircraftResponse {
    id: Ulid,
    registration: String,
    type_designation: String,
    seats: u8,
    free: Vec<WindowDto>,
}

impl From<BookableAircraft> for AvailableAircraftResponse {
    fn from(b: BookableAircraft) -> Self {
        Self {
            id: b.aircraft.id,
            registration: b.aircraft.registration,
            type_designation: b.aircraft.type_designation,
            seats: b.aircraft.seats,
            free: b
                .free
                .into_iter()
                .map(|w| WindowDto {
                    start: w.start,
                    end: w.end,
                })
                .collect(),
        }
    }
}

/// Cancellation body: the owning member, or an operator with a reason.
/// When both are present the operator identity wins.
#[derive(Debug, Serialize, Deserialize)]
struct CancelRequest {
    member_id: Option<Ulid>,
    operator_id: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListReservationsQuery {
    aircraft: Option<Ulid>,
    member: Option<Ulid>,
    #[serde(default, with = "iso_date::option")]
    date: Option<Date>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegisterAircraftRequest {
    registration: String,
    type_designation: String,
    seats: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct AircraftResponse {
    id: Ulid,
    registration: String,
    type_designation: String,
    seats: u8,
    grounded: bool,
    active: bool,
}

impl From<crate::model::AircraftInfo> for AircraftResponse {
    fn from(info: crate::model::AircraftInfo) -> Self {
        Self {
            id: info.id,
            registration: info.registration,
            type_designation: info.type_designation,
            seats: info.seats,
            grounded: info.grounded,
            active: info.active,
        }
    }
}

/// Requirement upsert body. A present `id` replaces that row; otherwise a
/// fresh row id is assigned.
#[derive(Debug, Serialize, Deserialize)]
struct RequirementRequest {
    id: Option<Ulid>,
    qualification_id: Ulid,
    qualification_name: String,
    kind: RequirementKind,
    min_minutes_total: Option<u32>,
    min_minutes_on_type: Option<u32>,
    #[serde(default)]
    requires_instructor: bool,
    #[serde(default)]
    requires_medical: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemberSyncRequest {
    name: String,
    rating: Rating,
    #[serde(default)]
    records: Vec<QualificationRecord>,
    #[serde(default, with = "iso_date::option")]
    medical_valid_until: Option<Date>,
    flight_minutes: Option<FlightMinutes>,
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
}

// ── Error envelope ───────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    reason: String,
    detail: Vec<String>,
}

/// HTTP error wrapper that implements `IntoResponse`. `reason` is the
/// machine-readable kind; `detail` carries the engine's messages verbatim
/// (the booking UI depends on the full missing-requirement list).
pub struct ApiError {
    status: StatusCode,
    reason: &'static str,
    detail: Vec<String>,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            reason: "validation",
            detail: vec![msg.into()],
        }
    }

    fn not_found(id: Ulid) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            reason: "not_found",
            detail: vec![format!("not found: {id}")],
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            reason: self.reason.into(),
            detail: self.detail,
        });
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => Self {
                status: StatusCode::BAD_REQUEST,
                reason: "validation",
                detail: vec![msg],
            },
            EngineError::NotFound(id) => Self::not_found(id),
            EngineError::QualificationDenied { missing } => Self {
                status: StatusCode::CONFLICT,
                reason: "qualification",
                detail: missing.iter().map(|d| d.to_string()).collect(),
            },
            EngineError::TimeConflict { window, with } => Self {
                status: StatusCode::CONFLICT,
                reason: "conflict",
                detail: vec![format!("conflicts with reservation {with} at {window}")],
            },
            EngineError::Grounded(_) => Self {
                status: StatusCode::CONFLICT,
                reason: "grounded",
                detail: vec!["aircraft is grounded".into()],
            },
            EngineError::NotPermitted(msg) => Self {
                status: StatusCode::FORBIDDEN,
                reason: "forbidden",
                detail: vec![msg.into()],
            },
            EngineError::LimitExceeded(msg) => Self {
                status: StatusCode::BAD_REQUEST,
                reason: "validation",
                detail: vec![format!("limit exceeded: {msg}")],
            },
            EngineError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                Self {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    reason: "storage",
                    detail: vec!["storage failure, retry later".into()],
                }
            }
        }
    }
}

// ── Handlers ─────────────────────────────────────────────

async fn handle_create_reservation(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let info = state
        .engine
        .book(BookingRequest {
            member_id: req.member_id,
            aircraft_id: req.aircraft_id,
            date: req.date,
            window: Window {
                start: req.start,
                end: req.end,
            },
            flight_type: req.flight_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(info.into())))
}

async fn handle_available(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<AvailableAircraftResponse>>, ApiError> {
    let options = state
        .engine
        .bookable_aircraft(&query.member, query.flight_type, query.date)
        .await?;
    Ok(Json(options.into_iter().map(Into::into).collect()))
}

async fn handle_cancel(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let actor = match (req.member_id, req.operator_id) {
        (_, Some(operator_id)) => CancelActor::Operator {
            id: operator_id,
            reason: req.reason.unwrap_or_default(),
        },
        (Some(member_id), None) => CancelActor::Member(member_id),
        (None, None) => {
            return Err(ApiError::bad_request("member_id or operator_id is required"));
        }
    };
    let info = state.engine.cancel(id, actor).await?;
    Ok(Json(info.into()))
}

async fn handle_complete(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let info = state.engine.complete(id).await?;
    Ok(Json(info.into()))
}

async fn handle_no_show(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let info = state.engine.mark_no_show(id).await?;
    Ok(Json(info.into()))
}

async fn handle_list_reservations(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<ListReservationsQuery>,
) -> Result<Json<Vec<ReservationResponse>>, ApiError> {
    let listed = state
        .engine
        .list_reservations(ReservationFilter {
            aircraft: query.aircraft,
            member: query.member,
            date: query.date,
        })
        .await?;
    Ok(Json(listed.into_iter().map(Into::into).collect()))
}

async fn handle_register_aircraft(
    AxumState(state): AxumState<AppState>,
    Json(req): Json<RegisterAircraftRequest>,
) -> Result<(StatusCode, Json<AircraftResponse>), ApiError> {
    let info = state
        .engine
        .register_aircraft(req.registration, req.type_designation, req.seats)
        .await?;
    Ok((StatusCode::CREATED, Json(info.into())))
}

async fn handle_list_fleet(
    AxumState(state): AxumState<AppState>,
) -> Json<Vec<AircraftResponse>> {
    let fleet = state.engine.list_fleet().await;
    Json(fleet.into_iter().map(Into::into).collect())
}

async fn handle_ground(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.set_grounded(id, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_unground(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.set_grounded(id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_retire(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    state.engine.retire_aircraft(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_set_requirement(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<RequirementRequest>,
) -> Result<(StatusCode, Json<Requirement>), ApiError> {
    let row = Requirement {
        id: req.id.unwrap_or_else(Ulid::new),
        qualification_id: req.qualification_id,
        qualification_name: req.qualification_name,
        kind: req.kind,
        min_minutes_total: req.min_minutes_total,
        min_minutes_on_type: req.min_minutes_on_type,
        requires_instructor: req.requires_instructor,
        requires_medical: req.requires_medical,
    };
    let row = state.engine.set_requirement(id, row).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn handle_get_requirements(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<Vec<Requirement>>, ApiError> {
    Ok(Json(state.engine.get_requirements(&id).await?))
}

async fn handle_clear_requirement(
    AxumState(state): AxumState<AppState>,
    Path((id, row_id)): Path<(Ulid, Ulid)>,
) -> Result<StatusCode, ApiError> {
    state.engine.clear_requirement(id, row_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_sync_member(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
    Json(req): Json<MemberSyncRequest>,
) -> Result<Json<MemberSnapshot>, ApiError> {
    let snapshot = MemberSnapshot {
        id,
        name: req.name,
        rating: req.rating,
        records: req.records,
        medical_valid_until: req.medical_valid_until,
        flight_minutes: req.flight_minutes,
    };
    state.engine.sync_member(snapshot.clone()).await?;
    Ok(Json(snapshot))
}

async fn handle_get_member(
    AxumState(state): AxumState<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<MemberSnapshot>, ApiError> {
    let snapshot = state.engine.directory.get(&id).ok_or_else(|| ApiError::not_found(id))?;
    Ok(Json((*snapshot).clone()))
}

async fn handle_post_duty(
    AxumState(state): AxumState<AppState>,
    Path(date): Path<String>,
) -> Result<StatusCode, ApiError> {
    let parsed = iso_date::parse(&date)
        .ok_or_else(|| ApiError::bad_request(format!("invalid date: {date}")))?;
    state.engine.post_duty(parsed).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_clear_duty(
    AxumState(state): AxumState<AppState>,
    Path(date): Path<String>,
) -> Result<StatusCode, ApiError> {
    let parsed = iso_date::parse(&date)
        .ok_or_else(|| ApiError::bad_request(format!("invalid date: {date}")))?;
    state.engine.clear_duty(parsed).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

/// Record request count and latency per matched route. Uses the route
/// template (`/reservations/{id}/cancel`), not the raw URI, to bound
/// label cardinality.
async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(crate::observability::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(crate::observability::HTTP_REQUEST_DURATION_SECONDS, &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/reservations", post(handle_create_reservation))
        .route("/reservations", get(handle_list_reservations))
        .route("/reservations/{id}/cancel", post(handle_cancel))
        .route("/reservations/{id}/complete", post(handle_complete))
        .route("/reservations/{id}/no-show", post(handle_no_show))
        .route("/resources/available", get(handle_available))
        .route("/aircraft", post(handle_register_aircraft))
        .route("/aircraft", get(handle_list_fleet))
        .route("/aircraft/{id}/ground", post(handle_ground))
        .route("/aircraft/{id}/unground", post(handle_unground))
        .route("/aircraft/{id}/retire", post(handle_retire))
        .route("/aircraft/{id}/requirements", post(handle_set_requirement))
        .route("/aircraft/{id}/requirements", get(handle_get_requirements))
        .route(
            "/aircraft/{id}/requirements/{row_id}",
            delete(handle_clear_requirement),
        )
        .route("/members/{id}", put(handle_sync_member))
        .route("/members/{id}", get(handle_get_member))
        .route("/duty/{date}", put(handle_post_duty))
        .route("/duty/{date}", delete(handle_clear_duty))
        .route("/healthz", get(handle_healthz))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use time::Duration;
    use tower::ServiceExt;

    use crate::engine::Clock;

    fn test_app(name: &str) -> Router {
        let dir = std::env::temp_dir().join("flightline_test_http");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        let engine = Engine::new(path, Clock::utc()).unwrap();
        build_router(AppState {
            engine: Arc::new(engine),
        })
    }

    /// A date safely inside the booking horizon.
    fn test_date() -> String {
        (Clock::utc().today() + Duration::days(30)).to_string()
    }

    fn post_json(uri: &str, body: &impl Serialize) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    fn put_json(uri: &str, body: &impl Serialize) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    fn get_req(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_aircraft(app: &Router, registration: &str, seats: u8) -> Ulid {
        let req = RegisterAircraftRequest {
            registration: registration.into(),
            type_designation: "ASK-21".into(),
            seats,
        };
        let response = app.clone().oneshot(post_json("/aircraft", &req)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let aircraft: AircraftResponse = read_json(response).await;
        aircraft.id
    }

    async fn sync_member(app: &Router, rating: Rating) -> Ulid {
        let id = Ulid::new();
        let req = MemberSyncRequest {
            name: "Test Member".into(),
            rating,
            records: Vec::new(),
            medical_valid_until: None,
            flight_minutes: None,
        };
        let response = app
            .clone()
            .oneshot(put_json(&format!("/members/{id}"), &req))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        id
    }

    fn booking_body(member: Ulid, aircraft: Ulid, date: &str, start: &str, end: &str) -> serde_json::Value {
        serde_json::json!({
            "member_id": member,
            "aircraft_id": aircraft,
            "date": date,
            "start": start,
            "end": end,
            "flight_type": "solo",
        })
    }

    #[tokio::test]
    async fn booking_flow_conflict_and_adjacent() {
        let app = test_app("booking_flow.wal");
        let aircraft = register_aircraft(&app, "Glider-7", 2).await;
        let member = sync_member(&app, Rating::Private).await;
        let date = test_date();

        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &date, "09:00", "10:00"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let booked: ReservationResponse = read_json(response).await;
        assert_eq!(booked.status, ReservationStatus::Confirmed);
        assert_eq!(booked.start, 540);
        assert_eq!(booked.end, 600);

        // Overlapping request is refused with the conflict reason
        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &date, "09:30", "10:30"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let err: ErrorBody = read_json(response).await;
        assert_eq!(err.reason, "conflict");

        // Adjacent request shares only the boundary minute and succeeds
        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &date, "10:00", "11:00"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn qualification_denial_carries_detail() {
        let app = test_app("qualification_denial.wal");
        let aircraft = register_aircraft(&app, "Glider-9", 2).await;
        let member = sync_member(&app, Rating::Private).await;

        let row = RequirementRequest {
            id: None,
            qualification_id: Ulid::new(),
            qualification_name: "ASK-21 checkout".into(),
            kind: RequirementKind::Checkout,
            min_minutes_total: None,
            min_minutes_on_type: None,
            requires_instructor: false,
            requires_medical: false,
        };
        let response = app
            .clone()
            .oneshot(post_json(&format!("/aircraft/{aircraft}/requirements"), &row))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &test_date(), "09:00", "10:00"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let err: ErrorBody = read_json(response).await;
        assert_eq!(err.reason, "qualification");
        assert_eq!(err.detail, vec!["missing ASK-21 checkout".to_string()]);
    }

    #[tokio::test]
    async fn grounded_reason_not_qualification() {
        let app = test_app("grounded_reason.wal");
        let aircraft = register_aircraft(&app, "Glider-3", 2).await;
        let member = sync_member(&app, Rating::Private).await;

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/aircraft/{aircraft}/ground"),
                &serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &test_date(), "09:00", "10:00"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let err: ErrorBody = read_json(response).await;
        assert_eq!(err.reason, "grounded");
    }

    #[tokio::test]
    async fn availability_omits_unqualified_options() {
        let app = test_app("availability_filter.wal");
        let open = register_aircraft(&app, "Glider-1", 2).await;
        let gated = register_aircraft(&app, "Glider-2", 2).await;
        let member = sync_member(&app, Rating::Private).await;

        let row = RequirementRequest {
            id: None,
            qualification_id: Ulid::new(),
            qualification_name: "type checkout".into(),
            kind: RequirementKind::Either,
            min_minutes_total: None,
            min_minutes_on_type: None,
            requires_instructor: false,
            requires_medical: false,
        };
        let response = app
            .clone()
            .oneshot(post_json(&format!("/aircraft/{gated}/requirements"), &row))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let uri = format!(
            "/resources/available?member={member}&flightType=solo&date={}",
            test_date()
        );
        let response = app.clone().oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let options: Vec<AvailableAircraftResponse> = read_json(response).await;
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].id, open);
        assert_eq!(options[0].free.len(), 1);
        assert_eq!(options[0].free[0].start, 0);
        assert_eq!(options[0].free[0].end, 1440);
    }

    #[tokio::test]
    async fn cancel_frees_the_window() {
        let app = test_app("cancel_frees.wal");
        let aircraft = register_aircraft(&app, "Glider-5", 2).await;
        let member = sync_member(&app, Rating::Private).await;
        let date = test_date();

        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &date, "09:00", "10:00"),
            ))
            .await
            .unwrap();
        let booked: ReservationResponse = read_json(response).await;

        let cancel = CancelRequest {
            member_id: Some(member),
            operator_id: None,
            reason: None,
        };
        let response = app
            .clone()
            .oneshot(post_json(&format!("/reservations/{}/cancel", booked.id), &cancel))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cancelled: ReservationResponse = read_json(response).await;
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        // The window is free again the moment the cancellation commits
        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &date, "09:00", "10:00"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn cancel_by_stranger_is_forbidden() {
        let app = test_app("cancel_stranger.wal");
        let aircraft = register_aircraft(&app, "Glider-6", 2).await;
        let member = sync_member(&app, Rating::Private).await;
        let stranger = sync_member(&app, Rating::Private).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &test_date(), "09:00", "10:00"),
            ))
            .await
            .unwrap();
        let booked: ReservationResponse = read_json(response).await;

        let cancel = CancelRequest {
            member_id: Some(stranger),
            operator_id: None,
            reason: None,
        };
        let response = app
            .clone()
            .oneshot(post_json(&format!("/reservations/{}/cancel", booked.id), &cancel))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Operator cancellation without a reason is rejected
        let cancel = CancelRequest {
            member_id: None,
            operator_id: Some("ops-1".into()),
            reason: None,
        };
        let response = app
            .clone()
            .oneshot(post_json(&format!("/reservations/{}/cancel", booked.id), &cancel))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // With a reason it goes through
        let cancel = CancelRequest {
            member_id: None,
            operator_id: Some("ops-1".into()),
            reason: Some("emergency maintenance".into()),
        };
        let response = app
            .clone()
            .oneshot(post_json(&format!("/reservations/{}/cancel", booked.id), &cancel))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_window_and_date_are_rejected() {
        let app = test_app("malformed_input.wal");
        let aircraft = register_aircraft(&app, "Glider-8", 2).await;
        let member = sync_member(&app, Rating::Private).await;

        // end before start
        let response = app
            .clone()
            .oneshot(post_json(
                "/reservations",
                &booking_body(member, aircraft, &test_date(), "10:00", "09:00"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // garbage duty date
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("PUT")
                    .uri("/duty/not-a-date")
                    .header("content-type", "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn member_snapshot_roundtrip() {
        let app = test_app("member_roundtrip.wal");
        let id = Ulid::new();
        let req = MemberSyncRequest {
            name: "Jo Soaring".into(),
            rating: Rating::Student,
            records: vec![QualificationRecord {
                qualification_id: Ulid::new(),
                qualification_name: "solo endorsement".into(),
                solo_endorsement: true,
                qualified: true,
                expires_on: None,
            }],
            medical_valid_until: None,
            flight_minutes: None,
        };
        let response = app
            .clone()
            .oneshot(put_json(&format!("/members/{id}"), &req))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_req(&format!("/members/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: MemberSnapshot = read_json(response).await;
        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.name, "Jo Soaring");
        assert_eq!(snapshot.rating, Rating::Student);
        assert_eq!(snapshot.records.len(), 1);
    }

    #[tokio::test]
    async fn healthz_ok() {
        let app = test_app("healthz.wal");
        let response = app.oneshot(get_req("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = read_json(response).await;
        assert_eq!(health.status, "ok");
    }
}
