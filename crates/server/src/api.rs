//! Companion web API. A login link from the chat (`auth login`) is exchanged for a
//! session secret, which then authorises access to channel calendars and boards. The
//! iCalendar feed is public so calendar apps can subscribe to it.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use teamdesk_core::domain::calendar::{Calendar, ExternalCalendarId};
use teamdesk_core::domain::event::{Event, EventChanges, EventDraft, EventId};
use teamdesk_core::domain::kanban::{KanbanBoard, KanbanColumn, KanbanItem};
use teamdesk_core::domain::user::SessionToken;
use teamdesk_core::errors::DomainError;
use teamdesk_core::time::DateParser;
use teamdesk_core::token::LoginTokenSigner;
use teamdesk_db::{CalendarRepository, EventRepository, KanbanRepository, RepositoryError, UserRepository};
use teamdesk_handlers::HandlerContext;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::ical::render_calendar;

const LOGIN_TOKEN_MAX_AGE_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct ApiState {
    users: Arc<dyn UserRepository>,
    events: Arc<dyn EventRepository>,
    calendars: Arc<dyn CalendarRepository>,
    kanban: Arc<dyn KanbanRepository>,
    signer: LoginTokenSigner,
    dates: DateParser,
}

impl ApiState {
    pub fn from_handlers(handlers: &HandlerContext) -> Self {
        Self {
            users: handlers.users.clone(),
            events: handlers.events.clone(),
            calendars: handlers.calendars.clone(),
            kanban: handlers.kanban.clone(),
            signer: handlers.signer.clone(),
            dates: handlers.dates,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/auth", post(login).delete(logout))
        .route("/calendar/{channel_id}/events", get(channel_events))
        .route("/calendar/create-event", post(create_event))
        .route("/calendar/modify-event", post(modify_event))
        .route("/event/{id}", delete(delete_event))
        .route("/kanban/save", post(save_board))
        .route("/kanban/{channel_id}", get(channel_board))
        .route("/ical/{calendar_id}", get(calendar_feed))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error("{0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(#[from] RepositoryError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(error) => {
                error!(event_name = "server.api.storage_failed", error = %error, "api request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// The session behind `Authorization: Bearer <secret>`.
pub struct AuthSession(pub SessionToken);

impl FromRequestParts<ApiState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let secret = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .ok_or(ApiError::Unauthorized)?;
        let session = state.users.find_session(secret).await?.ok_or(ApiError::Unauthorized)?;
        Ok(Self(session))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub secret: String,
    pub user_id: String,
    pub username: String,
}

async fn login(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let claims = state
        .signer
        .verify_fresh(&request.token, Utc::now(), Duration::minutes(LOGIN_TOKEN_MAX_AGE_MINUTES))
        .map_err(|_| ApiError::Unauthorized)?;

    state.users.ensure_user(&claims.user_id, &claims.username).await?;
    let session = SessionToken {
        secret: Uuid::new_v4().simple().to_string(),
        user_id: claims.user_id.clone(),
        created_at: Utc::now(),
        ip_address: client_ip(&headers),
        user_agent: header_text(&headers, header::USER_AGENT.as_str()),
    };
    state.users.create_session(&session).await?;

    info!(event_name = "server.api.session_created", user_id = %claims.user_id, "dashboard session created");
    Ok((
        StatusCode::CREATED,
        Json(LoginResponse { secret: session.secret, user_id: claims.user_id, username: claims.username }),
    ))
}

async fn logout(
    State(state): State<ApiState>,
    AuthSession(session): AuthSession,
) -> Result<StatusCode, ApiError> {
    state.users.revoke_session(&session.user_id, &session.secret).await?;
    info!(event_name = "server.api.session_revoked", user_id = %session.user_id, "dashboard session revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

async fn channel_events(
    State(state): State<ApiState>,
    _session: AuthSession,
    Path(channel_id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let parse = |raw: &str, which: &str| {
        state.dates.parse(raw).map_err(|_| ApiError::BadRequest(format!("can't parse {which} date")))
    };
    let start = match range.start.as_deref() {
        Some(raw) => parse(raw, "start")?,
        None => state.dates.timezone().start_of_day(Utc::now()),
    };
    let end = match range.end.as_deref() {
        Some(raw) => parse(raw, "end")?,
        None => start + Duration::days(1),
    };
    if start >= end {
        return Err(ApiError::BadRequest("start date must be before end date".to_string()));
    }

    Ok(Json(state.events.list_in_range(&channel_id, start, end).await?))
}

async fn channel_board(
    State(state): State<ApiState>,
    _session: AuthSession,
    Path(channel_id): Path<String>,
) -> Result<Json<KanbanBoard>, ApiError> {
    Ok(Json(state.kanban.board(&channel_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub channel_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub organizer: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_whole_day: bool,
    #[serde(default)]
    pub attendees: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModifyEventRequest {
    pub id: String,
    #[serde(flatten)]
    pub event: EventRequest,
}

/// Creates an event in the channel calendar, creating that calendar on first use.
async fn create_event(
    State(state): State<ApiState>,
    AuthSession(session): AuthSession,
    Json(request): Json<EventRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let channel_id = request.channel_id.trim().to_owned();
    if channel_id.is_empty() {
        return Err(ApiError::BadRequest("channel_id is required".to_owned()));
    }
    let organizer = if request.organizer.trim().is_empty() { session.user_id.clone() } else { request.organizer };
    let draft = EventDraft {
        summary: request.title,
        description: request.description,
        location: request.location,
        url: request.url,
        organizer,
        start: Some(request.start),
        end: request.end,
        whole_day: request.is_whole_day,
        attendees: request.attendees,
    };
    let event =
        draft.into_event(EventId::generate(), &channel_id, &channel_id, state.dates.timezone(), Utc::now())?;

    let calendar = Calendar { channel_id: channel_id.clone(), name: channel_id };
    state.events.insert_with_calendar(&calendar, &event).await?;
    info!(
        event_name = "server.api.event_created",
        event_id = %event.id,
        channel_id = %event.channel_id,
        "event created from dashboard"
    );
    Ok((StatusCode::CREATED, Json(event)))
}

async fn modify_event(
    State(state): State<ApiState>,
    _session: AuthSession,
    Json(request): Json<ModifyEventRequest>,
) -> Result<Json<Event>, ApiError> {
    let existing = channel_event(&state, &request.id, &request.event.channel_id).await?;
    let fields = request.event;
    let changes = EventChanges {
        summary: Some(fields.title),
        description: Some(fields.description),
        location: Some(fields.location),
        url: Some(fields.url),
        start: Some(fields.start),
        end: Some(fields.end.unwrap_or(fields.start + Duration::hours(1))),
        whole_day: Some(fields.is_whole_day),
        attendees: Some(fields.attendees),
    };
    let updated = existing.apply_changes(changes, state.dates.timezone(), Utc::now())?;

    if !state.events.update(&updated).await? {
        return Err(ApiError::NotFound(format!("event `{}` not found", updated.id)));
    }
    info!(event_name = "server.api.event_modified", event_id = %updated.id, "event modified from dashboard");
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub channel_id: String,
}

async fn delete_event(
    State(state): State<ApiState>,
    _session: AuthSession,
    Path(id): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> Result<StatusCode, ApiError> {
    let event = channel_event(&state, &id, &query.channel_id).await?;
    if !state.events.delete(&event.id).await? {
        return Err(ApiError::NotFound(format!("event `{id}` not found")));
    }
    info!(event_name = "server.api.event_deleted", event_id = %event.id, "event deleted from dashboard");
    Ok(StatusCode::NO_CONTENT)
}

/// An editable event of `channel_id`. Events of other channels read as missing.
async fn channel_event(state: &ApiState, id: &str, channel_id: &str) -> Result<Event, ApiError> {
    let event = state
        .events
        .find_by_id(&EventId(id.to_owned()))
        .await?
        .filter(|event| event.channel_id == channel_id)
        .ok_or_else(|| ApiError::NotFound(format!("event `{id}` not found")))?;
    if event.is_external() {
        return Err(ApiError::BadRequest(
            "events imported from an external calendar are read-only".to_owned(),
        ));
    }
    Ok(event)
}

#[derive(Debug, Deserialize)]
pub struct SaveBoardRequest {
    pub channel_id: String,
    #[serde(default)]
    pub groups: Vec<SaveGroup>,
}

#[derive(Debug, Deserialize)]
pub struct SaveGroup {
    pub name: String,
    #[serde(default)]
    pub items: Vec<SaveItem>,
}

#[derive(Debug, Deserialize)]
pub struct SaveItem {
    pub id: i64,
    pub content: String,
}

impl SaveBoardRequest {
    fn into_board(self) -> Result<KanbanBoard, ApiError> {
        let channel_id = self.channel_id.trim().to_owned();
        if channel_id.is_empty() {
            return Err(ApiError::BadRequest("channel_id is required".to_owned()));
        }

        let mut names = Vec::with_capacity(self.groups.len());
        let mut ids = Vec::new();
        let mut groups = Vec::with_capacity(self.groups.len());
        for group in self.groups {
            let name = group.name.trim().to_owned();
            if name.is_empty() {
                return Err(DomainError::EmptyField { field: "group name" }.into());
            }
            if names.contains(&name) {
                return Err(ApiError::BadRequest(format!("group `{name}` appears twice")));
            }
            names.push(name.clone());

            let mut items = Vec::with_capacity(group.items.len());
            for item in group.items {
                if item.id <= 0 || ids.contains(&item.id) {
                    return Err(ApiError::BadRequest(format!("item id {} must be positive and unique", item.id)));
                }
                ids.push(item.id);
                let content = item.content.trim().to_owned();
                if content.is_empty() {
                    return Err(DomainError::EmptyField { field: "item content" }.into());
                }
                items.push(KanbanItem { channel_id: channel_id.clone(), id: item.id, content, group_name: name.clone() });
            }
            groups.push(KanbanColumn { name, items });
        }

        Ok(KanbanBoard { channel_id, groups })
    }
}

/// Overwrites the whole board of a channel with what the dashboard holds.
async fn save_board(
    State(state): State<ApiState>,
    _session: AuthSession,
    Json(request): Json<SaveBoardRequest>,
) -> Result<Json<KanbanBoard>, ApiError> {
    let board = request.into_board()?;
    state.kanban.replace_board(&board).await?;
    info!(
        event_name = "server.api.board_saved",
        channel_id = %board.channel_id,
        groups = board.groups.len(),
        "kanban board saved from dashboard"
    );
    Ok(Json(state.kanban.board(&board.channel_id).await?))
}

/// Imported calendars redirect to their source; channel calendars are rendered here.
async fn calendar_feed(
    State(state): State<ApiState>,
    Path(calendar_id): Path<String>,
) -> Result<Response, ApiError> {
    if let Some(external) = state.calendars.find_external(&ExternalCalendarId(calendar_id.clone())).await? {
        return Ok((StatusCode::FOUND, [(header::LOCATION, external.url)]).into_response());
    }

    let calendar = state
        .calendars
        .find_channel_calendar(&calendar_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("calendar `{calendar_id}` not found")))?;
    let events = state.events.list_for_calendar(&calendar.channel_id).await?;
    let body = render_calendar(&calendar, &events, state.dates.timezone(), Utc::now());
    Ok(([(header::CONTENT_TYPE, "text/calendar; charset=utf-8")], body).into_response())
}

fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = header_text(headers, "x-forwarded-for");
    match forwarded.split(',').next().map(str::trim) {
        Some(first) if !first.is_empty() => first.to_string(),
        _ => header_text(headers, "x-real-ip"),
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> String {
    headers.get(name).and_then(|value| value.to_str().ok()).unwrap_or_default().to_string()
}
