// handlers.rs
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header::AUTHORIZATION, Extensions, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::admin::{AdminAction, AdminOutcome, Session};
use crate::error::{AppError, PollError};
use crate::models::{
    ConfirmQuery, LoginRequest, MessageRequest, OptionRequest, Vote, VoteLocation, VoteRequest,
    VotingOption,
};
use crate::state::AppState;
use crate::sync::PollSnapshot;

/// Voting options, oldest first.
pub async fn get_options(State(state): State<AppState>) -> Result<Json<Vec<VotingOption>>, AppError> {
    Ok(Json(state.poll.store().list_options().await?))
}

/// Latest banner message, empty when none was posted.
pub async fn get_message(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let message = state.poll.store().latest_message().await?;
    Ok(Json(json!({ "message": message.unwrap_or_default() })))
}

/// Live tally and pivoted aggregates.
pub async fn get_results(State(state): State<AppState>) -> Json<PollSnapshot> {
    Json(state.poll.view().snapshot())
}

pub async fn get_locations(State(state): State<AppState>) -> Result<Json<Vec<VoteLocation>>, AppError> {
    Ok(Json(state.poll.store().vote_locations().await?))
}

/// Pushes the full snapshot now and after every view change.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.poll.view().subscribe();

    let updates = stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first && receiver.changed().await.is_err() {
            return None;
        }

        let event = Event::default()
            .event("snapshot")
            .json_data(&*receiver.borrow_and_update())
            .unwrap_or_else(|_| Event::default().event("error"));

        Some((Ok(event), (receiver, false)))
    });

    Sse::new(updates).keep_alive(KeepAlive::default())
}

/// Record a vote
pub async fn vote(
    State(state): State<AppState>,
    extensions: Extensions,
    headers: HeaderMap,
    Json(payload): Json<VoteRequest>,
) -> Result<(StatusCode, Json<Vote>), AppError> {
    let vote = state
        .poll
        .cast_vote(payload.option_id, payload.demographics, client_ip(&extensions, &headers))
        .await?;

    Ok((StatusCode::CREATED, Json(vote)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .sessions
        .sign_in(&payload.email, &payload.password)
        .await
        .ok_or(PollError::AuthRequired)?;

    Ok(Json(json!({ "token": session.token, "expires_at": session.expires_at })))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.sign_out(token).await;
    }
    StatusCode::NO_CONTENT
}

/// Mount check for the admin surface.
pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Session>, AppError> {
    let session = current_session(&state, &headers).await;
    Ok(Json(state.admin.open(session.as_ref())?))
}

pub async fn update_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<AdminOutcome>, AppError> {
    admin_action(&state, &headers, AdminAction::UpdateMessage(payload.message)).await
}

pub async fn add_option(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<OptionRequest>,
) -> Result<Json<AdminOutcome>, AppError> {
    admin_action(&state, &headers, AdminAction::AddOption(payload.label)).await
}

pub async fn delete_option(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<AdminOutcome>, AppError> {
    let action = AdminAction::DeleteOption {
        id,
        confirmed: query.confirm,
    };
    admin_action(&state, &headers, action).await
}

pub async fn reset_votes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConfirmQuery>,
) -> Result<Json<AdminOutcome>, AppError> {
    let action = AdminAction::ResetVotes {
        confirmed: query.confirm,
    };
    admin_action(&state, &headers, action).await
}

async fn admin_action(
    state: &AppState,
    headers: &HeaderMap,
    action: AdminAction,
) -> Result<Json<AdminOutcome>, AppError> {
    let session = current_session(state, headers).await;
    Ok(Json(state.admin.mutate(session.as_ref(), action).await?))
}

async fn current_session(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    state.sessions.get_session(bearer_token(headers)?).await
}

fn bearer_token(headers: &HeaderMap) -> Option<Uuid> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    Uuid::parse_str(token.trim()).ok()
}

/// First `X-Forwarded-For` hop, else the peer address.
fn client_ip(extensions: &Extensions, headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|hop| hop.trim().parse().ok());

    forwarded.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}
