use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::auth::AuthService;
use crate::app::ingest::{IngestOutcome, IngestService};
use crate::app::notifications::{MarkReadOutcome, NotificationService};
use crate::app::preferences::PreferencesService;
use crate::app::rate_limiter::RateLimiter;
use crate::app::rules::{NewRule, RuleService, RuleUpdate};
use crate::config::rate_limits::{RateLimits, RateWindow};
use crate::domain::notification::Notification;
use crate::domain::observation::PriceObservation;
use crate::domain::preferences::{NotificationPreferences, QuietHours};
use crate::domain::rule::{Channel, NotificationRule, RuleCondition, RuleFrequency};
use crate::http::{AppError, AuthUser, FeedToken};
use crate::AppState;

const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 120;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let mut parts = cursor.splitn(2, '/');
    let timestamp = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;
    let id = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.paseto_access_key,
        state.paseto_refresh_key,
        state.access_ttl_minutes,
        state.refresh_ttl_days,
    )
}

async fn check_user_rate_limit(
    state: &AppState,
    user_id: Uuid,
    action: &str,
) -> Result<(), AppError> {
    let limiter = RateLimiter::new(state.cache.clone());
    let info = limiter
        .check_rate_limit(user_id, action)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, action = action, "rate limit check failed");
            AppError::internal("rate limit check failed")
        })?;
    if info.limited {
        return Err(AppError::rate_limited("too many requests"));
    }
    limiter.increment(user_id, action).await.map_err(|err| {
        tracing::error!(error = ?err, action = action, "rate limit increment failed");
        AppError::internal("rate limit check failed")
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if db && redis { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

pub async fn signup(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<crate::domain::user::User>), AppError> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') || email.len() > MAX_NAME_LEN {
        return Err(AppError::bad_request("a valid email is required"));
    }
    let display_name = payload.display_name.trim().to_string();
    if display_name.is_empty() || display_name.len() > MAX_NAME_LEN {
        return Err(AppError::bad_request("display_name is required"));
    }
    if payload.password.len() < 8 || payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request(
            "password must be between 8 and 128 characters",
        ));
    }

    let limiter = RateLimiter::new(state.cache.clone());
    let ip = addr.ip().to_string();
    let limits = RateLimits::standard();
    let limited = limiter
        .check_ip_rate_limit(&ip, "signup", limits.signups_per_hour_per_ip, RateWindow::Hour)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "signup rate limit check failed");
            AppError::internal("rate limit check failed")
        })?;
    if limited {
        return Err(AppError::rate_limited("too many signups from this address"));
    }
    let _ = limiter.increment_ip(&ip, "signup", RateWindow::Hour).await;

    let user = auth_service(&state)
        .signup(email, display_name, payload.password)
        .await
        .map_err(|err| {
            if err
                .to_string()
                .contains("duplicate key value violates unique constraint")
            {
                AppError::conflict("email already registered")
            } else {
                tracing::error!(error = ?err, "failed to sign up");
                AppError::internal("failed to sign up")
            }
        })?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    if payload.email.trim().is_empty() || payload.password.trim().is_empty() {
        return Err(AppError::bad_request("email and password are required"));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let limiter = RateLimiter::new(state.cache.clone());
    let ip = addr.ip().to_string();
    let limits = RateLimits::standard();
    let limited = limiter
        .check_ip_rate_limit(&ip, "login", limits.login_attempts_per_hour, RateWindow::Hour)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "login rate limit check failed");
            AppError::internal("rate limit check failed")
        })?;
    if limited {
        return Err(AppError::rate_limited("too many login attempts"));
    }
    let _ = limiter.increment_ip(&ip, "login", RateWindow::Hour).await;

    let tokens = auth_service(&state)
        .login(payload.email.trim(), &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    match tokens {
        Some(tokens) => Ok(Json(AuthTokenResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_expires_at: tokens.access_expires_at,
            refresh_expires_at: tokens.refresh_expires_at,
        })),
        None => Err(AppError::unauthorized("invalid credentials")),
    }
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    let tokens = auth_service(&state)
        .refresh(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to refresh token");
            AppError::internal("failed to refresh token")
        })?;

    match tokens {
        Some(tokens) => Ok(Json(AuthTokenResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_expires_at: tokens.access_expires_at,
            refresh_expires_at: tokens.refresh_expires_at,
        })),
        None => Err(AppError::unauthorized("invalid refresh token")),
    }
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    let revoked = auth_service(&state)
        .revoke_refresh_token(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to revoke token");
            AppError::internal("failed to revoke token")
        })?;

    if revoked {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::unauthorized("invalid refresh token"))
    }
}

pub async fn get_current_user(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<crate::domain::user::User>, AppError> {
    let user = auth_service(&state)
        .get_current_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to load user");
            AppError::internal("failed to load user")
        })?;

    user.map(Json).ok_or_else(|| AppError::not_found("user not found"))
}

// ---------------------------------------------------------------------------
// Alert rules
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateRuleRequest {
    pub material_type: String,
    pub region: Option<String>,
    pub condition: RuleCondition,
    pub threshold: f64,
    pub channels: Vec<Channel>,
    pub frequency: RuleFrequency,
}

#[derive(Deserialize)]
pub struct UpdateRuleRequest {
    pub material_type: Option<String>,
    pub region: Option<String>,
    pub condition: Option<RuleCondition>,
    pub threshold: Option<f64>,
    pub channels: Option<Vec<Channel>>,
    pub frequency: Option<RuleFrequency>,
    pub is_active: Option<bool>,
}

fn validate_threshold(threshold: f64) -> Result<(), AppError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(AppError::bad_request(
            "threshold must be a finite, non-negative number",
        ));
    }
    Ok(())
}

pub async fn create_rule(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<NotificationRule>), AppError> {
    let material_type = payload.material_type.trim().to_string();
    if material_type.is_empty() || material_type.len() > MAX_NAME_LEN {
        return Err(AppError::bad_request("material_type is required"));
    }
    validate_threshold(payload.threshold)?;
    if payload.channels.is_empty() {
        return Err(AppError::bad_request("at least one channel is required"));
    }

    check_user_rate_limit(&state, auth.user_id, "rules").await?;

    let rule = RuleService::new(state.db.clone())
        .create(NewRule {
            user_id: auth.user_id,
            material_type,
            region: payload
                .region
                .map(|region| region.trim().to_string())
                .filter(|region| !region.is_empty()),
            condition: payload.condition,
            threshold: payload.threshold,
            channels: payload.channels,
            frequency: payload.frequency,
        })
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to create rule");
            AppError::internal("failed to create rule")
        })?;

    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn list_rules(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<NotificationRule>>, AppError> {
    let rules = RuleService::new(state.db.clone())
        .list_for_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to list rules");
            AppError::internal("failed to list rules")
        })?;

    Ok(Json(rules))
}

pub async fn update_rule(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateRuleRequest>,
) -> Result<Json<NotificationRule>, AppError> {
    if let Some(threshold) = payload.threshold {
        validate_threshold(threshold)?;
    }
    if let Some(channels) = &payload.channels {
        if channels.is_empty() {
            return Err(AppError::bad_request("at least one channel is required"));
        }
    }
    if let Some(material_type) = &payload.material_type {
        if material_type.trim().is_empty() {
            return Err(AppError::bad_request("material_type cannot be empty"));
        }
    }

    check_user_rate_limit(&state, auth.user_id, "rules").await?;

    let rule = RuleService::new(state.db.clone())
        .update(
            id,
            auth.user_id,
            RuleUpdate {
                material_type: payload.material_type.map(|value| value.trim().to_string()),
                region: payload.region,
                condition: payload.condition,
                threshold: payload.threshold,
                channels: payload.channels,
                frequency: payload.frequency,
                is_active: payload.is_active,
            },
        )
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, rule_id = %id, "failed to update rule");
            AppError::internal("failed to update rule")
        })?;

    rule.map(Json).ok_or_else(|| AppError::not_found("rule not found"))
}

pub async fn delete_rule(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    check_user_rate_limit(&state, auth.user_id, "rules").await?;

    let deleted = RuleService::new(state.db.clone())
        .delete(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, rule_id = %id, "failed to delete rule");
            AppError::internal("failed to delete rule")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("rule not found"))
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Notification>>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = parse_cursor(query.cursor)?;

    check_user_rate_limit(&state, auth.user_id, "notifications").await?;

    let service = NotificationService::new(state.db.clone());
    let mut notifications = service
        .list(auth.user_id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to list notifications");
            AppError::internal("failed to list notifications")
        })?;

    let next_cursor = if notifications.len() > limit as usize {
        let last = notifications.pop().expect("checked len");
        Some((last.created_at, last.id))
    } else {
        None
    };

    Ok(Json(ListResponse {
        items: notifications,
        next_cursor: encode_cursor(next_cursor),
    }))
}

#[derive(Serialize)]
pub struct UnreadResponse {
    pub unread: i64,
}

pub async fn unread_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UnreadResponse>, AppError> {
    let unread = NotificationService::new(state.db.clone())
        .unread_count(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to count unread");
            AppError::internal("failed to count unread")
        })?;

    Ok(Json(UnreadResponse { unread }))
}

pub async fn mark_notification_read(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let outcome = NotificationService::new(state.db.clone())
        .mark_read(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, notification_id = %id, user_id = %auth.user_id, "failed to mark notification read");
            AppError::internal("failed to mark notification read")
        })?;

    match outcome {
        // Acknowledging twice is a no-op, not an error.
        MarkReadOutcome::Acknowledged | MarkReadOutcome::AlreadyRead => Ok(StatusCode::NO_CONTENT),
        MarkReadOutcome::NotFound => Err(AppError::not_found("notification not found")),
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PreferencesRequest {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub price_alerts_enabled: bool,
    pub daily_digest_enabled: bool,
    pub weekly_report_enabled: bool,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    pub quiet_hours: QuietHours,
}

pub async fn get_preferences(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<NotificationPreferences>, AppError> {
    let preferences = PreferencesService::new(state.db.clone())
        .get_or_default(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to load preferences");
            AppError::internal("failed to load preferences")
        })?;

    Ok(Json(preferences))
}

pub async fn update_preferences(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PreferencesRequest>,
) -> Result<Json<NotificationPreferences>, AppError> {
    payload
        .quiet_hours
        .validate()
        .map_err(AppError::bad_request)?;
    if !(-14 * 60..=14 * 60).contains(&payload.utc_offset_minutes) {
        return Err(AppError::bad_request("utc_offset_minutes out of range"));
    }

    check_user_rate_limit(&state, auth.user_id, "preferences").await?;

    let preferences = NotificationPreferences {
        user_id: auth.user_id,
        email_enabled: payload.email_enabled,
        sms_enabled: payload.sms_enabled,
        push_enabled: payload.push_enabled,
        in_app_enabled: payload.in_app_enabled,
        price_alerts_enabled: payload.price_alerts_enabled,
        daily_digest_enabled: payload.daily_digest_enabled,
        weekly_report_enabled: payload.weekly_report_enabled,
        utc_offset_minutes: payload.utc_offset_minutes,
        quiet_hours: payload.quiet_hours,
    };

    PreferencesService::new(state.db.clone())
        .upsert(&preferences)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to save preferences");
            AppError::internal("failed to save preferences")
        })?;

    Ok(Json(preferences))
}

// ---------------------------------------------------------------------------
// Price feed ingest
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct IngestResponse {
    pub matched: usize,
    pub dispatched: usize,
}

pub async fn ingest_observation(
    _feed: FeedToken,
    State(state): State<AppState>,
    Json(observation): Json<PriceObservation>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    if observation.material_type.trim().is_empty() || observation.region.trim().is_empty() {
        return Err(AppError::bad_request("material_type and region are required"));
    }
    if !observation.price.is_finite() || observation.price < 0.0 {
        return Err(AppError::bad_request(
            "price must be a finite, non-negative number",
        ));
    }

    let service = IngestService::new(
        state.db.clone(),
        state.queue.clone(),
        state.observations.clone(),
    );

    match service.ingest(observation).await {
        Ok(IngestOutcome::Accepted { matched, dispatched }) => Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse { matched, dispatched }),
        )),
        Ok(IngestOutcome::OutOfOrder) => Err(AppError::conflict(
            "observation timestamp is older than the last one for this key",
        )),
        Err(err) => {
            tracing::error!(error = ?err, "failed to ingest observation");
            Err(AppError::internal("failed to ingest observation"))
        }
    }
}
