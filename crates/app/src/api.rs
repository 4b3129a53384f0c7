use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tombola_models::{
    AuditEntry, BonusTier, Competition, CompetitionStatus, DomainError, QuestionChoice, Win,
};
use tombola_notify::{Mailer, Template};
use tombola_payments::{PaymentProvider, StripeClient};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info, warn};

use crate::auth::Actor;
use crate::version_string;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub payments: StripeClient,
    pub mailer: Mailer,
    pub auth_secret: String,
    pub reservation_ttl_secs: i64,
    pub claim_grace_days: i64,
    pub bonus_tiers: Vec<BonusTier>,
}

// --- Error mapping ---

/// HTTP shape of a failed request: `{"error": <stable code>, "message": ...}`.
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let status = match &err {
            DomainError::Unauthorized => StatusCode::UNAUTHORIZED,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::IncorrectAnswer
            | DomainError::PaymentMismatch
            | DomainError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::Database(e) => {
                error!("Database error: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::CONFLICT,
        };
        // Never leak driver errors to callers.
        let message = match &err {
            DomainError::Database(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ApiError { status, code: err.code(), message }
    }
}

impl ApiError {
    fn provider_unavailable(err: anyhow::Error) -> Self {
        error!("Payment provider error: {err:#}");
        ApiError {
            status: StatusCode::BAD_GATEWAY,
            code: "payment_provider_unavailable",
            message: "payment provider unavailable".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.code, "message": self.message }));
        (self.status, body).into_response()
    }
}

// --- Public views ---

/// Competition as shown to entrants. The skill-question choices lose their
/// `correct` flag here; everything else is public record.
#[derive(Debug, Serialize)]
pub struct PublicCompetition {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub status: CompetitionStatus,
    pub total_tickets: i64,
    pub ticket_price: i64,
    pub max_tickets_per_user: i64,
    pub draw_date: String,
    pub actual_draw_date: Option<String>,
    pub winning_ticket_number: Option<i64>,
    pub question: String,
    pub choices: Vec<String>,
}

impl From<Competition> for PublicCompetition {
    fn from(comp: Competition) -> Self {
        let choices = comp
            .choices()
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.label)
            .collect();
        PublicCompetition {
            id: comp.id,
            slug: comp.slug,
            title: comp.title,
            description: comp.description,
            status: comp.status,
            total_tickets: comp.total_tickets,
            ticket_price: comp.ticket_price,
            max_tickets_per_user: comp.max_tickets_per_user,
            draw_date: comp.draw_date,
            actual_draw_date: comp.actual_draw_date,
            winning_ticket_number: comp.winning_ticket_number,
            question: comp.question,
            choices,
        }
    }
}

// --- Public handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "tombola",
        "version": version_string()
    }))
}

#[derive(Deserialize)]
struct CompetitionsQuery {
    status: Option<CompetitionStatus>,
}

async fn api_list_competitions(
    State(state): State<AppState>,
    Query(params): Query<CompetitionsQuery>,
) -> Result<Json<Vec<PublicCompetition>>, ApiError> {
    let comps = tombola_db::list_competitions(&state.pool, params.status).await?;
    Ok(Json(comps.into_iter().map(PublicCompetition::from).collect()))
}

async fn api_get_competition(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PublicCompetition>, ApiError> {
    let comp = tombola_db::get_competition(&state.pool, id).await?;
    Ok(Json(comp.into()))
}

/// Storefront URLs carry the slug, not the numeric id.
async fn api_get_competition_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PublicCompetition>, ApiError> {
    let comp = tombola_db::get_competition_by_slug(&state.pool, &slug).await?;
    Ok(Json(comp.into()))
}

async fn api_availability(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let comp = tombola_db::get_competition(&state.pool, id).await?;
    let available = tombola_db::count_available(&state.pool, id).await?;
    Ok(Json(json!({
        "competition_id": id,
        "total_tickets": comp.total_tickets,
        "available": available,
    })))
}

// --- Entrant handlers ---

#[derive(Deserialize)]
struct ReserveRequest {
    quantity: i64,
    answer: String,
}

async fn api_reserve(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<ReserveRequest>,
) -> Result<Json<tombola_db::Reservation>, ApiError> {
    let reservation = tombola_db::reserve_tickets(
        &state.pool,
        id,
        &actor.user_id,
        body.quantity,
        &body.answer,
        state.reservation_ttl_secs,
    )
    .await?;
    Ok(Json(reservation))
}

async fn api_release(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let released = tombola_db::release_tickets(&state.pool, id, &actor.user_id).await?;
    Ok(Json(json!({ "released": released })))
}

#[derive(Deserialize)]
struct CheckoutRequest {
    competition_id: i64,
    payment_ref: String,
}

/// Bridge a provider-confirmed payment into a permanent order. The provider
/// is the source of truth for the amount; the reservation must still cover it.
async fn api_checkout_confirm(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<tombola_db::CompletedOrder>, ApiError> {
    let details = state
        .payments
        .verify(&body.payment_ref)
        .await
        .map_err(ApiError::provider_unavailable)?;
    if !details.succeeded {
        return Err(DomainError::PaymentMismatch.into());
    }

    let completed = tombola_db::confirm_purchase(
        &state.pool,
        body.competition_id,
        &actor.user_id,
        &details.reference,
        details.amount,
        &state.bonus_tiers,
    )
    .await?;

    let comp = tombola_db::get_competition(&state.pool, body.competition_id).await?;
    let mailer = state.mailer.clone();
    let recipient = actor.user_id.clone();
    let order = completed.order.clone();
    let numbers = completed.ticket_numbers.clone();
    tokio::spawn(async move {
        mailer
            .send(
                &recipient,
                Template::OrderConfirmation,
                json!({
                    "competition": comp.title,
                    "order_id": order.id,
                    "ticket_numbers": numbers,
                    "total_amount": order.total_amount,
                }),
            )
            .await;
    });

    Ok(Json(completed))
}

async fn api_get_win(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Win>, ApiError> {
    let win = tombola_db::get_win(&state.pool, id).await?;
    if win.user_id != actor.user_id && !actor.role.is_admin() {
        return Err(DomainError::Unauthorized.into());
    }
    Ok(Json(win))
}

async fn api_claim_win(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Win>, ApiError> {
    let win = tombola_db::claim_win(&state.pool, id, &actor.user_id).await?;
    Ok(Json(win))
}

// --- Admin handlers ---

#[derive(Deserialize)]
struct CreateCompetitionRequest {
    slug: String,
    title: String,
    description: Option<String>,
    total_tickets: i64,
    ticket_price: i64,
    max_tickets_per_user: i64,
    draw_date: String,
    question: String,
    choices: Vec<QuestionChoice>,
}

async fn api_create_competition(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateCompetitionRequest>,
) -> Result<Json<Competition>, ApiError> {
    actor.require_admin()?;
    let new = tombola_db::NewCompetition {
        slug: body.slug,
        title: body.title,
        description: body.description,
        total_tickets: body.total_tickets,
        ticket_price: body.ticket_price,
        max_tickets_per_user: body.max_tickets_per_user,
        draw_date: body.draw_date,
        question: body.question,
        choices: body.choices,
    };
    let comp = tombola_db::create_competition(&state.pool, &new).await?;
    info!("Competition {} created as {}", comp.id, comp.slug);
    Ok(Json(comp))
}

async fn api_activate_competition(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    actor.require_admin()?;
    let tickets = tombola_db::activate_competition(&state.pool, id, Some(&actor.user_id)).await?;
    Ok(Json(json!({ "competition_id": id, "tickets_created": tickets })))
}

#[derive(Deserialize)]
struct FreeEntryRequest {
    user_id: String,
}

async fn api_grant_free_entry(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<FreeEntryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    actor.require_admin()?;
    let number =
        tombola_db::grant_free_entry(&state.pool, id, &body.user_id, Some(&actor.user_id)).await?;
    Ok(Json(json!({ "competition_id": id, "ticket_number": number, "user_id": body.user_id })))
}

async fn api_execute_draw(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<tombola_db::DrawOutcome>, ApiError> {
    actor.require_admin()?;
    let outcome = tombola_db::execute_draw(&state.pool, id, Some(&actor.user_id)).await?;

    let comp = tombola_db::get_competition(&state.pool, id).await?;
    let audience = match tombola_db::participants(&state.pool, id).await {
        Ok(users) => users,
        Err(e) => {
            warn!("Could not load draw audience for competition {id}: {e}");
            Vec::new()
        }
    };
    let mailer = state.mailer.clone();
    let win = outcome.win.clone();
    tokio::spawn(async move {
        mailer
            .send(
                &win.user_id,
                Template::WinnerNotification,
                json!({ "competition": comp.title, "ticket_number": win.ticket_number }),
            )
            .await;
        for user in audience.iter().filter(|u| **u != win.user_id) {
            mailer
                .send(
                    user,
                    Template::DrawResult,
                    json!({
                        "competition": comp.title,
                        "winning_ticket_number": win.ticket_number,
                    }),
                )
                .await;
        }
    });

    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct CancelRequest {
    reason: String,
}

async fn api_cancel_competition(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<tombola_db::CancellationSummary>, ApiError> {
    actor.require_admin()?;
    let summary = tombola_db::cancel_competition(
        &state.pool,
        id,
        &body.reason,
        Some(&actor.user_id),
        &state.payments,
    )
    .await?;

    let comp = tombola_db::get_competition(&state.pool, id).await?;
    let orders = tombola_db::list_orders_for_competition(&state.pool, id).await?;
    let mut buyers: Vec<String> = orders.into_iter().map(|o| o.user_id).collect();
    buyers.sort();
    buyers.dedup();
    let mailer = state.mailer.clone();
    let reason = body.reason.clone();
    tokio::spawn(async move {
        for user in &buyers {
            mailer
                .send(
                    user,
                    Template::CompetitionCancelled,
                    json!({ "competition": comp.title, "reason": reason }),
                )
                .await;
        }
    });

    Ok(Json(summary))
}

#[derive(Deserialize)]
struct VoidWinRequest {
    reason: String,
}

async fn api_void_win(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(body): Json<VoidWinRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    actor.require_admin()?;
    tombola_db::void_win(
        &state.pool,
        id,
        &body.reason,
        Some(&actor.user_id),
        state.claim_grace_days,
    )
    .await?;
    Ok(Json(json!({ "win_id": id, "voided": true })))
}

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<i64>,
}

async fn api_list_audit(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    actor.require_admin()?;
    let entries = tombola_db::audit::list(&state.pool, params.limit.unwrap_or(50)).await?;
    Ok(Json(entries))
}

// --- Router ---

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/competitions", get(api_list_competitions))
        .route("/competitions/{id}", get(api_get_competition))
        .route("/competitions/by-slug/{slug}", get(api_get_competition_by_slug))
        .route("/competitions/{id}/availability", get(api_availability))
        .route("/competitions/{id}/reserve", post(api_reserve).delete(api_release))
        .route("/checkout/confirm", post(api_checkout_confirm))
        .route("/wins/{id}", get(api_get_win))
        .route("/wins/{id}/claim", post(api_claim_win))
        .route("/admin/competitions", post(api_create_competition))
        .route("/admin/competitions/{id}/activate", post(api_activate_competition))
        .route("/admin/competitions/{id}/free-entry", post(api_grant_free_entry))
        .route("/admin/competitions/{id}/draw", post(api_execute_draw))
        .route("/admin/competitions/{id}/cancel", post(api_cancel_competition))
        .route("/admin/wins/{id}/void", post(api_void_win))
        .route("/admin/audit", get(api_list_audit));

    Router::new()
        .nest("/api", api_routes)
        .fallback_service(
            ServeDir::new("frontend/dist").fallback(ServeFile::new("frontend/dist/index.html")),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_stable_statuses() {
        let cases = [
            (DomainError::Unauthorized, StatusCode::UNAUTHORIZED),
            (DomainError::NotFound("competition"), StatusCode::NOT_FOUND),
            (DomainError::IncorrectAnswer, StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::PaymentMismatch, StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::InvalidInput("quantity must be at least 1"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::QuotaExceeded, StatusCode::CONFLICT),
            (DomainError::AlreadyDrawn, StatusCode::CONFLICT),
            (DomainError::ReservationExpiredOrStale, StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn database_errors_are_redacted() {
        let err = DomainError::Database(sqlx::Error::PoolTimedOut);
        let api = ApiError::from(err);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code, "internal");
        assert_eq!(api.message, "internal error");
    }

    #[test]
    fn public_view_hides_the_correct_answer() {
        let comp = Competition {
            id: 1,
            slug: "rolex".into(),
            title: "Rolex Datejust".into(),
            description: None,
            status: CompetitionStatus::Active,
            total_tickets: 100,
            ticket_price: 499,
            max_tickets_per_user: 50,
            draw_date: "2025-09-01 20:00:00".into(),
            actual_draw_date: None,
            winning_ticket_number: None,
            question: "Capital of the UK?".into(),
            question_choices:
                r#"[{"label":"London","correct":true},{"label":"Paris"},{"label":"Madrid"}]"#.into(),
            created_at: "2025-08-01 09:00:00".into(),
            updated_at: "2025-08-01 09:00:00".into(),
        };
        let public = PublicCompetition::from(comp);
        assert_eq!(public.choices, vec!["London", "Paris", "Madrid"]);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("correct"));
    }
}
