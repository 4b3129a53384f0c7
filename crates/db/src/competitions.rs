use serde::Serialize;
use sqlx::SqlitePool;
use tombola_models::{
    AuditDetail, Competition, CompetitionStatus, DomainError, Order, QuestionChoice, Result,
};
use tombola_payments::PaymentProvider;
use tracing::{info, warn};

use crate::{audit, draws::get_win_for_competition, now_ts};

const COMPETITION_COLUMNS: &str = "id, slug, title, description, status, total_tickets, \
    ticket_price, max_tickets_per_user, draw_date, actual_draw_date, winning_ticket_number, \
    question, question_choices, created_at, updated_at";

pub struct NewCompetition {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub total_tickets: i64,
    pub ticket_price: i64,
    pub max_tickets_per_user: i64,
    pub draw_date: String,
    pub question: String,
    pub choices: Vec<QuestionChoice>,
}

pub async fn create_competition(pool: &SqlitePool, new: &NewCompetition) -> Result<Competition> {
    if new.total_tickets < 1 {
        return Err(DomainError::InvalidInput("total_tickets must be at least 1"));
    }
    if new.max_tickets_per_user < 1 {
        return Err(DomainError::InvalidInput("max_tickets_per_user must be at least 1"));
    }
    if new.choices.len() < 2 || new.choices.iter().filter(|c| c.correct).count() != 1 {
        return Err(DomainError::InvalidInput(
            "question needs at least two choices with exactly one correct",
        ));
    }
    let choices = serde_json::to_string(&new.choices)
        .map_err(|_| DomainError::InvalidInput("question choices"))?;

    let id = sqlx::query(
        "INSERT INTO competitions \
            (slug, title, description, status, total_tickets, ticket_price, \
             max_tickets_per_user, draw_date, question, question_choices) \
         VALUES (?, ?, ?, 'DRAFT', ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new.slug)
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.total_tickets)
    .bind(new.ticket_price)
    .bind(new.max_tickets_per_user)
    .bind(&new.draw_date)
    .bind(&new.question)
    .bind(choices)
    .execute(pool)
    .await?
    .last_insert_rowid();

    info!("Competition {id} ({}) created as DRAFT", new.slug);
    get_competition(pool, id).await
}

pub async fn get_competition(pool: &SqlitePool, id: i64) -> Result<Competition> {
    let sql = format!("SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = ?");
    sqlx::query_as::<_, Competition>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DomainError::NotFound("competition"))
}

pub async fn get_competition_by_slug(pool: &SqlitePool, slug: &str) -> Result<Competition> {
    let sql = format!("SELECT {COMPETITION_COLUMNS} FROM competitions WHERE slug = ?");
    sqlx::query_as::<_, Competition>(&sql)
        .bind(slug)
        .fetch_optional(pool)
        .await?
        .ok_or(DomainError::NotFound("competition"))
}

pub async fn list_competitions(
    pool: &SqlitePool,
    status: Option<CompetitionStatus>,
) -> Result<Vec<Competition>> {
    let competitions = match status {
        Some(s) => {
            let sql = format!(
                "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE status = ? ORDER BY draw_date"
            );
            sqlx::query_as::<_, Competition>(&sql).bind(s).fetch_all(pool).await?
        }
        None => {
            let sql =
                format!("SELECT {COMPETITION_COLUMNS} FROM competitions ORDER BY draw_date");
            sqlx::query_as::<_, Competition>(&sql).fetch_all(pool).await?
        }
    };
    Ok(competitions)
}

/// Open a DRAFT/UPCOMING competition for entries: flips it to ACTIVE and
/// bulk-creates one AVAILABLE ticket row per number in [1, total_tickets],
/// all in one transaction. Returns the number of ticket rows created.
pub async fn activate_competition(pool: &SqlitePool, id: i64, actor: Option<&str>) -> Result<i64> {
    let comp = get_competition(pool, id).await?;

    let mut tx = pool.begin().await?;
    let flipped = sqlx::query(
        "UPDATE competitions SET status = 'ACTIVE', updated_at = ? \
         WHERE id = ? AND status IN ('DRAFT', 'UPCOMING')",
    )
    .bind(now_ts())
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if flipped != 1 {
        return Err(DomainError::InvalidStateTransition);
    }

    sqlx::query(
        "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < ?) \
         INSERT INTO tickets (competition_id, ticket_number) SELECT ?, n FROM seq",
    )
    .bind(comp.total_tickets)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    audit::append(
        &mut tx,
        "competition",
        id,
        actor,
        &AuditDetail::CompetitionActivated { ticket_count: comp.total_tickets },
    )
    .await?;
    tx.commit().await?;

    info!("Competition {id} activated with {} tickets", comp.total_tickets);
    Ok(comp.total_tickets)
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationSummary {
    pub refunded_count: i64,
    pub refunded_amount: i64,
    pub refund_failures: i64,
}

/// Abort a competition before its draw. Status flip, full ticket revert and
/// the audit entry commit as one transaction; refunds run afterwards,
/// best-effort per order. Every SUCCEEDED order is marked REFUNDED whether or
/// not the provider call worked; failures are logged for reconciliation and
/// reported in the summary, never allowed to block the cancellation.
pub async fn cancel_competition<P: PaymentProvider>(
    pool: &SqlitePool,
    id: i64,
    reason: &str,
    actor: Option<&str>,
    provider: &P,
) -> Result<CancellationSummary> {
    let comp = get_competition(pool, id).await?;
    // A Win outranks the status check: a drawn competition reports AlreadyWon
    // even though it is also COMPLETED.
    if get_win_for_competition(pool, id).await?.is_some() {
        return Err(DomainError::AlreadyWon);
    }
    if matches!(comp.status, CompetitionStatus::Completed | CompetitionStatus::Cancelled) {
        return Err(DomainError::InvalidStateTransition);
    }

    let orders = list_orders_for_competition(pool, id).await?;
    let to_refund: Vec<&Order> =
        orders.iter().filter(|o| o.payment_status == tombola_models::PaymentStatus::Succeeded).collect();

    let mut tx = pool.begin().await?;
    let flipped = sqlx::query(
        "UPDATE competitions SET status = 'CANCELLED', updated_at = ? \
         WHERE id = ? AND status NOT IN ('COMPLETED', 'CANCELLED')",
    )
    .bind(now_ts())
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if flipped != 1 {
        return Err(DomainError::InvalidStateTransition);
    }

    sqlx::query(
        "UPDATE tickets SET status = 'AVAILABLE', user_id = NULL, order_id = NULL, \
            reserved_until = NULL \
         WHERE competition_id = ?",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    audit::append(
        &mut tx,
        "competition",
        id,
        actor,
        &AuditDetail::CompetitionCancelled {
            reason: reason.to_string(),
            order_count: to_refund.len() as i64,
        },
    )
    .await?;
    tx.commit().await?;

    let mut refund_failures = 0;
    let mut refunded_amount = 0;
    for order in &to_refund {
        if let Err(e) = provider.refund(&order.payment_ref).await {
            refund_failures += 1;
            warn!(
                "Refund failed for order {} (payment {}): {e:#}; flagged for manual reconciliation",
                order.id, order.payment_ref
            );
        }
        sqlx::query("UPDATE orders SET payment_status = 'REFUNDED' WHERE id = ?")
            .bind(order.id)
            .execute(pool)
            .await?;
        refunded_amount += order.total_amount;
    }

    info!(
        "Competition {id} cancelled ({reason}); {} order(s) refunded, {refund_failures} failure(s)",
        to_refund.len()
    );
    Ok(CancellationSummary {
        refunded_count: to_refund.len() as i64,
        refunded_amount,
        refund_failures,
    })
}

pub async fn list_orders_for_competition(pool: &SqlitePool, id: i64) -> Result<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT id, competition_id, user_id, ticket_count, bonus_ticket_count, total_amount, \
                payment_status, payment_ref, created_at \
         FROM orders WHERE competition_id = ? ORDER BY id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(orders)
}
