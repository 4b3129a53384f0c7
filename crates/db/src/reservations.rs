use serde::Serialize;
use sqlx::SqlitePool;
use tombola_models::{DomainError, Result, Ticket};
use tracing::info;

use crate::{AVAILABLE_PRED, audit, competitions::get_competition, now_ts, ts_in};
use tombola_models::AuditDetail;

/// A short-lived hold on a set of ticket numbers for one user.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub competition_id: i64,
    pub ticket_numbers: Vec<i64>,
    pub expires_at: String,
}

/// Atomically claim `quantity` random available ticket numbers for `user_id`.
///
/// The claim is one guarded UPDATE: it picks rows matching the availability
/// predicate in random order, and a scalar count guard makes the whole
/// statement a no-op unless the pool can cover the full quantity. Two
/// concurrent requests can therefore never be granted overlapping numbers,
/// and a failed request mutates nothing.
pub async fn reserve_tickets(
    pool: &SqlitePool,
    competition_id: i64,
    user_id: &str,
    quantity: i64,
    answer: &str,
    ttl_secs: i64,
) -> Result<Reservation> {
    if quantity < 1 {
        return Err(DomainError::InvalidInput("quantity must be at least 1"));
    }

    let comp = get_competition(pool, competition_id).await?;
    if !comp.status.is_sellable() {
        return Err(DomainError::CompetitionNotSellable);
    }
    if !comp.check_answer(answer) {
        return Err(DomainError::IncorrectAnswer);
    }

    // Quota counts permanently owned tickets only; a lapsed reservation or a
    // free postal entry never eats into what a user may still buy.
    let sold = sold_count_for_user(pool, competition_id, user_id).await?;
    if sold + quantity > comp.max_tickets_per_user {
        return Err(DomainError::QuotaExceeded);
    }

    let now = now_ts();
    let expires_at = ts_in(ttl_secs);
    let sql = format!(
        "UPDATE tickets SET status = 'RESERVED', user_id = ?, order_id = NULL, reserved_until = ? \
         WHERE competition_id = ? AND {AVAILABLE_PRED} \
           AND ticket_number IN ( \
               SELECT ticket_number FROM tickets \
               WHERE competition_id = ? AND {AVAILABLE_PRED} \
               ORDER BY RANDOM() LIMIT ?) \
           AND ? <= (SELECT COUNT(*) FROM tickets \
               WHERE competition_id = ? AND {AVAILABLE_PRED}) \
         RETURNING ticket_number"
    );
    let mut claimed: Vec<i64> = sqlx::query_scalar(&sql)
        .bind(user_id)
        .bind(&expires_at)
        .bind(competition_id)
        .bind(&now)
        .bind(competition_id)
        .bind(&now)
        .bind(quantity)
        .bind(quantity)
        .bind(competition_id)
        .bind(&now)
        .fetch_all(pool)
        .await?;

    if claimed.len() as i64 != quantity {
        // The count guard refused the claim (or, if another writer slipped in
        // between the guard and a row, claimed part of it; undo that).
        if !claimed.is_empty() {
            release_exact(pool, competition_id, user_id, &expires_at).await?;
        }
        let available = count_available(pool, competition_id).await?;
        return Err(DomainError::InsufficientAvailability { requested: quantity, available });
    }

    claimed.sort_unstable();
    info!(
        "Reserved {} ticket(s) in competition {competition_id} for {user_id} until {expires_at}",
        claimed.len()
    );
    Ok(Reservation { competition_id, ticket_numbers: claimed, expires_at })
}

/// Return all of `user_id`'s live holds in a competition to the pool.
/// Touches only that user's RESERVED rows; SOLD and FREE_ENTRY are untouched.
pub async fn release_tickets(pool: &SqlitePool, competition_id: i64, user_id: &str) -> Result<u64> {
    let released = sqlx::query(
        "UPDATE tickets SET status = 'AVAILABLE', user_id = NULL, reserved_until = NULL \
         WHERE competition_id = ? AND user_id = ? AND status = 'RESERVED'",
    )
    .bind(competition_id)
    .bind(user_id)
    .execute(pool)
    .await?
    .rows_affected();
    if released > 0 {
        info!("Released {released} reservation(s) in competition {competition_id} for {user_id}");
    }
    Ok(released)
}

async fn release_exact(
    pool: &SqlitePool,
    competition_id: i64,
    user_id: &str,
    reserved_until: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET status = 'AVAILABLE', user_id = NULL, reserved_until = NULL \
         WHERE competition_id = ? AND user_id = ? AND status = 'RESERVED' AND reserved_until = ?",
    )
    .bind(competition_id)
    .bind(user_id)
    .bind(reserved_until)
    .execute(pool)
    .await?;
    Ok(())
}

/// Allocate one available number as a no-charge FREE_ENTRY (postal route).
/// Returns the allocated ticket number.
pub async fn grant_free_entry(
    pool: &SqlitePool,
    competition_id: i64,
    user_id: &str,
    actor: Option<&str>,
) -> Result<i64> {
    let comp = get_competition(pool, competition_id).await?;
    if !comp.status.is_sellable() {
        return Err(DomainError::CompetitionNotSellable);
    }

    let now = now_ts();
    let sql = format!(
        "UPDATE tickets SET status = 'FREE_ENTRY', user_id = ?, order_id = NULL, reserved_until = NULL \
         WHERE competition_id = ? AND {AVAILABLE_PRED} \
           AND ticket_number IN ( \
               SELECT ticket_number FROM tickets \
               WHERE competition_id = ? AND {AVAILABLE_PRED} \
               ORDER BY RANDOM() LIMIT 1) \
         RETURNING ticket_number"
    );
    let number: Option<i64> = sqlx::query_scalar(&sql)
        .bind(user_id)
        .bind(competition_id)
        .bind(&now)
        .bind(competition_id)
        .bind(&now)
        .fetch_optional(pool)
        .await?;

    let Some(number) = number else {
        return Err(DomainError::InsufficientAvailability { requested: 1, available: 0 });
    };

    let mut conn = pool.acquire().await?;
    audit::append(
        &mut conn,
        "competition",
        competition_id,
        actor,
        &AuditDetail::FreeEntryGranted { ticket_number: number, user_id: user_id.to_string() },
    )
    .await?;

    info!("Free entry #{number} granted in competition {competition_id} to {user_id}");
    Ok(number)
}

/// Tickets currently claimable, counting lapsed reservations as available.
pub async fn count_available(pool: &SqlitePool, competition_id: i64) -> Result<i64> {
    let now = now_ts();
    let sql =
        format!("SELECT COUNT(*) FROM tickets WHERE competition_id = ? AND {AVAILABLE_PRED}");
    let count = sqlx::query_scalar(&sql)
        .bind(competition_id)
        .bind(&now)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn sold_count_for_user(
    pool: &SqlitePool,
    competition_id: i64,
    user_id: &str,
) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tickets \
         WHERE competition_id = ? AND user_id = ? AND status = 'SOLD'",
    )
    .bind(competition_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn get_ticket(
    pool: &SqlitePool,
    competition_id: i64,
    ticket_number: i64,
) -> Result<Ticket> {
    sqlx::query_as::<_, Ticket>(
        "SELECT competition_id, ticket_number, status, user_id, order_id, reserved_until \
         FROM tickets WHERE competition_id = ? AND ticket_number = ?",
    )
    .bind(competition_id)
    .bind(ticket_number)
    .fetch_optional(pool)
    .await?
    .ok_or(DomainError::NotFound("ticket"))
}
