use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use sqlx::SqlitePool;
use tombola_models::{AuditDetail, CompetitionStatus, DomainError, Result, Win};
use tracing::info;

use crate::{audit, competitions::get_competition, now_ts, ts_in};

/// Recorded in the audit trail: uniform index into the entry list via a
/// 64-bit value from the operating system CSPRNG, reduced modulo the entry
/// count.
pub const DRAW_METHOD: &str = "os_csprng_mod";

const WIN_COLUMNS: &str = "id, competition_id, user_id, ticket_number, claimed_at, shipped_at, \
    delivered_at, tracking_number, tracking_url, created_at";

#[derive(Debug, Clone, Serialize)]
pub struct DrawOutcome {
    pub win: Win,
    pub entry_count: i64,
}

/// Pick the winner of a competition and durably record it exactly once.
///
/// Eligible entries are SOLD and FREE_ENTRY tickets. The winning number,
/// actual draw date, COMPLETED status, Win row and audit entry commit as one
/// transaction; the UNIQUE constraint on `wins.competition_id` is the durable
/// guard against a concurrent double draw, translated back to `AlreadyDrawn`.
/// Notifying entrants is the caller's business, after commit.
pub async fn execute_draw(
    pool: &SqlitePool,
    competition_id: i64,
    actor: Option<&str>,
) -> Result<DrawOutcome> {
    let comp = get_competition(pool, competition_id).await?;
    if get_win_for_competition(pool, competition_id).await?.is_some() {
        return Err(DomainError::AlreadyDrawn);
    }

    let now = now_ts();
    match comp.status {
        CompetitionStatus::SoldOut => {}
        CompetitionStatus::Active | CompetitionStatus::Drawing
            if comp.draw_date.as_str() <= now.as_str() => {}
        CompetitionStatus::Completed => return Err(DomainError::AlreadyDrawn),
        _ => return Err(DomainError::NotEligibleForDraw),
    }

    let entries: Vec<(i64, String)> = sqlx::query_as(
        "SELECT ticket_number, user_id FROM tickets \
         WHERE competition_id = ? AND status IN ('SOLD', 'FREE_ENTRY') AND user_id IS NOT NULL \
         ORDER BY ticket_number",
    )
    .bind(competition_id)
    .fetch_all(pool)
    .await?;
    if entries.is_empty() {
        return Err(DomainError::NotEligibleForDraw);
    }

    let index = (OsRng.next_u64() % entries.len() as u64) as usize;
    let (ticket_number, winner_user_id) = entries[index].clone();

    let mut tx = pool.begin().await?;
    let flipped = sqlx::query(
        "UPDATE competitions \
         SET winning_ticket_number = ?, actual_draw_date = ?, status = 'COMPLETED', updated_at = ? \
         WHERE id = ? AND winning_ticket_number IS NULL \
           AND status NOT IN ('COMPLETED', 'CANCELLED')",
    )
    .bind(ticket_number)
    .bind(&now)
    .bind(&now)
    .bind(competition_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if flipped != 1 {
        return Err(DomainError::AlreadyDrawn);
    }

    let inserted = sqlx::query(
        "INSERT INTO wins (competition_id, user_id, ticket_number) VALUES (?, ?, ?)",
    )
    .bind(competition_id)
    .bind(&winner_user_id)
    .bind(ticket_number)
    .execute(&mut *tx)
    .await;
    let win_id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        Err(e) => {
            let err = DomainError::from(e);
            return Err(if err.is_unique_violation() { DomainError::AlreadyDrawn } else { err });
        }
    };

    audit::append(
        &mut tx,
        "competition",
        competition_id,
        actor,
        &AuditDetail::DrawExecuted {
            method: DRAW_METHOD.to_string(),
            entry_count: entries.len() as i64,
            ticket_number,
            winner_user_id: winner_user_id.clone(),
        },
    )
    .await?;
    tx.commit().await?;

    info!(
        "Draw for competition {competition_id}: ticket #{ticket_number} of {} entries wins \
         (user {winner_user_id})",
        entries.len()
    );
    let win = get_win(pool, win_id).await?;
    Ok(DrawOutcome { win, entry_count: entries.len() as i64 })
}

/// Distinct users holding SOLD or FREE_ENTRY tickets, i.e. the notification
/// audience after a draw.
pub async fn participants(pool: &SqlitePool, competition_id: i64) -> Result<Vec<String>> {
    let users = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM tickets \
         WHERE competition_id = ? AND status IN ('SOLD', 'FREE_ENTRY') AND user_id IS NOT NULL \
         ORDER BY user_id",
    )
    .bind(competition_id)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn get_win(pool: &SqlitePool, win_id: i64) -> Result<Win> {
    let sql = format!("SELECT {WIN_COLUMNS} FROM wins WHERE id = ?");
    sqlx::query_as::<_, Win>(&sql)
        .bind(win_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DomainError::NotFound("win"))
}

pub async fn get_win_for_competition(
    pool: &SqlitePool,
    competition_id: i64,
) -> Result<Option<Win>> {
    let sql = format!("SELECT {WIN_COLUMNS} FROM wins WHERE competition_id = ?");
    let win = sqlx::query_as::<_, Win>(&sql)
        .bind(competition_id)
        .fetch_optional(pool)
        .await?;
    Ok(win)
}

/// The winner stamps their claim once; the void grace period runs against it.
pub async fn claim_win(pool: &SqlitePool, win_id: i64, user_id: &str) -> Result<Win> {
    let win = get_win(pool, win_id).await?;
    if win.user_id != user_id {
        return Err(DomainError::Unauthorized);
    }
    if win.claimed_at.is_some() {
        return Err(DomainError::AlreadyClaimed);
    }

    let stamped = sqlx::query("UPDATE wins SET claimed_at = ? WHERE id = ? AND claimed_at IS NULL")
        .bind(now_ts())
        .bind(win_id)
        .execute(pool)
        .await?
        .rows_affected();
    if stamped != 1 {
        return Err(DomainError::AlreadyClaimed);
    }

    let mut conn = pool.acquire().await?;
    audit::append(
        &mut conn,
        "win",
        win_id,
        Some(user_id),
        &AuditDetail::WinClaimed { win_id },
    )
    .await?;

    info!("Win {win_id} claimed by {user_id}");
    get_win(pool, win_id).await
}

/// Void an unclaimed win after the grace period, re-opening the competition
/// to the draw engine. The winning ticket stays SOLD and stays eligible.
pub async fn void_win(
    pool: &SqlitePool,
    win_id: i64,
    reason: &str,
    actor: Option<&str>,
    grace_days: i64,
) -> Result<()> {
    let win = get_win(pool, win_id).await?;
    if win.claimed_at.is_some() {
        return Err(DomainError::AlreadyClaimed);
    }
    let cutoff = ts_in(-grace_days * 86_400);
    if win.created_at.as_str() > cutoff.as_str() {
        // Grace period still running; the winner may yet claim.
        return Err(DomainError::InvalidStateTransition);
    }

    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM wins WHERE id = ? AND claimed_at IS NULL")
        .bind(win_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted != 1 {
        return Err(DomainError::AlreadyClaimed);
    }

    sqlx::query(
        "UPDATE competitions \
         SET status = 'SOLD_OUT', winning_ticket_number = NULL, actual_draw_date = NULL, \
             updated_at = ? \
         WHERE id = ?",
    )
    .bind(now_ts())
    .bind(win.competition_id)
    .execute(&mut *tx)
    .await?;

    audit::append(
        &mut tx,
        "competition",
        win.competition_id,
        actor,
        &AuditDetail::WinVoided {
            win_id,
            ticket_number: win.ticket_number,
            reason: reason.to_string(),
        },
    )
    .await?;
    tx.commit().await?;

    info!(
        "Win {win_id} (ticket #{}) voided for competition {}: {reason}",
        win.ticket_number, win.competition_id
    );
    Ok(())
}
