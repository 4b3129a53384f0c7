use serde::Serialize;
use sqlx::SqlitePool;
use tombola_models::{
    AuditDetail, BonusTier, CompetitionStatus, DomainError, Order, Result, bonus_for,
};
use tracing::info;

use crate::{AVAILABLE_PRED, audit, competitions::get_competition, now_ts};

const ORDER_COLUMNS: &str = "id, competition_id, user_id, ticket_count, bonus_ticket_count, \
    total_amount, payment_status, payment_ref, created_at";

#[derive(Debug, Clone, Serialize)]
pub struct CompletedOrder {
    pub order: Order,
    pub ticket_numbers: Vec<i64>,
    pub bonus_ticket_numbers: Vec<i64>,
}

/// Convert a confirmed payment into a permanent order.
///
/// In one transaction: verifies the paid amount against the caller's live
/// reservation, creates the order, flips exactly those RESERVED rows to SOLD,
/// grants any bonus tickets the paid quantity earns, flips the competition to
/// SOLD_OUT once nothing claimable remains, and appends the audit entry. If
/// the reservation lapsed in the meantime nothing commits.
///
/// Replaying a payment reference is safe: the UNIQUE constraint on
/// `orders.payment_ref` guarantees at most one order per confirmation, and a
/// replay returns the original order with its ticket numbers.
pub async fn confirm_purchase(
    pool: &SqlitePool,
    competition_id: i64,
    user_id: &str,
    payment_ref: &str,
    amount_paid: i64,
    bonus_tiers: &[BonusTier],
) -> Result<CompletedOrder> {
    if let Some(existing) = get_order_by_payment_ref(pool, payment_ref).await? {
        return replay(pool, existing, competition_id, user_id).await;
    }

    let comp = get_competition(pool, competition_id).await?;
    let now = now_ts();

    let mut tx = pool.begin().await?;
    let reserved: Vec<i64> = sqlx::query_scalar(
        "SELECT ticket_number FROM tickets \
         WHERE competition_id = ? AND user_id = ? AND status = 'RESERVED' AND reserved_until > ?",
    )
    .bind(competition_id)
    .bind(user_id)
    .bind(&now)
    .fetch_all(&mut *tx)
    .await?;
    if reserved.is_empty() {
        return Err(DomainError::ReservationExpiredOrStale);
    }

    let expected = reserved.len() as i64 * comp.ticket_price;
    if amount_paid != expected {
        return Err(DomainError::PaymentMismatch);
    }

    let inserted = sqlx::query(
        "INSERT INTO orders \
            (competition_id, user_id, ticket_count, bonus_ticket_count, total_amount, \
             payment_status, payment_ref) \
         VALUES (?, ?, ?, 0, ?, 'SUCCEEDED', ?)",
    )
    .bind(competition_id)
    .bind(user_id)
    .bind(reserved.len() as i64)
    .bind(amount_paid)
    .bind(payment_ref)
    .execute(&mut *tx)
    .await;
    let order_id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        Err(e) => {
            let err = DomainError::from(e);
            if err.is_unique_violation() {
                // Lost a race against a concurrent confirmation of the same
                // reference; serve the winner's order.
                drop(tx);
                let order = get_order_by_payment_ref(pool, payment_ref)
                    .await?
                    .ok_or(DomainError::NotFound("order"))?;
                return replay(pool, order, competition_id, user_id).await;
            }
            return Err(err);
        }
    };

    let mut sold: Vec<i64> = sqlx::query_scalar(
        "UPDATE tickets SET status = 'SOLD', order_id = ?, reserved_until = NULL \
         WHERE competition_id = ? AND user_id = ? AND status = 'RESERVED' AND reserved_until > ? \
         RETURNING ticket_number",
    )
    .bind(order_id)
    .bind(competition_id)
    .bind(user_id)
    .bind(&now)
    .fetch_all(&mut *tx)
    .await?;
    if sold.len() != reserved.len() {
        return Err(DomainError::ReservationExpiredOrStale);
    }
    sold.sort_unstable();

    // Threshold bonuses come out of the remaining pool, marked SOLD on the
    // same order at no charge. A short pool grants what it can.
    let mut bonus_numbers: Vec<i64> = Vec::new();
    let bonus_due = bonus_for(bonus_tiers, sold.len() as i64);
    if bonus_due > 0 {
        let sql = format!(
            "UPDATE tickets SET status = 'SOLD', user_id = ?, order_id = ?, reserved_until = NULL \
             WHERE competition_id = ? AND {AVAILABLE_PRED} \
               AND ticket_number IN ( \
                   SELECT ticket_number FROM tickets \
                   WHERE competition_id = ? AND {AVAILABLE_PRED} \
                   ORDER BY RANDOM() LIMIT ?) \
             RETURNING ticket_number"
        );
        bonus_numbers = sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(order_id)
            .bind(competition_id)
            .bind(&now)
            .bind(competition_id)
            .bind(&now)
            .bind(bonus_due)
            .fetch_all(&mut *tx)
            .await?;
        bonus_numbers.sort_unstable();
        sqlx::query("UPDATE orders SET bonus_ticket_count = ? WHERE id = ?")
            .bind(bonus_numbers.len() as i64)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
    }

    let sql = format!(
        "SELECT COUNT(*) FROM tickets WHERE competition_id = ? AND {AVAILABLE_PRED}"
    );
    let remaining: i64 = sqlx::query_scalar(&sql)
        .bind(competition_id)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;
    if remaining == 0 {
        let flipped = sqlx::query(
            "UPDATE competitions SET status = 'SOLD_OUT', updated_at = ? \
             WHERE id = ? AND status = 'ACTIVE'",
        )
        .bind(&now)
        .bind(competition_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if flipped == 1 {
            audit::append(
                &mut tx,
                "competition",
                competition_id,
                Some(user_id),
                &AuditDetail::StatusChanged {
                    from: CompetitionStatus::Active,
                    to: CompetitionStatus::SoldOut,
                },
            )
            .await?;
        }
    }

    audit::append(
        &mut tx,
        "order",
        order_id,
        Some(user_id),
        &AuditDetail::OrderCompleted {
            order_id,
            payment_ref: payment_ref.to_string(),
            ticket_count: sold.len() as i64,
            bonus_ticket_count: bonus_numbers.len() as i64,
        },
    )
    .await?;
    tx.commit().await?;

    info!(
        "Order {order_id}: {} ticket(s) + {} bonus sold in competition {competition_id} to {user_id}",
        sold.len(),
        bonus_numbers.len()
    );
    let order = get_order_by_payment_ref(pool, payment_ref)
        .await?
        .ok_or(DomainError::NotFound("order"))?;
    Ok(CompletedOrder { order, ticket_numbers: sold, bonus_ticket_numbers: bonus_numbers })
}

/// Serve the stored order for an already-confirmed payment reference. Only
/// the original buyer may replay it, and only against the competition the
/// payment was taken for.
async fn replay(
    pool: &SqlitePool,
    order: Order,
    competition_id: i64,
    user_id: &str,
) -> Result<CompletedOrder> {
    if order.user_id != user_id {
        return Err(DomainError::Unauthorized);
    }
    if order.competition_id != competition_id {
        return Err(DomainError::InvalidInput(
            "payment reference belongs to a different competition",
        ));
    }
    let ticket_numbers = order_ticket_numbers(pool, order.id).await?;
    Ok(CompletedOrder { order, ticket_numbers, bonus_ticket_numbers: Vec::new() })
}

pub async fn get_order_by_payment_ref(
    pool: &SqlitePool,
    payment_ref: &str,
) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_ref = ?");
    let order = sqlx::query_as::<_, Order>(&sql)
        .bind(payment_ref)
        .fetch_optional(pool)
        .await?;
    Ok(order)
}

pub async fn order_ticket_numbers(pool: &SqlitePool, order_id: i64) -> Result<Vec<i64>> {
    let numbers = sqlx::query_scalar(
        "SELECT ticket_number FROM tickets WHERE order_id = ? ORDER BY ticket_number",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(numbers)
}
