use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

pub mod audit;
mod competitions;
mod draws;
mod orders;
mod reservations;

pub use competitions::{
    CancellationSummary, NewCompetition, activate_competition, cancel_competition,
    create_competition, get_competition, get_competition_by_slug, list_competitions,
    list_orders_for_competition,
};
pub use draws::{
    DRAW_METHOD, DrawOutcome, claim_win, execute_draw, get_win, get_win_for_competition,
    participants, void_win,
};
pub use orders::{CompletedOrder, confirm_purchase, get_order_by_payment_ref, order_ticket_numbers};
pub use reservations::{
    Reservation, count_available, get_ticket, grant_free_entry, release_tickets, reserve_tickets,
    sold_count_for_user,
};

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(database_url).await?;
    info!("Connected to database: {database_url}");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Migrations applied");
    Ok(())
}

// All timestamps are UTC text in this format. It matches SQLite's
// datetime('now') output and compares lexicographically.
const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_ts() -> String {
    Utc::now().format(TS_FMT).to_string()
}

/// Timestamp `secs` seconds from now. Negative values land in the past,
/// which the reservation tests lean on to expire holds without sleeping.
pub(crate) fn ts_in(secs: i64) -> String {
    (Utc::now() + chrono::Duration::seconds(secs))
        .format(TS_FMT)
        .to_string()
}

/// Ticket rows that may be claimed: never sold, and either free or held by a
/// reservation whose TTL has lapsed. Expired holds are reclaimed here, at
/// read time; there is no sweeper. Callers bind the `now` timestamp once per
/// occurrence of this fragment.
pub(crate) const AVAILABLE_PRED: &str =
    "(status = 'AVAILABLE' OR (status = 'RESERVED' AND reserved_until <= ?))";
