#![allow(dead_code)]

use std::sync::Mutex;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tombola_models::{BonusTier, QuestionChoice};
use tombola_payments::{PaymentDetails, PaymentProvider};

pub const ANSWER: &str = "London";
pub const TTL: i64 = 600;

/// In-memory database with migrations applied. Single connection so every
/// statement in a test sees the same database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    tombola_db::migrate(&pool).await.expect("migrations");
    pool
}

pub fn question_choices() -> Vec<QuestionChoice> {
    vec![
        QuestionChoice { label: "London".into(), correct: true },
        QuestionChoice { label: "Paris".into(), correct: false },
        QuestionChoice { label: "Madrid".into(), correct: false },
    ]
}

pub fn new_competition(
    slug: &str,
    total: i64,
    price: i64,
    max_per_user: i64,
) -> tombola_db::NewCompetition {
    tombola_db::NewCompetition {
        slug: slug.into(),
        title: format!("{slug} giveaway"),
        description: None,
        total_tickets: total,
        ticket_price: price,
        max_tickets_per_user: max_per_user,
        // In the past, so ACTIVE competitions are draw-eligible by default.
        draw_date: "2020-01-01 00:00:00".into(),
        question: "What is the capital of the United Kingdom?".into(),
        choices: question_choices(),
    }
}

/// Create and activate a competition; returns its id.
pub async fn active_competition(
    pool: &SqlitePool,
    slug: &str,
    total: i64,
    price: i64,
    max_per_user: i64,
) -> i64 {
    let comp = tombola_db::create_competition(pool, &new_competition(slug, total, price, max_per_user))
        .await
        .expect("create");
    tombola_db::activate_competition(pool, comp.id, Some("ops")).await.expect("activate");
    comp.id
}

/// Reserve then confirm at the exact expected amount, no bonus tiers.
pub async fn buy(
    pool: &SqlitePool,
    competition_id: i64,
    user: &str,
    quantity: i64,
    payment_ref: &str,
) -> tombola_db::CompletedOrder {
    let reservation =
        tombola_db::reserve_tickets(pool, competition_id, user, quantity, ANSWER, TTL)
            .await
            .expect("reserve");
    let comp = tombola_db::get_competition(pool, competition_id).await.expect("get");
    tombola_db::confirm_purchase(
        pool,
        competition_id,
        user,
        payment_ref,
        reservation.ticket_numbers.len() as i64 * comp.ticket_price,
        &[],
    )
    .await
    .expect("confirm")
}

pub fn default_tiers() -> Vec<BonusTier> {
    vec![
        BonusTier { min_quantity: 10, bonus: 1 },
        BonusTier { min_quantity: 15, bonus: 2 },
        BonusTier { min_quantity: 20, bonus: 3 },
        BonusTier { min_quantity: 50, bonus: 5 },
    ]
}

/// Payment provider double: refunds succeed unless the reference is listed
/// in `fail_refs`; successful refunds are recorded.
#[derive(Default)]
pub struct FakeProvider {
    pub fail_refs: Vec<String>,
    pub refunded: Mutex<Vec<String>>,
}

impl PaymentProvider for FakeProvider {
    async fn verify(&self, payment_ref: &str) -> anyhow::Result<PaymentDetails> {
        Ok(PaymentDetails {
            reference: payment_ref.to_string(),
            amount: 0,
            currency: "gbp".into(),
            succeeded: true,
        })
    }

    async fn refund(&self, payment_ref: &str) -> anyhow::Result<()> {
        if self.fail_refs.iter().any(|r| r == payment_ref) {
            anyhow::bail!("provider unavailable");
        }
        self.refunded.lock().unwrap().push(payment_ref.to_string());
        Ok(())
    }
}
