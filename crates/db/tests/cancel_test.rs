mod common;

use common::{ANSWER, TTL, FakeProvider, active_competition, buy, test_pool};
use tombola_db::{cancel_competition, execute_draw, get_ticket, reserve_tickets};
use tombola_models::{CompetitionStatus, DomainError, PaymentStatus, TicketStatus};

#[tokio::test]
async fn scenario_d_cancellation_reverts_tickets_and_refunds_orders() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "abort", 20, 100, 50).await;
    buy(&pool, comp, "alice", 2, "pi_alice").await;
    buy(&pool, comp, "bob", 3, "pi_bob").await;
    // a live reservation is swept away too
    reserve_tickets(&pool, comp, "carol", 2, ANSWER, TTL).await.unwrap();

    let provider = FakeProvider { fail_refs: vec!["pi_bob".into()], ..Default::default() };
    let summary =
        cancel_competition(&pool, comp, "supplier pulled out", Some("ops"), &provider)
            .await
            .unwrap();

    assert_eq!(summary.refunded_count, 2);
    assert_eq!(summary.refund_failures, 1);
    assert_eq!(summary.refunded_amount, 500);
    assert_eq!(*provider.refunded.lock().unwrap(), vec!["pi_alice".to_string()]);

    let after = tombola_db::get_competition(&pool, comp).await.unwrap();
    assert_eq!(after.status, CompetitionStatus::Cancelled);

    // the whole pool is logically empty again
    for n in 1..=20 {
        let ticket = get_ticket(&pool, comp, n).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Available);
        assert!(ticket.user_id.is_none());
        assert!(ticket.order_id.is_none());
        assert!(ticket.reserved_until.is_none());
    }

    // both orders marked REFUNDED, including the one whose provider call failed
    let orders = tombola_db::list_orders_for_competition(&pool, comp).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.payment_status == PaymentStatus::Refunded));
}

#[tokio::test]
async fn cancelling_twice_fails_with_invalid_state() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "twice", 5, 100, 50).await;
    let provider = FakeProvider::default();

    cancel_competition(&pool, comp, "first", Some("ops"), &provider).await.unwrap();
    let err = cancel_competition(&pool, comp, "second", Some("ops"), &provider)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidStateTransition));
}

#[tokio::test]
async fn a_drawn_competition_cannot_be_cancelled() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "won", 3, 100, 50).await;
    buy(&pool, comp, "alice", 3, "pi_won").await;
    execute_draw(&pool, comp, Some("ops")).await.unwrap();

    let provider = FakeProvider::default();
    let err = cancel_competition(&pool, comp, "too late", Some("ops"), &provider)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::AlreadyWon));

    // nothing reverted
    let comp_row = tombola_db::get_competition(&pool, comp).await.unwrap();
    assert_eq!(comp_row.status, CompetitionStatus::Completed);
}

#[tokio::test]
async fn cancellation_is_audited_with_reason() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "paper-trail", 5, 100, 50).await;
    buy(&pool, comp, "alice", 1, "pi_pt").await;

    let provider = FakeProvider::default();
    cancel_competition(&pool, comp, "listing error", Some("ops"), &provider).await.unwrap();

    let trail = tombola_db::audit::list_for_entity(&pool, "competition", comp).await.unwrap();
    let cancelled = trail.iter().find(|e| e.action == "competition_cancelled").unwrap();
    assert_eq!(cancelled.actor_user_id.as_deref(), Some("ops"));
    assert!(cancelled.metadata.contains("listing error"));
}
