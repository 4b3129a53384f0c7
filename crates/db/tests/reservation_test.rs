mod common;

use std::collections::HashSet;

use common::{ANSWER, TTL, active_competition, buy, test_pool};
use tombola_db::{count_available, get_ticket, release_tickets, reserve_tickets};
use tombola_models::{DomainError, TicketStatus};

#[tokio::test]
async fn reserve_claims_distinct_numbers_within_range() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "watch", 10, 100, 50).await;

    let reservation = reserve_tickets(&pool, comp, "alice", 4, ANSWER, TTL).await.unwrap();
    assert_eq!(reservation.ticket_numbers.len(), 4);
    let unique: HashSet<_> = reservation.ticket_numbers.iter().collect();
    assert_eq!(unique.len(), 4);
    assert!(reservation.ticket_numbers.iter().all(|&n| (1..=10).contains(&n)));

    for &n in &reservation.ticket_numbers {
        let ticket = get_ticket(&pool, comp, n).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Reserved);
        assert_eq!(ticket.user_id.as_deref(), Some("alice"));
        assert_eq!(ticket.reserved_until.as_deref(), Some(reservation.expires_at.as_str()));
    }
    assert_eq!(count_available(&pool, comp).await.unwrap(), 6);
}

#[tokio::test]
async fn scenario_a_last_tickets_then_exhausted() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "console", 10, 100, 50).await;
    buy(&pool, comp, "alice", 7, "pay_a").await;

    let reservation = reserve_tickets(&pool, comp, "bob", 3, ANSWER, TTL).await.unwrap();
    assert_eq!(reservation.ticket_numbers.len(), 3);

    let err = reserve_tickets(&pool, comp, "carol", 1, ANSWER, TTL).await.unwrap_err();
    match err {
        DomainError::InsufficientAvailability { requested, available } => {
            assert_eq!(requested, 1);
            assert_eq!(available, 0);
        }
        other => panic!("expected InsufficientAvailability, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_reserve_mutates_no_rows() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "hamper", 3, 100, 50).await;

    let err = reserve_tickets(&pool, comp, "alice", 5, ANSWER, TTL).await.unwrap_err();
    assert!(matches!(err, DomainError::InsufficientAvailability { requested: 5, available: 3 }));

    for n in 1..=3 {
        let ticket = get_ticket(&pool, comp, n).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Available);
        assert!(ticket.user_id.is_none());
    }
}

#[tokio::test]
async fn scenario_b_quota_counts_sold_tickets_only() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "tv", 60, 100, 50).await;
    buy(&pool, comp, "alice", 48, "pay_alice").await;

    let err = reserve_tickets(&pool, comp, "alice", 5, ANSWER, TTL).await.unwrap_err();
    assert!(matches!(err, DomainError::QuotaExceeded));

    let reservation = reserve_tickets(&pool, comp, "alice", 2, ANSWER, TTL).await.unwrap();
    assert_eq!(reservation.ticket_numbers.len(), 2);
}

#[tokio::test]
async fn concurrent_reservations_never_overlap() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "bike", 10, 100, 50).await;

    let (a, b) = tokio::join!(
        reserve_tickets(&pool, comp, "alice", 5, ANSWER, TTL),
        reserve_tickets(&pool, comp, "bob", 5, ANSWER, TTL),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let mut all: Vec<i64> = a.ticket_numbers.iter().chain(&b.ticket_numbers).copied().collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 10, "overlapping claims: {:?} / {:?}", a.ticket_numbers, b.ticket_numbers);
}

#[tokio::test]
async fn release_returns_exactly_the_held_numbers() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "ps5", 5, 100, 50).await;

    let reservation = reserve_tickets(&pool, comp, "alice", 3, ANSWER, TTL).await.unwrap();
    assert_eq!(count_available(&pool, comp).await.unwrap(), 2);

    let released = release_tickets(&pool, comp, "alice").await.unwrap();
    assert_eq!(released, 3);
    assert_eq!(count_available(&pool, comp).await.unwrap(), 5);
    for &n in &reservation.ticket_numbers {
        let ticket = get_ticket(&pool, comp, n).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Available);
        assert!(ticket.user_id.is_none());
        assert!(ticket.reserved_until.is_none());
    }

    // and the full pool is selectable again
    let again = reserve_tickets(&pool, comp, "bob", 5, ANSWER, TTL).await.unwrap();
    assert_eq!(again.ticket_numbers, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn release_leaves_other_users_holds_alone() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "dyson", 6, 100, 50).await;
    reserve_tickets(&pool, comp, "alice", 2, ANSWER, TTL).await.unwrap();
    reserve_tickets(&pool, comp, "bob", 2, ANSWER, TTL).await.unwrap();

    assert_eq!(release_tickets(&pool, comp, "alice").await.unwrap(), 2);
    assert_eq!(count_available(&pool, comp).await.unwrap(), 4);
}

#[tokio::test]
async fn scenario_e_expired_hold_is_reclaimable() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "lego", 2, 100, 50).await;

    // TTL of zero expires the hold immediately.
    let first = reserve_tickets(&pool, comp, "alice", 2, ANSWER, 0).await.unwrap();
    let second = reserve_tickets(&pool, comp, "bob", 2, ANSWER, TTL).await.unwrap();

    let a: HashSet<_> = first.ticket_numbers.iter().collect();
    let b: HashSet<_> = second.ticket_numbers.iter().collect();
    assert_eq!(a, b);

    let ticket = get_ticket(&pool, comp, second.ticket_numbers[0]).await.unwrap();
    assert_eq!(ticket.user_id.as_deref(), Some("bob"));
}

#[tokio::test]
async fn wrong_answer_is_rejected_before_any_claim() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "iphone", 5, 100, 50).await;

    let err = reserve_tickets(&pool, comp, "alice", 2, "Paris", TTL).await.unwrap_err();
    assert!(matches!(err, DomainError::IncorrectAnswer));
    assert_eq!(count_available(&pool, comp).await.unwrap(), 5);
}

#[tokio::test]
async fn draft_competition_is_not_sellable() {
    let pool = test_pool().await;
    let comp = tombola_db::create_competition(&pool, &common::new_competition("early", 5, 100, 50))
        .await
        .unwrap();

    let err = reserve_tickets(&pool, comp.id, "alice", 1, ANSWER, TTL).await.unwrap_err();
    assert!(matches!(err, DomainError::CompetitionNotSellable));
}

#[tokio::test]
async fn slug_lookup_finds_the_same_competition() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "signed-shirt", 5, 100, 50).await;

    let by_slug = tombola_db::get_competition_by_slug(&pool, "signed-shirt").await.unwrap();
    assert_eq!(by_slug.id, comp);

    let err = tombola_db::get_competition_by_slug(&pool, "no-such-slug").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn free_entry_takes_a_number_without_touching_quota() {
    let pool = test_pool().await;
    let comp = active_competition(&pool, "postal", 5, 100, 50).await;

    let number = tombola_db::grant_free_entry(&pool, comp, "walter", Some("ops")).await.unwrap();
    let ticket = get_ticket(&pool, comp, number).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::FreeEntry);
    assert_eq!(ticket.user_id.as_deref(), Some("walter"));
    assert!(ticket.order_id.is_none());

    assert_eq!(count_available(&pool, comp).await.unwrap(), 4);
    assert_eq!(tombola_db::sold_count_for_user(&pool, comp, "walter").await.unwrap(), 0);
}
