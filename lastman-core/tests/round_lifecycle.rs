mod common;

use common::*;
use lastman_core::{Amount, GameConfig, GameError, GameEvent, RoundId, RoundStatus};

#[tokio::test]
async fn test_first_deposit_opens_round() {
    let h = harness(GameConfig::default());
    assert!(h.engine.current_round(t0()).await.is_none());

    let receipt = h.deposit("alice", t0()).await;
    assert_eq!(receipt.round_id, RoundId::FIRST);
    assert_eq!(receipt.deposit_number, 1);
    assert_eq!(receipt.new_pot_amount, units("0.01"));
    assert_eq!(receipt.next_deposit_amount, units("0.01005"));
    assert_eq!(receipt.deadline, at(DAY));
    assert!(receipt.bonus_slot.is_none());

    let round = h.engine.current_round(t0()).await.unwrap();
    assert_eq!(round.last_depositor, Some(id("alice")));
    assert_eq!(round.status, RoundStatus::Active);
}

#[tokio::test]
async fn test_wrong_amount_is_rejected() {
    let h = harness(GameConfig::default());
    h.deposit("alice", t0()).await;

    let err = h
        .engine
        .submit_deposit(&id("bob"), units("0.01"), at(10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GameError::WrongAmount { expected, got } if expected == units("0.01005") && got == units("0.01")
    ));

    let round = h.engine.current_round(at(10)).await.unwrap();
    assert_eq!(round.deposit_count, 1);
    assert_eq!(round.last_depositor, Some(id("alice")));
}

#[tokio::test]
async fn test_timeout_boundary() {
    let h = harness(GameConfig::default());
    h.deposit("alice", t0()).await;
    h.deposit("bob", at(100)).await;

    let err = h.engine.check_timeout(at(100 + DAY - 1)).await.unwrap_err();
    assert!(matches!(
        err,
        GameError::TimeoutNotReached { remaining_secs: 1, .. }
    ));

    // exactly at the deadline the round no longer accepts deposits
    let quote = h.engine.current_round(at(100)).await.unwrap().next_deposit_amount;
    let err = h
        .engine
        .submit_deposit(&id("carol"), quote, at(100 + DAY))
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::TimeoutElapsed(RoundId(1))));

    let snapshot = h.engine.current_round(at(100 + DAY)).await.unwrap();
    assert_eq!(snapshot.status, RoundStatus::AwaitingSettlement);
    assert_eq!(snapshot.time_remaining_secs, 0);

    let finalized = h.engine.check_timeout(at(100 + DAY)).await.unwrap();
    assert_eq!(finalized.winner, id("bob"));
    assert_eq!(finalized.pot_amount, units("0.02005"));
    assert_eq!(finalized.next_round, RoundId(2));
}

#[tokio::test]
async fn test_empty_round_cannot_time_out() {
    let h = harness(GameConfig::default());
    h.engine.open_round(t0()).await.unwrap();

    let err = h.engine.check_timeout(at(3600)).await.unwrap_err();
    assert!(matches!(err, GameError::TimeoutNotReached { .. }));

    let err = h.engine.check_timeout(at(2 * DAY)).await.unwrap_err();
    assert!(matches!(err, GameError::NoDeposits(RoundId(1))));

    let round = h.engine.current_round(at(2 * DAY)).await.unwrap();
    assert_eq!(round.status, RoundStatus::Active);
    assert!(round.deadline.is_none());

    // still open for business
    let receipt = h.deposit("alice", at(2 * DAY)).await;
    assert_eq!(receipt.round_id, RoundId::FIRST);
}

#[tokio::test]
async fn test_open_round_twice_fails() {
    let h = harness(GameConfig::default());
    h.engine.open_round(t0()).await.unwrap();

    let err = h.engine.open_round(at(1)).await.unwrap_err();
    assert!(matches!(err, GameError::RoundAlreadyActive(RoundId(1))));
}

#[tokio::test]
async fn test_finalize_starts_next_round() {
    let h = harness(GameConfig::default());
    h.deposit("alice", t0()).await;
    h.engine.check_timeout(at(DAY)).await.unwrap();

    let next = h.engine.current_round(at(DAY)).await.unwrap();
    assert_eq!(next.id, RoundId(2));
    assert_eq!(next.start_time, at(DAY));
    assert_eq!(next.pot_amount, Amount::ZERO);
    assert_eq!(next.next_deposit_amount, units("0.01"));

    let old = h.engine.round(RoundId::FIRST, at(DAY)).await.unwrap();
    assert_eq!(old.status, RoundStatus::Finalized);
    assert_eq!(old.winner, Some(id("alice")));

    let err = h.engine.check_timeout(at(DAY + 1)).await.unwrap_err();
    assert!(matches!(err, GameError::TimeoutNotReached { .. }));

    let summaries = h.engine.round_summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].winner, id("alice"));
    assert_eq!(summaries[0].total_deposits, 1);
    assert!(summaries[0].last_bonus.is_none());
}

#[tokio::test]
async fn test_claim_prize_rules() {
    let h = harness(GameConfig::default());
    h.deposit("alice", t0()).await;
    h.deposit("bob", at(1)).await;

    let err = h
        .engine
        .claim_prize(&id("bob"), RoundId::FIRST, at(2))
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::RoundNotFinalized(_)));

    h.engine.check_timeout(at(1 + DAY)).await.unwrap();

    let err = h
        .engine
        .claim_prize(&id("alice"), RoundId::FIRST, at(1 + DAY))
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::NotWinner { .. }));

    let receipt = h
        .engine
        .claim_prize(&id("bob"), RoundId::FIRST, at(1 + DAY))
        .await
        .unwrap();
    assert_eq!(receipt.amount, units("0.02005"));
    assert_eq!(h.ledger.balance(&id("bob")), units("0.02005"));

    let err = h
        .engine
        .claim_prize(&id("bob"), RoundId::FIRST, at(2 + DAY))
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::AlreadyClaimed(_)));
    assert_eq!(h.ledger.receipts().len(), 1);

    let err = h
        .engine
        .claim_prize(&id("bob"), RoundId(9), at(2 + DAY))
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::RoundNotFound(RoundId(9))));
}

#[tokio::test]
async fn test_failed_settlement_leaves_round_unclaimed() {
    let h = harness(GameConfig::default());
    h.deposit("alice", t0()).await;
    h.engine.check_timeout(at(DAY)).await.unwrap();

    h.ledger.fail_next("substrate unavailable");
    let err = h
        .engine
        .claim_prize(&id("alice"), RoundId::FIRST, at(DAY))
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::Settlement(_)));
    assert!(err.is_retryable());

    let round = h.engine.round(RoundId::FIRST, at(DAY)).await.unwrap();
    assert!(!round.prize_claimed);
    assert_eq!(round.pot_amount, units("0.01"));

    h.engine
        .claim_prize(&id("alice"), RoundId::FIRST, at(DAY))
        .await
        .unwrap();
    assert_eq!(h.ledger.balance(&id("alice")), units("0.01"));
}

#[tokio::test]
async fn test_competing_deposits_at_same_price() {
    let h = harness(GameConfig::default());
    h.deposit("alice", t0()).await;

    let quote = h.engine.current_round(at(1)).await.unwrap().next_deposit_amount;
    let bob = id("bob");
    let carol = id("carol");
    let (a, b) = tokio::join!(
        h.engine.submit_deposit(&bob, quote, at(1)),
        h.engine.submit_deposit(&carol, quote, at(1)),
    );

    // the second one sees the bumped price
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, GameError::WrongAmount { .. }));
    assert_eq!(h.engine.current_round(at(1)).await.unwrap().deposit_count, 2);
}

#[tokio::test]
async fn test_events_are_published() {
    let h = harness(GameConfig::default());
    let mut events = h.engine.subscribe();

    h.deposit("alice", t0()).await;
    h.engine.check_timeout(at(DAY)).await.unwrap();

    assert!(matches!(events.try_recv().unwrap(), GameEvent::RoundStarted { .. }));
    assert!(matches!(
        events.try_recv().unwrap(),
        GameEvent::DepositMade { deposit_number: 1, .. }
    ));
    assert!(matches!(events.try_recv().unwrap(), GameEvent::RoundEnded { .. }));
    assert!(matches!(
        events.try_recv().unwrap(),
        GameEvent::RoundStarted { round_id: RoundId(2), .. }
    ));
}

#[tokio::test]
async fn test_time_until_timeout() {
    let h = harness(GameConfig::default());
    assert!(h.engine.time_until_timeout(t0()).await.is_none());

    h.deposit("alice", t0()).await;
    let remaining = h.engine.time_until_timeout(at(3600)).await.unwrap();
    assert_eq!(remaining.num_seconds(), DAY - 3600);
    assert_eq!(h.engine.available_pot().await, units("0.01"));
}
