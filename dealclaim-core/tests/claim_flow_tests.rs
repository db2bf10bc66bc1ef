// tests/claim_flow_tests.rs

use chrono::Duration;

use dealclaim_core::models::{ClaimStatus, ClaimTransition, RequestIdentity};
use dealclaim_core::test_utils::{test_deal, TestHarness};
use dealclaim_core::traits::{Clock, RedemptionLedger};
use dealclaim_core::Error;

fn till() -> RequestIdentity {
    RequestIdentity::anonymous("10.0.0.5")
}

#[tokio::test]
async fn test_claim_verify_then_already_redeemed() -> Result<(), Error> {
    let h = TestHarness::new()?;

    // 1) Customer 100 claims deal 42; the code lives 24h
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;
    assert_eq!(ticket.claim_code.len(), 6);
    assert_eq!(ticket.status, ClaimStatus::Claimed);
    assert_eq!(ticket.code_expires_at - h.clock.now(), Duration::hours(24));

    // 2) First verification succeeds and books the redemption
    let first = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await?;
    assert!(first.valid);
    assert_eq!(first.claim.status, ClaimStatus::Used);
    assert!(first.claim.vendor_verified);
    assert_eq!(first.claim.verified_at, Some(h.clock.now()));
    assert_eq!(first.deal.current_redemptions, 1);
    assert_eq!(first.customer.map(|c| c.deals_claimed), Some(1));

    // 3) Second verification of the same code is refused
    let second = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await;
    assert!(matches!(second, Err(Error::AlreadyRedeemed)), "got {second:?}");

    // 4) Counters moved exactly once
    let deal = h.store.deal(42).expect("deal 42 seeded");
    assert_eq!(deal.current_redemptions, 1);
    assert_eq!(deal.total_redemptions, 1);
    assert_eq!(h.store.vendor(1).expect("vendor").total_redemptions, 1);

    // 5) Both attempts are on record
    let attempts = h.store.attempts();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].deal_id, Some(42));
    assert!(!attempts[1].success);
    assert_eq!(attempts[1].failure_reason.as_deref(), Some("already_redeemed"));

    Ok(())
}

#[tokio::test]
async fn test_codes_are_normalised_before_lookup() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;

    let typed = format!("  {}\n", ticket.claim_code.to_lowercase());
    let result = h.engine.verification.verify_claim_code(&typed, &till()).await?;
    assert_eq!(result.claim.claim_id, ticket.claim_id);

    let found = h.engine.credentials.find_claim_by_code(&typed).await?;
    assert_eq!(found.map(|c| c.status), Some(ClaimStatus::Used));
    Ok(())
}

#[tokio::test]
async fn test_unknown_and_malformed_codes() -> Result<(), Error> {
    let h = TestHarness::new()?;

    for code in ["ZZZZZZ", "abc", "", "ABCDEFG", "AB-12!"] {
        let result = h.engine.verification.verify_claim_code(code, &till()).await;
        assert!(matches!(result, Err(Error::InvalidCode)), "{code:?} gave {result:?}");
    }

    let attempts = h.store.attempts();
    assert_eq!(attempts.len(), 5);
    assert!(attempts.iter().all(|a| !a.success && a.deal_id.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_expired_code_is_rejected_and_marked() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;

    // Deadline is inclusive: at exactly +24h the code is gone
    h.clock.advance(Duration::hours(24));
    let result = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await;
    assert!(matches!(result, Err(Error::ClaimExpired)), "got {result:?}");

    let claim = h.store.claims().into_iter().next().expect("one claim");
    assert_eq!(claim.status, ClaimStatus::Expired);
    assert!(!claim.vendor_verified);

    // Idempotent
    let again = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await;
    assert!(matches!(again, Err(Error::ClaimExpired)));
    assert_eq!(h.store.deal(42).expect("deal").current_redemptions, 0);

    Ok(())
}

#[tokio::test]
async fn test_expiry_outranks_redeemed_status() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;
    h.engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await?;

    h.clock.advance(Duration::hours(25));
    let result = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await;
    assert!(matches!(result, Err(Error::ClaimExpired)), "got {result:?}");

    // A used claim is never rewritten to expired
    let claim = h.store.claims().into_iter().next().expect("one claim");
    assert_eq!(claim.status, ClaimStatus::Used);
    Ok(())
}

#[tokio::test]
async fn test_one_active_claim_per_user_and_deal() -> Result<(), Error> {
    let h = TestHarness::new()?;
    h.engine.credentials.claim_deal(100, 42).await?;

    let dup = h.engine.credentials.claim_deal(100, 42).await;
    assert!(
        matches!(dup, Err(Error::DuplicateActiveClaim { user_id: 100, deal_id: 42 })),
        "got {dup:?}"
    );

    // Other users and other deals are unaffected
    h.engine.credentials.claim_deal(101, 42).await?;
    h.engine.credentials.claim_deal(100, 7).await?;

    // Once the first claim lapses the slot frees up, without any sweep
    h.clock.advance(Duration::hours(24));
    let fresh = h.engine.credentials.claim_deal(100, 42).await?;
    assert_eq!(fresh.status, ClaimStatus::Claimed);
    Ok(())
}

#[tokio::test]
async fn test_claiming_requires_an_available_deal() -> Result<(), Error> {
    let h = TestHarness::new()?;

    let missing = h.engine.credentials.claim_deal(100, 999).await;
    assert!(matches!(missing, Err(Error::DealNotFound(999))));

    let mut inactive = test_deal(60, 1, 10);
    inactive.is_active = false;
    h.store.insert_deal(inactive);
    assert!(matches!(
        h.engine.credentials.claim_deal(100, 60).await,
        Err(Error::DealUnavailable(60))
    ));

    let mut sold_out = test_deal(61, 1, 10);
    sold_out.max_redemptions = Some(3);
    sold_out.current_redemptions = 3;
    h.store.insert_deal(sold_out);
    assert!(matches!(
        h.engine.credentials.claim_deal(100, 61).await,
        Err(Error::DealUnavailable(61))
    ));

    let mut ended = test_deal(62, 1, 10);
    ended.valid_until = Some(h.clock.now());
    h.store.insert_deal(ended);
    assert!(matches!(
        h.engine.credentials.claim_deal(100, 62).await,
        Err(Error::DealUnavailable(62))
    ));

    Ok(())
}

#[tokio::test]
async fn test_code_deadline_never_outlives_the_deal() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let mut short = test_deal(63, 1, 10);
    short.valid_until = Some(h.clock.now() + Duration::hours(2));
    h.store.insert_deal(short);

    let ticket = h.engine.credentials.claim_deal(100, 63).await?;
    assert_eq!(ticket.code_expires_at, h.clock.now() + Duration::hours(2));
    Ok(())
}

#[tokio::test]
async fn test_pending_claim_needs_activation() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let mut gated = test_deal(50, 1, 15);
    gated.requires_activation = true;
    h.store.insert_deal(gated);

    // 1) Claim starts pending
    let ticket = h.engine.credentials.claim_deal(100, 50).await?;
    assert_eq!(ticket.status, ClaimStatus::Pending);

    // 2) Till refuses it until activation
    let early = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await;
    assert!(matches!(early, Err(Error::ClaimPending)), "got {early:?}");

    // 3) Activate, then it verifies
    let activated = h.engine.credentials.activate_claim(ticket.claim_id).await?;
    assert_eq!(activated.status, ClaimStatus::Claimed);
    h.engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await?;

    // 4) Activation is one-way
    let again = h.engine.credentials.activate_claim(ticket.claim_id).await;
    assert!(matches!(again, Err(Error::InvalidTransition(_))), "got {again:?}");

    let unknown = h.engine.credentials.activate_claim(uuid::Uuid::new_v4()).await;
    assert!(matches!(unknown, Err(Error::ClaimNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_complete_redemption_single_step() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;

    // Deal 42 is 20% off; no explicit discount means 20% of the bill
    let receipt = h
        .engine
        .verification
        .complete_redemption(&ticket.claim_code, 5_000, None, &till())
        .await?;
    assert!(receipt.success);
    assert_eq!(receipt.customer_savings, 1_000);
    assert_eq!(receipt.claim_id, ticket.claim_id);

    let claim = h.store.claims().into_iter().next().expect("one claim");
    assert_eq!(claim.status, ClaimStatus::Completed);
    assert_eq!(claim.bill_amount, Some(5_000));
    assert_eq!(claim.actual_savings, Some(1_000));
    assert!(claim.vendor_verified);
    assert!(claim.verified_at.is_some());
    assert_eq!(claim.completed_at, Some(h.clock.now()));
    assert_eq!(h.store.deal(42).expect("deal").current_redemptions, 1);

    // Terminal from here
    let verify = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await;
    assert!(matches!(verify, Err(Error::AlreadyRedeemed)));
    let complete = h
        .engine
        .verification
        .complete_redemption(&ticket.claim_code, 5_000, None, &till())
        .await;
    assert!(matches!(complete, Err(Error::AlreadyRedeemed)));
    assert_eq!(h.store.deal(42).expect("deal").current_redemptions, 1);
    Ok(())
}

#[tokio::test]
async fn test_complete_after_verify_records_bill_only() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;
    h.engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await?;

    // The bill can arrive after the code window closed
    h.clock.advance(Duration::hours(30));
    let receipt = h
        .engine
        .verification
        .complete_redemption(&ticket.claim_code, 2_000, Some(300), &till())
        .await?;
    assert_eq!(receipt.customer_savings, 300);

    let claim = h.store.claims().into_iter().next().expect("one claim");
    assert_eq!(claim.status, ClaimStatus::Completed);
    assert_eq!(claim.bill_amount, Some(2_000));

    // Ledger ran at verification only
    assert_eq!(h.store.deal(42).expect("deal").current_redemptions, 1);
    assert_eq!(h.store.customer(100).expect("customer").deals_claimed, 1);
    Ok(())
}

#[tokio::test]
async fn test_complete_redemption_validates_amounts() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;
    let v = &h.engine.verification;

    for (bill, discount) in [(0, None), (-5, None), (100, Some(101)), (100, Some(-1))] {
        let result = v.complete_redemption(&ticket.claim_code, bill, discount, &till()).await;
        assert!(matches!(result, Err(Error::InvalidAmount(_))), "({bill}, {discount:?}) gave {result:?}");
    }

    // Bad amounts neither touch the claim nor count as attempts
    assert!(h.store.attempts().is_empty());
    let claim = h.store.claims().into_iter().next().expect("one claim");
    assert_eq!(claim.status, ClaimStatus::Claimed);

    // Full discount is allowed
    let receipt = v.complete_redemption(&ticket.claim_code, 100, Some(100), &till()).await?;
    assert_eq!(receipt.customer_savings, 100);
    Ok(())
}

#[tokio::test]
async fn test_complete_redemption_respects_expiry_and_pending() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let mut gated = test_deal(50, 1, 15);
    gated.requires_activation = true;
    h.store.insert_deal(gated);

    let pending = h.engine.credentials.claim_deal(100, 50).await?;
    let result = h
        .engine
        .verification
        .complete_redemption(&pending.claim_code, 1_000, None, &till())
        .await;
    assert!(matches!(result, Err(Error::ClaimPending)));

    let claimed = h.engine.credentials.claim_deal(100, 42).await?;
    h.clock.advance(Duration::hours(24));
    let result = h
        .engine
        .verification
        .complete_redemption(&claimed.claim_code, 1_000, None, &till())
        .await;
    assert!(matches!(result, Err(Error::ClaimExpired)));
    assert_eq!(h.store.deal(42).expect("deal").current_redemptions, 0);
    Ok(())
}

#[tokio::test]
async fn test_expire_stale_claims_sweep() -> Result<(), Error> {
    let h = TestHarness::new()?;
    h.engine.credentials.claim_deal(100, 42).await?;
    h.engine.credentials.claim_deal(101, 42).await?;
    h.clock.advance(Duration::hours(1));
    h.engine.credentials.claim_deal(102, 42).await?;

    h.clock.advance(Duration::hours(23));
    assert_eq!(h.engine.credentials.expire_stale_claims().await?, 2);
    assert_eq!(h.engine.credentials.expire_stale_claims().await?, 0);

    let expired = h
        .store
        .claims()
        .into_iter()
        .filter(|c| c.status == ClaimStatus::Expired)
        .count();
    assert_eq!(expired, 2);
    Ok(())
}

#[tokio::test]
async fn test_redemption_without_its_deal_changes_nothing() -> Result<(), Error> {
    let h = TestHarness::new()?;
    let ticket = h.engine.credentials.claim_deal(100, 42).await?;
    let claim = h.store.claims().into_iter().next().expect("one claim");
    assert_eq!(claim.claim_code, ticket.claim_code);

    let mut orphan = claim.clone();
    orphan.deal_id = 999;
    let t = ClaimTransition::plain(ClaimStatus::Claimed, ClaimStatus::Used).verified(h.clock.now());
    let result = h.store.redeem_claim(&orphan, 1, &t).await;
    assert!(matches!(result, Err(Error::DealNotFound(999))), "got {result:?}");

    let stored = h.store.claims().into_iter().next().expect("one claim");
    assert_eq!(stored, claim);
    assert_eq!(h.store.customer(100).expect("customer").deals_claimed, 0);
    assert_eq!(h.store.vendor(1).expect("vendor").total_redemptions, 0);
    Ok(())
}

#[tokio::test]
async fn test_redemption_counts_even_without_vendor_or_customer_rows() -> Result<(), Error> {
    let h = TestHarness::new()?;
    h.store.insert_deal(test_deal(8, 77, 15));
    let ticket = h.engine.credentials.claim_deal(555, 8).await?;

    let verified = h
        .engine
        .verification
        .verify_claim_code(&ticket.claim_code, &till())
        .await?;
    assert_eq!(verified.claim.status, ClaimStatus::Used);
    assert!(verified.customer.is_none());
    assert_eq!(h.store.deal(8).expect("deal 8").current_redemptions, 1);
    assert!(h.store.vendor(77).is_none());
    Ok(())
}
