mod common;

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use molt_core::{
    ClipError, ClipSelector, EpisodeStatus, IntegrityAuditor, NewClipVote, PaymentStatus,
    PayoutConfig, PayoutEngine, PayoutError, PayoutFilter, PayoutStatus, PeriodResolution,
    PilotStatus, ProductionScheduler, RecipientType, SeriesStatus, ShareDisposition, StudioStore,
    TipEvent, TransferClient, TransferError, TransferReceipt, TransferRequest,
    UnconfiguredTransferClient, VoterType, VotingPeriodManager,
};
use tempfile::{tempdir, TempDir};

use common::{open_store, scheduler, seed_pilot_pipeline, select_winner, t0, worker, worker_config, ScriptedGateway};

/// Rail that rejects transfers to one wallet and accepts the rest.
struct RejectingRail {
    reject_wallet: &'static str,
}

#[async_trait]
impl TransferClient for RejectingRail {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        if request.wallet_address == self.reject_wallet {
            return Err(TransferError::Rejected("wallet frozen".into()));
        }
        Ok(TransferReceipt {
            reference: format!("tx-{}", request.idempotency_key),
        })
    }
}

struct Studio {
    dir: TempDir,
    store: StudioStore,
    scheduler: ProductionScheduler,
    series_id: String,
    pilot_id: String,
    variant_ids: Vec<String>,
}

fn vote_time() -> DateTime<Utc> {
    t0() + Duration::hours(1)
}

/// Runs the pipeline up to an open clip vote over two pilot variants.
async fn studio_in_clip_vote() -> Studio {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let scheduler = scheduler(2, 2);
    let series_id = select_winner(&store, &scheduler);
    let worker = worker(&dir, &store, ScriptedGateway::with(Vec::new()), worker_config());
    worker.tick(t0() + Duration::minutes(2)).await.unwrap();

    let pilot_id = store.list_episodes(&series_id).unwrap()[0].id.clone();
    let variant_ids = store
        .list_variants(&pilot_id)
        .unwrap()
        .into_iter()
        .map(|variant| variant.id)
        .collect();
    Studio {
        dir,
        store,
        scheduler,
        series_id,
        pilot_id,
        variant_ids,
    }
}

fn engine(studio: &Studio, rail: Arc<dyn TransferClient>) -> PayoutEngine {
    let config = PayoutConfig {
        platform_wallet: Some("wallet-platform".into()),
        max_transfer_retries: 2,
        ..PayoutConfig::default()
    };
    PayoutEngine::new(studio.store.clone(), config, rail)
}

fn selector(studio: &Studio, engine: &PayoutEngine) -> ClipSelector {
    ClipSelector::new(studio.store.clone(), engine.clone(), studio.scheduler.clone())
}

fn register_owners(engine: &PayoutEngine) {
    engine
        .register_wallet("creator-sub-1", "wallet-creator", true, vote_time())
        .unwrap();
    engine
        .register_wallet("agent-sub-1", "wallet-agent", true, vote_time())
        .unwrap();
}

fn tip(variant_id: &str, voter: &str, cents: i64) -> NewClipVote {
    NewClipVote {
        clip_variant_id: variant_id.to_string(),
        voter_type: VoterType::Human,
        voter_identity: voter.to_string(),
        tip_amount_cents: cents,
        payer_reference: Some(format!("charge-{voter}")),
    }
}

#[tokio::test]
async fn paid_vote_splits_into_three_pending_payouts() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    register_owners(&engine);
    let selector = selector(&studio, &engine);

    let receipt = selector
        .cast_vote(&tip(&studio.variant_ids[0], "viewer-1", 25), vote_time())
        .unwrap();
    assert_eq!(receipt.vote.payment_status, PaymentStatus::Confirmed);
    let settlement = receipt.settlement.expect("paid vote settles immediately");
    assert!(settlement
        .shares
        .iter()
        .all(|share| share.disposition == ShareDisposition::Payout));

    let payouts = studio
        .store
        .list_payouts(&PayoutFilter {
            clip_vote_id: Some(receipt.vote.id.clone()),
            ..PayoutFilter::default()
        })
        .unwrap();
    assert_eq!(payouts.len(), 3);
    let share = |recipient: RecipientType| {
        payouts
            .iter()
            .find(|payout| payout.recipient_type == recipient)
            .map(|payout| payout.amount_cents)
            .unwrap()
    };
    assert_eq!(share(RecipientType::Creator), 20);
    assert_eq!(share(RecipientType::Platform), 4);
    assert_eq!(share(RecipientType::Agent), 1);
    assert!(payouts.iter().all(|payout| payout.status == PayoutStatus::Pending));

    let again = engine.settle(&receipt.vote.id, vote_time()).unwrap();
    assert!(again.is_noop());
    assert_eq!(studio.store.list_payouts(&PayoutFilter::default()).unwrap().len(), 3);

    let auditor = IntegrityAuditor::new(studio.store.clone(), Duration::minutes(10));
    assert!(auditor.audit(vote_time()).unwrap().is_empty());
}

#[tokio::test]
async fn missing_wallets_hold_shares_until_claimed() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    let selector = selector(&studio, &engine);

    let receipt = selector
        .cast_vote(&tip(&studio.variant_ids[0], "viewer-1", 25), vote_time())
        .unwrap();
    let dispositions: Vec<_> = receipt
        .settlement
        .unwrap()
        .shares
        .iter()
        .map(|share| (share.recipient_type, share.disposition))
        .collect();
    assert!(dispositions.contains(&(RecipientType::Creator, ShareDisposition::Unclaimed)));
    assert!(dispositions.contains(&(RecipientType::Platform, ShareDisposition::Payout)));
    assert!(dispositions.contains(&(RecipientType::Agent, ShareDisposition::Unclaimed)));

    let held = studio.store.list_unclaimed(true).unwrap();
    assert_eq!(held.len(), 2);
    assert!(held
        .iter()
        .all(|row| row.expires_at == vote_time() + Duration::days(30)));

    let err = engine
        .claim_unclaimed("creator-sub-1", vote_time())
        .unwrap_err();
    assert!(matches!(err, PayoutError::WalletUnverified { .. }));

    engine
        .register_wallet("creator-sub-1", "wallet-creator", true, vote_time())
        .unwrap();
    let claimed = engine
        .claim_unclaimed("creator-sub-1", vote_time() + Duration::days(1))
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].amount_cents, 20);
    assert_eq!(claimed[0].wallet_address, "wallet-creator");
    assert_eq!(studio.store.list_unclaimed(true).unwrap().len(), 1);

    let again = engine
        .claim_unclaimed("creator-sub-1", vote_time() + Duration::days(2))
        .unwrap();
    assert!(again.is_empty());
    assert!(engine.settle(&receipt.vote.id, vote_time()).unwrap().is_noop());

    let auditor = IntegrityAuditor::new(studio.store.clone(), Duration::minutes(10));
    assert!(auditor.audit(vote_time() + Duration::days(2)).unwrap().is_empty());
}

#[tokio::test]
async fn one_vote_per_voter_per_variant() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    let selector = selector(&studio, &engine);
    let variant = &studio.variant_ids[0];

    selector
        .cast_vote(&NewClipVote::free(variant, VoterType::Human, "viewer-1"), vote_time())
        .unwrap();
    let err = selector
        .cast_vote(&NewClipVote::free(variant, VoterType::Human, "viewer-1"), vote_time())
        .unwrap_err();
    assert!(matches!(err, ClipError::DuplicateVote { .. }));
    selector
        .cast_vote(
            &NewClipVote::free(&studio.variant_ids[1], VoterType::Human, "viewer-1"),
            vote_time(),
        )
        .unwrap();

    assert_eq!(studio.store.fetch_variant(variant).unwrap().unwrap().vote_count, 1);

    let mut agent_tip = tip(variant, "agent-7", 10);
    agent_tip.voter_type = VoterType::Agent;
    assert!(matches!(
        selector.cast_vote(&agent_tip, vote_time()).unwrap_err(),
        ClipError::InvalidTip(_)
    ));
}

#[tokio::test]
async fn pending_tip_settles_on_confirmation() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    register_owners(&engine);
    let selector = selector(&studio, &engine);

    let mut unconfirmed = tip(&studio.variant_ids[1], "viewer-2", 50);
    unconfirmed.payer_reference = None;
    let receipt = selector.cast_vote(&unconfirmed, vote_time()).unwrap();
    assert_eq!(receipt.vote.payment_status, PaymentStatus::Pending);
    assert!(receipt.settlement.is_none());
    assert!(matches!(
        engine.settle(&receipt.vote.id, vote_time()).unwrap_err(),
        PayoutError::NotSettleable { .. }
    ));

    let wrong = TipEvent {
        clip_vote_id: receipt.vote.id.clone(),
        amount_cents: 40,
        payer_reference: "charge-2".into(),
    };
    assert!(matches!(
        engine.handle_tip(&wrong, vote_time()).unwrap_err(),
        PayoutError::TipMismatch { recorded: 50, received: 40, .. }
    ));

    let event = TipEvent {
        amount_cents: 50,
        ..wrong
    };
    let report = engine.handle_tip(&event, vote_time()).unwrap();
    assert_eq!(report.amount_cents, 50);
    assert_eq!(
        report.shares.iter().map(|share| share.amount_cents).sum::<i64>(),
        50
    );
    assert!(engine.handle_tip(&event, vote_time()).unwrap().is_noop());
}

#[tokio::test]
async fn closing_the_clip_vote_greenlights_the_most_voted_variant() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    let selector = selector(&studio, &engine);
    let (first, second) = (&studio.variant_ids[0], &studio.variant_ids[1]);

    for voter in ["viewer-1", "viewer-2"] {
        selector
            .cast_vote(&NewClipVote::free(second, VoterType::Human, voter), vote_time())
            .unwrap();
    }
    selector
        .cast_vote(&NewClipVote::free(first, VoterType::Agent, "agent-3"), vote_time())
        .unwrap();

    let close_at = t0() + Duration::days(3);
    let manager = VotingPeriodManager::new(studio.store.clone(), studio.scheduler.clone(), 16);
    let report = manager.close_expired(close_at).unwrap();
    assert_eq!(report.processed.len(), 1);
    let PeriodResolution::ClipSelection { series } = &report.processed[0].resolution else {
        panic!("expected clip selection");
    };
    assert_eq!(series[0].selected_variant_id.as_deref(), Some(second.as_str()));
    assert_eq!(series[0].vote_count, 2);
    assert_eq!(series[0].follow_ons_scheduled, 2);
    assert_eq!(series[0].series_status, SeriesStatus::InProduction);

    assert!(studio.store.fetch_variant(second).unwrap().unwrap().is_selected);
    assert!(!studio.store.fetch_variant(first).unwrap().unwrap().is_selected);
    let pilot = studio.store.fetch_episode(&studio.pilot_id).unwrap().unwrap();
    assert_eq!(pilot.status, EpisodeStatus::Published);
    assert_eq!(
        pilot.asset_url,
        studio.store.fetch_variant(second).unwrap().unwrap().asset_url
    );
    assert_eq!(
        studio.store.fetch_submission("sub-1").unwrap().unwrap().pilot_status,
        PilotStatus::Greenlit
    );

    let late = selector
        .cast_vote(&NewClipVote::free(first, VoterType::Human, "viewer-9"), close_at)
        .unwrap_err();
    assert!(matches!(late, ClipError::VotingClosed { .. }));

    let worker = worker(&studio.dir, &studio.store, ScriptedGateway::with(Vec::new()), worker_config());
    let tick = worker.tick(close_at + Duration::minutes(1)).await.unwrap();
    assert_eq!(tick.completed, 2);
    assert_eq!(
        studio.store.fetch_series(&studio.series_id).unwrap().unwrap().status,
        SeriesStatus::Completed
    );
    assert_eq!(
        studio.store.fetch_submission("sub-1").unwrap().unwrap().pilot_status,
        PilotStatus::Completed
    );
}

#[tokio::test]
async fn series_without_votes_still_picks_the_first_rendered_variant() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    let selector = selector(&studio, &engine);

    let outcome = selector.finalize_series(&studio.series_id, vote_time()).unwrap();
    assert!(outcome.selected_variant_id.is_some());
    assert_eq!(outcome.vote_count, 0);
    assert!(matches!(
        selector.finalize_series(&studio.series_id, vote_time()).unwrap_err(),
        ClipError::VotingClosed { .. }
    ));
}

#[tokio::test]
async fn transfers_complete_retry_and_fail() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(
        &studio,
        Arc::new(RejectingRail {
            reject_wallet: "wallet-agent",
        }),
    );
    register_owners(&engine);
    let selector = selector(&studio, &engine);
    selector
        .cast_vote(&tip(&studio.variant_ids[0], "viewer-1", 25), vote_time())
        .unwrap();

    let first = engine.dispatch_transfers(vote_time()).await.unwrap();
    assert_eq!(first.claimed, 3);
    assert_eq!(first.completed, 2);
    assert_eq!(first.retried, 1);

    let second = engine
        .dispatch_transfers(vote_time() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(second.claimed, 1);
    assert_eq!(second.failed, 1);

    let payouts = studio.store.list_payouts(&PayoutFilter::default()).unwrap();
    for payout in &payouts {
        match payout.recipient_type {
            RecipientType::Agent => {
                assert_eq!(payout.status, PayoutStatus::Failed);
                assert_eq!(payout.retry_count, 2);
            }
            _ => {
                assert_eq!(payout.status, PayoutStatus::Completed);
                assert_eq!(
                    payout.transfer_reference.as_deref(),
                    Some(format!("tx-{}", payout.id).as_str())
                );
            }
        }
    }

    let idle = engine
        .dispatch_transfers(vote_time() + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(idle.claimed, 0);
}

#[tokio::test]
async fn zero_cent_shares_complete_without_a_transfer() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(
        &studio,
        Arc::new(RejectingRail {
            reject_wallet: "none",
        }),
    );
    register_owners(&engine);
    let selector = selector(&studio, &engine);
    selector
        .cast_vote(&tip(&studio.variant_ids[0], "viewer-1", 1), vote_time())
        .unwrap();

    let report = engine.dispatch_transfers(vote_time()).await.unwrap();
    assert_eq!(report.completed, 3);
    let payouts = studio.store.list_payouts(&PayoutFilter::default()).unwrap();
    let zero: Vec<_> = payouts.iter().filter(|payout| payout.amount_cents == 0).collect();
    assert_eq!(zero.len(), 2);
    assert!(zero
        .iter()
        .all(|payout| payout.transfer_reference.as_deref() == Some("zero-amount")));
}

#[tokio::test]
async fn unconfigured_rail_defers_transfers() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    register_owners(&engine);
    let selector = selector(&studio, &engine);
    selector
        .cast_vote(&tip(&studio.variant_ids[0], "viewer-1", 25), vote_time())
        .unwrap();

    let report = engine.dispatch_transfers(vote_time()).await.unwrap();
    assert_eq!(report.deferred, 3);
    let payouts = studio.store.list_payouts(&PayoutFilter::default()).unwrap();
    assert!(payouts
        .iter()
        .all(|payout| payout.status == PayoutStatus::Pending && payout.retry_count == 0));
}

#[tokio::test]
async fn ledger_export_writes_csv_and_manifest() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    register_owners(&engine);
    let selector = selector(&studio, &engine);
    selector
        .cast_vote(&tip(&studio.variant_ids[0], "viewer-1", 25), vote_time())
        .unwrap();

    let out = studio.dir.path().join("ledger");
    let export = engine
        .export_ledger(
            t0() - Duration::days(1),
            t0() + Duration::days(1),
            &out,
            vote_time(),
        )
        .unwrap();
    assert_eq!(export.totals.payouts, 3);
    assert_eq!(export.totals.total_cents, 25);
    assert_eq!(export.totals.by_recipient.get("creator"), Some(&20));
    assert_eq!(export.checksum.len(), 64);

    let csv = fs::read_to_string(&export.csv_path).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.lines().next().unwrap().starts_with("created_at,payout_id"));
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&export.manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["checksum"], export.checksum.as_str());
    assert_eq!(manifest["totals"]["total_cents"], 25);
}

#[tokio::test]
async fn votes_after_the_window_ends_are_refused() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    let selector = selector(&studio, &engine);
    let (first, second) = (&studio.variant_ids[0], &studio.variant_ids[1]);
    let ends_at = t0() + Duration::days(3);

    selector
        .cast_vote(&NewClipVote::free(first, VoterType::Human, "viewer-1"), vote_time())
        .unwrap();
    for (voter, at) in [("viewer-2", ends_at), ("viewer-3", ends_at + Duration::minutes(5))] {
        let err = selector
            .cast_vote(&NewClipVote::free(second, VoterType::Human, voter), at)
            .unwrap_err();
        assert!(matches!(err, ClipError::VotingClosed { .. }), "{err}");
    }
    assert_eq!(studio.store.fetch_variant(second).unwrap().unwrap().vote_count, 0);

    let manager = VotingPeriodManager::new(studio.store.clone(), studio.scheduler.clone(), 16);
    let report = manager.close_expired(ends_at + Duration::minutes(10)).unwrap();
    let PeriodResolution::ClipSelection { series } = &report.processed[0].resolution else {
        panic!("expected clip selection");
    };
    assert_eq!(series[0].selected_variant_id.as_deref(), Some(first.as_str()));
    assert_eq!(series[0].vote_count, 1);
}

#[tokio::test]
async fn concurrent_tip_confirmations_settle_once() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(UnconfiguredTransferClient));
    register_owners(&engine);
    let selector = selector(&studio, &engine);

    let mut unconfirmed = tip(&studio.variant_ids[0], "viewer-1", 33);
    unconfirmed.payer_reference = None;
    let vote_id = selector.cast_vote(&unconfirmed, vote_time()).unwrap().vote.id;
    let event = TipEvent {
        clip_vote_id: vote_id.clone(),
        amount_cents: 33,
        payer_reference: "charge-1".into(),
    };

    let reports: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| engine.handle_tip(&event, vote_time()).unwrap()))
            .collect();
        workers.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    assert_eq!(reports.iter().filter(|report| !report.is_noop()).count(), 1);

    let payouts = studio
        .store
        .list_payouts(&PayoutFilter {
            clip_vote_id: Some(vote_id),
            ..PayoutFilter::default()
        })
        .unwrap();
    assert_eq!(payouts.len(), 3);
    assert_eq!(payouts.iter().map(|payout| payout.amount_cents).sum::<i64>(), 33);
    assert!(studio.store.list_unclaimed(false).unwrap().is_empty());
}

#[tokio::test]
async fn transfer_batch_continues_past_a_row_it_cannot_record() {
    let studio = studio_in_clip_vote().await;
    let engine = engine(&studio, Arc::new(RejectingRail { reject_wallet: "wallet-none" }));
    register_owners(&engine);
    selector(&studio, &engine)
        .cast_vote(&tip(&studio.variant_ids[0], "viewer-1", 25), vote_time())
        .unwrap();

    let conn = rusqlite::Connection::open(studio.store.path()).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER hold_creator BEFORE UPDATE OF status ON payouts
         WHEN NEW.status = 'completed' AND NEW.recipient_type = 'creator'
         BEGIN SELECT RAISE(ABORT, 'ledger locked'); END;",
    )
    .unwrap();

    let first = engine
        .dispatch_transfers(vote_time() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(first.claimed, 3);
    assert_eq!(first.completed, 2);
    assert_eq!(first.errors, 1);

    conn.execute_batch("DROP TRIGGER hold_creator;").unwrap();
    let held = engine
        .dispatch_transfers(vote_time() + Duration::minutes(2))
        .await
        .unwrap();
    assert_eq!(held.claimed, 0);

    let retry = engine
        .dispatch_transfers(vote_time() + Duration::minutes(12))
        .await
        .unwrap();
    assert_eq!(retry.completed, 1);
    let pending = studio
        .store
        .list_payouts(&PayoutFilter {
            status: Some(PayoutStatus::Pending),
            ..PayoutFilter::default()
        })
        .unwrap();
    assert!(pending.is_empty());
}
