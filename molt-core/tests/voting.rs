mod common;

use chrono::Duration;
use molt_core::{
    PeriodResolution, PeriodType, PilotStatus, SeriesStatus, VotingError, VotingPeriod,
    VotingPeriodManager,
};
use tempfile::tempdir;

use common::{insert_submission, open_store, scheduler, t0};

#[test]
fn highest_score_wins_and_gets_a_series() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let now = t0();
    store
        .insert_period(&VotingPeriod::new(
            "agents-1",
            PeriodType::AgentVoting,
            now - Duration::days(7),
            now,
        ))
        .unwrap();
    insert_submission(&store, "sub-a", "agents-1", "comedy", 5, now - Duration::days(5));
    insert_submission(&store, "sub-b", "agents-1", "comedy", 3, now - Duration::days(6));

    let manager = VotingPeriodManager::new(store.clone(), scheduler(4, 4), 16);
    let report = manager.close_expired(now + Duration::seconds(1)).unwrap();
    assert_eq!(report.processed.len(), 1);
    assert!(report.failed.is_empty());

    let winner = store.fetch_submission("sub-a").unwrap().unwrap();
    assert_eq!(winner.pilot_status, PilotStatus::Selected);
    let series_id = winner.series_id.expect("selected submission has a series");
    let series = store.fetch_series(&series_id).unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::PilotProducing);
    assert_eq!(series.submission_id, "sub-a");

    let episodes = store.list_episodes(&series_id).unwrap();
    assert_eq!(episodes.len(), 1);
    assert!(episodes[0].is_pilot);
    assert_eq!(store.list_jobs(&episodes[0].id).unwrap().len(), 4);

    let loser = store.fetch_submission("sub-b").unwrap().unwrap();
    assert_eq!(loser.pilot_status, PilotStatus::Rejected);
    assert!(loser.series_id.is_none());

    let period = store.fetch_period("agents-1").unwrap().unwrap();
    assert!(period.is_processed);
    assert!(!period.is_active);
    assert!(period.processed_at.unwrap() >= period.ends_at);

    match &report.processed[0].resolution {
        PeriodResolution::Tally { categories } => {
            assert_eq!(categories.len(), 1);
            assert_eq!(categories[0].winner_id, "sub-a");
            assert_eq!(categories[0].series_id, series_id);
            assert_eq!(categories[0].rejected, vec!["sub-b".to_string()]);
        }
        other => panic!("unexpected resolution {other:?}"),
    }
}

#[test]
fn each_category_gets_its_own_winner() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let now = t0();
    store
        .insert_period(&VotingPeriod::new(
            "agents-1",
            PeriodType::AgentVoting,
            now - Duration::days(7),
            now,
        ))
        .unwrap();
    insert_submission(&store, "sub-c1", "agents-1", "comedy", 2, now - Duration::days(5));
    insert_submission(&store, "sub-d1", "agents-1", "drama", 1, now - Duration::days(5));

    let manager = VotingPeriodManager::new(store.clone(), scheduler(2, 0), 16);
    manager.close_expired(now).unwrap();

    for id in ["sub-c1", "sub-d1"] {
        let submission = store.fetch_submission(id).unwrap().unwrap();
        assert_eq!(submission.pilot_status, PilotStatus::Selected, "{id}");
        assert!(submission.series_id.is_some(), "{id}");
    }
}

#[test]
fn refuses_to_close_a_period_that_has_not_ended() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let now = t0();
    store
        .insert_period(&VotingPeriod::new(
            "agents-1",
            PeriodType::AgentVoting,
            now - Duration::days(7),
            now + Duration::hours(1),
        ))
        .unwrap();
    insert_submission(&store, "sub-a", "agents-1", "comedy", 5, now - Duration::days(5));

    let manager = VotingPeriodManager::new(store.clone(), scheduler(4, 4), 16);
    let err = manager.close_period("agents-1", now).unwrap_err();
    assert!(matches!(err, VotingError::PrematureClose { .. }));

    let report = manager.close_expired(now).unwrap();
    assert!(report.processed.is_empty());

    let period = store.fetch_period("agents-1").unwrap().unwrap();
    assert!(!period.is_processed);
    let submission = store.fetch_submission("sub-a").unwrap().unwrap();
    assert_eq!(submission.pilot_status, PilotStatus::Submitted);
}

#[test]
fn rerunning_close_is_a_no_op() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let now = t0();
    store
        .insert_period(&VotingPeriod::new(
            "agents-1",
            PeriodType::AgentVoting,
            now - Duration::days(7),
            now,
        ))
        .unwrap();
    insert_submission(&store, "sub-a", "agents-1", "comedy", 5, now - Duration::days(5));

    let manager = VotingPeriodManager::new(store.clone(), scheduler(4, 4), 16);
    manager.close_expired(now).unwrap();
    let series_id = store.fetch_submission("sub-a").unwrap().unwrap().series_id;

    let second = manager.close_expired(now + Duration::minutes(5)).unwrap();
    assert!(second.processed.is_empty());
    assert!(manager
        .close_period("agents-1", now + Duration::minutes(5))
        .unwrap()
        .is_none());
    assert_eq!(store.fetch_submission("sub-a").unwrap().unwrap().series_id, series_id);
}

#[test]
fn ties_go_to_the_earliest_submission() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let now = t0();
    store
        .insert_period(&VotingPeriod::new(
            "agents-1",
            PeriodType::AgentVoting,
            now - Duration::days(7),
            now,
        ))
        .unwrap();
    insert_submission(&store, "sub-late", "agents-1", "comedy", 4, now - Duration::days(2));
    insert_submission(&store, "sub-early", "agents-1", "comedy", 4, now - Duration::days(4));

    let manager = VotingPeriodManager::new(store.clone(), scheduler(1, 0), 16);
    manager.close_expired(now).unwrap();

    assert_eq!(
        store.fetch_submission("sub-early").unwrap().unwrap().pilot_status,
        PilotStatus::Selected
    );
    assert_eq!(
        store.fetch_submission("sub-late").unwrap().unwrap().pilot_status,
        PilotStatus::Rejected
    );
}
