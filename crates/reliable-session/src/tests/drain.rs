//! Drain (ordered replay) tests.
//!
//! - Replay order equals insertion order, one package in flight
//! - Failed replays: re-appended at the tail or retained in place
//! - Rejected and unreadable packages leave the queue
//! - Losing reachability pauses the drain
//! - A flap or an explicit trigger never runs two drains at once
//! - A reconnect during a running drain drains again afterwards

use super::harness::{config, next_event, next_events, Reply, TestSession};
use crate::{
    DrainHalt, ReachabilityStatus, ReplayOutcome, RequeuePolicy, SessionError, TransportError,
};
use package_store::{queries, PackageStore, StoreExecutor};
use std::time::Duration;

async fn queue(session: &TestSession, paths: &[&str]) -> Vec<crate::PackageId> {
    let mut ids = Vec::new();
    for path in paths {
        let request = session.manager.get(path, None).unwrap();
        let err = session.manager.send(&request).await.unwrap_err();
        ids.push(err.package_id().expect("request should be queued"));
    }
    ids
}

#[tokio::test]
async fn drain_replays_in_insertion_order_one_at_a_time() {
    let session = TestSession::new(ReachabilityStatus::Unreachable).await;
    queue(&session, &["/p1", "/p2", "/p3"]).await;
    session.transport.set_delay(Duration::from_millis(20));

    let mut replays = session.manager.subscribe_replays();
    session.reachability.set_reachable();
    let events = next_events(&mut replays, 3).await;

    assert_eq!(session.transport.sent_paths(), vec!["/p1", "/p2", "/p3"]);
    assert_eq!(session.transport.max_in_flight(), 1);
    assert!(events
        .iter()
        .all(|e| matches!(e.outcome, ReplayOutcome::Delivered(_))));
    let replayed: Vec<_> = events
        .iter()
        .map(|e| e.request.as_ref().unwrap().url().path().to_string())
        .collect();
    assert_eq!(replayed, vec!["/p1", "/p2", "/p3"]);
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn enumeration_does_not_consume() {
    let session = TestSession::new(ReachabilityStatus::Unreachable).await;
    queue(&session, &["/p1", "/p2", "/p3"]).await;

    assert_eq!(session.stored_paths().await, vec!["/p1", "/p2", "/p3"]);
    assert_eq!(session.stored_paths().await, vec!["/p1", "/p2", "/p3"]);

    let mut first = Vec::new();
    session
        .manager
        .enumerate_packages(|p| {
            first.push(p.request.url().path().to_string());
            std::ops::ControlFlow::Break(())
        })
        .await
        .unwrap();
    assert_eq!(first, vec!["/p1"]);
    assert_eq!(session.pending().await, 3);
}

#[tokio::test]
async fn failed_replay_moves_to_tail() {
    let session = TestSession::new(ReachabilityStatus::Reachable).await;
    session.transport.set_default_reply(Reply::refused());
    let ids = queue(&session, &["/a", "/b"]).await;

    session.transport.set_default_reply(Reply::Status(200));
    session.transport.script([Reply::refused()]);
    let mut replays = session.manager.subscribe_replays();

    let report = session.drain().await;
    assert_eq!(report.requeued, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.halted, None);

    let events = next_events(&mut replays, 2).await;
    assert_eq!(events[0].package_id, ids[0]);
    let new_id = match &events[0].outcome {
        ReplayOutcome::Requeued { new_id, error } => {
            assert!(matches!(error, TransportError::Connect(_)));
            *new_id
        }
        other => panic!("expected Requeued, got {other:?}"),
    };
    assert!(new_id > ids[1]);
    assert!(matches!(events[1].outcome, ReplayOutcome::Delivered(_)));

    let mut stored = Vec::new();
    session
        .manager
        .enumerate_packages(|p| {
            stored.push((p.id, p.request.url().path().to_string(), p.replay_attempts));
            std::ops::ControlFlow::Continue(())
        })
        .await
        .unwrap();
    assert_eq!(stored, vec![(new_id, "/a".to_string(), 1)]);

    // The re-queued package is not retried within the same drain.
    assert_eq!(session.transport.sent_paths(), vec!["/a", "/b", "/a", "/b"]);

    let report = session.drain().await;
    assert_eq!(report.delivered, 1);
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn in_place_policy_keeps_order_and_stops() {
    let mut cfg = config();
    cfg.requeue_policy = RequeuePolicy::InPlace;
    let session = TestSession::with_config(cfg, ReachabilityStatus::Reachable).await;
    assert_eq!(session.manager.requeue_policy(), RequeuePolicy::InPlace);

    session.transport.set_default_reply(Reply::refused());
    let ids = queue(&session, &["/a", "/b"]).await;
    let sends_before = session.transport.send_count();

    let mut replays = session.manager.subscribe_replays();
    let report = session.drain().await;

    assert_eq!(report.halted, Some(DrainHalt::Retained));
    assert_eq!(report.requeued, 0);
    assert_eq!(session.transport.send_count(), sends_before + 1);

    let event = next_event(&mut replays).await;
    assert_eq!(event.package_id, ids[0]);
    assert!(matches!(event.outcome, ReplayOutcome::Retained { .. }));

    let mut stored_ids = Vec::new();
    session
        .manager
        .enumerate_packages(|p| {
            stored_ids.push(p.id);
            std::ops::ControlFlow::Continue(())
        })
        .await
        .unwrap();
    assert_eq!(stored_ids, ids);

    session.transport.set_default_reply(Reply::Status(204));
    let report = session.drain().await;
    assert_eq!(report.delivered, 2);
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn rejected_replay_is_removed_not_requeued() {
    let session = TestSession::new(ReachabilityStatus::Reachable).await;
    session.transport.set_default_reply(Reply::refused());
    queue(&session, &["/orders"]).await;

    session.transport.set_default_reply(Reply::Status(409));
    let mut replays = session.manager.subscribe_replays();
    let report = session.drain().await;

    assert_eq!(report.rejected, 1);
    assert_eq!(report.removed(), 1);
    match next_event(&mut replays).await.outcome {
        ReplayOutcome::Rejected(response) => assert_eq!(response.status, 409),
        other => panic!("expected Rejected, got {other:?}"),
    }
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn unsendable_replay_is_discarded() {
    let session = TestSession::new(ReachabilityStatus::Reachable).await;
    session.transport.set_default_reply(Reply::refused());
    queue(&session, &["/a", "/b"]).await;

    session.transport.set_default_reply(Reply::Status(200));
    session
        .transport
        .script([Reply::Fail(TransportError::Body("file gone".into()))]);
    let report = session.drain().await;

    assert_eq!(report.discarded, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn corrupt_package_is_discarded_without_losing_others() {
    let executor = StoreExecutor::open_in_memory().await.unwrap();
    let store = PackageStore::new(executor.clone(), "orders");
    let builder = crate::RequestBuilder::new(
        Some(url::Url::parse(super::harness::BASE_URL).unwrap()),
        Default::default(),
    );

    store
        .append(&builder.build(crate::Method::Get, "/first", None).unwrap())
        .await
        .unwrap();
    executor
        .call(|conn| queries::insert_package(conn, "orders", "{\"method\":", 0))
        .await
        .unwrap();
    store
        .append(&builder.build(crate::Method::Get, "/last", None).unwrap())
        .await
        .unwrap();

    let session =
        TestSession::with_executor(config(), ReachabilityStatus::Unreachable, executor).await;
    assert_eq!(session.pending().await, 3);
    assert_eq!(session.stored_paths().await, vec!["/first", "/last"]);

    let mut replays = session.manager.subscribe_replays();
    session.reachability.set_reachable();
    let events = next_events(&mut replays, 3).await;

    assert!(matches!(events[0].outcome, ReplayOutcome::Delivered(_)));
    assert!(events[1].request.is_none());
    assert!(matches!(events[1].outcome, ReplayOutcome::Discarded { .. }));
    assert!(matches!(events[2].outcome, ReplayOutcome::Delivered(_)));
    assert_eq!(session.transport.sent_paths(), vec!["/first", "/last"]);
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn drain_pauses_when_reachability_drops() {
    let session = TestSession::new(ReachabilityStatus::Unreachable).await;
    queue(&session, &["/p1", "/p2", "/p3"]).await;

    let reachability = session.reachability.clone();
    session.transport.on_send(move |n| {
        if n == 1 {
            reachability.set_unreachable();
        }
    });

    let mut replays = session.manager.subscribe_replays();
    session.reachability.set_reachable();
    let event = next_event(&mut replays).await;
    assert!(matches!(event.outcome, ReplayOutcome::Delivered(_)));

    // Waits for the listener's drain to release the lock.
    let report = session.drain().await;
    assert_eq!(report.halted, Some(DrainHalt::Unreachable));
    assert_eq!(report.removed(), 0);
    assert_eq!(session.transport.send_count(), 1);
    assert_eq!(session.stored_paths().await, vec!["/p2", "/p3"]);

    session.reachability.set_reachable();
    next_events(&mut replays, 2).await;
    assert_eq!(session.transport.sent_paths(), vec!["/p1", "/p2", "/p3"]);
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn flap_during_drain_does_not_start_second_drain() {
    let session = TestSession::new(ReachabilityStatus::Unreachable).await;
    queue(&session, &["/p1", "/p2", "/p3", "/p4"]).await;
    session.transport.set_delay(Duration::from_millis(30));

    let reachability = session.reachability.clone();
    session.transport.on_send(move |n| {
        if n == 2 {
            reachability.set_unreachable();
            reachability.set_reachable();
        }
    });

    let mut replays = session.manager.subscribe_replays();
    session.reachability.set_reachable();
    next_event(&mut replays).await;

    // A drain is running; an explicit trigger must not start another.
    assert!(session.manager.drain_now().await.unwrap().is_none());

    next_events(&mut replays, 3).await;
    assert_eq!(session.transport.max_in_flight(), 1);
    assert_eq!(
        session.transport.sent_paths(),
        vec!["/p1", "/p2", "/p3", "/p4"]
    );
    assert_eq!(session.pending().await, 0);
}

#[tokio::test]
async fn reconnect_during_explicit_drain_replays_new_packages() {
    let session = TestSession::new(ReachabilityStatus::Reachable).await;
    session.transport.script([Reply::refused()]);
    let request = session.manager.get("/p1", None).unwrap();
    assert!(session.manager.send(&request).await.unwrap_err().is_queued());

    session.transport.set_delay(Duration::from_millis(200));
    let mut replays = session.manager.subscribe_replays();

    let outage = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.reachability.set_unreachable();
        let request = session.manager.get("/p2", None).unwrap();
        let err = session.manager.send(&request).await.unwrap_err();
        assert!(matches!(err, SessionError::Queued { .. }));
        session.reachability.set_reachable();
    };
    let (report, ()) = tokio::join!(session.manager.drain_now(), outage);

    // The explicit drain only replays what was stored when it started.
    let report = report.unwrap().unwrap();
    assert_eq!(report.delivered, 1);

    // The reconnect drains again once the explicit drain is done.
    let events = next_events(&mut replays, 2).await;
    assert!(events
        .iter()
        .all(|e| matches!(e.outcome, ReplayOutcome::Delivered(_))));
    assert_eq!(session.transport.sent_paths(), vec!["/p1", "/p1", "/p2"]);
    assert_eq!(session.pending().await, 0);
    assert_eq!(session.transport.max_in_flight(), 1);
}

#[tokio::test]
async fn drain_on_empty_store_is_a_no_op() {
    let session = TestSession::new(ReachabilityStatus::Reachable).await;
    let report = session.drain().await;
    assert_eq!(report, crate::DrainReport::default());
    assert_eq!(session.transport.send_count(), 0);
}

#[tokio::test]
async fn explicit_drain_respects_unreachable() {
    let session = TestSession::new(ReachabilityStatus::Unreachable).await;
    queue(&session, &["/p1"]).await;

    let report = session.drain().await;
    assert_eq!(report.halted, Some(DrainHalt::Unreachable));
    assert_eq!(session.transport.send_count(), 0);
    assert_eq!(session.pending().await, 1);
}
