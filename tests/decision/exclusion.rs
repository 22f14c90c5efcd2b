use std::{sync::Arc, time::Duration};

use gamemind::{
    completion::ChatRole,
    decision::{PeriodicOutcome, SkipReason, testing::test_action},
    protocol::OutboundMessage,
};

use crate::{action_result, default_harness, force_request};

#[tokio::test]
async fn given_periodic_call_in_flight_when_forced_then_forced_call_waits_for_it() {
    let mut h = default_harness();
    h.orchestrator
        .register_actions(vec![test_action("jump", "", None)]);
    let release = h
        .completion
        .push_held_reply(r#"{"message":"thinking","action":"jump"}"#);
    h.completion
        .push_reply(r#"{"message":"forced jump","action":"jump"}"#);
    h.completion.push_reply("{}");

    let orchestrator = Arc::clone(&h.orchestrator);
    let periodic = tokio::spawn(async move { orchestrator.run_periodic_decision().await });
    h.completion.wait_for_calls(1).await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let forced = tokio::spawn(async move {
        orchestrator
            .force_decision(force_request("Jump now?", &["jump"], false))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.is_forced_pending());
    assert!(h.orchestrator.is_responding());
    assert_eq!(h.completion.call_count(), 1, "forced call must wait");
    assert_eq!(h.completion.max_in_flight(), 1);

    release.send(()).expect("periodic call should be held");
    let outcome = periodic.await.expect("join");
    assert!(
        matches!(outcome, PeriodicOutcome::Chosen { ref action, .. } if action == "jump"),
        "unexpected outcome: {outcome:?}"
    );

    let request = h.next_action().await;
    h.orchestrator
        .record_result(action_result(&request.id, true, None));
    assert!(forced.await.expect("join").expect("forced decision should succeed"));

    assert_eq!(h.completion.max_in_flight(), 1);
    assert_eq!(h.emitter.sent().len(), 1, "only the forced choice is dispatched");
    let calls = h.completion.calls();
    assert_eq!(calls.len(), 3);
    let periodic_reply = calls[1]
        .messages
        .iter()
        .find(|m| m.role == ChatRole::Assistant)
        .expect("forced call sees the finished periodic reply");
    assert!(periodic_reply.content.contains("thinking"));
}

#[tokio::test]
async fn given_gate_held_when_several_paths_contend_then_none_starts_a_call() {
    let mut h = default_harness();
    h.orchestrator
        .register_actions(vec![test_action("jump", "", None)]);
    let release = h.completion.push_held_reply("{}");
    h.completion
        .push_reply(r#"{"message":"now","action":"jump"}"#);
    h.completion.push_reply("{}");

    let orchestrator = Arc::clone(&h.orchestrator);
    let dispatch = tokio::spawn(async move { orchestrator.dispatch("jump").await });
    h.completion.wait_for_calls(1).await;

    let orchestrator = Arc::clone(&h.orchestrator);
    let forced = tokio::spawn(async move {
        orchestrator
            .force_decision(force_request("Again?", &["jump"], false))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let outcome = h.orchestrator.run_periodic_decision().await;
    assert!(matches!(
        outcome,
        PeriodicOutcome::Skipped(SkipReason::ForcedPending)
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.orchestrator.is_responding(), "waiters must not clear the gate");
    assert_eq!(h.completion.call_count(), 1);

    release.send(()).expect("dispatch call should be held");
    let first = h.next_action().await;
    h.orchestrator
        .record_result(action_result(&first.id, true, None));
    assert!(dispatch.await.expect("join").expect("dispatch should succeed"));

    let second = h.next_action().await;
    h.orchestrator
        .record_result(action_result(&second.id, true, None));
    assert!(forced.await.expect("join").expect("forced decision should succeed"));
    assert_eq!(h.completion.max_in_flight(), 1);
}

#[tokio::test]
async fn given_forced_pending_when_timer_fires_then_periodic_skips() {
    let mut h = default_harness();
    h.orchestrator
        .register_actions(vec![test_action("jump", "", None)]);
    let release = h
        .completion
        .push_held_reply(r#"{"message":"ok","action":"jump"}"#);
    h.completion.push_reply("{}");

    let orchestrator = Arc::clone(&h.orchestrator);
    let forced = tokio::spawn(async move {
        orchestrator
            .force_decision(force_request("Go?", &["jump"], true))
            .await
    });
    h.completion.wait_for_calls(1).await;

    let outcome = h.orchestrator.run_periodic_decision().await;
    assert!(matches!(
        outcome,
        PeriodicOutcome::Skipped(SkipReason::ForcedPending)
    ));

    release.send(()).expect("forced call should be held");
    let request = h.next_action().await;
    h.orchestrator
        .record_result(action_result(&request.id, true, None));
    assert!(forced.await.expect("join").expect("forced decision should succeed"));
    assert_eq!(h.completion.call_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_concurrent_decisions_then_at_most_one_engine_call_is_in_flight() {
    let mut h = default_harness();
    h.completion.set_latency(Duration::from_millis(5));
    h.orchestrator.register_actions(vec![
        test_action("jump", "", None),
        test_action("wait", "", None),
    ]);
    for _ in 0..16 {
        h.completion
            .push_reply(r#"{"message":"go","action":"jump"}"#);
    }

    let responder = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let mut outbound = std::mem::replace(&mut h.outbound, tokio::sync::mpsc::unbounded_channel().1);
        tokio::spawn(async move {
            while let Some(OutboundMessage::Action(request)) = outbound.recv().await {
                orchestrator.record_result(action_result(&request.id, true, None));
            }
        })
    };

    let mut forced = Vec::new();
    for index in 0..3 {
        let orchestrator = Arc::clone(&h.orchestrator);
        forced.push(tokio::spawn(async move {
            orchestrator
                .force_decision(force_request(&format!("Turn {index}?"), &["jump"], index % 2 == 0))
                .await
        }));
    }
    let mut periodic = Vec::new();
    for _ in 0..2 {
        let orchestrator = Arc::clone(&h.orchestrator);
        periodic.push(tokio::spawn(async move {
            orchestrator.run_periodic_decision().await
        }));
    }

    for task in forced {
        let success = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("forced decision should finish")
            .expect("join")
            .expect("forced decision should succeed");
        assert!(success);
    }
    for task in periodic {
        let outcome = task.await.expect("join");
        assert!(
            !matches!(outcome, PeriodicOutcome::Failed(_)),
            "unexpected outcome: {outcome:?}"
        );
    }

    assert_eq!(h.completion.max_in_flight(), 1);
    assert!(!h.orchestrator.is_responding());
    assert!(!h.orchestrator.is_forced_pending());
    responder.abort();
}
