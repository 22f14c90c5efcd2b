use std::{sync::Arc, time::Duration};

use serde_json::json;

use gamemind::{
    completion::{ChatRole, CompletionError, CompletionErrorKind},
    config::DecisionConfig,
    decision::{DecisionError, testing::test_action},
    protocol::{ForceRequest, InboundMessage},
};

use crate::{action_result, default_harness, force_request, harness};

#[tokio::test]
async fn given_forced_jump_when_result_arrives_then_action_is_dispatched_and_recorded() {
    let mut h = default_harness();
    h.orchestrator.register_actions(vec![
        test_action("jump", "Jump.", Some(json!({"type": "object"}))),
        test_action("wait", "Wait.", None),
    ]);
    h.completion
        .push_reply(r#"{"message":"I'll jump","action":"jump"}"#);
    h.completion.push_reply(r#"{"height": 1}"#);

    let orchestrator = Arc::clone(&h.orchestrator);
    let forced = tokio::spawn(async move {
        orchestrator
            .force_decision(force_request("What do you do?", &["jump"], false))
            .await
    });

    let request = h.next_action().await;
    assert_eq!(request.name, "jump");
    h.orchestrator
        .record_result(action_result(&request.id, true, Some("You cleared the gap.")));

    let success = forced.await.expect("join").expect("forced decision should succeed");
    assert!(success);
    assert_eq!(h.emitter.sent().len(), 1);
    assert!(!h.orchestrator.is_forced_pending());

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 2);
    let forced_format = calls[0].format.as_ref().expect("forced call is constrained");
    assert_eq!(forced_format["required"], json!(["message", "action"]));
    assert_eq!(forced_format["properties"]["action"]["enum"], json!(["jump"]));
    let prompt = &calls[0].messages.last().expect("prompt").content;
    assert!(prompt.starts_with("What do you do? "));
    assert!(prompt.contains(r#"Choose one of the following actions: ["jump"]."#));

    let context = h.orchestrator.context_snapshot();
    let contents: Vec<&str> = context.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&r#"{"message":"I'll jump","action":"jump"}"#));
    assert_eq!(contents.last(), Some(&"You cleared the gap."));
}

#[tokio::test]
async fn given_ephemeral_request_then_only_result_message_reaches_context() {
    let mut h = default_harness();
    h.orchestrator
        .register_actions(vec![test_action("run", "Run away.", None)]);
    h.orchestrator.append_context(gamemind::completion::ChatMessage::user("A wolf appears."));
    let before = h.orchestrator.context_snapshot();

    h.completion
        .push_reply(r#"{"message":"Too dangerous","action":"run"}"#);
    h.completion.push_reply("{}");

    let orchestrator = Arc::clone(&h.orchestrator);
    let forced = tokio::spawn(async move {
        orchestrator
            .force_decision(ForceRequest {
                state: Some("hp 2/10".to_string()),
                ..force_request("Fight or flee?", &["run"], true)
            })
            .await
    });
    let request = h.next_action().await;
    h.orchestrator
        .record_result(action_result(&request.id, true, Some("You escaped.")));
    assert!(forced.await.expect("join").expect("forced decision should succeed"));

    let after = h.orchestrator.context_snapshot();
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(&after[..before.len()], before.as_slice());
    assert_eq!(after[before.len()].role, ChatRole::User);
    assert_eq!(after[before.len()].content, "You escaped.");

    let calls = h.completion.calls();
    let forced_prompt = &calls[0].messages.last().expect("prompt").content;
    assert!(forced_prompt.starts_with("The current state of the game is: hp 2/10. Fight or flee?"));
    assert!(
        calls[1]
            .messages
            .iter()
            .any(|m| m.content == r#"{"message":"Too dangerous","action":"run"}"#),
        "dispatch runs on the ephemeral basis"
    );
}

#[tokio::test(start_paused = true)]
async fn given_bad_replies_when_forced_then_prompt_is_retried_until_valid() {
    let mut h = default_harness();
    h.orchestrator
        .register_actions(vec![test_action("jump", "", None)]);
    h.completion.push_reply("no idea");
    h.completion.push_failure(CompletionError::new(
        CompletionErrorKind::Timeout,
        "engine timed out",
    ));
    h.completion.push_reply(r#"{"message":"fine","action":"jump"}"#);
    h.completion.push_reply("{}");

    let orchestrator = Arc::clone(&h.orchestrator);
    let forced = tokio::spawn(async move {
        orchestrator
            .force_decision(force_request("Now!", &["jump"], false))
            .await
    });
    let request = h.next_action().await;
    h.orchestrator
        .record_result(action_result(&request.id, true, None));
    assert!(forced.await.expect("join").expect("third attempt is valid"));

    let calls = h.completion.calls();
    assert_eq!(calls.len(), 4);
    let gap = calls[1].started_at - calls[0].started_at;
    assert_eq!(gap, Duration::from_millis(250));

    let prompts = h
        .orchestrator
        .context_snapshot()
        .iter()
        .filter(|m| m.content.starts_with("Now! "))
        .count();
    assert_eq!(prompts, 3, "each attempt appends its prompt to the live context");
}

#[tokio::test(start_paused = true)]
async fn given_attempt_limit_when_model_never_chooses_then_forced_decision_gives_up() {
    let h = harness(DecisionConfig {
        force_max_attempts: Some(2),
        ..DecisionConfig::default()
    });
    h.orchestrator
        .register_actions(vec![test_action("jump", "", None)]);
    h.completion.push_reply(r#"{"message":"hmm"}"#);
    h.completion
        .push_reply(r#"{"message":"hmm","action":"dance"}"#);

    let err = h
        .orchestrator
        .force_decision(force_request("Now!", &["jump"], false))
        .await
        .expect_err("no valid choice");

    assert!(matches!(
        err,
        DecisionError::ForceAttemptsExhausted { attempts: 2, ref last }
            if matches!(**last, DecisionError::MalformedModelReply { .. })
    ));
    assert!(!h.orchestrator.is_forced_pending());
    assert!(!h.orchestrator.is_responding());
    assert!(h.emitter.sent().is_empty());
}

#[tokio::test]
async fn given_choice_of_unregistered_action_then_dispatch_fails_once_without_retry() {
    let h = default_harness();
    h.orchestrator
        .register_actions(vec![test_action("jump", "", None)]);
    h.completion
        .push_reply(r#"{"message":"off I go","action":"fly"}"#);

    let err = h
        .orchestrator
        .force_decision(force_request("Move.", &["fly"], false))
        .await
        .expect_err("fly is not registered");

    assert!(matches!(err, DecisionError::ActionNotFound(ref name) if name == "fly"));
    assert_eq!(h.completion.call_count(), 1);
    assert!(!h.orchestrator.is_forced_pending());
}

#[tokio::test]
async fn given_force_message_when_handled_inbound_then_results_keep_flowing() {
    let mut h = default_harness();
    h.orchestrator
        .handle_inbound(InboundMessage::RegisterActions {
            actions: vec![test_action("jump", "", None)],
        });
    h.completion
        .push_reply(r#"{"message":"jumping","action":"jump"}"#);
    h.completion.push_reply("{}");

    h.orchestrator
        .handle_inbound(InboundMessage::ForceActions(force_request(
            "Jump?",
            &["jump"],
            false,
        )));
    let request = h.next_action().await;
    h.orchestrator
        .handle_inbound(InboundMessage::ActionResult(action_result(
            &request.id,
            true,
            Some("Jumped."),
        )));

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.orchestrator.is_forced_pending() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("forced task should finish");
    let context = h.orchestrator.context_snapshot();
    assert_eq!(context.last().map(|m| m.content.as_str()), Some("Jumped."));
}
