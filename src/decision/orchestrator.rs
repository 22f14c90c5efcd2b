use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde_json::Value;

use crate::{
    completion::{ChatMessage, CompletionClient},
    config::DecisionConfig,
    decision::{
        context::ConversationContext,
        error::DecisionError,
        gate::{ResponseGate, RespondingGuard},
        ports::ActionEmitter,
        prompts,
        registry::ActionRegistry,
        rendezvous::{RecordOutcome, ResultRendezvous},
        reply::{self, ActionChoice},
    },
    protocol::{Action, ActionRequest, ActionResult, ForceRequest, InboundMessage, OutboundMessage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Responding,
    ForcedPending,
    NoActions,
}

#[derive(Debug)]
pub enum PeriodicOutcome {
    Skipped(SkipReason),
    /// The model answered without choosing an action.
    NoAction { message: String },
    /// The model picked an action. Periodic choices are reported, never dispatched.
    Chosen { message: String, action: String },
    Failed(DecisionError),
}

/// Where a decision path reads and writes its conversation.
enum ContextBasis {
    Live,
    Ephemeral(Vec<ChatMessage>),
}

struct SharedState {
    registry: ActionRegistry,
    context: ConversationContext,
}

/// Single decision-maker for one game session.
///
/// Both decision paths and the dispatcher go through the same [`ResponseGate`],
/// so at most one completion call is outstanding at any time.
pub struct Orchestrator {
    completion: Arc<dyn CompletionClient>,
    emitter: Arc<dyn ActionEmitter>,
    config: DecisionConfig,
    state: Mutex<SharedState>,
    gate: ResponseGate,
    rendezvous: ResultRendezvous,
    next_action_id: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        emitter: Arc<dyn ActionEmitter>,
        config: DecisionConfig,
    ) -> Self {
        let context = ConversationContext::new(config.system_prompt.clone());
        Self {
            completion,
            emitter,
            config,
            state: Mutex::new(SharedState {
                registry: ActionRegistry::new(),
                context,
            }),
            gate: ResponseGate::new(),
            rendezvous: ResultRendezvous::new(),
            next_action_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Applies one decoded inbound message. Forced decisions run on their own task.
    pub fn handle_inbound(self: &Arc<Self>, message: InboundMessage) {
        tracing::debug!(target: "decision", command = message.command(), "inbound_message");
        match message {
            InboundMessage::Startup { game } => {
                tracing::info!(target: "decision", game = %game, "game_started");
                self.append_context(ChatMessage::user(prompts::startup_message(&game)));
            }
            InboundMessage::Context { message, silent } => {
                tracing::debug!(target: "decision", silent, content = %message, "context_received");
                self.append_context(ChatMessage::user(message));
            }
            InboundMessage::RegisterActions { actions } => self.register_actions(actions),
            InboundMessage::UnregisterActions { action_names } => {
                self.unregister_actions(&action_names)
            }
            InboundMessage::ForceActions(request) => {
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    match orchestrator.force_decision(request).await {
                        Ok(success) => {
                            tracing::info!(target: "decision", success, "forced_decision_completed")
                        }
                        Err(err) => {
                            tracing::warn!(target: "decision", error = %err, "forced_decision_failed")
                        }
                    }
                });
            }
            InboundMessage::ActionResult(result) => {
                self.record_result(result);
            }
        }
    }

    pub fn register_actions(&self, actions: Vec<Action>) {
        let names: Vec<String> = actions.iter().map(|action| action.name.clone()).collect();
        let (replaced, total) = {
            let mut state = self.lock_state();
            let replaced = state.registry.register(actions);
            (replaced, state.registry.len())
        };
        tracing::info!(
            target: "decision",
            actions = ?names,
            replaced,
            total,
            "actions_registered"
        );
    }

    pub fn unregister_actions(&self, names: &[String]) {
        let (removed, total) = {
            let mut state = self.lock_state();
            let removed = state.registry.unregister(names);
            (removed, state.registry.len())
        };
        tracing::info!(
            target: "decision",
            actions = ?names,
            removed,
            total,
            "actions_unregistered"
        );
    }

    pub fn record_result(&self, result: ActionResult) -> RecordOutcome {
        let id = result.id.clone();
        let success = result.success;
        let outcome = self.rendezvous.record_result(result);
        match outcome {
            RecordOutcome::Ignored => tracing::warn!(
                target: "decision",
                action_id = %id,
                "action_result_ignored"
            ),
            _ => tracing::debug!(
                target: "decision",
                action_id = %id,
                success,
                outcome = ?outcome,
                "action_result_recorded"
            ),
        }
        outcome
    }

    pub fn append_context(&self, message: ChatMessage) {
        self.lock_state().context.append(message);
    }

    pub fn context_snapshot(&self) -> Vec<ChatMessage> {
        self.lock_state().context.snapshot()
    }

    pub fn action_names(&self) -> BTreeSet<String> {
        self.lock_state().registry.snapshot_names()
    }

    pub fn is_responding(&self) -> bool {
        self.gate.is_responding()
    }

    pub fn is_forced_pending(&self) -> bool {
        self.gate.has_priority_claim()
    }

    /// One firing of the periodic timer.
    pub async fn run_periodic_decision(&self) -> PeriodicOutcome {
        if self.gate.has_priority_claim() {
            return PeriodicOutcome::Skipped(SkipReason::ForcedPending);
        }
        let names: Vec<String> = self.action_names().into_iter().collect();
        if names.is_empty() {
            return PeriodicOutcome::Skipped(SkipReason::NoActions);
        }
        let Some(guard) = self.gate.try_acquire() else {
            return PeriodicOutcome::Skipped(SkipReason::Responding);
        };

        let mut basis = ContextBasis::Live;
        let prompt = prompts::periodic_prompt(&names, self.config.periodic_prompt.as_deref());
        self.append_to(&mut basis, ChatMessage::user(prompt));
        let shape = prompts::periodic_reply_shape(&names);
        let choice = match self.complete_choice(guard, &mut basis, &shape).await {
            Ok(content) => reply::parse_choice(&content),
            Err(err) => Err(err),
        };

        let ActionChoice { message, action } = match choice {
            Ok(choice) => choice,
            Err(err) => {
                tracing::warn!(target: "decision", error = %err, "periodic_decision_failed");
                return PeriodicOutcome::Failed(err);
            }
        };
        tracing::info!(
            target: "decision",
            message = %message,
            action = ?action,
            "periodic_decision_made"
        );

        match action {
            Some(action) => PeriodicOutcome::Chosen { message, action },
            None => PeriodicOutcome::NoAction { message },
        }
    }

    /// Runs a forced decision to completion and dispatches the chosen action once.
    pub async fn force_decision(&self, request: ForceRequest) -> Result<bool, DecisionError> {
        let _claim = self.gate.claim_priority();
        tracing::info!(
            target: "decision",
            query = %request.query,
            ephemeral = request.ephemeral_context,
            allowed = ?request.action_names,
            "forced_decision_requested"
        );

        let (mut basis, choice) = self.obtain_forced_choice(&request).await?;
        let action = choice.action.unwrap_or_default();
        tracing::info!(
            target: "decision",
            message = %choice.message,
            action = %action,
            "forced_decision_made"
        );
        self.dispatch_on(&mut basis, &action).await
    }

    /// Performs a registered action against the live context.
    pub async fn dispatch(&self, action_name: &str) -> Result<bool, DecisionError> {
        self.dispatch_on(&mut ContextBasis::Live, action_name).await
    }

    async fn obtain_forced_choice(
        &self,
        request: &ForceRequest,
    ) -> Result<(ContextBasis, ActionChoice), DecisionError> {
        let prompt = prompts::forced_prompt(
            request.state.as_deref(),
            &request.query,
            &request.action_names,
        );
        let shape = prompts::forced_reply_shape(&request.action_names);
        let mut ephemeral_base: Option<Vec<ChatMessage>> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let guard = self.gate.acquire().await;
            let mut basis = if request.ephemeral_context {
                let base = ephemeral_base.get_or_insert_with(|| self.context_snapshot());
                ContextBasis::Ephemeral(base.clone())
            } else {
                ContextBasis::Live
            };
            self.append_to(&mut basis, ChatMessage::user(prompt.clone()));

            let outcome = match self.complete_choice(guard, &mut basis, &shape).await {
                Ok(content) => reply::parse_forced_choice(&content, &request.action_names),
                Err(err) => Err(err),
            };
            let err = match outcome {
                Ok(choice) => return Ok((basis, choice)),
                Err(err) => err,
            };

            tracing::warn!(
                target: "decision",
                attempt,
                error = %err,
                "forced_attempt_failed"
            );
            if self
                .config
                .force_max_attempts
                .is_some_and(|max_attempts| attempt >= max_attempts)
            {
                return Err(DecisionError::ForceAttemptsExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            tokio::time::sleep(self.config.force_retry_delay()).await;
        }
    }

    async fn dispatch_on(
        &self,
        basis: &mut ContextBasis,
        action_name: &str,
    ) -> Result<bool, DecisionError> {
        let action = self
            .lock_state()
            .registry
            .get(action_name)
            .cloned()
            .ok_or_else(|| DecisionError::ActionNotFound(action_name.to_string()))?;
        let schema = action
            .schema
            .as_ref()
            .map(|schema| schema.resolve())
            .transpose()
            .map_err(|source| DecisionError::InvalidSchema {
                name: action.name.clone(),
                source,
            })?;

        let guard = self.gate.acquire().await;
        self.append_to(
            basis,
            ChatMessage::user(prompts::dispatch_prompt(&action.name, &action.description)),
        );
        let reply = self.complete(basis, schema.as_ref()).await?;
        self.append_to(basis, reply.clone());
        drop(guard);
        if schema.is_some() {
            reply::ensure_json(&reply.content)?;
        }

        let id = self.next_action_id.fetch_add(1, Ordering::SeqCst).to_string();
        let request = ActionRequest {
            id: id.clone(),
            name: action.name.clone(),
            data: Some(reply.content),
        };
        self.rendezvous.open(&id);
        if let Err(source) = self.emitter.emit(OutboundMessage::Action(request)) {
            self.rendezvous.abandon(&id);
            return Err(DecisionError::Emit { id, source });
        }
        tracing::info!(target: "decision", action_id = %id, action = %action.name, "action_emitted");

        let result = self.wait_for_result(&id).await?;
        tracing::info!(
            target: "decision",
            action_id = %id,
            action = %action.name,
            success = result.success,
            message = ?result.message,
            "action_result_received"
        );
        if let Some(message) = result.message.filter(|message| !message.is_empty()) {
            self.append_context(ChatMessage::user(message));
        }
        Ok(result.success)
    }

    async fn wait_for_result(&self, id: &str) -> Result<ActionResult, DecisionError> {
        let waiting = self.rendezvous.await_result(id);
        let received = match self.config.result_timeout() {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(received) => received,
                Err(_) => {
                    self.rendezvous.abandon(id);
                    return Err(DecisionError::Timeout {
                        id: id.to_string(),
                        waited_ms: duration_ms(limit),
                    });
                }
            },
            None => waiting.await,
        };
        received.map_err(|_| DecisionError::NoResult { id: id.to_string() })
    }

    /// Calls the engine with a choice shape and appends the reply to `basis`.
    /// The gate stays claimed until the reply is in place.
    async fn complete_choice(
        &self,
        _guard: RespondingGuard<'_>,
        basis: &mut ContextBasis,
        shape: &Value,
    ) -> Result<String, DecisionError> {
        let reply = self.complete(basis, Some(shape)).await?;
        let content = reply.content.clone();
        self.append_to(basis, reply);
        Ok(content)
    }

    async fn complete(
        &self,
        basis: &ContextBasis,
        format: Option<&Value>,
    ) -> Result<ChatMessage, DecisionError> {
        let messages = match basis {
            ContextBasis::Live => self.context_snapshot(),
            ContextBasis::Ephemeral(messages) => messages.clone(),
        };
        Ok(self.completion.complete(&messages, format).await?)
    }

    fn append_to(&self, basis: &mut ContextBasis, message: ChatMessage) {
        match basis {
            ContextBasis::Live => self.append_context(message),
            ContextBasis::Ephemeral(messages) => messages.push(message),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
