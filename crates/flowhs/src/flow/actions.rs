//! Rule processing actions reused by all flow machines.

use std::sync::Arc;

use async_trait::async_trait;
use network::NetworkStore;

use super::{FlowContext, FlowEvent, FlowProcessingFsm};
use crate::error::{FlowProcessingError, Result};
use crate::fsm::Action;
use crate::ledger::{Completion, ErrorOutcome};
use crate::speaker::{RuleScope, SpeakerAction, SpeakerCommand, SpeakerResponse};
use crate::validation::{IngressRulesValidator, NonIngressRulesValidator, RulesValidator};

fn speaker_response<C: FlowContext>(context: &C) -> Result<SpeakerResponse> {
    context
        .speaker_response()
        .cloned()
        .ok_or(FlowProcessingError::MissingResponse)
}

fn verb(action: SpeakerAction) -> &'static str {
    match action {
        SpeakerAction::Install => "install",
        SpeakerAction::Remove => "remove",
        SpeakerAction::Verify => "validate",
    }
}

fn failure_summary<M: FlowProcessingFsm>(fsm: &M) -> String {
    fsm.ledger()
        .failures()
        .into_iter()
        .map(|(command, reason)| format!("switch {}: {reason}", command.switch_id))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fires `on_success` once the batch drained cleanly; fails the operation
/// if it drained with failures.
fn on_completion<M: FlowProcessingFsm>(
    fsm: &mut M,
    completion: Completion,
    on_success: FlowEvent,
    action: SpeakerAction,
) {
    match completion {
        Completion::Pending => {}
        Completion::AllSucceeded => {
            tracing::debug!(flow_id = %fsm.flow_id(), %action, "all commands of the batch succeeded");
            fsm.fire(on_success);
        }
        Completion::SomeFailed => {
            let reason = format!(
                "Failed to {} rules of flow {}: {}",
                verb(action),
                fsm.flow_id(),
                failure_summary(fsm)
            );
            tracing::warn!(flow_id = %fsm.flow_id(), %reason, "batch finished with failures");
            fsm.fire_error(reason);
        }
    }
}

/// Handles install and remove responses: records the outcome, re-sends
/// commands that failed recoverably, and fires `completion` once every
/// command of the batch succeeded.
pub struct OnCommandResponseAction {
    completion: FlowEvent,
}

impl OnCommandResponseAction {
    pub fn new(completion: FlowEvent) -> Self {
        Self { completion }
    }

    async fn on_success<M: FlowProcessingFsm>(
        &self,
        fsm: &mut M,
        response: &SpeakerResponse,
    ) -> Result<()> {
        let Some(command) = fsm.ledger().get(response.command_id).cloned() else {
            tracing::warn!(command_id = %response.command_id, "response for unexpected command");
            return Ok(());
        };
        let Some(completion) = fsm.ledger_mut().record_success(response.command_id) else {
            return Ok(());
        };

        let (label, done) = match command.action {
            SpeakerAction::Install => ("Rule installed", "installed on"),
            SpeakerAction::Remove => ("Rule deleted", "removed from"),
            SpeakerAction::Verify => ("Rule is validated", "validated on"),
        };
        let message = format!(
            "Rule {} was {done} switch {}",
            command.rule.cookie, command.switch_id
        );
        tracing::debug!(flow_id = %fsm.flow_id(), "{message}");
        fsm.save_history(label, &message).await;

        on_completion(fsm, completion, self.completion, command.action);
        Ok(())
    }

    async fn on_error<M: FlowProcessingFsm>(
        &self,
        fsm: &mut M,
        response: &SpeakerResponse,
    ) -> Result<()> {
        let outcome = fsm.ledger_mut().record_error(
            response.command_id,
            response.is_recoverable(),
            response.error_text(),
        );

        match outcome {
            ErrorOutcome::Ignored => Ok(()),
            ErrorOutcome::Retry { command, attempt } => {
                let message = format!(
                    "{}. Retrying (attempt {attempt})",
                    failure_message(&command, response)
                );
                tracing::warn!(flow_id = %fsm.flow_id(), command_id = %command.command_id, "{message}");
                metrics::counter!("flowhs_command_retries_total").increment(1);
                fsm.save_history(&format!("Failed to {} rule", verb(command.action)), &message)
                    .await;
                fsm.carrier().send_speaker_request(command).await
            }
            ErrorOutcome::Failed {
                command,
                completion,
            } => {
                let message = failure_message(&command, response);
                tracing::warn!(flow_id = %fsm.flow_id(), command_id = %command.command_id, "{message}");
                fsm.save_history(&format!("Failed to {} rule", verb(command.action)), &message)
                    .await;
                on_completion(fsm, completion, self.completion, command.action);
                Ok(())
            }
        }
    }
}

fn failure_message(command: &SpeakerCommand, response: &SpeakerResponse) -> String {
    let preposition = match command.action {
        SpeakerAction::Remove => "from",
        _ => "on",
    };
    format!(
        "Failed to {} rule {} {preposition} switch {}: {}",
        verb(command.action),
        command.rule.cookie,
        command.switch_id,
        response.error_text()
    )
}

#[async_trait]
impl<M: FlowProcessingFsm> Action<M> for OnCommandResponseAction {
    async fn perform(
        &self,
        _from: M::State,
        _to: M::State,
        _event: M::Event,
        context: &M::Context,
        fsm: &mut M,
    ) -> Result<()> {
        let response = speaker_response(context)?;
        if response.success {
            self.on_success(fsm, &response).await
        } else {
            self.on_error(fsm, &response).await
        }
    }
}

/// Asks the speakers to report the rules installed by the current batch.
///
/// Fires `RulesValidated` straight away when the batch installed nothing
/// within `scope`.
pub struct EmitVerifyCommandsAction {
    scope: RuleScope,
}

impl EmitVerifyCommandsAction {
    pub fn new(scope: RuleScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl<M: FlowProcessingFsm> Action<M> for EmitVerifyCommandsAction {
    async fn perform(
        &self,
        _from: M::State,
        _to: M::State,
        _event: M::Event,
        _context: &M::Context,
        fsm: &mut M,
    ) -> Result<()> {
        let verifies: Vec<_> = fsm
            .ledger()
            .batch()
            .filter(|c| c.action == SpeakerAction::Install && self.scope.includes(c.rule.kind))
            .map(SpeakerCommand::to_verify)
            .collect();

        if verifies.is_empty() {
            fsm.fire(FlowEvent::RulesValidated);
            return Ok(());
        }

        tracing::debug!(flow_id = %fsm.flow_id(), count = verifies.len(), "validating installed rules");
        fsm.emit_commands(verifies).await
    }
}

/// Compares each verify response with the rule that was installed.
///
/// Fires `RulesValidated` when every rule matched and `MissingRuleFound`
/// once all responses are in and any rule is missing or differs.
pub struct ValidateRulesAction {
    store: Arc<dyn NetworkStore>,
}

impl ValidateRulesAction {
    pub fn new(store: Arc<dyn NetworkStore>) -> Self {
        Self { store }
    }

    async fn mismatches(
        &self,
        expected: &SpeakerCommand,
        actual: &SpeakerResponse,
    ) -> Result<Vec<&'static str>> {
        if !expected.rule.kind.is_ingress() {
            return Ok(NonIngressRulesValidator::new(expected, actual).mismatches());
        }
        let tx = self.store.begin().await?;
        let switch = tx.get_switch(expected.switch_id)?;
        Ok(IngressRulesValidator::new(expected, actual, &switch).mismatches())
    }
}

#[async_trait]
impl<M: FlowProcessingFsm> Action<M> for ValidateRulesAction {
    async fn perform(
        &self,
        _from: M::State,
        _to: M::State,
        _event: M::Event,
        context: &M::Context,
        fsm: &mut M,
    ) -> Result<()> {
        let response = speaker_response(context)?;
        let command_id = response.command_id;
        if !fsm.ledger().is_pending(command_id) {
            tracing::warn!(%command_id, "verify response for a command that is not pending");
            return Ok(());
        }
        let Some(expected) = fsm.ledger().get(command_id).cloned() else {
            return Ok(());
        };

        let completion = if response.success {
            let mismatches = self.mismatches(&expected, &response).await?;
            if mismatches.is_empty() {
                let message = format!(
                    "Rule {} has been validated successfully on switch {}",
                    expected.rule.cookie, expected.switch_id
                );
                fsm.save_history("Rule is validated", &message).await;
                fsm.ledger_mut().record_success(command_id)
            } else {
                let fields = mismatches.join(", ");
                let message = format!(
                    "Rule {} is missing on switch {} (mismatched {fields})",
                    expected.rule.cookie, expected.switch_id
                );
                tracing::warn!(flow_id = %fsm.flow_id(), "{message}");
                fsm.save_history("Rule is missing", &message).await;
                fsm.ledger_mut()
                    .record_failure(command_id, format!("mismatched {fields}"))
            }
        } else {
            let message = format!(
                "Failed to validate rule {} on switch {}: {}",
                expected.rule.cookie,
                expected.switch_id,
                response.error_text()
            );
            tracing::warn!(flow_id = %fsm.flow_id(), "{message}");
            fsm.save_history("Rule validation failed", &message).await;
            fsm.ledger_mut()
                .record_failure(command_id, response.error_text())
        };

        match completion {
            Some(Completion::AllSucceeded) => fsm.fire(FlowEvent::RulesValidated),
            Some(Completion::SomeFailed) => {
                let reason = format!(
                    "Missing rules of flow {}: {}",
                    fsm.flow_id(),
                    failure_summary(fsm)
                );
                tracing::warn!(flow_id = %fsm.flow_id(), %reason, "rule validation failed");
                fsm.core_mut().record_error(reason);
                fsm.fire(FlowEvent::MissingRuleFound);
            }
            Some(Completion::Pending) | None => {}
        }
        Ok(())
    }
}
