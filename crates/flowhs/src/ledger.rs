//! Correlation of speaker responses with the commands an operation issued.

use std::collections::{HashMap, HashSet};

use common::CommandId;

/// Progress of the current batch after a response was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Responses are still outstanding.
    Pending,
    /// Every command of the batch succeeded.
    AllSucceeded,
    /// The batch drained with at least one failed command.
    SomeFailed,
}

/// Status of one issued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Succeeded,
    Failed,
    /// Failed with a recoverable error after using up its retry budget.
    ExhaustedRetries,
}

/// What to do after a speaker reported an error for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorOutcome<C> {
    /// The id is unknown or no longer pending.
    Ignored,
    /// Send `command` again; it stays pending.
    Retry { command: C, attempt: u32 },
    /// The command is failed for good.
    Failed { command: C, completion: Completion },
}

/// Tracks issued commands, their outcomes and retry counters.
///
/// Commands are issued in batches. Completion is reported only when the
/// pending set of the current batch becomes empty.
#[derive(Debug, Clone)]
pub struct CommandLedger<C> {
    commands: HashMap<CommandId, C>,
    order: Vec<CommandId>,
    batch: Vec<CommandId>,
    pending: HashSet<CommandId>,
    succeeded: HashSet<CommandId>,
    failed: HashMap<CommandId, String>,
    exhausted: HashSet<CommandId>,
    retried: HashMap<CommandId, u32>,
    max_retries: u32,
}

impl<C: Clone> CommandLedger<C> {
    pub fn new(max_retries: u32) -> Self {
        Self {
            commands: HashMap::new(),
            order: Vec::new(),
            batch: Vec::new(),
            pending: HashSet::new(),
            succeeded: HashSet::new(),
            failed: HashMap::new(),
            exhausted: HashSet::new(),
            retried: HashMap::new(),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Starts a new batch. Outcomes of the previous batch are forgotten;
    /// its commands stay retrievable.
    pub fn begin_batch(&mut self) {
        self.batch.clear();
        self.pending.clear();
        self.succeeded.clear();
        self.failed.clear();
        self.exhausted.clear();
        self.retried.clear();
    }

    /// Records `command` as issued and pending in the current batch.
    ///
    /// Returns false, leaving the ledger untouched, if the id was already
    /// issued.
    pub fn issue(&mut self, command_id: CommandId, command: C) -> bool {
        if self.commands.contains_key(&command_id) {
            tracing::warn!(%command_id, "command id issued twice, ignoring");
            return false;
        }
        self.commands.insert(command_id, command);
        self.order.push(command_id);
        self.batch.push(command_id);
        self.pending.insert(command_id);
        true
    }

    /// Marks a pending command as succeeded.
    ///
    /// Returns `None` for unknown or already answered ids.
    pub fn record_success(&mut self, command_id: CommandId) -> Option<Completion> {
        if !self.pending.remove(&command_id) {
            tracing::warn!(%command_id, "success for a command that is not pending, ignoring");
            return None;
        }
        self.succeeded.insert(command_id);
        Some(self.completion())
    }

    /// Marks a pending command as failed without considering a retry.
    pub fn record_failure(
        &mut self,
        command_id: CommandId,
        reason: impl Into<String>,
    ) -> Option<Completion> {
        if !self.pending.remove(&command_id) {
            tracing::warn!(%command_id, "failure for a command that is not pending, ignoring");
            return None;
        }
        self.failed.insert(command_id, reason.into());
        Some(self.completion())
    }

    /// Handles an error response: recoverable errors within the retry
    /// budget keep the command pending and hand it back for re-sending.
    pub fn record_error(
        &mut self,
        command_id: CommandId,
        recoverable: bool,
        reason: impl Into<String>,
    ) -> ErrorOutcome<C> {
        if !self.pending.contains(&command_id) {
            tracing::warn!(%command_id, "error for a command that is not pending, ignoring");
            return ErrorOutcome::Ignored;
        }
        let Some(command) = self.commands.get(&command_id).cloned() else {
            return ErrorOutcome::Ignored;
        };

        let retries = self.retried.entry(command_id).or_insert(0);
        if recoverable && *retries < self.max_retries {
            *retries += 1;
            return ErrorOutcome::Retry {
                command,
                attempt: *retries,
            };
        }

        if recoverable {
            self.exhausted.insert(command_id);
        }
        self.pending.remove(&command_id);
        self.failed.insert(command_id, reason.into());
        ErrorOutcome::Failed {
            command,
            completion: self.completion(),
        }
    }

    /// Progress of the current batch.
    pub fn completion(&self) -> Completion {
        if !self.pending.is_empty() {
            Completion::Pending
        } else if self.failed.is_empty() {
            Completion::AllSucceeded
        } else {
            Completion::SomeFailed
        }
    }

    /// Status of a command of the current batch.
    pub fn status(&self, command_id: CommandId) -> Option<CommandStatus> {
        if self.pending.contains(&command_id) {
            Some(CommandStatus::Pending)
        } else if self.succeeded.contains(&command_id) {
            Some(CommandStatus::Succeeded)
        } else if self.exhausted.contains(&command_id) {
            Some(CommandStatus::ExhaustedRetries)
        } else if self.failed.contains_key(&command_id) {
            Some(CommandStatus::Failed)
        } else {
            None
        }
    }

    pub fn get(&self, command_id: CommandId) -> Option<&C> {
        self.commands.get(&command_id)
    }

    /// Every command ever issued, in issue order.
    pub fn commands(&self) -> impl Iterator<Item = &C> {
        self.order.iter().filter_map(|id| self.commands.get(id))
    }

    /// Commands of the current batch, in issue order.
    pub fn batch(&self) -> impl Iterator<Item = &C> {
        self.batch.iter().filter_map(|id| self.commands.get(id))
    }

    pub fn is_pending(&self, command_id: CommandId) -> bool {
        self.pending.contains(&command_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Failure reasons of the current batch, in issue order.
    pub fn failures(&self) -> Vec<(&C, &str)> {
        self.batch
            .iter()
            .filter_map(|id| {
                let reason = self.failed.get(id)?;
                Some((self.commands.get(id)?, reason.as_str()))
            })
            .collect()
    }

    pub fn retries(&self, command_id: CommandId) -> u32 {
        self.retried.get(&command_id).copied().unwrap_or(0)
    }
}
