//! Commands sent to switch agents ("speakers") and their responses.

use common::{CommandId, Cookie, FlowId, MeterId, PathId, Recoverable, SwitchId};
use serde::{Deserialize, Serialize};

/// Correlation data inherited from the request that started an operation.
///
/// The correlation id doubles as the history task id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandContext {
    pub correlation_id: String,
}

impl CommandContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }

    /// Derives a child context, e.g. for a reroute triggered by a delete.
    pub fn fork(&self, suffix: &str) -> Self {
        Self::new(format!("{} : {suffix}", self.correlation_id))
    }
}

/// What the speaker should do with a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeakerAction {
    Install,
    Remove,
    /// Report the rule as actually installed so it can be compared.
    Verify,
}

impl std::fmt::Display for SpeakerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpeakerAction::Install => "install",
            SpeakerAction::Remove => "remove",
            SpeakerAction::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Position of a rule along a flow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentKind {
    /// First switch; matches customer traffic and applies the meter.
    Ingress,
    /// Intermediate switch; forwards on the transit vlan.
    Transit,
    /// Last switch; restores the customer vlan.
    Egress,
    /// Both endpoints on one switch.
    OneSwitch,
}

impl SegmentKind {
    /// Returns true for rules that accept customer traffic.
    pub fn is_ingress(&self) -> bool {
        matches!(self, SegmentKind::Ingress | SegmentKind::OneSwitch)
    }
}

/// Which rules of a flow an action addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    All,
    Ingress,
    NonIngress,
}

impl RuleScope {
    pub fn includes(&self, kind: SegmentKind) -> bool {
        match self {
            RuleScope::All => true,
            RuleScope::Ingress => kind.is_ingress(),
            RuleScope::NonIngress => !kind.is_ingress(),
        }
    }
}

/// Description of one forwarding rule of a flow path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSegmentRule {
    pub flow_id: FlowId,
    pub path_id: PathId,
    pub cookie: Cookie,
    pub kind: SegmentKind,
    pub in_port: u32,
    pub out_port: u32,
    /// Customer vlan matched on ingress (0 = untagged).
    pub in_vlan: u16,
    /// Customer vlan pushed on egress (0 = untagged).
    pub out_vlan: u16,
    pub transit_vlan: Option<u16>,
    pub bandwidth: u64,
    pub meter_id: Option<MeterId>,
}

/// A command for one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerCommand {
    pub command_id: CommandId,
    pub context: CommandContext,
    pub switch_id: SwitchId,
    pub action: SpeakerAction,
    pub rule: FlowSegmentRule,
}

impl SpeakerCommand {
    pub fn new(
        context: CommandContext,
        switch_id: SwitchId,
        action: SpeakerAction,
        rule: FlowSegmentRule,
    ) -> Self {
        Self {
            command_id: CommandId::new(),
            context,
            switch_id,
            action,
            rule,
        }
    }

    /// A new command, with a fresh id, acting on the same rule.
    pub fn with_action(&self, action: SpeakerAction) -> Self {
        Self::new(self.context.clone(), self.switch_id, action, self.rule.clone())
    }

    pub fn to_verify(&self) -> Self {
        self.with_action(SpeakerAction::Verify)
    }

    pub fn to_remove(&self) -> Self {
        self.with_action(SpeakerAction::Remove)
    }
}

/// Failure reasons reported by a speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeakerErrorCode {
    SwitchUnavailable,
    Timeout,
    Transport,
    Unknown,
    RuleRejected,
    MissingOf,
    InvalidRequest,
    NotFound,
}

impl Recoverable for SpeakerErrorCode {
    /// Transport-level failures may succeed on re-send; rejections by the
    /// switch will not.
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SpeakerErrorCode::SwitchUnavailable
                | SpeakerErrorCode::Timeout
                | SpeakerErrorCode::Transport
                | SpeakerErrorCode::Unknown
        )
    }
}

impl std::fmt::Display for SpeakerErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A speaker's answer to a [`SpeakerCommand`], echoing its command id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerResponse {
    pub command_id: CommandId,
    pub context: CommandContext,
    pub switch_id: SwitchId,
    pub success: bool,
    pub error_code: Option<SpeakerErrorCode>,
    pub description: Option<String>,
    /// The rule as found on the switch, for verify commands.
    pub rule: Option<FlowSegmentRule>,
}

impl SpeakerResponse {
    /// A success response to `command`; verify commands report the rule
    /// exactly as requested.
    pub fn success(command: &SpeakerCommand) -> Self {
        let rule = (command.action == SpeakerAction::Verify).then(|| command.rule.clone());
        Self {
            command_id: command.command_id,
            context: command.context.clone(),
            switch_id: command.switch_id,
            success: true,
            error_code: None,
            description: None,
            rule,
        }
    }

    /// A success response to a verify command reporting `actual`.
    pub fn verified(command: &SpeakerCommand, actual: FlowSegmentRule) -> Self {
        Self {
            rule: Some(actual),
            ..Self::success(command)
        }
    }

    pub fn error(
        command: &SpeakerCommand,
        code: SpeakerErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self {
            command_id: command.command_id,
            context: command.context.clone(),
            switch_id: command.switch_id,
            success: false,
            error_code: Some(code),
            description: Some(description.into()),
            rule: None,
        }
    }

    /// Returns true if re-sending the command may succeed.
    pub fn is_recoverable(&self) -> bool {
        self.error_code
            .unwrap_or(SpeakerErrorCode::Unknown)
            .is_recoverable()
    }

    /// Human-readable failure text.
    pub fn error_text(&self) -> String {
        let code = self.error_code.unwrap_or(SpeakerErrorCode::Unknown);
        match &self.description {
            Some(description) => format!("{code}: {description}"),
            None => code.to_string(),
        }
    }
}
