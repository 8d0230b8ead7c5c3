//! Builds speaker commands for the rules of a flow path.

use network::{Flow, FlowEndpoint, FlowPath};

use crate::speaker::{
    CommandContext, FlowSegmentRule, RuleScope, SegmentKind, SpeakerAction, SpeakerCommand,
};

/// Turns a flow path into one command per switch rule.
///
/// Rules come out in path order: ingress, transit hops, egress.
#[derive(Debug, Clone)]
pub struct FlowCommandFactory {
    context: CommandContext,
}

impl FlowCommandFactory {
    pub fn new(context: CommandContext) -> Self {
        Self { context }
    }

    /// Commands performing `action` on the rules of `path` within `scope`.
    pub fn build(
        &self,
        flow: &Flow,
        path: &FlowPath,
        action: SpeakerAction,
        scope: RuleScope,
    ) -> Vec<SpeakerCommand> {
        rules_for_path(flow, path)
            .into_iter()
            .filter(|(_, rule)| scope.includes(rule.kind))
            .map(|(switch_id, rule)| {
                SpeakerCommand::new(self.context.clone(), switch_id, action, rule)
            })
            .collect()
    }

    /// Commands for several paths, path by path.
    pub fn build_all<'a>(
        &self,
        flow: &Flow,
        paths: impl IntoIterator<Item = &'a FlowPath>,
        action: SpeakerAction,
        scope: RuleScope,
    ) -> Vec<SpeakerCommand> {
        paths
            .into_iter()
            .flat_map(|path| self.build(flow, path, action, scope))
            .collect()
    }
}

/// Customer endpoints a path enters and leaves through.
fn endpoints(flow: &Flow, path: &FlowPath) -> (FlowEndpoint, FlowEndpoint) {
    if path.cookie.is_reverse() {
        (flow.destination, flow.source)
    } else {
        (flow.source, flow.destination)
    }
}

fn rules_for_path(flow: &Flow, path: &FlowPath) -> Vec<(common::SwitchId, FlowSegmentRule)> {
    let (ingress, egress) = endpoints(flow, path);
    let rule = |kind, in_port, out_port| FlowSegmentRule {
        flow_id: flow.flow_id.clone(),
        path_id: path.path_id,
        cookie: path.cookie,
        kind,
        in_port,
        out_port,
        in_vlan: ingress.vlan,
        out_vlan: egress.vlan,
        transit_vlan: path.transit_vlan,
        bandwidth: path.bandwidth,
        meter_id: None,
    };

    let (Some(first), Some(last)) = (path.segments.first(), path.segments.last()) else {
        let mut one_switch = rule(SegmentKind::OneSwitch, ingress.port, egress.port);
        one_switch.meter_id = path.meter_id;
        return vec![(path.src_switch, one_switch)];
    };

    let mut rules = Vec::with_capacity(path.segments.len() + 1);

    let mut ingress_rule = rule(SegmentKind::Ingress, ingress.port, first.src_port);
    ingress_rule.meter_id = path.meter_id;
    rules.push((path.src_switch, ingress_rule));

    for pair in path.segments.windows(2) {
        rules.push((
            pair[0].dst_switch,
            rule(SegmentKind::Transit, pair[0].dst_port, pair[1].src_port),
        ));
    }

    rules.push((
        path.dst_switch,
        rule(SegmentKind::Egress, last.dst_port, egress.port),
    ));
    rules
}
