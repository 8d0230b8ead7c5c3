//! Comparison of expected rules with the rules speakers report.

use network::{Switch, SwitchFeature};

use crate::speaker::{FlowSegmentRule, SpeakerCommand, SpeakerResponse};

/// Checks a verify response against the command that produced it.
pub trait RulesValidator {
    /// Field names that differ; empty when the rule is as expected.
    fn mismatches(&self) -> Vec<&'static str>;

    fn validate(&self) -> bool {
        self.mismatches().is_empty()
    }
}

fn common_mismatches(expected: &FlowSegmentRule, actual: &FlowSegmentRule) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if expected.cookie != actual.cookie {
        fields.push("cookie");
    }
    if expected.in_port != actual.in_port {
        fields.push("in_port");
    }
    if expected.out_port != actual.out_port {
        fields.push("out_port");
    }
    if expected.transit_vlan != actual.transit_vlan {
        fields.push("transit_vlan");
    }
    fields
}

/// Validates ingress and one-switch rules, including the customer vlan and,
/// where the switch supports meters, the meter.
pub struct IngressRulesValidator<'a> {
    expected: &'a SpeakerCommand,
    actual: &'a SpeakerResponse,
    switch: &'a Switch,
}

impl<'a> IngressRulesValidator<'a> {
    pub fn new(expected: &'a SpeakerCommand, actual: &'a SpeakerResponse, switch: &'a Switch) -> Self {
        Self {
            expected,
            actual,
            switch,
        }
    }
}

impl RulesValidator for IngressRulesValidator<'_> {
    fn mismatches(&self) -> Vec<&'static str> {
        let Some(actual) = &self.actual.rule else {
            return vec!["rule"];
        };
        let expected = &self.expected.rule;

        let mut fields = common_mismatches(expected, actual);
        if expected.in_vlan != actual.in_vlan {
            fields.push("in_vlan");
        }
        if self.switch.supports(SwitchFeature::Meters) && expected.meter_id != actual.meter_id {
            fields.push("meter_id");
        }
        fields
    }
}

/// Validates transit and egress rules.
pub struct NonIngressRulesValidator<'a> {
    expected: &'a SpeakerCommand,
    actual: &'a SpeakerResponse,
}

impl<'a> NonIngressRulesValidator<'a> {
    pub fn new(expected: &'a SpeakerCommand, actual: &'a SpeakerResponse) -> Self {
        Self { expected, actual }
    }
}

impl RulesValidator for NonIngressRulesValidator<'_> {
    fn mismatches(&self) -> Vec<&'static str> {
        let Some(actual) = &self.actual.rule else {
            return vec!["rule"];
        };
        let expected = &self.expected.rule;

        let mut fields = common_mismatches(expected, actual);
        if expected.out_vlan != actual.out_vlan {
            fields.push("out_vlan");
        }
        fields
    }
}
