// Rule manager - ordered rule sets per voice role
// Applies enabled rules note by note and keeps per-rule statistics

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::context::InterpretationContext;
use super::params::RuleParams;
use super::rule::{NoteCursor, Rule, RuleKind};
use crate::config::ConfigError;
use crate::model::{Note, VoiceRole};
use crate::pipeline::{Stage, TraceBuilder, TraceSink};

/// Override of one rule from the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverride {
    /// Replaces the enabled flag when present
    pub enabled: Option<bool>,

    /// Merged over the rule's default parameters
    pub params: RuleParams,
}

/// Rule overrides grouped by role, keyed by rule name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub melody: BTreeMap<String, RuleOverride>,
    pub bass: BTreeMap<String, RuleOverride>,
    pub inner: BTreeMap<String, RuleOverride>,
}

impl RulesConfig {
    fn by_role(&self) -> [(VoiceRole, &BTreeMap<String, RuleOverride>); 3] {
        [
            (VoiceRole::Melody, &self.melody),
            (VoiceRole::Bass, &self.bass),
            (VoiceRole::Inner, &self.inner),
        ]
    }
}

/// Application and failure counts, keyed `role.rule`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub applications: BTreeMap<String, usize>,
    pub failures: BTreeMap<String, usize>,
    pub total_applications: usize,
    pub total_failures: usize,
}

impl RuleStats {
    fn key(kind: RuleKind) -> String {
        format!("{}.{}", kind.role().as_str(), kind.name())
    }

    fn record_application(&mut self, kind: RuleKind) {
        *self.applications.entry(Self::key(kind)).or_insert(0) += 1;
        self.total_applications += 1;
    }

    fn record_failure(&mut self, kind: RuleKind) {
        *self.failures.entry(Self::key(kind)).or_insert(0) += 1;
        self.total_failures += 1;
    }

    /// Applications of one rule
    pub fn applications_of(&self, kind: RuleKind) -> usize {
        self.applications.get(&Self::key(kind)).copied().unwrap_or(0)
    }

    /// Failures of one rule
    pub fn failures_of(&self, kind: RuleKind) -> usize {
        self.failures.get(&Self::key(kind)).copied().unwrap_or(0)
    }
}

/// Holds the melody, bass and inner rule sets in registration order
#[derive(Debug, Clone)]
pub struct RuleManager {
    melody: Vec<Rule>,
    bass: Vec<Rule>,
    inner: Vec<Rule>,
    stats: RuleStats,
}

impl RuleManager {
    /// Full catalogue with default parameters, all enabled
    pub fn new() -> Self {
        let build = |role: VoiceRole| -> Vec<Rule> {
            RuleKind::for_role(role).iter().map(|&k| Rule::new(k)).collect()
        };
        RuleManager {
            melody: build(VoiceRole::Melody),
            bass: build(VoiceRole::Bass),
            inner: build(VoiceRole::Inner),
            stats: RuleStats::default(),
        }
    }

    /// Catalogue with configuration overrides applied
    pub fn from_config(config: &RulesConfig) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        for (role, overrides) in config.by_role() {
            for (name, over) in overrides {
                let kind = RuleKind::from_name(role, name).ok_or_else(|| ConfigError::UnknownRule {
                    role: role.as_str().to_string(),
                    name: name.clone(),
                })?;
                if let Some(rule) = manager.rule_mut(kind) {
                    if let Some(enabled) = over.enabled {
                        rule.enabled = enabled;
                    }
                    rule.params.merge(&over.params);
                }
            }
        }
        Ok(manager)
    }

    /// Rules applied to a voice of `role`; unknown voices get none
    pub fn rules_for(&self, role: VoiceRole) -> &[Rule] {
        match role {
            VoiceRole::Melody => &self.melody,
            VoiceRole::Bass => &self.bass,
            VoiceRole::Inner => &self.inner,
            VoiceRole::Unknown => &[],
        }
    }

    fn rules_for_mut(&mut self, role: VoiceRole) -> &mut [Rule] {
        match role {
            VoiceRole::Melody => &mut self.melody,
            VoiceRole::Bass => &mut self.bass,
            VoiceRole::Inner => &mut self.inner,
            VoiceRole::Unknown => &mut [],
        }
    }

    pub fn rule(&self, kind: RuleKind) -> Option<&Rule> {
        self.rules_for(kind.role()).iter().find(|r| r.kind() == kind)
    }

    pub fn rule_mut(&mut self, kind: RuleKind) -> Option<&mut Rule> {
        self.rules_for_mut(kind.role()).iter_mut().find(|r| r.kind() == kind)
    }

    pub fn set_enabled(&mut self, kind: RuleKind, enabled: bool) {
        if let Some(rule) = self.rule_mut(kind) {
            rule.enabled = enabled;
        }
    }

    pub fn disable_all(&mut self) {
        for role in [VoiceRole::Melody, VoiceRole::Bass, VoiceRole::Inner] {
            for rule in self.rules_for_mut(role) {
                rule.enabled = false;
            }
        }
    }

    /// Reset pattern state of the rules for a new voice
    pub fn begin_voice(&mut self, role: VoiceRole) {
        for rule in self.rules_for_mut(role) {
            rule.reset();
        }
    }

    /// Apply every enabled rule of `role` to `notes[index]`
    ///
    /// Returns the number of rules that changed the note. A failing rule
    /// is reported to the sink, counted, and treated as not applied.
    pub fn apply_to_note(
        &mut self,
        role: VoiceRole,
        notes: &mut [Note],
        index: usize,
        ctx: &InterpretationContext,
        rng: &mut impl Rng,
        sink: &mut dyn TraceSink,
    ) -> usize {
        let mut applied = 0;
        let mut outcomes = Vec::new();

        for rule in self.rules_for_mut(role).iter_mut().filter(|r| r.enabled) {
            let result = NoteCursor::new(notes, index).and_then(|mut cursor| rule.apply(&mut cursor, ctx, rng));
            outcomes.push((rule.kind(), result));
        }

        for (kind, result) in outcomes {
            match result {
                Ok(true) => {
                    applied += 1;
                    self.stats.record_application(kind);
                }
                Ok(false) => {}
                Err(e) => {
                    self.stats.record_failure(kind);
                    sink.record(
                        TraceBuilder::stage(Stage::Rules)
                            .warn(format!("Rule {} failed: {}", kind.name(), e))
                            .with_data(json!({
                                "rule": kind.name(),
                                "role": role.as_str(),
                                "note_index": index,
                            })),
                    );
                }
            }
        }

        applied
    }

    pub fn stats(&self) -> &RuleStats {
        &self.stats
    }

    /// Name and description of every rule, for reports
    pub fn catalogue(&self) -> Vec<(VoiceRole, &'static str, &'static str, bool)> {
        [VoiceRole::Melody, VoiceRole::Bass, VoiceRole::Inner]
            .into_iter()
            .flat_map(|role| {
                self.rules_for(role)
                    .iter()
                    .map(move |r| (role, r.name(), r.description(), r.enabled))
            })
            .collect()
    }
}

impl Default for RuleManager {
    fn default() -> Self {
        Self::new()
    }
}
