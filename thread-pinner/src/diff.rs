//! Classifying rules across a reload.

use {
    crate::rule::{AffinityRule, RuleKey, RuleSet},
    std::collections::HashSet,
};

/// What a reload changed.
///
/// A new rule is *changed* when no old rule is field-wise equal to it, which
/// includes brand-new keys. An old rule is *deleted* when no new rule shares
/// its (match type, pattern) key. Everything else is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDiff {
    pub changed: Vec<AffinityRule>,
    pub deleted: Vec<AffinityRule>,
}

impl RuleDiff {
    pub fn compute(old: &RuleSet, new: &RuleSet) -> Self {
        let changed = new
            .rules()
            .iter()
            .filter(|rule| !old.rules().contains(rule))
            .cloned()
            .collect();

        let new_keys: HashSet<RuleKey> = new.rules().iter().map(AffinityRule::key).collect();
        let deleted = old
            .rules()
            .iter()
            .filter(|rule| !new_keys.contains(&rule.key()))
            .cloned()
            .collect();

        Self { changed, deleted }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::build_rule_set,
            rule::{MatchType, RuleConfig},
        },
        std::collections::BTreeMap,
        taskpin_cpu_utils::{CpuSet, Topology},
    };

    fn rules(records: &[(&str, &str)]) -> RuleSet {
        let topology = Topology::from_siblings(
            &(0..8).map(|cpu| (cpu, CpuSet::from([cpu]))).collect(),
            &BTreeMap::new(),
        );
        let records: Vec<RuleConfig> = records
            .iter()
            .map(|(pattern, cpus)| RuleConfig::new(MatchType::ProcessName, *pattern, (*cpus).into()))
            .collect();
        build_rule_set(&records, &topology).unwrap()
    }

    #[test]
    fn test_identical_sets() {
        let old = rules(&[("worker", "0-3"), ("db", "4-7")]);
        assert!(RuleDiff::compute(&old, &old.clone()).is_empty());
    }

    #[test]
    fn test_changed_cpus() {
        let old = rules(&[("worker", "0-3"), ("db", "4-7")]);
        let new = rules(&[("worker", "4-7"), ("db", "4-7")]);
        let diff = RuleDiff::compute(&old, &new);
        assert_eq!(diff.changed, vec![new.rules()[0].clone()]);
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn test_removed_rule() {
        let old = rules(&[("worker", "0-3"), ("db", "4-7")]);
        let new = rules(&[("db", "4-7")]);
        let diff = RuleDiff::compute(&old, &new);
        assert!(diff.changed.is_empty());
        assert_eq!(diff.deleted, vec![old.rules()[0].clone()]);
    }

    #[test]
    fn test_added_rule_and_reorder() {
        let old = rules(&[("worker", "0-3"), ("db", "4-7")]);
        let new = rules(&[("db", "4-7"), ("cache", "2"), ("worker", "0-3")]);
        let diff = RuleDiff::compute(&old, &new);
        assert_eq!(diff.changed, vec![new.rules()[1].clone()]);
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn test_equivalent_cpu_spec_is_unchanged() {
        let old = rules(&[("worker", "0-3")]);
        let new = rules(&[("worker", "0,1,2,3")]);
        assert!(RuleDiff::compute(&old, &new).is_empty());
    }
}
