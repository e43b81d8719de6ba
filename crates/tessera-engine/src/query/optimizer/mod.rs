//! Query optimizer.
//!
//! Searches a space of equivalent plans by applying named rules in ascending
//! level order. Most rules rewrite a plan in place; branching rules add
//! sibling plans. The worklist of candidates is bounded by a plan cap: once
//! it is reached, branching rules stop adding siblings and the truncation is
//! only visible in [`OptimizerStats::plans_truncated`].
//!
//! ## Submodules
//!
//! - [`cardinality`] - Cardinality and cost estimation
//! - [`rules`] - The rule library

pub mod cardinality;
pub mod rules;

pub use cardinality::{CostEstimate, CostEstimator};
pub use rules::{OptimizerRule, RuleContext, RuleEffect};

use crate::config::{Config, DEFAULT_MAX_NUMBER_OF_PLANS, DISABLE_ALL_RULES};
use crate::query::plan::ExecutionPlan;
use serde::Serialize;
use tessera_common::Result;
use tessera_core::StorageEngine;
use tracing::debug;

/// Counters collected during one optimization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizerStats {
    /// Rule applications that modified a plan or created siblings.
    pub rules_executed: u64,
    /// Rule applications skipped because the rule is disabled.
    pub rules_skipped: u64,
    /// Sibling plans created by branching rules.
    pub plans_created: u64,
    /// Branching applications that were cut short by the plan cap.
    pub plans_truncated: u64,
}

/// A surviving plan and its estimate.
#[derive(Debug, Clone)]
pub struct CandidatePlan {
    /// The plan.
    pub plan: ExecutionPlan,
    /// Its estimated cost.
    pub estimate: CostEstimate,
}

/// Result of an optimization: all surviving candidates, cheapest first.
#[derive(Debug, Clone)]
pub struct OptimizedPlans {
    /// Candidates ordered by ascending cost. Ties keep creation order.
    pub candidates: Vec<CandidatePlan>,
    /// Counters.
    pub stats: OptimizerStats,
}

impl OptimizedPlans {
    /// The cheapest candidate.
    #[must_use]
    pub fn best(&self) -> Option<&CandidatePlan> {
        self.candidates.first()
    }

    /// Consumes the result, returning the cheapest plan.
    #[must_use]
    pub fn into_best(self) -> Option<ExecutionPlan> {
        self.candidates.into_iter().next().map(|c| c.plan)
    }
}

/// Rule-based optimizer.
pub struct Optimizer {
    rules: Vec<Box<dyn OptimizerRule>>,
    max_plans: usize,
    disabled: Vec<String>,
    distributed: bool,
}

impl Optimizer {
    /// Creates an optimizer with the default rule library.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: rules::default_rules(),
            max_plans: DEFAULT_MAX_NUMBER_OF_PLANS,
            disabled: Vec::new(),
            distributed: false,
        }
    }

    /// Creates an optimizer configured from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_max_plans(config.max_number_of_plans)
            .with_disabled_rules(config.disabled_rules.iter().cloned())
            .with_distributed(config.distributed)
    }

    /// Sets the plan cap. Values below one are raised to one.
    #[must_use]
    pub fn with_max_plans(mut self, max_plans: usize) -> Self {
        self.max_plans = max_plans.max(1);
        self
    }

    /// Adds rules to the deny-list. Entries may be written `name` or
    /// `-name`; `-all` disables every rule that can be disabled.
    #[must_use]
    pub fn with_disabled_rules<S: Into<String>>(mut self, rules: impl IntoIterator<Item = S>) -> Self {
        self.disabled.extend(rules.into_iter().map(Into::into));
        self
    }

    /// Enables the cluster distribution rule.
    #[must_use]
    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.distributed = distributed;
        self
    }

    /// Adds a rule to the library.
    #[must_use]
    pub fn with_rule(mut self, rule: Box<dyn OptimizerRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Names and levels of the rules, in execution order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<(&'static str, u32)> {
        let mut names: Vec<_> = self.rules.iter().map(|r| (r.name(), r.level())).collect();
        names.sort_by_key(|(_, level)| *level);
        names
    }

    /// Returns true if `rule` is on the deny-list.
    #[must_use]
    pub fn is_disabled(&self, rule: &dyn OptimizerRule) -> bool {
        if !rule.can_be_disabled() {
            return false;
        }
        self.disabled.iter().any(|entry| {
            entry == DISABLE_ALL_RULES
                || entry == rule.name()
                || entry.strip_prefix('-') == Some(rule.name())
        })
    }

    /// Optimizes `plan`.
    ///
    /// A rule that fails aborts the whole optimization.
    pub fn optimize(&self, plan: ExecutionPlan, storage: &dyn StorageEngine) -> Result<OptimizedPlans> {
        let mut stats = OptimizerStats::default();
        let mut order: Vec<&dyn OptimizerRule> = self.rules.iter().map(AsRef::as_ref).collect();
        order.sort_by_key(|r| r.level());

        let mut worklist = vec![plan];
        for rule in order {
            if self.is_disabled(rule) {
                debug!(rule = rule.name(), "rule disabled");
                stats.rules_skipped += 1;
                continue;
            }
            let mut done: Vec<ExecutionPlan> = Vec::with_capacity(worklist.len());
            let mut pending = std::mem::take(&mut worklist).into_iter();
            while let Some(mut candidate) = pending.next() {
                if candidate.last_level() >= rule.level() {
                    done.push(candidate);
                    continue;
                }
                let total = done.len() + pending.len() + 1;
                let mut ctx = RuleContext::new(
                    storage,
                    self.distributed,
                    self.max_plans.saturating_sub(total),
                );
                let effect = rule.apply(&mut candidate, &mut ctx)?;
                if ctx.truncated() {
                    debug!(rule = rule.name(), cap = self.max_plans, "plan cap reached");
                    stats.plans_truncated += 1;
                }
                candidate.set_last_level(rule.level());
                match effect {
                    RuleEffect::Unchanged => done.push(candidate),
                    RuleEffect::Modified => {
                        debug!(rule = rule.name(), "rule fired");
                        candidate.record_rule(rule.name());
                        stats.rules_executed += 1;
                        done.push(candidate);
                    }
                    RuleEffect::Branched(siblings) => {
                        debug!(rule = rule.name(), siblings = siblings.len(), "rule branched");
                        stats.rules_executed += 1;
                        stats.plans_created += siblings.len() as u64;
                        done.push(candidate);
                        for mut sibling in siblings {
                            sibling.record_rule(rule.name());
                            sibling.set_last_level(rule.level());
                            done.push(sibling);
                        }
                    }
                }
            }
            worklist = done;
        }

        let mut estimator = CostEstimator::new();
        for plan in &worklist {
            estimator.observe(plan, storage)?;
        }
        let mut candidates = worklist
            .into_iter()
            .map(|plan| {
                let estimate = plan.estimated_cost(&estimator)?;
                Ok(CandidatePlan { plan, estimate })
            })
            .collect::<Result<Vec<_>>>()?;
        // Stable: on equal cost the earlier candidate wins.
        candidates.sort_by(|a, b| a.estimate.cost.total_cmp(&b.estimate.cost));
        debug!(candidates = candidates.len(), ?stats, "optimization finished");
        Ok(OptimizedPlans { candidates, stats })
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}
