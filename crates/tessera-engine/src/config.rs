//! Configuration.
//!
//! [`Config`] holds database-wide defaults; [`QueryOptions`] carries the
//! overrides and bind parameters of a single query and is merged over the
//! defaults when the query is planned.

use std::collections::BTreeMap;
use tessera_common::Value;

/// Default upper bound on the number of candidate plans.
pub const DEFAULT_MAX_NUMBER_OF_PLANS: usize = 128;

/// Default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Rule deny-list entry that disables every rule that can be disabled.
pub const DISABLE_ALL_RULES: &str = "-all";

/// Database configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Upper bound on the number of candidate plans kept by the optimizer.
    pub max_number_of_plans: usize,
    /// Rows per execution batch.
    pub batch_size: usize,
    /// Names of rules that must not run. `"-all"` disables every rule that
    /// can be disabled.
    pub disabled_rules: Vec<String>,
    /// Return every candidate plan from explain instead of only the winner.
    pub all_plans: bool,
    /// Execute collection scans as one partition per shard.
    pub distributed: bool,
    /// Turn execution warnings into errors.
    pub fail_on_warning: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_number_of_plans: DEFAULT_MAX_NUMBER_OF_PLANS,
            batch_size: DEFAULT_BATCH_SIZE,
            disabled_rules: Vec::new(),
            all_plans: false,
            distributed: false,
            fail_on_warning: false,
        }
    }
}

impl Config {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the plan cap. Values below one are raised to one.
    #[must_use]
    pub fn with_max_number_of_plans(mut self, max: usize) -> Self {
        self.max_number_of_plans = max.max(1);
        self
    }

    /// Sets the batch size. Values below one are raised to one.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Adds a rule to the deny-list.
    #[must_use]
    pub fn with_disabled_rule(mut self, rule: impl Into<String>) -> Self {
        self.disabled_rules.push(rule.into());
        self
    }

    /// Enables or disables all-plans explain output.
    #[must_use]
    pub fn with_all_plans(mut self, all_plans: bool) -> Self {
        self.all_plans = all_plans;
        self
    }

    /// Enables or disables partitioned execution.
    #[must_use]
    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.distributed = distributed;
        self
    }

    /// Enables or disables failing on warnings.
    #[must_use]
    pub fn with_fail_on_warning(mut self, fail: bool) -> Self {
        self.fail_on_warning = fail;
        self
    }

    /// Returns this configuration with `options` applied on top.
    #[must_use]
    pub fn merged(&self, options: &QueryOptions) -> Config {
        let mut config = self.clone();
        if let Some(max) = options.max_number_of_plans {
            config.max_number_of_plans = max.max(1);
        }
        if let Some(size) = options.batch_size {
            config.batch_size = size.max(1);
        }
        config
            .disabled_rules
            .extend(options.disabled_rules.iter().cloned());
        if let Some(all_plans) = options.all_plans {
            config.all_plans = all_plans;
        }
        if let Some(distributed) = options.distributed {
            config.distributed = distributed;
        }
        if let Some(fail) = options.fail_on_warning {
            config.fail_on_warning = fail;
        }
        config
    }
}

/// Per-query options and bind parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Values for `@name` bind parameters.
    pub bind_parameters: BTreeMap<String, Value>,
    /// Overrides [`Config::max_number_of_plans`].
    pub max_number_of_plans: Option<usize>,
    /// Overrides [`Config::batch_size`].
    pub batch_size: Option<usize>,
    /// Rules disabled in addition to the configured deny-list.
    pub disabled_rules: Vec<String>,
    /// Overrides [`Config::all_plans`].
    pub all_plans: Option<bool>,
    /// Overrides [`Config::distributed`].
    pub distributed: Option<bool>,
    /// Overrides [`Config::fail_on_warning`].
    pub fail_on_warning: Option<bool>,
}

impl QueryOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a parameter value.
    #[must_use]
    pub fn with_bind_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind_parameters.insert(name.into(), value.into());
        self
    }

    /// Overrides the plan cap.
    #[must_use]
    pub fn with_max_number_of_plans(mut self, max: usize) -> Self {
        self.max_number_of_plans = Some(max);
        self
    }

    /// Overrides the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Disables a rule for this query.
    #[must_use]
    pub fn with_disabled_rule(mut self, rule: impl Into<String>) -> Self {
        self.disabled_rules.push(rule.into());
        self
    }

    /// Requests every candidate plan from explain.
    #[must_use]
    pub fn with_all_plans(mut self, all_plans: bool) -> Self {
        self.all_plans = Some(all_plans);
        self
    }

    /// Overrides partitioned execution.
    #[must_use]
    pub fn with_distributed(mut self, distributed: bool) -> Self {
        self.distributed = Some(distributed);
        self
    }

    /// Overrides failing on warnings.
    #[must_use]
    pub fn with_fail_on_warning(mut self, fail: bool) -> Self {
        self.fail_on_warning = Some(fail);
        self
    }
}
