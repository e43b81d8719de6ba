//! Tessera database facade.

use std::sync::Arc;

use tessera_common::{Error, QueryId, Result, Value};
use tessera_core::StorageEngine;
use tracing::{debug, info};

use crate::config::{Config, QueryOptions};
use crate::query::cursor::Cursor;
use crate::query::exec::{ExecContext, build_pipeline};
use crate::query::explain::Explanation;
use crate::query::optimizer::{OptimizedPlans, Optimizer};
use crate::query::plan::{ExecutionPlan, NodeKind};
use crate::query::registry::{KillOutcome, QueryRegistry};

/// Plans, optimizes and executes queries against one storage engine.
pub struct Database {
    /// Database configuration.
    config: Config,
    /// The storage layer queries read from and write to.
    storage: Arc<dyn StorageEngine>,
    /// Registry of executing queries.
    registry: Arc<QueryRegistry>,
}

impl Database {
    /// Creates a database over `storage` with the default configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tessera_core::MemoryStorage;
    /// use tessera_engine::Database;
    ///
    /// let db = Database::new(Arc::new(MemoryStorage::new()));
    /// assert!(db.running_queries().is_empty());
    /// ```
    #[must_use]
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self::with_config(storage, Config::default())
    }

    /// Creates a database with the given configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tessera_core::MemoryStorage;
    /// use tessera_engine::{Config, Database};
    ///
    /// let config = Config::new().with_max_number_of_plans(16).with_batch_size(100);
    /// let db = Database::with_config(Arc::new(MemoryStorage::new()), config);
    /// assert_eq!(db.config().batch_size, 100);
    /// ```
    #[must_use]
    pub fn with_config(storage: Arc<dyn StorageEngine>, config: Config) -> Self {
        Self {
            config,
            storage,
            registry: Arc::new(QueryRegistry::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the storage layer.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    /// Returns the query registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    /// Binds parameters and validates `plan` against the storage layer.
    /// Returns the plan together with the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindParameterMissing`] for an unbound parameter,
    /// [`Error::CollectionNotFound`] for an unknown collection, or
    /// [`Error::InvalidQuery`] for invalid node options.
    pub fn prepare(&self, mut plan: ExecutionPlan, options: &QueryOptions) -> Result<(ExecutionPlan, Config)> {
        let config = self.config.merged(options);
        plan.bind_parameters(&options.bind_parameters)?;
        plan.validate(self.storage.as_ref())?;
        Ok((plan, config))
    }

    /// Prepares and optimizes `plan`, returning every surviving candidate.
    ///
    /// # Errors
    ///
    /// Returns planning errors from [`Database::prepare`], or the error of a
    /// failing optimizer rule.
    pub fn optimize(&self, plan: ExecutionPlan, options: &QueryOptions) -> Result<OptimizedPlans> {
        let (plan, config) = self.prepare(plan, options)?;
        Optimizer::from_config(&config).optimize(plan, self.storage.as_ref())
    }

    /// Explains `plan`: the winning plan, or with `all_plans` every
    /// candidate, annotated with applied rules and cost estimates.
    ///
    /// # Errors
    ///
    /// Same as [`Database::optimize`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tessera_core::MemoryStorage;
    /// use tessera_engine::{Database, PlanBuilder, QueryOptions};
    ///
    /// let storage = MemoryStorage::new();
    /// storage.create_collection("users")?;
    /// let db = Database::new(Arc::new(storage));
    ///
    /// let mut b = PlanBuilder::new();
    /// let u = b.for_collection("u", "users")?;
    /// b.return_(u)?;
    /// let explanation = db.explain(b.build()?, &QueryOptions::new())?;
    /// assert_eq!(explanation.plans.len(), 1);
    /// # Ok::<(), tessera_common::Error>(())
    /// ```
    pub fn explain(&self, plan: ExecutionPlan, options: &QueryOptions) -> Result<Explanation> {
        let all_plans = self.config.merged(options).all_plans;
        let optimized = self.optimize(plan, options)?;
        Explanation::from_optimized(&optimized, self.storage.as_ref(), all_plans)
    }

    /// Optimizes `plan`, registers it and starts executing the cheapest
    /// candidate. Results are fetched through the returned cursor.
    ///
    /// # Errors
    ///
    /// Returns planning errors, or an internal error if the plan cannot be
    /// turned into a pipeline.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tessera_common::Value;
    /// use tessera_core::{MemoryStorage, StorageEngine};
    /// use tessera_engine::query::Expression;
    /// use tessera_engine::{Database, PlanBuilder, QueryOptions};
    ///
    /// let storage = MemoryStorage::new();
    /// storage.create_collection("users")?;
    /// storage.insert("users", Value::map([("age", Value::Int64(30))]))?;
    /// storage.insert("users", Value::map([("age", Value::Int64(40))]))?;
    /// let db = Database::new(Arc::new(storage));
    ///
    /// let mut b = PlanBuilder::new();
    /// let u = b.for_collection("u", "users")?;
    /// b.filter(Expression::variable(u).attribute("age").equals(Expression::parameter("age")))?;
    /// let age = b.let_("age", Expression::variable(u).attribute("age"))?;
    /// b.return_(age)?;
    ///
    /// let options = QueryOptions::new().with_bind_parameter("age", 40);
    /// let mut cursor = db.query(b.build()?, &options)?;
    /// assert_eq!(cursor.collect_all()?, vec![Value::Int64(40)]);
    /// # Ok::<(), tessera_common::Error>(())
    /// ```
    pub fn query(&self, plan: ExecutionPlan, options: &QueryOptions) -> Result<Cursor> {
        let config = self.config.merged(options);
        let optimized = self.optimize(plan, options)?;
        let plan = optimized
            .into_best()
            .ok_or_else(|| Error::Internal("optimizer returned no plan".to_string()))?;
        let plan = Arc::new(plan);
        let root = plan.root()?;
        let NodeKind::Return(ret) = plan.kind(root)? else {
            return Err(Error::Internal("plan root is not a Return node".to_string()));
        };
        let result = ret.in_variable;

        let (id, switch) = self.registry.register();
        let ctx = ExecContext::new(Arc::clone(&self.storage), &config).with_kill_switch(id, switch);
        let seed = vec![Value::Null; plan.variables().register_count()];
        let pipeline = match build_pipeline(&plan, root, seed, &ctx) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                self.registry.finish(id, false);
                self.registry.deregister(id);
                return Err(err);
            }
        };
        self.registry.mark_running(id);
        debug!(query = %id, rules = ?plan.applied_rules(), "query started");
        Ok(Cursor::new(id, pipeline, ctx, result, Arc::clone(&self.registry)))
    }

    /// Kills a running query. Killing a query twice succeeds both times;
    /// killing a finished or unknown query reports
    /// [`KillOutcome::NotFound`].
    pub fn kill(&self, id: QueryId) -> KillOutcome {
        let outcome = self.registry.kill(id);
        info!(query = %id, ?outcome, "kill requested");
        outcome
    }

    /// Ids of the queries that are currently executing.
    #[must_use]
    pub fn running_queries(&self) -> Vec<QueryId> {
        self.registry.running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::PlanBuilder;
    use crate::query::expr::Expression;
    use crate::query::registry::QueryState;
    use tessera_core::MemoryStorage;

    fn db() -> Database {
        let storage = MemoryStorage::new();
        storage.create_collection("c").unwrap();
        for n in 0..10 {
            storage.insert("c", Value::map([("n", Value::Int64(n))])).unwrap();
        }
        Database::with_config(Arc::new(storage), Config::default().with_batch_size(3))
    }

    fn scan_plan() -> ExecutionPlan {
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.return_(d).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_query_completes_and_deregisters() {
        let db = db();
        let mut cursor = db.query(scan_plan(), &QueryOptions::new()).unwrap();
        let id = cursor.id();
        assert_eq!(db.registry().state(id), Some(QueryState::Running));
        assert_eq!(cursor.next_batch().unwrap().unwrap().len(), 3);
        assert_eq!(cursor.collect_all().unwrap().len(), 7);
        assert_eq!(db.registry().state(id), Some(QueryState::Completed));
        assert_eq!(cursor.stats().scanned_full, 10);
        assert_eq!(db.kill(id), KillOutcome::NotFound);
        drop(cursor);
        assert_eq!(db.registry().state(id), None);
    }

    #[test]
    fn test_kill_between_batches() {
        let db = db();
        let mut cursor = db.query(scan_plan(), &QueryOptions::new()).unwrap();
        cursor.next_batch().unwrap();
        assert_eq!(db.kill(cursor.id()), KillOutcome::Killed);
        assert_eq!(db.kill(cursor.id()), KillOutcome::Killed);
        let err = cursor.next_batch().unwrap_err();
        assert!(err.is_killed());
        assert!(cursor.next_batch().unwrap_err().is_killed());
        assert_eq!(db.registry().state(cursor.id()), Some(QueryState::Killed));
    }

    #[test]
    fn test_unknown_collection_rejected_before_execution() {
        let db = db();
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "missing").unwrap();
        b.return_(d).unwrap();
        let err = db.query(b.build().unwrap(), &QueryOptions::new()).unwrap_err();
        assert_eq!(err, Error::CollectionNotFound("missing".to_string()));
        assert!(db.running_queries().is_empty());
    }

    #[test]
    fn test_missing_bind_parameter() {
        let db = db();
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        b.filter(Expression::variable(d).attribute("n").equals(Expression::parameter("n")))
            .unwrap();
        b.return_(d).unwrap();
        let err = db.query(b.build().unwrap(), &QueryOptions::new()).unwrap_err();
        assert_eq!(err, Error::BindParameterMissing("n".to_string()));
    }
}
