//! Incremental result fetching.
//!
//! A [`Cursor`] drives the pipeline of one registered query. Each call to
//! [`Cursor::next_batch`] is one execution step: the kill flag is checked
//! before the step starts, so a kill issued from another thread is observed
//! on the next step at the latest.

use crate::query::exec::{ExecContext, ExecutionBlock, ExecutionStats};
use crate::query::registry::QueryRegistry;
use std::sync::Arc;
use tessera_common::{QueryId, Result, Value, VariableId};
use tracing::debug;

/// Handle for fetching the results of a running query.
pub struct Cursor {
    id: QueryId,
    root: Box<dyn ExecutionBlock>,
    ctx: ExecContext,
    result: VariableId,
    registry: Arc<QueryRegistry>,
    finished: bool,
    completed: bool,
}

impl Cursor {
    pub(crate) fn new(
        id: QueryId,
        root: Box<dyn ExecutionBlock>,
        ctx: ExecContext,
        result: VariableId,
        registry: Arc<QueryRegistry>,
    ) -> Self {
        Self {
            id,
            root,
            ctx,
            result,
            registry,
            finished: false,
            completed: false,
        }
    }

    /// The query's id, usable with [`Database::kill`](crate::Database::kill).
    #[must_use]
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Fetches the next batch of result values. Returns `None` once all
    /// results were produced, even if a kill arrives afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`QueryKilled`](tessera_common::Error::QueryKilled) if the
    /// query was killed, or the runtime error that aborted it.
    pub fn next_batch(&mut self) -> Result<Option<Vec<Value>>> {
        if self.completed {
            return Ok(None);
        }
        if self.finished {
            return self.ctx.check_killed().map(|()| None);
        }
        if let Err(err) = self.ctx.check_killed() {
            self.finish(false);
            return Err(err);
        }
        match self.root.next_batch(&mut self.ctx) {
            Ok(Some(batch)) => {
                let index = self.result.index();
                Ok(Some(
                    batch
                        .into_rows()
                        .into_iter()
                        .map(|mut row| std::mem::take(&mut row[index]))
                        .collect(),
                ))
            }
            Ok(None) => {
                self.finish(true);
                Ok(None)
            }
            Err(err) => {
                self.finish(false);
                // Whatever a killed query reports, the caller sees the kill.
                Err(match self.ctx.check_killed() {
                    Err(killed) => killed,
                    Ok(()) => err,
                })
            }
        }
    }

    /// Fetches all remaining results.
    ///
    /// # Errors
    ///
    /// Same as [`Cursor::next_batch`].
    pub fn collect_all(&mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while let Some(batch) = self.next_batch()? {
            values.extend(batch);
        }
        Ok(values)
    }

    /// Runtime statistics gathered so far.
    #[must_use]
    pub fn stats(&self) -> ExecutionStats {
        self.ctx.stats
    }

    /// Warnings raised so far.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        self.ctx.warnings()
    }

    /// Returns true once the query completed, failed or was killed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, success: bool) {
        self.finished = true;
        self.completed = success;
        self.registry.finish(self.id, success);
        debug!(query = %self.id, success, stats = ?self.ctx.stats, "cursor finished");
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("block", &self.root.name())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::query::builder::PlanBuilder;
    use crate::query::exec::build_pipeline;
    use crate::query::registry::{KillOutcome, KillSwitch, QueryState};
    use tessera_core::{MemoryStorage, StorageEngine};

    fn cursor(registry: &Arc<QueryRegistry>) -> (Cursor, Arc<KillSwitch>) {
        let storage = MemoryStorage::new();
        storage.create_collection("c").unwrap();
        for n in 0..4 {
            storage.insert("c", Value::map([("n", Value::Int64(n))])).unwrap();
        }
        let mut b = PlanBuilder::new();
        let d = b.for_collection("d", "c").unwrap();
        let root = b.return_(d).unwrap();
        let plan = Arc::new(b.build().unwrap());

        let (id, switch) = registry.register();
        let storage: Arc<dyn StorageEngine> = Arc::new(storage);
        let config = Config::default().with_batch_size(3);
        let ctx = ExecContext::new(storage, &config).with_kill_switch(id, Arc::clone(&switch));
        let seed = vec![Value::Null; plan.variables().register_count()];
        let pipeline = build_pipeline(&plan, root, seed, &ctx).unwrap();
        registry.mark_running(id);
        (Cursor::new(id, pipeline, ctx, d, Arc::clone(registry)), switch)
    }

    #[test]
    fn test_completed_cursor_ignores_late_kill() {
        let registry = Arc::new(QueryRegistry::new());
        let (mut cursor, switch) = cursor(&registry);
        assert_eq!(cursor.collect_all().unwrap().len(), 4);
        assert_eq!(registry.state(cursor.id()), Some(QueryState::Completed));

        assert_eq!(registry.kill(cursor.id()), KillOutcome::NotFound);
        // A kill reaching the switch after completion changes nothing either.
        switch.kill();
        assert_eq!(cursor.next_batch().unwrap(), None);
        assert_eq!(cursor.next_batch().unwrap(), None);
        assert_eq!(registry.state(cursor.id()), Some(QueryState::Completed));
    }

    #[test]
    fn test_killed_cursor_keeps_reporting_kill() {
        let registry = Arc::new(QueryRegistry::new());
        let (mut cursor, _) = cursor(&registry);
        assert_eq!(cursor.next_batch().unwrap().unwrap().len(), 3);
        assert_eq!(registry.kill(cursor.id()), KillOutcome::Killed);
        assert!(cursor.next_batch().unwrap_err().is_killed());
        assert!(cursor.next_batch().unwrap_err().is_killed());
        assert!(cursor.is_finished());
    }
}
