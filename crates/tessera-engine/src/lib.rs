//! # tessera-engine
//!
//! The query core of Tessera: plans, rule-based optimization, and
//! cancellable, incrementally fetched execution.
//!
//! A query arrives as an unoptimized [`ExecutionPlan`](query::plan::ExecutionPlan)
//! (usually produced through the [`PlanBuilder`](query::builder::PlanBuilder)),
//! is rewritten by the [`Optimizer`](query::optimizer::Optimizer) into one or
//! more candidate plans, and the cheapest candidate is executed as a pipeline
//! of execution blocks behind a [`Cursor`](query::cursor::Cursor).
//!
//! ## Modules
//!
//! - [`database`] - The `Database` facade tying storage, planning and execution together
//! - [`config`] - Configuration and per-query options
//! - [`query`] - Variables, expressions, plans, optimizer, execution, registry

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod database;
pub mod query;

pub use config::{Config, QueryOptions};
pub use database::Database;
pub use query::builder::PlanBuilder;
pub use query::cursor::Cursor;
pub use query::explain::Explanation;
pub use query::registry::{KillOutcome, QueryRegistry, QueryState};
