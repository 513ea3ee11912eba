//! Stratum contract execution core.
//!
//! This crate runs transactions against contract state: it resolves and
//! caches contract images ([Loader]), meters execution with a per-thread
//! [instrumentation] binding, tracks nested and re-entrant calls on a
//! [task::ReentrantStack], and commits or rolls back each call's writes through
//! a checkpointed [StateView].
//!
//! The primary entrypoint is [`Executor`].
//!
//! ## Determinism requirements
//! - Contract code sees only the state view and its call context.
//! - Step accounting is identical for identical inputs.
//! - Iteration over instance fields and call arguments is ordered.
//!
//! ## Fault model
//! Contract failures become a [TxResult] status and never abort the caller's
//! thread. A [Fault] (loader I/O error, instrumentation misuse) is returned as
//! `Err` instead; the state view it was running against must be discarded.
//!
//! ## Minimal usage (example)
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratum_execution::{Config, Executor, Loader, Overlay, Runtimes, StepMeterFactory};
//!
//! let loader = Arc::new(Loader::new(Runtimes::new(), 1024));
//! let mut executor = Executor::new(Arc::new(StepMeterFactory), Config::default(), loader);
//! executor.start()?;
//! let mut view = Overlay::new(&store);
//! let result = executor.run(&mut view, &tx, tx.sender)?;
//! store.apply(view.into_changes())?;
//! executor.shutdown()?;
//! ```

pub mod args;
pub mod config;
pub mod context;
pub mod error;
pub mod instrumentation;
pub mod loader;
pub mod state;
pub mod task;

mod call;
mod create;
mod executor;

#[cfg(feature = "parallel")]
pub mod parallel;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod reentrancy_tests;

pub use args::Args;
pub use config::{Config, ConfigError, StepCosts};
pub use context::CallContext;
pub use error::{ContractError, Fault};
pub use executor::Executor;
pub use instrumentation::{
    Binding, Instrumentation, InstrumentationFactory, OutOfSteps, StepMeter, StepMeterFactory,
};
pub use loader::{Contract, ContractRuntime, LoadError, LoadedContract, Loader, Runtimes};
pub use state::{Change, Checkpoint, CheckpointError, Overlay, State, StateView};
pub use stratum_types::{Status, TxResult};

#[cfg(any(test, feature = "mocks"))]
pub use state::Memory;
