//! Running independent batches of transactions on a thread pool.
//!
//! Each job gets its own [Executor], started on whichever worker picks the
//! job up, so instrumentation stays bound to one thread at a time. The
//! [Loader] is shared: a contract used by several jobs is built once.

use crate::{
    config::Config,
    error::Fault,
    executor::Executor,
    instrumentation::InstrumentationFactory,
    loader::Loader,
    state::{Overlay, State},
};
use rayon::{prelude::*, ThreadPool};
use std::sync::Arc;
use stratum_types::{Transaction, TxResult};
use tracing::debug;

/// Transactions to run in order against `state`.
pub struct Job<S> {
    pub state: S,
    pub transactions: Vec<Transaction>,
}

/// A job's final state and one result per transaction.
pub struct Completed<S> {
    pub state: S,
    pub results: Vec<TxResult>,
}

/// Run `jobs` concurrently on `pool`. Jobs must not touch each other's state.
///
/// Results are returned in job order. The first fault aborts the batch.
pub fn execute_independent<S: State + Send>(
    pool: &ThreadPool,
    factory: &Arc<dyn InstrumentationFactory>,
    config: &Config,
    loader: &Arc<Loader>,
    jobs: Vec<Job<S>>,
) -> Result<Vec<Completed<S>>, Fault> {
    debug!(jobs = jobs.len(), threads = pool.current_num_threads(), "executing batch");
    pool.install(|| {
        jobs.into_par_iter()
            .map(|job| run_job(factory.clone(), config.clone(), loader.clone(), job))
            .collect()
    })
}

fn run_job<S: State>(
    factory: Arc<dyn InstrumentationFactory>,
    config: Config,
    loader: Arc<Loader>,
    job: Job<S>,
) -> Result<Completed<S>, Fault> {
    let mut executor = Executor::new(factory, config, loader);
    executor.start()?;
    let Job {
        mut state,
        transactions,
    } = job;
    let mut results = Vec::with_capacity(transactions.len());
    for tx in &transactions {
        let mut overlay = Overlay::new(&state);
        let result = executor.run(&mut overlay, tx, tx.sender)?;
        let changes = overlay.into_changes();
        state.apply(changes).map_err(Fault::State)?;
        results.push(result);
    }
    executor.shutdown()?;
    Ok(Completed { state, results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instrumentation::StepMeterFactory,
        mocks::{account, native, runtimes},
        state::Memory,
    };
    use rayon::ThreadPoolBuilder;
    use stratum_types::{Address, Key, Params, Status, TypedValue, Value};

    #[test]
    fn jobs_run_in_isolation_and_share_the_cache() {
        let pool = ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .expect("failed to create execution pool");
        let factory: Arc<dyn InstrumentationFactory> = Arc::new(StepMeterFactory);
        let loader = Arc::new(Loader::new(runtimes(), 16));
        let counter = Address::contract([7; 20]);

        let jobs = (0..8u64)
            .map(|i| {
                let mut memory = Memory::default();
                memory
                    .insert(Key::Code(counter), Value::Code(native("counter")))
                    .unwrap();
                let sender = account(i);
                let increment = Transaction::call(sender, counter, "increment", Params::new());
                Job {
                    state: memory,
                    transactions: vec![increment; i as usize + 1],
                }
            })
            .collect();

        let completed =
            execute_independent(&pool, &factory, &Config::default(), &loader, jobs).unwrap();
        assert_eq!(completed.len(), 8);
        for (i, job) in completed.iter().enumerate() {
            assert_eq!(job.results.len(), i + 1);
            assert!(job.results.iter().all(|r| r.status == Status::Success));
            assert_eq!(
                job.results.last().unwrap().value,
                Some(TypedValue::int(i as i64 + 1))
            );
        }
        assert_eq!(loader.builds(), 1);
    }
}
