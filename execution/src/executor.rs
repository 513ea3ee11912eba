//! Transaction execution entrypoint.
//!
//! [Executor::run] is used both for top-level transactions and for calls
//! made by running contracts. With no [TransactionTask] active the call is
//! external: a task is created, the instrumentation is attached for the
//! transaction's step limit, and both are torn down once the result is known.
//! Otherwise the call runs inside the active task, sharing its reentrancy
//! stack and step budget.

use crate::{
    args::Args,
    config::Config,
    context::CallContext,
    error::{ContractError, Fault},
    instrumentation::{Binding, Instrumentation, InstrumentationFactory},
    loader::{LoadError, LoadedContract, Loader},
    state::{self, Checkpoint, StateView},
    task::TransactionTask,
};
use anyhow::anyhow;
use commonware_cryptography::Digestible;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use stratum_types::{
    value::dict_encode_size, Address, Fields, Key, Params, Payload, Transaction, TxResult,
    TypedValue, Value,
};
use tracing::{debug, trace, warn};

pub struct Executor {
    config: Config,
    loader: Arc<Loader>,
    factory: Arc<dyn InstrumentationFactory>,
    binding: Option<Binding>,
    task: Option<TransactionTask>,
    fault: Option<Fault>,
}

impl Executor {
    pub fn new(
        factory: Arc<dyn InstrumentationFactory>,
        config: Config,
        loader: Arc<Loader>,
    ) -> Self {
        Self {
            config,
            loader,
            factory,
            binding: None,
            task: None,
            fault: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    pub fn is_started(&self) -> bool {
        self.binding.is_some()
    }

    /// Create the instrumentation and bind it to the current thread.
    pub fn start(&mut self) -> Result<(), Fault> {
        if self.binding.is_some() {
            return Err(Fault::AlreadyBound);
        }
        self.binding = Some(Binding::bind(self.factory.create())?);
        debug!("executor started");
        Ok(())
    }

    /// Unbind and destroy the instrumentation.
    pub fn shutdown(&mut self) -> Result<(), Fault> {
        let binding = self.binding.take().ok_or(Fault::NotStarted)?;
        self.factory.destroy(binding.unbind());
        debug!("executor shut down");
        Ok(())
    }

    /// Run `tx` against `state`.
    ///
    /// Failures of the transaction itself are reported in the returned
    /// [TxResult]; `Err` is reserved for infrastructure faults, after which
    /// `state` must be discarded.
    pub fn run(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        origin: Address,
    ) -> Result<TxResult, Fault> {
        if self.task.is_none() {
            self.run_external(state, tx, origin)
        } else {
            self.run_internal(state, tx)
        }
    }

    fn run_external(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        origin: Address,
    ) -> Result<TxResult, Fault> {
        self.binding
            .as_mut()
            .ok_or(Fault::NotStarted)?
            .attach(tx.limit)?;
        let task = TransactionTask::new(origin, tx.digest());
        debug!(
            digest = ?task.digest(),
            sender = %tx.sender,
            destination = ?tx.destination,
            limit = tx.limit,
            "running transaction"
        );
        self.task = Some(task);
        self.fault = None;

        let mut outcome = match self.charge(self.config.step_costs.default) {
            Ok(()) => self.run_common(state, tx),
            Err(ContractError::Fatal(fault)) => Err(fault),
            Err(err) => Ok(TxResult::failure(err.status(), err.to_string())),
        };
        if let Some(fault) = self.fault.take() {
            outcome = Err(fault);
        }

        let task = self.task.take();
        let steps = self
            .binding
            .as_mut()
            .ok_or(Fault::NotStarted)?
            .detach()?;
        let mut result = outcome?;
        result.steps_used = steps;
        if let Some(task) = task {
            let leaked = task.stack().depth();
            if leaked > 0 {
                warn!(leaked, "frames left on reentrancy stack after transaction");
            }
            let (events, logs) = task.finish();
            if result.is_success() {
                result.events = events;
            }
            result.logs = logs;
        }
        debug!(status = %result.status, steps, "transaction complete");
        Ok(result)
    }

    fn run_internal(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
    ) -> Result<TxResult, Fault> {
        trace!(
            sender = %tx.sender,
            destination = ?tx.destination,
            depth = self.task()?.stack().depth(),
            "running nested call"
        );
        self.run_common(state, tx)
    }

    fn run_common(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
    ) -> Result<TxResult, Fault> {
        let before = self.meter()?.used();
        let mut result = match &tx.payload {
            Payload::Deploy { code, params } => self.create(state, tx, code, params)?,
            Payload::Call { method, params } => self.dispatch_call(state, tx, method, params)?,
            Payload::Transfer => self.transfer(state, tx)?,
        };
        result.steps_used = self.meter()?.used().saturating_sub(before);
        trace!(status = %result.status, steps = result.steps_used, "call complete");
        Ok(result)
    }

    pub(crate) fn task(&self) -> Result<&TransactionTask, Fault> {
        self.task.as_ref().ok_or(Fault::NoTask)
    }

    pub(crate) fn task_mut(&mut self) -> Result<&mut TransactionTask, Fault> {
        self.task.as_mut().ok_or(Fault::NoTask)
    }

    pub(crate) fn meter(&self) -> Result<&dyn Instrumentation, Fault> {
        Ok(self.binding.as_ref().ok_or(Fault::NotStarted)?.meter())
    }

    pub(crate) fn charge(&mut self, steps: u64) -> Result<(), ContractError> {
        let binding = self.binding.as_mut().ok_or(Fault::NotStarted)?;
        binding.meter_mut().charge(steps).map_err(|err| {
            trace!(%err, "step limit reached");
            ContractError::OutOfStep
        })
    }

    /// Load the contract at `address`, or `None` if nothing is deployed there.
    pub(crate) fn load(
        &self,
        state: &dyn StateView,
        address: &Address,
    ) -> Result<Option<Arc<LoadedContract>>, Fault> {
        if !address.is_contract() {
            return Ok(None);
        }
        match self
            .loader
            .load(address, state, self.config.preserve_debuggability)
        {
            Ok(contract) => Ok(Some(contract)),
            Err(LoadError::CodeNotFound(_)) => Ok(None),
            Err(source) => Err(Fault::Load {
                address: *address,
                source,
            }),
        }
    }

    /// Record `fault` so the transaction aborts even if contract code drops
    /// the returned error. The first fault recorded wins.
    pub(crate) fn abort(&mut self, fault: Fault) -> ContractError {
        if self.fault.is_none() {
            warn!(%fault, "aborting transaction");
            self.fault = Some(fault);
        }
        ContractError::Aborted
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.fault.is_some()
    }

    /// Once a fault is recorded or steps are exhausted no frame may succeed,
    /// whatever its code did with the nested failure.
    pub(crate) fn check_outcome<T>(
        &mut self,
        outcome: Result<T, ContractError>,
    ) -> Result<Result<T, ContractError>, Fault> {
        if let Some(fault) = self.fault.take() {
            return Err(fault);
        }
        if matches!(outcome, Err(ContractError::Fatal(_))) || !self.meter()?.is_exhausted() {
            return Ok(outcome);
        }
        Ok(Err(ContractError::OutOfStep))
    }

    /// Commit or roll back the work done since `checkpoint`.
    pub(crate) fn settle(
        &mut self,
        state: &mut dyn StateView,
        checkpoint: Checkpoint,
        events: usize,
        outcome: Result<Option<TypedValue>, ContractError>,
    ) -> Result<TxResult, Fault> {
        match outcome {
            Ok(value) => {
                state.commit(checkpoint)?;
                Ok(TxResult::success(value))
            }
            Err(ContractError::Fatal(fault)) => Err(fault),
            Err(err) => {
                state.rollback(checkpoint)?;
                self.task_mut()?.truncate_events(events);
                let status = err.status();
                debug!(%status, error = %err, "call failed; rolled back");
                Ok(TxResult::failure(status, err.to_string()))
            }
        }
    }

    /// Run `method` of `contract` in frame `frame`.
    ///
    /// Panics raised by contract code are contained here and reported as
    /// uncategorized failures.
    pub(crate) fn invoke(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        frame: usize,
        contract: &LoadedContract,
        method: &str,
        args: &Args,
    ) -> Result<Option<TypedValue>, ContractError> {
        let program = contract.program().clone();
        let origin = self.task()?.origin();
        let readonly = self
            .task()?
            .stack()
            .frame(frame)
            .ok_or(Fault::Frame(frame))?
            .is_readonly();
        let address = *contract.address();
        trace!(%address, method, depth = frame + 1, readonly, "invoking contract");

        let mut ctx = CallContext {
            executor: self,
            state,
            frame,
            address,
            caller: tx.sender,
            origin,
            value: tx.value,
            readonly,
            debuggable: contract.is_debuggable(),
        };
        match panic::catch_unwind(AssertUnwindSafe(|| program.invoke(&mut ctx, method, args))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%address, method, %message, "contract panicked");
                Err(ContractError::Unknown(anyhow!("contract panicked: {message}")))
            }
        }
    }

    /// Move `amount` from `from` to `to`.
    pub(crate) fn move_value(
        &mut self,
        state: &mut dyn StateView,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), ContractError> {
        if amount == 0 {
            return Ok(());
        }
        let mut sender = state::load_account(&*state, from).map_err(Fault::State)?;
        if sender.balance < amount {
            return Err(ContractError::OutOfBalance(format!(
                "{from} holds {} but {amount} is required",
                sender.balance
            )));
        }
        sender.balance -= amount;
        state
            .insert(Key::Account(*from), Value::Account(sender))
            .map_err(Fault::State)?;

        let mut receiver = state::load_account(&*state, to).map_err(Fault::State)?;
        receiver.balance = receiver
            .balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("balance overflow at {to}"))?;
        state
            .insert(Key::Account(*to), Value::Account(receiver))
            .map_err(Fault::State)?;
        trace!(%from, %to, amount, "moved value");
        Ok(())
    }

    /// Read the persisted instance fields of `address`.
    pub(crate) fn load_fields(
        &mut self,
        state: &dyn StateView,
        address: &Address,
    ) -> Result<Fields, ContractError> {
        self.charge(self.config.step_costs.get)?;
        Ok(
            match state.get(&Key::Fields(*address)).map_err(Fault::State)? {
                Some(Value::Fields(fields)) => fields,
                _ => Fields::new(),
            },
        )
    }

    /// Write back the instance owned by frame `frame` if it was modified.
    pub(crate) fn persist_fields(
        &mut self,
        state: &mut dyn StateView,
        frame: usize,
    ) -> Result<(), ContractError> {
        let stack = self.task()?.stack();
        let Some(fields) = stack.dirty_fields(frame).cloned() else {
            return Ok(());
        };
        let address = *stack.frame(frame).ok_or(Fault::Frame(frame))?.address();
        let costs = self.config.step_costs;
        let size = dict_encode_size(&fields) as u64;
        self.charge(costs.set.saturating_add(costs.input.saturating_mul(size)))?;
        state
            .insert(Key::Fields(address), Value::Fields(fields))
            .map_err(Fault::State)?;
        trace!(%address, "persisted instance fields");
        Ok(())
    }

    /// Pop every frame above `depth`.
    pub(crate) fn unwind(&mut self, depth: usize) -> Result<(), Fault> {
        let removed = self.task_mut()?.stack_mut().unwind_to(depth);
        if removed > 1 {
            warn!(
                depth,
                leaked = removed - 1,
                "unwound frames left by nested calls"
            );
        }
        Ok(())
    }
}

/// Steps charged for the arguments of a call.
pub(crate) fn params_size(params: &Params) -> u64 {
    dict_encode_size(params) as u64
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            self.factory.destroy(binding.unbind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instrumentation::StepMeterFactory,
        mocks::{account, native, runtimes, Harness},
        state::{Memory, Overlay},
    };
    use stratum_types::{params, Status};

    fn executor() -> Executor {
        Executor::new(
            Arc::new(StepMeterFactory),
            Config::default(),
            Arc::new(Loader::new(runtimes(), 16)),
        )
    }

    #[test]
    fn run_requires_start() {
        let mut executor = executor();
        let memory = Memory::default();
        let mut overlay = Overlay::new(&memory);
        let tx = Transaction::transfer(account(1), account(2), 0);
        assert!(matches!(
            executor.run(&mut overlay, &tx, account(1)),
            Err(Fault::NotStarted)
        ));
    }

    #[test]
    fn start_twice_is_a_fault() {
        let mut executor = executor();
        executor.start().unwrap();
        assert!(matches!(executor.start(), Err(Fault::AlreadyBound)));

        let mut other = self::executor();
        assert!(matches!(other.start(), Err(Fault::AlreadyBound)));

        executor.shutdown().unwrap();
        assert!(matches!(executor.shutdown(), Err(Fault::NotStarted)));
        other.start().unwrap();
    }

    #[test]
    fn task_is_cleared_after_each_transaction() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let counter = harness.deploy(owner, 0, "counter", Params::new());

        let tx = Transaction::call(owner, counter, "increment", Params::new());
        assert!(harness.execute(&tx).is_success());
        assert!(harness.executor.task.is_none());
        assert!(harness.executor.fault.is_none());
        assert!(!harness.executor.binding.as_ref().unwrap().is_attached());
        assert!(harness.execute(&tx).is_success());
    }

    #[test]
    fn fatal_load_errors_are_faults() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let broken = Address::contract([9; 20]);
        harness.store_code(broken, native("no-such-contract"));

        let memory = &harness.memory;
        let mut overlay = Overlay::new(memory);
        let tx = Transaction::call(owner, broken, "get", Params::new());
        let result = harness.executor.run(&mut overlay, &tx, owner);
        assert!(matches!(
            result,
            Err(Fault::Load {
                source: LoadError::InvalidCode(_),
                ..
            })
        ));
        assert!(harness.executor.task.is_none());

        let tx = Transaction::call(owner, Address::contract([8; 20]), "get", Params::new());
        let result = harness.executor.run(&mut overlay, &tx, owner).unwrap();
        assert_eq!(result.status, Status::ContractNotFound);
    }

    #[test]
    fn insufficient_limit_fails_before_dispatch() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let counter = harness.deploy(owner, 0, "counter", Params::new());

        let tx = Transaction::call(owner, counter, "increment", Params::new()).with_limit(10);
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::OutOfStep);
        assert_eq!(result.steps_used, 10);

        let tx = Transaction::call(owner, counter, "get", params([("unused", 1i64)]));
        let result = harness.execute(&tx);
        assert_eq!(result.value, Some(TypedValue::int(0)));
    }
}
