use crate::{
    config::StepCosts,
    error::{ContractError, Fault},
    executor::Executor,
    state::{self, StateView},
};
use commonware_codec::EncodeSize;
use std::fmt;
use stratum_types::{
    state::{MAX_STORAGE_KEY_LENGTH, MAX_STORAGE_VALUE_LENGTH},
    Address, ContractCode, EventLog, Key, Params, Payload, Status, Transaction, TxResult,
    TypedValue, Value,
};
use tracing::{debug, trace};

/// Host interface handed to contract code for the duration of one call.
pub struct CallContext<'a> {
    pub(crate) executor: &'a mut Executor,
    pub(crate) state: &'a mut dyn StateView,
    pub(crate) frame: usize,
    pub(crate) address: Address,
    pub(crate) caller: Address,
    pub(crate) origin: Address,
    pub(crate) value: u64,
    pub(crate) readonly: bool,
    pub(crate) debuggable: bool,
}

impl<'a> CallContext<'a> {
    /// Address of the running contract.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sender of the current call: an account for top-level calls, the
    /// calling contract otherwise.
    pub fn caller(&self) -> Address {
        self.caller
    }

    /// Account that submitted the top-level transaction.
    pub fn origin(&self) -> Address {
        self.origin
    }

    /// Value transferred with the current call.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Number of frames on the reentrancy stack, including this one.
    pub fn depth(&self) -> usize {
        self.frame + 1
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_debuggable(&self) -> bool {
        self.debuggable
    }

    pub fn remaining_steps(&mut self) -> Result<u64, ContractError> {
        let remaining = self.executor.meter().map(|meter| meter.remaining());
        self.guard(remaining)
    }

    /// Charge `steps`. Fails once the transaction has been aborted so that
    /// contract code dropping a fault cannot keep doing work.
    pub fn charge(&mut self, steps: u64) -> Result<(), ContractError> {
        if self.executor.is_aborted() {
            return Err(ContractError::Aborted);
        }
        match self.executor.charge(steps) {
            Err(ContractError::Fatal(fault)) => Err(self.executor.abort(fault)),
            outcome => outcome,
        }
    }

    /// Record a fault with the executor before it reaches contract code.
    fn guard<T>(&mut self, result: Result<T, Fault>) -> Result<T, ContractError> {
        result.map_err(|fault| self.executor.abort(fault))
    }

    fn costs(&self) -> StepCosts {
        self.executor.config().step_costs
    }

    fn ensure_writable(&self, action: &str) -> Result<(), ContractError> {
        if self.readonly {
            return Err(ContractError::AccessDenied(format!(
                "{action} in read-only call to {}",
                self.address
            )));
        }
        Ok(())
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ContractError> {
        self.charge(self.costs().get)?;
        let stored = self
            .state
            .get(&Key::Storage(self.address, key.to_vec()))
            .map_err(Fault::State);
        Ok(match self.guard(stored)? {
            Some(Value::Storage(bytes)) => Some(bytes),
            _ => None,
        })
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), ContractError> {
        self.ensure_writable("storage write")?;
        if key.len() > MAX_STORAGE_KEY_LENGTH || value.len() > MAX_STORAGE_VALUE_LENGTH {
            return Err(ContractError::IllegalFormat(format!(
                "storage entry too large (key {} bytes, value {} bytes)",
                key.len(),
                value.len()
            )));
        }
        let costs = self.costs();
        self.charge(
            costs
                .set
                .saturating_add(costs.input.saturating_mul(value.len() as u64)),
        )?;
        let written = self
            .state
            .insert(
                Key::Storage(self.address, key.to_vec()),
                Value::Storage(value.to_vec()),
            )
            .map_err(Fault::State);
        self.guard(written)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), ContractError> {
        self.ensure_writable("storage delete")?;
        self.charge(self.costs().delete)?;
        let deleted = self
            .state
            .delete(&Key::Storage(self.address, key.to_vec()))
            .map_err(Fault::State);
        self.guard(deleted)
    }

    /// Read an instance field of the running contract.
    pub fn field(&mut self, name: &str) -> Result<Option<TypedValue>, ContractError> {
        self.charge(self.costs().api_call)?;
        let frame = self.frame;
        let value = self.executor.task().and_then(|task| {
            let fields = task.stack().fields(frame).ok_or(Fault::Frame(frame))?;
            Ok(fields.get(name).cloned())
        });
        self.guard(value)
    }

    /// Write an instance field. Re-entrant calls into this contract observe
    /// the new value immediately; it is persisted when the outermost active
    /// call into the contract succeeds, and undone if an enclosing call fails
    /// first.
    pub fn set_field(&mut self, name: &str, value: TypedValue) -> Result<(), ContractError> {
        self.ensure_writable("field write")?;
        self.charge(self.costs().api_call)?;
        let frame = self.frame;
        let written = self.executor.task_mut().and_then(|task| {
            task.stack_mut()
                .set_field(frame, name, value)
                .ok_or(Fault::Frame(frame))
        });
        self.guard(written)
    }

    pub fn balance(&mut self, address: &Address) -> Result<u64, ContractError> {
        self.charge(self.costs().get)?;
        let balance = state::balance(&*self.state, address).map_err(Fault::State);
        self.guard(balance)
    }

    /// Record an event. Events from read-only calls are dropped.
    pub fn emit_event(
        &mut self,
        indexed: Vec<TypedValue>,
        data: Vec<TypedValue>,
    ) -> Result<(), ContractError> {
        if self.readonly {
            trace!(address = %self.address, "dropping event from read-only call");
            return Ok(());
        }
        let size: usize = indexed
            .iter()
            .chain(data.iter())
            .map(|v| v.encode_size())
            .sum();
        let costs = self.costs();
        self.charge(
            costs
                .event_log
                .saturating_add(costs.input.saturating_mul(size as u64)),
        )?;
        let limit = self.executor.config().max_event_logs;
        let address = self.address;
        let emitted = self.executor.task_mut().map(|task| {
            if task.events_len() >= limit {
                return false;
            }
            task.emit(EventLog {
                address,
                indexed,
                data,
            });
            true
        });
        if !self.guard(emitted)? {
            return Err(ContractError::IllegalFormat(format!(
                "event log limit of {limit} reached"
            )));
        }
        Ok(())
    }

    /// Write a debug log line. Ignored unless the contract image is
    /// debuggable.
    pub fn log(&mut self, message: impl fmt::Display) {
        if !self.debuggable {
            return;
        }
        debug!(address = %self.address, %message, "contract log");
        let line = format!("{}: {message}", self.address);
        if let Ok(task) = self.executor.task_mut() {
            task.log(line);
        }
    }

    /// Call `method` on `to`, propagating its failure.
    pub fn call(
        &mut self,
        to: Address,
        method: &str,
        params: Params,
    ) -> Result<Option<TypedValue>, ContractError> {
        self.call_with_value(to, 0, method, params)
    }

    pub fn call_with_value(
        &mut self,
        to: Address,
        value: u64,
        method: &str,
        params: Params,
    ) -> Result<Option<TypedValue>, ContractError> {
        let result = self.try_call(to, value, method, params)?;
        if !result.is_success() {
            return Err(nested_failure(to, result));
        }
        Ok(result.value)
    }

    /// Call `method` on `to` and return its result, successful or not.
    ///
    /// The callee's effects are rolled back when it fails. Step exhaustion is
    /// not recoverable and is returned as [ContractError::OutOfStep]; a fault
    /// below aborts the whole transaction and is returned as
    /// [ContractError::Aborted].
    pub fn try_call(
        &mut self,
        to: Address,
        value: u64,
        method: &str,
        params: Params,
    ) -> Result<TxResult, ContractError> {
        let tx = Transaction {
            sender: self.address,
            destination: Some(to),
            nonce: 0,
            value,
            limit: self.remaining_steps()?,
            query: self.readonly,
            payload: Payload::Call {
                method: method.to_string(),
                params,
            },
        };
        self.run(tx)
    }

    /// Deploy a new contract owned by the running contract.
    ///
    /// The new address is derived from this contract's address and account
    /// nonce, which is incremented.
    pub fn deploy(&mut self, code: ContractCode, params: Params) -> Result<Address, ContractError> {
        self.ensure_writable("deployment")?;
        let account = state::load_account(&*self.state, &self.address).map_err(Fault::State);
        let mut account = self.guard(account)?;
        let nonce = account.nonce;
        account.nonce += 1;
        let written = self
            .state
            .insert(Key::Account(self.address), Value::Account(account))
            .map_err(Fault::State);
        self.guard(written)?;

        let tx = Transaction {
            sender: self.address,
            destination: None,
            nonce,
            value: 0,
            limit: self.remaining_steps()?,
            query: false,
            payload: Payload::Deploy { code, params },
        };
        let expected = Address::for_contract(&self.address, nonce);
        let result = self.run(tx)?;
        match result.value {
            Some(TypedValue::Address(address)) if result.is_success() && address == expected => {
                Ok(address)
            }
            _ => Err(nested_failure(expected, result)),
        }
    }

    /// Run a nested transaction. A fault raised below is recorded, so the
    /// enclosing frames cannot succeed even if the contract drops the error.
    fn run(&mut self, tx: Transaction) -> Result<TxResult, ContractError> {
        let result = self.executor.run(&mut *self.state, &tx, self.origin);
        let result = self.guard(result)?;
        if result.status == Status::OutOfStep {
            return Err(ContractError::OutOfStep);
        }
        Ok(result)
    }
}

fn nested_failure(address: Address, result: TxResult) -> ContractError {
    ContractError::Call {
        address,
        status: result.status,
        message: result.failure.unwrap_or_default(),
    }
}
