use crate::{
    args::Args,
    error::{ContractError, Fault},
    executor::{params_size, Executor},
    loader::LoadError,
    state::StateView,
    task::ActiveFrame,
};
use stratum_types::{
    abi, Address, ContractCode, Fields, Key, Params, Status, Transaction, TxResult, TypedValue,
    Value, CONSTRUCTOR,
};
use tracing::debug;

impl Executor {
    /// Deploy `code` and run its constructor.
    ///
    /// The contract address is the transaction's destination when given,
    /// otherwise it is derived from the sender and nonce. A fresh contract
    /// cannot be on the reentrancy stack, so no shared state is looked up.
    pub(crate) fn create(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        code: &ContractCode,
        params: &Params,
    ) -> Result<TxResult, Fault> {
        let address = tx
            .destination
            .unwrap_or_else(|| Address::for_contract(&tx.sender, tx.nonce));
        let depth = self.task()?.stack().depth();
        let max_depth = self.config().max_call_depth;
        if depth >= max_depth {
            return Ok(TxResult::failure(
                Status::StackOverflow,
                format!("call depth limit of {max_depth} reached"),
            ));
        }

        let checkpoint = state.checkpoint();
        let events = self.task()?.events_len();
        let fields = self.task()?.stack().field_mark();
        let outcome = self.install(state, tx, address, code, params, depth);
        let outcome = self.check_outcome(outcome)?;
        if outcome.is_err() {
            self.task_mut()?.stack_mut().revert_fields(fields);
        }
        self.settle(state, checkpoint, events, outcome)
    }

    fn install(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        address: Address,
        code: &ContractCode,
        params: &Params,
        depth: usize,
    ) -> Result<Option<TypedValue>, ContractError> {
        if tx.query {
            return Err(ContractError::AccessDenied(
                "deployment in read-only call".to_string(),
            ));
        }
        let costs = self.config().step_costs;
        let input = (code.bytes.len() as u64).saturating_add(params_size(params));
        self.charge(
            costs
                .contract_create
                .saturating_add(costs.input.saturating_mul(input)),
        )?;
        if !address.is_contract() {
            return Err(ContractError::IllegalFormat(format!(
                "{address} is not a contract address"
            )));
        }
        if state
            .get(&Key::Code(address))
            .map_err(Fault::State)?
            .is_some()
        {
            return Err(ContractError::AccessDenied(format!(
                "{address} already holds a contract"
            )));
        }

        let debuggable = self.config().preserve_debuggability;
        let contract = match self.loader().load_code(&address, code, debuggable) {
            Ok(contract) => contract,
            Err(err @ (LoadError::UnknownRuntime(_) | LoadError::InvalidCode(_))) => {
                return Err(ContractError::IllegalFormat(err.to_string()))
            }
            Err(source) => return Err(Fault::Load { address, source }.into()),
        };
        let spec = abi::lookup(contract.abi(), CONSTRUCTOR);
        if tx.value > 0 && !spec.is_some_and(|spec| spec.payable) {
            return Err(ContractError::MethodNotPayable(CONSTRUCTOR.to_string()));
        }
        let args = match spec {
            Some(spec) => Args::decode(spec, params)?,
            None => Args::default(),
        };

        state
            .insert(Key::Code(address), Value::Code(code.clone()))
            .map_err(Fault::State)?;
        self.move_value(state, &tx.sender, &address, tx.value)?;

        let index = self.task_mut()?.stack_mut().push(ActiveFrame::owned(
            address,
            contract.clone(),
            Fields::new(),
            false,
        ));
        let outcome = match spec {
            Some(_) => self.invoke(state, tx, index, &contract, CONSTRUCTOR, &args),
            None => Ok(None),
        };
        let outcome = match outcome {
            Ok(_) => self.persist_fields(state, index),
            Err(err) => Err(err),
        };
        self.unwind(depth)?;
        outcome?;
        debug!(%address, runtime = %code.runtime, "contract created");
        Ok(Some(TypedValue::Address(address)))
    }
}
