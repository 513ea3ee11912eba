use crate::{
    args::Args,
    error::{ContractError, Fault},
    executor::{params_size, Executor},
    loader::LoadedContract,
    state::StateView,
    task::ActiveFrame,
};
use std::sync::Arc;
use stratum_types::{abi, Address, Params, Status, Transaction, TxResult, TypedValue, CONSTRUCTOR};
use tracing::debug;

impl Executor {
    /// Resolve the destination of a call and run it.
    ///
    /// A destination already on the reentrancy stack is not reloaded: the
    /// call joins the live instance held by its top-most frame.
    pub(crate) fn dispatch_call(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        method: &str,
        params: &Params,
    ) -> Result<TxResult, Fault> {
        let Some(address) = tx.destination else {
            return Ok(TxResult::failure(
                Status::ContractNotFound,
                "call without destination",
            ));
        };
        let (contract, owner) = match self.task()?.stack().try_share_state(&address) {
            Some(shared) => {
                debug!(%address, owner = shared.owner, "re-entering active contract");
                (shared.contract, Some(shared.owner))
            }
            None => match self.load(&*state, &address)? {
                Some(contract) => (contract, None),
                None => {
                    return Ok(TxResult::failure(
                        Status::ContractNotFound,
                        format!("no contract at {address}"),
                    ))
                }
            },
        };
        self.call(state, tx, address, contract, owner, method, params)
    }

    #[allow(clippy::too_many_arguments)]
    fn call(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        address: Address,
        contract: Arc<LoadedContract>,
        owner: Option<usize>,
        method: &str,
        params: &Params,
    ) -> Result<TxResult, Fault> {
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
        let outcome = self.enter(state, tx, address, &contract, owner, method, params, depth);
        let outcome = self.check_outcome(outcome)?;
        if outcome.is_err() {
            self.task_mut()?.stack_mut().revert_fields(fields);
        }
        self.settle(state, checkpoint, events, outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn enter(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
        address: Address,
        contract: &Arc<LoadedContract>,
        owner: Option<usize>,
        method: &str,
        params: &Params,
        depth: usize,
    ) -> Result<Option<TypedValue>, ContractError> {
        let costs = self.config().step_costs;
        self.charge(
            costs
                .contract_call
                .saturating_add(costs.input.saturating_mul(params_size(params))),
        )?;
        if tx.query && tx.value > 0 {
            return Err(ContractError::AccessDenied(
                "value transfer in read-only call".to_string(),
            ));
        }
        self.move_value(state, &tx.sender, &address, tx.value)?;

        let spec = match abi::lookup(contract.abi(), method) {
            Some(spec) if spec.name != CONSTRUCTOR => spec,
            _ => return Err(ContractError::MethodNotFound(method.to_string())),
        };
        if tx.value > 0 && !spec.payable {
            return Err(ContractError::MethodNotPayable(method.to_string()));
        }
        let args = Args::decode(spec, params)?;
        let readonly = tx.query || spec.readonly;

        let frame = match owner {
            Some(owner) => ActiveFrame::shared(address, contract.clone(), owner, readonly),
            None => {
                let fields = self.load_fields(&*state, &address)?;
                ActiveFrame::owned(address, contract.clone(), fields, readonly)
            }
        };
        let index = self.task_mut()?.stack_mut().push(frame);
        let outcome = match self.invoke(state, tx, index, contract, method, &args) {
            Ok(value) => self.persist_fields(state, index).map(|()| value),
            Err(err) => Err(err),
        };
        self.unwind(depth)?;
        outcome
    }

    /// Move value between accounts without running code.
    pub(crate) fn transfer(
        &mut self,
        state: &mut dyn StateView,
        tx: &Transaction,
    ) -> Result<TxResult, Fault> {
        let Some(to) = tx.destination else {
            return Ok(TxResult::failure(
                Status::IllegalFormat,
                "transfer without destination",
            ));
        };
        let checkpoint = state.checkpoint();
        let events = self.task()?.events_len();
        let outcome = if tx.query {
            Err(ContractError::AccessDenied(
                "value transfer in read-only call".to_string(),
            ))
        } else {
            self.move_value(state, &tx.sender, &to, tx.value)
                .map(|()| None)
        };
        let outcome = self.check_outcome(outcome)?;
        self.settle(state, checkpoint, events, outcome)
    }
}
