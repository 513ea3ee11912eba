//! Test fixtures: a native runtime with a handful of sample contracts and a
//! harness that runs transactions against in-memory state.

use crate::{
    args::Args,
    config::Config,
    context::CallContext,
    error::{ContractError, Fault},
    executor::Executor,
    instrumentation::StepMeterFactory,
    loader::{Contract, ContractRuntime, Loader, Runtimes},
    state::{self, Memory, Overlay, State},
};
use anyhow::{anyhow, bail, Context as _};
use commonware_cryptography::{ed25519::PrivateKey, Signer};
use commonware_math::algebra::Random;
use num_bigint::BigInt;
use num_traits::{One, ToPrimitive, Zero};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use stratum_types::{
    checked_int, params, Account, Address, ContractCode, Key, MethodSpec, ParamType, Params,
    Transaction, TxResult, TypedValue, Value, CONSTRUCTOR,
};

/// Runtime name of [NativeRuntime].
pub const NATIVE: &str = "native";

/// Derives an account address from an ed25519 key seeded with `seed`.
pub fn account(seed: u64) -> Address {
    let mut rng = StdRng::seed_from_u64(seed);
    let private = PrivateKey::random(&mut rng);
    Address::from_public_key(private.public_key().as_ref())
}

/// Code for the native contract called `name`.
pub fn native(name: &str) -> ContractCode {
    ContractCode::new(NATIVE, name.as_bytes().to_vec())
}

pub fn runtimes() -> Runtimes {
    Runtimes::new().register(NATIVE, Arc::new(NativeRuntime))
}

/// Runtime whose code is the name of a built-in Rust contract.
pub struct NativeRuntime;

impl ContractRuntime for NativeRuntime {
    fn instantiate(&self, code: &[u8], _debuggable: bool) -> anyhow::Result<Arc<dyn Contract>> {
        let name = std::str::from_utf8(code).context("contract name is not utf-8")?;
        Ok(match name {
            "counter" => Arc::new(Counter::new()),
            "hello" => Arc::new(HelloWorld::new()),
            "bigint" => Arc::new(BigIntUser::new()),
            "faulty" => Arc::new(Faulty::new()),
            other => bail!("unknown native contract {other:?}"),
        })
    }
}

const COUNT: &str = "count";

fn count(ctx: &mut CallContext<'_>) -> Result<BigInt, ContractError> {
    Ok(match ctx.field(COUNT)? {
        Some(TypedValue::Int(count)) => count,
        _ => BigInt::zero(),
    })
}

fn bump(ctx: &mut CallContext<'_>, amount: &BigInt) -> Result<TypedValue, ContractError> {
    let next = checked_int(count(ctx)? + amount).context("counter overflow")?;
    ctx.set_field(COUNT, TypedValue::Int(next.clone()))?;
    Ok(TypedValue::Int(next))
}

/// Counter with helpers for exercising nested and re-entrant calls.
pub struct Counter {
    abi: Vec<MethodSpec>,
}

impl Counter {
    fn new() -> Self {
        Self {
            abi: vec![
                MethodSpec::constructor().optional("initial", ParamType::Int),
                MethodSpec::new("get").readonly(),
                MethodSpec::new("increment"),
                MethodSpec::new("add").param("amount", ParamType::Int),
                MethodSpec::new("fail_after_increment").optional("code", ParamType::Int),
                MethodSpec::new("reenter").param("depth", ParamType::Int),
                MethodSpec::new("forward")
                    .param("target", ParamType::Address)
                    .param("method", ParamType::Str),
                MethodSpec::new("ping").param("proxy", ParamType::Address),
                MethodSpec::new("try_ping").param("proxy", ParamType::Address),
                MethodSpec::new("forward_then_fail")
                    .param("target", ParamType::Address)
                    .param("method", ParamType::Str),
                MethodSpec::new("try_forward")
                    .param("target", ParamType::Address)
                    .param("method", ParamType::Str),
                MethodSpec::new("burn").param("steps", ParamType::Int),
                MethodSpec::new("relay")
                    .param("path", ParamType::List)
                    .param("steps", ParamType::Int),
                MethodSpec::new("store")
                    .param("key", ParamType::Bytes)
                    .param("value", ParamType::Bytes),
                MethodSpec::new("load").param("key", ParamType::Bytes).readonly(),
                MethodSpec::new("spawn").param("name", ParamType::Str),
                MethodSpec::new("note").param("message", ParamType::Str),
                MethodSpec::new("recurse"),
                MethodSpec::new("deposit").payable(),
                MethodSpec::new("poke").readonly(),
            ],
        }
    }
}

impl Contract for Counter {
    fn abi(&self) -> &[MethodSpec] {
        &self.abi
    }

    fn invoke(
        &self,
        ctx: &mut CallContext<'_>,
        method: &str,
        args: &Args,
    ) -> Result<Option<TypedValue>, ContractError> {
        match method {
            CONSTRUCTOR => {
                if let Some(initial) = args.get("initial") {
                    ctx.set_field(COUNT, initial.clone())?;
                }
                Ok(None)
            }
            "get" => Ok(Some(TypedValue::Int(count(ctx)?))),
            "increment" => {
                let next = bump(ctx, &BigInt::one())?;
                ctx.emit_event(vec![TypedValue::str("Incremented")], vec![next.clone()])?;
                Ok(Some(next))
            }
            "add" => bump(ctx, args.int("amount")?).map(Some),
            "fail_after_increment" => {
                let next = bump(ctx, &BigInt::one())?;
                ctx.emit_event(vec![TypedValue::str("Incremented")], vec![next])?;
                let code = args
                    .get("code")
                    .and_then(TypedValue::as_int)
                    .and_then(ToPrimitive::to_u16)
                    .unwrap_or(1);
                Err(ContractError::revert(code, "failed after increment"))
            }
            "reenter" => {
                bump(ctx, &BigInt::one())?;
                let depth = args.int("depth")?;
                if *depth > BigInt::zero() {
                    let me = ctx.address();
                    ctx.call(me, "reenter", params([("depth", depth - BigInt::one())]))?;
                }
                Ok(Some(TypedValue::Int(count(ctx)?)))
            }
            "forward" => {
                let target = args.address("target")?;
                ctx.call(target, args.str("method")?, Params::new())
            }
            "ping" => {
                let proxy = args.address("proxy")?;
                let me = ctx.address();
                ctx.call(
                    proxy,
                    "forward",
                    params([
                        ("target", TypedValue::from(me)),
                        ("method", TypedValue::str("increment")),
                    ]),
                )?;
                Ok(Some(TypedValue::Int(count(ctx)?)))
            }
            "try_ping" => {
                let proxy = args.address("proxy")?;
                let me = ctx.address();
                let result = ctx.try_call(
                    proxy,
                    0,
                    "forward_then_fail",
                    params([
                        ("target", TypedValue::from(me)),
                        ("method", TypedValue::str("increment")),
                    ]),
                )?;
                if result.is_success() {
                    return Err(ContractError::revert(2, "proxy was expected to fail"));
                }
                Ok(Some(TypedValue::Int(count(ctx)?)))
            }
            "forward_then_fail" => {
                let target = args.address("target")?;
                ctx.call(target, args.str("method")?, Params::new())?;
                Err(ContractError::revert(3, "failing after forward"))
            }
            "try_forward" => {
                bump(ctx, &BigInt::one())?;
                let target = args.address("target")?;
                let result = ctx.try_call(target, 0, args.str("method")?, Params::new())?;
                Ok(Some(TypedValue::Bool(result.is_success())))
            }
            "burn" => {
                let steps = args.int("steps")?.to_u64().unwrap_or(u64::MAX);
                ctx.charge(steps)?;
                Ok(None)
            }
            "relay" => {
                bump(ctx, &BigInt::one())?;
                let steps = args.int("steps")?;
                let path = match args.get("path") {
                    Some(TypedValue::List(path)) => path.as_slice(),
                    _ => &[],
                };
                let Some((next, rest)) = path.split_first() else {
                    let steps = steps.to_u64().unwrap_or(u64::MAX);
                    ctx.charge(steps)?;
                    return Ok(None);
                };
                let next = next.as_address().copied().ok_or_else(|| {
                    ContractError::InvalidParameter("relay path holds a non-address".to_string())
                })?;
                // Failures further down the path are swallowed.
                let _ = ctx.try_call(
                    next,
                    0,
                    "relay",
                    params([
                        ("path", TypedValue::List(rest.to_vec())),
                        ("steps", TypedValue::Int(steps.clone())),
                    ]),
                );
                Ok(None)
            }
            "store" => {
                ctx.set(args.bytes("key")?, args.bytes("value")?)?;
                Ok(None)
            }
            "load" => Ok(Some(
                ctx.get(args.bytes("key")?)?
                    .map(TypedValue::Bytes)
                    .unwrap_or(TypedValue::Null),
            )),
            "spawn" => {
                let code = native(args.str("name")?);
                let address = ctx.deploy(code, Params::new())?;
                Ok(Some(TypedValue::Address(address)))
            }
            "note" => {
                ctx.log(args.str("message")?);
                Ok(None)
            }
            "recurse" => {
                let me = ctx.address();
                ctx.call(me, "recurse", Params::new())
            }
            "deposit" => Ok(Some(TypedValue::int(ctx.value()))),
            "poke" => {
                bump(ctx, &BigInt::one())?;
                Ok(None)
            }
            other => Err(ContractError::MethodNotFound(other.to_string())),
        }
    }
}

/// Greets by name.
pub struct HelloWorld {
    abi: Vec<MethodSpec>,
}

impl HelloWorld {
    fn new() -> Self {
        Self {
            abi: vec![
                MethodSpec::constructor().param("name", ParamType::Str),
                MethodSpec::new("helloWithName").param("name", ParamType::Str),
                MethodSpec::new("name").readonly(),
            ],
        }
    }
}

impl Contract for HelloWorld {
    fn abi(&self) -> &[MethodSpec] {
        &self.abi
    }

    fn invoke(
        &self,
        ctx: &mut CallContext<'_>,
        method: &str,
        args: &Args,
    ) -> Result<Option<TypedValue>, ContractError> {
        match method {
            CONSTRUCTOR => {
                ctx.set_field("name", TypedValue::str(args.str("name")?))?;
                Ok(None)
            }
            "helloWithName" => {
                let name = args.str("name")?;
                ctx.log(format_args!("greeting {name}"));
                Ok(Some(TypedValue::str(format!("Hello, {name}"))))
            }
            "name" => ctx.field("name"),
            other => Err(ContractError::MethodNotFound(other.to_string())),
        }
    }
}

/// Accepts and constructs large integers.
pub struct BigIntUser {
    abi: Vec<MethodSpec>,
}

impl BigIntUser {
    fn new() -> Self {
        Self {
            abi: vec![
                MethodSpec::new("take").param("value", ParamType::Int),
                MethodSpec::new("make")
                    .param("value", ParamType::Str)
                    .optional("radix", ParamType::Int),
            ],
        }
    }
}

impl Contract for BigIntUser {
    fn abi(&self) -> &[MethodSpec] {
        &self.abi
    }

    fn invoke(
        &self,
        _ctx: &mut CallContext<'_>,
        method: &str,
        args: &Args,
    ) -> Result<Option<TypedValue>, ContractError> {
        match method {
            "take" => Ok(Some(TypedValue::Int(args.int("value")?.clone()))),
            "make" => {
                let radix = match args.get("radix") {
                    Some(radix) => radix
                        .as_int()
                        .and_then(ToPrimitive::to_u32)
                        .filter(|radix| (2..=36).contains(radix))
                        .ok_or_else(|| {
                            ContractError::InvalidParameter(format!("bad radix {radix}"))
                        })?,
                    None => 10,
                };
                let text = args.str("value")?;
                let parsed = BigInt::parse_bytes(text.as_bytes(), radix).ok_or_else(|| {
                    ContractError::InvalidParameter(format!("{text:?} is not a base {radix} integer"))
                })?;
                let value = checked_int(parsed).context("constructing integer")?;
                Ok(Some(TypedValue::Int(value)))
            }
            other => Err(ContractError::MethodNotFound(other.to_string())),
        }
    }
}

/// Fails in ways contract code is not supposed to.
pub struct Faulty {
    abi: Vec<MethodSpec>,
}

impl Faulty {
    fn new() -> Self {
        Self {
            abi: vec![MethodSpec::new("explode"), MethodSpec::new("uncategorized")],
        }
    }
}

impl Contract for Faulty {
    fn abi(&self) -> &[MethodSpec] {
        &self.abi
    }

    fn invoke(
        &self,
        _ctx: &mut CallContext<'_>,
        method: &str,
        _args: &Args,
    ) -> Result<Option<TypedValue>, ContractError> {
        match method {
            "explode" => panic!("contract exploded"),
            "uncategorized" => Err(anyhow!("division by zero").into()),
            other => Err(ContractError::MethodNotFound(other.to_string())),
        }
    }
}

/// A started [Executor] over in-memory state. Each executed transaction's
/// writes are applied to `memory`.
pub struct Harness {
    pub memory: Memory,
    pub executor: Executor,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let loader = Arc::new(Loader::new(runtimes(), config.cache_capacity));
        let mut executor = Executor::new(Arc::new(StepMeterFactory), config, loader);
        executor.start().expect("executor already started on this thread");
        Self {
            memory: Memory::default(),
            executor,
        }
    }

    pub fn execute(&mut self, tx: &Transaction) -> TxResult {
        self.try_execute(tx).expect("execution fault")
    }

    /// Run `tx`, applying its changes only if no fault was raised.
    pub fn try_execute(&mut self, tx: &Transaction) -> Result<TxResult, Fault> {
        let mut overlay = Overlay::new(&self.memory);
        let result = self.executor.run(&mut overlay, tx, tx.sender)?;
        let changes = overlay.into_changes();
        self.memory.apply(changes).unwrap();
        Ok(result)
    }

    /// Deploy the native contract `name` and return its address.
    pub fn deploy(&mut self, owner: Address, nonce: u64, name: &str, params: Params) -> Address {
        let tx = Transaction::deploy(owner, nonce, native(name), params);
        let result = self.execute(&tx);
        match result.value {
            Some(TypedValue::Address(address)) if result.is_success() => address,
            _ => panic!("deploying {name} failed: {result:?}"),
        }
    }

    pub fn store_code(&mut self, address: Address, code: ContractCode) {
        self.memory
            .insert(Key::Code(address), Value::Code(code))
            .unwrap();
    }

    pub fn code(&self, address: &Address) -> Option<ContractCode> {
        match self.memory.get(&Key::Code(*address)).unwrap() {
            Some(Value::Code(code)) => Some(code),
            _ => None,
        }
    }

    pub fn fund(&mut self, address: Address, balance: u64) {
        let nonce = state::nonce(&self.memory, &address).unwrap();
        self.memory
            .insert(Key::Account(address), Value::Account(Account { balance, nonce }))
            .unwrap();
    }

    pub fn balance(&self, address: &Address) -> u64 {
        state::balance(&self.memory, address).unwrap()
    }

    /// Persisted instance field `name` of the contract at `address`.
    pub fn field(&self, address: &Address, name: &str) -> Option<TypedValue> {
        match self.memory.get(&Key::Fields(*address)).unwrap() {
            Some(Value::Fields(fields)) => fields.get(name).cloned(),
            _ => None,
        }
    }
}
