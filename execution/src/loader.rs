//! Contract loading and the shared image cache.
//!
//! Loading turns stored [ContractCode] into a runnable [LoadedContract] by
//! handing the code to the [ContractRuntime] it names. Images are cached by
//! `(address, debuggable)` and revalidated against the stored code hash; each
//! key has its own build lock so concurrent loads of one contract build it
//! once while different contracts build in parallel.

use crate::{args::Args, context::CallContext, error::ContractError, state::State};
use commonware_cryptography::sha256::Digest;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use stratum_types::{Address, ContractCode, Key, MethodSpec, TypedValue, Value};
use thiserror::Error;
use tracing::debug;

/// A runnable contract program.
///
/// Programs are shared between transactions and threads; per-instance state
/// lives in the [CallContext], never in the program.
pub trait Contract: Send + Sync {
    fn abi(&self) -> &[MethodSpec];

    fn invoke(
        &self,
        ctx: &mut CallContext<'_>,
        method: &str,
        args: &Args,
    ) -> Result<Option<TypedValue>, ContractError>;
}

/// Verifies stored code and produces a program from it.
pub trait ContractRuntime: Send + Sync {
    fn instantiate(&self, code: &[u8], debuggable: bool) -> anyhow::Result<Arc<dyn Contract>>;
}

/// Registered runtimes, keyed by name.
#[derive(Clone, Default)]
pub struct Runtimes {
    by_name: HashMap<String, Arc<dyn ContractRuntime>>,
}

impl Runtimes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, runtime: Arc<dyn ContractRuntime>) -> Self {
        self.by_name.insert(name.into(), runtime);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ContractRuntime>> {
        self.by_name.get(name)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no code stored at {0}")]
    CodeNotFound(Address),
    #[error("unknown runtime {0:?}")]
    UnknownRuntime(String),
    #[error("invalid code: {0}")]
    InvalidCode(String),
    #[error("state access failed")]
    State(#[source] anyhow::Error),
}

/// A verified, instrumented contract image.
pub struct LoadedContract {
    address: Address,
    code_hash: Digest,
    debuggable: bool,
    program: Arc<dyn Contract>,
}

impl LoadedContract {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn code_hash(&self) -> &Digest {
        &self.code_hash
    }

    pub fn is_debuggable(&self) -> bool {
        self.debuggable
    }

    pub fn abi(&self) -> &[MethodSpec] {
        self.program.abi()
    }

    pub fn program(&self) -> &Arc<dyn Contract> {
        &self.program
    }
}

impl fmt::Debug for LoadedContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedContract")
            .field("address", &self.address)
            .field("code_hash", &self.code_hash)
            .field("debuggable", &self.debuggable)
            .finish_non_exhaustive()
    }
}

type CacheKey = (Address, bool);
type Slot = Arc<Mutex<Option<Arc<LoadedContract>>>>;

#[derive(Default)]
struct Cache {
    slots: HashMap<CacheKey, Slot>,
    order: VecDeque<CacheKey>,
}

pub struct Loader {
    runtimes: Runtimes,
    capacity: usize,
    cache: Mutex<Cache>,
    builds: AtomicU64,
    hits: AtomicU64,
}

impl Loader {
    pub fn new(runtimes: Runtimes, capacity: usize) -> Self {
        Self {
            runtimes,
            capacity: capacity.max(1),
            cache: Mutex::new(Cache::default()),
            builds: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Load the contract stored at `address`.
    pub fn load<S: State + ?Sized>(
        &self,
        address: &Address,
        state: &S,
        debuggable: bool,
    ) -> Result<Arc<LoadedContract>, LoadError> {
        let code = match state
            .get(&Key::Code(*address))
            .map_err(LoadError::State)?
        {
            Some(Value::Code(code)) => code,
            _ => return Err(LoadError::CodeNotFound(*address)),
        };
        self.load_code(address, &code, debuggable)
    }

    /// Load `code` as the image for `address`.
    pub fn load_code(
        &self,
        address: &Address,
        code: &ContractCode,
        debuggable: bool,
    ) -> Result<Arc<LoadedContract>, LoadError> {
        let code_hash = code.hash();
        let slot = self.slot((*address, debuggable));
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = entry.as_ref() {
            if loaded.code_hash == code_hash {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%address, debuggable, "contract cache hit");
                return Ok(loaded.clone());
            }
            debug!(%address, debuggable, "cached contract image is stale");
        }

        let loaded = Arc::new(self.build(address, code, code_hash, debuggable)?);
        *entry = Some(loaded.clone());
        Ok(loaded)
    }

    /// Number of images built so far.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of loads served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: CacheKey) -> Slot {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = cache.slots.get(&key) {
            return slot.clone();
        }
        while cache.slots.len() >= self.capacity {
            let Some(evicted) = cache.order.pop_front() else {
                break;
            };
            cache.slots.remove(&evicted);
            debug!(address = %evicted.0, debuggable = evicted.1, "evicted contract image");
        }
        let slot = Slot::default();
        cache.slots.insert(key, slot.clone());
        cache.order.push_back(key);
        slot
    }

    fn build(
        &self,
        address: &Address,
        code: &ContractCode,
        code_hash: Digest,
        debuggable: bool,
    ) -> Result<LoadedContract, LoadError> {
        let runtime = self
            .runtimes
            .get(&code.runtime)
            .ok_or_else(|| LoadError::UnknownRuntime(code.runtime.clone()))?;
        let program = runtime
            .instantiate(&code.bytes, debuggable)
            .map_err(|err| LoadError::InvalidCode(format!("{err:#}")))?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!(%address, runtime = %code.runtime, debuggable, "built contract image");
        Ok(LoadedContract {
            address: *address,
            code_hash,
            debuggable,
            program,
        })
    }
}
