pub mod abi;
pub mod address;
pub mod result;
pub mod state;
pub mod transaction;
pub mod value;

pub use abi::{MethodSpec, ParamSpec, ParamType, CONSTRUCTOR};
pub use address::{Address, AddressKind};
pub use result::{EventLog, Status, TxResult};
pub use state::{Account, ContractCode, Fields, Key, Value};
pub use transaction::{Payload, Transaction};
pub use value::{checked_int, params, IntRangeError, Params, TypedValue};
