//! Declared interface of a contract: its externally callable methods and
//! the named, typed parameters each one accepts.

/// Name of the method run once when a contract is deployed.
pub const CONSTRUCTOR: &str = "<init>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Int,
    Str,
    Bytes,
    Address,
    List,
    Dict,
    /// Accepts any value, including null.
    Any,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    /// Accepts a non-zero value transfer.
    pub payable: bool,
    /// Runs without write access to contract state.
    pub readonly: bool,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            payable: false,
            readonly: false,
        }
    }

    pub fn constructor() -> Self {
        Self::new(CONSTRUCTOR)
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            optional: false,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            optional: true,
        });
        self
    }

    pub fn payable(mut self) -> Self {
        self.payable = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }
}

/// Find the method named `name` in `abi`.
pub fn lookup<'a>(abi: &'a [MethodSpec], name: &str) -> Option<&'a MethodSpec> {
    abi.iter().find(|m| m.name == name)
}
