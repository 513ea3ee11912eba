use crate::error::ContractError;
use num_bigint::BigInt;
use std::collections::BTreeMap;
use stratum_types::{checked_int, Address, MethodSpec, ParamType, Params, TypedValue};

/// Arguments of a call, checked against the method's declared parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args {
    values: BTreeMap<String, TypedValue>,
}

fn type_matches(ty: ParamType, value: &TypedValue) -> bool {
    matches!(
        (ty, value),
        (ParamType::Any, _)
            | (ParamType::Bool, TypedValue::Bool(_))
            | (ParamType::Int, TypedValue::Int(_))
            | (ParamType::Str, TypedValue::Str(_))
            | (ParamType::Bytes, TypedValue::Bytes(_))
            | (ParamType::Address, TypedValue::Address(_))
            | (ParamType::List, TypedValue::List(_))
            | (ParamType::Dict, TypedValue::Dict(_))
    )
}

fn check_ints(value: &TypedValue) -> Result<(), ContractError> {
    match value {
        TypedValue::Int(v) => checked_int(v.clone())
            .map(|_| ())
            .map_err(|err| ContractError::InvalidParameter(err.to_string())),
        TypedValue::List(items) => items.iter().try_for_each(check_ints),
        TypedValue::Dict(entries) => entries.values().try_for_each(check_ints),
        _ => Ok(()),
    }
}

impl Args {
    /// Match `params` to the parameters `spec` declares.
    ///
    /// Parameters are matched by name. A missing required parameter, a value
    /// of the wrong type, or an integer outside the representable range is
    /// rejected; parameters the method does not declare are ignored.
    pub fn decode(spec: &MethodSpec, params: &Params) -> Result<Self, ContractError> {
        let mut values = BTreeMap::new();
        for param in &spec.params {
            let value = match params.get(&param.name) {
                None | Some(TypedValue::Null) if param.optional => continue,
                None => {
                    return Err(ContractError::InvalidParameter(format!(
                        "{}: missing parameter {:?}",
                        spec.name, param.name
                    )))
                }
                Some(value) => value,
            };
            if !type_matches(param.ty, value) {
                return Err(ContractError::InvalidParameter(format!(
                    "{}: parameter {:?} expects {:?}, got {}",
                    spec.name,
                    param.name,
                    param.ty,
                    value.type_name()
                )));
            }
            check_ints(value)?;
            values.insert(param.name.clone(), value.clone());
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    fn require(&self, name: &str) -> Result<&TypedValue, ContractError> {
        self.values
            .get(name)
            .ok_or_else(|| ContractError::InvalidParameter(format!("missing parameter {name:?}")))
    }

    fn mismatch(name: &str, expected: &str, value: &TypedValue) -> ContractError {
        ContractError::InvalidParameter(format!(
            "parameter {name:?} expects {expected}, got {}",
            value.type_name()
        ))
    }

    pub fn int(&self, name: &str) -> Result<&BigInt, ContractError> {
        let value = self.require(name)?;
        value
            .as_int()
            .ok_or_else(|| Self::mismatch(name, "int", value))
    }

    pub fn str(&self, name: &str) -> Result<&str, ContractError> {
        let value = self.require(name)?;
        value
            .as_str()
            .ok_or_else(|| Self::mismatch(name, "str", value))
    }

    pub fn address(&self, name: &str) -> Result<Address, ContractError> {
        let value = self.require(name)?;
        value
            .as_address()
            .copied()
            .ok_or_else(|| Self::mismatch(name, "Address", value))
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8], ContractError> {
        match self.require(name)? {
            TypedValue::Bytes(bytes) => Ok(bytes),
            other => Err(Self::mismatch(name, "bytes", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_types::{params, value::int_max, Status};

    fn greet() -> MethodSpec {
        MethodSpec::new("helloWithName")
            .param("name", ParamType::Str)
            .optional("age", ParamType::Int)
    }

    #[test]
    fn matches_parameters_by_name() {
        let args = Args::decode(&greet(), &params([("name", "alice")])).unwrap();
        assert_eq!(args.str("name").unwrap(), "alice");
        assert!(args.get("age").is_none());
    }

    #[test]
    fn ignores_undeclared_parameters() {
        let args = Args::decode(
            &greet(),
            &params([
                ("name", TypedValue::str("alice")),
                ("colour", TypedValue::str("blue")),
            ]),
        )
        .unwrap();
        assert!(args.get("colour").is_none());
    }

    #[test]
    fn misnamed_parameter_is_invalid() {
        let err = Args::decode(&greet(), &params([("nami", "alice")])).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);

        let err = Args::decode(&greet(), &params([("age", 3i64)])).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn wrong_type_is_invalid() {
        let err = Args::decode(&greet(), &params([("name", 3i64)])).unwrap_err();
        assert!(err.to_string().contains("expects Str, got int"));
    }

    #[test]
    fn null_satisfies_optional_only() {
        let args = Args::decode(
            &greet(),
            &params([("name", TypedValue::str("a")), ("age", TypedValue::Null)]),
        )
        .unwrap();
        assert!(args.get("age").is_none());

        let err = Args::decode(&greet(), &params([("name", TypedValue::Null)])).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn rejects_out_of_range_integers() {
        let spec = MethodSpec::new("take").param("value", ParamType::Int);
        Args::decode(&spec, &params([("value", int_max().clone())])).unwrap();

        let err = Args::decode(&spec, &params([("value", int_max() + 1)])).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);

        let spec = MethodSpec::new("takeAll").param("values", ParamType::List);
        let nested = TypedValue::List(vec![TypedValue::Int(int_max() + 1)]);
        let err = Args::decode(&spec, &params([("values", nested)])).unwrap_err();
        assert_eq!(err.status(), Status::InvalidParameter);
    }
}
