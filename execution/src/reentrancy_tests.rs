//! Nested and re-entrant call tests.
//!
//! Contracts calling each other (and themselves) through the reentrancy
//! stack: shared instances, rollback of failed callees, step exhaustion
//! below the top level and contract-created contracts.

#[cfg(test)]
mod tests {
    use crate::{
        config::Config,
        error::Fault,
        loader::LoadError,
        mocks::{account, native, Harness},
        state,
    };
    use stratum_types::{params, Address, Params, Status, Transaction, TypedValue};

    fn path(addresses: &[Address]) -> TypedValue {
        TypedValue::List(addresses.iter().copied().map(TypedValue::from).collect())
    }

    #[test]
    fn test_reentrant_calls_share_one_instance() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let counter = harness.deploy(owner, 0, "counter", Params::new());

        let tx = Transaction::call(owner, counter, "reenter", params([("depth", 3i64)]));
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::Success);
        // Every level incremented the same live instance.
        assert_eq!(result.value, Some(TypedValue::int(4)));
        assert_eq!(harness.field(&counter, "count"), Some(TypedValue::int(4)));
    }

    #[test]
    fn test_transitive_reentry_sees_callee_writes() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let a = harness.deploy(owner, 0, "counter", Params::new());
        let b = harness.deploy(owner, 1, "counter", Params::new());

        // a -> b.forward(a, increment) -> a.increment
        let tx = Transaction::call(owner, a, "ping", params([("proxy", b)]));
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.value, Some(TypedValue::int(1)));
        assert_eq!(harness.field(&a, "count"), Some(TypedValue::int(1)));
        assert_eq!(harness.field(&b, "count"), None);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].address, a);
    }

    #[test]
    fn test_failed_nested_call_is_invisible() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let a = harness.deploy(owner, 0, "counter", Params::new());
        let b = harness.deploy(owner, 1, "counter", Params::new());

        let tx = Transaction::call(
            owner,
            a,
            "try_forward",
            params([
                ("target", TypedValue::from(b)),
                ("method", TypedValue::str("fail_after_increment")),
            ]),
        );
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.value, Some(TypedValue::Bool(false)));
        assert_eq!(harness.field(&a, "count"), Some(TypedValue::int(1)));
        assert_eq!(harness.field(&b, "count"), None);
        assert!(result.events.is_empty());

        let get = Transaction::call(owner, b, "get", Params::new());
        assert_eq!(harness.execute(&get).value, Some(TypedValue::int(0)));
    }

    #[test]
    fn test_successful_nested_call_is_visible() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let a = harness.deploy(owner, 0, "counter", Params::new());
        let b = harness.deploy(owner, 1, "counter", Params::new());

        let tx = Transaction::call(
            owner,
            a,
            "try_forward",
            params([
                ("target", TypedValue::from(b)),
                ("method", TypedValue::str("increment")),
            ]),
        );
        let result = harness.execute(&tx);
        assert_eq!(result.value, Some(TypedValue::Bool(true)));
        assert_eq!(harness.field(&b, "count"), Some(TypedValue::int(1)));
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].address, b);
    }

    #[test]
    fn test_failed_reentrant_call_restores_shared_instance() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let a = harness.deploy(owner, 0, "counter", Params::new());

        let tx = Transaction::call(
            owner,
            a,
            "try_forward",
            params([
                ("target", TypedValue::from(a)),
                ("method", TypedValue::str("fail_after_increment")),
            ]),
        );
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.value, Some(TypedValue::Bool(false)));
        // Only the outer increment survives.
        assert_eq!(harness.field(&a, "count"), Some(TypedValue::int(1)));
    }

    #[test]
    fn test_failed_callee_undoes_its_reentrant_writes() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let a = harness.deploy(owner, 0, "counter", Params::new());
        let b = harness.deploy(owner, 1, "counter", Params::new());

        // a -> b.forward_then_fail(a, increment) -> a.increment, then b reverts
        let tx = Transaction::call(owner, a, "try_ping", params([("proxy", b)]));
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.value, Some(TypedValue::int(0)));
        assert_eq!(harness.field(&a, "count"), None);
        assert!(result.events.is_empty());
    }

    #[test]
    fn test_exhaustion_at_depth_rolls_back_every_frame() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let counters: Vec<Address> = (0..4)
            .map(|nonce| harness.deploy(owner, nonce, "counter", Params::new()))
            .collect();

        // Every intermediate frame swallows its callee's failure.
        let relay = |steps: i64| {
            Transaction::call(
                owner,
                counters[0],
                "relay",
                params([
                    ("path", path(&counters[1..])),
                    ("steps", TypedValue::int(steps)),
                ]),
            )
        };

        let tx = relay(1_000_000_000_000);
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::OutOfStep);
        assert_eq!(result.steps_used, tx.limit);
        assert!(result.events.is_empty());
        for counter in &counters {
            assert_eq!(harness.field(counter, "count"), None);
        }

        let result = harness.execute(&relay(10));
        assert_eq!(result.status, Status::Success);
        for counter in &counters {
            assert_eq!(harness.field(counter, "count"), Some(TypedValue::int(1)));
        }
    }

    #[test]
    fn test_nested_load_fault_reaches_top_level() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let counter = harness.deploy(owner, 0, "counter", Params::new());
        let broken = Address::contract([9; 20]);
        harness.store_code(broken, native("no-such-contract"));

        // The relay frame drops its callee's error and would otherwise succeed.
        let tx = Transaction::call(
            owner,
            counter,
            "relay",
            params([("path", path(&[broken])), ("steps", TypedValue::int(0))]),
        );
        assert!(matches!(
            harness.try_execute(&tx),
            Err(Fault::Load {
                address,
                source: LoadError::InvalidCode(_),
            }) if address == broken
        ));

        let tx = Transaction::call(
            owner,
            counter,
            "try_forward",
            params([
                ("target", TypedValue::from(broken)),
                ("method", TypedValue::str("get")),
            ]),
        );
        assert!(matches!(harness.try_execute(&tx), Err(Fault::Load { .. })));
        assert_eq!(harness.field(&counter, "count"), None);

        // A fault does not leak into the next transaction.
        let tx = Transaction::call(owner, counter, "increment", Params::new());
        assert_eq!(harness.execute(&tx).value, Some(TypedValue::int(1)));
    }

    #[test]
    fn test_nested_fault_aborts_deeper_paths() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let counters: Vec<Address> = (0..3)
            .map(|nonce| harness.deploy(owner, nonce, "counter", Params::new()))
            .collect();
        let broken = Address::contract([9; 20]);
        harness.store_code(broken, native("no-such-contract"));

        let tx = Transaction::call(
            owner,
            counters[0],
            "relay",
            params([
                ("path", path(&[counters[1], counters[2], broken])),
                ("steps", TypedValue::int(0)),
            ]),
        );
        assert!(matches!(harness.try_execute(&tx), Err(Fault::Load { .. })));
        for counter in &counters {
            assert_eq!(harness.field(counter, "count"), None);
        }
    }

    #[test]
    fn test_call_depth_is_bounded() {
        let config = Config {
            max_call_depth: 4,
            ..Config::default()
        };
        let mut harness = Harness::new(config);
        let owner = account(1);
        let counter = harness.deploy(owner, 0, "counter", Params::new());

        let tx = Transaction::call(owner, counter, "recurse", Params::new());
        let result = harness.execute(&tx);
        assert_eq!(result.status, Status::StackOverflow);

        let tx = Transaction::call(owner, counter, "reenter", params([("depth", 3i64)]));
        assert_eq!(harness.execute(&tx).status, Status::Success);
        let tx = Transaction::call(owner, counter, "reenter", params([("depth", 4i64)]));
        assert_eq!(harness.execute(&tx).status, Status::StackOverflow);
        assert_eq!(harness.field(&counter, "count"), Some(TypedValue::int(4)));
    }

    #[test]
    fn test_query_mode_is_inherited_by_nested_calls() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let a = harness.deploy(owner, 0, "counter", Params::new());
        let b = harness.deploy(owner, 1, "counter", params([("initial", 5i64)]));

        let forward = |method: &str| {
            Transaction::call(
                owner,
                a,
                "forward",
                params([
                    ("target", TypedValue::from(b)),
                    ("method", TypedValue::str(method)),
                ]),
            )
            .as_query()
        };
        let result = harness.execute(&forward("get"));
        assert_eq!(result.value, Some(TypedValue::int(5)));
        assert_eq!(harness.execute(&forward("increment")).status, Status::AccessDenied);
        assert_eq!(harness.field(&b, "count"), Some(TypedValue::int(5)));
    }

    #[test]
    fn test_contracts_deploy_contracts() {
        let mut harness = Harness::new(Config::default());
        let owner = account(1);
        let factory = harness.deploy(owner, 0, "counter", Params::new());

        let spawn = |name: &str| Transaction::call(owner, factory, "spawn", params([("name", name)]));

        let result = harness.execute(&spawn("counter"));
        assert_eq!(result.status, Status::Success);
        let first = Address::for_contract(&factory, 0);
        assert_eq!(result.value, Some(TypedValue::Address(first)));

        let result = harness.execute(&spawn("hello"));
        // The hello constructor requires a name.
        assert_eq!(result.status, Status::InvalidParameter);
        assert_eq!(state::nonce(&harness.memory, &factory).unwrap(), 1);

        let result = harness.execute(&spawn("counter"));
        let second = Address::for_contract(&factory, 1);
        assert_eq!(result.value, Some(TypedValue::Address(second)));
        assert_eq!(state::nonce(&harness.memory, &factory).unwrap(), 2);

        let tx = Transaction::call(owner, second, "increment", Params::new());
        assert_eq!(harness.execute(&tx).value, Some(TypedValue::int(1)));
    }
}
