//! Intrinsic bodies and placement stripping preserve results.

use federate_compiler::strip_placement;
use federate_executor::Value;
use federate_ir::{factory, BuildingBlock, IntrinsicRegistry, Literal, Type};
use federate_tests::{add_one, check_golden, constant, float_clients, int_clients, lambda, TestHarness};

#[test]
fn mean_is_preserved() {
    let comp = lambda(Type::at_clients(Type::float32()), |x| {
        factory::create_federated_mean(x, None)
    });
    let values = float_clients(&[1.0, 2.0, 6.0]);
    let native = TestHarness::native(3).invoke(&comp, values.clone());
    let lowered = TestHarness::lowered(3).invoke(&comp, values);
    assert_eq!(native, Value::server(Value::float32(3.0)));
    assert_eq!(lowered, native);
}

#[test]
fn weighted_mean_is_preserved() {
    let clients = Type::at_clients(Type::float32());
    let comp = lambda(Type::unnamed(vec![clients.clone(), clients]), |x| {
        let value = BuildingBlock::select_index(x.clone(), 0)?;
        let weight = BuildingBlock::select_index(x, 1)?;
        factory::create_federated_mean(value, Some(weight))
    });
    let argument = Value::tuple(vec![
        float_clients(&[1.0, 2.0, 6.0]),
        float_clients(&[1.0, 1.0, 2.0]),
    ]);
    let native = TestHarness::native(3).invoke(&comp, argument.clone());
    let lowered = TestHarness::lowered(3).invoke(&comp, argument);
    assert_eq!(native, Value::server(Value::float32(3.75)));
    assert_eq!(lowered, native);
}

#[test]
fn sum_of_mapped_values_is_preserved() {
    let comp = lambda(Type::at_clients(Type::int32()), |x| {
        let mapped = factory::create_federated_map(add_one(), x)?;
        factory::create_federated_sum(mapped)
    });
    for harness in [TestHarness::native(4), TestHarness::lowered(4)] {
        assert_eq!(
            harness.invoke(&comp, int_clients(&[1, 2, 3, 4])),
            Value::server(Value::int32(14))
        );
    }
}

#[test]
fn broadcast_values_reach_every_client() {
    let comp = lambda(Type::at_server(Type::int32()), |x| {
        let clients = factory::create_federated_broadcast(x)?;
        factory::create_federated_sum(clients)
    });
    for harness in [TestHarness::native(5), TestHarness::lowered(5)] {
        assert_eq!(
            harness.invoke(&comp, Value::server(Value::int32(2))),
            Value::server(Value::int32(10))
        );
    }
}

#[test]
fn stripped_server_computation_runs_unplaced() {
    let comp = lambda(Type::at_server(Type::int32()), |x| {
        factory::create_federated_apply(add_one(), x)
    });
    let (stripped, modified) = strip_placement(&comp, &IntrinsicRegistry::standard()).unwrap();
    assert!(modified);
    check_golden("strip_server_apply", &stripped.formatted_representation());

    let harness = TestHarness::native(1);
    assert_eq!(
        harness.invoke(&comp, Value::server(Value::int32(41))),
        Value::server(Value::int32(42))
    );
    assert_eq!(harness.invoke(&stripped, Value::int32(41)), Value::int32(42));
}

#[test]
fn constants_at_server_are_stripped_to_constants() {
    let comp = factory::create_federated_value(
        constant(Literal::Int(7), Type::int32()),
        federate_ir::Placement::Server,
    )
    .unwrap();
    let (stripped, _) = strip_placement(&comp, &IntrinsicRegistry::standard()).unwrap();
    assert_eq!(stripped.type_signature(), &Type::int32());
    let harness = TestHarness::native(1);
    assert_eq!(harness.try_invoke(&stripped, None).unwrap(), Value::int32(7));
    assert_eq!(
        harness.try_invoke(&comp, None).unwrap(),
        Value::server(Value::int32(7))
    );
}
