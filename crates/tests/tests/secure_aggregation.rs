//! Secure aggregation executed natively and after insecure lowering.
//!
//! Both forms must agree value for value; only the native form enforces
//! bounds.

use federate_executor::{Error, Value};
use federate_ir::{factory, Comp, DType, Literal, Type};
use federate_tests::{constant, int_clients, lambda, TestHarness};

fn modular_sum(member: Type, modulus: Comp) -> Comp {
    lambda(Type::at_clients(member), |x| {
        factory::create_federated_secure_modular_sum(x, modulus)
    })
}

fn both(num_clients: usize) -> [TestHarness; 2] {
    [TestHarness::native(num_clients), TestHarness::lowered(num_clients)]
}

#[test]
fn modular_sum_of_scalars() {
    let comp = modular_sum(Type::int32(), constant(Literal::Int(5), Type::int32()));
    for harness in both(3) {
        assert_eq!(harness.invoke(&comp, int_clients(&[1])), Value::server(Value::int32(1)));
        assert_eq!(harness.invoke(&comp, int_clients(&[1, 2])), Value::server(Value::int32(3)));
        assert_eq!(
            harness.invoke(&comp, int_clients(&[1, 2, 10])),
            Value::server(Value::int32(3))
        );
    }
}

#[test]
fn modular_sum_of_vectors_with_vector_modulus() {
    let vector = Type::vector(DType::Int32, 2);
    let comp = modular_sum(vector.clone(), constant(Literal::Ints(vec![5, 7]), vector));
    let clients = Value::clients(vec![
        Value::int32_vector(vec![1, 2]),
        Value::int32_vector(vec![3, 4]),
    ]);
    for harness in both(2) {
        assert_eq!(
            harness.invoke(&comp, clients.clone()),
            Value::server(Value::int32_vector(vec![4, 6]))
        );
    }
}

#[test]
fn modular_sum_of_structs_with_scalar_modulus() {
    let member = Type::unnamed(vec![Type::vector(DType::Int32, 2), Type::int32()]);
    let comp = modular_sum(member, constant(Literal::Int(5), Type::int32()));
    let clients = Value::clients(vec![
        Value::tuple(vec![Value::int32_vector(vec![1, 2]), Value::int32(3)]),
        Value::tuple(vec![Value::int32_vector(vec![4, 5]), Value::int32(1)]),
    ]);
    for harness in both(2) {
        assert_eq!(
            harness.invoke(&comp, clients.clone()),
            Value::server(Value::tuple(vec![Value::int32_vector(vec![0, 2]), Value::int32(4)]))
        );
    }
}

#[test]
fn secure_sum_rejects_values_above_the_bound() {
    let comp = lambda(Type::at_clients(Type::int32()), |x| {
        factory::create_federated_secure_sum(x, constant(Literal::Int(1), Type::int32()))
    });
    let harness = TestHarness::native(2);
    assert_eq!(harness.invoke(&comp, int_clients(&[1, 0])), Value::server(Value::int32(1)));

    let err = harness.try_invoke(&comp, Some(int_clients(&[2, 4]))).unwrap_err();
    assert!(matches!(err, Error::BoundExceeded(_)));
    assert!(err
        .to_string()
        .contains("client value larger than maximum specified for secure sum"));

    // The lowered form is a plain sum.
    let lowered = TestHarness::lowered(2);
    assert_eq!(lowered.invoke(&comp, int_clients(&[2, 4])), Value::server(Value::int32(6)));
}

#[test]
fn bitwidth_sum_matches_after_lowering() {
    let comp = lambda(Type::at_clients(Type::int32()), |x| {
        factory::create_federated_secure_sum_bitwidth(x, constant(Literal::Int(4), Type::int32()))
    });
    for harness in both(3) {
        assert_eq!(
            harness.invoke(&comp, int_clients(&[15, 1, 7])),
            Value::server(Value::int32(23))
        );
    }
    let native = TestHarness::native(3);
    assert!(matches!(
        native.try_invoke(&comp, Some(int_clients(&[16]))),
        Err(Error::BoundExceeded(_))
    ));
}

#[test]
fn secure_select_matches_plain_select() {
    let keys = Type::at_clients(Type::tensor(DType::Int32, vec![None]));
    let state_type = Type::vector(DType::Int32, 2);
    let pick = factory::create_compiled_kernel(
        "pick",
        federate_ir::KernelOp::Multiply,
        Type::function(
            Some(Type::unnamed(vec![state_type.clone(), Type::int32()])),
            state_type.clone(),
        ),
    );
    let build = |secure: bool| {
        let state_type = state_type.clone();
        let pick = pick.clone();
        lambda(keys.clone(), move |x| {
            let max = factory::create_federated_value(
                constant(Literal::Int(3), Type::int32()),
                federate_ir::Placement::Server,
            )?;
            let state = factory::create_federated_value(
                constant(Literal::Ints(vec![1, 10]), state_type),
                federate_ir::Placement::Server,
            )?;
            factory::create_federated_select(x, max, state, pick, secure)
        })
    };
    let clients = Value::clients(vec![
        Value::int32_vector(vec![2]),
        Value::int32_vector(vec![0, 3]),
    ]);
    let expected = Value::clients(vec![
        Value::sequence(vec![Value::int32_vector(vec![2, 20])]),
        Value::sequence(vec![
            Value::int32_vector(vec![0, 0]),
            Value::int32_vector(vec![3, 30]),
        ]),
    ]);
    for harness in both(2) {
        assert_eq!(harness.invoke(&build(false), clients.clone()), expected);
        assert_eq!(harness.invoke(&build(true), clients.clone()), expected);
    }
}
