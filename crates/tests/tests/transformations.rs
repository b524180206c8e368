//! Tree transformations checked against golden renderings.

use federate_compiler::{uniquify_reference_names, Pipeline};
use federate_executor::Value;
use federate_ir::{factory, BuildingBlock, Type};
use federate_tests::{add_one, check_golden, int_clients, lambda, TestHarness};

#[test]
fn uniquify_renames_shadowed_block_locals() {
    let comp = lambda(Type::int32(), |x| {
        let a = BuildingBlock::reference("a", Type::int32());
        let call = BuildingBlock::call(add_one(), Some(a.clone()))?;
        Ok(BuildingBlock::block(
            vec![("a".to_string(), x), ("a".to_string(), call)],
            a,
        ))
    });
    let (unique, modified) = uniquify_reference_names(&comp).unwrap();
    assert!(modified);
    check_golden("uniquify_shadowed_block", &unique.formatted_representation());

    // Renaming preserves what the block computes.
    let harness = TestHarness::native(1);
    assert_eq!(harness.invoke(&comp, Value::int32(4)), Value::int32(5));
    assert_eq!(harness.invoke(&unique, Value::int32(4)), Value::int32(5));
}

#[test]
fn default_pipeline_removes_mapped_identity() {
    let clients = Type::at_clients(Type::int32());
    let comp = lambda(clients, |x| {
        let y = BuildingBlock::reference("y", Type::int32());
        let identity = BuildingBlock::lambda("y", Type::int32(), y);
        factory::create_federated_map(identity, x)
    });
    let (compiled, modified) = Pipeline::default().run(&comp).unwrap();
    assert!(modified);
    check_golden("remove_identity_map", &compiled.formatted_representation());

    let harness = TestHarness::native(2);
    assert_eq!(harness.invoke(&compiled, int_clients(&[3, 8])), int_clients(&[3, 8]));
}

#[test]
fn compiled_and_uncompiled_runs_agree() {
    let comp = lambda(Type::at_clients(Type::int32()), |x| {
        let mapped = factory::create_federated_map(add_one(), x)?;
        factory::create_federated_sum(mapped)
    });
    let argument = int_clients(&[1, 2, 3]);
    let native = TestHarness::native(3).invoke(&comp, argument.clone());
    let compiled = TestHarness::from_yaml(
        r#"
apiVersion: federate/v1
kind: ExecutionConfig
metadata:
  name: defaults
executor:
  numClients: 3
"#,
    )
    .invoke(&comp, argument);
    assert_eq!(native, compiled);
}
