//! Thread-delegating executors wrapping the other executors.

use federate_executor::{
    Executor, ExecutorValue, LocalExecutor, ReferenceEngine, ReferenceExecutor,
    ThreadDelegatingExecutor, Value, WorkerState,
};
use federate_ir::Type;
use federate_tests::{add_one, init_logging, int_clients, lambda};

async fn call_add_one<E: Executor>(executor: &E, argument: i64) -> Value {
    let function = executor
        .create_value(Value::function(add_one()), None)
        .await
        .unwrap();
    let argument = executor
        .create_value(Value::int32(argument), None)
        .await
        .unwrap();
    executor
        .create_call(&function, Some(&argument))
        .await
        .unwrap()
        .compute()
        .await
        .unwrap()
}

#[tokio::test]
async fn delegates_to_a_local_executor() {
    init_logging();
    let executor = ThreadDelegatingExecutor::new(LocalExecutor::new(ReferenceEngine));
    assert_eq!(executor.state(), WorkerState::Idle);
    assert_eq!(call_add_one(&executor, 10).await, Value::int32(11));
    assert_eq!(executor.state(), WorkerState::Running);

    executor.close().await;
    assert_eq!(executor.state(), WorkerState::Closed);
    assert_eq!(call_add_one(&executor, 10).await, Value::int32(11));
    executor.close().await;
}

#[tokio::test]
async fn delegates_federated_computations() {
    init_logging();
    let executor = ThreadDelegatingExecutor::new(ReferenceExecutor::new(3));
    let comp = lambda(Type::at_clients(Type::int32()), |x| {
        let mapped = federate_ir::factory::create_federated_map(add_one(), x)?;
        federate_ir::factory::create_federated_sum(mapped)
    });
    let parameter = comp.parameter_type().cloned();
    let function = executor.create_value(Value::function(comp), None).await.unwrap();
    let argument = executor
        .create_value(int_clients(&[1, 2, 3]), parameter)
        .await
        .unwrap();
    let result = executor
        .create_call(&function, Some(&argument))
        .await
        .unwrap();
    assert_eq!(result.type_signature(), &Type::at_server(Type::int32()));
    assert_eq!(result.compute().await.unwrap(), Value::server(Value::int32(9)));
    executor.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_callers_share_one_worker() {
    init_logging();
    let executor = ThreadDelegatingExecutor::new(ReferenceExecutor::new(1));
    let results = futures::future::join_all((0..10).map(|i| call_add_one(&executor, i))).await;
    let expected: Vec<Value> = (1..=10).map(Value::int32).collect();
    assert_eq!(results, expected);
    executor.close().await;
}
