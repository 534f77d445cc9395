//! Integration tests: whole clusters of runtimes wired over the loopback
//! transport, exchanging real frames.

use std::sync::Arc;
use std::time::Duration;

use ubiwire::CallContext;
use ubiwire::PassMode;
use ubiwire::StateSnapshot;
use ubiwire::Value;

use ubirun::Deployment;
use ubirun::LoopbackTransport;
use ubirun::Node;
use ubirun::RemoteHandle;
use ubirun::ReplicaOutcome;
use ubirun::RoutingPolicy;
use ubirun::Runtime;
use ubirun::Topology;
use ubirun::context;
use ubirun::router::AsyncStub;
use ubirun::router::StubTarget;
use ubirun::testkit::CounterServant;
use ubirun::testkit::register_counter_type;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Detached runtimes with routes to each other, but unmerged topologies.
fn cluster(names: &[&str]) -> Vec<Arc<Runtime>> {
    let runtimes: Vec<Arc<Runtime>> = names
        .iter()
        .map(|name| {
            let runtime = Arc::new(Runtime::detached(name));
            register_counter_type(runtime.local().types());
            runtime
        })
        .collect();
    for i in 0..runtimes.len() {
        for j in (i + 1)..runtimes.len() {
            LoopbackTransport::pair(&runtimes[i], &runtimes[j]);
        }
    }
    runtimes
}

/// Creates a named counter on `node` and pushes an initial count into it.
async fn place_counter(node: &Node, name: &str, count: i64) -> anyhow::Result<RemoteHandle> {
    let handle = RemoteHandle::create(node, Some(name), "counter", None, None).await?;
    let state: StateSnapshot = [("count", Value::I64(count))].into_iter().collect();
    handle.apply_state(state).await?;
    Ok(handle)
}

// --- Test 1: Cluster Comes Up ---

#[tokio::test]
async fn test_cluster_instantiates_across_nodes() -> anyhow::Result<()> {
    init_tracing();
    let runtimes = cluster(&["//h/a", "//h/b", "//h/c"]);
    let (a, b, c) = (&runtimes[0], &runtimes[1], &runtimes[2]);

    let on_b = a.attach("//h/b").expect("route to b");
    let on_c = a.attach("//h/c").expect("route to c");
    let hb = place_counter(&on_b, "tally", 1).await?;
    let hc = place_counter(&on_c, "tally", 2).await?;

    assert_eq!(hb.invoke("get", &[]).await?, Value::I64(1));
    assert_eq!(hc.invoke("get", &[]).await?, Value::I64(2));
    assert_eq!(b.local().instance_count(), 1);
    assert_eq!(c.local().instance_count(), 1);
    assert_eq!(a.local().instance_count(), 0);
    Ok(())
}

// --- Test 2: Deployment With Forwarding ---

#[tokio::test]
async fn test_deploy_forwards_calls_and_retires_local_body() -> anyhow::Result<()> {
    init_tracing();
    let runtimes = cluster(&["//h/a", "//h/b"]);
    let (a, b) = (&runtimes[0], &runtimes[1]);

    let object = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("tally"));
    object.call("add", &[Value::I64(5)]).await?;

    let target = a.resolve("//h/b").expect("route to b");
    let deployment = Deployment::new(Arc::new(Topology::from_nodes([target])));
    let results = deployment.deploy(&[object.clone()], true).await;
    let handle = results[0].as_ref().expect("deployed");

    // State followed the object to b.
    assert_eq!(handle.invoke("get", &[]).await?, Value::I64(5));

    // Calls on the local object now run on the replica, not the local body.
    assert_eq!(object.call("add", &[Value::I64(2)]).await?, Value::I64(7));
    assert_eq!(object.call_direct("get", &[]).await?, Value::I64(5));
    assert_eq!(b.local().instance_count(), 1);
    Ok(())
}

// --- Test 3: Deployment Without State Copy ---

#[tokio::test]
async fn test_deploy_struct_starts_from_constructor_state() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b"]);
    let a = &runtimes[0];

    let object = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("tally"));
    object.call("add", &[Value::I64(5)]).await?;

    let target = a.resolve("//h/b").expect("route to b");
    let deployment = Deployment::new(Arc::new(Topology::from_nodes([target])));
    let results = deployment.deploy_struct(&[object.clone()]).await;
    let handle = results[0].as_ref().expect("deployed");

    assert_eq!(handle.invoke("get", &[]).await?, Value::I64(0));
    assert_eq!(object.call_direct("get", &[]).await?, Value::I64(5));
    Ok(())
}

// --- Test 4: Replication Is Idempotent ---

#[tokio::test]
async fn test_replication_skips_nodes_that_already_hold_the_name() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b", "//h/c"]);
    let (a, b, c) = (&runtimes[0], &runtimes[1], &runtimes[2]);
    a.attach("//h/b").expect("route to b");
    a.attach("//h/c").expect("route to c");

    let object = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("tally"));
    object.call("add", &[Value::I64(5)]).await?;

    let deployment = Deployment::new(a.topology());
    let first = deployment.replicate(&object, None).await;
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(ReplicaOutcome::is_created));
    let replica = first[0].handle().expect("replica handle");
    assert_eq!(replica.invoke("get", &[]).await?, Value::I64(5));

    let second = deployment.replicate(&object, None).await;
    assert!(
        second
            .iter()
            .all(|o| matches!(o, ReplicaOutcome::AlreadyPresent(_)))
    );
    assert_eq!(b.local().instance_count(), 1);
    assert_eq!(c.local().instance_count(), 1);
    Ok(())
}

// --- Test 5: Round-Robin Load Balancing ---

#[tokio::test]
async fn test_round_robin_rotates_through_replicas() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/s0", "//h/s1", "//h/s2"]);
    let a = &runtimes[0];
    for (name, count) in [("//h/s0", 10), ("//h/s1", 20), ("//h/s2", 30)] {
        let node = a.attach(name).expect("route");
        place_counter(&node, "tally", count).await?;
    }

    let object = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("tally"));
    object
        .install_proxy(
            RoutingPolicy::LoadBalanceRoundRobin {
                object_name: "tally".to_string(),
                topology: a.topology(),
                scope: None,
            }
            .build(),
        )
        .await;

    let mut seen = Vec::new();
    for _ in 0..7 {
        seen.push(object.call("add", &[Value::I64(0)]).await?);
    }
    let expected: Vec<Value> = [10, 20, 30, 10, 20, 30, 10]
        .into_iter()
        .map(Value::I64)
        .collect();
    assert_eq!(seen, expected);
    Ok(())
}

// --- Test 6: Broadcast ---

#[tokio::test]
async fn test_broadcast_reaches_every_replica_and_returns_the_last() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/s0", "//h/s1", "//h/s2"]);
    let a = &runtimes[0];
    let mut handles = Vec::new();
    for (name, count) in [("//h/s0", 10), ("//h/s1", 20), ("//h/s2", 30)] {
        let node = a.attach(name).expect("route");
        handles.push(place_counter(&node, "tally", count).await?);
    }

    let object = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("tally"));
    object
        .install_proxy(
            RoutingPolicy::Broadcast {
                object_name: "tally".to_string(),
                topology: a.topology(),
                scope: None,
            }
            .build(),
        )
        .await;

    let result = object.call("add", &[Value::I64(1)]).await?;
    assert_eq!(result, Value::I64(31));
    let mut counts = Vec::new();
    for handle in &handles {
        counts.push(handle.invoke("get", &[]).await?);
    }
    assert_eq!(
        counts,
        vec![Value::I64(11), Value::I64(21), Value::I64(31)]
    );
    Ok(())
}

// --- Test 7: Local Fallback, Then Rebind ---

#[tokio::test]
async fn test_calls_fall_back_locally_until_replicas_appear() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b"]);
    let a = &runtimes[0];

    let object = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("tally"));
    object.call("add", &[Value::I64(100)]).await?;
    object
        .install_proxy(
            RoutingPolicy::LoadBalanceRoundRobin {
                object_name: "tally".to_string(),
                topology: a.topology(),
                scope: None,
            }
            .build(),
        )
        .await;

    // Nobody else holds the name yet, so the call runs on the local body.
    assert_eq!(object.call("add", &[Value::I64(1)]).await?, Value::I64(101));

    let node = a.attach("//h/b").expect("route to b");
    place_counter(&node, "tally", 10).await?;

    // Rebinding picks up the new replica; the local body stays put.
    assert_eq!(object.call("add", &[Value::I64(1)]).await?, Value::I64(11));
    assert_eq!(object.call_direct("get", &[]).await?, Value::I64(101));
    Ok(())
}

// --- Test 8: Call Context Propagation ---

#[tokio::test]
async fn test_call_context_reaches_the_serving_node() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b"]);
    let a = &runtimes[0];
    let node = a.attach("//h/b").expect("route to b");
    let handle = place_counter(&node, "tally", 0).await?;

    let mut ctx = CallContext::new();
    ctx.set("user", "ada");
    context::scope(ctx, handle.invoke("add", &[Value::I64(1)])).await?;

    assert_eq!(
        handle.invoke("last_user", &[]).await?,
        Value::Str("ada".to_string())
    );
    Ok(())
}

// --- Test 9: Async Stub Mailbox ---

#[tokio::test]
async fn test_async_stub_delivers_results_to_its_mailbox() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b"]);
    let a = &runtimes[0];
    let node = a.attach("//h/b").expect("route to b");
    let handle = place_counter(&node, "tally", 40).await?;

    let object = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("tally"));
    let stub = AsyncStub::new(StubTarget::fixed(handle));
    let mailbox = stub.mailbox();
    object.install_proxy(Box::new(stub)).await;

    assert_eq!(object.call("add", &[Value::I64(2)]).await?, Value::Unit);

    let mut delivered = None;
    for _ in 0..100 {
        if let Some(value) = mailbox.take(0) {
            delivered = Some(value);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(delivered, Some(Value::I64(42)));
    assert_eq!(mailbox.take(0), None);
    assert_eq!(object.call_direct("get", &[]).await?, Value::I64(0));
    Ok(())
}

// --- Test 10: Topology Join ---

#[tokio::test]
async fn test_join_merges_member_lists() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b", "//h/c"]);
    let (a, b, c) = (&runtimes[0], &runtimes[1], &runtimes[2]);
    b.attach("//h/c").expect("route to c");

    let peer = a.resolve("//h/b").expect("route to b");
    let added = a.join(&peer).await?;

    // b itself plus the c it knew about.
    assert_eq!(added, 2);
    assert_eq!(a.topology().len(), 3);
    assert!(a.topology().contains_named("//h/c"));

    // The exchange taught b about a as well, but c never took part.
    assert!(b.topology().contains_named("//h/a"));
    assert_eq!(c.topology().len(), 1);
    Ok(())
}

// --- Test 11: Traffic Accounting ---

#[tokio::test]
async fn test_traffic_is_counted_on_both_sides() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b"]);
    let (a, b) = (&runtimes[0], &runtimes[1]);
    let node = a.attach("//h/b").expect("route to b");
    let handle = place_counter(&node, "tally", 0).await?;

    assert!(a.traffic().total_out() > 0);
    assert!(a.traffic().total_in() > 0);
    assert!(b.traffic().total_in() > 0);
    assert!(b.traffic().total_out() > 0);

    let sent_before = a.traffic().total_out();
    let served_before = b.traffic().total_in();
    handle.invoke("get", &[]).await?;
    assert!(a.traffic().total_out() > sent_before);
    assert!(b.traffic().total_in() > served_before);
    Ok(())
}

// --- Test 12: By-Reference Arguments ---

#[tokio::test]
async fn test_by_ref_argument_travels_as_a_handle() -> anyhow::Result<()> {
    let runtimes = cluster(&["//h/a", "//h/b"]);
    let a = &runtimes[0];
    let node = a.attach("//h/b").expect("route to b");
    let handle = place_counter(&node, "tally", 0).await?;

    let arg = a
        .local()
        .adopt(Box::new(CounterServant::new()), Some("arg"));
    let echoed = handle
        .invoke_flagged("describe", &[arg.ref_value()], &[PassMode::ByRef])
        .await?;

    match echoed {
        Value::List(items) => match items.as_slice() {
            [Value::Handle(obj)] => {
                assert_eq!(obj.node, "//h/a");
                assert_eq!(obj.name.as_deref(), Some("arg"));
            }
            other => panic!("Expected one handle, got {:?}", other),
        },
        other => panic!("Expected a list, got {:?}", other),
    }
    Ok(())
}
