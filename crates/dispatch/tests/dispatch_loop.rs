#![forbid(unsafe_code)]

use std::ops::ControlFlow;

use futures::stream;
use kube::core::DynamicObject;
use kubedyn_core::{ApiStatus, ChangeEvent, EventType, WatchError};
use kubedyn_dispatch::{dispatch, dispatch_into, DispatchOutcome, DispatchStats, DispatchedEvent, ResourceView, ViewSummary};
use serde_json::{json, Value};

fn obj(v: Value) -> DynamicObject {
    serde_json::from_value(v).unwrap()
}

fn deployment() -> DynamicObject {
    obj(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "nginx-deployment", "namespace": "vcase"},
        "spec": {
            "replicas": 3,
            "selector": {"matchLabels": {"app": "nginx"}},
            "template": {
                "metadata": {"labels": {"app": "nginx"}},
                "spec": {"containers": [{"name": "nginx", "image": "nginx:latest"}]}
            }
        },
        "status": {"replicas": 3, "readyReplicas": 2}
    }))
}

fn frobnicator() -> DynamicObject {
    obj(json!({"apiVersion": "example.com/v1", "kind": "Frobnicator", "metadata": {"name": "f"}, "spec": {"x": 1}}))
}

fn configmap(name: &str) -> DynamicObject {
    obj(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name, "namespace": "demo"}, "data": {"k": "v"}}))
}

fn events(items: Vec<Result<ChangeEvent, WatchError>>) -> impl futures::Stream<Item = Result<ChangeEvent, WatchError>> + Unpin {
    stream::iter(items)
}

fn collect_into(out: &mut Vec<DispatchedEvent>) -> impl FnMut(DispatchedEvent) -> ControlFlow<()> + Send + '_ {
    move |ev| {
        out.push(ev);
        ControlFlow::Continue(())
    }
}

#[tokio::test]
async fn deployment_event_exposes_replica_counts() {
    let mut seen = Vec::new();
    let outcome = dispatch(events(vec![Ok(ChangeEvent::Added(deployment()))]), &mut collect_into(&mut seen))
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Closed(s) if s.handled == 1));

    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event_type, EventType::Added);
    assert!(matches!(seen[0].view, ResourceView::Deployment(_)));
    assert_eq!(
        seen[0].view.summary(),
        ViewSummary {
            kind: "Deployment".into(),
            name: "nginx-deployment".into(),
            namespace: Some("vcase".into()),
            replicas: Some(3),
            status_replicas: Some(3),
            ready_replicas: Some(2),
        }
    );
}

#[tokio::test]
async fn unknown_tag_is_ignored_and_loop_continues() {
    let mut seen = Vec::new();
    let outcome = dispatch(
        events(vec![
            Ok(ChangeEvent::Added(frobnicator())),
            Ok(ChangeEvent::Modified(configmap("after"))),
        ]),
        &mut collect_into(&mut seen),
    )
    .await
    .unwrap();
    let stats = outcome.stats();
    assert_eq!((stats.received, stats.ignored, stats.handled), (2, 1, 1));
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event_type, EventType::Modified);
    assert_eq!(seen[0].view.summary().name, "after");
}

#[tokio::test]
async fn undecodable_payload_of_handled_kind_is_skipped() {
    let mut broken = deployment();
    broken.data["spec"]["replicas"] = json!("three");
    let mut seen = Vec::new();
    let outcome = dispatch(
        events(vec![Ok(ChangeEvent::Added(broken)), Ok(ChangeEvent::Deleted(configmap("gone")))]),
        &mut collect_into(&mut seen),
    )
    .await
    .unwrap();
    assert_eq!(outcome.stats().undecodable, 1);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event_type, EventType::Deleted);
}

#[tokio::test]
async fn server_error_event_ends_the_loop() {
    let gone = ApiStatus { code: 410, reason: "Expired".into(), message: "too old resource version".into() };
    let mut seen = Vec::new();
    let err = dispatch(
        events(vec![
            Ok(ChangeEvent::Added(configmap("a"))),
            Ok(ChangeEvent::Error(gone.clone())),
            Ok(ChangeEvent::Added(configmap("never"))),
        ]),
        &mut collect_into(&mut seen),
    )
    .await
    .unwrap_err();
    assert!(err.is_expired());
    assert!(matches!(err, WatchError::Server(ref s) if *s == gone));
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn stream_failure_is_returned() {
    let mut seen = Vec::new();
    let err = dispatch(
        events(vec![
            Ok(ChangeEvent::Added(configmap("a"))),
            Err(WatchError::Stream(kube::Error::Service("connection reset".into()))),
        ]),
        &mut collect_into(&mut seen),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WatchError::Stream(_)));
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn counts_survive_a_failed_stream() {
    let mut stats = DispatchStats::default();
    let mut handler = |_ev: DispatchedEvent| ControlFlow::Continue(());
    let err = dispatch_into(
        events(vec![
            Ok(ChangeEvent::Added(configmap("a"))),
            Ok(ChangeEvent::Added(frobnicator())),
            Err(WatchError::Stream(kube::Error::Service("connection reset".into()))),
        ]),
        &mut handler,
        &mut stats,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WatchError::Stream(_)));
    assert_eq!(stats, DispatchStats { received: 2, handled: 1, ignored: 1, undecodable: 0 });
}

#[tokio::test]
async fn handler_can_stop_the_loop() {
    let mut count = 0;
    let mut handler = |_ev: DispatchedEvent| {
        count += 1;
        if count == 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    };
    let outcome = dispatch(
        events(vec![
            Ok(ChangeEvent::Added(configmap("a"))),
            Ok(ChangeEvent::Added(configmap("b"))),
            Ok(ChangeEvent::Added(configmap("c"))),
        ]),
        &mut handler,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Stopped(s) if s.received == 2));
    assert_eq!(count, 2);
}

#[tokio::test]
async fn empty_stream_closes_cleanly() {
    let mut seen = Vec::new();
    let outcome = dispatch(events(vec![]), &mut collect_into(&mut seen)).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Closed(Default::default()));
}
