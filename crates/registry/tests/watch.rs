#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use vessel_core::kinds::{Deployment, DeploymentStatus, Route};
use vessel_core::{Context, Error, JsonCodec, Object, Selector};
use vessel_registry::{Registry, WatchEvent};
use vessel_store::{MemoryBackend, Precondition, VersionedStore};

fn registry(backend: MemoryBackend) -> (VersionedStore, Registry<Route>) {
    let store = VersionedStore::new(Arc::new(backend));
    let reg = Registry::new(store.clone(), Arc::new(JsonCodec::default()));
    (store, reg)
}

fn route(name: &str, env: &str) -> Route {
    Route {
        metadata: ObjectMeta {
            name: Some(name.into()),
            labels: Some([("env".to_string(), env.to_string())].into()),
            ..Default::default()
        },
        host: format!("{name}.example.com"),
        service_name: "svc".into(),
        ..Default::default()
    }
}

async fn next<T>(rx: &mut tokio::sync::mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.expect("timed out").expect("stream ended")
}

#[tokio::test]
async fn watch_from_list_version_sees_only_later_changes() {
    let (_, reg) = registry(MemoryBackend::new());
    let ctx = Context::with_namespace("alfa");
    reg.create(&ctx, route("foo", "dev")).await.unwrap();
    let list = reg.list(&ctx, &Selector::everything(), &Selector::everything()).await.unwrap();

    let mut w = reg.watch(&ctx, Selector::everything(), Selector::everything(), list.resource_version()).await.unwrap();
    reg.create(&ctx, route("bar", "dev")).await.unwrap();
    let mut foo = reg.get(&ctx, "foo").await.unwrap();
    foo.host = "moved.example.com".into();
    reg.update(&ctx, foo).await.unwrap();
    reg.delete(&ctx, "bar").await.unwrap();

    match next(&mut w.rx).await {
        WatchEvent::Added(r) => assert_eq!(r.name(), "bar"),
        other => panic!("unexpected {other:?}"),
    }
    match next(&mut w.rx).await {
        WatchEvent::Modified(r) => assert_eq!(r.host, "moved.example.com"),
        other => panic!("unexpected {other:?}"),
    }
    let deleted = next(&mut w.rx).await;
    assert_eq!(deleted.type_name(), "DELETED");
    assert_eq!(deleted.object().name(), "bar");
    w.cancel.cancel();
}

#[tokio::test]
async fn resume_token_is_exclusive() {
    let (_, reg) = registry(MemoryBackend::new());
    let ctx = Context::with_namespace("alfa");
    let a = reg.create(&ctx, route("a", "dev")).await.unwrap();
    reg.create(&ctx, route("b", "dev")).await.unwrap();

    let mut w = reg
        .watch(&ctx, Selector::everything(), Selector::everything(), a.resource_version().unwrap())
        .await
        .unwrap();
    let ev = next(&mut w.rx).await;
    assert_eq!(ev.object().name(), "b");
}

#[tokio::test]
async fn empty_or_zero_token_watches_from_now() {
    let (_, reg) = registry(MemoryBackend::new());
    let ctx = Context::with_namespace("alfa");
    reg.create(&ctx, route("old", "dev")).await.unwrap();
    for token in ["", "0"] {
        let mut w = reg.watch(&ctx, Selector::everything(), Selector::everything(), token).await.unwrap();
        let name = format!("new{}", token.len());
        reg.create(&ctx, route(&name, "dev")).await.unwrap();
        assert_eq!(next(&mut w.rx).await.object().name(), name);
    }
}

#[tokio::test]
async fn selectors_filter_events() {
    let (_, reg) = registry(MemoryBackend::new());
    let ctx = Context::with_namespace("alfa");
    let dev: Selector = "env=dev".parse().unwrap();
    let mut w = reg.watch(&ctx, dev, Selector::everything(), "").await.unwrap();
    reg.create(&ctx, route("prod-route", "prod")).await.unwrap();
    reg.create(&ctx, route("dev-route", "dev")).await.unwrap();
    assert_eq!(next(&mut w.rx).await.object().name(), "dev-route");
}

#[tokio::test]
async fn watch_is_namespace_scoped() {
    let (_, reg) = registry(MemoryBackend::new());
    let mut w = reg.watch(&Context::with_namespace("alfa"), Selector::everything(), Selector::everything(), "").await.unwrap();
    reg.create(&Context::with_namespace("alfabet"), route("x", "dev")).await.unwrap();
    reg.create(&Context::with_namespace("alfa"), route("y", "dev")).await.unwrap();
    assert_eq!(next(&mut w.rx).await.object().name(), "y");
}

#[tokio::test]
async fn undecodable_entries_are_skipped() {
    let (store, reg) = registry(MemoryBackend::new());
    let ctx = Context::with_namespace("alfa");
    let mut w = reg.watch(&ctx, Selector::everything(), Selector::everything(), "").await.unwrap();
    store.put("/routes/alfa/garbage", b"{not json".to_vec(), Precondition::Unconditional).await.unwrap();
    reg.create(&ctx, route("fine", "dev")).await.unwrap();
    assert_eq!(next(&mut w.rx).await.object().name(), "fine");
}

#[tokio::test]
async fn malformed_token_is_bad_request() {
    let (_, reg) = registry(MemoryBackend::new());
    let err = reg
        .watch(&Context::with_namespace("alfa"), Selector::everything(), Selector::everything(), "abc")
        .await
        .err()
        .expect("watch should fail");
    assert!(matches!(err, Error::BadRequest(_)), "{err}");
}

#[tokio::test]
async fn expired_token_is_conflict() {
    let (_, reg) = registry(MemoryBackend::with_history(2));
    let ctx = Context::with_namespace("alfa");
    for name in ["a", "b", "c", "d"] {
        reg.create(&ctx, route(name, "dev")).await.unwrap();
    }
    let err = reg.watch(&ctx, Selector::everything(), Selector::everything(), "1").await.err().expect("too old");
    assert!(err.is_conflict());
    assert_eq!(err.to_string(), "Route watch: resource version 1 is too old");
}

#[tokio::test]
async fn field_selector_on_deployment_status() {
    let backend = Arc::new(MemoryBackend::new());
    let reg: Registry<Deployment> = Registry::new(VersionedStore::new(backend), Arc::new(JsonCodec::default()));
    let ctx = Context::with_namespace("alfa");
    let running: Selector = "status=Running".parse().unwrap();
    let mut w = reg.watch(&ctx, Selector::everything(), running, "").await.unwrap();
    let mut d = Deployment { metadata: ObjectMeta { name: Some("d1".into()), ..Default::default() }, ..Default::default() };
    d = reg.create(&ctx, d).await.unwrap();
    d.status = DeploymentStatus::Running;
    reg.update(&ctx, d).await.unwrap();
    match next(&mut w.rx).await {
        WatchEvent::Modified(d) => assert_eq!(d.status, DeploymentStatus::Running),
        other => panic!("unexpected {other:?}"),
    }
}

async fn settle_tasks() -> usize {
    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::runtime::Handle::current().metrics().num_alive_tasks()
}

#[tokio::test]
async fn cancelled_watches_release_their_tasks() {
    let (_, reg) = registry(MemoryBackend::new());
    let quiet = Context::with_namespace("quiet");
    let busy = Context::with_namespace("busy");
    let before = settle_tasks().await;

    for _ in 0..50 {
        let w = reg.watch(&quiet, Selector::everything(), Selector::everything(), "").await.unwrap();
        w.cancel.cancel();
    }
    for i in 0..5 {
        reg.create(&busy, route(&format!("r{i}"), "dev")).await.unwrap();
    }
    assert_eq!(settle_tasks().await, before);
}

#[tokio::test]
async fn dropped_watches_release_their_tasks() {
    let (_, reg) = registry(MemoryBackend::new());
    let quiet = Context::with_namespace("quiet");
    let before = settle_tasks().await;

    for _ in 0..20 {
        drop(reg.watch(&quiet, Selector::everything(), Selector::everything(), "").await.unwrap());
    }
    // Dropping only the receiver ends the stream too.
    let mut kept = Vec::new();
    for _ in 0..20 {
        let w = reg.watch(&quiet, Selector::everything(), Selector::everything(), "").await.unwrap();
        drop(w.rx);
        kept.push(w.cancel);
    }
    assert_eq!(settle_tasks().await, before);
    drop(kept);
}
