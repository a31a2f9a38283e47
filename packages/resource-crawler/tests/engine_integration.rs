//! End-to-end crawl behavior against the in-memory store.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use resource_crawler::scope::{self, type_equals};
use resource_crawler::testing::{
    init_tracing, CountingTransform, FailingStore, FailingTransform, MockFetcher,
    PanickingTransform, RecordingTap,
};
use resource_crawler::web;
use resource_crawler::{
    CrawlerError, Engine, EngineConfig, HandledState, HandlerRegistry, HandlerSpec, MemoryStore,
    Resource, ResourceDescriptor, ResourceId, ResourceQuery, ResourceStore, TransformOutput,
    KIND_EMPTY, KIND_ERROR,
};

// =============================================================================
// Helpers
// =============================================================================

fn engine(store: &Arc<MemoryStore>, registry: Arc<HandlerRegistry>) -> Engine {
    engine_with(store, registry, EngineConfig::default())
}

fn engine_with(store: &Arc<MemoryStore>, registry: Arc<HandlerRegistry>, config: EngineConfig) -> Engine {
    Engine::builder()
        .with_shared_store(store.clone())
        .with_registry(registry)
        .with_config(config)
        .build()
        .expect("engine builds")
}

fn registry(specs: impl IntoIterator<Item = HandlerSpec>) -> Arc<HandlerRegistry> {
    let registry = HandlerRegistry::new();
    registry.register(specs);
    Arc::new(registry)
}

/// url → page with the same payload.
fn page_maker() -> CountingTransform {
    CountingTransform::new(|r| {
        vec![ResourceDescriptor::of_kind(
            "page",
            r.data.as_str().unwrap_or_default(),
        )]
    })
}

fn children_of(store: &MemoryStore, parent: ResourceId) -> Vec<Resource> {
    store
        .all()
        .into_iter()
        .filter(|r| r.parent_resource == Some(parent))
        .collect()
}

async fn state_of(store: &MemoryStore, id: ResourceId) -> HandledState {
    store.get(id).await.unwrap().unwrap().handled_state
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn resolver_produces_one_resolved_child() {
    init_tracing();
    let fetcher = Arc::new(
        MockFetcher::new()
            .with_redirect("http://x/a", "/final")
            .with_page("http://x/final", "text/html", "<p/>"),
    );
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(HandlerRegistry::new());
    let resolver = registry.register_one(web::url_resolve_handler(fetcher));
    let engine = engine(&store, registry);

    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    engine.crawl().finish().await.unwrap();

    let children = children_of(&store, seed.id);
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert_eq!(child.kind, "url");
    assert_eq!(child.data.as_str(), Some("http://x/final"));
    assert_eq!(child.meta["resolved"], true);
    assert_eq!(child.depth, 1);
    assert_eq!(child.parent_handler_fingerprint.as_ref(), Some(resolver.fingerprint()));
    assert_eq!(state_of(&store, seed.id).await, HandledState::Handled);
    // resolved url matches no handler
    assert_eq!(state_of(&store, child.id).await, HandledState::Orphaned);
}

#[tokio::test]
async fn seed_without_handlers_is_orphaned_and_emitted_alone() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, Arc::new(HandlerRegistry::new()));
    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();

    let (emitted, stats) = engine.crawl().collect().await.unwrap();

    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].id, seed.id);
    assert_eq!(emitted[0].handled_state, HandledState::Orphaned);
    assert_eq!(stats.orphaned, 1);
    assert_eq!(stats.created, 0);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn lineage_chain_ignores_external_stage_input() {
    let store = Arc::new(MemoryStore::new());
    let registry = HandlerRegistry::new();
    let stages = registry.register_sequence([
        HandlerSpec::from_sync_fn("a-to-b", "1", |_| Ok(ResourceDescriptor::new("b").into()))
            .with_scope(type_equals("a")),
        HandlerSpec::from_sync_fn("b-to-c", "1", |_| Ok(ResourceDescriptor::new("c").into()))
            .with_scope(type_equals("b")),
    ]);
    let engine = engine(&store, Arc::new(registry));

    let external_b = engine.seed(ResourceDescriptor::new("b")).await.unwrap();
    let a = engine.seed(ResourceDescriptor::new("a")).await.unwrap();
    engine.crawl().finish().await.unwrap();

    assert_eq!(state_of(&store, external_b.id).await, HandledState::Orphaned);
    assert!(children_of(&store, external_b.id).is_empty());

    let produced_b = children_of(&store, a.id);
    assert_eq!(produced_b.len(), 1);
    assert_eq!(produced_b[0].kind, "b");
    let c = children_of(&store, produced_b[0].id);
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].kind, "c");
    assert_eq!(c[0].parent_handler_fingerprint.as_ref(), Some(stages[1].fingerprint()));
}

// =============================================================================
// Memoization
// =============================================================================

#[tokio::test]
async fn transform_runs_once_across_runs_and_handler_instances() {
    let store = Arc::new(MemoryStore::new());

    let first = page_maker();
    let first_calls = first.counter();
    let run1 = engine(
        &store,
        registry([HandlerSpec::new("page", "1", first).with_scope(type_equals("url"))]),
    );
    let seed = run1.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    run1.crawl().finish().await.unwrap();
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    let first_children = children_of(&store, seed.id);
    assert_eq!(first_children.len(), 1);

    // "restart": new registry, new handler instance, same fingerprint
    let second = page_maker();
    let second_calls = second.counter();
    let run2 = engine(
        &store,
        registry([HandlerSpec::new("page", "1", second).with_scope(type_equals("url"))]),
    );
    let (emitted, stats) = run2.crawl().collect().await.unwrap();

    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.transform_calls, 0);
    assert_eq!(children_of(&store, seed.id).len(), 1);
    assert!(emitted.iter().any(|r| r.id == first_children[0].id));
}

#[tokio::test]
async fn fingerprint_change_invalidates_cache() {
    let store = Arc::new(MemoryStore::new());
    let run1 = engine(
        &store,
        registry([HandlerSpec::new("page", "1", page_maker()).with_scope(type_equals("url"))]),
    );
    let seed = run1.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    run1.crawl().finish().await.unwrap();

    let changed = page_maker();
    let calls = changed.counter();
    let run2 = engine(
        &store,
        registry([HandlerSpec::new("page", "2", changed).with_scope(type_equals("url"))]),
    );
    let stats = run2.crawl().finish().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(children_of(&store, seed.id).len(), 2);
}

#[tokio::test]
async fn empty_output_is_cached_as_sentinel() {
    let store = Arc::new(MemoryStore::new());
    let silent = CountingTransform::silent();
    let calls = silent.counter();
    let run1 = engine(&store, registry([HandlerSpec::new("silent", "1", silent)]));
    let seed = run1.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();

    let (emitted, stats) = run1.crawl().collect().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.sentinels, 1);
    let sentinels: Vec<_> = emitted.iter().filter(|r| r.kind == KIND_EMPTY).collect();
    assert_eq!(sentinels.len(), 1);
    assert_eq!(sentinels[0].parent_resource, Some(seed.id));
    // sentinels are never dispatched
    assert_eq!(stats.dispatched, 1);

    let again = CountingTransform::silent();
    let again_calls = again.counter();
    let run2 = engine(&store, registry([HandlerSpec::new("silent", "1", again)]));
    let stats = run2.crawl().finish().await.unwrap();
    assert_eq!(again_calls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn dont_cache_handlers_always_run() {
    let store = Arc::new(MemoryStore::new());
    let transform = page_maker();
    let calls = transform.counter();
    let engine = engine(
        &store,
        registry([HandlerSpec::new("page", "1", transform)
            .with_scope(type_equals("url"))
            .dont_cache()]),
    );
    engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();

    engine.crawl().finish().await.unwrap();
    engine.crawl().finish().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Matching and failures
// =============================================================================

#[tokio::test]
async fn non_matching_handler_is_never_invoked() {
    let store = Arc::new(MemoryStore::new());
    let never = page_maker();
    let calls = never.counter();
    let engine = engine(
        &store,
        registry([
            HandlerSpec::new("never", "1", never).with_scope(scope::custom("never", |_| false))
        ]),
    );
    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    engine.crawl().finish().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(state_of(&store, seed.id).await, HandledState::Orphaned);
    assert!(children_of(&store, seed.id).is_empty());
}

#[tokio::test]
async fn failing_transform_yields_one_error_and_siblings_still_run() {
    let store = Arc::new(MemoryStore::new());
    let sibling = page_maker();
    let calls = sibling.counter();
    let engine = engine(
        &store,
        registry([
            HandlerSpec::new("broken", "1", FailingTransform::new("selector not found"))
                .with_scope(type_equals("url")),
            HandlerSpec::new("page", "1", sibling).with_scope(type_equals("url")),
        ]),
    );
    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    let stats = engine.crawl().finish().await.unwrap();

    assert_eq!(stats.failures, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let children = children_of(&store, seed.id);
    let errors: Vec<_> = children.iter().filter(|r| r.kind == KIND_ERROR).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].meta["handler"], "broken");
    assert_eq!(errors[0].data.field("message").unwrap(), "selector not found");
    assert!(children.iter().any(|r| r.kind == "page"));
}

#[tokio::test]
async fn panicking_transform_yields_error_resource() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        &store,
        registry([HandlerSpec::new("explodes", "1", PanickingTransform).with_scope(type_equals("url"))]),
    );
    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    let stats = engine.crawl().finish().await.unwrap();

    assert_eq!(stats.failures, 1);
    let children = children_of(&store, seed.id);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].kind, KIND_ERROR);
}

#[tokio::test]
async fn store_failure_aborts_run_with_resource_id() {
    let memory = Arc::new(MemoryStore::new());
    let failing = FailingStore::new(memory.clone()).fail_creates_of_kind("page");
    let engine = Engine::builder()
        .with_store(failing)
        .with_registry(registry([
            HandlerSpec::new("page", "1", page_maker()).with_scope(type_equals("url"))
        ]))
        .build()
        .unwrap();
    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();

    let err = engine.crawl().finish().await.unwrap_err();
    match err {
        CrawlerError::Store { resource_id, .. } => assert_eq!(resource_id, seed.id),
        other => panic!("expected store error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_store_fails_at_build() {
    let err = Engine::builder()
        .with_registry(Arc::new(HandlerRegistry::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, CrawlerError::Config { .. }));
}

// =============================================================================
// Engine mechanics
// =============================================================================

#[tokio::test]
async fn depth_follows_lineage() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        &store,
        registry([
            HandlerSpec::from_sync_fn("fan-out", "1", |_| {
                Ok(vec![ResourceDescriptor::new("a"), ResourceDescriptor::new("a")].into())
            })
            .with_scope(type_equals("url")),
            HandlerSpec::from_sync_fn("a-to-b", "1", |_| Ok(ResourceDescriptor::new("b").into()))
                .with_scope(type_equals("a")),
            HandlerSpec::from_fn("b-to-c", "1", |_| async {
                Ok::<_, anyhow::Error>(TransformOutput::One(ResourceDescriptor::new("c")))
            })
            .with_scope(type_equals("b")),
        ]),
    );
    engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    engine.seed(ResourceDescriptor::url("http://x/b")).await.unwrap();
    engine.crawl().finish().await.unwrap();

    let all = store.all();
    let by_id: HashMap<ResourceId, &Resource> = all.iter().map(|r| (r.id, r)).collect();
    for r in &all {
        match r.parent_resource {
            None => assert_eq!(r.depth, 0),
            Some(parent) => assert_eq!(r.depth, by_id[&parent].depth + 1),
        }
    }
    assert_eq!(store.count(&ResourceQuery::new().with_kind("c")), 4);
    assert_eq!(store.count(&ResourceQuery::new().with_depth(3)), 4);
    // everything except the resources no handler matched ends handled
    assert_eq!(store.count(&ResourceQuery::new().with_state(HandledState::Pending)), 0);
}

#[tokio::test]
async fn each_resource_dispatched_once_per_run() {
    let store = Arc::new(MemoryStore::new());
    let transform = page_maker();
    let calls = transform.counter();
    let engine = engine(
        &store,
        registry([HandlerSpec::new("page", "1", transform).with_scope(type_equals("url"))]),
    );
    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();

    let stats = engine
        .crawl_from(vec![seed.clone(), seed.clone(), seed])
        .finish()
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // seed + page
    assert_eq!(stats.dispatched, 2);
}

#[tokio::test]
async fn stream_output_becomes_children() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        &store,
        registry([HandlerSpec::from_sync_fn("links", "1", |_| {
            Ok(TransformOutput::stream(futures::stream::iter(
                ["http://x/1", "http://x/2", "http://x/3"]
                    .into_iter()
                    .map(|u| Ok(ResourceDescriptor::of_kind("link", u))),
            )))
        })
        .with_scope(type_equals("url"))]),
    );
    let seed = engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();
    engine.crawl().finish().await.unwrap();

    let mut links: Vec<String> = children_of(&store, seed.id)
        .into_iter()
        .filter_map(|r| r.data.as_str().map(str::to_string))
        .collect();
    links.sort();
    assert_eq!(links, vec!["http://x/1", "http://x/2", "http://x/3"]);
}

#[tokio::test]
async fn bounded_concurrency_reaches_same_result() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        &store,
        registry([HandlerSpec::from_sync_fn("fan-out", "1", |_| {
            Ok((0..3)
                .map(|i| ResourceDescriptor::of_kind("leaf", serde_json::json!(i)))
                .collect::<Vec<_>>()
                .into())
        })
        .with_scope(type_equals("url"))]),
        EngineConfig::default().with_max_in_flight(1),
    );
    for i in 0..4 {
        engine
            .seed(ResourceDescriptor::url(format!("http://x/{i}")))
            .await
            .unwrap();
    }
    let stats = engine.crawl().finish().await.unwrap();
    assert_eq!(stats.dispatched, 16);
    assert_eq!(store.count(&ResourceQuery::new().with_kind("leaf")), 12);
}

#[tokio::test]
async fn pending_resources_from_an_interrupted_run_are_resumed() {
    let store = Arc::new(MemoryStore::new());
    let transform = page_maker();
    let calls = transform.counter();
    let registry = registry([HandlerSpec::new("page", "1", transform).with_scope(type_equals("url"))]);
    let earlier = registry.register_one(
        HandlerSpec::from_sync_fn("earlier", "1", |_| Ok(TransformOutput::Nothing))
            .with_scope(scope::Predicate::Never),
    );

    let seed = store.insert(ResourceDescriptor::new("site")).await.unwrap();
    let leftover = store
        .create(ResourceDescriptor::url("http://x/left"), &earlier, &seed)
        .await
        .unwrap();

    let engine = engine(&store, registry);
    engine.crawl().finish().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state_of(&store, leftover.id).await, HandledState::Handled);

    let skipping = engine_with(
        &store,
        engine.registry().clone(),
        EngineConfig::default().with_resume_pending(false),
    );
    let stats = skipping.crawl().finish().await.unwrap();
    // only the depth-0 seed
    assert_eq!(stats.dispatched, 1);
}

#[tokio::test]
async fn into_stream_yields_every_finalized_resource() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(
        &store,
        registry([HandlerSpec::new("page", "1", page_maker()).with_scope(type_equals("url"))]),
    );
    engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();

    let results: Vec<_> = engine.crawl().into_stream().collect().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn taps_observe_finalized_resources() {
    let store = Arc::new(MemoryStore::new());
    let tap = RecordingTap::new();
    let engine = Engine::builder()
        .with_shared_store(store.clone())
        .with_registry(registry([
            HandlerSpec::new("page", "1", page_maker()).with_scope(type_equals("url"))
        ]))
        .with_tap(tap.clone())
        .build()
        .unwrap();
    engine.seed(ResourceDescriptor::url("http://x/a")).await.unwrap();

    let (emitted, _) = engine.crawl().collect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut seen: Vec<ResourceId> = tap.seen().iter().map(|r| r.id).collect();
    let mut expected: Vec<ResourceId> = emitted.iter().map(|r| r.id).collect();
    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn watch_mode_picks_up_new_seeds_until_store_closes() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        &store,
        registry([HandlerSpec::new("page", "1", page_maker()).with_scope(type_equals("url"))]),
        EngineConfig::default().with_watch_for_seeds(true),
    );
    let mut crawl = engine.crawl();

    let seed = engine.seed(ResourceDescriptor::url("http://x/late")).await.unwrap();

    let page = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match crawl.next().await {
                Some(r) if r.kind == "page" => break r,
                Some(_) => continue,
                None => panic!("crawl ended before the late seed was processed"),
            }
        }
    })
    .await
    .expect("late seed processed");
    assert_eq!(page.parent_resource, Some(seed.id));

    store.close().await.unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), crawl.finish())
        .await
        .expect("run ends after close")
        .unwrap();
    assert_eq!(stats.handled, 1);
}
