// Dispatcher integration tests
//
// Cache policy, bypass refresh and single-flight behaviour of the dispatcher,
// driven through counting engines.
//
// To run: `cargo test --test dispatch_test -- --nocapture`

mod common;

use common::{table, CountingEngine};
use jobfront::cache::LfuPolicy;
use jobfront::engine::EntityKind;
use jobfront::render::{render_result, BufferSink, OutputKind, RenderContext};
use jobfront::{Dispatcher, ExecutionResult, MemoryCache, ResultCache, ResultKey};
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn hash_of(key: &ResultKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn dispatcher(engine: Arc<CountingEngine>, cache: Arc<MemoryCache>, caching: bool) -> Dispatcher {
    Dispatcher::new("owner", "sales", caching, engine, cache)
}

#[test]
fn test_key_equality_ignores_insertion_order() {
    let mut first = HashMap::new();
    first.insert("a".to_string(), "1".to_string());
    first.insert("b".to_string(), "2".to_string());
    first.insert("c".to_string(), "3".to_string());

    let mut second = HashMap::new();
    second.insert("c".to_string(), "3".to_string());
    second.insert("a".to_string(), "1".to_string());
    second.insert("b".to_string(), "2".to_string());

    let k1 = ResultKey::new("owner", "sales", Some("OUTPUT"), &first);
    let k2 = ResultKey::new("owner", "sales", Some("OUTPUT"), &second);

    assert_eq!(k1, k2);
    assert_eq!(hash_of(&k1), hash_of(&k2));
}

#[test]
fn test_no_engine_call_on_hit() {
    let engine = CountingEngine::table(1);
    let cache = Arc::new(MemoryCache::unbounded());
    let key = ResultKey::new("owner", "sales", None, &params(&[("x", "1")]));
    cache.put(key, Arc::new(table(2, 2)));

    let result = dispatcher(engine.clone(), cache, true)
        .dispatch(&params(&[("x", "1")]), None, false)
        .unwrap()
        .unwrap();

    assert_eq!(engine.calls(), 0);
    assert_eq!(result.row_count(), 2);
}

#[test]
fn test_bypass_refreshes_cache() {
    let engine = CountingEngine::table(3);
    let cache = Arc::new(MemoryCache::unbounded());
    let key = ResultKey::new("owner", "sales", None, &params(&[("x", "1")]));
    let stale = Arc::new(table(1, 1));
    cache.put(key.clone(), Arc::clone(&stale));

    let fresh = dispatcher(engine.clone(), cache.clone(), true)
        .dispatch(&params(&[("x", "1")]), None, true)
        .unwrap()
        .unwrap();

    assert_eq!(engine.calls(), 1);
    let stored = cache.get(&key).unwrap();
    assert!(Arc::ptr_eq(&stored, &fresh));
    assert!(!Arc::ptr_eq(&stored, &stale));
    assert_eq!(stored.row_count(), 3);
    // The replaced value itself is untouched
    assert_eq!(stale.row_count(), 1);
}

#[test]
fn test_caching_disabled_always_executes() {
    let engine = CountingEngine::table(1);
    let cache = Arc::new(MemoryCache::unbounded());
    let dispatcher = dispatcher(engine.clone(), cache.clone(), false);

    dispatcher.dispatch(&params(&[("x", "1")]), None, false).unwrap();
    assert_eq!(engine.calls(), 1);
    dispatcher.dispatch(&params(&[("x", "1")]), None, false).unwrap();
    assert_eq!(engine.calls(), 2);
    dispatcher.dispatch(&params(&[("x", "1")]), None, true).unwrap();
    assert_eq!(engine.calls(), 3);

    assert!(cache.is_empty());
}

#[test]
fn test_full_lfu_cache_serves_repeat_request() {
    let engine = CountingEngine::table(1);
    let cache = Arc::new(MemoryCache::with_policy(2, Box::new(LfuPolicy)));
    for x in ["a", "b"] {
        let key = ResultKey::new("owner", "sales", None, &params(&[("x", x)]));
        cache.put(key.clone(), Arc::new(table(1, 1)));
        assert!(cache.get(&key).is_some());
    }
    let dispatcher = dispatcher(engine.clone(), cache, true);

    dispatcher.dispatch(&params(&[("x", "c")]), None, false).unwrap();
    dispatcher.dispatch(&params(&[("x", "c")]), None, false).unwrap();

    assert_eq!(engine.calls(), 1);
}

#[test]
fn test_single_flight_for_same_key() {
    let engine =
        CountingEngine::with_delay(Duration::from_millis(200), |_, _| Ok(Some(table(2, 2))));
    let cache = Arc::new(MemoryCache::unbounded());
    let dispatcher = Arc::new(dispatcher(engine.clone(), cache, true));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                dispatcher
                    .dispatch(&params(&[("x", "1")]), None, false)
                    .unwrap()
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<Arc<ExecutionResult>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(engine.calls(), 1);
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
    assert_eq!(dispatcher.in_flight(), 0);
}

#[test]
fn test_unrelated_keys_run_concurrently() {
    let delay = Duration::from_millis(400);
    let engine = CountingEngine::with_delay(delay, |_, _| Ok(Some(table(1, 1))));
    let cache = Arc::new(MemoryCache::unbounded());
    let dispatcher = Arc::new(dispatcher(engine.clone(), cache, true));
    let barrier = Arc::new(Barrier::new(2));

    let start = Instant::now();
    let handles: Vec<_> = ["1", "2"]
        .into_iter()
        .map(|x| {
            let dispatcher = Arc::clone(&dispatcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                dispatcher.dispatch(&params(&[("x", x)]), None, false).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.calls(), 2);
    assert!(start.elapsed() < delay * 2);
}

#[test]
fn test_end_to_end_json_from_cache() {
    let engine = CountingEngine::table(3);
    let cache = Arc::new(MemoryCache::unbounded());
    let dispatcher = dispatcher(engine.clone(), cache, true);

    let render = |result: Option<Arc<ExecutionResult>>| {
        let mut sink = BufferSink::new();
        let mut ctx = RenderContext::new(
            &mut sink,
            OutputKind::Inferred,
            EntityKind::Transformation,
            false,
        );
        render_result(result.as_deref(), &mut ctx);
        sink.body
    };

    let first = render(dispatcher.dispatch(&params(&[("x", "1")]), None, false).unwrap());
    let second = render(dispatcher.dispatch(&params(&[("x", "1")]), None, false).unwrap());

    assert_eq!(engine.calls(), 1);
    assert_eq!(first, second);

    let body: Value = serde_json::from_slice(&first).unwrap();
    assert_eq!(body["rows"], json!([[0, 1], [10, 11], [20, 21]]));
    assert_eq!(body["columns"].as_array().unwrap().len(), 2);
}
