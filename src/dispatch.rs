//! Request dispatch: cache lookup, single-flight execution and cache refresh.
//!
//! For an entity with caching enabled, every dispatch for a given
//! [`ResultKey`] runs under that key's lock. The lock is held across the cache
//! re-check, the engine call and the store, so concurrent identical requests
//! run the engine once and the waiters pick up the stored result. Unrelated
//! keys never share a lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::cache::ResultCache;
use crate::engine::Engine;
use crate::error::DispatchError;
use crate::key::ResultKey;
use crate::logging::{operations, services, status};
use crate::result::ExecutionResult;

type KeyLocks = HashMap<ResultKey, Arc<Mutex<()>>>;

/// Dispatches requests for one entity
pub struct Dispatcher {
    owner_id: String,
    entity_id: String,
    caching_enabled: bool,
    engine: Arc<dyn Engine>,
    cache: Arc<dyn ResultCache>,
    in_flight: Mutex<KeyLocks>,
}

/// Holds a key's lock entry alive; the entry is dropped with the last holder.
struct KeyLease<'a> {
    in_flight: &'a Mutex<KeyLocks>,
    key: &'a ResultKey,
    lock: Arc<Mutex<()>>,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus ours: nobody else is waiting
        if Arc::strong_count(&self.lock) == 2 {
            in_flight.remove(self.key);
        }
    }
}

impl Dispatcher {
    pub fn new(
        owner_id: impl Into<String>,
        entity_id: impl Into<String>,
        caching_enabled: bool,
        engine: Arc<dyn Engine>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            entity_id: entity_id.into(),
            caching_enabled,
            engine,
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled
    }

    /// Produce the result for a request.
    ///
    /// `Ok(None)` means the engine produced nothing. Engine failures are
    /// returned as [`DispatchError::Engine`] and never cached.
    pub fn dispatch(
        &self,
        parameters: &HashMap<String, String>,
        output_selector: Option<&str>,
        bypass_cache: bool,
    ) -> Result<Option<Arc<ExecutionResult>>, DispatchError> {
        let key = ResultKey::new(&self.owner_id, &self.entity_id, output_selector, parameters);

        if !self.caching_enabled {
            debug!(
                service = services::DISPATCHER,
                operation = operations::DISPATCH,
                entity = %self.entity_id,
                "caching disabled, executing directly"
            );
            return Ok(self.execute(&key)?.map(Arc::new));
        }

        let lease = self.lease(&key);
        let _guard = lease.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.dispatch_locked(&key, bypass_cache)
    }

    /// Number of keys currently holding a lock entry
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, KeyLocks> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lease<'a>(&'a self, key: &'a ResultKey) -> KeyLease<'a> {
        let lock = Arc::clone(self.lock_in_flight().entry(key.clone()).or_default());
        KeyLease {
            in_flight: &self.in_flight,
            key,
            lock,
        }
    }

    fn dispatch_locked(
        &self,
        key: &ResultKey,
        bypass_cache: bool,
    ) -> Result<Option<Arc<ExecutionResult>>, DispatchError> {
        if bypass_cache {
            info!(
                service = services::DISPATCHER,
                operation = operations::DISPATCH,
                status = status::BYPASS,
                entity = %self.entity_id,
                object_id = %key.digest(),
                "cache bypass requested, refreshing"
            );
        } else if let Some(hit) = self.cache.get(key) {
            info!(
                service = services::DISPATCHER,
                operation = operations::DISPATCH,
                status = status::HIT,
                entity = %self.entity_id,
                object_id = %key.digest(),
                "cache hit"
            );
            return Ok(Some(hit));
        } else {
            info!(
                service = services::DISPATCHER,
                operation = operations::DISPATCH,
                status = status::MISS,
                entity = %self.entity_id,
                object_id = %key.digest(),
                "cache miss"
            );
        }

        let Some(fresh) = self.execute(key)? else {
            return Ok(None);
        };

        let fresh = Arc::new(fresh);
        self.cache.put(key.clone(), Arc::clone(&fresh));
        Ok(Some(fresh))
    }

    fn execute(&self, key: &ResultKey) -> Result<Option<ExecutionResult>, DispatchError> {
        let start = Instant::now();

        match self.engine.execute(key.parameters(), key.output_selector()) {
            Ok(result) => {
                debug!(
                    service = services::DISPATCHER,
                    operation = operations::EXECUTE,
                    status = status::SUCCESS,
                    entity = %self.entity_id,
                    object_id = %key.digest(),
                    produced = result.is_some(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "engine finished"
                );
                Ok(result)
            }
            Err(source) => {
                error!(
                    service = services::DISPATCHER,
                    operation = operations::EXECUTE,
                    status = status::ERROR,
                    entity = %self.entity_id,
                    object_id = %key.digest(),
                    error = %source,
                    "engine failed"
                );
                Err(DispatchError::Engine {
                    entity: self.entity_id.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::EngineError;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Outcome {
        Rows,
        Nothing,
        Fail,
    }

    struct StubEngine {
        calls: AtomicUsize,
        outcome: Outcome,
    }

    impl StubEngine {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Engine for StubEngine {
        fn execute(
            &self,
            _parameters: &BTreeMap<String, String>,
            _output_selector: Option<&str>,
        ) -> Result<Option<ExecutionResult>, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as i32;
            match self.outcome {
                Outcome::Rows => Ok(Some(ExecutionResult::new(true, call))),
                Outcome::Nothing => Ok(None),
                Outcome::Fail => Err(EngineError::Failed("boom".to_string())),
            }
        }
    }

    fn params() -> HashMap<String, String> {
        HashMap::from([("x".to_string(), "1".to_string())])
    }

    fn setup(outcome: Outcome, caching: bool) -> (Arc<StubEngine>, Arc<MemoryCache>, Dispatcher) {
        let engine = StubEngine::new(outcome);
        let cache = Arc::new(MemoryCache::unbounded());
        let dispatcher = Dispatcher::new("owner", "sales", caching, engine.clone(), cache.clone());
        (engine, cache, dispatcher)
    }

    #[test]
    fn test_hit_does_not_call_engine() {
        let (engine, cache, dispatcher) = setup(Outcome::Rows, true);
        let key = ResultKey::new("owner", "sales", None, &params());
        cache.put(key, Arc::new(ExecutionResult::new(true, 7)));

        let result = dispatcher.dispatch(&params(), None, false).unwrap().unwrap();

        assert_eq!(result.exit_status(), 7);
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn test_miss_executes_and_stores() {
        let (engine, cache, dispatcher) = setup(Outcome::Rows, true);

        let first = dispatcher.dispatch(&params(), None, false).unwrap().unwrap();
        let second = dispatcher.dispatch(&params(), None, false).unwrap().unwrap();

        assert_eq!(engine.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_bypass_refreshes_entry() {
        let (engine, cache, dispatcher) = setup(Outcome::Rows, true);
        let key = ResultKey::new("owner", "sales", None, &params());
        let old = Arc::new(ExecutionResult::new(true, 99));
        cache.put(key.clone(), Arc::clone(&old));

        let fresh = dispatcher.dispatch(&params(), None, true).unwrap().unwrap();

        assert_eq!(engine.calls(), 1);
        assert_eq!(fresh.exit_status(), 0);
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &fresh));
        assert_eq!(old.exit_status(), 99);
    }

    #[test]
    fn test_disabled_never_touches_cache() {
        let (engine, cache, dispatcher) = setup(Outcome::Rows, false);

        dispatcher.dispatch(&params(), None, false).unwrap();
        dispatcher.dispatch(&params(), None, true).unwrap();

        assert_eq!(engine.calls(), 2);
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (0, 0, 0));
    }

    #[test]
    fn test_engine_failure_is_propagated_and_not_cached() {
        let (engine, cache, dispatcher) = setup(Outcome::Fail, true);

        let err = dispatcher.dispatch(&params(), None, false).unwrap_err();
        assert!(matches!(err, DispatchError::Engine { ref entity, .. } if entity == "sales"));

        assert!(dispatcher.dispatch(&params(), None, false).is_err());
        assert_eq!(engine.calls(), 2);
        assert!(cache.is_empty());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn test_absent_result_is_not_cached() {
        let (engine, cache, dispatcher) = setup(Outcome::Nothing, true);

        assert!(dispatcher.dispatch(&params(), None, false).unwrap().is_none());
        assert!(dispatcher.dispatch(&params(), None, false).unwrap().is_none());

        assert_eq!(engine.calls(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_selector_is_part_of_key() {
        let (engine, _cache, dispatcher) = setup(Outcome::Rows, true);

        dispatcher.dispatch(&params(), None, false).unwrap();
        dispatcher.dispatch(&params(), Some(""), false).unwrap();
        dispatcher.dispatch(&params(), Some("OUTPUT_B"), false).unwrap();

        // Empty selector and no selector share an entry
        assert_eq!(engine.calls(), 2);
    }
}
