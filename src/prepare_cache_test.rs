use pretty_assertions::assert_eq;

use super::*;

fn result(id: u32) -> PrepareResult {
    PrepareResult {
        statement_id: id,
        num_params: 0,
        columns: Arc::from([]),
    }
}

#[test]
fn test_get_miss_then_put_then_hit() {
    let mut cache = PrepareCache::new(4);
    assert!(cache.get("SELECT 1").is_none());

    let put = cache.put("SELECT 1", result(10));
    assert_eq!(put.entry.statement_id(), 10);
    assert_eq!(put.discard_id, None);
    assert_eq!(put.entry.ref_count(), 1);

    let hit = cache.get("SELECT 1").unwrap();
    assert_eq!(hit.statement_id(), 10);
    assert_eq!(hit.ref_count(), 2);
}

#[test]
fn test_put_existing_returns_winner() {
    let mut cache = PrepareCache::new(4);
    cache.put("SELECT 1", result(10));

    // a second prepare of the same SQL loses to the cached entry
    let put = cache.put("SELECT 1", result(11));
    assert_eq!(put.entry.statement_id(), 10);
    assert_eq!(put.discard_id, Some(11));
}

#[test]
fn test_eviction_of_idle_entry_closes_immediately() {
    let mut cache = PrepareCache::new(2);
    let first = cache.put("a", result(1));
    cache.put("b", result(2));
    // release the handle so "a" is idle in the cache
    assert_eq!(cache.decrement_use(&first.entry), None);

    let put = cache.put("c", result(3));
    assert_eq!(put.evict_close_id, Some(1));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_eviction_of_referenced_entry_defers_close() {
    let mut cache = PrepareCache::new(1);
    let first = cache.put("a", result(1));

    let put = cache.put("b", result(2));
    // "a" is still referenced by a live handle: no close yet
    assert_eq!(put.evict_close_id, None);

    // the close fires when the last handle is released, exactly once
    assert_eq!(cache.decrement_use(&first.entry), Some(1));
}

#[test]
fn test_lru_order_updated_by_get() {
    let mut cache = PrepareCache::new(2);
    let a = cache.put("a", result(1));
    let b = cache.put("b", result(2));
    cache.decrement_use(&a.entry);
    cache.decrement_use(&b.entry);

    // touch "a" so "b" becomes the LRU
    cache.get("a").unwrap();

    let put = cache.put("c", result(3));
    assert_eq!(put.evict_close_id, Some(2));
}

#[test]
fn test_ref_counts_match_live_handles() {
    let mut cache = PrepareCache::new(4);
    let one = cache.put("a", result(1));
    let two = cache.get("a").unwrap();
    let three = cache.get("a").unwrap();
    assert_eq!(one.entry.ref_count(), 3);

    cache.decrement_use(&two);
    cache.decrement_use(&three);
    assert_eq!(one.entry.ref_count(), 1);
    assert_eq!(cache.decrement_use(&one.entry), None);
    assert_eq!(one.entry.ref_count(), 0);
}

#[test]
fn test_zero_capacity_disables_caching() {
    let mut cache = PrepareCache::new(0);
    let put = cache.put("a", result(1));
    assert!(cache.is_empty());
    // born evicted: closing the only handle closes the statement
    assert_eq!(cache.decrement_use(&put.entry), Some(1));
}

#[test]
fn test_drain_reports_idle_ids() {
    let mut cache = PrepareCache::new(4);
    let a = cache.put("a", result(1));
    cache.put("b", result(2));
    cache.decrement_use(&a.entry);

    let mut ids = cache.drain();
    ids.sort_unstable();
    // "b" is still referenced; only "a" closes now
    assert_eq!(ids, vec![1]);
    assert!(cache.is_empty());
}
