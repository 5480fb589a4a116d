//! State of the caching operators and the binding enumeration used to warm
//! static caches.
//!
//! Locks are held only while reading or writing the slot, never across an
//! await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sitewise_core::binding::{Binding, BindingMap};
use sitewise_operators::SerialData;

/// `SCache` contents: structural hash of a useful binding -> result.
#[derive(Debug, Default)]
pub struct StaticCache {
    entries: Mutex<HashMap<u64, Arc<SerialData>>>,
}

impl StaticCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BindingMap) -> Option<Arc<SerialData>> {
        lock(&self.entries).get(&key.structural_hash()).cloned()
    }

    pub fn insert(&self, key: &BindingMap, data: Arc<SerialData>) {
        lock(&self.entries).insert(key.structural_hash(), data);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `DCache` contents: the last result and the useful binding behind it.
#[derive(Debug, Default)]
pub struct DynamicCache {
    slot: Mutex<Option<(BindingMap, Arc<SerialData>)>>,
}

impl DynamicCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The held result if it was produced by `useful`.
    pub fn get(&self, useful: &BindingMap) -> Option<Arc<SerialData>> {
        let slot = lock(&self.slot);
        match slot.as_ref() {
            Some((held, data)) if held == useful => Some(Arc::clone(data)),
            _ => None,
        }
    }

    pub fn replace(&self, useful: BindingMap, data: Arc<SerialData>) {
        *lock(&self.slot) = Some((useful, data));
    }
}

/// Every write is a single insert or assignment, so a poisoned lock still
/// holds consistent state.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lazy Cartesian product of per-choice domains, one `BindingMap` per
/// combination. The last id varies fastest. No ids yields a single empty
/// map; an empty domain yields nothing.
#[derive(Debug, Clone)]
pub struct BindingProduct {
    ids: Vec<String>,
    domains: Vec<Vec<Binding>>,
    cursor: Vec<usize>,
    done: bool,
}

impl BindingProduct {
    pub fn new(choices: Vec<(String, Vec<Binding>)>) -> Self {
        let done = choices.iter().any(|(_, d)| d.is_empty());
        let (ids, domains): (Vec<_>, Vec<_>) = choices.into_iter().unzip();
        let cursor = vec![0; ids.len()];
        Self {
            ids,
            domains,
            cursor,
            done,
        }
    }

    /// Number of combinations still to be produced from a fresh product.
    pub fn total(&self) -> usize {
        self.domains.iter().map(Vec::len).product()
    }
}

impl Iterator for BindingProduct {
    type Item = BindingMap;

    fn next(&mut self) -> Option<BindingMap> {
        if self.done {
            return None;
        }
        let item = self
            .ids
            .iter()
            .zip(&self.domains)
            .zip(&self.cursor)
            .map(|((id, domain), &at)| (id.clone(), domain[at].clone()))
            .collect();

        // Advance like an odometer.
        let mut pos = self.cursor.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.cursor[pos] += 1;
            if self.cursor[pos] < self.domains[pos].len() {
                break;
            }
            self.cursor[pos] = 0;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use sitewise_core::types::RowBatch;

    use super::*;

    #[test]
    fn product_enumerates_every_combination() {
        let p = BindingProduct::new(vec![
            ("a".into(), vec![Binding::Index(0), Binding::Index(1)]),
            (
                "b".into(),
                vec![Binding::Int(1), Binding::Int(2), Binding::Int(3)],
            ),
        ]);
        assert_eq!(p.total(), 6);
        let all: Vec<BindingMap> = p.collect();
        assert_eq!(all.len(), 6);
        assert_eq!(
            all[0],
            BindingMap::from([("a", Binding::Index(0)), ("b", Binding::Int(1))])
        );
        assert_eq!(
            all[5],
            BindingMap::from([("a", Binding::Index(1)), ("b", Binding::Int(3))])
        );
    }

    #[test]
    fn product_edge_cases() {
        assert_eq!(BindingProduct::new(vec![]).collect::<Vec<_>>(), vec![BindingMap::new()]);
        let empty = BindingProduct::new(vec![("a".into(), vec![])]);
        assert_eq!(empty.count(), 0);
    }

    #[test]
    fn dynamic_cache_matches_on_binding() {
        let c = DynamicCache::new();
        let b1 = BindingMap::from([("x", Binding::Int(1))]);
        let b2 = BindingMap::from([("x", Binding::Int(2))]);
        assert!(c.get(&b1).is_none());
        c.replace(b1.clone(), Arc::new(SerialData::table(RowBatch::default())));
        assert!(c.get(&b1).is_some());
        assert!(c.get(&b2).is_none());
    }

    #[test]
    fn static_cache_keys_structurally() {
        let c = StaticCache::new();
        let key: BindingMap = vec![
            ("b".to_string(), Binding::Int(2)),
            ("a".to_string(), Binding::Int(1)),
        ]
        .into_iter()
        .collect();
        c.insert(&key, Arc::new(SerialData::table(RowBatch::default())));
        let same = BindingMap::from([("a", Binding::Int(1)), ("b", Binding::Int(2))]);
        assert!(c.get(&same).is_some());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn poisoned_locks_still_serve_writes() {
        let c = Arc::new(StaticCache::new());
        let poisoner = Arc::clone(&c);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();
        assert!(c.entries.is_poisoned());

        let key = BindingMap::from([("x", Binding::Int(1))]);
        c.insert(&key, Arc::new(SerialData::table(RowBatch::default())));
        assert_eq!(c.len(), 1);
        assert!(c.get(&key).is_some());
    }

}
