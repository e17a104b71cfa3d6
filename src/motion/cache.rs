use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::sequence::{motion_name, MotionSequence};

/// Loaded motion sequences keyed by motion name.
///
/// Owned by the caller; entries live until evicted or the cache is dropped.
/// When full, the least recently used entry is evicted.
pub struct MotionCache {
    capacity: usize,
    entries: HashMap<String, Arc<MotionSequence>>,
    /// 先頭が最も古い
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl MotionCache {
    pub const DEFAULT_CAPACITY: usize = 8;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// ディレクトリから読み込む（同名のモーションがあれば再利用）
    pub fn load(&mut self, dir: &Path) -> Result<Arc<MotionSequence>> {
        let name = motion_name(dir);
        self.get_or_try_insert_with(&name, || MotionSequence::load(dir))
    }

    pub fn get_or_try_insert_with<F>(&mut self, name: &str, loader: F) -> Result<Arc<MotionSequence>>
    where
        F: FnOnce() -> Result<MotionSequence>,
    {
        if let Some(seq) = self.entries.get(name).cloned() {
            self.hits += 1;
            self.touch(name);
            return Ok(seq);
        }

        self.misses += 1;
        let seq = Arc::new(loader()?);
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                debug!("Evicting motion {}", oldest);
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(name.to_string(), Arc::clone(&seq));
        self.order.push_back(name.to_string());
        Ok(seq)
    }

    fn touch(&mut self, name: &str) {
        if let Some(pos) = self.order.iter().position(|n| n == name) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (ヒット数, ミス数)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for MotionCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(name: &str) -> MotionSequence {
        MotionSequence {
            name: name.to_string(),
            frames: Vec::new(),
        }
    }

    #[test]
    fn test_loader_called_once_per_name() {
        let mut cache = MotionCache::new(4);
        let mut calls = 0;
        for _ in 0..3 {
            cache
                .get_or_try_insert_with("dance", || {
                    calls += 1;
                    Ok(sequence("dance"))
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats(), (2, 1));
    }

    #[test]
    fn test_least_recently_used_evicted() {
        let mut cache = MotionCache::new(2);
        cache.get_or_try_insert_with("a", || Ok(sequence("a"))).unwrap();
        cache.get_or_try_insert_with("b", || Ok(sequence("b"))).unwrap();
        // a を使ってから c を入れると b が追い出される
        cache.get_or_try_insert_with("a", || Ok(sequence("a"))).unwrap();
        cache.get_or_try_insert_with("c", || Ok(sequence("c"))).unwrap();
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_load_not_cached() {
        let mut cache = MotionCache::default();
        let result = cache.get_or_try_insert_with("broken", || anyhow::bail!("missing"));
        assert!(result.is_err());
        assert!(!cache.contains("broken"));
    }

    #[test]
    fn test_load_from_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("jump").join("smplx_params");
        std::fs::create_dir_all(&dir).unwrap();

        let mut cache = MotionCache::default();
        let first = cache.load(&dir).unwrap();
        let second = cache.load(&dir).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name, "jump");
        assert!(first.is_empty());
    }
}
