//! Content-addressed artifact cache gating the expensive pipeline stages.
//!
//! Keys are (stage name, input digest); the input digest of stage N is
//! derived from the job component digests it consumes plus the artifact
//! digests of its dependencies, so an upstream change invalidates exactly
//! the stages downstream of it. Entries are immutable: the first writer for
//! a key wins and every later `put` observes that first entry.

use crate::error::PipelineError;
use crate::hash::{Digest, DigestBuilder};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageKey {
    pub stage: &'static str,
    pub input: Digest,
}

impl StageKey {
    pub fn new(stage: &'static str, input: Digest) -> Self {
        Self { stage, input }
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub blob: Vec<u8>,
    pub artifact: Digest,
    /// Creation time is metadata for inspection only; it never participates
    /// in hashing or serialized output.
    pub created: SystemTime,
}

#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: DashMap<StageKey, Arc<CacheEntry>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StageKey) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Insert unless the key already exists. The entry returned is always
    /// the one actually stored, so a losing writer sees the winner's blob;
    /// last-writer-wins cannot happen.
    pub fn put(&self, key: StageKey, blob: Vec<u8>) -> Arc<CacheEntry> {
        let entry = self.entries.entry(key).or_insert_with(|| {
            Arc::new(CacheEntry {
                artifact: Digest::of_bytes(&blob),
                blob,
                created: SystemTime::now(),
            })
        });
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Input digest for a stage from its upstream digests.
pub fn stage_input(stage: &'static str, parts: &[Digest]) -> Digest {
    let mut b = DigestBuilder::new(stage);
    for d in parts {
        b = b.digest_field(d);
    }
    b.finish()
}

/// At-most-once stage execution: on a hit the cached artifact is decoded,
/// on a miss `f` runs and its serialized result is stored. Returns the value
/// together with the stored artifact digest for downstream key derivation.
pub fn run_stage<T, F>(
    cache: &ArtifactCache,
    stage: &'static str,
    input: Digest,
    f: F,
) -> Result<(T, Digest), PipelineError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, PipelineError>,
{
    let key = StageKey::new(stage, input);
    if let Some(entry) = cache.get(&key) {
        let value = serde_json::from_slice(&entry.blob)
            .map_err(|e| PipelineError::Internal(format!("{} artifact decode: {}", stage, e)))?;
        return Ok((value, entry.artifact));
    }

    let value = f()?;
    let blob = serde_json::to_vec(&value)
        .map_err(|e| PipelineError::Internal(format!("{} artifact encode: {}", stage, e)))?;
    let entry = cache.put(key, blob);
    // If a concurrent writer beat us, its (identical-input, deterministic)
    // artifact is what downstream keys must chain from.
    let value = serde_json::from_slice(&entry.blob)
        .map_err(|e| PipelineError::Internal(format!("{} artifact decode: {}", stage, e)))?;
    Ok((value, entry.artifact))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_writer_wins() {
        let cache = ArtifactCache::new();
        let key = StageKey::new("test", Digest::of_bytes(b"k"));
        let first = cache.put(key, b"first".to_vec());
        let second = cache.put(key, b"second".to_vec());
        assert_eq!(second.blob, b"first");
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(cache.get(&key).unwrap().blob, b"first");
    }

    #[test]
    fn concurrent_puts_converge_on_one_value() {
        let cache = Arc::new(ArtifactCache::new());
        let key = StageKey::new("race", Digest::of_bytes(b"k"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.put(key, format!("writer-{}", i).into_bytes()))
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winner = cache.get(&key).unwrap();
        for e in entries {
            assert_eq!(e.blob, winner.blob);
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn run_stage_computes_once() {
        let cache = ArtifactCache::new();
        let input = Digest::of_bytes(b"job");
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1u32, 2, 3])
        };
        let (a, da): (Vec<u32>, _) = run_stage(&cache, "nums", input, compute).unwrap();
        let (b, db): (Vec<u32>, _) = run_stage(&cache, "nums", input, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![9u32])
        })
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(da, db);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_inputs_get_distinct_keys() {
        let a = stage_input("s", &[Digest::of_bytes(b"x")]);
        let b = stage_input("s", &[Digest::of_bytes(b"y")]);
        let c = stage_input("t", &[Digest::of_bytes(b"x")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
