//! Best-effort filter over passwords already tested and rejected.
//!
//! Backed by a Bloom filter: false positives (skipping an untested
//! password) are possible but bounded, false negatives are not: once an
//! insert has been observed, `contains` reports the member on every
//! thread. Both workers consult it so a verifier false-positive is never
//! re-tested.

use std::sync::Mutex;

use bloomfilter::Bloom;

/// Default capacity: sized for verifier false-positives and dictionary
/// re-runs, not for the whole keyspace.
const DEFAULT_CAPACITY: usize = 1_000_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

pub struct SkipSet {
    inner: Mutex<Bloom<str>>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(items: usize) -> Self {
        Self {
            inner: Mutex::new(Bloom::new_for_fp_rate(items.max(1), FALSE_POSITIVE_RATE)),
        }
    }

    /// Records a tested-and-rejected password.
    pub fn add(&self, password: &str) {
        self.inner.lock().unwrap().set(password);
    }

    /// True when the password has (almost certainly) been tested already.
    pub fn contains(&self, password: &str) -> bool {
        self.inner.lock().unwrap().check(password)
    }
}

impl Default for SkipSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn membership_is_monotone() {
        let set = SkipSet::with_capacity(1000);
        assert!(!set.contains("hunter2"));
        set.add("hunter2");
        assert!(set.contains("hunter2"));
        // Still present after unrelated inserts.
        for i in 0..100 {
            set.add(&format!("pw{i}"));
        }
        assert!(set.contains("hunter2"));
    }

    #[test]
    fn inserts_visible_across_threads() {
        let set = Arc::new(SkipSet::with_capacity(10_000));
        let mut handles = Vec::new();
        for t in 0..4 {
            let set = Arc::clone(&set);
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    let pw = format!("t{t}-{i}");
                    set.add(&pw);
                    assert!(set.contains(&pw));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for t in 0..4 {
            for i in 0..250 {
                assert!(set.contains(&format!("t{t}-{i}")));
            }
        }
    }
}
