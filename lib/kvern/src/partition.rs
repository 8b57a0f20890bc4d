use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Reducer index responsible for `key`: `h(key) mod num_reducers`.
///
/// `h` is the keyless SipHash-1-3 behind `DefaultHasher::new()`, fed the raw
/// key bytes. Every call site that partitions the same key within a run
/// agrees, and the mapping is stable across runs of the same build.
pub fn partition(key: &str, num_reducers: usize) -> usize {
    debug_assert!(num_reducers > 0);
    let mut hasher = DefaultHasher::new();
    hasher.write(key.as_bytes());
    (hasher.finish() as usize) % num_reducers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_within_a_run() {
        for key in ["alpha", "beta", "gamma", "x", ""] {
            assert_eq!(partition(key, 7), partition(key, 7));
        }
    }

    #[test]
    fn stays_in_range() {
        for r in 1..=8 {
            for key in ["alpha", "beta", "gamma", "delta", "epsilon"] {
                assert!(partition(key, r) < r);
            }
        }
    }

    #[test]
    fn single_reducer_takes_everything() {
        assert_eq!(partition("anything", 1), 0);
    }
}
