//! Memo: owned memoization state around a pure function

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::thread::{self, ThreadId};

use ahash::RandomState;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::key::{Args, CacheKey};
use crate::stats::CacheStats;

type ComputeFn<A, R, E> = Box<dyn Fn(&Memo<A, R, E>, A) -> Result<R, E> + Send + Sync>;

/// Configuration for a [`Memo`]
#[derive(Debug, Clone)]
pub struct MemoConfig {
    name: String,
    initial_capacity: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            name: "memo".to_string(),
            initial_capacity: 0,
        }
    }
}

impl MemoConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported in log events
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of entries to reserve up front
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

struct State<R> {
    /// Computed results, never evicted
    entries: HashMap<CacheKey, R, RandomState>,

    /// Keys being computed right now, with the computing thread
    in_flight: HashMap<CacheKey, ThreadId, RandomState>,
}

/// Memoizing wrapper around a pure function
///
/// The wrapped function receives the `Memo` itself as its first argument, so
/// recursive definitions go through the same cache:
///
/// ```
/// use memocache::Memo;
///
/// let fib = Memo::<(u64,), u64>::new(|memo, (n,)| {
///     if n < 2 { n } else { memo.call((n - 1,)) + memo.call((n - 2,)) }
/// });
/// assert_eq!(fib.call((90,)), 2_880_067_194_370_816_120);
/// ```
pub struct Memo<A, R, E = Infallible> {
    name: String,

    /// Wrapped function
    compute: ComputeFn<A, R, E>,

    /// Results and in-flight claims
    state: Mutex<State<R>>,

    /// Signalled whenever a claim is released
    ready: Condvar,

    /// Call statistics
    stats: CacheStats,
}

impl<A: Args, R: Clone, E> Memo<A, R, E> {
    /// Wrap a fallible function
    ///
    /// Only `Ok` results are stored; an `Err` is returned unchanged and the
    /// next call with the same arguments invokes the function again.
    pub fn try_new<F>(f: F) -> Self
    where
        F: Fn(&Self, A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self::try_with_config(MemoConfig::default(), f)
    }

    /// Wrap a fallible function with the given configuration
    pub fn try_with_config<F>(config: MemoConfig, f: F) -> Self
    where
        F: Fn(&Self, A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self {
            name: config.name,
            compute: Box::new(f),
            state: Mutex::new(State {
                entries: HashMap::with_capacity_and_hasher(
                    config.initial_capacity,
                    RandomState::new(),
                ),
                in_flight: HashMap::with_hasher(RandomState::new()),
            }),
            ready: Condvar::new(),
            stats: CacheStats::new(),
        }
    }

    /// Call the wrapped function, or return the stored result
    ///
    /// # Arguments
    /// * `args` - Argument list; its canonical key selects the entry
    ///
    /// # Returns
    /// * `Result<R, E>` - Stored or freshly computed value, or the wrapped
    ///   function's error
    ///
    /// At most one thread computes a given key at a time; others block until
    /// it finishes and then re-check the cache. A thread that re-enters a key
    /// it is already computing runs the function directly.
    pub fn try_call(&self, args: A) -> Result<R, E> {
        let key = CacheKey::from_args(&args);
        let me = thread::current().id();

        let claimed = {
            let mut state = self.state.lock();
            loop {
                if let Some(value) = state.entries.get(&key) {
                    self.stats.record_hit();
                    trace!(memo = %self.name, %key, "hit");
                    return Ok(value.clone());
                }

                let owner = state.in_flight.get(&key).copied();
                match owner {
                    Some(owner) if owner == me => break false,
                    Some(_) => {
                        self.stats.record_wait();
                        trace!(memo = %self.name, %key, "waiting on in-flight computation");
                        self.ready.wait(&mut state);
                    }
                    None => {
                        state.in_flight.insert(key.clone(), me);
                        break true;
                    }
                }
            }
        };

        self.stats.record_miss();
        trace!(memo = %self.name, %key, "miss");

        // Released on every exit path, unwinding included
        let _claim = claimed.then(|| Claim { memo: self, key: &key });

        match (self.compute)(self, args) {
            Ok(value) => {
                // A re-entrant call may have stored first; that value wins
                let mut state = self.state.lock();
                let stored = state.entries.entry(key.clone()).or_insert_with(|| {
                    self.stats.record_insert();
                    value
                });
                Ok(stored.clone())
            }
            Err(err) => {
                self.stats.record_failure();
                debug!(memo = %self.name, %key, "computation failed, nothing cached");
                Err(err)
            }
        }
    }

    /// Check whether a result is stored for these arguments
    pub fn contains(&self, args: &A) -> bool {
        let key = CacheKey::from_args(args);
        self.state.lock().entries.contains_key(&key)
    }

    /// Get the stored result without computing or touching statistics
    pub fn peek(&self, args: &A) -> Option<R> {
        let key = CacheKey::from_args(args);
        self.state.lock().entries.get(&key).cloned()
    }

    /// Stored keys in canonical byte order
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.state.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Get the number of stored results
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Drop every stored result (statistics are kept)
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        debug!(memo = %self.name, dropped, "cleared");
    }

    /// Get call statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Name from the configuration
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A: Args, R: Clone> Memo<A, R, Infallible> {
    /// Wrap an infallible function
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Self, A) -> R + Send + Sync + 'static,
    {
        Self::with_config(MemoConfig::default(), f)
    }

    /// Wrap an infallible function with the given configuration
    pub fn with_config<F>(config: MemoConfig, f: F) -> Self
    where
        F: Fn(&Self, A) -> R + Send + Sync + 'static,
    {
        Self::try_with_config(config, move |memo, args| Ok(f(memo, args)))
    }

    /// Call the wrapped function, or return the stored result
    pub fn call(&self, args: A) -> R {
        match self.try_call(args) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<A, R, E> fmt::Debug for Memo<A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("name", &self.name)
            .field("len", &self.state.lock().entries.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// In-flight claim on a key
struct Claim<'a, A, R, E> {
    memo: &'a Memo<A, R, E>,
    key: &'a CacheKey,
}

impl<A, R, E> Drop for Claim<'_, A, R, E> {
    fn drop(&mut self) {
        self.memo.state.lock().in_flight.remove(self.key);
        self.memo.ready.notify_all();
    }
}

/// Memoize a non-recursive infallible function
pub fn memoize<A, R, F>(f: F) -> Memo<A, R>
where
    A: Args,
    R: Clone,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    Memo::new(move |_, args| f(args))
}

/// Memoize a non-recursive fallible function
pub fn try_memoize<A, R, E, F>(f: F) -> Memo<A, R, E>
where
    A: Args,
    R: Clone,
    F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
{
    Memo::try_new(move |_, args| f(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Canonical, KeyEncoder};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn gcd(mut a: u64, mut b: u64) -> u64 {
        while b != 0 {
            let t = a % b;
            a = b;
            b = t;
        }
        a
    }

    #[test]
    fn test_memo_hit_invokes_once() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let square = memoize(move |(x,): (i64,)| {
            seen.fetch_add(1, Ordering::SeqCst);
            x * x
        });

        assert_eq!(square.call((12,)), 144);
        assert_eq!(square.call((12,)), 144);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(square.stats().hits(), 1);
        assert_eq!(square.stats().misses(), 1);
    }

    #[test]
    fn test_memo_gcd() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = memoize(move |(a, b): (u64, u64)| {
            seen.fetch_add(1, Ordering::SeqCst);
            gcd(a, b)
        });

        assert_eq!(memo.call((85, 187)), 17);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second call is served from the cache
        assert_eq!(memo.call((85, 187)), 17);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.stats().hits(), 1);
    }

    #[derive(Debug, Clone)]
    enum Arg {
        Num(i64),
        Text(&'static str),
    }

    impl Canonical for Arg {
        fn canonicalize(&self, enc: &mut KeyEncoder) {
            match self {
                Arg::Num(n) => n.canonicalize(enc),
                Arg::Text(s) => s.canonicalize(enc),
            }
        }
    }

    #[test]
    fn test_memo_key_distinctness() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = memoize(move |args: Vec<Arg>| {
            seen.fetch_add(1, Ordering::SeqCst);
            args.len()
        });

        assert_eq!(memo.call(vec![Arg::Num(1), Arg::Num(2)]), 2);
        assert_eq!(memo.call(vec![Arg::Num(1), Arg::Text("2")]), 2);
        assert_eq!(memo.call(vec![Arg::Num(1), Arg::Num(2), Arg::Num(3)]), 3);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(memo.len(), 3);

        // Same structure again is a hit
        memo.call(vec![Arg::Num(1), Arg::Text("2")]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_memo_failure_not_cached() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = try_memoize(move |(x,): (u32,)| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(format!("transient failure for {}", x))
            } else {
                Ok(x + 1)
            }
        });

        assert_eq!(memo.try_call((7,)), Err("transient failure for 7".to_string()));
        assert!(memo.is_empty());
        assert!(!memo.contains(&(7,)));

        // Retry re-invokes the function
        assert_eq!(memo.try_call((7,)), Ok(8));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(memo.try_call((7,)), Ok(8));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(memo.stats().failures(), 1);
        assert_eq!(memo.stats().inserts(), 1);
    }

    #[test]
    fn test_memo_recursive_factorial() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let factorial = Memo::<(u64,), u64>::new(move |memo, (n,)| {
            seen.fetch_add(1, Ordering::SeqCst);
            if n <= 1 {
                1
            } else {
                n * memo.call((n - 1,))
            }
        });

        assert_eq!(factorial.call((5,)), 120);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(factorial.len(), 5);

        // Sub-results from the first call are reused
        assert_eq!(factorial.call((3,)), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(factorial.stats().hits(), 1);

        // Only the new level is computed
        assert_eq!(factorial.call((6,)), 720);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_memo_recursive_fallible() {
        let fib = Memo::<(u32,), u64, String>::try_new(|memo, (n,)| {
            if n < 2 {
                return Ok(n as u64);
            }
            let a = memo.try_call((n - 1,))?;
            let b = memo.try_call((n - 2,))?;
            a.checked_add(b).ok_or_else(|| format!("fib({}) overflows u64", n))
        });

        assert_eq!(fib.try_call((93,)), Ok(12_200_160_415_121_876_738));
        assert_eq!(fib.len(), 94);

        assert_eq!(fib.try_call((94,)), Err("fib(94) overflows u64".to_string()));
        assert_eq!(fib.len(), 94);
        assert!(!fib.contains(&(94,)));
    }

    #[test]
    fn test_memo_unbounded_growth() {
        let memo = memoize(|(x,): (u32,)| x * 2);

        for i in 0..100 {
            memo.call((i,));
        }
        assert_eq!(memo.len(), 100);

        for i in 0..100 {
            memo.call((i,));
        }
        assert_eq!(memo.len(), 100);
        assert_eq!(memo.stats().hits(), 100);
        assert_eq!(memo.stats().inserts(), 100);
    }

    #[test]
    fn test_memo_clear() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = memoize(move |(x,): (u8,)| {
            seen.fetch_add(1, Ordering::SeqCst);
            x
        });

        memo.call((1,));
        memo.call((2,));
        assert_eq!(memo.len(), 2);

        memo.clear();
        assert!(memo.is_empty());

        memo.call((1,));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(memo.stats().misses(), 3);
    }

    #[test]
    fn test_memo_peek_and_keys() {
        let memo = memoize(|(n, s): (u32, &'static str)| s.repeat(n as usize));

        assert_eq!(memo.peek(&(2, "ab")), None);
        assert_eq!(memo.call((2, "ab")), "abab");
        assert_eq!(memo.peek(&(2, "ab")), Some("abab".to_string()));

        memo.call((1, "z"));
        let rendered: Vec<String> = memo.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered.len(), 2);
        assert!(rendered.contains(&r#"(2, "ab")"#.to_string()));
        assert!(rendered.contains(&r#"(1, "z")"#.to_string()));

        // peek does not count as a lookup
        assert_eq!(memo.stats().hits(), 0);
    }

    #[test]
    fn test_memo_config() {
        let memo = Memo::with_config(
            MemoConfig::new().with_name("double").with_initial_capacity(64),
            |_, (x,): (u16,)| x * 2,
        );

        assert_eq!(memo.name(), "double");
        assert_eq!(memo.call((21,)), 42);
        assert!(format!("{:?}", memo).contains("double"));
    }

    #[test]
    fn test_memo_concurrent_same_key() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = memoize(move |(x,): (u64,)| {
            seen.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            x + 1
        });

        let threads = 8;
        let barrier = Barrier::new(threads);
        std::thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    barrier.wait();
                    assert_eq!(memo.call((41,)), 42);
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.stats().misses(), 1);
        assert_eq!(memo.stats().hits(), threads as u64 - 1);
    }

    #[test]
    fn test_memo_concurrent_distinct_keys() {
        let memo = memoize(|(x,): (u64,)| x * x);

        std::thread::scope(|s| {
            for t in 0..4u64 {
                let memo = &memo;
                s.spawn(move || {
                    for i in 0..50u64 {
                        assert_eq!(memo.call((t * 50 + i,)), (t * 50 + i).pow(2));
                    }
                });
            }
        });

        assert_eq!(memo.len(), 200);
    }

    #[test]
    fn test_memo_panic_releases_claim() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = memoize(move |(x,): (u32,)| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            x
        });

        let result = panic::catch_unwind(AssertUnwindSafe(|| memo.call((5,))));
        assert!(result.is_err());
        assert!(memo.is_empty());

        // Another thread can still claim the key
        std::thread::scope(|s| {
            s.spawn(|| assert_eq!(memo.call((5,)), 5));
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_memo_waiter_recomputes_after_failure() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = try_memoize(move |(x,): (u32,)| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(100));
                Err("fail".to_string())
            } else {
                Ok(x)
            }
        });

        let (a, b) = std::thread::scope(|s| {
            let first = s.spawn(|| memo.try_call((1,)));
            // Join while the first computation is still in flight
            std::thread::sleep(Duration::from_millis(20));
            let second = s.spawn(|| memo.try_call((1,)));
            (first.join().unwrap(), second.join().unwrap())
        });

        assert_eq!(a, Err("fail".to_string()));
        assert_eq!(b, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(memo.stats().waits() >= 1);
        assert_eq!(memo.stats().failures(), 1);
        assert_eq!(memo.peek(&(1,)), Some(1));
    }

    #[test]
    fn test_memo_reentrant_same_key() {
        let calls = counter();
        let seen = Arc::clone(&calls);
        let memo = Memo::<(u8,), u32>::new(move |memo, (k,)| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                // Re-enter the key this thread is computing
                memo.call((k,)) + 1
            } else {
                10
            }
        });

        // The outer call returns the value stored by the inner one
        assert_eq!(memo.call((0,)), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(memo.peek(&(0,)), Some(10));
        assert_eq!(memo.call((0,)), 10);
        assert_eq!(memo.stats().inserts(), 1);
    }

    #[test]
    fn test_memo_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Memo<(u64,), u64>>();
        assert_send_sync::<Memo<(String, i32), Vec<u8>, String>>();
    }
}
