//! # memocache
//!
//! Memoizing function-call cache with explicitly owned state.
//!
//! ## Architecture
//! - **Keys**: argument lists encode to tagged, length-prefixed bytes
//!   ([`CacheKey`]); no delimiter can collide
//! - **Memo**: owns an AHash map from key to result; entries are never evicted
//! - **Concurrency**: at most one in-flight computation per key, no lock held
//!   while the wrapped function runs
//! - **Failures**: errors and panics propagate unchanged and leave the key
//!   uncached

#![warn(missing_docs)]

mod error;
mod key;
mod memo;
mod stats;

pub use error::{Error, Result};
pub use key::{decode, Args, CacheKey, Canonical, KeyEncoder, KeyField};
pub use memo::{memoize, try_memoize, Memo, MemoConfig};
pub use stats::CacheStats;
