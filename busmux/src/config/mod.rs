//! Configuration of the arbitration and caching layers.
//!
//! These are plain data structs. Hosts construct them from their own
//! configuration sources (see `busmux-linux` for a TOML based one).

mod arbiter;
mod cache;

pub use arbiter::ArbiterConfig;
pub use cache::CacheConfig;
