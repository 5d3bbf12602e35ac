//! Utility functions and helpers.

pub mod fingerprint;
pub mod http;
pub mod log;
pub mod random;
pub mod url;

pub use fingerprint::fingerprint;
pub use random::{FixedRandom, RandomSource, ThreadRandom, random_delay};
