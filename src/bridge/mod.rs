//! Utilities for bridging to `hyper` traits from other runtimes.

/// Bridge [hyper] and [tokio] I/O traits
pub mod io;

pub use self::io::TokioIo;
