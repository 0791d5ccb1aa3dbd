//! Core build machinery.
//!
//! Everything a build run needs lives here: content digests, the
//! structurally comparable value domain, the thread-buffered console, the
//! persistent memoization database, the cached-call engine, the parallel
//! scheduler, the subprocess helper, and the context/driver that ties
//! them together.

pub mod cache;
pub mod console;
pub mod context;
pub mod db;
pub mod digest;
pub mod exec;
pub mod parallel;
pub mod value;
