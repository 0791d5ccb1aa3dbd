//! Cached procedure calls.
//!
//! A build procedure becomes cacheable by registering a descriptor that
//! names it, versions it, and classifies each of its parameters as source
//! path, destination path, plain, or ignored. The engine fingerprints
//! every call from the descriptor digest, the bound arguments, and the
//! digests of the declared source files, then consults the memoization
//! database to decide whether the recorded result can be returned without
//! running the body.

mod descriptor;
mod engine;

pub use descriptor::{Args, Bound, FnDescriptor, ParamKind, ParamSpec};
pub use engine::{CacheEngine, CacheStats, SideChannel};
