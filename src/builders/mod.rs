//! Builder adapters.
//!
//! A builder adapter turns an external toolchain into cached procedures.
//! To be cacheable an operation must capture all of its inputs in its
//! declared parameters (a source parameter, usually a destination, and
//! configuration such as include paths and flags), return the destination
//! path(s) as its result, and report any extra files it read through the
//! engine's side channel. The OCaml adapter in [`ocaml`] is the concrete
//! realization of that contract.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::core::console::Log;
use crate::error::RafterError;

pub mod ocaml;

/// Resolve the first of `candidates` present on `PATH`.
///
/// A tool that cannot be found is a configuration failure and aborts the
/// build with exit code 2.
pub fn find_program(log: &Log, candidates: &[&str]) -> Result<PathBuf> {
    log.check(&format!("looking for {}", candidates.join(" or ")));

    let path_var = env::var_os("PATH").unwrap_or_default();
    for candidate in candidates {
        for dir in env::split_paths(&path_var) {
            let resolved = dir.join(candidate);
            if resolved.is_file() {
                log.passed_with(&resolved.display().to_string());
                return Ok(resolved);
            }
        }
    }

    log.failed();
    Err(RafterError::config(format!(
        "could not find any of: {}",
        candidates.join(", ")
    )))
}

/// Rebase a source path under the build root.
///
/// Project-relative sources keep their directory structure below the
/// build root; absolute sources (scratch files, probes) flatten to their
/// file name.
pub(crate) fn rebase_into(buildroot: &Path, src: &Path) -> PathBuf {
    if src.is_absolute() {
        buildroot.join(src.file_name().unwrap_or_default())
    } else {
        buildroot.join(src)
    }
}

/// Replace a path's extension with a suffix like `.cmo` or `.cma`.
pub(crate) fn swap_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.with_extension("").into_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Append a suffix to a full path (`lib.ml` -> `lib.ml.depends`).
pub(crate) fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.to_path_buf().into_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
