//! Persistent memoization database.
//!
//! The database holds six relations describing every cached procedure call
//! the build has ever made: function digests, recorded calls, file stamps,
//! per-call file digests, and externally reported source/destination sets.
//! All relations live behind one mutex; operations are short map lookups,
//! so contention stays acceptable even with many workers.
//!
//! Persistence is a single self-describing JSON document committed with an
//! atomic-rename protocol: write `<db>.tmp`, move the current file to
//! `<db>.old`, move `.tmp` into place, delete `.old`. A crash at any point
//! leaves either the old or the new state recoverable, and [`Database::load`]
//! repairs whatever siblings a crash left behind.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::value::Value;

/// One recorded call: the bound arguments it was made with and the result
/// it produced. Its position in the function's call list is its call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Parameter name to argument value, defaults filled in.
    pub bound: BTreeMap<String, Value>,
    /// Whatever the procedure returned.
    pub result: Value,
}

/// Cached file stamp: modification time and content digest.
///
/// The mtime is seconds since the epoch as `f64` and is compared for exact
/// equality; any drift triggers a re-digest but not necessarily a miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStamp {
    pub mtime: f64,
    pub digest: String,
}

/// The six persistent relations, serialized as one document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Relations {
    /// function name -> function digest
    functions: BTreeMap<String, String>,
    /// function name -> ordered call records (index = call id)
    function_calls: BTreeMap<String, Vec<CallRecord>>,
    /// file path -> (mtime, digest)
    files: BTreeMap<String, FileStamp>,
    /// file path -> function name -> call id -> digest at record time
    call_files: BTreeMap<String, BTreeMap<String, BTreeMap<usize, String>>>,
    /// function name -> call id -> externally reported source paths
    external_srcs: BTreeMap<String, BTreeMap<usize, BTreeSet<String>>>,
    /// function name -> call id -> externally reported destination paths
    external_dsts: BTreeMap<String, BTreeMap<usize, BTreeSet<String>>>,
}

/// Per-function statistics for database inspection.
#[derive(Debug, Clone)]
pub struct FunctionStat {
    pub name: String,
    pub digest: String,
    pub calls: usize,
}

/// Summary of the database contents.
#[derive(Debug, Clone)]
pub struct DbStats {
    pub functions: Vec<FunctionStat>,
    pub files: usize,
    pub call_files: usize,
}

/// Thread-safe store over the persistent relations.
pub struct Database {
    path: PathBuf,
    inner: Mutex<Relations>,
}

impl Database {
    /// Create an empty database that will persist to `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Relations::default()),
        }
    }

    /// Load the database from disk, repairing interrupted commits.
    ///
    /// Recovery rules:
    /// - a missing database with an `.old` sibling means the commit died
    ///   between the two renames; the `.old` file is the valid state and
    ///   is moved back into place;
    /// - a stray `.tmp` is always discarded;
    /// - an unreadable document falls back to the `.old` sibling, then to
    ///   an empty database with a warning (cache corruption is not fatal).
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let tmp = sibling(&path, "tmp");
        let old = sibling(&path, "old");

        if !path.exists() && old.exists() {
            fs::rename(&old, &path)?;
        }
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }

        let relations = if path.exists() {
            match read_relations(&path) {
                Ok(relations) => {
                    if old.exists() {
                        fs::remove_file(&old)?;
                    }
                    relations
                }
                Err(err) => {
                    log::warn!(
                        "discarding corrupt build database {}: {}",
                        path.display(),
                        err
                    );
                    let recovered = if old.exists() {
                        read_relations(&old).ok()
                    } else {
                        None
                    };
                    if old.exists() {
                        fs::remove_file(&old)?;
                    }
                    recovered.unwrap_or_default()
                }
            }
        } else {
            Relations::default()
        };

        Ok(Self {
            path,
            inner: Mutex::new(relations),
        })
    }

    /// The on-disk location of this database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit the database to disk atomically.
    pub fn save(&self) -> Result<()> {
        let bytes = {
            let inner = self.inner.lock().unwrap();
            serde_json::to_vec(&*inner)?
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = sibling(&self.path, "tmp");
        let old = sibling(&self.path, "old");

        fs::write(&tmp, &bytes)?;
        if self.path.exists() {
            fs::rename(&self.path, &old)?;
        }
        fs::rename(&tmp, &self.path)?;
        if old.exists() {
            fs::remove_file(&old)?;
        }
        Ok(())
    }

    /// Remove the database and any commit siblings from disk.
    pub fn clear_on_disk(path: &Path) -> Result<()> {
        for candidate in [path.to_path_buf(), sibling(path, "tmp"), sibling(path, "old")] {
            if candidate.exists() {
                fs::remove_file(&candidate)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Function records

    /// Return the function's digest, or `None` the first time it is seen.
    pub fn find_function(&self, name: &str) -> Option<String> {
        self.inner.lock().unwrap().functions.get(name).cloned()
    }

    /// Insert or update the function's digest.
    ///
    /// A changed function invalidates everything recorded about it, so all
    /// of its calls, external-file sets, and call-file entries are purged
    /// before the new digest is written.
    pub fn save_function(&self, name: &str, digest: &str) {
        let mut inner = self.inner.lock().unwrap();
        purge_function(&mut inner, name);
        inner.functions.insert(name.to_string(), digest.to_string());
    }

    /// Remove the function and everything recorded about it.
    pub fn delete_function(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        purge_function(&mut inner, name);
    }

    /// Compare the stored digest and replace it when it differs, purging
    /// the function's records. Returns whether the digest changed.
    ///
    /// Check and save happen under one lock so two workers racing on the
    /// same function cannot purge each other's freshly recorded calls.
    pub fn check_function(&self, name: &str, digest: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.functions.get(name).map(String::as_str) == Some(digest) {
            return false;
        }
        purge_function(&mut inner, name);
        inner.functions.insert(name.to_string(), digest.to_string());
        true
    }

    // ------------------------------------------------------------------
    // Call records

    /// Search the function's call list for structurally equal bound
    /// arguments. Returns the call id and recorded result on a match.
    pub fn find_call(
        &self,
        name: &str,
        bound: &BTreeMap<String, Value>,
    ) -> (Option<usize>, Option<Value>) {
        let inner = self.inner.lock().unwrap();
        let Some(calls) = inner.function_calls.get(name) else {
            return (None, None);
        };
        for (index, record) in calls.iter().enumerate() {
            if &record.bound == bound {
                return (Some(index), Some(record.result.clone()));
            }
        }
        (None, None)
    }

    /// Insert or update a call record, returning the effective call id.
    ///
    /// With `call_id == None` the record is appended; otherwise the record
    /// at that id is overwritten. If the function has no call list (new or
    /// just purged), the id is ignored and a fresh list is started.
    pub fn save_call(
        &self,
        name: &str,
        call_id: Option<usize>,
        bound: BTreeMap<String, Value>,
        result: Value,
    ) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let record = CallRecord { bound, result };
        match inner.function_calls.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(vec![record]);
                0
            }
            Entry::Occupied(mut slot) => {
                let calls = slot.get_mut();
                match call_id {
                    None => {
                        calls.push(record);
                        calls.len() - 1
                    }
                    Some(id) => {
                        calls[id] = record;
                        id
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Call files

    /// Digest of `file` the last time call `(name, call_id)` ran.
    pub fn find_call_file(&self, call_id: usize, name: &str, file: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .call_files
            .get(file)
            .and_then(|by_fun| by_fun.get(name))
            .and_then(|by_call| by_call.get(&call_id))
            .cloned()
    }

    /// Insert or update the call-file digest.
    pub fn save_call_file(&self, call_id: usize, name: &str, file: &str, digest: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .call_files
            .entry(file.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(call_id, digest.to_string());
    }

    // ------------------------------------------------------------------
    // External files

    /// Source paths the call reported through the side channel.
    pub fn find_external_srcs(&self, call_id: usize, name: &str) -> BTreeSet<String> {
        self.inner
            .lock()
            .unwrap()
            .external_srcs
            .get(name)
            .and_then(|by_call| by_call.get(&call_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Destination paths the call reported through the side channel.
    pub fn find_external_dsts(&self, call_id: usize, name: &str) -> BTreeSet<String> {
        self.inner
            .lock()
            .unwrap()
            .external_dsts
            .get(name)
            .and_then(|by_call| by_call.get(&call_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Store the external source/destination sets and their digests in one
    /// operation.
    pub fn save_external_files(
        &self,
        name: &str,
        call_id: usize,
        srcs: BTreeSet<String>,
        dsts: BTreeSet<String>,
        digests: Vec<(String, String)>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .external_srcs
            .entry(name.to_string())
            .or_default()
            .insert(call_id, srcs);
        inner
            .external_dsts
            .entry(name.to_string())
            .or_default()
            .insert(call_id, dsts);
        for (file, digest) in digests {
            inner
                .call_files
                .entry(file)
                .or_default()
                .entry(name.to_string())
                .or_default()
                .insert(call_id, digest);
        }
    }

    // ------------------------------------------------------------------
    // File stamps

    /// The cached `(mtime, digest)` stamp of a file, if recorded.
    pub fn find_file(&self, file: &str) -> Option<(f64, String)> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(file)
            .map(|stamp| (stamp.mtime, stamp.digest.clone()))
    }

    /// Insert or update a file stamp.
    pub fn save_file(&self, file: &str, mtime: f64, digest: &str) {
        self.inner.lock().unwrap().files.insert(
            file.to_string(),
            FileStamp {
                mtime,
                digest: digest.to_string(),
            },
        );
    }

    /// Forget a file, along with every call-file entry that referenced it.
    pub fn delete_file(&self, file: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(file);
        inner.call_files.remove(file);
    }

    // ------------------------------------------------------------------

    /// Summarize the database for inspection commands.
    pub fn stats(&self) -> DbStats {
        let inner = self.inner.lock().unwrap();
        let functions = inner
            .functions
            .iter()
            .map(|(name, digest)| FunctionStat {
                name: name.clone(),
                digest: digest.clone(),
                calls: inner
                    .function_calls
                    .get(name)
                    .map_or(0, |calls| calls.len()),
            })
            .collect();
        DbStats {
            functions,
            files: inner.files.len(),
            call_files: inner.call_files.len(),
        }
    }
}

/// Delete the function and everything hanging off it. The call-file
/// relation is keyed by filename, so purging walks every entry; functions
/// change far less often than files, so the expensive direction is fine.
fn purge_function(inner: &mut Relations, name: &str) {
    inner.functions.remove(name);
    inner.function_calls.remove(name);
    inner.external_srcs.remove(name);
    inner.external_dsts.remove(name);

    let mut empty_files = Vec::new();
    for (file, by_fun) in inner.call_files.iter_mut() {
        by_fun.remove(name);
        if by_fun.is_empty() {
            empty_files.push(file.clone());
        }
    }
    for file in empty_files {
        inner.call_files.remove(&file);
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn read_relations(path: &Path) -> Result<Relations> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
