//! The cached-call engine.
//!
//! `CacheEngine::call` is the single entry point through which every build
//! procedure runs. It binds the arguments, digests the declared sources
//! through the mtime-gated file cache, checks the procedure's identity
//! digest, and then either returns the recorded result (hit) or runs the
//! body and records what it read, wrote, and returned (miss).

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;

use crate::Result;
use crate::core::console::Log;
use crate::core::db::Database;
use crate::core::digest::digest_file;
use crate::core::value::{Value, path_key};
use crate::error::RafterError;

use super::descriptor::{Args, Bound, FnDescriptor};

/// Hit/miss counters for a build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Side channel handed to a running procedure body.
///
/// A procedure that reads or writes files not named by its parameters
/// reports them here so they participate in change detection on the next
/// run. The channel lives only for the duration of the body.
#[derive(Default)]
pub struct SideChannel {
    srcs: RefCell<BTreeSet<String>>,
    dsts: RefCell<BTreeSet<String>>,
}

impl SideChannel {
    /// Report a file the procedure read beyond its declared parameters.
    pub fn add_external_src<P: AsRef<Path>>(&self, path: P) {
        self.srcs.borrow_mut().insert(path_key(path.as_ref()));
    }

    /// Report a file the procedure wrote beyond its declared parameters.
    pub fn add_external_dst<P: AsRef<Path>>(&self, path: P) {
        self.dsts.borrow_mut().insert(path_key(path.as_ref()));
    }

    fn into_sets(self) -> (BTreeSet<String>, BTreeSet<String>) {
        (self.srcs.into_inner(), self.dsts.into_inner())
    }
}

/// Store-backed memoization of build procedures.
///
/// The engine holds a handle to the database; the database does not know
/// the engine exists.
pub struct CacheEngine {
    db: Arc<Database>,
    log: Arc<Log>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CacheEngine {
    pub fn new(db: Arc<Database>, log: Arc<Log>) -> Self {
        Self {
            db,
            log,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// The backing database.
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Hit/miss counters since the engine was created.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Run `body` as the cached procedure described by `desc`.
    ///
    /// On a hit the recorded result is returned and the body never runs.
    /// On a miss the body runs with a fresh [`SideChannel`], and the call,
    /// its file digests, and its external file sets are written back to
    /// the database.
    pub fn call<F>(&self, desc: &FnDescriptor, args: Args, body: F) -> Result<Value>
    where
        F: FnOnce(&SideChannel) -> Result<Value>,
    {
        let bound = desc.bind(args)?;

        // Digest declared sources up front; a missing declared source is
        // a misdeclaration, not a miss.
        let mut src_digests = Vec::with_capacity(bound.sources.len());
        for path in &bound.sources {
            let digest = self.cached_digest(path).map_err(|_| {
                RafterError::user(
                    desc.name(),
                    format!("declared source does not exist: {}", path.display()),
                )
            })?;
            src_digests.push((path_key(path), digest));
        }

        // A changed identity digest purges every recorded call.
        let fun_digest = desc.digest();
        let force_miss = self.db.check_function(desc.name(), &fun_digest);

        let (call_id, prior) = if force_miss {
            (None, None)
        } else {
            self.db.find_call(desc.name(), &bound.fingerprint)
        };

        if let (Some(id), Some(prior_result)) = (call_id, prior)
            && self.call_is_fresh(desc.name(), id, &src_digests, &bound, &prior_result)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.log
                .log_verbose(&format!("cached: {}", desc.name()), 1);
            return Ok(prior_result);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let side = SideChannel::default();
        let result = body(&side)?;
        let (ext_srcs, ext_dsts) = side.into_sets();

        self.record_call(desc, bound, call_id, result, ext_srcs, ext_dsts)
    }

    /// Compare every file recorded for call `(name, id)` against its
    /// current digest. Declared sources go first for the common early
    /// exit; destinations are checked last, and one that no longer exists
    /// on disk is stale even if its recorded digest is present.
    fn call_is_fresh(
        &self,
        name: &str,
        id: usize,
        src_digests: &[(String, String)],
        bound: &Bound,
        prior_result: &Value,
    ) -> bool {
        for (key, current) in src_digests {
            if self.db.find_call_file(id, name, key).as_deref() != Some(current.as_str()) {
                return false;
            }
        }

        for src in self.db.find_external_srcs(id, name) {
            let Ok(current) = self.cached_digest(Path::new(&src)) else {
                return false;
            };
            if self.db.find_call_file(id, name, &src).as_deref() != Some(current.as_str()) {
                return false;
            }
        }

        let mut dst_keys: Vec<String> =
            bound.destinations.iter().map(|p| path_key(p)).collect();
        for path in prior_result.paths() {
            let key = path_key(&path);
            if !dst_keys.contains(&key) {
                dst_keys.push(key);
            }
        }
        dst_keys.extend(self.db.find_external_dsts(id, name));

        for dst in dst_keys {
            let Ok(current) = self.cached_digest(Path::new(&dst)) else {
                // The artifact was removed; rebuild.
                return false;
            };
            if self.db.find_call_file(id, name, &dst).as_deref() != Some(current.as_str()) {
                return false;
            }
        }

        true
    }

    /// Persist a completed call: digests of everything it touched, the
    /// external file sets, and the `(bound, result)` record itself.
    fn record_call(
        &self,
        desc: &FnDescriptor,
        bound: Bound,
        call_id: Option<usize>,
        result: Value,
        ext_srcs: BTreeSet<String>,
        ext_dsts: BTreeSet<String>,
    ) -> Result<Value> {
        // Destinations: declared parameters plus any paths in the result.
        let mut dst_paths: Vec<PathBuf> = bound.destinations.clone();
        for path in result.paths() {
            if !dst_paths.contains(&path) {
                dst_paths.push(path);
            }
        }

        // Digest sources and destinations now, after the body ran.
        let mut call_files = Vec::new();
        for path in &bound.sources {
            let digest = self.cached_digest(path).map_err(|_| {
                RafterError::user(
                    desc.name(),
                    format!("source disappeared during the call: {}", path.display()),
                )
            })?;
            call_files.push((path_key(path), digest));
        }
        for path in &dst_paths {
            let digest = self.fresh_digest(path).map_err(|_| {
                RafterError::user(
                    desc.name(),
                    format!("did not produce destination: {}", path.display()),
                )
            })?;
            call_files.push((path_key(path), digest));
        }

        let mut ext_digests = Vec::new();
        for src in &ext_srcs {
            let digest = self.cached_digest(Path::new(src)).map_err(|_| {
                RafterError::user(
                    desc.name(),
                    format!("external source does not exist: {}", src),
                )
            })?;
            ext_digests.push((src.clone(), digest));
        }
        for dst in &ext_dsts {
            let digest = self.fresh_digest(Path::new(dst)).map_err(|_| {
                RafterError::user(
                    desc.name(),
                    format!("external destination was not produced: {}", dst),
                )
            })?;
            ext_digests.push((dst.clone(), digest));
        }

        let id = self
            .db
            .save_call(desc.name(), call_id, bound.fingerprint, result.clone());
        self.db
            .save_external_files(desc.name(), id, ext_srcs, ext_dsts, ext_digests);
        for (key, digest) in call_files {
            self.db.save_call_file(id, desc.name(), &key, &digest);
        }

        Ok(result)
    }

    /// Digest a file through the mtime cache: when the stored stamp still
    /// matches the file's current mtime the stored digest is reused,
    /// otherwise the content is re-hashed and the stamp refreshed.
    pub fn cached_digest(&self, path: &Path) -> Result<String> {
        let key = path_key(path);
        let metadata = fs::metadata(path)?;
        let mtime = mtime_seconds(&metadata);
        if let Some((stamp, digest)) = self.db.find_file(&key)
            && stamp == mtime
        {
            return Ok(digest);
        }
        let digest = digest_file(path)?;
        self.db.save_file(&key, mtime, &digest);
        Ok(digest)
    }

    /// Digest a file unconditionally and refresh its stamp. Used for
    /// destinations right after a procedure produced them.
    fn fresh_digest(&self, path: &Path) -> Result<String> {
        let digest = digest_file(path)?;
        let metadata = fs::metadata(path)?;
        self.db
            .save_file(&path_key(path), mtime_seconds(&metadata), &digest);
        Ok(digest)
    }
}

/// Modification time as float seconds since the epoch, matching the
/// exact-equality comparison the file cache performs.
fn mtime_seconds(metadata: &fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::ParamKind;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        engine: CacheEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let log = Log::open(&tmp.path().join("test.log"), 0, true, false).unwrap();
            let db = Database::new(tmp.path().join("rafter.db"));
            Self {
                tmp,
                engine: CacheEngine::new(Arc::new(db), Arc::new(log)),
            }
        }

        fn write(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.tmp.path().join(name);
            fs::write(&path, contents).unwrap();
            path
        }
    }

    fn copy_descriptor(version: &str) -> FnDescriptor {
        FnDescriptor::new("test.copy", version)
            .param("src", ParamKind::Source)
            .param("dst", ParamKind::Destination)
    }

    /// A cacheable "compiler" that copies src to dst and counts runs.
    fn run_copy(
        fx: &Fixture,
        desc: &FnDescriptor,
        src: &Path,
        dst: &Path,
        runs: &AtomicUsize,
    ) -> Value {
        fx.engine
            .call(desc, Args::new().arg(src).arg(dst), |_side| {
                runs.fetch_add(1, Ordering::SeqCst);
                fs::copy(src, dst)?;
                Ok(Value::Path(dst.to_path_buf()))
            })
            .unwrap()
    }

    #[test]
    fn test_second_identical_call_is_a_hit() {
        let fx = Fixture::new();
        let desc = copy_descriptor("1");
        let src = fx.write("lib.ml", "let x = 5");
        let dst = fx.tmp.path().join("lib.cmo");
        let runs = AtomicUsize::new(0);

        let first = run_copy(&fx, &desc, &src, &dst, &runs);
        let second = run_copy(&fx, &desc, &src, &dst, &runs);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(fx.engine.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_changed_source_causes_exactly_one_miss() {
        let fx = Fixture::new();
        let desc = copy_descriptor("1");
        let lib = fx.write("lib.ml", "let x = 5");
        let util = fx.write("util.ml", "let y = 6");
        let lib_dst = fx.tmp.path().join("lib.cmo");
        let util_dst = fx.tmp.path().join("util.cmo");
        let runs = AtomicUsize::new(0);

        run_copy(&fx, &desc, &lib, &lib_dst, &runs);
        run_copy(&fx, &desc, &util, &util_dst, &runs);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Only the call that references the edited file re-runs.
        fx.write("lib.ml", "let x = 5\n");
        run_copy(&fx, &desc, &lib, &lib_dst, &runs);
        run_copy(&fx, &desc, &util, &util_dst, &runs);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_version_bump_invalidates_every_call() {
        let fx = Fixture::new();
        let src_a = fx.write("a.ml", "a");
        let src_b = fx.write("b.ml", "b");
        let dst_a = fx.tmp.path().join("a.cmo");
        let dst_b = fx.tmp.path().join("b.cmo");
        let runs = AtomicUsize::new(0);

        let v1 = copy_descriptor("1");
        run_copy(&fx, &v1, &src_a, &dst_a, &runs);
        run_copy(&fx, &v1, &src_b, &dst_b, &runs);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let v2 = copy_descriptor("2");
        run_copy(&fx, &v2, &src_a, &dst_a, &runs);
        run_copy(&fx, &v2, &src_b, &dst_b, &runs);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_external_source_change_causes_miss() {
        let fx = Fixture::new();
        let desc = FnDescriptor::new("test.include", "1")
            .param("src", ParamKind::Source)
            .param("dst", ParamKind::Destination);
        let src = fx.write("main.c", "#include \"header.h\"");
        let header = fx.write("header.h", "#define X 1");
        let dst = fx.tmp.path().join("main.o");
        let runs = AtomicUsize::new(0);

        let compile = |runs: &AtomicUsize| {
            fx.engine
                .call(&desc, Args::new().arg(&*src).arg(&*dst), |side| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    side.add_external_src(&header);
                    fs::copy(&src, &dst)?;
                    Ok(Value::Path(dst.clone()))
                })
                .unwrap()
        };

        compile(&runs);
        compile(&runs);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // No parameter changed, but the reported include did.
        fx.write("header.h", "#define X 2");
        compile(&runs);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_removed_destination_causes_miss() {
        let fx = Fixture::new();
        let desc = copy_descriptor("1");
        let src = fx.write("lib.ml", "let x = 5");
        let dst = fx.tmp.path().join("lib.cmo");
        let runs = AtomicUsize::new(0);

        run_copy(&fx, &desc, &src, &dst, &runs);
        fs::remove_file(&dst).unwrap();
        run_copy(&fx, &desc, &src, &dst, &runs);

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(dst.exists());
    }

    #[test]
    fn test_ignored_parameter_does_not_split_the_cache() {
        let fx = Fixture::new();
        let desc = FnDescriptor::new("test.quiet", "1")
            .param("src", ParamKind::Source)
            .param("dst", ParamKind::Destination)
            .param_default("quieter", ParamKind::Ignored, Value::Bool(false));
        let src = fx.write("lib.ml", "let x = 5");
        let dst = fx.tmp.path().join("lib.cmo");
        let runs = AtomicUsize::new(0);

        for quieter in [false, true] {
            fx.engine
                .call(
                    &desc,
                    Args::new().arg(&*src).arg(&*dst).named("quieter", quieter),
                    |_side| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        fs::copy(&src, &dst)?;
                        Ok(Value::Path(dst.clone()))
                    },
                )
                .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_declared_source_is_a_user_error() {
        let fx = Fixture::new();
        let desc = copy_descriptor("1");
        let missing = fx.tmp.path().join("ghost.ml");
        let dst = fx.tmp.path().join("ghost.cmo");

        let err = fx
            .engine
            .call(&desc, Args::new().arg(&*missing).arg(&*dst), |_side| {
                Ok(Value::Path(dst.clone()))
            })
            .unwrap_err();
        match err {
            RafterError::User { function, message } => {
                assert_eq!(function, "test.copy");
                assert!(message.contains("ghost.ml"));
            }
            other => panic!("expected user error, got {:?}", other),
        }
    }

    #[test]
    fn test_body_failure_records_nothing() {
        let fx = Fixture::new();
        let desc = copy_descriptor("1");
        let src = fx.write("lib.ml", "let x = 5");
        let dst = fx.tmp.path().join("lib.cmo");
        let runs = AtomicUsize::new(0);

        let failing = fx.engine.call(
            &desc,
            Args::new().arg(&*src).arg(&*dst),
            |_side| -> Result<Value> {
                Err(RafterError::execution("ocamlc", Some(2), "syntax error"))
            },
        );
        assert!(failing.is_err());

        // The failed attempt left no record; the retry runs the body.
        run_copy(&fx, &desc, &src, &dst, &runs);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mtime_cache_avoids_redigesting_unchanged_files() {
        let fx = Fixture::new();
        let src = fx.write("lib.ml", "let x = 5");
        let first = fx.engine.cached_digest(&src).unwrap();
        // Second digest must come from the stamp cache and agree.
        let second = fx.engine.cached_digest(&src).unwrap();
        assert_eq!(first, second);
        assert!(fx.engine.db().find_file(&path_key(&src)).is_some());
    }
}
