//! End-to-end build scenarios against a stub toolchain.
//!
//! The stub "compiler" concatenates its sources into the destination and
//! appends a nonce so every real recompile produces new bytes, the way a
//! real code generator embeds interface digests. The stub "ocamldep"
//! prints the canned dependency lines stored next to each source. Both
//! append to counter files so the tests can assert exactly which build
//! steps ran.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use rafter::builders::ocaml::{OcamlBuilder, Ocamldep, build_objects};
use rafter::config::BuildConfig;
use rafter::core::context::run_build;
use rafter::error::RafterError;
use tempfile::TempDir;

struct Project {
    tmp: TempDir,
    config: BuildConfig,
    dep_exe: PathBuf,
    compiler_exe: PathBuf,
    compile_count: PathBuf,
}

impl Project {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();

        let compile_count = dir.join("compile.count");
        // Nonce file: every stub invocation bumps it so rebuilt outputs
        // differ byte-wise from their previous incarnation.
        let dep_exe = write_script(
            dir,
            "fake-ocamldep",
            "for a; do src=\"$a\"; done\n\
             if [ -f \"$src.deps\" ]; then cat \"$src.deps\"; fi\n",
        );
        let compiler_exe = write_script(
            dir,
            "fake-ocamlc",
            &format!(
                "dst=\n\
                 srcs=\n\
                 while [ $# -gt 0 ]; do\n\
                 \x20 case \"$1\" in\n\
                 \x20   -o) dst=\"$2\"; shift 2 ;;\n\
                 \x20   -I) shift 2 ;;\n\
                 \x20   -*) shift ;;\n\
                 \x20   *) srcs=\"$srcs $1\"; shift ;;\n\
                 \x20 esac\n\
                 done\n\
                 echo x >> \"{count}\"\n\
                 {{ cat $srcs; wc -c < \"{count}\"; }} > \"$dst\"\n",
                count = compile_count.display()
            ),
        );

        let config = BuildConfig {
            buildroot: dir.join("build"),
            jobs: 2,
            nocolor: true,
            ..BuildConfig::default()
        };

        Self {
            tmp,
            config,
            dep_exe,
            compiler_exe,
            compile_count,
        }
    }

    fn source(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    /// Record the stub dependency line `src -> deps` using artifact
    /// spellings, the way ocamldep prints them.
    fn deps(&self, src: &Path, line: &str) {
        let mut name = src.to_path_buf().into_os_string();
        name.push(".deps");
        fs::write(PathBuf::from(name), line).unwrap();
    }

    fn compile_runs(&self) -> usize {
        fs::read_to_string(&self.compile_count)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Compile `srcs` and link them into `app`.
    fn build(&self, srcs: &[PathBuf]) -> rafter::Result<()> {
        let dep = Ocamldep::new(self.dep_exe.clone());
        let builder = OcamlBuilder::bytecode(self.compiler_exe.clone());
        run_build(&self.config, |ctx| {
            let objs = build_objects(ctx, &builder, &dep, srcs, &[])?;
            builder.link_exe(ctx, Path::new("app"), &objs, &[], &[], &[], false)?;
            Ok(())
        })
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn artifact(path: &Path, ext: &str) -> String {
    path.with_extension(ext).display().to_string()
}

#[test]
fn test_fresh_build_then_fully_cached_rebuild() {
    let project = Project::new();
    let lib = project.source("lib.ml", "let x = 5\n");
    let exe = project.source("exe.ml", "print_int Lib.x\n");
    project.deps(
        &exe,
        &format!("{}: {}\n", artifact(&exe, "cmo"), artifact(&lib, "cmo")),
    );

    project.build(&[lib.clone(), exe.clone()]).unwrap();
    // Two compiles plus the link.
    assert_eq!(project.compile_runs(), 3);
    assert!(project.config.buildroot.join("app").exists());

    // Nothing changed: the whole second run answers from the database.
    project.build(&[lib, exe]).unwrap();
    assert_eq!(project.compile_runs(), 3);
}

#[test]
fn test_editing_a_leaf_rebuilds_only_its_cone() {
    let project = Project::new();
    let lib_mli = project.source("lib.mli", "val x : int\n");
    let lib = project.source("lib.ml", "let x = 5\n");
    let exe = project.source("exe.ml", "print_int Lib.x\n");
    // The executable depends on the library interface, the library
    // implementation on its own interface.
    project.deps(
        &exe,
        &format!("{}: {}\n", artifact(&exe, "cmo"), artifact(&lib_mli, "cmi")),
    );
    project.deps(
        &lib,
        &format!("{}: {}\n", artifact(&lib, "cmo"), artifact(&lib_mli, "cmi")),
    );

    let srcs = vec![lib.clone(), exe.clone()];
    project.build(&srcs).unwrap();
    // lib.mli joins through dependency discovery: three compiles + link.
    assert_eq!(project.compile_runs(), 4);

    // Append to the implementation; the interface is untouched.
    fs::write(&lib, "let x = 5\nlet _ = ()\n").unwrap();
    project.build(&srcs).unwrap();
    // Recompile lib.ml and relink. exe.ml still hits: the interface it
    // reads did not change.
    assert_eq!(project.compile_runs(), 6);
}

#[test]
fn test_editing_an_interface_rebuilds_dependents() {
    let project = Project::new();
    let lib_mli = project.source("lib.mli", "val x : int\n");
    let lib = project.source("lib.ml", "let x = 5\n");
    let exe = project.source("exe.ml", "print_int Lib.x\n");
    project.deps(
        &exe,
        &format!("{}: {}\n", artifact(&exe, "cmo"), artifact(&lib_mli, "cmi")),
    );
    project.deps(
        &lib,
        &format!("{}: {}\n", artifact(&lib, "cmo"), artifact(&lib_mli, "cmi")),
    );

    let srcs = vec![lib.clone(), exe.clone()];
    project.build(&srcs).unwrap();
    assert_eq!(project.compile_runs(), 4);

    // Change the exported type: everything downstream rebuilds.
    fs::write(&lib_mli, "val x : float\n").unwrap();
    project.build(&srcs).unwrap();
    // lib.mli, lib.ml, exe.ml, and the link all ran again.
    assert_eq!(project.compile_runs(), 8);
}

#[test]
fn test_compiler_failure_surfaces_and_skips_the_link() {
    let project = Project::new();
    // A compiler that rejects one particular source.
    let failing = write_script(
        project.tmp.path(),
        "failing-ocamlc",
        "for a; do last=\"$a\"; done\n\
         case \"$last\" in\n\
         \x20 *bad.ml) echo 'syntax error' >&2; exit 1 ;;\n\
         esac\n\
         dst=\n\
         srcs=\n\
         while [ $# -gt 0 ]; do\n\
         \x20 case \"$1\" in\n\
         \x20   -o) dst=\"$2\"; shift 2 ;;\n\
         \x20   -I) shift 2 ;;\n\
         \x20   -*) shift ;;\n\
         \x20   *) srcs=\"$srcs $1\"; shift ;;\n\
         \x20 esac\n\
         done\n\
         cat $srcs > \"$dst\"\n",
    );

    let good = project.source("good.ml", "let g = 1\n");
    let bad = project.source("bad.ml", "let b = !!!\n");

    let dep = Ocamldep::new(project.dep_exe.clone());
    let builder = OcamlBuilder::bytecode(failing);
    let outcome = run_build(&project.config, |ctx| {
        let objs = build_objects(ctx, &builder, &dep, &[good.clone(), bad.clone()], &[])?;
        builder.link_exe(ctx, Path::new("app"), &objs, &[], &[], &[], false)?;
        Ok(())
    });

    match outcome.unwrap_err() {
        RafterError::Execution { output, .. } => assert!(output.contains("syntax error")),
        other => panic!("expected execution error, got {:?}", other),
    }
    // The link never started.
    assert!(!project.config.buildroot.join("app").exists());
}

#[test]
fn test_dependency_cycle_is_fatal_and_named() {
    let project = Project::new();
    let a = project.source("a.ml", "let a = B.b\n");
    let b = project.source("b.ml", "let b = A.a\n");
    project.deps(
        &a,
        &format!("{}: {}\n", artifact(&a, "cmo"), artifact(&b, "cmo")),
    );
    project.deps(
        &b,
        &format!("{}: {}\n", artifact(&b, "cmo"), artifact(&a, "cmo")),
    );

    let outcome = project.build(&[a, b]);
    match outcome.unwrap_err() {
        RafterError::Cycle { nodes } => {
            assert!(nodes.iter().any(|n| n.contains("a.ml")));
            assert!(nodes.iter().any(|n| n.contains("b.ml")));
        }
        other => panic!("expected cycle error, got {:?}", other),
    }
    // Dependency extraction ran, but no compile did.
    assert_eq!(project.compile_runs(), 0);
}

#[test]
fn test_removed_artifact_is_rebuilt() {
    let project = Project::new();
    let lib = project.source("lib.ml", "let x = 5\n");
    project.deps(&lib, "");

    project.build(&[lib.clone()]).unwrap();
    let runs = project.compile_runs();

    // Someone deleted the executable; the link must re-run, the compile
    // still hits.
    fs::remove_file(project.config.buildroot.join("app")).unwrap();
    project.build(&[lib]).unwrap();
    assert_eq!(project.compile_runs(), runs + 1);
    assert!(project.config.buildroot.join("app").exists());
}
