//! OCaml builder adapter.
//!
//! Wraps `ocamldep`, `ocamlc`, and `ocamlopt` as cached procedures. The
//! dependency extractor feeds the scheduler's map-with-dependencies so a
//! module never compiles before the interfaces it mentions; the compile
//! and link operations are ordinary cached calls whose destinations live
//! under the build root.

use std::fs;
use std::path::{Path, PathBuf};

use colored::Color;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::Result;
use crate::core::cache::{Args, FnDescriptor, ParamKind};
use crate::core::context::BuildContext;
use crate::core::exec::{ExecOptions, execute};
use crate::core::value::Value;
use crate::error::RafterError;

use super::{append_suffix, find_program, rebase_into, swap_suffix};

// Implementation revision tokens; bumping one invalidates every recorded
// call of the matching procedure.
const OCAMLDEP_VERSION: &str = "1";
const COMPILE_VERSION: &str = "1";
const LINK_VERSION: &str = "1";

static DEP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:\s]+)\s*:\s*(.*)$").unwrap());

/// Wrapper turning `ocamldep` into a cacheable dependency extractor.
///
/// The tool's stdout is captured into `<buildroot>/<src>.depends`, parsed,
/// and mapped back to source files: a `.cmo`/`.cmx` prerequisite means the
/// matching `.ml`, a `.cmi` means the matching `.mli`. The extractor
/// participates in the cache like any other procedure, so an unchanged
/// source with unchanged prerequisites answers from the database.
pub struct Ocamldep {
    exe: PathBuf,
    module_flags: Vec<String>,
}

impl Ocamldep {
    pub fn new(exe: PathBuf) -> Self {
        Self {
            exe,
            module_flags: Vec::new(),
        }
    }

    /// Extra flags passed before every other argument, e.g. `-modules`.
    pub fn with_module_flags(mut self, flags: Vec<String>) -> Self {
        self.module_flags = flags;
        self
    }

    fn descriptor(&self) -> FnDescriptor {
        FnDescriptor::new("ocaml.ocamldep", OCAMLDEP_VERSION)
            .param("exe", ParamKind::Plain)
            .param("src", ParamKind::Source)
            .param("dst", ParamKind::Destination)
            .param_default("includes", ParamKind::Plain, Value::Seq(Vec::new()))
            .param_default("flags", ParamKind::Plain, Value::Seq(Vec::new()))
    }

    /// List the source files `src` depends on.
    pub fn dependencies(
        &self,
        ctx: &BuildContext,
        src: &Path,
        includes: &[PathBuf],
        flags: &[String],
    ) -> Result<Vec<PathBuf>> {
        let dst = append_suffix(&rebase_into(&ctx.buildroot, src), ".depends");
        let args = Args::new()
            .named("exe", self.exe.as_path())
            .named("src", src)
            .named("dst", dst.as_path())
            .named("includes", Value::path_seq(includes.iter().cloned()))
            .named("flags", Value::str_seq(flags.iter().cloned()));

        let result = ctx.engine.call(&self.descriptor(), args, |_side| {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut cmd = vec![self.exe.to_string_lossy().into_owned()];
            cmd.extend(self.module_flags.iter().cloned());
            for include in includes {
                cmd.push("-I".to_string());
                cmd.push(include.to_string_lossy().into_owned());
            }
            if let Some(dir) = src.parent()
                && !dir.as_os_str().is_empty()
                && !includes.iter().any(|i| i.as_path() == dir)
            {
                cmd.push("-I".to_string());
                cmd.push(dir.to_string_lossy().into_owned());
            }
            cmd.extend(flags.iter().cloned());
            cmd.push(src.to_string_lossy().into_owned());

            execute(
                &ctx.log,
                &cmd,
                &tool_label(&self.exe),
                &format!("{} -> {}", src.display(), dst.display()),
                ExecOptions {
                    stdout_to: Some(&dst),
                    color: Some(Color::Yellow),
                    ..Default::default()
                },
            )?;

            Ok(Value::path_seq(parse_depends(&dst, src)?))
        })?;

        Ok(result.paths())
    }
}

/// Parse an `ocamldep` output file, returning the prerequisites recorded
/// for `src`. Lines ending in a backslash continue on the next line.
fn parse_depends(depfile: &Path, src: &Path) -> Result<Vec<PathBuf>> {
    let contents = fs::read_to_string(depfile)?;
    let joined = contents.replace("\\\n", "");

    let mut paths = Vec::new();
    for line in joined.lines() {
        let Some(caps) = DEP_LINE.captures(line) else {
            continue;
        };
        let Some(target) = fix_extension(Path::new(&caps[1])) else {
            continue;
        };
        if target != src {
            continue;
        }
        for dep in caps[2].split_whitespace() {
            if let Some(fixed) = fix_extension(Path::new(dep))
                && !paths.contains(&fixed)
            {
                paths.push(fixed);
            }
        }
    }
    Ok(paths)
}

/// Map a compiled-artifact name back to the source that produces it.
fn fix_extension(path: &Path) -> Option<PathBuf> {
    match path.extension()?.to_str()? {
        "cmo" | "cmx" => Some(path.with_extension("ml")),
        "cmi" => Some(path.with_extension("mli")),
        _ => None,
    }
}

fn tool_label(exe: &Path) -> String {
    exe.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| exe.display().to_string())
}

/// Compile and link driver for one OCaml code generator.
///
/// Two factories cover the toolchain: [`OcamlBuilder::bytecode`]
/// (`ocamlc`, `.cmo`/`.cma`) and [`OcamlBuilder::native`] (`ocamlopt`,
/// `.cmx`/`.cmxa`).
pub struct OcamlBuilder {
    kind: &'static str,
    exe: PathBuf,
    obj_suffix: &'static str,
    lib_suffix: &'static str,
    exe_suffix: &'static str,
    debug_flags: Vec<String>,
}

impl OcamlBuilder {
    pub fn bytecode(exe: PathBuf) -> Self {
        Self {
            kind: "bytecode",
            exe,
            obj_suffix: ".cmo",
            lib_suffix: ".cma",
            exe_suffix: "",
            debug_flags: vec!["-g".to_string()],
        }
    }

    pub fn native(exe: PathBuf) -> Self {
        Self {
            kind: "native",
            exe,
            obj_suffix: ".cmx",
            lib_suffix: ".cmxa",
            exe_suffix: "",
            debug_flags: vec!["-g".to_string()],
        }
    }

    fn compile_descriptor(&self) -> FnDescriptor {
        FnDescriptor::new(format!("ocaml.{}.compile", self.kind), COMPILE_VERSION)
            .param("exe", ParamKind::Plain)
            .param("src", ParamKind::Source)
            .param("dst", ParamKind::Destination)
            .param_default("includes", ParamKind::Plain, Value::Seq(Vec::new()))
            .param_default("flags", ParamKind::Plain, Value::Seq(Vec::new()))
            .param_default("debug", ParamKind::Plain, Value::Bool(false))
    }

    fn link_descriptor(&self) -> FnDescriptor {
        // Linking consumes compile outputs, so a compile revision change
        // invalidates recorded links as well.
        FnDescriptor::new(format!("ocaml.{}.link", self.kind), LINK_VERSION)
            .references(self.compile_descriptor().digest())
            .param("exe", ParamKind::Plain)
            .param("srcs", ParamKind::Source)
            .param("dst", ParamKind::Destination)
            .param_default("libs", ParamKind::Source, Value::Seq(Vec::new()))
            .param_default("includes", ParamKind::Plain, Value::Seq(Vec::new()))
            .param_default("flags", ParamKind::Plain, Value::Seq(Vec::new()))
            .param_default("pre_flags", ParamKind::Plain, Value::Seq(Vec::new()))
            .param_default("debug", ParamKind::Plain, Value::Bool(false))
    }

    /// Compile one source, dispatching on its extension: `.mli` files
    /// produce interfaces, everything else implementations.
    pub fn compile(
        &self,
        ctx: &BuildContext,
        src: &Path,
        includes: &[PathBuf],
        flags: &[String],
        debug: bool,
    ) -> Result<PathBuf> {
        self.compile_with_deps(ctx, src, &[], includes, flags, debug)
    }

    /// Compile one source whose prerequisites are already built.
    ///
    /// The compiled artifacts of `dep_srcs` (the interfaces and objects
    /// the compiler will read through its include path) are reported as
    /// external sources, so a rebuilt prerequisite invalidates this
    /// compile on the next run.
    pub fn compile_with_deps(
        &self,
        ctx: &BuildContext,
        src: &Path,
        dep_srcs: &[PathBuf],
        includes: &[PathBuf],
        flags: &[String],
        debug: bool,
    ) -> Result<PathBuf> {
        let externals: Vec<PathBuf> = dep_srcs
            .iter()
            .map(|dep| self.dep_artifact(&ctx.buildroot, dep))
            .collect();
        if src.extension().is_some_and(|e| e == "mli") {
            self.compile_to_suffix(ctx, src, ".cmi", includes, flags, debug, &externals)
        } else {
            self.compile_to_suffix(ctx, src, self.obj_suffix, includes, flags, debug, &externals)
        }
    }

    pub fn compile_interface(
        &self,
        ctx: &BuildContext,
        src: &Path,
        includes: &[PathBuf],
        flags: &[String],
        debug: bool,
    ) -> Result<PathBuf> {
        self.compile_to_suffix(ctx, src, ".cmi", includes, flags, debug, &[])
    }

    pub fn compile_implementation(
        &self,
        ctx: &BuildContext,
        src: &Path,
        includes: &[PathBuf],
        flags: &[String],
        debug: bool,
    ) -> Result<PathBuf> {
        self.compile_to_suffix(ctx, src, self.obj_suffix, includes, flags, debug, &[])
    }

    /// The artifact a prerequisite source contributes to this compile:
    /// interfaces yield their `.cmi`, implementations their object file.
    fn dep_artifact(&self, buildroot: &Path, dep_src: &Path) -> PathBuf {
        let rebased = rebase_into(buildroot, dep_src);
        if dep_src.extension().is_some_and(|e| e == "mli") {
            swap_suffix(&rebased, ".cmi")
        } else {
            swap_suffix(&rebased, self.obj_suffix)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_to_suffix(
        &self,
        ctx: &BuildContext,
        src: &Path,
        suffix: &str,
        includes: &[PathBuf],
        flags: &[String],
        debug: bool,
        externals: &[PathBuf],
    ) -> Result<PathBuf> {
        let dst = swap_suffix(&rebase_into(&ctx.buildroot, src), suffix);
        let desc = self.compile_descriptor();
        let args = Args::new()
            .named("exe", self.exe.as_path())
            .named("src", src)
            .named("dst", dst.as_path())
            .named("includes", Value::path_seq(includes.iter().cloned()))
            .named("flags", Value::str_seq(flags.iter().cloned()))
            .named("debug", debug);

        let result = ctx.engine.call(&desc, args, |side| {
            for external in externals {
                side.add_external_src(external);
            }
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            let pre_flags = ["-c".to_string()];
            let cmd = self.command(&dst, &[src.to_path_buf()], &[], includes, &pre_flags, flags, debug);
            execute(
                &ctx.log,
                &cmd,
                &tool_label(&self.exe),
                &format!("{} -> {}", src.display(), dst.display()),
                ExecOptions {
                    color: Some(Color::Green),
                    ..Default::default()
                },
            )?;
            Ok(Value::Path(dst.clone()))
        })?;

        single_path(&desc, result)
    }

    /// Link objects into a library archive.
    pub fn link_lib(
        &self,
        ctx: &BuildContext,
        dst: &Path,
        objs: &[PathBuf],
        libs: &[PathBuf],
        includes: &[PathBuf],
        flags: &[String],
        debug: bool,
    ) -> Result<PathBuf> {
        let pre_flags = ["-a".to_string()];
        self.link(ctx, dst, self.lib_suffix, objs, libs, includes, flags, &pre_flags, debug)
    }

    /// Link objects and libraries into an executable.
    pub fn link_exe(
        &self,
        ctx: &BuildContext,
        dst: &Path,
        objs: &[PathBuf],
        libs: &[PathBuf],
        includes: &[PathBuf],
        flags: &[String],
        debug: bool,
    ) -> Result<PathBuf> {
        self.link(ctx, dst, self.exe_suffix, objs, libs, includes, flags, &[], debug)
    }

    #[allow(clippy::too_many_arguments)]
    fn link(
        &self,
        ctx: &BuildContext,
        dst: &Path,
        suffix: &str,
        objs: &[PathBuf],
        libs: &[PathBuf],
        includes: &[PathBuf],
        flags: &[String],
        pre_flags: &[String],
        debug: bool,
    ) -> Result<PathBuf> {
        let dst = append_suffix(&rebase_into(&ctx.buildroot, dst), suffix);
        let libs = self.resolve_libs(libs);
        let desc = self.link_descriptor();
        let args = Args::new()
            .named("exe", self.exe.as_path())
            .named("srcs", Value::path_seq(objs.iter().cloned()))
            .named("dst", dst.as_path())
            .named("libs", Value::path_seq(libs.iter().cloned()))
            .named("includes", Value::path_seq(includes.iter().cloned()))
            .named("flags", Value::str_seq(flags.iter().cloned()))
            .named("pre_flags", Value::str_seq(pre_flags.iter().cloned()))
            .named("debug", debug);

        let result = ctx.engine.call(&desc, args, |_side| {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            let cmd = self.command(&dst, objs, &libs, includes, pre_flags, flags, debug);
            let inputs: Vec<String> = libs
                .iter()
                .chain(objs.iter())
                .map(|p| p.display().to_string())
                .collect();
            execute(
                &ctx.log,
                &cmd,
                &tool_label(&self.exe),
                &format!("{} -> {}", inputs.join(" "), dst.display()),
                ExecOptions {
                    color: Some(Color::Cyan),
                    ..Default::default()
                },
            )?;
            Ok(Value::Path(dst.clone()))
        })?;

        single_path(&desc, result)
    }

    /// A library argument may be a finished archive path or a bare name
    /// awaiting its suffix.
    fn resolve_libs(&self, libs: &[PathBuf]) -> Vec<PathBuf> {
        libs.iter()
            .map(|lib| {
                if lib.exists() {
                    lib.clone()
                } else {
                    append_suffix(lib, self.lib_suffix)
                }
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn command(
        &self,
        dst: &Path,
        srcs: &[PathBuf],
        libs: &[PathBuf],
        includes: &[PathBuf],
        pre_flags: &[String],
        flags: &[String],
        debug: bool,
    ) -> Vec<String> {
        let mut cmd = vec![self.exe.to_string_lossy().into_owned()];
        cmd.extend(pre_flags.iter().cloned());
        if debug {
            cmd.extend(self.debug_flags.iter().cloned());
        }
        for include in includes {
            cmd.push("-I".to_string());
            cmd.push(include.to_string_lossy().into_owned());
        }
        if let Some(dir) = dst.parent()
            && !dir.as_os_str().is_empty()
            && !includes.iter().any(|i| i.as_path() == dir)
        {
            cmd.push("-I".to_string());
            cmd.push(dir.to_string_lossy().into_owned());
        }
        cmd.extend(flags.iter().cloned());
        cmd.push("-o".to_string());
        cmd.push(dst.to_string_lossy().into_owned());
        for lib in libs {
            cmd.push(lib.to_string_lossy().into_owned());
        }
        for src in srcs {
            cmd.push(src.to_string_lossy().into_owned());
        }
        cmd
    }
}

fn single_path(desc: &FnDescriptor, result: Value) -> Result<PathBuf> {
    match result {
        Value::Path(path) => Ok(path),
        other => Err(RafterError::user(
            desc.name(),
            format!("expected a path result, got {:?}", other),
        )),
    }
}

/// Compile the transitive closure of `srcs` in dependency order.
///
/// The extractor runs as the scheduler's dependency function and the
/// compiler as its worker; interfaces discovered along the way compile
/// too, and their `.cmi` outputs are filtered from the object list handed
/// to a linker.
pub fn build_objects(
    ctx: &BuildContext,
    builder: &OcamlBuilder,
    dep: &Ocamldep,
    srcs: &[PathBuf],
    includes: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let objs = ctx.scheduler.map_with_dependencies(
        |src: &PathBuf| {
            let _scope = ctx.log.buffer_thread();
            dep.dependencies(ctx, src, includes, &[])
        },
        |src: &PathBuf| {
            let _scope = ctx.log.buffer_thread();
            // A second extractor call answers from the cache; its result
            // names the artifacts this compile reads.
            let deps = dep.dependencies(ctx, src, includes, &[])?;
            builder.compile_with_deps(ctx, src, &deps, includes, &[], false)
        },
        srcs.to_vec(),
    )?;
    Ok(objs
        .into_iter()
        .filter(|obj| obj.extension().is_none_or(|e| e != "cmi"))
        .collect())
}

/// Smoke-test a builder: compile and link a two-module program in a
/// scratch directory and run it. Any failure is a configuration error.
///
/// Probes bypass the cache; their scratch paths are different every run
/// and recording them would only grow the database.
pub fn check_builder(ctx: &BuildContext, builder: &OcamlBuilder) -> Result<()> {
    let scratch = tempfile::tempdir()?;
    let dir = scratch.path();

    let src_lib = dir.join("lib.ml");
    fs::write(&src_lib, "let x = 5;;\n")?;
    let src_exe = dir.join("exe.ml");
    fs::write(&src_exe, "print_int Lib.x;;\n")?;

    ctx.log.check("checking if ocaml can make objects");
    let lib_obj = probe(ctx, &builder.command(
        &swap_suffix(&src_lib, builder.obj_suffix),
        &[src_lib.clone()],
        &[],
        &[],
        &["-c".to_string()],
        &[],
        false,
    ))
    .map(|_| swap_suffix(&src_lib, builder.obj_suffix));
    let lib_obj = match lib_obj {
        Ok(obj) => {
            ctx.log.passed();
            obj
        }
        Err(_) => {
            ctx.log.failed();
            return Err(RafterError::config("ocaml compiler failed"));
        }
    };

    ctx.log.check("checking if ocaml can make libraries");
    let lib = dir.join(format!("lib{}", builder.lib_suffix));
    if probe(ctx, &builder.command(
        &lib,
        &[lib_obj],
        &[],
        &[],
        &["-a".to_string()],
        &[],
        false,
    ))
    .is_err()
    {
        ctx.log.failed();
        return Err(RafterError::config("ocaml lib linker failed"));
    }
    ctx.log.passed();

    ctx.log.check("checking if ocaml can link lib to exe");
    let exe_obj = swap_suffix(&src_exe, builder.obj_suffix);
    let exe = dir.join("exe");
    let linked = probe(ctx, &builder.command(
        &exe_obj,
        &[src_exe.clone()],
        &[],
        &[],
        &["-c".to_string()],
        &[],
        false,
    ))
    .and_then(|_| {
        probe(ctx, &builder.command(&exe, &[exe_obj], &[lib.clone()], &[], &[], &[], false))
    })
    .and_then(|_| {
        execute(
            &ctx.log,
            &[exe.to_string_lossy().into_owned()],
            "exe",
            "",
            ExecOptions {
                quieter: true,
                ..Default::default()
            },
        )
    });
    match linked {
        Ok(output) if output.stdout == b"5" => {
            ctx.log.passed();
            Ok(())
        }
        _ => {
            ctx.log.failed();
            Err(RafterError::config("failed to link ocaml lib to exe"))
        }
    }
}

fn probe(ctx: &BuildContext, cmd: &[String]) -> Result<std::process::Output> {
    execute(
        &ctx.log,
        cmd,
        "probe",
        "",
        ExecOptions {
            quieter: true,
            ..Default::default()
        },
    )
}

/// The located and probed OCaml toolchain.
pub struct OcamlTools {
    pub dep: Ocamldep,
    pub bytecode: OcamlBuilder,
    pub native: Option<OcamlBuilder>,
}

impl OcamlTools {
    /// Locate `ocamldep` and the compilers on `PATH` and smoke-test them.
    ///
    /// The bytecode compiler is required; the native compiler is optional
    /// and skipped quietly when absent.
    pub fn configure(ctx: &BuildContext) -> Result<Self> {
        let dep_exe = find_program(&ctx.log, &["ocamldep.opt", "ocamldep"])?;

        let bytecode_exe = find_program(&ctx.log, &["ocamlc.opt", "ocamlc"])?;
        let bytecode = OcamlBuilder::bytecode(bytecode_exe);
        check_builder(ctx, &bytecode)?;

        let native = match find_program(&ctx.log, &["ocamlopt.opt", "ocamlopt"]) {
            Ok(exe) => {
                let builder = OcamlBuilder::native(exe);
                check_builder(ctx, &builder)?;
                Some(builder)
            }
            Err(_) => None,
        };

        Ok(Self {
            dep: Ocamldep::new(dep_exe),
            bytecode,
            native,
        })
    }
}
