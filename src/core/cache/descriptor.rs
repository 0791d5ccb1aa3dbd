//! Procedure descriptors and argument binding.
//!
//! Descriptors replace runtime reflection: a builder registers, once, the
//! name and version of each cached procedure and a record per parameter
//! saying how the engine should treat it. Binding resolves positional and
//! named arguments against those records so semantically identical calls
//! always produce the same bound mapping.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::Result;
use crate::core::digest::digest_str;
use crate::core::value::Value;
use crate::error::RafterError;

/// How the cached-call engine treats a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// An input file (or sequence of files) whose digest gates freshness.
    Source,
    /// An output file (or sequence of files) the procedure produces.
    Destination,
    /// An ordinary value that participates in the fingerprint.
    Plain,
    /// Bound normally but excluded from the fingerprint.
    Ignored,
}

/// One registered parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Value>,
}

/// Identity and signature of a cached procedure.
///
/// The `version` token stands in for the procedure's source representation:
/// bumping it invalidates every recorded call, exactly as editing the body
/// would in a reflective system. `refs` carries the digests of other
/// cached procedures this one statically builds on, so a change in a
/// callee invalidates the caller too.
#[derive(Debug, Clone)]
pub struct FnDescriptor {
    name: String,
    version: String,
    refs: Vec<String>,
    params: Vec<ParamSpec>,
}

/// The outcome of binding arguments against a descriptor.
#[derive(Debug)]
pub struct Bound {
    /// Parameter name to value, defaults filled in, ignored params left
    /// out. This is what the database compares structurally.
    pub fingerprint: BTreeMap<String, Value>,
    /// Every path carried by a source-classified parameter.
    pub sources: Vec<PathBuf>,
    /// Every path carried by a destination-classified parameter.
    pub destinations: Vec<PathBuf>,
}

impl FnDescriptor {
    /// Start a descriptor for the named procedure.
    pub fn new<S1, S2>(name: S1, version: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            name: name.into(),
            version: version.into(),
            refs: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Register a parameter.
    pub fn param<S: Into<String>>(mut self, name: S, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    /// Register a parameter with a default value.
    pub fn param_default<S: Into<String>>(
        mut self,
        name: S,
        kind: ParamKind,
        default: Value,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            default: Some(default),
        });
        self
    }

    /// Record the digest of another cached procedure this one references.
    pub fn references<S: Into<String>>(mut self, digest: S) -> Self {
        self.refs.push(digest.into());
        self
    }

    /// The procedure name used as the database key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered parameters, in declaration order.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Digest of the procedure's identity and signature.
    ///
    /// Covers the name, the version token, every parameter record, and
    /// the digests of referenced procedures; any change here invalidates
    /// all recorded calls.
    pub fn digest(&self) -> String {
        let mut identity = format!("{}\x00{}", self.name, self.version);
        for param in &self.params {
            identity.push('\x00');
            identity.push_str(&param.name);
            identity.push('=');
            identity.push_str(match param.kind {
                ParamKind::Source => "src",
                ParamKind::Destination => "dst",
                ParamKind::Plain => "plain",
                ParamKind::Ignored => "ignored",
            });
        }
        for reference in &self.refs {
            identity.push('\x00');
            identity.push_str(reference);
        }
        digest_str(&identity)
    }

    /// Resolve arguments against the declared parameters.
    ///
    /// Positional arguments fill parameters in declaration order; named
    /// arguments may come in any order; defaults cover the rest. The same
    /// bound mapping comes out however the caller mixed the two styles.
    pub fn bind(&self, args: Args) -> Result<Bound> {
        if args.positional.len() > self.params.len() {
            return Err(self.user_error(format!(
                "takes {} parameters but {} positional arguments were given",
                self.params.len(),
                args.positional.len()
            )));
        }

        let mut slots: Vec<Option<Value>> = self.params.iter().map(|_| None).collect();
        for (slot, value) in slots.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }

        for (name, value) in args.named {
            let Some(position) = self.params.iter().position(|p| p.name == name) else {
                return Err(self.user_error(format!("unknown parameter '{}'", name)));
            };
            if slots[position].is_some() {
                return Err(self.user_error(format!("duplicate argument for '{}'", name)));
            }
            slots[position] = Some(value);
        }

        let mut fingerprint = BTreeMap::new();
        let mut sources = Vec::new();
        let mut destinations = Vec::new();

        for (spec, slot) in self.params.iter().zip(slots) {
            let value = match slot.or_else(|| spec.default.clone()) {
                Some(value) => value,
                None => {
                    return Err(self.user_error(format!("missing argument '{}'", spec.name)));
                }
            };

            match spec.kind {
                ParamKind::Source => {
                    sources.extend(self.path_values(&spec.name, &value)?);
                }
                ParamKind::Destination => {
                    destinations.extend(self.path_values(&spec.name, &value)?);
                }
                ParamKind::Plain | ParamKind::Ignored => {}
            }

            if spec.kind != ParamKind::Ignored {
                fingerprint.insert(spec.name.clone(), value);
            }
        }

        Ok(Bound {
            fingerprint,
            sources,
            destinations,
        })
    }

    /// A path parameter accepts a single path or a sequence of paths.
    fn path_values(&self, param: &str, value: &Value) -> Result<Vec<PathBuf>> {
        match value {
            Value::Path(path) => Ok(vec![path.clone()]),
            Value::Seq(items) => {
                let mut paths = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Path(path) => paths.push(path.clone()),
                        _ => {
                            return Err(self.user_error(format!(
                                "parameter '{}' must contain only paths",
                                param
                            )));
                        }
                    }
                }
                Ok(paths)
            }
            _ => Err(self.user_error(format!(
                "parameter '{}' must be a path or a sequence of paths",
                param
            ))),
        }
    }

    fn user_error(&self, message: String) -> RafterError {
        RafterError::user(&self.name, message)
    }
}

/// Arguments for a cached call, positional and/or named.
#[derive(Debug, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Args {
    /// Start an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<V: Into<Value>>(mut self, value: V) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a named argument.
    pub fn named<S, V>(mut self, name: S, value: V) -> Self
    where
        S: Into<String>,
        V: Into<Value>,
    {
        self.named.push((name.into(), value.into()));
        self
    }
}
