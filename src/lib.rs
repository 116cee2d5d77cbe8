// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

//! Compiler for a value-locking contract language.
//!
//! Source text declares named, parameterized contracts; each locks a value
//! (an amount of an asset) behind a set of clauses that re-lock or release
//! it against a spending transaction. A contract compiles to a byte-exact
//! program for the target chain's stack interpreter.
//!
//! Compilation is a pure function of the source bytes plus the import
//! resolver; no state survives a call, so independent compilations may run
//! concurrently.

#![forbid(unsafe_code)]

pub mod check;
pub mod compiler;
pub mod digest;
pub mod error;
pub mod lang;
pub mod logging;
pub mod types;

use std::io;
use std::path::PathBuf;

use tracing::{debug, instrument};

pub use compiler::{ClauseInfo, CompiledContract};
pub use error::{Error, ErrorKind, Pos, Result};

/// Maps `import "path"` directives to source bytes. The compiler only ever
/// calls this between parses; it is the single suspension point.
pub trait ImportResolver {
    fn resolve(&mut self, path: &str) -> io::Result<Vec<u8>>;
}

/// Resolver for sources that must not import anything.
pub struct NoImports;

impl ImportResolver for NoImports {
    fn resolve(&mut self, path: &str) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("imports are not available here ({path})"),
        ))
    }
}

/// Resolves import paths relative to a base directory.
pub struct DirResolver {
    base: PathBuf,
}

impl DirResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl ImportResolver for DirResolver {
    fn resolve(&mut self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.base.join(path))
    }
}

/// Compile a source unit. The result lists every contract of the unit in
/// order, imported ones first; each carries its emitted byte body, which
/// callers typically render as lowercase hex.
#[instrument(level = "debug", skip_all)]
pub fn compile(src: &[u8], resolver: &mut dyn ImportResolver) -> Result<Vec<CompiledContract>> {
    let contracts = lang::parse(src, resolver)?;
    debug!(contracts = contracts.len(), "parsed");
    check::check_unit(&contracts)?;
    compiler::compile_contracts(&contracts)
}

/// Compile a self-contained source unit (no imports).
pub fn compile_single(src: &[u8]) -> Result<Vec<CompiledContract>> {
    compile(src, &mut NoImports)
}
