//! # nwscript
//!
//! Compiler and decompiler for NWScript and its NCS bytecode.
//!
//! ```text
//! source ─ frontend ─> CodeRoot ─ bytecode::compile ─> Program ─ encode ─> bytes
//! bytes ─ decode ─> Program ─ decompile ─> source
//! ```
//!
//! Host engine routines and constants come from a [`Catalog`], either the
//! built-in one or a file loaded with [`Catalog::load`].

pub mod bytecode;
pub mod decompile;
pub mod embed;
pub mod error;
pub mod frontend;
pub mod lang;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use tracing::{debug, trace};

pub use crate::decompile::DecompileOptions;
pub use crate::error::Error;
pub use crate::lang::catalog::Catalog;

use crate::bytecode::{compile_root, decode, encode, CompileError, Program};
use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::lang::ast::{CodeRoot, TopLevel};

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Directories searched for `name.nss` when resolving an include.
    pub include_paths: Vec<PathBuf>,
    /// In-memory include units by name, tried after the search paths.
    pub library: HashMap<String, String>,
    /// Reject units without `main` or `StartingConditional`. Without it such
    /// a unit compiles as a library of functions.
    pub entry_point_required: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            library: HashMap::new(),
            entry_point_required: true,
        }
    }
}

/// Compiles source to NCS bytes.
///
/// Source carrying an embedded bytecode block (see [`embed`]) compiles to
/// exactly those bytes.
pub fn compile(source: &str, catalog: &Catalog, options: &CompileOptions) -> Result<Vec<u8>, Error> {
    if let Some(embedded) = embed::extract(source) {
        let bytes = embedded?;
        decode(&bytes)?;
        debug!(bytes = bytes.len(), "using embedded bytecode");
        return Ok(bytes);
    }
    let program = compile_program(source, catalog, options)?;
    let bytes = encode(&program)?;
    debug!(bytes = bytes.len(), "encoded program");
    Ok(bytes)
}

/// Compiles source, includes resolved, to the instruction model.
pub fn compile_program(source: &str, catalog: &Catalog, options: &CompileOptions) -> Result<Program, Error> {
    let mut seen = HashSet::new();
    let mut objects = Vec::new();
    expand(source, catalog, options, &mut seen, &mut objects)?;
    debug!(objects = objects.len(), units = seen.len() + 1, "parsed unit");
    let root = CodeRoot { objects };
    Ok(compile_root(&root, catalog, options.entry_point_required)?)
}

/// Decompiles NCS bytes to source.
pub fn decompile(bytes: &[u8], catalog: &Catalog, options: &DecompileOptions) -> Result<String, Error> {
    let unit = decompile::decompile_bytes(bytes, catalog)?;
    let text = unit.render();
    if options.embed_bytecode {
        Ok(embed::append(&text, bytes))
    } else {
        Ok(text)
    }
}

/// Parses `source` and appends its top-level objects to `out`, each include's
/// objects ahead of the includer's. A unit is included once however often it
/// is named.
fn expand(
    source: &str,
    catalog: &Catalog,
    options: &CompileOptions,
    seen: &mut HashSet<String>,
    out: &mut Vec<TopLevel>,
) -> Result<(), Error> {
    let tokens = Lexer::new(source).tokenize()?;
    trace!(tokens = tokens.len(), "lexed unit");
    let root = Parser::new(tokens, catalog).parse()?;

    let mut own = Vec::with_capacity(root.objects.len());
    for object in root.objects {
        match object {
            TopLevel::Include(name) => {
                let name = name.strip_suffix(".nss").unwrap_or(&name).to_string();
                if seen.insert(name.clone()) {
                    let text = read_include(&name, options)?;
                    expand(&text, catalog, options, seen, out)?;
                }
            }
            other => own.push(other),
        }
    }
    out.extend(own);
    Ok(())
}

fn read_include(name: &str, options: &CompileOptions) -> Result<String, Error> {
    for dir in &options.include_paths {
        let path = dir.join(format!("{}.nss", name));
        if path.is_file() {
            trace!(include = name, path = %path.display(), "resolved include");
            return Ok(fs::read_to_string(&path)?);
        }
    }
    if let Some(text) = options.library.get(name) {
        trace!(include = name, "resolved include from library");
        return Ok(text.clone());
    }
    Err(CompileError::MissingInclude {
        name: name.to_string(),
        searched: options.include_paths.clone(),
    }
    .into())
}
