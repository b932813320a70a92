//! # NWScript language model
//!
//! Types, the syntax tree, operator resolution and the host routine catalog.
//! Everything here is plain data shared by the compiler and the decompiler.
//!
//! ## Conventions
//!
//! - Sizes are in bytes; one stack word is [`types::WORD`] bytes.
//! - Struct types are referred to by name and resolved through a
//!   [`types::StructMap`].

pub mod ast;
pub mod catalog;
pub mod operators;
pub mod types;
