//! The Weka compiler middle end.
//!
//! The external frontend (lexer, parser, renamer, kind inferencer)
//! delivers a [`weka_ast::Program`]; this crate type-checks it, resolves
//! overloads into dictionary-passing code, lowers to core IR, and emits
//! the labeled bytecode block list the external driver serializes.

mod compiler;

pub use compiler::{compile, compile_with_config};
pub use weka_codegen::{disassemble, Block, CodegenConfig, Instr};
pub use weka_diag::{Category, Diagnostic, DiagnosticError};
