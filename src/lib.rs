//! A RenderMan-style shading language front-end and grid virtual machine.
//!
//! Source text compiles through a lexer, a recursive-descent parser with
//! scope-managing semantic actions, an annotation pass and a code
//! generator into a [`Shader`]: parameter metadata, a constant pool and an
//! instruction stream. A [`VirtualMachine`](vm::VirtualMachine) executes
//! the shader over a [`Grid`] of surface samples with uniform/varying
//! storage semantics and per-sample execution masks.

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod color;
pub mod context;
pub mod diags;
pub mod error;
pub mod grid;
pub mod instruction;
pub mod kernels;
pub mod lexer;
pub mod parser;
pub mod semantic;
pub mod shader;
pub mod symbol;
pub mod value;
pub mod vm;

#[cfg(test)]
mod codegen_tests;
#[cfg(test)]
mod parser_tests;
#[cfg(test)]
mod semantic_tests;
#[cfg(test)]
mod vm_tests;

pub use context::{Light, LightKind, ShadingContext, TextureSampler};
pub use error::{
    CollectingErrorPolicy, ErrorCode, ErrorPolicy, LogErrorPolicy, RenderError, Result,
};
pub use grid::Grid;
pub use shader::Shader;
pub use symbol::{ShaderKind, SymbolTable};
pub use value::{Value, ValueStorage, ValueType};
