//! # Block Compiler
//!
//! Compiles QWeb-style XML templates (`t-if`, `t-foreach`, `t-esc`, `t-call`,
//! `t-set`, `t-on-*`, ...) into render functions producing a tree of blocks.
//!
//! ## Pipeline
//!
//! 1. **Parse**: template text is checked for balanced tags, parsed with
//!    html5ever and turned into a `TemplateNode` tree of directives.
//! 2. **Compile**: the tree is walked once. Runs of static markup become
//!    `StaticFragment`s with numbered data, handler and child slots; dynamic
//!    parts become a plan of ops filling those slots.
//! 3. **Render**: a `RenderFunction` executes the plan against a `Scope` and
//!    yields a `Block` that can be mounted into an rcdom tree.
//! 4. **Patch**: rendering again yields a new block; `Block::patch` moves the
//!    mounted tree to the new state touching only what changed.
//!
//! ## Render Tree Invariants
//!
//! 1. A mounted block owns a contiguous run of sibling nodes.
//! 2. Static content is cloned from its fragment, never rebuilt.
//! 3. Patching a block with one of the same shape never replaces nodes;
//!    shape changes replace the block in place.
//! 4. Loop items are matched by `t-key` when given, by position otherwise.

pub mod block;
mod cache;
pub mod codegen;
mod compiler;
mod config;
mod discovery;
pub mod dom;
mod eval;
mod expression;
mod parse;
pub mod render;
mod scope;
mod template_set;
mod validate;

#[cfg(test)]
mod block_tests;
#[cfg(test)]
mod compiler_tests;
#[cfg(test)]
mod expression_tests;
#[cfg(test)]
mod parse_tests;

pub use block::Block;
pub use cache::CompiledCache;
pub use compiler::{compile, compile_template, compile_with_options, CompilationContext};
pub use config::CompileOptions;
pub use dom::Event;
pub use eval::{evaluate, is_truthy, to_display_string};
pub use expression::{compile_expression, Expr};
pub use parse::parse_template;
pub use render::{RenderError, RenderFunction, TemplateCaller};
pub use scope::{EventOwner, Scope, ZERO};
pub use template_set::TemplateSet;
pub use validate::*;
