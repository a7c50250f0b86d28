//! Syntax tree for Jacscript programs.
//!
//! Nodes are allocated in a [`bumpalo::Bump`] arena and borrow from it, so a
//! whole program is freed at once when the arena is dropped. Each node
//! category (expression, statement) is a closed enum; the compiler lowers a
//! program with exhaustive matches over them.
//!
//! Hosts that do not ship a parser build trees directly with
//! [`AstBuilder`].
//!
//! ## Modules
//!
//! - [`expr`] - expression nodes
//! - [`stmt`] - statement and declaration nodes
//! - [`ops`] - unary and binary operators
//! - [`builder`] - arena-backed construction helpers
//!
//! ## Example
//!
//! ```
//! use bumpalo::Bump;
//! use jacscript_ast::AstBuilder;
//!
//! let arena = Bump::new();
//! let b = AstBuilder::new(&arena);
//! let btn = b.ident("btn");
//! let script = b.script(&[
//!     b.var("btn", Some(b.call(b.member(b.ident("roles"), "button"), &[]))),
//!     b.expr_stmt(b.method(b.member(btn, "down"), "wait", &[])),
//! ]);
//! assert_eq!(script.body.len(), 2);
//! ```

pub mod builder;
pub mod expr;
pub mod ops;
pub mod stmt;

pub use builder::AstBuilder;
pub use expr::*;
pub use ops::*;
pub use stmt::*;
