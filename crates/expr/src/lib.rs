//! `photocal-expr` — sandboxed arithmetic expressions.
//!
//! Filter-lookup tables and catalog column mappings carry small formulas such
//! as `(3*B + 5*R)/8` or `RAJ2000/15`. This crate parses them into a tree and
//! evaluates them against a named-variable [`Context`]. Only arithmetic,
//! a fixed set of numeric functions and a few constants are available; there is
//! no way to reach anything outside the context.
//!
//! ```
//! use photocal_expr::{Context, Expr};
//!
//! let expr: Expr = "(3*B + 5*R)/8".parse().unwrap();
//! let ctx = Context::new().with("B", 12.0).with("R", 10.0);
//! assert_eq!(expr.eval(&ctx).unwrap(), 10.75);
//! ```

mod context;
mod error;
mod eval;
mod functions;
mod lexer;
mod parser;

pub use context::Context;
pub use error::{ExprError, ExprResult};
pub use functions::Function;
pub use parser::{BinaryOp, Expr, MAX_DEPTH, MAX_SOURCE_LEN, Node};
