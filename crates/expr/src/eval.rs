use crate::context::Context;
use crate::error::{ExprError, ExprResult};
use crate::functions;
use crate::parser::{BinaryOp, Expr, Node};

impl Expr {
    /// Evaluate against `ctx`.
    ///
    /// Context variables shadow built-in constants. A NaN or infinite result is
    /// an error so callers can treat it like any other failed evaluation.
    pub fn eval(&self, ctx: &Context) -> ExprResult<f64> {
        let value = eval_node(self.root(), ctx)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExprError::NonFinite)
        }
    }
}

fn eval_node(node: &Node, ctx: &Context) -> ExprResult<f64> {
    match node {
        Node::Number(v) => Ok(*v),
        Node::Var(name) => ctx
            .get(name)
            .or_else(|| functions::constant(name))
            .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
        Node::Neg(inner) => Ok(-eval_node(inner, ctx)?),
        Node::Binary { op, lhs, rhs } => {
            let a = eval_node(lhs, ctx)?;
            let b = eval_node(rhs, ctx)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                // Floored modulo, sign follows the divisor.
                BinaryOp::Rem => a - b * (a / b).floor(),
                BinaryOp::Pow => a.powf(b),
            })
        }
        Node::Call { func, args } => {
            let values = args
                .iter()
                .map(|arg| eval_node(arg, ctx))
                .collect::<ExprResult<Vec<f64>>>()?;
            Ok(func.apply(&values))
        }
    }
}
