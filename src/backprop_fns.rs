//! Local gradient rules applied during the backward pass
//!
//! Each node in the computation graph remembers the operation which produced it.
//! When the backward pass reaches that node, the matching rule below pushes the
//! node's accumulated gradient into its operands.

use crate::values::Value;

/// The operation which produced a derived value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpropFunc {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow,
    ReLU,
    Exp,
    Ln,
}

impl BackpropFunc {
    pub fn n_operands(&self) -> usize {
        match self {
            BackpropFunc::Add
            | BackpropFunc::Sub
            | BackpropFunc::Mul
            | BackpropFunc::Div
            | BackpropFunc::Pow => 2,
            BackpropFunc::Neg | BackpropFunc::ReLU | BackpropFunc::Exp | BackpropFunc::Ln => 1,
        }
    }
}

/// `in1 + in2 = out`
fn add(in1: &Value, in2: &Value, grad: f32) {
    in1.accumulate_grad(grad);
    in2.accumulate_grad(grad);
}

/// `in1 - in2 = out`
fn sub(in1: &Value, in2: &Value, grad: f32) {
    in1.accumulate_grad(grad);
    in2.accumulate_grad(-grad);
}

/// `in1 * in2 = out`
fn mul(in1: &Value, in2: &Value, grad: f32) {
    let (a, b) = (in1.data(), in2.data());
    in1.accumulate_grad(b * grad);
    in2.accumulate_grad(a * grad);
}

/// `in1 / in2 = out`
fn div(in1: &Value, in2: &Value, grad: f32) {
    let (a, b) = (in1.data(), in2.data());
    in1.accumulate_grad(grad / b);
    in2.accumulate_grad(-a * grad / (b * b));
}

/// `in1^in2 = out`
///
/// Only the base receives a gradient. `d a^b / db` is only defined for positive `a`
/// and exponents are treated as constants.
fn pow(in1: &Value, in2: &Value, grad: f32) {
    let (a, b) = (in1.data(), in2.data());
    in1.accumulate_grad(b * a.powf(b - 1.0) * grad);
}

/// `-in = out`
fn neg(in1: &Value, grad: f32) {
    in1.accumulate_grad(-grad);
}

/// `relu(in) = out`
fn relu(in1: &Value, grad: f32) {
    if in1.data() > 0.0 {
        in1.accumulate_grad(grad);
    }
}

/// `exp(in) = out`, reuses the forward result
fn exp(in1: &Value, out: &Value, grad: f32) {
    in1.accumulate_grad(out.data() * grad);
}

/// `ln(in) = out`
fn ln(in1: &Value, grad: f32) {
    in1.accumulate_grad(grad / in1.data());
}

/// Pushes the gradient of `out` into its operands according to the operation which created it.
/// Leaf values have no operation and are left untouched.
pub fn propagate(out: &Value, operands: &[Value]) {
    let Some(func) = out.backprop_fn() else {
        return;
    };
    debug_assert_eq!(func.n_operands(), operands.len());
    let grad = out.grad();
    match (func, operands) {
        (BackpropFunc::Add, [a, b]) => add(a, b, grad),
        (BackpropFunc::Sub, [a, b]) => sub(a, b, grad),
        (BackpropFunc::Mul, [a, b]) => mul(a, b, grad),
        (BackpropFunc::Div, [a, b]) => div(a, b, grad),
        (BackpropFunc::Pow, [a, b]) => pow(a, b, grad),
        (BackpropFunc::Neg, [a]) => neg(a, grad),
        (BackpropFunc::ReLU, [a]) => relu(a, grad),
        (BackpropFunc::Exp, [a]) => exp(a, out, grad),
        (BackpropFunc::Ln, [a]) => ln(a, grad),
        _ => panic!(
            "{:?} expects {} operands, node has {}",
            func,
            func.n_operands(),
            operands.len()
        ),
    }
}
