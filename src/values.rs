//! Scalar values which form a computation graph
use std::{
    cell::RefCell,
    collections::HashSet,
    fmt::{self, Debug, Display},
    iter::Sum,
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::backprop_fns::{self, BackpropFunc};

type SharedValue = Rc<RefCell<InnerValue>>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Newtype representing a shared value in a computation graph
///
/// Cloning a `Value` clones the handle, not the node: both handles observe the
/// same data and gradient.
#[derive(Debug, Clone)]
pub struct Value(pub(crate) SharedValue);

impl Value {
    /// Create a new value, not derived from any other values
    pub fn new(data: f32) -> Self {
        Self(Rc::new(RefCell::new(InnerValue::new(data, None, vec![]))))
    }

    /// Create a value derived from `operands` (i.e. not a leaf node)
    fn derived(data: f32, backprop_fn: BackpropFunc, operands: &[&Value]) -> Self {
        let children = operands.iter().map(|v| v.0.clone()).collect();
        Self(Rc::new(RefCell::new(InnerValue::new(
            data,
            Some(backprop_fn),
            children,
        ))))
    }

    pub fn data(&self) -> f32 {
        self.0.borrow().data
    }

    pub fn grad(&self) -> f32 {
        self.0.borrow().grad
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn is_leaf(&self) -> bool {
        self.0.borrow().backprop_fn.is_none()
    }

    pub(crate) fn backprop_fn(&self) -> Option<BackpropFunc> {
        self.0.borrow().backprop_fn
    }

    pub(crate) fn accumulate_grad(&self, delta: f32) {
        self.0.borrow_mut().grad += delta;
    }

    // The node is reachable through every clone of the handle, &mut only marks
    // that the caller is expected to hold it exclusively
    pub fn set_data(&mut self, data: f32) {
        self.0.borrow_mut().data = data;
    }

    fn operands(&self) -> Vec<Value> {
        self.0
            .borrow()
            .children
            .iter()
            .map(|c| Value(c.clone()))
            .collect()
    }

    /// Zeros the gradient of this value and of every node it was computed from.
    ///
    /// For a leaf (e.g. a network parameter) only its own gradient is reset.
    pub fn zero_grad(&mut self) {
        for value in self.topological_order() {
            value.0.borrow_mut().grad = 0.0;
        }
    }

    /// Backpropagates from this value, accumulating `d self / d node` into every
    /// node of the graph below it
    pub fn backward(&self) {
        self.0.borrow_mut().grad = 1.0;

        // reversed post order visits every node before its operands
        for value in self.topological_order().into_iter().rev() {
            let operands = value.operands();
            backprop_fns::propagate(&value, &operands);
        }
    }

    /// Post order over the graph rooted at this value, operands before results.
    ///
    /// Iterative so that long chains (e.g. the sum over a wide layer) do not
    /// exhaust the stack.
    fn topological_order(&self) -> Vec<Value> {
        let mut order = vec![];
        let mut visited: HashSet<u64> = HashSet::new();
        let mut stack = vec![(self.clone(), false)];

        while let Some((value, expanded)) = stack.pop() {
            if expanded {
                order.push(value);
                continue;
            }
            if !visited.insert(value.id()) {
                continue;
            }
            let operands = value.operands();
            stack.push((value, true));
            for operand in operands {
                if !visited.contains(&operand.id()) {
                    stack.push((operand, false));
                }
            }
        }
        order
    }
}

// Various operations on values
impl Value {
    pub fn pow(&self, other: &Value) -> Value {
        Value::derived(
            self.data().powf(other.data()),
            BackpropFunc::Pow,
            &[self, other],
        )
    }

    pub fn relu(&self) -> Value {
        Value::derived(self.data().max(0.0), BackpropFunc::ReLU, &[self])
    }

    pub fn exp(&self) -> Value {
        Value::derived(self.data().exp(), BackpropFunc::Exp, &[self])
    }

    /// Natural logarithm
    pub fn ln(&self) -> Value {
        Value::derived(self.data().ln(), BackpropFunc::Ln, &[self])
    }
}

// pretty print a value and its operands recursively in a JSON-like format
impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn fmt_value(value: &Value, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let inner = value.0.borrow();
            let indent_str = " ".repeat(indent);
            let indent_inner = " ".repeat(indent + 2);
            writeln!(f, "{}{{", indent_str)?;
            writeln!(f, "{}\"data\": {},", indent_inner, inner.data)?;
            writeln!(f, "{}\"grad\": {},", indent_inner, inner.grad)?;
            writeln!(f, "{}\"backprop_fn\": {:?},", indent_inner, inner.backprop_fn)?;
            writeln!(f, "{}\"children\": [", indent_inner)?;
            for (i, child) in inner.children.iter().enumerate() {
                fmt_value(&Value(child.clone()), indent + 4, f)?;
                if i + 1 < inner.children.len() {
                    writeln!(f, ",")?;
                } else {
                    writeln!(f)?;
                }
            }
            writeln!(f, "{}]", indent_inner)?;
            write!(f, "{}}}", indent_str)
        }
        fmt_value(self, 0, f)
    }
}

impl Add for &Value {
    type Output = Value;

    fn add(self, other: &Value) -> Value {
        Value::derived(self.data() + other.data(), BackpropFunc::Add, &[self, other])
    }
}

impl Sub for &Value {
    type Output = Value;

    fn sub(self, other: &Value) -> Value {
        Value::derived(self.data() - other.data(), BackpropFunc::Sub, &[self, other])
    }
}

impl Mul for &Value {
    type Output = Value;

    fn mul(self, other: &Value) -> Value {
        Value::derived(self.data() * other.data(), BackpropFunc::Mul, &[self, other])
    }
}

impl Div for &Value {
    type Output = Value;

    fn div(self, other: &Value) -> Value {
        Value::derived(self.data() / other.data(), BackpropFunc::Div, &[self, other])
    }
}

impl Neg for &Value {
    type Output = Value;

    fn neg(self) -> Value {
        Value::derived(-self.data(), BackpropFunc::Neg, &[self])
    }
}

impl Sum for Value {
    fn sum<I: Iterator<Item = Self>>(mut iter: I) -> Self {
        // seed with the first term so a sum does not carry a dangling zero leaf
        match iter.next() {
            Some(first) => iter.fold(first, |acc, v| acc + v),
            None => Value::new(0.0),
        }
    }
}

/// Convenience macro to implement operations on `[Value]` when ownership can be transferred
macro_rules! impl_arithmetic(
    ($trait:ident, $trait_method:ident, $operator:tt, $struct:ident) => {
        impl $trait for $struct {
            type Output = Self;

            fn $trait_method(self, other: Self) -> Self {
                &self $operator &other
            }
        }
    }
);
impl_arithmetic!(Add, add, +, Value);
impl_arithmetic!(Sub, sub, -, Value);
impl_arithmetic!(Mul, mul, *, Value);
impl_arithmetic!(Div, div, /, Value);

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.data() == other.data()
    }
}

impl AsRef<Value> for Value {
    fn as_ref(&self) -> &Value {
        self
    }
}

#[derive(Debug)]
pub(crate) struct InnerValue {
    pub(crate) data: f32,
    /// gradient of the value with respect to the output of the backward pass
    pub(crate) grad: f32,
    /// Inputs of the forward operation, visited as "children" in the backward pass
    children: Vec<SharedValue>,
    id: u64,
    /// `None` when the value is a leaf node
    pub(crate) backprop_fn: Option<BackpropFunc>,
}

impl InnerValue {
    fn new(data: f32, backprop_fn: Option<BackpropFunc>, children: Vec<SharedValue>) -> Self {
        Self {
            data,
            grad: 0.0,
            children,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            backprop_fn,
        }
    }
}

// Graphs built from wide layers are deep chains of additions; unlink them
// iteratively instead of letting the default drop recurse once per node.
impl Drop for InnerValue {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(child) = pending.pop() {
            if let Ok(cell) = Rc::try_unwrap(child) {
                let mut inner = cell.into_inner();
                pending.append(&mut inner.children);
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[macro_export]
    macro_rules! assert_eq_float {
        ($a:expr, $b:expr) => {
            assert!(
                (($a) - ($b)).abs() < 1e-6,
                "{} is not within 1e-6 of {}",
                $a,
                $b
            );
        };
    }

    #[test]
    fn test_add() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a + &b;
        assert_eq!(c.data(), 5.0);
        c.backward();

        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), 1.0);
    }

    #[test]
    fn test_mul() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a * &b;
        assert_eq!(c.data(), 6.0);

        c.backward();

        // dc/da = b, dc/db = a
        assert_eq!(a.grad(), 3.0);
        assert_eq!(b.grad(), 2.0);
    }

    #[test]
    fn test_mul_same_operand() {
        let a = Value::new(3.0);
        let c = &a * &a;
        c.backward();
        // d a^2 / da = 2a
        assert_eq!(a.grad(), 6.0);
    }

    #[test]
    fn test_neg_sub() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = -&(&a - &b);
        assert_eq!(c.data(), 1.0);

        c.backward();

        assert_eq!(a.grad(), -1.0);
        assert_eq!(b.grad(), 1.0);
    }

    #[test]
    fn test_div() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);

        let c = &a / &b;
        assert_eq_float!(c.data(), 2.0 / 3.0);

        c.backward();

        // dc/da = 1/b, dc/db = -a/b^2
        assert_eq_float!(a.grad(), 1.0 / 3.0);
        assert_eq_float!(b.grad(), -2.0 / 9.0);
    }

    #[test]
    fn test_pow() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);
        let c = a.pow(&b);
        assert_eq_float!(c.data(), 8.0);

        c.backward();

        // exponent is a constant
        assert_eq_float!(a.grad(), 12.0);
        assert_eq!(b.grad(), 0.0);
    }

    #[test]
    fn test_exp_ln() {
        let a = Value::new(1.5);
        let e = a.exp();
        assert_eq_float!(e.data(), 1.5f32.exp());
        e.backward();
        assert_eq_float!(a.grad(), 1.5f32.exp());

        let b = Value::new(4.0);
        let l = b.ln();
        assert_eq_float!(l.data(), 4.0f32.ln());
        l.backward();
        assert_eq_float!(b.grad(), 0.25);
    }

    #[test]
    fn test_relu() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a * &b;
        let z = c.relu();
        assert_eq_float!(z.data(), 2.0);

        z.backward();

        assert_eq_float!(a.grad(), 2.0);
        assert_eq_float!(b.grad(), 1.0);
        assert_eq_float!(c.grad(), 1.0);

        let d = Value::new(-1.0);
        let r = d.relu();
        r.backward();
        assert_eq!(r.data(), 0.0);
        assert_eq!(d.grad(), 0.0);
    }

    #[test]
    fn test_shared_subexpression_accumulates() {
        // y = (a * b) + (a * b) reuses one node twice
        let a = Value::new(2.0);
        let b = Value::new(5.0);
        let ab = &a * &b;
        let y = &ab + &ab;
        y.backward();
        assert_eq!(a.grad(), 10.0);
        assert_eq!(b.grad(), 4.0);
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let x = Value::new(1.0);
        let total = (0..200_000).map(|_| &x * &Value::new(1.0)).sum::<Value>();
        assert_eq!(total.data(), 200_000.0);
        total.backward();
        assert_eq!(x.grad(), 200_000.0);
    }

    #[test]
    fn test_zero_grad() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);
        let mut c = &a * &b;
        c.backward();
        assert_eq!(a.grad(), 3.0);

        c.zero_grad();
        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 0.0);
        assert_eq!(c.grad(), 0.0);
    }

    #[test]
    fn test_empty_sum_is_zero() {
        let total = Vec::<Value>::new().into_iter().sum::<Value>();
        assert_eq!(total.data(), 0.0);
        assert!(total.is_leaf());
    }
}
