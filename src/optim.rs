//! Optimizer(s)

use crate::values::Value;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
}

fn zero_grads(params: &mut [Value]) {
    for param in params.iter_mut() {
        param.zero_grad();
    }
}

/// SGD with momentum
pub struct SGD {
    params: Vec<Value>,
    lr: f32,
    momentum: f32,
    // velocity per parameter
    velocity: Vec<f32>,
}

impl SGD {
    pub fn new(params: Vec<Value>, lr: f32, momentum: f32) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f32] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (param, velocity) in self.params.iter_mut().zip(self.velocity.iter_mut()) {
            *velocity = self.momentum * *velocity - self.lr * param.grad();
            let updated = param.data() + *velocity;
            param.set_data(updated);
        }
    }

    fn zero_grad(&mut self) {
        zero_grads(&mut self.params);
    }
}

/// Adam with bias-corrected moment estimates
/// <https://arxiv.org/abs/1412.6980>
pub struct Adam {
    params: Vec<Value>,
    lr: f32,
    beta_1: f32,
    beta_2: f32,
    epsilon: f32,
    // number of steps taken, used for bias correction
    time: i32,
    moment_1: Vec<f32>,
    moment_2: Vec<f32>,
}

impl Adam {
    /// Adam with the usual defaults: `beta_1 = 0.9`, `beta_2 = 0.999`, `epsilon = 1e-8`
    pub fn new(params: Vec<Value>, lr: f32) -> Self {
        Self::with_betas(params, lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(params: Vec<Value>, lr: f32, beta_1: f32, beta_2: f32, epsilon: f32) -> Self {
        let n = params.len();
        Self {
            params,
            lr,
            beta_1,
            beta_2,
            epsilon,
            time: 0,
            moment_1: vec![0.0; n],
            moment_2: vec![0.0; n],
        }
    }
}

impl Optim for Adam {
    fn step(&mut self) {
        self.time += 1;
        let correction_1 = 1.0 - self.beta_1.powi(self.time);
        let correction_2 = 1.0 - self.beta_2.powi(self.time);

        for ((param, m), v) in self
            .params
            .iter_mut()
            .zip(self.moment_1.iter_mut())
            .zip(self.moment_2.iter_mut())
        {
            let grad = param.grad();
            *m = self.beta_1 * *m + (1.0 - self.beta_1) * grad;
            *v = self.beta_2 * *v + (1.0 - self.beta_2) * grad * grad;
            let m_hat = *m / correction_1;
            let v_hat = *v / correction_2;
            let updated = param.data() - self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
            param.set_data(updated);
        }
    }

    fn zero_grad(&mut self) {
        zero_grads(&mut self.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_sgd_no_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a * &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone()], 0.1, 0.0);
        optim.step();
        // dc/da = 2, dc/db = 1
        assert_eq_float!(a.data(), 0.8);
        assert_eq_float!(b.data(), 1.9);

        optim.zero_grad();
        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 0.0);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone()], 0.1, 0.9);
        optim.step();
        assert_eq_float!(a.data(), 0.9);
        assert_eq_float!(b.data(), 1.9);
        assert_eq!(optim.velocities(), &[-0.1, -0.1]);
        optim.step();
        assert_eq_float!(a.data(), 0.71);
        assert_eq_float!(b.data(), 1.71);
        assert_eq_float!(optim.velocities()[0], -0.19);
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        // after bias correction the first step is lr * g / |g|
        let a = Value::new(1.0);
        let b = Value::new(-1.0);
        let c = &(&a * &Value::new(4.0)) - &b;
        c.backward();

        let mut optim = Adam::new(vec![a.clone(), b.clone()], 0.01);
        optim.step();
        assert_eq_float!(a.data(), 0.99);
        assert_eq_float!(b.data(), -0.99);
    }

    #[test]
    fn test_adam_minimises_quadratic() {
        let mut x = Value::new(3.0);
        let mut optim = Adam::new(vec![x.clone()], 0.1);
        for _ in 0..500 {
            optim.zero_grad();
            let loss = &x * &x;
            loss.backward();
            optim.step();
        }
        assert!(x.data().abs() < 0.1, "x = {}", x.data());
        x.zero_grad();
        assert_eq!(x.grad(), 0.0);
    }
}
