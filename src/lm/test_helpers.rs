use std::cell::RefCell;

use nalgebra::{DMatrix, DVector};

use crate::{DifferentiableVectorFunction, VectorFunction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Value,
    Jacobian,
}

/// Replays queued model values and Jacobians, repeating the last one.
pub struct MockFunction {
    call_history: RefCell<Vec<MockCall>>,
    values: Vec<DVector<f64>>,
    values_index: RefCell<usize>,
    jacobians: Vec<DMatrix<f64>>,
    jacobians_index: RefCell<usize>,
}

impl MockFunction {
    pub fn new(values: Vec<DVector<f64>>, jacobians: Vec<DMatrix<f64>>) -> Self {
        Self {
            call_history: RefCell::new(vec![]),
            values,
            values_index: RefCell::new(0),
            jacobians,
            jacobians_index: RefCell::new(0),
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.call_history.borrow().clone()
    }
}

fn next<T: Clone>(queue: &[T], index: &RefCell<usize>) -> T {
    let mut index = index.borrow_mut();
    let item = queue[(*index).min(queue.len() - 1)].clone();
    *index += 1;
    item
}

impl VectorFunction<f64> for MockFunction {
    fn value(&self, _x: &DVector<f64>) -> DVector<f64> {
        self.call_history.borrow_mut().push(MockCall::Value);
        next(&self.values, &self.values_index)
    }
}

impl DifferentiableVectorFunction<f64> for MockFunction {
    fn jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        self.call_history.borrow_mut().push(MockCall::Jacobian);
        next(&self.jacobians, &self.jacobians_index)
    }
}
