use super::{Relu, Sigmoid};

#[derive(Debug, Clone)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Relu(Relu),
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        ActFn::Sigmoid(Sigmoid::new(amp))
    }

    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.f(x),
            ActFn::Relu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.df(x),
            ActFn::Relu(a) => a.df(x),
        }
    }
}
