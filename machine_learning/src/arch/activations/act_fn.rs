/// The element-wise nonlinearities a layer can apply.
#[derive(Debug, Clone)]
pub enum ActFn {
    Relu(super::Relu),
    Sigmoid(super::Sigmoid),
    Exp(super::Exp),
}

impl ActFn {
    pub fn relu() -> Self {
        Self::Relu(super::Relu)
    }

    pub fn sigmoid(amp: f32) -> Self {
        Self::Sigmoid(super::Sigmoid::new(amp))
    }

    /// The exponential keeps the output strictly positive.
    pub fn exp() -> Self {
        Self::Exp(super::Exp)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            Self::Relu(a) => a.f(x),
            Self::Sigmoid(a) => a.f(x),
            Self::Exp(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Self::Relu(a) => a.df(x),
            Self::Sigmoid(a) => a.df(x),
            Self::Exp(a) => a.df(x),
        }
    }
}
