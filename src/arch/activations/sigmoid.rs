#[derive(Clone, Debug, Default)]
pub struct Sigmoid {
    amp: f32,
}

impl Sigmoid {
    pub fn new(amp: f32) -> Self {
        Self { amp }
    }

    pub fn f(&self, z: f32) -> f32 {
        self.amp / (1. + (-z).exp())
    }

    pub fn df(&self, z: f32) -> f32 {
        let s = 1. / (1. + (-z).exp());
        self.amp * s * (1. - s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_peaks_at_zero() {
        let sigmoid = Sigmoid::new(1.);

        assert_eq!(sigmoid.f(0.), 0.5);
        assert_eq!(sigmoid.df(0.), 0.25);
        assert!(sigmoid.df(4.) < sigmoid.df(0.));
    }

    #[test]
    fn large_inputs_do_not_overflow() {
        let sigmoid = Sigmoid::new(1.);

        assert!(sigmoid.df(-100.).is_finite());
        assert!(sigmoid.df(100.).is_finite());
    }
}
