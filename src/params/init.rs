use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::Result;

/// Describes how the initial values of a parameter are generated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Const(f32),
    Uniform { low: f32, high: f32 },
    /// `U(-1/√fan_in, 1/√fan_in)`, the default of linear and convolution layers.
    FanIn { fan_in: usize },
}

impl Init {
    /// Samples `n` values.
    ///
    /// # Arguments
    /// * `n` - The amount of values to generate.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// An error if the distribution parameters are invalid, e.g. a zero `fan_in`.
    pub fn sample<R: Rng + ?Sized>(self, n: usize, rng: &mut R) -> Result<Vec<f32>> {
        let values = match self {
            Init::Const(value) => vec![value; n],
            Init::Uniform { low, high } => sample_from(Uniform::new(low, high)?, n, rng),
            Init::FanIn { fan_in } => {
                let bound = 1. / (fan_in as f32).sqrt();
                Init::Uniform {
                    low: -bound,
                    high: bound,
                }
                .sample(n, rng)?
            }
        };

        Ok(values)
    }
}

fn sample_from<D, R>(distribution: D, n: usize, rng: &mut R) -> Vec<f32>
where
    D: Distribution<f32>,
    R: Rng + ?Sized,
{
    (0..n).map(|_| distribution.sample(rng)).collect()
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn empty() {
        let mut rng = StdRng::seed_from_u64(42);
        let sample = Init::FanIn { fan_in: 3 }.sample(0, &mut rng).unwrap();

        assert!(sample.is_empty());
    }

    #[test]
    fn fan_in_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let sample = Init::FanIn { fan_in: 16 }.sample(1000, &mut rng).unwrap();

        assert_eq!(sample.len(), 1000);
        assert!(sample.iter().all(|v| v.abs() <= 0.25));
    }

    #[test]
    fn zero_fan_in_fails() {
        let mut rng = StdRng::seed_from_u64(42);
        assert!(Init::FanIn { fan_in: 0 }.sample(3, &mut rng).is_err());
    }

    #[test]
    fn same_seed_same_values() {
        let init = Init::FanIn { fan_in: 8 };

        let a = init.sample(32, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = init.sample(32, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_range_fails() {
        let mut rng = StdRng::seed_from_u64(42);
        let init = Init::Uniform { low: 1., high: -1. };
        assert!(init.sample(3, &mut rng).is_err());
    }
}
