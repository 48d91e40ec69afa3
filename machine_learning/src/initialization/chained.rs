use super::ParamGen;

/// A parameter generator that delegates the generation to a chain of parameter generators.
///
/// Each layer of a model knows how it wants to be initialized, chaining their generators in
/// layer order yields the initial flat parameter vector of the whole model.
pub struct ChainedParamGen {
    param_gens: Vec<Box<dyn ParamGen>>,
    curr: usize,
}

impl ChainedParamGen {
    /// Creates a new `ChainedParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `param_gens` - A vec of potentially different parameter generators.
    pub fn new(param_gens: Vec<Box<dyn ParamGen>>) -> Self {
        Self {
            param_gens,
            curr: 0,
        }
    }
}

impl ParamGen for ChainedParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.curr == self.param_gens.len() {
            return None;
        }

        match self.param_gens[self.curr].sample(n) {
            Some(sample) if sample.len() == n => Some(sample),
            Some(mut sample) => {
                self.curr += 1;

                if let Some(next_sample) = self.sample(n - sample.len()) {
                    sample.extend(next_sample);
                }

                Some(sample)
            }
            None => {
                self.curr += 1;
                self.sample(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{super::ConstParamGen, *};

    #[test]
    fn empty() {
        let mut param_gen = ChainedParamGen::new(vec![]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn spans_generators() {
        let param_gens: Vec<Box<dyn ParamGen>> = vec![
            Box::new(ConstParamGen::new([(0., 1)])),
            Box::new(ConstParamGen::new([(1., 3)])),
        ];

        let mut param_gen = ChainedParamGen::new(param_gens);

        let sample = param_gen.sample(2).unwrap();
        assert_eq!(sample, [0., 1.]);

        let sample = param_gen.sample(2).unwrap();
        assert_eq!(sample, [1., 1.]);
        assert!(param_gen.sample(1).is_none());
    }
}
