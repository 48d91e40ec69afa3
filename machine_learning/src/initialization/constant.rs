use std::collections::VecDeque;

use super::ParamGen;

/// A parameter generator of piecewise constant values: `count` times `value`, then the next
/// run, and so on.
pub struct ConstParamGen {
    runs: VecDeque<(f32, usize)>,
}

impl ConstParamGen {
    /// Creates a new `ConstParamGen`.
    ///
    /// # Arguments
    /// * `runs` - Pairs of a value and how many times to repeat it, in order.
    pub fn new<I>(runs: I) -> Self
    where
        I: IntoIterator<Item = (f32, usize)>,
    {
        Self {
            runs: runs.into_iter().filter(|&(_, count)| count > 0).collect(),
        }
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.runs.is_empty() {
            return None;
        }

        let mut out = Vec::with_capacity(n);

        while out.len() < n {
            let Some((value, count)) = self.runs.front_mut() else {
                break;
            };

            let take = (*count).min(n - out.len());
            out.extend(std::iter::repeat_n(*value, take));
            *count -= take;

            if *count == 0 {
                self.runs.pop_front();
            }
        }

        Some(out)
    }
}
