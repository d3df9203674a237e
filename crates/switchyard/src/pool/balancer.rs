/// Smooth weighted round robin over a fixed set of weights.
///
/// Every pick adds each weight to its running current weight, chooses the
/// highest current weight (the earliest entry wins ties) and subtracts the
/// total weight from the winner. Over one cycle of `total` picks each entry is
/// chosen exactly `weight` times and heavy entries are interleaved rather
/// than bunched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmoothWeighted {
    weights: Vec<i64>,
    current: Vec<i64>,
    total: i64,
}

impl SmoothWeighted {
    /// Builds a balancer over `weights`, indexed in the same order.
    #[must_use]
    pub fn new(weights: &[u32]) -> Self {
        let weights: Vec<i64> = weights.iter().map(|&weight| i64::from(weight)).collect();
        let total = weights.iter().sum();
        Self {
            current: vec![0; weights.len()],
            weights,
            total,
        }
    }

    /// Index of the next entry, or `None` when the total weight is zero.
    pub fn next_index(&mut self) -> Option<usize> {
        if self.total <= 0 {
            return None;
        }
        let mut best: Option<(usize, i64)> = None;
        for (index, (current, weight)) in self.current.iter_mut().zip(&self.weights).enumerate() {
            *current += weight;
            if best.is_none_or(|(_, top)| *current > top) {
                best = Some((index, *current));
            }
        }
        let (winner, _) = best?;
        if let Some(current) = self.current.get_mut(winner) {
            *current -= self.total;
        }
        Some(winner)
    }

    /// Sum of all weights.
    #[must_use]
    pub const fn total_weight(&self) -> i64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn one_to_three_split_is_exact_and_interleaved() {
        let mut balancer = SmoothWeighted::new(&[1, 3]);
        let picks: Vec<usize> = (0..4000)
            .map(|_| balancer.next_index().expect("weighted entry"))
            .collect();

        assert_eq!(picks.iter().filter(|&&pick| pick == 0).count(), 1000);
        assert_eq!(picks.iter().filter(|&&pick| pick == 1).count(), 3000);

        let longest_b_run = picks
            .split(|&pick| pick == 0)
            .map(<[usize]>::len)
            .max()
            .unwrap_or_default();
        assert!(longest_b_run <= 3, "run of {longest_b_run} consecutive B picks");
    }

    #[test]
    fn classic_five_one_one_sequence() {
        let mut balancer = SmoothWeighted::new(&[5, 1, 1]);
        let picks: Vec<usize> = (0..7).filter_map(|_| balancer.next_index()).collect();
        assert_eq!(picks, vec![0, 0, 1, 0, 2, 0, 0]);
    }

    #[test]
    fn ties_go_to_the_first_entry() {
        let mut balancer = SmoothWeighted::new(&[2, 2]);
        assert_eq!(balancer.next_index(), Some(0));
        assert_eq!(balancer.next_index(), Some(1));
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0, 0])]
    fn zero_total_weight_selects_nothing(#[case] weights: &[u32]) {
        let mut balancer = SmoothWeighted::new(weights);
        assert_eq!(balancer.next_index(), None);
    }
}
