//! Splitter - Weighted random train/devel/test partitioning
//!
//! Each example first draws train-vs-rest with weight `train_prob`; examples
//! that are not train draw devel-vs-test 50/50. The generator is seeded once
//! and advanced in input order, so a given `(data, seed)` always yields the
//! same partition.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<T> {
    pub train: Vec<T>,
    pub devel: Vec<T>,
    pub test: Vec<T>,
}

impl<T> Split<T> {
    pub fn len(&self) -> usize {
        self.train.len() + self.devel.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn split<T>(data: Vec<T>, train_prob: f64, seed: u64) -> Split<T> {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut train = Vec::new();
    let mut devel = Vec::new();
    let mut test = Vec::new();

    for item in data {
        if rng.gen::<f64>() < train_prob {
            train.push(item);
        } else if rng.gen::<f64>() < 0.5 {
            devel.push(item);
        } else {
            test.push(item);
        }
    }

    info!("num train={}", train.len());
    info!("num devel={}", devel.len());
    info!("num test ={}", test.len());

    Split { train, devel, test }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_partition() {
        let data: Vec<usize> = (0..500).collect();
        let a = split(data.clone(), 0.8, 7);
        let b = split(data, 0.8, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_partition_is_complete_and_ordered() {
        let data: Vec<usize> = (0..1000).collect();
        let parts = split(data, 0.6, 3);
        assert_eq!(parts.len(), 1000);

        for part in [&parts.train, &parts.devel, &parts.test] {
            assert!(part.windows(2).all(|w| w[0] < w[1]));
        }

        let mut all: Vec<usize> = parts
            .train
            .iter()
            .chain(&parts.devel)
            .chain(&parts.test)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
        assert!(!parts.devel.is_empty() && !parts.test.is_empty());
    }

    #[test]
    fn test_full_train_probability() {
        let parts = split(vec!["a", "b", "c"], 1.0, 0);
        assert_eq!(parts.train, vec!["a", "b", "c"]);
        assert!(parts.devel.is_empty() && parts.test.is_empty());
    }

    #[test]
    fn test_empty_dataset() {
        let parts: Split<u8> = split(Vec::new(), 0.8, 1);
        assert!(parts.is_empty());
    }
}
