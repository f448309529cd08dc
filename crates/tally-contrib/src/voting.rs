//! Ballot assignment for auto-contribute settlement.
//!
//! Two strategies, matching the two shapes of allocation weight:
//!
//! - fixed percents summing to 100 get a deterministic assignment,
//!   rounded per publisher and shaved back down when rounding
//!   over-allocates;
//! - attention scores get statistical voting, where each ballot draws a
//!   uniform value and walks the cumulative-weight distribution. Payout
//!   is proportional on expectation with O(recipients) cost per ballot.

use rand::Rng;

/// Deterministic ballot assignment from percent weights.
///
/// Each publisher gets `round(percent * ballots / 100)` votes; if
/// rounding over-allocates, votes are shaved off the current largest
/// winner until the total matches the ballot count.
pub fn assign_votes(percents: &[f64], ballots: u32) -> Vec<u32> {
    let mut votes: Vec<u32> = percents
        .iter()
        .map(|p| ((p * f64::from(ballots)) / 100.0).round() as u32)
        .collect();

    let mut total: u32 = votes.iter().sum();
    while total > ballots {
        if let Some(largest) = (0..votes.len()).max_by_key(|&i| votes[i]) {
            if votes[largest] == 0 {
                break;
            }
            votes[largest] -= 1;
            total -= 1;
        } else {
            break;
        }
    }
    votes
}

/// Statistical ballot assignment from arbitrary positive weights.
///
/// Returns the number of ballots won per publisher. Zero-weight entries
/// never win. An empty or all-zero weight set wins nothing.
pub fn sample_votes(weights: &[f64], ballots: u32, rng: &mut impl Rng) -> Vec<u32> {
    let mut votes = vec![0u32; weights.len()];
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return votes;
    }

    for _ in 0..ballots {
        let draw = rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        for (i, weight) in weights.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            cumulative += weight;
            if draw < cumulative {
                votes[i] += 1;
                break;
            }
        }
    }
    votes
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_exact_percents() {
        assert_eq!(assign_votes(&[60.0, 40.0], 10), vec![6, 4]);
        assert_eq!(assign_votes(&[100.0], 7), vec![7]);
    }

    #[test]
    fn test_rounding_over_allocation_shaved() {
        // Each rounds up; the shave comes off the largest winner
        let votes = assign_votes(&[33.4, 33.3, 33.3], 10);
        assert_eq!(votes.iter().sum::<u32>(), 10);
        assert!(votes.iter().all(|&v| v >= 3));
    }

    #[test]
    fn test_under_allocation_left_alone() {
        // 1 ballot at 33/33/34 rounds everything to zero; no vote is
        // invented to fill the gap
        let votes = assign_votes(&[33.0, 33.0, 34.0], 1);
        assert!(votes.iter().sum::<u32>() <= 1);
    }

    #[test]
    fn test_statistical_convergence() {
        let weights = [60.0, 30.0, 10.0];
        let ballots = 100_000;
        let mut rng = StdRng::seed_from_u64(42);

        let votes = sample_votes(&weights, ballots, &mut rng);
        assert_eq!(votes.iter().sum::<u32>(), ballots);

        for (i, weight) in weights.iter().enumerate() {
            let share = f64::from(votes[i]) / f64::from(ballots) * 100.0;
            assert!(
                (share - weight).abs() < 1.0,
                "publisher {i}: {share:.2}% vs expected {weight}%"
            );
        }
    }

    #[test]
    fn test_zero_weight_never_wins() {
        let mut rng = StdRng::seed_from_u64(1);
        let votes = sample_votes(&[5.0, 0.0, 5.0], 1_000, &mut rng);
        assert_eq!(votes[1], 0);
        assert_eq!(votes.iter().sum::<u32>(), 1_000);
    }

    #[test]
    fn test_all_zero_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_votes(&[0.0, 0.0], 100, &mut rng), vec![0, 0]);
        assert_eq!(sample_votes(&[], 100, &mut rng), Vec::<u32>::new());
    }
}
