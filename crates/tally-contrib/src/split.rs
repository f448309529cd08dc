//! Pro-rata division of a funding-source portion across payouts.
//!
//! When settlement draws on two funding sources, each recipient's share
//! is split across the sources in the same proportion as the overall
//! draw, so no single recipient is silently dropped because one source
//! ran out.

/// Divide `portion` across `amounts` proportionally.
///
/// Returns one share per entry summing to exactly `portion` (assuming
/// `portion <= sum(amounts)`); integer rounding remainders land on the
/// last entry with a non-zero amount. An all-zero `amounts` yields all
/// zeros.
pub fn pro_rata(amounts: &[u64], portion: u64) -> Vec<u64> {
    let total: u64 = amounts.iter().sum();
    if total == 0 || portion == 0 {
        return vec![0; amounts.len()];
    }

    let last_nonzero = amounts
        .iter()
        .rposition(|&a| a > 0)
        .unwrap_or(amounts.len() - 1);

    let mut shares = vec![0u64; amounts.len()];
    let mut assigned: u64 = 0;
    for (i, &amount) in amounts.iter().enumerate() {
        if i == last_nonzero {
            continue;
        }
        let share = ((u128::from(amount) * u128::from(portion)) / u128::from(total)) as u64;
        shares[i] = share;
        assigned += share;
    }
    shares[last_nonzero] = portion - assigned;
    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_portion() {
        assert_eq!(pro_rata(&[600, 400], 1_000), vec![600, 400]);
    }

    #[test]
    fn test_partial_portion() {
        assert_eq!(pro_rata(&[600, 400], 500), vec![300, 200]);
    }

    #[test]
    fn test_remainder_lands_on_last() {
        let shares = pro_rata(&[100, 100, 100], 100);
        assert_eq!(shares.iter().sum::<u64>(), 100);
        assert_eq!(shares, vec![33, 33, 34]);
    }

    #[test]
    fn test_zero_portion() {
        assert_eq!(pro_rata(&[600, 400], 0), vec![0, 0]);
    }

    #[test]
    fn test_all_zero_amounts() {
        assert_eq!(pro_rata(&[0, 0], 100), vec![0, 0]);
    }

    #[test]
    fn test_trailing_zero_amount_skipped() {
        let shares = pro_rata(&[500, 500, 0], 100);
        assert_eq!(shares, vec![50, 50, 0]);
    }

    #[test]
    fn test_no_overflow_on_large_values() {
        let big = u64::MAX / 2;
        let shares = pro_rata(&[big, big], big);
        assert_eq!(shares.iter().sum::<u64>(), big);
    }
}
