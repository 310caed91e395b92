//! Text similarity for insight deduplication.
//!
//! A longest-common-subsequence ratio over lowercased, trimmed text. The
//! exact formula matters less than using the same one everywhere, so the
//! 0.75 duplicate threshold stays meaningful.

/// Similarity ratio in [0, 1]: `2 * lcs(a, b) / (|a| + |b|)`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let lcs = lcs_length(&a, &b);
    (2.0 * lcs as f64) / (a.len() + b.len()) as f64
}

/// Longest common subsequence length, rolling single-row DP.
fn lcs_length(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts() {
        assert_eq!(ratio("Review the budget", "Review the budget"), 1.0);
        // Case and surrounding whitespace are normalized away.
        assert_eq!(ratio("  Review The Budget ", "review the budget"), 1.0);
    }

    #[test]
    fn test_disjoint_texts() {
        assert_eq!(ratio("aaaa", "bbbb"), 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("something", ""), 0.0);
    }

    #[test]
    fn test_near_duplicate_crosses_threshold() {
        let a = "Schedule a follow-up meeting with the design team";
        let b = "Schedule a followup meeting with the design team.";
        assert!(ratio(a, b) >= 0.75);
    }

    #[test]
    fn test_different_insights_stay_below_threshold() {
        let a = "Review the Q3 budget numbers";
        let b = "Ship the onboarding flow by Friday";
        assert!(ratio(a, b) < 0.75);
    }

    #[test]
    fn test_symmetry() {
        let a = "finalize the contract terms";
        let b = "finalize contract terms soon";
        assert!((ratio(a, b) - ratio(b, a)).abs() < f64::EPSILON);
    }
}
