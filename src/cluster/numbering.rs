//! Server number assignment
//!
//! Pure decision logic for the settling loop: which number to claim, whether
//! a claim survived verification, and how long to back off after losing one.

use std::collections::HashSet;
use std::time::Duration;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::types::ServerEntry;

/// Outcome of verifying a claimed number against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimVerdict {
    /// No other server holds the number
    Unique,
    /// Others hold it, but all of them claimed later
    WonTieBreak,
    /// An earlier claim holds it; pick again
    Lost,
}

/// Lowest number not held by any server other than `own_id`
pub fn lowest_free_number<'a, I>(own_id: &str, entries: I) -> u32
where
    I: IntoIterator<Item = &'a ServerEntry>,
{
    let used: HashSet<u32> = entries
        .into_iter()
        .filter(|entry| entry.server_id != own_id)
        .map(|entry| entry.server_number)
        .collect();

    (0..).find(|n| !used.contains(n)).unwrap_or(u32::MAX)
}

/// Decide whether `claim` stands against the other entries holding its number.
///
/// Claims are ranked by registration time, then by server id: the earliest
/// claim keeps the number and every other holder moves on. The ranking is a
/// total order both sides compute alike, so two racing servers never both
/// retreat, and an established server is not displaced by a newcomer that
/// missed its entry under replication lag.
pub fn collision_verdict<'a, I>(claim: &ServerEntry, entries: I) -> ClaimVerdict
where
    I: IntoIterator<Item = &'a ServerEntry>,
{
    let mut holders = entries
        .into_iter()
        .filter(|entry| entry.server_number == claim.server_number && entry.server_id != claim.server_id)
        .peekable();

    if holders.peek().is_none() {
        return ClaimVerdict::Unique;
    }
    if holders.all(|entry| claim_rank(entry) > claim_rank(claim)) {
        ClaimVerdict::WonTieBreak
    } else {
        ClaimVerdict::Lost
    }
}

fn claim_rank(entry: &ServerEntry) -> (DateTime<Utc>, &str) {
    (entry.registered_at, entry.server_id.as_str())
}

/// Delay before retrying after the `attempt`th lost claim (1-based).
///
/// Exponential in the attempt, capped at `max`, plus up to `base` of jitter.
pub fn backoff_delay<R: Rng>(attempt: u32, base: Duration, max: Duration, rng: &mut R) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let step = base.saturating_mul(1u32 << exponent).min(max);
    let jitter_millis = base.as_millis() as u64;
    let jitter = if jitter_millis == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rng.gen_range(0..=jitter_millis))
    };
    step + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn entries(claims: &[(&str, u32)]) -> Vec<ServerEntry> {
        claims
            .iter()
            .map(|(id, n)| ServerEntry::new(*id, *n, Utc::now()))
            .collect()
    }

    #[test]
    fn test_fills_lowest_gap() {
        let live = entries(&[("a", 0), ("b", 1), ("c", 3)]);
        assert_eq!(lowest_free_number("new", &live), 2);
    }

    #[test]
    fn test_dense_numbers_extend() {
        let live = entries(&[("a", 0), ("b", 1), ("c", 2)]);
        assert_eq!(lowest_free_number("new", &live), 3);
        assert_eq!(lowest_free_number("new", &Vec::new()), 0);
    }

    #[test]
    fn test_own_entry_ignored() {
        let live = entries(&[("self", 0), ("b", 1)]);
        assert_eq!(lowest_free_number("self", &live), 0);
    }

    #[test]
    fn test_verdicts_on_simultaneous_claims() {
        let at = Utc::now();
        let live: Vec<ServerEntry> = [("m", 4), ("z", 4), ("b", 1)]
            .iter()
            .map(|(id, n)| ServerEntry::new(*id, *n, at))
            .collect();

        assert_eq!(collision_verdict(&ServerEntry::new("m", 1, at), &live), ClaimVerdict::Lost);
        assert_eq!(collision_verdict(&ServerEntry::new("m", 4, at), &live), ClaimVerdict::WonTieBreak);
        assert_eq!(collision_verdict(&ServerEntry::new("z", 4, at), &live), ClaimVerdict::Lost);
        assert_eq!(collision_verdict(&ServerEntry::new("m", 7, at), &live), ClaimVerdict::Unique);
    }

    #[test]
    fn test_established_claim_outranks_smaller_id() {
        let now = Utc::now();
        let incumbent = ServerEntry::new("z", 0, now - chrono::Duration::minutes(10));
        let newcomer = ServerEntry::new("a", 0, now);
        let live = vec![incumbent.clone(), newcomer.clone()];

        assert_eq!(collision_verdict(&newcomer, &live), ClaimVerdict::Lost);
        assert_eq!(collision_verdict(&incumbent, &live), ClaimVerdict::WonTieBreak);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut rng = rand::thread_rng();
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);

        let first = backoff_delay(1, base, max, &mut rng);
        assert!(first >= base && first <= base * 2);

        let late = backoff_delay(30, base, max, &mut rng);
        assert!(late >= max && late <= max + base);
    }

    proptest! {
        #[test]
        fn prop_lowest_free_number_is_minimal(numbers in proptest::collection::vec(0u32..32, 0..24)) {
            let live: Vec<ServerEntry> = numbers
                .iter()
                .enumerate()
                .map(|(i, n)| ServerEntry::new(format!("server-{}", i), *n, Utc::now()))
                .collect();

            let chosen = lowest_free_number("candidate", &live);
            prop_assert!(!numbers.contains(&chosen));
            prop_assert!((0..chosen).all(|n| numbers.contains(&n)));
            prop_assert!(chosen as usize <= numbers.len());
        }
    }
}
