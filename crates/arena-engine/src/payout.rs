//! Pro-rata payout distribution.
//!
//! The whole pool (both sides) minus the platform fee is split across the
//! winning wagers in proportion to stake. Shares are truncated to cents and
//! the truncation residual goes to the largest winning stake, so the sum of
//! payouts always equals the distributable amount exactly.
//!
//! When nobody wagered on the winning side, every wager is refunded in full
//! and no fee is taken.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use arena_common::{TokenAddress, Wager, WagerId};

/// Computes per-wager payout amounts for a resolved competition.
#[derive(Debug, Clone)]
pub struct PayoutCalculator {
    /// Platform fee as a ratio (0.15 = 15%).
    fee_rate: Decimal,
}

impl PayoutCalculator {
    pub fn new(fee_rate: Decimal) -> Self {
        Self { fee_rate }
    }

    /// Payout for every wager on the competition, winning or losing.
    ///
    /// The returned map has exactly one entry per input wager: winning wagers
    /// carry their share, losing wagers carry zero. In the no-winning-wagers
    /// case every wager maps to its own stake (a full refund).
    pub fn compute(&self, wagers: &[Wager], winner: &TokenAddress) -> BTreeMap<WagerId, Decimal> {
        let total_pool: Decimal = wagers.iter().map(|w| w.amount).sum();
        let winner_pool: Decimal = wagers
            .iter()
            .filter(|w| &w.chosen_token == winner)
            .map(|w| w.amount)
            .sum();

        if winner_pool.is_zero() {
            // One-sided market: refund everyone, fee waived.
            return wagers.iter().map(|w| (w.id, w.amount)).collect();
        }

        let distributable = (total_pool * (Decimal::ONE - self.fee_rate))
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);

        let mut payouts: BTreeMap<WagerId, Decimal> = BTreeMap::new();
        let mut paid = Decimal::ZERO;
        for wager in wagers {
            let share = if &wager.chosen_token == winner {
                (distributable * wager.amount / winner_pool)
                    .round_dp_with_strategy(2, RoundingStrategy::ToZero)
            } else {
                Decimal::ZERO
            };
            paid += share;
            payouts.insert(wager.id, share);
        }

        // Hand the cent-truncation residual to the largest winning stake;
        // ties break on the lowest wager id.
        let residual = distributable - paid;
        if residual > Decimal::ZERO {
            let recipient = wagers
                .iter()
                .filter(|w| &w.chosen_token == winner)
                .max_by(|a, b| a.amount.cmp(&b.amount).then(b.id.cmp(&a.id)))
                .map(|w| w.id);
            if let Some(id) = recipient {
                if let Some(amount) = payouts.get_mut(&id) {
                    *amount += residual;
                }
            }
        }

        debug!(
            %total_pool,
            %winner_pool,
            %distributable,
            "Computed payout distribution"
        );
        payouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    use arena_common::{BettorId, Competition};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn competition() -> Competition {
        Competition::new(
            TokenAddress::from("tokA"),
            TokenAddress::from("tokB"),
            ts(100),
            ts(200),
            ts(300),
            ts(0),
        )
        .unwrap()
    }

    fn wager(comp: &Competition, bettor: &str, token: &str, amount: Decimal) -> Wager {
        Wager::new(
            comp,
            BettorId::new(bettor),
            TokenAddress::from(token),
            amount,
            ts(150),
        )
        .unwrap()
    }

    #[test]
    fn test_pool_split_with_residual_to_largest_stake() {
        let comp = competition();
        let wagers = vec![
            wager(&comp, "alice", "tokA", dec!(10)),
            wager(&comp, "bob", "tokA", dec!(20)),
            wager(&comp, "carol", "tokA", dec!(30)),
            wager(&comp, "dave", "tokB", dec!(40)),
        ];

        let calc = PayoutCalculator::new(dec!(0.15));
        let payouts = calc.compute(&wagers, &TokenAddress::from("tokA"));

        // Pool 100, fee 15%, distributable 85.00 split over 60 staked:
        // truncated shares 14.16 / 28.33 / 42.50 leave 0.01 for the
        // largest stake.
        assert_eq!(payouts[&wagers[0].id], dec!(14.16));
        assert_eq!(payouts[&wagers[1].id], dec!(28.33));
        assert_eq!(payouts[&wagers[2].id], dec!(42.51));
        assert_eq!(payouts[&wagers[3].id], dec!(0));

        let total: Decimal = payouts.values().copied().sum();
        assert_eq!(total, dec!(85.00));
    }

    #[test]
    fn test_payout_sum_equals_distributable() {
        let comp = competition();
        let wagers = vec![
            wager(&comp, "a", "tokA", dec!(0.33)),
            wager(&comp, "b", "tokA", dec!(0.77)),
            wager(&comp, "c", "tokA", dec!(1.13)),
            wager(&comp, "d", "tokB", dec!(5.55)),
        ];

        let calc = PayoutCalculator::new(dec!(0.15));
        let payouts = calc.compute(&wagers, &TokenAddress::from("tokA"));

        let distributable =
            (dec!(7.78) * dec!(0.85)).round_dp_with_strategy(2, RoundingStrategy::ToZero);
        let total: Decimal = payouts.values().copied().sum();
        assert_eq!(total, distributable);
    }

    #[test]
    fn test_no_winning_wagers_refunds_everyone() {
        let comp = competition();
        let wagers = vec![
            wager(&comp, "alice", "tokB", dec!(10)),
            wager(&comp, "bob", "tokB", dec!(25)),
        ];

        let calc = PayoutCalculator::new(dec!(0.15));
        let payouts = calc.compute(&wagers, &TokenAddress::from("tokA"));

        // Full refunds, no fee.
        assert_eq!(payouts[&wagers[0].id], dec!(10));
        assert_eq!(payouts[&wagers[1].id], dec!(25));
    }

    #[test]
    fn test_no_wagers_at_all() {
        let calc = PayoutCalculator::new(dec!(0.15));
        let payouts = calc.compute(&[], &TokenAddress::from("tokA"));
        assert!(payouts.is_empty());
    }

    #[test]
    fn test_single_winner_takes_whole_distributable() {
        let comp = competition();
        let wagers = vec![
            wager(&comp, "alice", "tokA", dec!(1)),
            wager(&comp, "bob", "tokB", dec!(99)),
        ];

        let calc = PayoutCalculator::new(dec!(0.15));
        let payouts = calc.compute(&wagers, &TokenAddress::from("tokA"));
        assert_eq!(payouts[&wagers[0].id], dec!(85.00));
        assert_eq!(payouts[&wagers[1].id], dec!(0));
    }

    #[test]
    fn test_zero_fee() {
        let comp = competition();
        let wagers = vec![
            wager(&comp, "alice", "tokA", dec!(30)),
            wager(&comp, "bob", "tokB", dec!(70)),
        ];

        let calc = PayoutCalculator::new(Decimal::ZERO);
        let payouts = calc.compute(&wagers, &TokenAddress::from("tokA"));
        assert_eq!(payouts[&wagers[0].id], dec!(100.00));
    }

    #[test]
    fn test_residual_tie_breaks_deterministically() {
        let comp = competition();
        let wagers = vec![
            wager(&comp, "alice", "tokA", dec!(1)),
            wager(&comp, "bob", "tokA", dec!(1)),
            wager(&comp, "carol", "tokA", dec!(1)),
        ];

        let calc = PayoutCalculator::new(dec!(0.15));
        let first = calc.compute(&wagers, &TokenAddress::from("tokA"));
        let second = calc.compute(&wagers, &TokenAddress::from("tokA"));
        assert_eq!(first, second);

        let total: Decimal = first.values().copied().sum();
        assert_eq!(total, dec!(2.55));
    }
}
