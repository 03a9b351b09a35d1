//! Core types for token-vs-token competitions.
//!
//! A competition pits two tokens against each other over a fixed window.
//! Bettors wager on one side during the voting phase; the token with the
//! better TWAP performance over the window wins, and the pool (minus the
//! platform fee) is split pro-rata among winning wagers.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique competition identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompetitionId(pub Uuid);

impl CompetitionId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CompetitionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompetitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique wager identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WagerId(pub Uuid);

impl WagerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WagerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token mint/contract address. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenAddress(pub String);

impl TokenAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Bettor identity (wallet address or account id). Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BettorId(pub String);

impl BettorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for BettorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Phase state machine
// ============================================================================

/// Lifecycle phase of a competition.
///
/// Phases only ever move forward: `Upcoming → Voting → Active → Closed →
/// Resolved`. `Cancelled` is reachable from any non-terminal phase via
/// operator action. `Resolved` and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Created, not yet open for wagers.
    Upcoming,
    /// Open for wagers; no TWAP window has started.
    Voting,
    /// Wagers locked, performance window running.
    Active,
    /// Window over, winner not yet judged. Observable by consumers.
    Closed,
    /// Winner and payouts persisted. Terminal.
    Resolved,
    /// Cancelled by operator. Terminal; refunds handled out of band.
    Cancelled,
}

impl Phase {
    /// True for phases that block all further automatic advancement.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Resolved | Phase::Cancelled)
    }

    /// The phase that follows in the automatic progression, if any.
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Phase::Upcoming => Some(Phase::Voting),
            Phase::Voting => Some(Phase::Active),
            Phase::Active => Some(Phase::Closed),
            Phase::Closed => Some(Phase::Resolved),
            Phase::Resolved | Phase::Cancelled => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Upcoming => "upcoming",
            Phase::Voting => "voting",
            Phase::Active => "active",
            Phase::Closed => "closed",
            Phase::Resolved => "resolved",
            Phase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upcoming" => Ok(Phase::Upcoming),
            "voting" => Ok(Phase::Voting),
            "active" => Ok(Phase::Active),
            "closed" => Ok(Phase::Closed),
            "resolved" => Ok(Phase::Resolved),
            "cancelled" => Ok(Phase::Cancelled),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

/// Which end of the TWAP window a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TwapSlot {
    /// Baseline TWAP anchored when the competition goes active.
    Start,
    /// Final TWAP anchored when the competition closes.
    End,
}

impl fmt::Display for TwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwapSlot::Start => write!(f, "start"),
            TwapSlot::End => write!(f, "end"),
        }
    }
}

// ============================================================================
// Competition
// ============================================================================

/// Errors raised when constructing or mutating domain objects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("timestamps must satisfy start < voting_end < end")]
    InvalidSchedule,

    #[error("token_a and token_b must differ")]
    DuplicateTokens,

    #[error("chosen token {0} is not part of the competition")]
    InvalidTokenChoice(TokenAddress),

    #[error("wager amount must be positive")]
    NonPositiveAmount,
}

/// TWAP snapshot fields for one side of a competition.
///
/// Each field is written exactly once, start before end, never overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwapSnapshot {
    pub start: Option<Decimal>,
    pub end: Option<Decimal>,
}

impl TwapSnapshot {
    /// Both anchors recorded.
    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

/// A token-vs-token competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub id: CompetitionId,
    pub token_a: TokenAddress,
    pub token_b: TokenAddress,
    /// Voting opens.
    pub start_time: DateTime<Utc>,
    /// Voting closes, performance window opens.
    pub voting_end_time: DateTime<Utc>,
    /// Performance window closes.
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
    /// Set exactly once at resolution.
    pub winner_token: Option<TokenAddress>,
    /// Total wagered across both sides. Frozen once Closed.
    pub total_pool: Decimal,
    /// Wagered on token A.
    pub token_a_pool: Decimal,
    /// Wagered on token B.
    pub token_b_pool: Decimal,
    pub token_a_twap: TwapSnapshot,
    pub token_b_twap: TwapSnapshot,
    /// `(end - start) / start`, set at resolution.
    pub token_a_performance: Option<Decimal>,
    pub token_b_performance: Option<Decimal>,
    /// Manual-intervention marker. Flagged competitions are excluded from
    /// automatic processing until an operator clears them.
    pub flagged: Option<String>,
}

impl Competition {
    /// Create a competition in `Upcoming`, validating the schedule.
    pub fn new(
        token_a: TokenAddress,
        token_b: TokenAddress,
        start_time: DateTime<Utc>,
        voting_end_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if token_a == token_b {
            return Err(DomainError::DuplicateTokens);
        }
        if !(start_time < voting_end_time && voting_end_time < end_time) {
            return Err(DomainError::InvalidSchedule);
        }
        Ok(Self {
            id: CompetitionId::new(),
            token_a,
            token_b,
            start_time,
            voting_end_time,
            end_time,
            created_at,
            phase: Phase::Upcoming,
            winner_token: None,
            total_pool: Decimal::ZERO,
            token_a_pool: Decimal::ZERO,
            token_b_pool: Decimal::ZERO,
            token_a_twap: TwapSnapshot::default(),
            token_b_twap: TwapSnapshot::default(),
            token_a_performance: None,
            token_b_performance: None,
            flagged: None,
        })
    }

    /// True if `token` is one of the two competitors.
    pub fn contains_token(&self, token: &TokenAddress) -> bool {
        &self.token_a == token || &self.token_b == token
    }

    /// The competitor opposite `token`, if `token` is part of the pair.
    pub fn opponent_of(&self, token: &TokenAddress) -> Option<&TokenAddress> {
        if token == &self.token_a {
            Some(&self.token_b)
        } else if token == &self.token_b {
            Some(&self.token_a)
        } else {
            None
        }
    }

    /// TWAP snapshot for one side.
    pub fn twap_for(&self, token: &TokenAddress) -> Option<&TwapSnapshot> {
        if token == &self.token_a {
            Some(&self.token_a_twap)
        } else if token == &self.token_b {
            Some(&self.token_b_twap)
        } else {
            None
        }
    }

    /// True once no automatic transition can ever apply again.
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// The next transition that is due at `now`, if any.
    ///
    /// Returns one step at a time; a delayed caller walks phases in order by
    /// calling this again after applying each transition. `Closed → Resolved`
    /// is always due: resolution happens in the same tick as the close.
    pub fn due_transition(&self, now: DateTime<Utc>) -> Option<Phase> {
        match self.phase {
            Phase::Upcoming if now >= self.start_time => Some(Phase::Voting),
            Phase::Voting if now >= self.voting_end_time => Some(Phase::Active),
            Phase::Active if now >= self.end_time => Some(Phase::Closed),
            Phase::Closed => Some(Phase::Resolved),
            _ => None,
        }
    }

    /// Wagered pool for one side.
    pub fn pool_for(&self, token: &TokenAddress) -> Option<Decimal> {
        if token == &self.token_a {
            Some(self.token_a_pool)
        } else if token == &self.token_b {
            Some(self.token_b_pool)
        } else {
            None
        }
    }
}

// ============================================================================
// Wager
// ============================================================================

/// A single bettor's stake on one side of a competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub competition_id: CompetitionId,
    pub bettor: BettorId,
    /// Must equal `token_a` or `token_b` of the competition. Never mutated.
    pub chosen_token: TokenAddress,
    /// Positive, fixed at creation.
    pub amount: Decimal,
    /// Zero until the competition resolves; written at most once.
    pub payout_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Wager {
    /// Create a wager against a competition, validating the token choice and
    /// amount. Phase and duplicate-bettor checks belong to the store.
    pub fn new(
        competition: &Competition,
        bettor: BettorId,
        chosen_token: TokenAddress,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !competition.contains_token(&chosen_token) {
            return Err(DomainError::InvalidTokenChoice(chosen_token));
        }
        if amount <= Decimal::ZERO {
            return Err(DomainError::NonPositiveAmount);
        }
        Ok(Self {
            id: WagerId::new(),
            competition_id: competition.id,
            bettor,
            chosen_token,
            amount,
            payout_amount: Decimal::ZERO,
            created_at,
        })
    }
}

// ============================================================================
// Price data
// ============================================================================

/// One reading from the external price feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Decimal,
    pub volume: Decimal,
    pub market_cap: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// An append-only timestamped price sample. Never mutated or deleted by the
/// engine; the store may prune samples older than the TWAP window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub token: TokenAddress,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
    pub market_cap: Decimal,
}

impl PriceSample {
    /// Build a sample from a feed quote taken at `timestamp`.
    pub fn from_quote(token: TokenAddress, quote: &PriceQuote, timestamp: DateTime<Utc>) -> Self {
        Self {
            token,
            timestamp,
            price: quote.price,
            volume: quote.volume,
            market_cap: quote.market_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

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

    #[test]
    fn test_phase_successor_chain() {
        assert_eq!(Phase::Upcoming.successor(), Some(Phase::Voting));
        assert_eq!(Phase::Voting.successor(), Some(Phase::Active));
        assert_eq!(Phase::Active.successor(), Some(Phase::Closed));
        assert_eq!(Phase::Closed.successor(), Some(Phase::Resolved));
        assert_eq!(Phase::Resolved.successor(), None);
        assert_eq!(Phase::Cancelled.successor(), None);
    }

    #[test]
    fn test_phase_terminal() {
        assert!(Phase::Resolved.is_terminal());
        assert!(Phase::Cancelled.is_terminal());
        assert!(!Phase::Upcoming.is_terminal());
        assert!(!Phase::Closed.is_terminal());
    }

    #[test]
    fn test_phase_roundtrip() {
        for phase in [
            Phase::Upcoming,
            Phase::Voting,
            Phase::Active,
            Phase::Closed,
            Phase::Resolved,
            Phase::Cancelled,
        ] {
            let parsed: Phase = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);
        }
        assert!("limbo".parse::<Phase>().is_err());
    }

    #[test]
    fn test_competition_schedule_validation() {
        let err = Competition::new(
            TokenAddress::from("tokA"),
            TokenAddress::from("tokB"),
            ts(200),
            ts(100),
            ts(300),
            ts(0),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::InvalidSchedule);

        let err = Competition::new(
            TokenAddress::from("tokA"),
            TokenAddress::from("tokA"),
            ts(100),
            ts(200),
            ts(300),
            ts(0),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::DuplicateTokens);
    }

    #[test]
    fn test_competition_starts_upcoming() {
        let comp = competition();
        assert_eq!(comp.phase, Phase::Upcoming);
        assert!(comp.winner_token.is_none());
        assert_eq!(comp.total_pool, Decimal::ZERO);
        assert!(comp.flagged.is_none());
    }

    #[test]
    fn test_due_transition_respects_clock() {
        let mut comp = competition();

        // Before start: nothing due.
        assert_eq!(comp.due_transition(ts(50)), None);

        // At start: voting opens.
        assert_eq!(comp.due_transition(ts(100)), Some(Phase::Voting));

        // A very late tick still yields one step at a time.
        comp.phase = Phase::Voting;
        assert_eq!(comp.due_transition(ts(999)), Some(Phase::Active));
        comp.phase = Phase::Active;
        assert_eq!(comp.due_transition(ts(999)), Some(Phase::Closed));

        // Closed resolves in the same tick regardless of clock.
        comp.phase = Phase::Closed;
        assert_eq!(comp.due_transition(ts(301)), Some(Phase::Resolved));

        comp.phase = Phase::Resolved;
        assert_eq!(comp.due_transition(ts(999)), None);
        comp.phase = Phase::Cancelled;
        assert_eq!(comp.due_transition(ts(999)), None);
    }

    #[test]
    fn test_opponent_and_membership() {
        let comp = competition();
        let a = TokenAddress::from("tokA");
        let b = TokenAddress::from("tokB");
        assert!(comp.contains_token(&a));
        assert!(!comp.contains_token(&TokenAddress::from("tokC")));
        assert_eq!(comp.opponent_of(&a), Some(&b));
        assert_eq!(comp.opponent_of(&TokenAddress::from("tokC")), None);
    }

    #[test]
    fn test_wager_validation() {
        let comp = competition();

        let err = Wager::new(
            &comp,
            BettorId::new("alice"),
            TokenAddress::from("tokC"),
            dec!(1),
            ts(150),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTokenChoice(_)));

        let err = Wager::new(
            &comp,
            BettorId::new("alice"),
            TokenAddress::from("tokA"),
            dec!(0),
            ts(150),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::NonPositiveAmount);

        let wager = Wager::new(
            &comp,
            BettorId::new("alice"),
            TokenAddress::from("tokA"),
            dec!(0.1),
            ts(150),
        )
        .unwrap();
        assert_eq!(wager.payout_amount, Decimal::ZERO);
        assert_eq!(wager.competition_id, comp.id);
    }

    #[test]
    fn test_twap_snapshot_completeness() {
        let mut snap = TwapSnapshot::default();
        assert!(!snap.is_complete());
        snap.start = Some(dec!(100));
        assert!(!snap.is_complete());
        snap.end = Some(dec!(110));
        assert!(snap.is_complete());
    }

    #[test]
    fn test_price_sample_from_quote() {
        let quote = PriceQuote {
            price: dec!(1.23456789),
            volume: dec!(1000),
            market_cap: dec!(500000),
            timestamp: ts(10),
        };
        let sample = PriceSample::from_quote(TokenAddress::from("tokA"), &quote, ts(12));
        assert_eq!(sample.price, dec!(1.23456789));
        // Sample carries the observation time, not the feed's own stamp.
        assert_eq!(sample.timestamp, ts(12));
    }

    #[test]
    fn test_ids_serialize_as_uuid() {
        let id = CompetitionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: CompetitionId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
