//! Target-Matching Selector
//!
//! Closest-subset-sum over one holding-period bucket. All arithmetic runs on
//! integer cents of gain magnitude: candidates always share the sign of the
//! residual target, so the search only ever adds positive values.
//!
//! Tiers:
//! - `fast`: greedy, largest lots first, take a lot only if it strictly
//!   reduces the distance. Knowingly non-optimal.
//! - `balanced`: 0/1 subset-sum DP on a coarse unit, plus the greedy result.
//! - `thorough`: meet-in-the-middle (exact) on small buckets, fine DP up to the
//!   safety threshold, plus the balanced result.
//!
//! Each tier keeps the best of its own result and the cheaper tiers' results,
//! so distance never gets worse as the level goes up.

use crate::config::{EngineConfig, MAX_EXACT_SEARCH_LOTS};
use crate::error::{HarvestError, HarvestResult};
use crate::models::{HoldingPeriod, OptimizationLevel, TaxLot};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::time::{Duration, Instant};

/// Number of cells reconstructed from a DP table
const DP_RECONSTRUCTED_CELLS: usize = 4;
/// Left-half subsets between deadline checks
const MITM_CHECK_INTERVAL: usize = 4096;
/// Decimal places kept on a scaled-down quantity
const QUANTITY_DP: u32 = 8;

/// Deadline shared by the searches of one call
#[derive(Debug, Clone, Copy, Default)]
pub struct Budget {
    deadline: Option<Instant>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::until(Instant::now() + Duration::from_millis(ms))
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Tier thresholds and per-call switches for one bucket search
#[derive(Debug, Clone)]
pub struct SelectorSettings {
    pub level: OptimizationLevel,
    pub allow_partial: bool,
    /// Cap on the candidate pool, largest |gain| first
    pub max_candidates: Option<usize>,
    pub exact_search_max_lots: usize,
    pub thorough_max_lots: usize,
    pub balanced_max_cells: usize,
    pub thorough_max_cells: usize,
}

impl SelectorSettings {
    pub fn new(level: OptimizationLevel, config: &EngineConfig) -> Self {
        Self {
            level,
            allow_partial: false,
            max_candidates: None,
            exact_search_max_lots: config.exact_search_max_lots,
            thorough_max_lots: config.thorough_max_lots,
            balanced_max_cells: config.balanced_max_cells,
            thorough_max_cells: config.thorough_max_cells,
        }
    }

    pub fn with_partial_lots(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }

    pub fn with_max_candidates(mut self, max: Option<usize>) -> Self {
        self.max_candidates = max;
        self
    }
}

/// A lot chosen for sale, possibly scaled down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedLot {
    pub lot: TaxLot,
    pub quantity: Decimal,
    pub gain: Decimal,
    pub partial: bool,
}

/// Outcome of one bucket search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSelection {
    pub term: HoldingPeriod,
    pub residual_target: Decimal,
    pub requested_level: OptimizationLevel,
    /// Highest tier that completed
    pub strategy: OptimizationLevel,
    pub fallback_reason: Option<String>,
    /// Same-sign candidates before the performance cap
    pub candidates_available: usize,
    pub candidates_considered: usize,
    pub lots: Vec<SelectedLot>,
    pub total_gain: Decimal,
    pub distance: Decimal,
    pub overshoot: Decimal,
    pub undershoot: Decimal,
    /// Loss lots removed because of the wash-sale rule
    pub blocked_by_wash_sale: Vec<String>,
}

impl BucketSelection {
    fn empty(term: HoldingPeriod, residual_target: Decimal, level: OptimizationLevel) -> Self {
        let mut selection = Self {
            term,
            residual_target,
            requested_level: level,
            strategy: level,
            fallback_reason: None,
            candidates_available: 0,
            candidates_considered: 0,
            lots: Vec::new(),
            total_gain: Decimal::ZERO,
            distance: Decimal::ZERO,
            overshoot: Decimal::ZERO,
            undershoot: Decimal::ZERO,
            blocked_by_wash_sale: Vec::new(),
        };
        selection.measure();
        selection
    }

    /// Recompute totals from the selected lots
    fn measure(&mut self) {
        self.total_gain = self.lots.iter().map(|l| l.gain).sum();
        self.distance = (self.residual_target - self.total_gain).abs();

        let (past, short) = if self.residual_target >= Decimal::ZERO {
            (self.total_gain - self.residual_target, self.residual_target - self.total_gain)
        } else {
            (self.residual_target - self.total_gain, self.total_gain - self.residual_target)
        };
        self.overshoot = past.max(Decimal::ZERO);
        self.undershoot = short.max(Decimal::ZERO);
    }
}

fn to_cents(value: Decimal) -> Option<i64> {
    value.checked_mul(Decimal::ONE_HUNDRED)?.round().to_i64()
}

struct Candidate<'a> {
    lot: &'a TaxLot,
    magnitude: i64,
}

/// A whole-lot selection plus an optional scaled lot, ranked by distance,
/// then lot count, then earlier (larger) candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Evaluated {
    distance: i64,
    count: usize,
    indices: Vec<usize>,
    /// (candidate index, scaled magnitude in cents)
    partial: Option<(usize, i64)>,
}

impl Evaluated {
    fn rank(&self) -> (i64, usize, &[usize]) {
        (self.distance, self.count, &self.indices)
    }
}

impl Ord for Evaluated {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Evaluated {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Select lots from `lots` whose gains best approach `residual`.
///
/// Lots of the opposite sign are ignored. Wash-sale filtering happens before
/// this call.
pub fn select(
    term: HoldingPeriod,
    lots: &[&TaxLot],
    residual: Decimal,
    settings: &SelectorSettings,
    budget: &Budget,
) -> HarvestResult<BucketSelection> {
    let mut selection = BucketSelection::empty(term, residual, settings.level);
    if residual.is_zero() {
        return Ok(selection);
    }

    let overflow = |count: usize| {
        HarvestError::computation(term, count, settings.level, "gain exceeds the supported range")
    };
    let target = to_cents(residual.abs()).ok_or_else(|| overflow(lots.len()))?;
    let sign_matches = |gain: Decimal| {
        if residual > Decimal::ZERO {
            gain > Decimal::ZERO
        } else {
            gain < Decimal::ZERO
        }
    };

    let mut candidates = Vec::new();
    for &lot in lots.iter().filter(|lot| sign_matches(lot.unrealized_gain)) {
        let magnitude = to_cents(lot.unrealized_gain.abs()).ok_or_else(|| overflow(lots.len()))?;
        if magnitude > 0 {
            candidates.push(Candidate { lot, magnitude });
        }
    }
    candidates.sort_by(|a, b| b.magnitude.cmp(&a.magnitude).then_with(|| a.lot.id.cmp(&b.lot.id)));

    selection.candidates_available = candidates.len();
    if let Some(max) = settings.max_candidates {
        candidates.truncate(max);
    }
    selection.candidates_considered = candidates.len();
    if candidates.is_empty() {
        selection.measure();
        return Ok(selection);
    }

    let magnitudes: Vec<i64> = candidates.iter().map(|c| c.magnitude).collect();
    // Every subset sum and distance below stays under 4 * target + total
    magnitudes
        .iter()
        .try_fold(0i64, |total, &m| total.checked_add(m))
        .and_then(|total| target.checked_mul(4)?.checked_add(total))
        .ok_or_else(|| overflow(candidates.len()))?;
    let (strategy, fallback_reason, picks) = run_tiers(&magnitudes, target, settings, budget);

    let best = picks
        .into_iter()
        .map(|indices| evaluate(indices, &magnitudes, target, settings.allow_partial))
        .min()
        .unwrap_or_else(|| evaluate(Vec::new(), &magnitudes, target, false));

    if let Some(reason) = &fallback_reason {
        tracing::warn!(
            term = %term,
            lots = candidates.len(),
            requested = %settings.level,
            used = %strategy,
            "Selector fell back: {}",
            reason
        );
    }

    selection.strategy = strategy;
    selection.fallback_reason = fallback_reason;
    selection.lots = materialize(&best, &candidates);
    selection.measure();

    tracing::debug!(
        term = %term,
        strategy = %strategy,
        selected = selection.lots.len(),
        total_gain = %selection.total_gain,
        distance = %selection.distance,
        "Bucket selection complete"
    );

    Ok(selection)
}

/// Run the tiers up to the requested level. Returns the highest tier that
/// completed, the fallback reason if it is lower than requested, and every
/// candidate pick produced along the way.
fn run_tiers(
    magnitudes: &[i64],
    target: i64,
    settings: &SelectorSettings,
    budget: &Budget,
) -> (OptimizationLevel, Option<String>, Vec<Vec<usize>>) {
    let n = magnitudes.len();
    let mut picks = vec![greedy(magnitudes, target)];

    if settings.level == OptimizationLevel::Fast {
        return (OptimizationLevel::Fast, None, picks);
    }

    match subset_sum_dp(magnitudes, target, settings.balanced_max_cells, budget) {
        Some(found) => picks.extend(found),
        None => {
            return (
                OptimizationLevel::Fast,
                Some("time budget exhausted during balanced search".to_string()),
                picks,
            )
        }
    }

    if settings.level == OptimizationLevel::Balanced {
        return (OptimizationLevel::Balanced, None, picks);
    }

    if n > settings.thorough_max_lots {
        let reason = format!(
            "{} candidate lots exceed the thorough limit of {}",
            n, settings.thorough_max_lots
        );
        return (OptimizationLevel::Balanced, Some(reason), picks);
    }

    let thorough = if n <= settings.exact_search_max_lots.min(MAX_EXACT_SEARCH_LOTS) {
        meet_in_the_middle(magnitudes, target, budget).map(|pick| vec![pick])
    } else {
        subset_sum_dp(magnitudes, target, settings.thorough_max_cells, budget)
    };

    match thorough {
        Some(found) => {
            picks.extend(found);
            (OptimizationLevel::Thorough, None, picks)
        }
        None => (
            OptimizationLevel::Balanced,
            Some("time budget exhausted during thorough search".to_string()),
            picks,
        ),
    }
}

/// Largest first; take a lot only if it strictly reduces the distance.
fn greedy(magnitudes: &[i64], target: i64) -> Vec<usize> {
    let mut sum = 0i64;
    let mut picks = Vec::new();

    for (i, &m) in magnitudes.iter().enumerate() {
        if (target - (sum + m)).abs() < (target - sum).abs() {
            sum += m;
            picks.push(i);
        }
    }

    picks
}

/// Row-major bit table: one row per DP item, one bit per cell
struct BitTable {
    words_per_row: usize,
    bits: Vec<u64>,
}

impl BitTable {
    fn new(rows: usize, cols: usize) -> Self {
        let words_per_row = cols.div_ceil(64);
        Self {
            words_per_row,
            bits: vec![0; rows * words_per_row],
        }
    }

    fn set(&mut self, row: usize, col: usize) {
        self.bits[row * self.words_per_row + col / 64] |= 1 << (col % 64);
    }

    fn get(&self, row: usize, col: usize) -> bool {
        self.bits[row * self.words_per_row + col / 64] & (1 << (col % 64)) != 0
    }
}

/// 0/1 subset-sum DP on magnitudes rounded to a unit that fits the axis
/// `[0, 2 * target]` into `max_cells` cells. Sums past `2 * target` are worse
/// than selling nothing, so they are never needed.
///
/// Returns picks for the closest few cells, or `None` if the budget ran out.
fn subset_sum_dp(magnitudes: &[i64], target: i64, max_cells: usize, budget: &Budget) -> Option<Vec<Vec<usize>>> {
    let limit = target.saturating_mul(2);
    let max_cells = i64::try_from(max_cells.max(2)).unwrap_or(i64::MAX);
    // ceil(limit / (max_cells - 1)), with limit >= 2
    let unit = ((limit - 1) / (max_cells - 1) + 1).max(1);
    let cells = (limit / unit) as usize + 1;
    let target_cell = (target + unit / 2) / unit;

    // Ascending magnitude, so on equal lot counts the larger lot wins a cell
    let items: Vec<(usize, usize)> = magnitudes
        .iter()
        .enumerate()
        .rev()
        .filter(|&(_, &m)| m <= limit)
        .map(|(i, &m)| (i, ((m + unit / 2) / unit) as usize))
        .filter(|&(_, v)| v > 0 && v < cells)
        .collect();

    let mut count = vec![u32::MAX; cells];
    count[0] = 0;
    let mut take = BitTable::new(items.len(), cells);

    for (row, &(_, v)) in items.iter().enumerate() {
        if budget.expired() {
            return None;
        }
        for c in (v..cells).rev() {
            let prev = count[c - v];
            if prev == u32::MAX {
                continue;
            }
            if prev < count[c] {
                count[c] = prev + 1;
                take.set(row, c);
            }
        }
    }

    let mut reachable: Vec<usize> = (0..cells).filter(|&c| count[c] != u32::MAX).collect();
    reachable.sort_by_key(|&c| ((c as i64 - target_cell).abs(), count[c], c));
    reachable.truncate(DP_RECONSTRUCTED_CELLS);

    let picks = reachable
        .into_iter()
        .map(|cell| {
            let mut c = cell;
            let mut picked = Vec::new();
            for row in (0..items.len()).rev() {
                if c == 0 {
                    break;
                }
                if take.get(row, c) {
                    let (index, v) = items[row];
                    picked.push(index);
                    c -= v;
                }
            }
            picked.sort_unstable();
            picked
        })
        .collect();

    Some(picks)
}

/// (sum, count) of every subset of `values`, indexed by mask
fn enumerate_subsets(values: &[i64]) -> Vec<(i64, u32)> {
    let size = 1usize << values.len();
    let mut subsets = vec![(0i64, 0u32); size];
    for mask in 1..size {
        let low = mask.trailing_zeros() as usize;
        let (sum, count) = subsets[mask & (mask - 1)];
        subsets[mask] = (sum + values[low], count + 1);
    }
    subsets
}

/// Exact closest-subset-sum by splitting the candidates in two halves.
///
/// Ties on distance go to fewer lots, then to the subset containing the
/// lowest-index (largest) candidate the other lacks.
fn meet_in_the_middle(magnitudes: &[i64], target: i64, budget: &Budget) -> Option<Vec<usize>> {
    let half = magnitudes.len() / 2;
    let (left, right) = magnitudes.split_at(half);

    // Best right subset per distinct sum
    let mut right_subsets: Vec<(i64, u32, u64)> = enumerate_subsets(right)
        .into_iter()
        .enumerate()
        .map(|(mask, (sum, count))| (sum, count, mask as u64))
        .collect();
    right_subsets.sort_by_key(|&(sum, count, mask)| (sum, count, Reverse(mask.reverse_bits())));
    right_subsets.dedup_by_key(|entry| entry.0);

    let mut best: Option<(i64, u32, Reverse<u64>, u64)> = None;

    for (left_mask, (left_sum, left_count)) in enumerate_subsets(left).into_iter().enumerate() {
        if left_mask % MITM_CHECK_INTERVAL == 0 && budget.expired() {
            return None;
        }

        let need = target - left_sum;
        let split = right_subsets.partition_point(|&(sum, _, _)| sum < need);
        let neighbors = [split.checked_sub(1), Some(split)];

        for &(right_sum, right_count, right_mask) in neighbors.iter().flatten().filter_map(|&i| right_subsets.get(i)) {
            let mask = left_mask as u64 | (right_mask << half);
            let candidate = (
                (target - left_sum - right_sum).abs(),
                left_count + right_count,
                Reverse(mask.reverse_bits()),
                mask,
            );
            let improves = match &best {
                Some(b) => (candidate.0, candidate.1, candidate.2) < (b.0, b.1, b.2),
                None => true,
            };
            if improves {
                best = Some(candidate);
            }
        }
    }

    let mask = best.map(|b| b.3).unwrap_or(0);
    Some((0..magnitudes.len()).filter(|&i| mask & (1 << i) != 0).collect())
}

/// Score a whole-lot pick, scaling one lot when partial sales are allowed.
fn evaluate(mut indices: Vec<usize>, magnitudes: &[i64], target: i64, allow_partial: bool) -> Evaluated {
    indices.sort_unstable();
    let sum: i64 = indices.iter().map(|&i| magnitudes[i]).sum();
    let gap = target - sum;

    let partial = if !allow_partial || gap == 0 {
        None
    } else if gap > 0 {
        // Smallest unselected lot that would overshoot the remaining gap
        (0..magnitudes.len())
            .filter(|i| indices.binary_search(i).is_err() && magnitudes[*i] > gap)
            .min_by_key(|&i| (magnitudes[i], i))
            .map(|i| (i, gap))
    } else {
        // Smallest selected lot that covers the overshoot
        indices
            .iter()
            .copied()
            .filter(|&i| magnitudes[i] > -gap)
            .min_by_key(|&i| (magnitudes[i], i))
            .map(|i| (i, magnitudes[i] + gap))
    };

    match partial {
        Some((index, scaled)) => {
            if let Err(pos) = indices.binary_search(&index) {
                indices.insert(pos, index);
            }
            Evaluated {
                distance: 0,
                count: indices.len(),
                indices,
                partial: Some((index, scaled)),
            }
        }
        None => Evaluated {
            distance: gap.abs(),
            count: indices.len(),
            indices,
            partial: None,
        },
    }
}

fn materialize(best: &Evaluated, candidates: &[Candidate<'_>]) -> Vec<SelectedLot> {
    best.indices
        .iter()
        .filter_map(|&i| {
            let candidate = &candidates[i];
            let lot = candidate.lot;

            match best.partial {
                Some((index, scaled)) if index == i => {
                    let fraction = Decimal::from(scaled) / Decimal::from(candidate.magnitude);
                    let quantity = (lot.quantity * fraction).round_dp(QUANTITY_DP);
                    if quantity <= Decimal::ZERO {
                        return None;
                    }
                    Some(SelectedLot {
                        lot: lot.clone(),
                        quantity,
                        gain: lot.gain_for_quantity(quantity).round_dp(2),
                        partial: quantity < lot.quantity,
                    })
                }
                _ => Some(SelectedLot {
                    lot: lot.clone(),
                    quantity: lot.quantity,
                    gain: lot.unrealized_gain,
                    partial: false,
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, LotOrigin};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn lot(id: &str, gain: Decimal) -> TaxLot {
        TaxLot {
            id: id.to_string(),
            symbol: id.to_string(),
            name: None,
            quantity: dec!(100),
            price: dec!(1000),
            cost_basis: dec!(100000) - gain,
            acquired_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            term: HoldingPeriod::LongTerm,
            unrealized_gain: gain,
            account_type: AccountType::Taxable,
            included_in_selling: true,
            source_index: 0,
            origin: LotOrigin::Position,
        }
    }

    fn example_lots() -> Vec<TaxLot> {
        vec![
            lot("AAPL", dec!(75000)),
            lot("MSFT", dec!(50000)),
            lot("NVDA", dec!(15000)),
            lot("GOOGL", dec!(-12000)),
            lot("TSLA", dec!(-24000)),
        ]
    }

    fn settings(level: OptimizationLevel) -> SelectorSettings {
        SelectorSettings::new(level, &EngineConfig::default())
    }

    fn run(lots: &[TaxLot], target: Decimal, settings: &SelectorSettings) -> BucketSelection {
        let refs: Vec<&TaxLot> = lots.iter().collect();
        select(HoldingPeriod::LongTerm, &refs, target, settings, &Budget::unlimited()).unwrap()
    }

    fn ids(selection: &BucketSelection) -> Vec<&str> {
        selection.lots.iter().map(|l| l.lot.id.as_str()).collect()
    }

    #[test]
    fn test_thorough_finds_closest_subset() {
        let lots = example_lots();
        let selection = run(&lots, dec!(55000), &settings(OptimizationLevel::Thorough));

        assert_eq!(ids(&selection), vec!["MSFT"]);
        assert_eq!(selection.total_gain, dec!(50000));
        assert_eq!(selection.distance, dec!(5000));
        assert_eq!(selection.undershoot, dec!(5000));
        assert_eq!(selection.overshoot, dec!(0));
        assert_eq!(selection.strategy, OptimizationLevel::Thorough);
        // Loss lots never count toward a gain target
        assert_eq!(selection.candidates_available, 3);
    }

    #[test]
    fn test_fast_is_greedy() {
        let lots = example_lots();
        let selection = run(&lots, dec!(55000), &settings(OptimizationLevel::Fast));

        assert_eq!(ids(&selection), vec!["AAPL"]);
        assert_eq!(selection.distance, dec!(20000));
        assert_eq!(selection.overshoot, dec!(20000));
    }

    #[test]
    fn test_balanced_beats_greedy_on_example() {
        let lots = example_lots();
        let selection = run(&lots, dec!(55000), &settings(OptimizationLevel::Balanced));
        assert_eq!(selection.distance, dec!(5000));
    }

    #[test]
    fn test_loss_target_uses_loss_lots() {
        let lots = example_lots();
        let selection = run(&lots, dec!(-30000), &settings(OptimizationLevel::Thorough));

        assert_eq!(ids(&selection), vec!["TSLA"]);
        assert_eq!(selection.total_gain, dec!(-24000));
        assert_eq!(selection.undershoot, dec!(6000));

        let deeper = run(&lots, dec!(-40000), &settings(OptimizationLevel::Thorough));
        assert_eq!(deeper.total_gain, dec!(-36000));
        assert_eq!(deeper.undershoot, dec!(4000));
    }

    #[test]
    fn test_zero_target_selects_nothing() {
        let lots = example_lots();
        let selection = run(&lots, dec!(0), &settings(OptimizationLevel::Thorough));
        assert!(selection.lots.is_empty());
        assert_eq!(selection.distance, dec!(0));
    }

    #[test]
    fn test_tie_prefers_fewer_lots() {
        let lots = vec![lot("A", dec!(600)), lot("B", dec!(400)), lot("C", dec!(1000))];
        let selection = run(&lots, dec!(1000), &settings(OptimizationLevel::Thorough));
        assert_eq!(ids(&selection), vec!["C"]);
    }

    #[test]
    fn test_tie_prefers_larger_lots() {
        // {A} overshoots by 100, {B} undershoots by 100
        let lots = vec![lot("A", dec!(1100)), lot("B", dec!(900))];
        let selection = run(&lots, dec!(1000), &settings(OptimizationLevel::Thorough));
        assert_eq!(ids(&selection), vec!["A"]);
    }

    #[test]
    fn test_partial_lot_lands_on_target() {
        let lots = example_lots();
        let partial = settings(OptimizationLevel::Thorough).with_partial_lots(true);
        let selection = run(&lots, dec!(55000), &partial);

        assert_eq!(selection.distance, dec!(0));
        assert_eq!(selection.total_gain, dec!(55000));
        // One scaled lot beats MSFT plus a slice of NVDA
        assert_eq!(ids(&selection), vec!["AAPL"]);
        assert!(selection.lots[0].partial);
        assert_eq!(selection.lots[0].quantity, dec!(73.33333333));
    }

    #[test]
    fn test_partial_fills_undershoot() {
        let lots = vec![lot("A", dec!(800)), lot("B", dec!(400))];
        let partial = settings(OptimizationLevel::Fast).with_partial_lots(true);
        // Greedy stops at A; half of B covers the gap
        let selection = run(&lots, dec!(1000), &partial);

        assert_eq!(selection.total_gain, dec!(1000));
        let b = selection.lots.iter().find(|l| l.lot.id == "B").unwrap();
        assert!(b.partial);
        assert_eq!(b.quantity, dec!(50));
        assert_eq!(b.gain, dec!(200));
    }

    #[test]
    fn test_partial_scales_down_on_overshoot() {
        let lots = vec![lot("A", dec!(1500))];
        let partial = settings(OptimizationLevel::Fast).with_partial_lots(true);
        let selection = run(&lots, dec!(1000), &partial);

        assert_eq!(selection.lots.len(), 1);
        assert!(selection.lots[0].partial);
        assert_eq!(selection.lots[0].quantity, dec!(66.66666667));
        assert_eq!(selection.total_gain, dec!(1000));
        assert_eq!(selection.overshoot, dec!(0));
    }

    #[test]
    fn test_monotonic_across_levels() {
        let gains = [
            dec!(9137.25), dec!(8421.10), dec!(7712.00), dec!(6020.45), dec!(5555.55),
            dec!(4890.00), dec!(3301.99), dec!(2750.00), dec!(1999.99), dec!(1234.56),
            dec!(987.65), dec!(640.00), dec!(512.12), dec!(333.33), dec!(101.01),
        ];
        let lots: Vec<TaxLot> = gains.iter().enumerate().map(|(i, g)| lot(&format!("L{:02}", i), *g)).collect();

        for target in [dec!(1000), dec!(10000), dec!(17777.77), dec!(31415.92), dec!(60000)] {
            let fast = run(&lots, target, &settings(OptimizationLevel::Fast));
            let balanced = run(&lots, target, &settings(OptimizationLevel::Balanced));
            let thorough = run(&lots, target, &settings(OptimizationLevel::Thorough));

            assert!(balanced.distance <= fast.distance, "target {target}");
            assert!(thorough.distance <= balanced.distance, "target {target}");
        }
    }

    #[test]
    fn test_fine_dp_on_mid_size_bucket() {
        let lots: Vec<TaxLot> = (1..=40).map(|i| lot(&format!("L{:02}", i), Decimal::from(i * 137))).collect();

        let mut config = EngineConfig::default();
        config.exact_search_max_lots = 8;
        let dp = run(&lots, dec!(20001), &SelectorSettings::new(OptimizationLevel::Thorough, &config));
        assert_eq!(dp.strategy, OptimizationLevel::Thorough);
        // Every subset sums to a multiple of 137
        assert!(dp.distance <= dec!(69), "distance {}", dp.distance);
    }

    #[test]
    fn test_thorough_falls_back_above_threshold() {
        let lots: Vec<TaxLot> = (1..=30).map(|i| lot(&format!("L{:02}", i), Decimal::from(i * 100))).collect();
        let mut config = EngineConfig::default();
        config.thorough_max_lots = 10;

        let selection = run(&lots, dec!(4550), &SelectorSettings::new(OptimizationLevel::Thorough, &config));

        assert_eq!(selection.requested_level, OptimizationLevel::Thorough);
        assert_eq!(selection.strategy, OptimizationLevel::Balanced);
        assert!(selection.fallback_reason.as_deref().unwrap().contains("thorough limit"));
    }

    #[test]
    fn test_expired_budget_falls_back_to_greedy() {
        let lots = example_lots();
        let refs: Vec<&TaxLot> = lots.iter().collect();
        let budget = Budget::until(Instant::now());

        let selection = select(
            HoldingPeriod::LongTerm,
            &refs,
            dec!(55000),
            &settings(OptimizationLevel::Thorough),
            &budget,
        )
        .unwrap();

        assert_eq!(selection.strategy, OptimizationLevel::Fast);
        assert_eq!(ids(&selection), vec!["AAPL"]);
        assert!(selection.fallback_reason.is_some());
    }

    #[test]
    fn test_candidate_cap_keeps_largest() {
        let lots = example_lots();
        let capped = settings(OptimizationLevel::Thorough).with_max_candidates(Some(1));
        let selection = run(&lots, dec!(55000), &capped);

        assert_eq!(selection.candidates_available, 3);
        assert_eq!(selection.candidates_considered, 1);
        assert_eq!(ids(&selection), vec!["AAPL"]);
    }

    #[test]
    fn test_meet_in_the_middle_is_exact() {
        let magnitudes = [700, 500, 300, 290, 110, 60];
        assert_eq!(meet_in_the_middle(&magnitudes, 1000, &Budget::unlimited()), Some(vec![0, 2]));
        assert_eq!(meet_in_the_middle(&magnitudes, 461, &Budget::unlimited()), Some(vec![3, 4, 5]));
    }

    #[test]
    fn test_dp_reconstructs_reachable_sum() {
        let magnitudes = [700, 500, 300, 290, 110, 60];
        let picks = subset_sum_dp(&magnitudes, 860, 10_000, &Budget::unlimited()).unwrap();
        let best: i64 = picks[0].iter().map(|&i| magnitudes[i]).sum();
        assert_eq!(best, 860);
    }

    #[test]
    fn test_exact_search_limit_is_capped() {
        let lots: Vec<TaxLot> = (1..=45).map(|i| lot(&format!("L{:02}", i), Decimal::from(i * 137))).collect();
        let config = EngineConfig {
            exact_search_max_lots: 130,
            ..EngineConfig::default()
        };

        let selection = run(&lots, dec!(20001), &SelectorSettings::new(OptimizationLevel::Thorough, &config));

        // 45 lots go to the fine DP instead of a 2^45 enumeration
        assert_eq!(selection.strategy, OptimizationLevel::Thorough);
        assert!(selection.distance <= dec!(69), "distance {}", selection.distance);
    }

    #[test]
    fn test_gains_past_cent_range_rejected() {
        let lots = vec![lot("BIG1", dec!(50000000000000000)), lot("BIG2", dec!(50000000000000000))];
        let refs: Vec<&TaxLot> = lots.iter().collect();

        let err = select(
            HoldingPeriod::LongTerm,
            &refs,
            dec!(1000),
            &settings(OptimizationLevel::Thorough),
            &Budget::unlimited(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            HarvestError::Computation { bucket: Some(HoldingPeriod::LongTerm), lot_count: 2, .. }
        ));
    }

    #[test]
    fn test_dp_with_unbounded_cells() {
        let magnitudes = [700, 500, 300, 290, 110, 60];
        let picks = subset_sum_dp(&magnitudes, 860, usize::MAX, &Budget::unlimited()).unwrap();
        let best: i64 = picks[0].iter().map(|&i| magnitudes[i]).sum();
        assert_eq!(best, 860);
    }
}
