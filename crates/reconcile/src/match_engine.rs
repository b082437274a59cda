use chrono::NaiveDate;
use ynamazon_core::{BudgetTransaction, Money, Order, OrderedTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// The matched charge(s) add up to the whole order.
    Full,
    /// The matched charge(s) cover only part of the order.
    Partial,
}

/// Something about a match that the amounts alone could not settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ambiguity {
    /// Other unclaimed charges had the same amount and date; the first one
    /// seen on the payments page was taken.
    SameDateTie { date: NaiveDate, amount: Money, others: usize },
    /// The charge is larger than the order it belongs to.
    ExceedsOrderTotal { amount: Money, order_total: Money },
}

impl std::fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ambiguity::SameDateTie { date, amount, others } => write!(
                f,
                "{others} other charge(s) of {amount} on {date}; picked the first one listed"
            ),
            Ambiguity::ExceedsOrderTotal { amount, order_total } => {
                write!(f, "charge of {amount} exceeds the order total of {order_total}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub budget: BudgetTransaction,
    /// Claimed retail charges, all from the same order, earliest first.
    pub legs: Vec<OrderedTransaction>,
    pub match_type: MatchType,
    pub ambiguities: Vec<Ambiguity>,
    /// Set when a claimed charge completed on a different day than the budget entry.
    pub date_mismatch: bool,
}

impl Match {
    pub fn order(&self) -> &Order {
        &self.legs[0].order
    }

    pub fn retail_amount(&self) -> Money {
        self.legs.iter().map(OrderedTransaction::amount).sum()
    }

    pub fn is_partial(&self) -> bool {
        self.match_type == MatchType::Partial
    }

    pub fn order_link(&self) -> Option<&str> {
        self.legs.iter().find_map(OrderedTransaction::order_link)
    }
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched(Match),
    Unmatched(BudgetTransaction),
}

/// Chooses between several single charges with the budget transaction's amount.
pub trait CandidatePicker {
    /// Index into `candidates` (earliest first), or `None` to take the first.
    fn pick(&self, budget: &BudgetTransaction, candidates: &[&OrderedTransaction]) -> Option<usize>;
}

/// Always takes the earliest candidate.
pub struct FirstCandidate;

impl CandidatePicker for FirstCandidate {
    fn pick(&self, _budget: &BudgetTransaction, _candidates: &[&OrderedTransaction]) -> Option<usize> {
        None
    }
}

/// Split search enumerates subsets with a `u32` mask.
const SPLIT_LEG_CEILING: usize = 31;

/// Pairs budget transactions with retail charges on exact amount.
pub struct AmountMatcher {
    /// Orders with more unclaimed legs than this are skipped by the split search.
    /// Values above 31 are treated as 31.
    pub max_split_legs: usize,
}

impl Default for AmountMatcher {
    fn default() -> Self {
        Self { max_split_legs: 12 }
    }
}

impl AmountMatcher {
    pub fn new(max_split_legs: usize) -> Self {
        Self {
            max_split_legs: max_split_legs.min(SPLIT_LEG_CEILING),
        }
    }

    /// One outcome per budget transaction, in input order. Each retail charge
    /// is claimed at most once across the whole batch.
    pub fn find_matches(
        &self,
        budget: &[BudgetTransaction],
        retail: &[OrderedTransaction],
    ) -> Vec<MatchOutcome> {
        self.find_matches_with(budget, retail, &FirstCandidate)
    }

    /// Like [`find_matches`](Self::find_matches), but lets `picker` choose
    /// when several single charges have the right amount.
    pub fn find_matches_with(
        &self,
        budget: &[BudgetTransaction],
        retail: &[OrderedTransaction],
        picker: &dyn CandidatePicker,
    ) -> Vec<MatchOutcome> {
        // Stable: same-date charges keep payments-page order.
        let mut by_date: Vec<usize> = (0..retail.len()).collect();
        by_date.sort_by_key(|&i| retail[i].completed_date());

        let mut claimed = vec![false; retail.len()];

        budget
            .iter()
            .map(|b| self.match_one(b, retail, &by_date, &mut claimed, picker))
            .collect()
    }

    fn match_one(
        &self,
        budget: &BudgetTransaction,
        retail: &[OrderedTransaction],
        by_date: &[usize],
        claimed: &mut [bool],
        picker: &dyn CandidatePicker,
    ) -> MatchOutcome {
        let target = budget.amount().abs();
        if target.is_zero() {
            return MatchOutcome::Unmatched(budget.clone());
        }
        let want_refund = !budget.is_outflow();

        let open: Vec<usize> = by_date
            .iter()
            .copied()
            .filter(|&i| !claimed[i] && retail[i].transaction.is_refund == want_refund)
            .collect();

        let candidates = self.single_legs(target, retail, &open);
        if let Some(&first) = candidates.first() {
            let mut ambiguities = Vec::new();
            let chosen = if candidates.len() > 1 {
                let listed: Vec<&OrderedTransaction> = candidates.iter().map(|&i| &retail[i]).collect();
                picker.pick(budget, &listed).and_then(|n| candidates.get(n).copied())
            } else {
                None
            };
            let picked = match chosen {
                Some(i) => i,
                None => {
                    let others = candidates
                        .iter()
                        .filter(|&&i| i != first && retail[i].completed_date() == retail[first].completed_date())
                        .count();
                    if others > 0 {
                        ambiguities.push(Ambiguity::SameDateTie {
                            date: retail[first].completed_date(),
                            amount: target,
                            others,
                        });
                    }
                    first
                }
            };
            return MatchOutcome::Matched(self.claim(budget, retail, &[picked], claimed, ambiguities));
        }

        if let Some(picked) = self.split_legs(target, retail, &open) {
            return MatchOutcome::Matched(self.claim(budget, retail, &picked, claimed, Vec::new()));
        }

        tracing::debug!(
            "No retail charge of {target} for budget transaction {}",
            budget.id
        );
        MatchOutcome::Unmatched(budget.clone())
    }

    /// Unclaimed charges with exactly the target amount, earliest first.
    fn single_legs(&self, target: Money, retail: &[OrderedTransaction], open: &[usize]) -> Vec<usize> {
        open.iter().copied().filter(|&i| retail[i].amount() == target).collect()
    }

    /// Smallest set of two or more unclaimed legs of one order summing to the
    /// target; among equal sizes the one with the earliest legs wins.
    fn split_legs(&self, target: Money, retail: &[OrderedTransaction], open: &[usize]) -> Option<Vec<usize>> {
        let mut orders: Vec<(&str, Vec<usize>)> = Vec::new();
        for &i in open {
            let number = retail[i].order_number();
            match orders.iter_mut().find(|(n, _)| *n == number) {
                Some((_, legs)) => legs.push(i),
                None => orders.push((number, vec![i])),
            }
        }

        for (number, legs) in orders {
            if legs.len() < 2 {
                continue;
            }
            if legs.len() > self.max_split_legs.min(SPLIT_LEG_CEILING) {
                tracing::debug!("Order {number} has {} open legs; skipping split search", legs.len());
                continue;
            }

            let mut best: Option<Vec<usize>> = None;
            for mask in 1u32..(1u32 << legs.len()) {
                if mask.count_ones() < 2 {
                    continue;
                }
                let subset: Vec<usize> = legs
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| mask & (1 << bit) != 0)
                    .map(|(_, &i)| i)
                    .collect();
                let sum: Money = subset.iter().map(|&i| retail[i].amount()).sum();
                if sum != target {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(current) => {
                        (subset.len(), positions(&subset, &legs)) < (current.len(), positions(current, &legs))
                    }
                };
                if better {
                    best = Some(subset);
                }
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }

    fn claim(
        &self,
        budget: &BudgetTransaction,
        retail: &[OrderedTransaction],
        picked: &[usize],
        claimed: &mut [bool],
        mut ambiguities: Vec<Ambiguity>,
    ) -> Match {
        for &i in picked {
            claimed[i] = true;
        }
        let legs: Vec<OrderedTransaction> = picked.iter().map(|&i| retail[i].clone()).collect();

        let amount: Money = legs.iter().map(OrderedTransaction::amount).sum();
        let order_total = legs[0].order.grand_total;
        if amount > order_total {
            ambiguities.push(Ambiguity::ExceedsOrderTotal { amount, order_total });
        }

        let match_type = if amount == order_total {
            MatchType::Full
        } else {
            MatchType::Partial
        };
        let date_mismatch = legs.iter().any(|leg| leg.completed_date() != budget.date);

        Match {
            budget: budget.clone(),
            legs,
            match_type,
            ambiguities,
            date_mismatch,
        }
    }
}

fn positions(subset: &[usize], legs: &[usize]) -> Vec<usize> {
    subset
        .iter()
        .filter_map(|i| legs.iter().position(|l| l == i))
        .collect()
}
