use std::fmt;
use ynamazon_core::{BudgetSource, BudgetTransaction, OrderedTransaction, SourceError};
use ynamazon_reconcile::{
    Ambiguity, AmountMatcher, CandidatePicker, Match, MatchOutcome, MemoBuilder, MemoOptions,
};
use ynamazon_ynab::{BudgetUpdater, PendingTransactions};

/// Decisions taken during a run.
pub trait Confirmer {
    fn confirm(&self, question: &str) -> bool;

    /// Index of the chosen option, or `None` to keep the first.
    fn choose(&self, _question: &str, _options: &[String]) -> Option<usize> {
        None
    }
}

/// Accepts everything; used when the run is not interactive.
pub struct AlwaysYes;

impl Confirmer for AlwaysYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub memo: MemoOptions,
    /// Render memos without writing anything back.
    pub dry_run: bool,
    /// Ask before each update and before accepting a date mismatch.
    pub confirm: bool,
}

/// Hands same-amount candidates to the user in confirm mode.
struct AskWhichCharge<'a>(&'a dyn Confirmer);

impl CandidatePicker for AskWhichCharge<'_> {
    fn pick(&self, budget: &BudgetTransaction, candidates: &[&OrderedTransaction]) -> Option<usize> {
        let options: Vec<String> = candidates
            .iter()
            .map(|c| {
                let items: Vec<String> = c.order.items.iter().map(|i| i.truncated(30)).collect();
                format!("{} {} order {}: {}", c.completed_date(), c.amount(), c.order_number(), items.join(", "))
            })
            .collect();
        let question = format!(
            "Several Amazon charges match {} {}. Which one is it?",
            budget.date,
            budget.amount().abs()
        );
        self.0.choose(&question, &options)
    }
}

/// A rendered memo, kept for printing.
#[derive(Debug, Clone)]
pub struct Preview {
    pub transaction_id: String,
    pub heading: String,
    pub memo: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub matched: usize,
    pub updated: Vec<String>,
    pub unmatched: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<SourceError>,
    pub ambiguities: Vec<(String, Ambiguity)>,
    pub previews: Vec<Preview>,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: {} memo(s) rendered, nothing was updated", self.previews.len())?;
        } else {
            writeln!(f, "Updated:   {}", self.updated.len())?;
        }
        writeln!(f, "Matched:   {}", self.matched)?;
        writeln!(f, "Unmatched: {}", self.unmatched.len())?;
        writeln!(f, "Skipped:   {}", self.skipped.len())?;
        for (id, ambiguity) in &self.ambiguities {
            writeln!(f, "  note on {id}: {ambiguity}")?;
        }
        write!(f, "Failed:    {}", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

/// Matches pending budget transactions against resolved retail charges,
/// renders memos and writes them back. Per-transaction rejections are
/// collected; anything fatal (bad credentials, network) ends the run.
pub async fn process<B: BudgetSource + ?Sized>(
    budget: &B,
    pending: &PendingTransactions,
    retail: &[OrderedTransaction],
    options: &ProcessOptions,
    confirmer: &dyn Confirmer,
) -> Result<RunSummary, SourceError> {
    let matcher = AmountMatcher::default();
    let builder = MemoBuilder::new(options.memo.clone());
    let updater = BudgetUpdater::new(budget, pending.completed.clone());
    let mut summary = RunSummary {
        dry_run: options.dry_run,
        ..RunSummary::default()
    };

    let outcomes = if options.confirm {
        matcher.find_matches_with(&pending.transactions, retail, &AskWhichCharge(confirmer))
    } else {
        matcher.find_matches(&pending.transactions, retail)
    };

    for outcome in outcomes {
        let m = match outcome {
            MatchOutcome::Unmatched(tx) => {
                tracing::warn!("No Amazon transaction matches {} {}", tx.date, tx.amount().abs());
                summary.unmatched.push(tx.id);
                continue;
            }
            MatchOutcome::Matched(m) => m,
        };
        summary.matched += 1;

        for ambiguity in &m.ambiguities {
            tracing::warn!("Transaction {}: {ambiguity}", m.budget.id);
            summary.ambiguities.push((m.budget.id.clone(), ambiguity.clone()));
        }

        let memo = builder.build(&m);
        let preview = Preview {
            transaction_id: m.budget.id.clone(),
            heading: heading(&m),
            memo: memo.text.clone(),
        };
        tracing::info!("{}", preview.heading);

        if m.date_mismatch {
            let amazon_date = m.legs.iter().map(|l| l.completed_date()).max().unwrap_or(m.budget.date);
            tracing::warn!("Dates differ: YNAB {} vs Amazon {amazon_date}", m.budget.date);
            if options.confirm && !confirmer.confirm("The dates don't match. Use this match anyway?") {
                summary.skipped.push(m.budget.id.clone());
                continue;
            }
        }

        if options.dry_run {
            summary.previews.push(preview);
            continue;
        }

        if options.confirm {
            eprintln!("{}\n{}\n", preview.heading, preview.memo);
            if !confirmer.confirm("Update YNAB transaction memo?") {
                tracing::info!("Skipping transaction {}", m.budget.id);
                summary.skipped.push(m.budget.id.clone());
                continue;
            }
        }

        match updater.apply(&m.budget, &memo.text).await {
            Ok(()) => summary.updated.push(m.budget.id.clone()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => summary.failures.push(e),
        }
        summary.previews.push(preview);
    }

    Ok(summary)
}

fn heading(m: &Match) -> String {
    format!(
        "{} {} -> order {} ({}{})",
        m.budget.date,
        m.budget.amount().abs(),
        m.order().number,
        m.retail_amount(),
        if m.is_partial() { ", partial" } else { "" }
    )
}
