use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub id: String,
    pub name: String,
    pub deleted: bool,
}

/// A transaction in the budget, as far as this tool cares about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetTransaction {
    pub id: String,
    pub account_id: String,
    pub date: NaiveDate,
    /// Signed milliunits; outflows are negative.
    pub amount_milliunits: i64,
    pub payee_id: Option<String>,
    pub payee_name: Option<String>,
    pub memo: Option<String>,
}

impl BudgetTransaction {
    pub fn amount(&self) -> Money {
        Money::from_milliunits(self.amount_milliunits)
    }

    pub fn is_outflow(&self) -> bool {
        self.amount_milliunits < 0
    }
}

/// The write issued for a matched transaction. Account, date and amount are
/// carried unchanged so the remote record keeps them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionUpdate {
    pub transaction_id: String,
    pub account_id: String,
    pub date: NaiveDate,
    pub amount_milliunits: i64,
    pub payee_id: String,
    pub memo: String,
}

impl TransactionUpdate {
    pub fn new(tx: &BudgetTransaction, payee: &Payee, memo: String) -> Self {
        TransactionUpdate {
            transaction_id: tx.id.clone(),
            account_id: tx.account_id.clone(),
            date: tx.date,
            amount_milliunits: tx.amount_milliunits,
            payee_id: payee.id.clone(),
            memo,
        }
    }
}

/// First payee with the given name. Deleted payees are never selected.
pub fn find_payee_by_name<'a>(payees: &'a [Payee], name: &str) -> Option<&'a Payee> {
    let mut matching = payees.iter().filter(|p| !p.deleted && p.name == name);
    let first = matching.next()?;
    if matching.next().is_some() {
        tracing::warn!("Multiple payees named {name:?}; using the first one");
    }
    Some(first)
}
