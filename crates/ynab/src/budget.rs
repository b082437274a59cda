use ynamazon_core::{find_payee_by_name, BudgetSource, BudgetTransaction, Payee, SourceError, TransactionUpdate};

/// Transactions waiting for a memo, together with both marker payees.
#[derive(Debug, Clone)]
pub struct PendingTransactions {
    pub transactions: Vec<BudgetTransaction>,
    pub needs_memo: Payee,
    pub completed: Payee,
}

/// Resolves both payee names and lists the transactions still carrying the
/// "needs memo" payee, oldest first.
pub async fn fetch_pending<S: BudgetSource + ?Sized>(
    source: &S,
    needs_memo_name: &str,
    completed_name: &str,
) -> Result<PendingTransactions, SourceError> {
    let payees = source.payees().await?;
    tracing::debug!("Budget has {} payees", payees.len());

    let needs_memo = find_payee_by_name(&payees, needs_memo_name)
        .cloned()
        .ok_or_else(|| SourceError::NotFound(format!("payee {needs_memo_name:?}")))?;
    let completed = find_payee_by_name(&payees, completed_name)
        .cloned()
        .ok_or_else(|| SourceError::NotFound(format!("payee {completed_name:?}")))?;

    let mut transactions = source.transactions_by_payee(&needs_memo.id).await?;
    transactions.sort_by_key(|t| t.date);
    tracing::info!(
        "Found {} transaction(s) with payee {:?}",
        transactions.len(),
        needs_memo.name
    );

    Ok(PendingTransactions {
        transactions,
        needs_memo,
        completed,
    })
}

/// Writes memos back and moves transactions to the "completed" payee.
pub struct BudgetUpdater<'a, S: BudgetSource + ?Sized> {
    source: &'a S,
    completed: Payee,
}

impl<'a, S: BudgetSource + ?Sized> BudgetUpdater<'a, S> {
    pub fn new(source: &'a S, completed: Payee) -> Self {
        Self { source, completed }
    }

    pub fn completed_payee(&self) -> &Payee {
        &self.completed
    }

    pub fn update_for(&self, tx: &BudgetTransaction, memo: &str) -> TransactionUpdate {
        TransactionUpdate::new(tx, &self.completed, memo.to_string())
    }

    /// Issues one update. Rejections come back as `RemoteUpdate` so callers
    /// can carry on with the rest of the batch.
    pub async fn apply(&self, tx: &BudgetTransaction, memo: &str) -> Result<(), SourceError> {
        let update = self.update_for(tx, memo);
        match self.source.update_transaction(&update).await {
            Ok(()) => {
                tracing::info!("Updated transaction {} ({})", tx.id, tx.amount());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Update of transaction {} failed: {e}", tx.id);
                Err(e)
            }
        }
    }
}
