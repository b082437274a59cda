use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashMap;
use ynamazon_core::{Order, OrderedTransaction, RetailSource, SourceError};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Years of order history to load; empty means "whatever the window needs".
    pub years: Vec<i32>,
    pub transaction_days: u32,
    /// Load each referenced order's details page for prices and quantities.
    pub full_details: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            years: Vec::new(),
            transaction_days: 31,
            full_details: true,
        }
    }
}

/// Two-digit years are taken as 20xx.
pub fn normalize_year(year: i32) -> i32 {
    if (0..100).contains(&year) {
        year + 2000
    } else {
        year
    }
}

pub fn window_start(today: NaiveDate, days: u32) -> NaiveDate {
    today - Duration::days(i64::from(days))
}

/// Years of order history to scan, ascending and without duplicates.
pub fn order_years(requested: &[i32], today: NaiveDate, since: NaiveDate) -> Vec<i32> {
    let mut years: Vec<i32> = if requested.is_empty() {
        (since.year()..=today.year()).collect()
    } else {
        requested.iter().copied().map(normalize_year).collect()
    };
    years.sort_unstable();
    years.dedup();
    years
}

/// Loads orders and payment transactions and pairs each transaction with its
/// order, oldest first. Transactions whose order was not found are dropped.
pub async fn fetch_ordered_transactions<S: RetailSource + ?Sized>(
    source: &S,
    options: &FetchOptions,
    today: NaiveDate,
) -> Result<Vec<OrderedTransaction>, SourceError> {
    let since = window_start(today, options.transaction_days);

    let mut orders: HashMap<String, Order> = HashMap::new();
    for year in order_years(&options.years, today, since) {
        for order in source.fetch_orders(year).await? {
            orders.entry(order.number.clone()).or_insert(order);
        }
    }

    let mut transactions = source.fetch_transactions(since).await?;
    transactions.retain(|t| t.completed_date >= since);
    transactions.sort_by_key(|t| t.completed_date);

    let mut referenced: Vec<String> = Vec::new();
    transactions.retain(|t| {
        if !orders.contains_key(&t.order_number) {
            tracing::debug!("Transaction {} not found in retrieved orders", t.order_number);
            return false;
        }
        if !referenced.contains(&t.order_number) {
            referenced.push(t.order_number.clone());
        }
        true
    });

    if options.full_details {
        for number in &referenced {
            let Some(order) = orders.get_mut(number) else {
                continue;
            };
            match source.fetch_order_items(order).await {
                Ok(items) => order.items = items,
                Err(SourceError::Parse(reason)) => {
                    tracing::warn!("Keeping summary items for order {number}: {reason}");
                }
                Err(e) => return Err(e),
            }
        }
    }

    let resolved: Vec<OrderedTransaction> = transactions
        .into_iter()
        .filter_map(|transaction| {
            let order = orders.get(&transaction.order_number)?.clone();
            Some(OrderedTransaction { transaction, order })
        })
        .collect();

    tracing::info!(
        "Resolved {} Amazon transaction(s) across {} order(s)",
        resolved.len(),
        referenced.len()
    );
    Ok(resolved)
}
