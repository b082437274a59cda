use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub link: Option<String>,
    /// Unit price, only known once the order details page was fetched.
    pub price: Option<Money>,
    pub quantity: Option<u32>,
}

impl Item {
    pub fn new(title: &str) -> Self {
        Item {
            title: title.to_string(),
            link: None,
            price: None,
            quantity: None,
        }
    }

    /// Shortened title for table output.
    pub fn truncated(&self, max_chars: usize) -> String {
        if self.title.chars().count() > max_chars {
            let head: String = self.title.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{head}...")
        } else {
            self.title.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub placed_date: NaiveDate,
    pub grand_total: Money,
    pub details_link: Option<String>,
    pub items: Vec<Item>,
}

/// A single charge (or refund) on the retail account's payments page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailTransaction {
    pub completed_date: NaiveDate,
    /// Always positive; refunds are flagged by `is_refund`.
    pub grand_total: Money,
    pub is_refund: bool,
    pub order_number: String,
    pub details_link: Option<String>,
    pub payment_method: Option<String>,
    pub seller: Option<String>,
}

/// A retail transaction resolved to the order it paid for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedTransaction {
    pub transaction: RetailTransaction,
    pub order: Order,
}

impl OrderedTransaction {
    pub fn amount(&self) -> Money {
        self.transaction.grand_total
    }

    pub fn completed_date(&self) -> NaiveDate {
        self.transaction.completed_date
    }

    pub fn order_number(&self) -> &str {
        &self.order.number
    }

    /// True when this charge is the whole order rather than one leg of it.
    pub fn covers_full_order(&self) -> bool {
        self.transaction.grand_total == self.order.grand_total
    }

    /// Prefers the transaction's link; falls back to the order's.
    pub fn order_link(&self) -> Option<&str> {
        self.transaction
            .details_link
            .as_deref()
            .or(self.order.details_link.as_deref())
    }
}

/// Groups resolved transactions by order number, keeping first-seen order of
/// orders and completion-date order inside each group.
pub fn group_by_order(transactions: &[OrderedTransaction]) -> Vec<(&str, Vec<&OrderedTransaction>)> {
    let mut groups: Vec<(&str, Vec<&OrderedTransaction>)> = Vec::new();
    for tx in transactions {
        match groups.iter_mut().find(|(number, _)| *number == tx.order_number()) {
            Some((_, legs)) => legs.push(tx),
            None => groups.push((tx.order_number(), vec![tx])),
        }
    }
    for (_, legs) in &mut groups {
        legs.sort_by_key(|leg| leg.completed_date());
    }
    groups
}
