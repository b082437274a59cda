use anyhow::{Context, Result};
use chrono::NaiveDate;
use ynamazon_amazon::{fetch_ordered_transactions, AmazonClient};
use ynamazon_core::{BudgetTransaction, OrderedTransaction};
use ynamazon_ynab::{fetch_pending, YnabClient};

use crate::config::Settings;
use crate::pipeline::{self, AlwaysYes, Confirmer, ProcessOptions, RunSummary};
use crate::prompt::{ConsoleConfirmer, ConsoleOtp};

/// Item titles are cut to this many characters in tables.
const TITLE_WIDTH: usize = 20;

pub struct RunFlags {
    pub dry_run: bool,
    pub confirm: bool,
    pub force_logout: bool,
}

// ── Commands ─────────────────────────────────────────────────────────────────

pub async fn print_amazon(settings: &Settings, force_logout: bool, today: NaiveDate) -> Result<()> {
    let rows = load_amazon(settings, force_logout, today).await?;
    println!("Found {} Amazon transaction(s)", rows.len());
    print!("{}", amazon_table(&rows));
    Ok(())
}

pub async fn print_ynab(settings: &Settings) -> Result<()> {
    let ynab = YnabClient::new(settings.ynab_config())?;
    let pending = fetch_pending(
        &ynab,
        &settings.payee_to_be_processed,
        &settings.payee_processing_completed,
    )
    .await
    .context("Failed to load YNAB transactions")?;
    println!(
        "Found {} YNAB transaction(s) with payee {:?}",
        pending.transactions.len(),
        pending.needs_memo.name
    );
    print!("{}", ynab_table(&pending.transactions));
    Ok(())
}

/// Full reconciliation. YNAB is read first so an empty queue never costs an
/// Amazon sign-in.
pub async fn run(settings: &Settings, flags: &RunFlags, today: NaiveDate) -> Result<RunSummary> {
    let ynab = YnabClient::new(settings.ynab_config())?;
    let pending = fetch_pending(
        &ynab,
        &settings.payee_to_be_processed,
        &settings.payee_processing_completed,
    )
    .await
    .context("Failed to load YNAB transactions")?;

    if pending.transactions.is_empty() {
        tracing::info!("No YNAB transactions need a memo; nothing to do");
        return Ok(RunSummary {
            dry_run: flags.dry_run,
            ..RunSummary::default()
        });
    }

    let retail = load_amazon(settings, flags.force_logout, today).await?;

    let options = ProcessOptions {
        memo: settings.memo_options(),
        dry_run: flags.dry_run,
        confirm: flags.confirm,
    };
    let confirmer: &dyn Confirmer = if flags.confirm { &ConsoleConfirmer } else { &AlwaysYes };
    let summary = pipeline::process(&ynab, &pending, &retail, &options, confirmer)
        .await
        .context("Updating YNAB failed")?;

    if flags.dry_run {
        for preview in &summary.previews {
            println!("[{}] {}\n{}\n", preview.transaction_id, preview.heading, preview.memo);
        }
    }
    Ok(summary)
}

async fn load_amazon(settings: &Settings, force_logout: bool, today: NaiveDate) -> Result<Vec<OrderedTransaction>> {
    let amazon = AmazonClient::connect(&settings.amazon_config(force_logout), &ConsoleOtp)
        .await
        .context("Amazon sign-in failed")?;
    fetch_ordered_transactions(&amazon, &settings.fetch_options(), today)
        .await
        .context("Failed to load Amazon transactions")
}

// ── Tables ───────────────────────────────────────────────────────────────────

pub fn amazon_table(rows: &[OrderedTransaction]) -> String {
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.completed_date().to_string(),
                r.amount().to_string(),
                r.order.grand_total.to_string(),
                r.order_number().to_string(),
                r.order_link().unwrap_or("-").to_string(),
                r.order
                    .items
                    .iter()
                    .map(|i| i.truncated(TITLE_WIDTH))
                    .collect::<Vec<_>>()
                    .join(" | "),
            ]
        })
        .collect();
    render_table(
        &["Completed Date", "Transaction Total", "Order Total", "Order Number", "Order Link", "Item Names"],
        &body,
    )
}

pub fn ynab_table(transactions: &[BudgetTransaction]) -> String {
    let body: Vec<Vec<String>> = transactions
        .iter()
        .map(|t| {
            vec![
                t.date.to_string(),
                t.amount().to_string(),
                t.payee_name.clone().unwrap_or_default(),
                t.memo.clone().unwrap_or_default().replace('\n', " "),
            ]
        })
        .collect();
    render_table(&["Date", "Amount", "Payee", "Memo"], &body)
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{cell}{}", " ".repeat(w - cell.chars().count())))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let rules: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    let mut out = line(headers.to_vec());
    out.push_str(&line(rules.iter().map(String::as_str).collect()));
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ynamazon_core::{Item, Money, Order, RetailTransaction};

    #[test]
    fn table_columns_line_up() {
        let table = render_table(
            &["A", "Long header"],
            &[vec!["wide cell".to_string(), "x".to_string()]],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], format!("{:<9}  Long header", "A"));
        assert_eq!(lines[1], format!("{}  {}", "-".repeat(9), "-".repeat(11)));
        assert_eq!(lines[2], "wide cell  x");
    }

    #[test]
    fn amazon_table_truncates_titles() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let row = OrderedTransaction {
            transaction: RetailTransaction {
                completed_date: date,
                grand_total: Money::from_cents(2000),
                is_refund: false,
                order_number: "113-1".to_string(),
                details_link: None,
                payment_method: None,
                seller: None,
            },
            order: Order {
                number: "113-1".to_string(),
                placed_date: date,
                grand_total: Money::from_cents(3500),
                details_link: None,
                items: vec![
                    Item::new("Replacement water filter cartridge"),
                    Item::new("Lamp"),
                ],
            },
        };
        let table = amazon_table(&[row]);
        let last = table.lines().last().unwrap();
        assert!(last.starts_with("2024-06-03"));
        assert!(last.contains("$20.00"));
        assert!(last.contains("$35.00"));
        assert!(last.ends_with("Replacement water... | Lamp"));
    }

    #[test]
    fn ynab_table_flattens_memos() {
        let tx = BudgetTransaction {
            id: "t1".to_string(),
            account_id: "a".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            amount_milliunits: -42_000,
            payee_id: None,
            payee_name: Some("Amazon - Needs Memo".to_string()),
            memo: Some("line one\nline two".to_string()),
        };
        let table = ynab_table(&[tx]);
        assert!(table.lines().last().unwrap().ends_with("line one line two"));
        assert!(table.contains("-$42.00"));
    }
}
