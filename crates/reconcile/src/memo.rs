use ynamazon_core::Item;

use crate::match_engine::Match;

/// YNAB rejects memos longer than this many characters.
pub const YNAB_MEMO_LIMIT: usize = 500;

/// Stands in for dropped content when a memo is shortened.
pub const TRUNCATION_MARKER: &str = "[...]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoFormat {
    #[default]
    Plain,
    Markdown,
}

#[derive(Debug, Clone)]
pub struct MemoOptions {
    pub format: MemoFormat,
    pub suppress_partial_note: bool,
    pub max_length: usize,
}

impl Default for MemoOptions {
    fn default() -> Self {
        Self {
            format: MemoFormat::Plain,
            suppress_partial_note: false,
            max_length: YNAB_MEMO_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memo {
    pub text: String,
    pub truncated: bool,
}

impl std::fmt::Display for Memo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

pub struct MemoBuilder {
    options: MemoOptions,
}

impl MemoBuilder {
    pub fn new(options: MemoOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MemoOptions {
        &self.options
    }

    pub fn build(&self, m: &Match) -> Memo {
        let order = m.order();

        let note = (m.is_partial() && !self.options.suppress_partial_note).then(|| {
            format!(
                "-This transaction doesn't represent the entire order. The order total is {}-",
                order.grand_total
            )
        });

        let items = self.item_lines(&order.items);
        let header = (order.items.len() > 1).then(|| match self.options.format {
            MemoFormat::Plain => "Items".to_string(),
            MemoFormat::Markdown => "**Items**".to_string(),
        });

        let order_line = self.order_line(&order.number, m.order_link());

        self.fit(note, header, items, order_line)
    }

    fn item_lines(&self, items: &[Item]) -> Vec<String> {
        match items {
            [] => Vec::new(),
            [only] => vec![format!("- {}", self.item_text(only))],
            many => many
                .iter()
                .enumerate()
                .map(|(i, item)| format!("{}. {}", i + 1, self.item_text(item)))
                .collect(),
        }
    }

    fn item_text(&self, item: &Item) -> String {
        let mut text = match (self.options.format, item.link.as_deref()) {
            (MemoFormat::Markdown, Some(link)) => format!("[{}]({link})", item.title),
            _ => item.title.clone(),
        };
        if let Some(qty) = item.quantity {
            text.push_str(&format!(" × {qty}"));
        }
        if let Some(price) = item.price {
            text.push_str(&format!(", {price}"));
        }
        text
    }

    fn order_line(&self, number: &str, link: Option<&str>) -> String {
        match (self.options.format, link) {
            (MemoFormat::Markdown, Some(url)) => format!("[Order #{number}]({url})"),
            (MemoFormat::Plain, Some(url)) => url.to_string(),
            (_, None) => format!("Order #{number}"),
        }
    }

    /// Joins the sections, dropping trailing item lines (then cutting hard) to
    /// stay within `max_length` characters.
    fn fit(
        &self,
        note: Option<String>,
        header: Option<String>,
        items: Vec<String>,
        order_line: String,
    ) -> Memo {
        let max = self.options.max_length;

        let full: Vec<&str> = note
            .iter()
            .chain(header.iter())
            .chain(items.iter())
            .chain(std::iter::once(&order_line))
            .map(String::as_str)
            .collect();
        let text = full.join("\n");
        if char_len(&text) <= max {
            return Memo { text, truncated: false };
        }

        let mut kept: Vec<&str> = Vec::new();
        for item in &items {
            let candidate = assemble(note.as_deref(), header.as_deref(), &kept, Some(item.as_str()), &order_line);
            if char_len(&candidate) > max {
                break;
            }
            kept.push(item.as_str());
        }
        let text = assemble(note.as_deref(), header.as_deref(), &kept, None, &order_line);
        if char_len(&text) <= max {
            tracing::debug!("Memo truncated to {} of {} item lines", kept.len(), items.len());
            return Memo { text, truncated: true };
        }

        let budget = max.saturating_sub(char_len(TRUNCATION_MARKER));
        let mut text: String = full.join("\n").chars().take(budget).collect();
        text.push_str(TRUNCATION_MARKER);
        tracing::debug!("Memo cut to {} characters", char_len(&text));
        Memo { text, truncated: true }
    }
}

/// Layout used once items had to be dropped: the header only survives when
/// at least one item line does.
fn assemble(note: Option<&str>, header: Option<&str>, kept: &[&str], next: Option<&str>, order_line: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    lines.extend(note);
    let items: Vec<&str> = kept.iter().copied().chain(next).collect();
    if !items.is_empty() {
        lines.extend(header);
        lines.extend(items);
    }
    lines.push(TRUNCATION_MARKER);
    lines.push(order_line);
    lines.join("\n")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
