//! Derived CSV view of the transaction list. Read-only. Fields containing
//! commas, quotes or newlines are quoted per RFC 4180; the description
//! column falls back to the category when the note is empty.

use crate::model::TransactionRecord;

pub const CSV_HEADER: &str = "Date,Description,Category,Type,Amount";

fn escape_field(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn format_amount(amount: f64) -> String {
    // Unformatted numeric, no currency symbol. Integral amounts drop the
    // fractional part the way the engine reports them.
    if amount.fract() == 0.0 && amount.abs() < 1e15 {
        format!("{}", amount as i64)
    } else {
        format!("{amount}")
    }
}

pub fn render(transactions: &[TransactionRecord]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for t in transactions {
        let description = match &t.note {
            Some(note) if !note.is_empty() => note.as_str(),
            _ => t.category.as_str(),
        };
        out.push_str(&escape_field(&t.date));
        out.push(',');
        out.push_str(&escape_field(description));
        out.push(',');
        out.push_str(&escape_field(&t.category));
        out.push(',');
        out.push_str(t.kind.as_str());
        out.push(',');
        out.push_str(&format_amount(t.amount));
        out.push('\n');
    }
    out
}
