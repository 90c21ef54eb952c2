use keyrelay::prelude::*;

pub trait TableRow {
    fn headers() -> &'static [&'static str];
    fn row(&self) -> Vec<String>;
}

pub fn render_table<T: TableRow>(items: &[T]) -> String {
    let headers = T::headers();
    let rows: Vec<Vec<String>> = items.iter().map(TableRow::row).collect();
    let widths = column_widths(headers, &rows);

    let mut out = String::new();
    out.push_str(&format_row(
        &headers.iter().map(ToString::to_string).collect::<Vec<_>>(),
        &widths,
    ));
    out.push('\n');
    out.push_str(&format_separator(&widths));

    for row in rows {
        out.push('\n');
        out.push_str(&format_row(&row, &widths));
    }

    out
}

// widths are in chars; license keys and user names may be non-ascii
fn column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            if idx >= widths.len() {
                widths.push(len);
            } else {
                widths[idx] = widths[idx].max(len);
            }
        }
    }
    widths
}

fn format_row(row: &[String], widths: &[usize]) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for (idx, cell) in row.iter().enumerate() {
        if idx > 0 {
            out.push_str("  ");
        }
        let width = widths.get(idx).copied().unwrap_or(0);
        let _ = write!(out, "{cell:<width$}");
    }
    out.trim_end().to_string()
}

fn format_separator(widths: &[usize]) -> String {
    let mut out = String::new();
    for (idx, width) in widths.iter().enumerate() {
        if idx > 0 {
            out.push_str("  ");
        }
        out.push_str(&"-".repeat(*width));
    }
    out
}

impl TableRow for License {
    fn headers() -> &'static [&'static str] {
        &["key", "status", "level", "expires", "used_by", "banned"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.key.clone(),
            self.status.to_string(),
            self.level.to_string(),
            self.expires.map(|exp| exp.to_string()).unwrap_or_default(),
            self.used_by.clone().unwrap_or_default(),
            self.banned.clone().unwrap_or_default(),
        ]
    }
}

impl TableRow for LicenseRecord {
    fn headers() -> &'static [&'static str] {
        &["key", "status", "level", "duration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.key.clone(),
            self.status.to_string(),
            self.level.to_string(),
            self.resolved_duration().to_string(),
        ]
    }
}

impl TableRow for User {
    fn headers() -> &'static [&'static str] {
        &["name", "hwid", "ip", "banned"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.hwid.clone().unwrap_or_default(),
            self.ip.clone().unwrap_or_default(),
            self.banned.clone().unwrap_or_default(),
        ]
    }
}
