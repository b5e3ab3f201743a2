//! Small display helpers: sizes, megabytes with separators, performance lines, truncation.

use crate::types::Performance;

pub fn human(b: u64) -> String {
    const K: f64 = 1024.0;
    let b = b as f64;
    if b < K { return format!("{b:.0}B"); }
    let kb = b / K;
    if kb < K { return format!("{kb:.1}KB"); }
    let mb = kb / K;
    if mb < K { return format!("{mb:.1}MB"); }
    let gb = mb / K;
    if gb < K { return format!("{gb:.1}GB"); }
    let tb = gb / K;
    format!("{tb:.2}TB")
}

/// `1234567` -> `"1,234,567"`
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Bytes as megabytes with one decimal, e.g. `"1,234.5"`.
pub fn mem_mb(bytes: u64) -> String {
    let tenths = ((bytes as f64 / 1024.0 / 1024.0) * 10.0).round() as u64;
    format!("{}.{}", thousands(tenths / 10), tenths % 10)
}

pub fn cpu_line(perf: &Performance) -> String {
    match perf.summary() {
        Some(s) => format!("CPU Usage: {:.1}%", s.cpu_percent),
        None => "CPU Usage: N/A".to_string(),
    }
}

pub fn free_mem_line(perf: &Performance) -> String {
    match perf.summary() {
        Some(s) => format!("Free RAM: {} MB", thousands(s.free_memory_mb.max(0.0).round() as u64)),
        None => "Free RAM: N/A".to_string(),
    }
}

pub fn truncate_middle(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max { return s.to_string(); }
    if max <= 3 { return "...".into(); }
    let keep = max - 3;
    let left = keep / 2;
    let right = keep - left;
    let head: String = s.chars().take(left).collect();
    let tail: String = s.chars().skip(len - right).collect();
    format!("{head}...{tail}")
}
