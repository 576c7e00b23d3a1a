use console::style;

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// Aligned `label: value` line inside a section
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<18} {}", style(format!("{}:", label)).dim(), value);
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

/// `$1.2345` with enough precision for sub-cent spend
pub fn usd(amount: f64) -> String {
    format!("${:.4}", amount)
}

/// `spent / limit`, or `unlimited`
pub fn budget(spent: f64, limit: Option<f64>) -> String {
    match limit {
        Some(limit) => format!("{} / {}", usd(spent), usd(limit)),
        None => format!("{} / unlimited", usd(spent)),
    }
}
