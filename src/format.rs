use crate::client::{
    DrugSpendingAnnual, DrugSpendingQuarterly, PrescriberByDrug, parse_amount, parse_count,
};

const USES_MAX_CHARS: usize = 500;

/// Scale a dollar amount into a compact `$X.XXB/M/K` form, always with two
/// fraction digits. Values below 1,000 (including negatives) render plain.
pub fn format_currency(value: f64) -> String {
    if value >= 1_000_000_000.0 {
        format!("${:.2}B", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("${:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.2}K", value / 1_000.0)
    } else {
        format!("${value:.2}")
    }
}

/// Group an integer with comma thousands separators.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 { format!("-{out}") } else { out }
}

/// Parse a string count column and group it for display.
pub fn format_count(raw: &str) -> String {
    group_thousands(parse_count(raw))
}

/// Fraction-to-percent with one fraction digit and an explicit leading sign
/// for non-negative values, e.g. 0.123 -> "+12.3%".
fn format_signed_percent(fraction: f64) -> String {
    let pct = fraction * 100.0;
    let sign = if pct >= 0.0 { "+" } else { "" };
    format!("{sign}{pct:.1}%")
}

/// Clean the free-text uses column for display. Returns None when the text is
/// empty or carries the upstream "not available" placeholder. Otherwise strips
/// wrapping quotes and a leading "USES:" label, and truncates long text.
fn clean_uses(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.contains("not available") {
        return None;
    }

    let mut uses = raw.trim();
    uses = uses.strip_prefix('"').unwrap_or(uses);
    uses = uses.strip_suffix('"').unwrap_or(uses);
    let lower = uses.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("uses:") {
        uses = uses[uses.len() - rest.len()..].trim_start();
    }

    if uses.chars().count() > USES_MAX_CHARS {
        let truncated: String = uses.chars().take(USES_MAX_CHARS).collect();
        Some(format!("{truncated}..."))
    } else {
        Some(uses.to_string())
    }
}

/// Render one quarterly spending record as a markdown summary.
pub fn format_quarterly(drug: &DrugSpendingQuarterly) -> String {
    let mut lines = vec![
        format!("**{}** ({})", drug.brand_name, drug.generic_name),
        format!("Manufacturer: {}", drug.manufacturer),
        format!("Period: {}", drug.year),
        String::new(),
        "| Metric | Value |".to_string(),
        "|--------|-------|".to_string(),
        format!(
            "| Total Spending | {} |",
            format_currency(parse_amount(&drug.total_spending))
        ),
        format!("| Beneficiaries | {} |", format_count(&drug.total_beneficiaries)),
        format!("| Claims | {} |", format_count(&drug.total_claims)),
        format!(
            "| Avg/Beneficiary | {} |",
            format_currency(parse_amount(&drug.avg_spend_per_bene))
        ),
        format!(
            "| Avg/Claim | {} |",
            format_currency(parse_amount(&drug.avg_spend_per_claim))
        ),
    ];

    if let Some(uses) = clean_uses(&drug.drug_uses) {
        lines.push(String::new());
        lines.push(format!("**Uses:** {uses}"));
    }

    lines.join("\n")
}

/// Render one annual trends record: fixed 2023 totals plus the trend lines
/// when the upstream columns are populated.
pub fn format_annual(drug: &DrugSpendingAnnual) -> String {
    let mut lines = vec![
        format!("**{}** ({})", drug.brand_name, drug.generic_name),
        format!("Manufacturer: {}", drug.manufacturer),
        String::new(),
        "**2023 Data:**".to_string(),
        format!(
            "- Total Spending: {}",
            format_currency(parse_amount(&drug.total_spending_2023))
        ),
        format!(
            "- Beneficiaries: {}",
            format_count(&drug.total_beneficiaries_2023)
        ),
        format!(
            "- Avg/Beneficiary: {}",
            format_currency(parse_amount(&drug.avg_spend_per_bene_2023))
        ),
    ];

    if !drug.yoy_change.is_empty() {
        lines.push(format!(
            "- YoY Change (2022-2023): {}",
            format_signed_percent(parse_amount(&drug.yoy_change))
        ));
    }

    if !drug.cagr.is_empty() {
        lines.push(format!(
            "- 4-Year CAGR (2019-2023): {}",
            format_signed_percent(parse_amount(&drug.cagr))
        ));
    }

    lines.join("\n")
}

/// Display name for a prescriber row: "First Last" for individuals, the
/// organization name alone otherwise.
pub fn prescriber_name(p: &PrescriberByDrug) -> String {
    if p.first_name.is_empty() {
        p.last_org_name.clone()
    } else {
        format!("{} {}", p.first_name, p.last_org_name)
    }
}

/// Render one prescriber row verbatim (no aggregation across drugs).
pub fn format_prescriber(p: &PrescriberByDrug) -> String {
    [
        format!("**{}** (NPI: {})", prescriber_name(p), p.npi),
        format!("{} - {}, {}", p.prescriber_type, p.city, p.state),
        format!("Drug: {} ({})", p.brand_name, p.generic_name),
        format!(
            "Claims: {} | Cost: {} | Days Supply: {}",
            p.total_claims,
            format_currency(parse_amount(&p.total_drug_cost)),
            p.total_day_supply
        ),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_picks_largest_threshold_not_exceeding_value() {
        assert_eq!(format_currency(2_500_000_000.0), "$2.50B");
        assert_eq!(format_currency(1_234_567.0), "$1.23M");
        assert_eq!(format_currency(1_000.0), "$1.00K");
        assert_eq!(format_currency(950.0), "$950.00");
        assert_eq!(format_currency(0.0), "$0.00");
    }

    #[test]
    fn currency_negative_values_render_plain() {
        // Negatives fail every threshold and fall through unscaled.
        assert_eq!(format_currency(-1_234_567.0), "$-1234567.00");
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(group_thousands(-54_321), "-54,321");
        assert_eq!(format_count("1500000"), "1,500,000");
    }

    #[test]
    fn uses_suppressed_for_placeholder_text() {
        assert_eq!(clean_uses("Information not available for this drug"), None);
        assert_eq!(clean_uses(""), None);
    }

    #[test]
    fn uses_strips_quotes_and_label() {
        assert_eq!(
            clean_uses("\"USES: Treats type 2 diabetes.\"").as_deref(),
            Some("Treats type 2 diabetes.")
        );
        assert_eq!(
            clean_uses("uses: lowercase label").as_deref(),
            Some("lowercase label")
        );
        assert_eq!(clean_uses("Plain text.").as_deref(), Some("Plain text."));
    }

    #[test]
    fn uses_truncated_with_ellipsis() {
        let long = "x".repeat(600);
        let cleaned = clean_uses(&long).unwrap();
        assert_eq!(cleaned.chars().count(), 503);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn quarterly_rendering_includes_scaled_spending() {
        let drug = DrugSpendingQuarterly {
            brand_name: "Ozempic".to_string(),
            generic_name: "Semaglutide".to_string(),
            manufacturer: "Overall".to_string(),
            year: "2024".to_string(),
            total_beneficiaries: "1500000".to_string(),
            total_claims: "9000000".to_string(),
            total_spending: "9100000000".to_string(),
            avg_spend_per_bene: "6066.67".to_string(),
            avg_spend_per_claim: "1011.11".to_string(),
            drug_uses: "Drug uses not available".to_string(),
        };
        let text = format_quarterly(&drug);
        assert!(text.contains("**Ozempic** (Semaglutide)"));
        assert!(text.contains("| Total Spending | $9.10B |"));
        assert!(text.contains("| Beneficiaries | 1,500,000 |"));
        assert!(!text.contains("**Uses:**"));
    }

    #[test]
    fn annual_rendering_shows_trends_only_when_present() {
        let mut drug = DrugSpendingAnnual {
            brand_name: "Eliquis".to_string(),
            generic_name: "Apixaban".to_string(),
            manufacturer: "Overall".to_string(),
            total_spending_2023: "15000000000".to_string(),
            total_beneficiaries_2023: "3500000".to_string(),
            avg_spend_per_bene_2023: "4285.71".to_string(),
            ..Default::default()
        };
        let text = format_annual(&drug);
        assert!(text.contains("$15.00B"));
        assert!(!text.contains("YoY Change"));
        assert!(!text.contains("CAGR"));

        drug.yoy_change = "0.123".to_string();
        drug.cagr = "-0.045".to_string();
        let text = format_annual(&drug);
        assert!(text.contains("YoY Change (2022-2023): +12.3%"));
        assert!(text.contains("4-Year CAGR (2019-2023): -4.5%"));
    }

    #[test]
    fn prescriber_name_prefers_first_last_form() {
        let mut p = PrescriberByDrug {
            first_name: "Jane".to_string(),
            last_org_name: "Smith".to_string(),
            ..Default::default()
        };
        assert_eq!(prescriber_name(&p), "Jane Smith");

        p.first_name = String::new();
        p.last_org_name = "Acme Health LLC".to_string();
        assert_eq!(prescriber_name(&p), "Acme Health LLC");
    }
}
