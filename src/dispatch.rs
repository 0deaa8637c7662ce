use std::collections::HashMap;

use anyhow::Result;
use futures_util::future::try_join;
use serde::{Deserialize, Serialize};

use crate::client::{
    CmsClient, DrugSpendingQuarterly, OVERALL_MANUFACTURER, PRESCRIBER_BY_DRUG,
    PRESCRIBER_BY_GEO, PRESCRIBER_BY_PROVIDER, PrescriberByDrug, SPENDING_ANNUAL,
    SPENDING_QUARTERLY, overall_or_first, parse_amount, parse_count,
};
use crate::format::{
    format_annual, format_count, format_currency, format_prescriber, format_quarterly,
    prescriber_name,
};

/// The seven supported actions. Anything else deserializes to `Unknown`, so
/// an out-of-contract value is representable and rejected in the dispatcher
/// instead of slipping through a string comparison.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Action {
    Drug,
    Spending,
    Prescribers,
    Top,
    Search,
    Api,
    Help,
    Unknown(String),
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "drug" => Action::Drug,
            "spending" => Action::Spending,
            "prescribers" => Action::Prescribers,
            "top" => Action::Top,
            "search" => Action::Search,
            "api" => Action::Api,
            "help" => Action::Help,
            _ => Action::Unknown(s),
        }
    }
}

/// Inbound request for the `partd` tool. Shape validation happens at the
/// HTTP boundary; cross-field requirements (e.g. "drug or query required")
/// are checked per action here.
#[derive(Debug, Clone, Deserialize)]
pub struct PartDParams {
    pub action: Action,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub drug: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub npi: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Uniform result envelope: one or more text blocks plus an error flag.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Vec<String>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![text.into()],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![text.into()],
            is_error: true,
        }
    }
}

/// Dispatch one action. Total over `Action`; every internal failure is
/// converted to an error envelope here, nothing propagates to the caller.
pub async fn handle_action(params: &PartDParams, client: &CmsClient) -> ToolResult {
    let outcome = match &params.action {
        Action::Drug => handle_drug(params, client).await,
        Action::Spending => handle_spending(params, client).await,
        Action::Prescribers => handle_prescribers(params, client).await,
        Action::Top => handle_top(params, client).await,
        Action::Search => handle_search(params, client).await,
        Action::Api => handle_api(params, client).await,
        Action::Help => Ok(handle_help()),
        Action::Unknown(name) => Ok(ToolResult::error(format!("Unknown action: {name}"))),
    };

    match outcome {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!("action failed: {err:#}");
            ToolResult::error(format!("Error: {err:#}"))
        }
    }
}

/// `drug` and `query` are interchangeable ways to name the drug.
fn requested_drug(params: &PartDParams) -> Option<&str> {
    params
        .drug
        .as_deref()
        .or(params.query.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

async fn handle_drug(params: &PartDParams, client: &CmsClient) -> Result<ToolResult> {
    let Some(drug_name) = requested_drug(params) else {
        return Ok(ToolResult::error("drug or query parameter required"));
    };

    if params.dataset.as_deref() == Some("annual") {
        let results = client.drug_spending_annual(drug_name).await?;
        let Some(record) = overall_or_first(&results) else {
            return Ok(ToolResult::text(format!(
                "No annual data found for '{drug_name}'"
            )));
        };
        return Ok(ToolResult::text(format_annual(record)));
    }

    let results = client.drug_spending_quarterly(drug_name).await?;
    let Some(record) = overall_or_first(&results) else {
        return Ok(ToolResult::text(format!(
            "No quarterly data found for '{drug_name}'"
        )));
    };
    Ok(ToolResult::text(format_quarterly(record)))
}

async fn handle_spending(params: &PartDParams, client: &CmsClient) -> Result<ToolResult> {
    let Some(drug_name) = requested_drug(params) else {
        return Ok(ToolResult::error(
            "drug or query parameter required for spending",
        ));
    };

    // Both fetches run concurrently and both must succeed.
    let (quarterly, annual) = try_join(
        client.drug_spending_quarterly(drug_name),
        client.drug_spending_annual(drug_name),
    )
    .await?;

    if quarterly.is_empty() && annual.is_empty() {
        return Ok(ToolResult::text(format!(
            "No spending data found for '{drug_name}'"
        )));
    }

    let mut lines = vec![format!("# Spending Analysis: {drug_name}\n")];

    if let Some(q) = overall_or_first(&quarterly) {
        lines.push("## Current (2024 Q1-Q4)\n".to_string());
        lines.push(format_quarterly(q));
    }

    if let Some(a) = overall_or_first(&annual) {
        lines.push("\n## Historical Trends\n".to_string());
        lines.push(format_annual(a));
    }

    Ok(ToolResult::text(lines.join("\n")))
}

/// Per-brand rollup for the NPI view of the prescribers action.
#[derive(Debug, Default, Clone, Copy)]
struct BrandRollup {
    claims: i64,
    cost: f64,
}

/// Sum claims and cost per distinct brand, sorted descending by summed cost.
fn rollup_by_brand(rows: &[PrescriberByDrug]) -> Vec<(String, BrandRollup)> {
    let mut by_brand: HashMap<String, BrandRollup> = HashMap::new();
    for row in rows {
        let entry = by_brand.entry(row.brand_name.clone()).or_default();
        entry.claims += parse_count(&row.total_claims);
        entry.cost += parse_amount(&row.total_drug_cost);
    }

    let mut sorted: Vec<_> = by_brand.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cost.total_cmp(&a.1.cost));
    sorted
}

async fn handle_prescribers(params: &PartDParams, client: &CmsClient) -> Result<ToolResult> {
    // NPI mode: aggregate one provider's rows across drugs.
    if let Some(npi) = params.npi.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let results = client.prescriber_by_npi(npi).await?;
        let Some(provider) = results.first() else {
            return Ok(ToolResult::text(format!(
                "No prescriber found with NPI {npi}"
            )));
        };

        let mut lines = vec![format!("# Prescriber NPI: {npi}\n")];
        lines.push(format!("**{}**", prescriber_name(provider)));
        lines.push(format!(
            "{} - {}, {}\n",
            provider.prescriber_type, provider.city, provider.state
        ));
        lines.push("## Top Prescribed Drugs\n".to_string());

        for (brand, rollup) in rollup_by_brand(&results).into_iter().take(10) {
            lines.push(format!(
                "- **{brand}**: {} claims, {}",
                rollup.claims,
                format_currency(rollup.cost)
            ));
        }

        return Ok(ToolResult::text(lines.join("\n")));
    }

    // Drug mode: list individual prescriber rows verbatim.
    let Some(drug_name) = requested_drug(params) else {
        return Ok(ToolResult::error("drug, query, or npi parameter required"));
    };

    let max_results = params.max_results.unwrap_or(10);
    let state = params.state.as_deref();
    let results = client
        .prescribers_for_drug(drug_name, state, max_results)
        .await?;

    if results.is_empty() {
        let suffix = state.map(|s| format!(" in {s}")).unwrap_or_default();
        return Ok(ToolResult::text(format!(
            "No prescribers found for '{drug_name}'{suffix}"
        )));
    }

    let suffix = state.map(|s| format!(" ({s})")).unwrap_or_default();
    let mut lines = vec![format!("# Top Prescribers: {drug_name}{suffix}\n")];

    for p in results.iter().take(max_results) {
        lines.push(format_prescriber(p));
        lines.push(String::new());
    }

    Ok(ToolResult::text(lines.join("\n")))
}

async fn handle_top(params: &PartDParams, client: &CmsClient) -> Result<ToolResult> {
    let max_results = params.max_results.unwrap_or(20);
    let results = client.top_drugs_by_spending(max_results).await?;

    let mut lines = vec!["# Top Medicare Part D Drugs by Spending (2024)\n".to_string()];
    lines.push("| Rank | Drug | Generic | Spending | Beneficiaries |".to_string());
    lines.push("|------|------|---------|----------|---------------|".to_string());

    for (i, d) in results.iter().enumerate() {
        lines.push(format!(
            "| {} | {} | {} | {} | {} |",
            i + 1,
            d.brand_name,
            d.generic_name,
            format_currency(parse_amount(&d.total_spending)),
            format_count(&d.total_beneficiaries)
        ));
    }

    let source_year = results
        .first()
        .map(|d| d.year.as_str())
        .filter(|y| !y.is_empty())
        .unwrap_or("2024");
    lines.push(format!(
        "\n_Source: CMS Medicare Part D Spending Data ({source_year})_"
    ));

    Ok(ToolResult::text(lines.join("\n")))
}

/// Deduplicate by brand name, keeping only the first-seen aggregate row per
/// brand. A brand whose duplicates carry no aggregate row drops out entirely.
fn dedupe_overall_by_brand(rows: Vec<DrugSpendingQuarterly>) -> Vec<DrugSpendingQuarterly> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|d| {
            if !seen.insert(d.brand_name.clone()) {
                return false;
            }
            d.manufacturer == OVERALL_MANUFACTURER
        })
        .collect()
}

async fn handle_search(params: &PartDParams, client: &CmsClient) -> Result<ToolResult> {
    let Some(query) = params
        .query
        .as_deref()
        .or(params.drug.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Ok(ToolResult::error("query parameter required for search"));
    };

    let max_results = params.max_results.unwrap_or(15);
    let results = client.search_drug(query, max_results).await?;

    if results.is_empty() {
        return Ok(ToolResult::text(format!(
            "No drugs found matching '{query}'"
        )));
    }

    // A non-empty fetch can dedupe to nothing; that renders as an empty list,
    // not the empty-state message above.
    let unique = dedupe_overall_by_brand(results);

    let mut lines = vec![format!("# Search Results: '{query}'\n")];
    for d in unique.iter().take(max_results) {
        lines.push(format!(
            "- **{}** ({}): {} total, {} beneficiaries",
            d.brand_name,
            d.generic_name,
            format_currency(parse_amount(&d.total_spending)),
            format_count(&d.total_beneficiaries)
        ));
    }
    lines.push("\nUse {\"action\": \"drug\", \"drug\": \"...\"} for full details.".to_string());

    Ok(ToolResult::text(lines.join("\n")))
}

/// Friendly dataset aliases for the `api` action; unknown names pass through
/// verbatim as literal dataset identifiers.
fn resolve_dataset_alias(alias: &str) -> &str {
    match alias {
        "quarterly" => SPENDING_QUARTERLY,
        "annual" => SPENDING_ANNUAL,
        "prescriber" => PRESCRIBER_BY_DRUG,
        "prescriber-provider" => PRESCRIBER_BY_PROVIDER,
        "prescriber-geo" => PRESCRIBER_BY_GEO,
        other => other,
    }
}

async fn handle_api(params: &PartDParams, client: &CmsClient) -> Result<ToolResult> {
    let dataset_id = resolve_dataset_alias(params.dataset.as_deref().unwrap_or("quarterly"));

    // A path mentioning stats routes to the dataset stats endpoint instead of
    // a row query.
    if params
        .path
        .as_deref()
        .is_some_and(|p| p.contains("stats"))
    {
        let stats = client.dataset_stats(dataset_id).await?;
        return Ok(ToolResult::text(serde_json::to_string_pretty(&stats)?));
    }

    let mut api_params = Vec::new();
    if let Some(query) = params.query.as_deref() {
        api_params.push(("keyword".to_string(), query.to_string()));
    }
    let size = params.max_results.unwrap_or(10);
    api_params.push(("size".to_string(), size.to_string()));

    let result = client.api_request(dataset_id, api_params).await?;
    Ok(ToolResult::text(serde_json::to_string_pretty(&result)?))
}

fn handle_help() -> ToolResult {
    ToolResult::text(
        r#"# Medicare Part D Query Tool

Access CMS Medicare Part D drug spending and prescriber data.

## Actions

**drug** - Get drug spending details
  {"action": "drug", "drug": "Ozempic"}
  {"action": "drug", "drug": "Eliquis", "dataset": "annual"}

**spending** - Full spending analysis (quarterly + trends)
  {"action": "spending", "drug": "Humira"}

**prescribers** - Find prescribers for a drug or by NPI
  {"action": "prescribers", "drug": "Ozempic", "state": "CA"}
  {"action": "prescribers", "npi": "1234567890"}

**top** - Top drugs by total spending
  {"action": "top", "max_results": 20}

**search** - Search drugs by name
  {"action": "search", "query": "insulin"}

**api** - Raw CMS Data API access
  {"action": "api", "dataset": "quarterly", "query": "metformin"}

## Datasets

| Name | Description | Data |
|------|-------------|------|
| quarterly | Part D Spending by Drug | 2024 Q1-Q4 |
| annual | Part D Spending Trends | 2019-2023 |
| prescriber | Prescribers by Drug | 2022 |

## More Info
- CMS Data: https://data.cms.gov
- Part D Dashboard: https://data.cms.gov/tools/medicare-part-d-drug-spending-dashboard"#,
    )
}
