use anyhow::{Context, Result, anyhow};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;

// CMS Data API dataset UUIDs.
pub const SPENDING_QUARTERLY: &str = "4ff7c618-4e40-483a-b390-c8a58c94fa15";
pub const SPENDING_ANNUAL: &str = "7e0b4365-fd63-4a29-8f5e-e0ac9f66a81b";
pub const PRESCRIBER_BY_DRUG: &str = "9552739e-3d05-4c1b-8eff-ecabf391e2e5";
pub const PRESCRIBER_BY_PROVIDER: &str = "14d8e8a9-7e9b-4370-a044-bf97c46b4b44";
pub const PRESCRIBER_BY_GEO: &str = "c8ea3f8e-3a09-4fea-86f2-8902fb4b0920";

/// Manufacturer value marking the summary row across all manufacturers,
/// as opposed to per-manufacturer breakdown rows.
pub const OVERALL_MANUFACTURER: &str = "Overall";

const DEFAULT_PAGE_SIZE: &str = "25";

/// One row of the Part D spending-by-drug dataset (2024 quarterly vintage).
/// Every value arrives as a JSON string, including the numeric columns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrugSpendingQuarterly {
    #[serde(default, rename = "Brnd_Name")]
    pub brand_name: String,
    #[serde(default, rename = "Gnrc_Name")]
    pub generic_name: String,
    #[serde(default, rename = "Mftr_Name")]
    pub manufacturer: String,
    #[serde(default, rename = "Year")]
    pub year: String,
    #[serde(default, rename = "Tot_Benes")]
    pub total_beneficiaries: String,
    #[serde(default, rename = "Tot_Clms")]
    pub total_claims: String,
    #[serde(default, rename = "Tot_Spndng")]
    pub total_spending: String,
    #[serde(default, rename = "Avg_Spnd_Per_Bene")]
    pub avg_spend_per_bene: String,
    #[serde(default, rename = "Avg_Spnd_Per_Clm")]
    pub avg_spend_per_claim: String,
    #[serde(default, rename = "Drug_Uses")]
    pub drug_uses: String,
}

/// One row of the multi-year spending trends dataset (2019-2023 vintage).
/// The two trend columns are decimal fractions and may be empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrugSpendingAnnual {
    #[serde(default, rename = "Brnd_Name")]
    pub brand_name: String,
    #[serde(default, rename = "Gnrc_Name")]
    pub generic_name: String,
    #[serde(default, rename = "Mftr_Name")]
    pub manufacturer: String,
    #[serde(default, rename = "Tot_Spndng_2023")]
    pub total_spending_2023: String,
    #[serde(default, rename = "Tot_Benes_2023")]
    pub total_beneficiaries_2023: String,
    #[serde(default, rename = "Tot_Clms_2023")]
    pub total_claims_2023: String,
    #[serde(default, rename = "Avg_Spnd_Per_Bene_2023")]
    pub avg_spend_per_bene_2023: String,
    #[serde(default, rename = "Chg_Avg_Spnd_Per_Dsg_Unt_22_23")]
    pub yoy_change: String,
    #[serde(default, rename = "CAGR_Avg_Spnd_Per_Dsg_Unt_19_23")]
    pub cagr: String,
}

/// One row of the prescribers-by-drug dataset. A single NPI appears once per
/// drug it prescribed. `first_name` is empty for organizational providers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrescriberByDrug {
    #[serde(default, rename = "Prscrbr_NPI")]
    pub npi: String,
    #[serde(default, rename = "Prscrbr_Last_Org_Name")]
    pub last_org_name: String,
    #[serde(default, rename = "Prscrbr_First_Name")]
    pub first_name: String,
    #[serde(default, rename = "Prscrbr_City")]
    pub city: String,
    #[serde(default, rename = "Prscrbr_State_Abrvtn")]
    pub state: String,
    #[serde(default, rename = "Prscrbr_Type")]
    pub prescriber_type: String,
    #[serde(default, rename = "Brnd_Name")]
    pub brand_name: String,
    #[serde(default, rename = "Gnrc_Name")]
    pub generic_name: String,
    #[serde(default, rename = "Tot_Clms")]
    pub total_claims: String,
    #[serde(default, rename = "Tot_Drug_Cst")]
    pub total_drug_cost: String,
    #[serde(default, rename = "Tot_Day_Suply")]
    pub total_day_supply: String,
}

/// Rows carrying a manufacturer column, so the aggregate-row lookup has one
/// definition instead of string comparisons scattered across handlers.
pub trait ManufacturerKeyed {
    fn manufacturer(&self) -> &str;
}

impl ManufacturerKeyed for DrugSpendingQuarterly {
    fn manufacturer(&self) -> &str {
        &self.manufacturer
    }
}

impl ManufacturerKeyed for DrugSpendingAnnual {
    fn manufacturer(&self) -> &str {
        &self.manufacturer
    }
}

/// Prefer the "Overall" aggregate row; fall back to the first row.
pub fn overall_or_first<T: ManufacturerKeyed>(records: &[T]) -> Option<&T> {
    records
        .iter()
        .find(|r| r.manufacturer() == OVERALL_MANUFACTURER)
        .or_else(|| records.first())
}

/// Parse a numeric CMS string column; empty or malformed values count as zero.
pub fn parse_amount(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}

/// Same, for integer count columns.
pub fn parse_count(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(0)
}

/// Keep only aggregate rows, sort descending by parsed spending, truncate.
/// If the input window holds fewer than `max_results` aggregate rows the
/// output is shorter; no re-fetch happens.
pub fn top_overall_by_spending(
    mut rows: Vec<DrugSpendingQuarterly>,
    max_results: usize,
) -> Vec<DrugSpendingQuarterly> {
    rows.retain(|d| d.manufacturer == OVERALL_MANUFACTURER);
    rows.sort_by(|a, b| {
        parse_amount(&b.total_spending).total_cmp(&parse_amount(&a.total_spending))
    });
    rows.truncate(max_results);
    rows
}

/// Exact case-insensitive state-code filter. Applied after the fetch because
/// the upstream keyword search cannot filter on this column.
pub fn filter_by_state(rows: Vec<PrescriberByDrug>, state: &str) -> Vec<PrescriberByDrug> {
    rows.into_iter()
        .filter(|p| p.state.eq_ignore_ascii_case(state))
        .collect()
}

/// Client for the CMS Data API. Each inbound request constructs its own
/// instance; there is no shared connection pool or cache across requests.
pub struct CmsClient {
    http: reqwest::Client,
    base_url: String,
}

impl CmsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        dataset_id: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Vec<T>> {
        if !params.iter().any(|(k, _)| k == "size") {
            params.push(("size".to_string(), DEFAULT_PAGE_SIZE.to_string()));
        }

        let url = format!("{}/{}/data", self.base_url, dataset_id);
        tracing::debug!("GET {url}");

        let resp = self
            .http
            .get(&url)
            .query(&params)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!(
                "CMS API error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown status")
            ));
        }

        resp.json::<Vec<T>>()
            .await
            .with_context(|| format!("decode CMS response from {url}"))
    }

    /// Search for drugs by brand or generic name.
    pub async fn search_drug(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<DrugSpendingQuarterly>> {
        self.request(
            SPENDING_QUARTERLY,
            vec![
                ("keyword".to_string(), query.to_string()),
                ("size".to_string(), max_results.to_string()),
            ],
        )
        .await
    }

    pub async fn drug_spending_quarterly(
        &self,
        drug_name: &str,
    ) -> Result<Vec<DrugSpendingQuarterly>> {
        self.request(
            SPENDING_QUARTERLY,
            vec![
                ("keyword".to_string(), drug_name.to_string()),
                ("size".to_string(), "10".to_string()),
            ],
        )
        .await
    }

    pub async fn drug_spending_annual(&self, drug_name: &str) -> Result<Vec<DrugSpendingAnnual>> {
        self.request(
            SPENDING_ANNUAL,
            vec![
                ("keyword".to_string(), drug_name.to_string()),
                ("size".to_string(), "10".to_string()),
            ],
        )
        .await
    }

    /// Top drugs by total spending across the aggregate rows. The upstream
    /// API cannot combine a manufacturer filter with a spending sort, so this
    /// over-fetches an unfiltered 2x window and filters/sorts client-side.
    pub async fn top_drugs_by_spending(
        &self,
        max_results: usize,
    ) -> Result<Vec<DrugSpendingQuarterly>> {
        let rows = self
            .request(
                SPENDING_QUARTERLY,
                vec![(
                    "size".to_string(),
                    max_results.saturating_mul(2).to_string(),
                )],
            )
            .await?;
        Ok(top_overall_by_spending(rows, max_results))
    }

    /// Prescribers matching a drug name, optionally narrowed to one state.
    /// The size limit applies to the upstream request, so a state filter can
    /// legitimately return fewer than `max_results` rows.
    pub async fn prescribers_for_drug(
        &self,
        drug_name: &str,
        state: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<PrescriberByDrug>> {
        let rows = self
            .request(
                PRESCRIBER_BY_DRUG,
                vec![
                    ("keyword".to_string(), drug_name.to_string()),
                    ("size".to_string(), max_results.to_string()),
                ],
            )
            .await?;

        Ok(match state {
            Some(state) => filter_by_state(rows, state),
            None => rows,
        })
    }

    /// All rows for one NPI; a prescriber appears once per drug prescribed.
    pub async fn prescriber_by_npi(&self, npi: &str) -> Result<Vec<PrescriberByDrug>> {
        self.request(
            PRESCRIBER_BY_DRUG,
            vec![
                ("keyword".to_string(), npi.to_string()),
                ("size".to_string(), "100".to_string()),
            ],
        )
        .await
    }

    /// Escape hatch: any dataset id, any parameters, no shape validation.
    pub async fn api_request(
        &self,
        dataset_id: &str,
        params: Vec<(String, String)>,
    ) -> Result<serde_json::Value> {
        let rows: Vec<serde_json::Value> = self.request(dataset_id, params).await?;
        Ok(serde_json::Value::Array(rows))
    }

    /// Dataset-level stats from the `/data/stats` endpoint (row counts etc.);
    /// the response shape is defined by the upstream API.
    pub async fn dataset_stats(&self, dataset_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/{}/data/stats", self.base_url, dataset_id);
        tracing::debug!("GET {url}");

        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!(
                "CMS API error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown status")
            ));
        }

        resp.json().await.with_context(|| format!("decode CMS response from {url}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quarterly(brand: &str, mftr: &str, spending: &str) -> DrugSpendingQuarterly {
        DrugSpendingQuarterly {
            brand_name: brand.to_string(),
            manufacturer: mftr.to_string(),
            total_spending: spending.to_string(),
            ..Default::default()
        }
    }

    fn prescriber(npi: &str, state: &str) -> PrescriberByDrug {
        PrescriberByDrug {
            npi: npi.to_string(),
            state: state.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn overall_or_first_prefers_aggregate_row() {
        let rows = vec![
            quarterly("Ozempic", "Novo Nordisk", "100"),
            quarterly("Ozempic", "Overall", "500"),
        ];
        let picked = overall_or_first(&rows).unwrap();
        assert_eq!(picked.manufacturer, "Overall");
    }

    #[test]
    fn overall_or_first_falls_back_to_first_row() {
        let rows = vec![
            quarterly("Ozempic", "Novo Nordisk", "100"),
            quarterly("Ozempic", "Sandoz", "50"),
        ];
        let picked = overall_or_first(&rows).unwrap();
        assert_eq!(picked.manufacturer, "Novo Nordisk");
    }

    #[test]
    fn overall_or_first_empty_is_none() {
        let rows: Vec<DrugSpendingQuarterly> = Vec::new();
        assert!(overall_or_first(&rows).is_none());
    }

    #[test]
    fn top_overall_keeps_only_aggregate_rows_sorted_descending() {
        let rows = vec![
            quarterly("A", "Overall", "1000.5"),
            quarterly("B", "Pfizer", "99999"),
            quarterly("C", "Overall", "2500000"),
            quarterly("D", "Overall", "300"),
        ];
        let top = top_overall_by_spending(rows, 10);
        assert_eq!(top.len(), 3);
        assert!(top.iter().all(|d| d.manufacturer == "Overall"));
        let spends: Vec<f64> = top.iter().map(|d| parse_amount(&d.total_spending)).collect();
        assert!(spends.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(top[0].brand_name, "C");
    }

    #[test]
    fn top_overall_truncates_to_max_results() {
        let rows: Vec<_> = (0..12)
            .map(|i| quarterly(&format!("D{i}"), "Overall", &format!("{}", i * 10)))
            .collect();
        assert_eq!(top_overall_by_spending(rows, 5).len(), 5);
    }

    #[test]
    fn top_overall_under_returns_when_window_is_thin() {
        // Only one aggregate row in the over-fetched window: result is short.
        let rows = vec![
            quarterly("A", "Overall", "100"),
            quarterly("B", "Pfizer", "200"),
        ];
        assert_eq!(top_overall_by_spending(rows, 5).len(), 1);
    }

    #[test]
    fn state_filter_is_case_insensitive() {
        let rows = vec![
            prescriber("1111111111", "CA"),
            prescriber("2222222222", "ca"),
            prescriber("3333333333", "NY"),
        ];
        let filtered = filter_by_state(rows, "Ca");
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|p| p.state.eq_ignore_ascii_case("CA")));
    }

    #[test]
    fn parse_amount_tolerates_junk() {
        assert_eq!(parse_amount("1234.5"), 1234.5);
        assert_eq!(parse_amount(" 10 "), 10.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("n/a"), 0.0);
    }

    #[test]
    fn records_deserialize_from_cms_column_names() {
        let raw = r#"[{
            "Brnd_Name": "Ozempic",
            "Gnrc_Name": "Semaglutide",
            "Mftr_Name": "Overall",
            "Year": "2024",
            "Tot_Benes": "1500000",
            "Tot_Clms": "9000000",
            "Tot_Spndng": "9100000000.25",
            "Avg_Spnd_Per_Bene": "6066.67",
            "Avg_Spnd_Per_Clm": "1011.11",
            "Drug_Uses": "USES: Treats type 2 diabetes."
        }]"#;
        let rows: Vec<DrugSpendingQuarterly> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows[0].brand_name, "Ozempic");
        assert_eq!(parse_amount(&rows[0].total_spending), 9100000000.25);
    }

    #[test]
    fn missing_columns_default_to_empty_strings() {
        let rows: Vec<DrugSpendingAnnual> =
            serde_json::from_str(r#"[{"Brnd_Name": "Eliquis"}]"#).unwrap();
        assert_eq!(rows[0].brand_name, "Eliquis");
        assert!(rows[0].yoy_change.is_empty());
        assert!(rows[0].cagr.is_empty());
    }
}
