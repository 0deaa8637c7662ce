use clap::Parser;

pub const CMS_BASE_URL: &str = "https://data.cms.gov/data-api/v1/dataset";

#[derive(Parser, Debug, Clone)]
#[command(name = "partd-backend")]
#[command(about = "Medicare Part D drug spending & prescriber query backend", long_about = None)]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8788)]
    pub port: u16,

    /// CMS Data API base URL (override when pointing at a local fixture server).
    #[arg(long, default_value = CMS_BASE_URL)]
    pub base_url: String,
}
