use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Row store REST endpoint
    #[serde(default = "default_store_base_url")]
    pub store_base_url: String,

    /// Row store API token
    pub store_api_key: String,

    /// Row store base id (tables live under it)
    pub store_base_id: String,

    /// Records per batched store write
    #[serde(default = "default_store_write_batch_size")]
    pub store_write_batch_size: usize,

    /// Pause between store write requests, in milliseconds
    #[serde(default = "default_store_request_delay_ms")]
    pub store_request_delay_ms: u64,

    /// Mail provider API endpoint
    #[serde(default = "default_mail_base_url")]
    pub mail_base_url: String,

    /// Mail provider API key
    pub mail_api_key: String,

    /// Sender display name
    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    /// Sender address; must be verified with the mail provider
    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    /// Public base URL unsubscribe links point at
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Redis connection string for the attempt limiter. When unset the
    /// limiter is disabled and requests pass through.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Queue rows claimed per dispatch batch
    #[serde(default = "default_dispatch_batch_size")]
    pub dispatch_batch_size: usize,

    /// Pause between individual sends, in milliseconds
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// Wall-clock budget for one dispatch cycle, in seconds
    #[serde(default = "default_execution_budget_secs")]
    pub execution_budget_secs: u64,

    /// How long a queue row claim shields it from other workers, in seconds
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// Attempts allowed per window before an address/IP is throttled
    #[serde(default = "default_rate_limit_max_attempts")]
    pub rate_limit_max_attempts: u32,

    /// Throttle window, in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_store_base_url() -> String {
    "https://api.airtable.com/v0".to_string()
}

fn default_store_write_batch_size() -> usize {
    10
}

fn default_store_request_delay_ms() -> u64 {
    200
}

fn default_mail_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_sender_name() -> String {
    "NANKANアナリティクス".to_string()
}

fn default_sender_email() -> String {
    "noreply@keiba.link".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_dispatch_batch_size() -> usize {
    100
}

fn default_send_interval_ms() -> u64 {
    125
}

fn default_execution_budget_secs() -> u64 {
    780
}

fn default_lease_duration_secs() -> u64 {
    900
}

fn default_rate_limit_max_attempts() -> u32 {
    5
}

fn default_rate_limit_window_secs() -> u64 {
    900
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Row store URL with the base id folded in.
    pub fn store_url(&self) -> String {
        format!(
            "{}/{}",
            self.store_base_url.trim_end_matches('/'),
            self.store_base_id
        )
    }
}
