use clap::{Parser, ValueEnum};
use std::time::Duration;

/// Card-issuing backend
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerKind {
    /// In-process simulated provider
    Mock,
    /// Stripe Issuing REST API
    Stripe,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "ghostcard-server")]
#[command(about = "Ghost card issuing and transaction authorization service")]
#[command(version)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://ghostcards.db")]
    pub database_url: String,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value = "5")]
    pub db_max_connections: u32,

    /// Currency for cards and charges that don't name one
    #[arg(long, env = "DEFAULT_CURRENCY", default_value = "usd")]
    pub default_currency: String,

    #[arg(long, env = "ISSUER", value_enum, default_value = "mock")]
    pub issuer: IssuerKind,

    /// Secret API key, required with `--issuer stripe`
    #[arg(long, env = "STRIPE_SECRET_KEY", hide_env_values = true)]
    pub stripe_secret_key: Option<String>,

    #[arg(long, env = "STRIPE_API_BASE", default_value = "https://api.stripe.com")]
    pub stripe_api_base: String,

    /// Timeout for card-issuing provider requests, in seconds
    #[arg(long, env = "ISSUER_TIMEOUT_SECS", default_value = "10")]
    pub issuer_timeout_secs: u64,

    /// How often a charge is re-evaluated after losing a concurrent write
    #[arg(long, env = "CHARGE_MAX_RETRIES", default_value = "3")]
    pub charge_max_retries: u32,

    /// Interval of the background expiry sweep in seconds (0 disables it)
    #[arg(long, env = "EXPIRY_SWEEP_SECS", default_value = "0")]
    pub expiry_sweep_secs: u64,
}

impl Config {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn issuer_timeout(&self) -> Duration {
        Duration::from_secs(self.issuer_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.expiry_sweep_secs > 0).then(|| Duration::from_secs(self.expiry_sweep_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::parse_from([
            "ghostcard-server",
            "--port",
            "9000",
            "--issuer",
            "stripe",
            "--stripe-secret-key",
            "sk_test_123",
            "--expiry-sweep-secs",
            "60",
        ]);

        assert_eq!(config.socket_addr(), format!("{}:9000", config.host));
        assert_eq!(config.issuer, IssuerKind::Stripe);
        assert_eq!(config.stripe_secret_key.as_deref(), Some("sk_test_123"));
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_sweep_disabled_at_zero() {
        let config = Config::parse_from(["ghostcard-server", "--expiry-sweep-secs", "0"]);
        assert_eq!(config.sweep_interval(), None);
    }
}
