use clap::Parser;
use response_gateway::{
    config::{parse_api_keys, AnthropicConfig, GatewayConfig, OpenAiConfig},
    observability::logging::{init_logging, LoggingConfig},
    server, version,
};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "response-gateway")]
#[command(version = version::VERSION)]
#[command(about = "Responses API gateway over Anthropic and OpenAI-compatible backends")]
struct Cli {
    /// Bind address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Comma-separated bearer tokens; empty accepts any token (dev mode)
    #[arg(long, env = "API_KEYS")]
    api_keys: Option<String>,

    /// Postgres connection string, or "memory" for the in-process store
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = "https://api.anthropic.com")]
    anthropic_base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// Maximum request body size in bytes
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    max_payload_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            host: self.host,
            port: self.port,
            api_keys: parse_api_keys(self.api_keys.as_deref()),
            database_url: self.database_url,
            anthropic: self.anthropic_api_key.map(|api_key| AnthropicConfig {
                api_key,
                base_url: self.anthropic_base_url,
            }),
            openai: self.openai_api_key.map(|api_key| OpenAiConfig {
                api_key,
                base_url: self.openai_base_url,
            }),
            max_payload_size: self.max_payload_size,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = cli.log_level.parse::<Level>().unwrap_or(Level::INFO);
    init_logging(&LoggingConfig {
        level,
        json_format: cli.log_json,
        colorize: !cli.log_json,
    });

    if let Err(err) = server::startup(cli.into_config()).await {
        eprintln!("startup failed: {}", err);
        std::process::exit(1);
    }
}
