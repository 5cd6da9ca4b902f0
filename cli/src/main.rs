mod dashboard_cmd;
mod donors_cmd;
mod login_cmd;

use clap::Parser;
use clap::Subcommand;
use hemolink_core::ClientConfig;
use hemolink_core::build_api;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "hemolink",
    about = "Blood donor coordination platform client",
    version
)]
struct Cli {
    /// Backend origin, e.g. http://localhost:8000. Overrides HEMOLINK_API_URL.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the access credential.
    Login {
        #[arg(long)]
        username: Option<String>,
    },
    /// Log out and discard the stored credential.
    Logout,
    /// Load the dashboard and print it; --watch keeps it live.
    Dashboard {
        #[arg(long)]
        watch: bool,
    },
    /// List and search registered donors.
    Donors {
        /// Filter by blood group, e.g. O- or AB+.
        #[arg(long)]
        blood_group: Option<String>,
        /// Filter by city (case-insensitive).
        #[arg(long)]
        city: Option<String>,
        /// Only donors currently eligible to donate again.
        #[arg(long)]
        available: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hemolink=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::default();
    if let Some(api_url) = cli.api_url {
        config = ClientConfig {
            base_url: api_url.trim_end_matches('/').to_string(),
            ..config
        };
    }
    let api = build_api(&config)?;

    match cli.command {
        Command::Login { username } => login_cmd::run_login(&api, username).await,
        Command::Logout => login_cmd::run_logout(&api).await,
        Command::Dashboard { watch } => dashboard_cmd::run(api, &config, watch).await,
        Command::Donors {
            blood_group,
            city,
            available,
        } => donors_cmd::run(&api, blood_group, city, available).await,
    }
}
