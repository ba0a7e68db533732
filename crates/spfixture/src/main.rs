use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use spfixture_core::admin::{AdminClient, AdminClientConfig, admin_base_url};
use spfixture_core::auth::{NetworkCredential, select_credentials};
use spfixture_core::config::{
    RunSettings, SettingsOverrides, ToolConfig, config_path, load_config,
};
use spfixture_core::dispatch::{EngineContext, run_action_file};
use spfixture_core::rest::RestConnector;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV: &str = "SPFIXTURE_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "spfixture",
    version,
    about = "Replay a JSON action file against SharePoint to provision test fixtures"
)]
struct Cli {
    #[arg(short = 'd', long, value_name = "DOMAIN", help = "Network domain of the account")]
    domain: Option<String>,
    #[arg(short = 'u', long, value_name = "NAME", help = "Account used for every call")]
    username: Option<String>,
    #[arg(
        short = 'p',
        long,
        value_name = "PASSWORD",
        help = "Account password (prompted for when omitted)"
    )]
    password: Option<String>,
    #[arg(
        short = 'w',
        long,
        value_name = "URL",
        help = "Web application URL; selects claims sign-in for SharePoint Online"
    )]
    web_application_url: Option<String>,
    #[arg(short = 'P', long, value_name = "PORT", help = "Central administration port")]
    port: Option<u16>,
    #[arg(short = 'a', long, value_name = "PATH", help = "JSON action file to replay")]
    action_file: PathBuf,
}

impl Cli {
    fn overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            domain: self.domain,
            username: self.username,
            password: self.password,
            web_application_url: self.web_application_url,
            admin_port: self.port,
            action_file: self.action_file,
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var(LOG_ENV).unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(failure) = run(cli) {
        error!(error = %format!("{failure:#}"), "run aborted");
        return Err(failure);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let path = config_path();
    let config = load_config(&path)?;
    let settings = RunSettings::resolve(cli.overrides(), &config)?;

    let credentials = select_credentials(
        &settings.web_application_url,
        &settings.domain,
        &settings.username,
        settings.password.clone(),
        prompt_password,
    )?;
    info!(
        scheme = credentials.scheme(),
        url = %settings.web_application_url,
        "authenticating"
    );

    let admin = admin_client(&settings, &config, credentials.password())?;
    let sessions = RestConnector::new(credentials, config.http_settings());
    let ctx = EngineContext {
        sessions: &sessions,
        admin: &admin,
    };

    let summary = run_action_file(&ctx, &settings.action_file)?;
    println!(
        "{} action(s) completed; results written to {}",
        summary.results.len(),
        summary.output_path.display()
    );
    Ok(())
}

fn admin_client(settings: &RunSettings, config: &ToolConfig, password: &str) -> Result<AdminClient> {
    let base_url = admin_base_url(&settings.web_application_url, settings.admin_port)?;
    AdminClient::new(AdminClientConfig {
        base_url,
        credential: NetworkCredential {
            domain: settings.domain.clone(),
            username: settings.username.clone(),
            password: password.to_string(),
        },
        user_agent: config.user_agent(),
        timeout: config.timeout(),
    })
}

fn prompt_password(username: &str) -> Result<String> {
    inquire::Password::new(&format!("Password for {username}:"))
        .without_confirmation()
        .with_display_mode(inquire::PasswordDisplayMode::Masked)
        .prompt()
        .context("failed to read password")
}
