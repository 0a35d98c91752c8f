use std::future::Future;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use devflow_core::auth::{
    AuthError, AuthorityEndpoints, CancelHandle, DeviceFlowDetails, DeviceFlowManager,
};
use devflow_core::config::{AuthConfig, TokenConfig};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mint personal access tokens through the OAuth device flow"
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in with a device code and mint a personal access token
    Login(LoginArgs),
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Account URL (e.g. https://dev.azure.com/my-org)
    account_url: String,
    /// Client id registered with the identity provider
    #[arg(long = "client-id", env = "DEVFLOW_CLIENT_ID")]
    client_id: String,
    /// Redirect URI registered for the client
    #[arg(long = "redirect-uri", env = "DEVFLOW_REDIRECT_URI")]
    redirect_uri: String,
    /// Resource requested from the identity provider
    #[arg(long = "authority-host", env = "DEVFLOW_AUTHORITY_HOST")]
    authority_host: Option<String>,
    /// Identity provider base URL
    #[arg(long = "login-url", env = "DEVFLOW_LOGIN_URL")]
    login_url: Option<Url>,
    /// Space separated token scopes (empty for all scopes)
    #[arg(long, env = "DEVFLOW_SCOPE", default_value = "")]
    scope: String,
    /// Display name of the minted token
    #[arg(long, env = "DEVFLOW_TOKEN_DESCRIPTION")]
    description: Option<String>,
    /// Open the verification URL in the system browser
    #[arg(long)]
    open: bool,
    /// Exit with an error instead of quietly when interrupted
    #[arg(long = "fail-on-cancel")]
    fail_on_cancel: bool,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Login(args) => login(args).await?,
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn login(args: LoginArgs) -> Result<()> {
    let mut manager = DeviceFlowManager::with_endpoints(
        &args.account_url,
        build_auth_config(&args),
        build_token_config(&args),
        args.login_url
            .clone()
            .map(AuthorityEndpoints::new)
            .unwrap_or_default(),
    )
    .context("invalid device flow configuration")?;

    let details = manager
        .get_device_flow_details()
        .await
        .context("failed to start device flow")?;
    print_details(&details);

    if args.open {
        if let Err(err) = open::that(details.verification_url.as_str()) {
            eprintln!("Failed to launch browser ({err}); open the URL above manually.");
        }
    }

    let interrupt = tokio::spawn(watch_interrupts(
        manager.cancel_handle(),
        args.fail_on_cancel,
        || async { tokio::signal::ctrl_c().await.is_ok() },
        || std::process::exit(EXIT_INTERRUPTED),
    ));

    let result = manager.wait_for_personal_access_token().await;
    interrupt.abort();

    let token = match result {
        Ok(Some(token)) => token,
        Ok(None) => {
            eprintln!("Sign-in cancelled.");
            return Ok(());
        }
        Err(AuthError::CodeExpired) => {
            return Err(anyhow!(
                "the device code expired before sign-in completed; run login again"
            ));
        }
        Err(err) => return Err(err).context("device flow failed"),
    };

    if args.json {
        let payload = json!({
            "account": manager.account_url().as_str(),
            "tenant": manager.tenant(),
            "token": token,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{token}");
    }
    Ok(())
}

/// First interrupt cancels the flow at its next checkpoint; a second one
/// aborts immediately instead of waiting out the current poll interval.
async fn watch_interrupts<Signal, SignalFut, Abort>(
    handle: CancelHandle,
    fail_on_cancel: bool,
    mut next_signal: Signal,
    abort: Abort,
) where
    Signal: FnMut() -> SignalFut,
    SignalFut: Future<Output = bool>,
    Abort: FnOnce(),
{
    if !next_signal().await {
        return;
    }
    warn!("interrupt received; stopping after the current poll (press Ctrl-C again to exit now)");
    handle.cancel(fail_on_cancel);

    if next_signal().await {
        eprintln!("Interrupted.");
        abort();
    }
}

fn build_auth_config(args: &LoginArgs) -> AuthConfig {
    let mut config = AuthConfig::new(args.client_id.trim(), args.redirect_uri.trim());
    if let Some(host) = non_blank(args.authority_host.as_deref()) {
        config = config.with_authority_host(host);
    }
    config
}

fn build_token_config(args: &LoginArgs) -> TokenConfig {
    let mut config = TokenConfig::default().with_scope(args.scope.trim());
    if let Some(description) = non_blank(args.description.as_deref()) {
        config = config.with_description(description);
    }
    config
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn print_details(details: &DeviceFlowDetails) {
    eprintln!("\n{}\n", details.message);
    eprintln!("  Code: {}", details.user_code);
    eprintln!("  URL:  {}\n", details.verification_url);
}
