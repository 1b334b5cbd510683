#![warn(clippy::all, rust_2018_idioms)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use awsc::app::aws_context::CallerContext;
use awsc::app::error::AwscError;
use awsc::app::login::{LoginFlow, LoginOptions, LoginOutcome, LoginReauthenticator, SdkBackend};
use awsc::app::picker::PromptPicker;
use awsc::app::reauth::run_with_reauth;
use awsc::app::settings::{self, AwscPaths, REGION_ENV};
use awsc::app::AppContext;

const DEFAULT_LOG_FILTER: &str = "awsc=info,aws_config=warn,aws_smithy_runtime=warn,aws_smithy_runtime_api=warn,hyper=warn";
const VERBOSE_LOG_FILTER: &str = "awsc=debug,aws_config=info,aws_smithy_runtime=warn,aws_smithy_runtime_api=warn,hyper=warn";

/// Grace period between Ctrl-C and exit, for in-flight polling to unwind.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "awsc")]
#[command(about = "AWS SSO login with per-terminal account sessions")]
#[command(
    long_about = r#"AWS SSO login with per-terminal account sessions

USAGE:
  awsc config init               # Configure the SSO start URL and regions
  awsc login                     # Sign in and pick an account and role
  awsc switch-account            # Pick another account for this terminal
  awsc whoami                    # Show account, role and region in use"#
)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Region for AWS calls, overriding default_region
    #[arg(long, global = true, env = REGION_ENV)]
    region: Option<String>,

    /// Also log to stderr at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Re-authenticate without asking
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with AWS SSO and select account/role
    Login {
        /// Force re-authentication by clearing cached tokens
        #[arg(long)]
        force: bool,

        /// Account id or name to select
        #[arg(long)]
        account: Option<String>,

        /// Role name to select
        #[arg(long)]
        role: Option<String>,
    },

    /// Select a different account for this terminal
    SwitchAccount,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the AWS account, role and region in use
    Whoami,

    /// Inspect and clean up terminal sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create or replace the configuration file
    Init,
    /// Show the current configuration
    Show,
}

#[derive(Subcommand)]
enum SessionsAction {
    /// Remove sessions of terminals that have closed
    Clean,
    /// Show the session of this terminal
    Show,
}

fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "", "awsc").map(|dirs| dirs.data_dir().join("logs"))
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { VERBOSE_LOG_FILTER } else { DEFAULT_LOG_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = log_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        let log_path = dir.join("awsc.log");
        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .ok()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&log_path, std::fs::Permissions::from_mode(0o600)) {
                eprintln!("[SECURITY] Failed to set log file permissions: {}", e);
            }
        }

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false),
        )
    });

    let stderr_layer = verbose.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let crash_msg = format!(
            "awsc crashed!\n\
             Panic occurred at: {}\n\
             Details: {}\n\
             Backtrace:\n{:?}\n",
            panic_info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "unknown location".to_string()),
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_info.payload().downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("unknown panic"),
            std::backtrace::Backtrace::force_capture()
        );

        eprintln!("\n{}", crash_msg);
        if let Some(dir) = log_dir() {
            let _ = std::fs::create_dir_all(&dir);
            let crash_log_path = dir.join("crash.log");
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&crash_log_path)
            {
                use std::io::Write;
                let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                let _ = writeln!(file, "\n=== CRASH at {} ===\n{}", timestamp, crash_msg);
                eprintln!("Crash log written to: {:?}", crash_log_path);
            }
        }
    }));
}

/// Cancel `token` on Ctrl-C, then exit if the command has not finished.
fn install_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            token.cancel();
            tokio::time::sleep(CANCEL_GRACE).await;
            eprintln!("\nCancelled.");
            std::process::exit(130);
        }
    });
}

fn paths_for(cli: &Cli) -> anyhow::Result<AwscPaths> {
    let paths = AwscPaths::from_home()?;
    Ok(match &cli.config {
        Some(path) => paths.with_config_file(path),
        None => paths,
    })
}

fn login_flow(ctx: AppContext) -> LoginFlow {
    LoginFlow::new(ctx, Arc::new(SdkBackend), Arc::new(PromptPicker))
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let paths = paths_for(&cli)?;

    match cli.command {
        Commands::Login { force, account, role } => {
            let ctx = AppContext::load(paths, cli.region)?;
            let options = LoginOptions { force, account, role };
            if let LoginOutcome::Cancelled = login_flow(ctx).run(&options, &cancel).await? {
                tracing::info!("Login cancelled at selection");
            }
        }

        Commands::SwitchAccount => {
            let ctx = AppContext::load(paths, cli.region)?;
            login_flow(ctx)
                .switch_account(&cancel)
                .await
                .context("error switching account")?;
        }

        Commands::Config { action: ConfigAction::Init } => {
            let stdin = std::io::stdin();
            settings::init_interactive(&paths, &mut stdin.lock(), &mut std::io::stdout())?;
        }

        Commands::Config { action: ConfigAction::Show } => {
            let ctx = AppContext::load(paths, cli.region)?;
            if !ctx.settings.is_configured() {
                println!("No configuration found at {}", ctx.paths.config_file.display());
                println!("Run 'awsc config init' to set up.");
                return Ok(());
            }
            println!("Configuration file: {}", ctx.paths.config_file.display());
            println!("Organization:   {}", ctx.settings.short_name());
            println!("SSO Start URL:  {}", ctx.settings.sso.start_url);
            println!("SSO Region:     {}", ctx.settings.sso.region);
            println!("Default Region: {}", ctx.settings.default_region);
        }

        Commands::Whoami => {
            let ctx = AppContext::load(paths.clone(), cli.region.clone())?;
            let reauth = LoginReauthenticator::new(
                ctx,
                Arc::new(SdkBackend),
                Arc::new(PromptPicker),
                cancel.clone(),
                cli.yes,
            );
            let caller = run_with_reauth(&reauth, || {
                let paths = paths.clone();
                let region = cli.region.clone();
                async move {
                    // Reloaded per attempt so a login in between is picked up
                    let ctx = AppContext::load(paths, region)?;
                    let config = ctx.resolver().load_sdk_config().await?;
                    let caller = CallerContext::fetch(&config).await?;
                    let name = ctx.account_names().name_for(&caller.account_id);
                    Ok::<_, AwscError>(caller.with_account_name(name))
                }
            })
            .await?;
            println!("{}", caller);
        }

        Commands::Sessions { action: SessionsAction::Clean } => {
            let ctx = AppContext::load(paths, cli.region)?;
            let removed = ctx.session_registry().sweep();
            println!("Removed {} stale session(s)", removed);
        }

        Commands::Sessions { action: SessionsAction::Show } => {
            let ctx = AppContext::load(paths, cli.region)?;
            match ctx.session_registry().current() {
                Ok(session) => {
                    println!("Profile: {}", session.profile_name);
                    println!("Account: {} ({})", session.account_name, session.account_id);
                    println!("Role:    {}", session.role_name);
                }
                Err(_) => println!("No active session for this terminal. Run 'awsc login'."),
            }
        }

        Commands::Version => {
            println!("awsc version {}", env!("CARGO_PKG_VERSION"));
            println!("commit: {} ({})", env!("GIT_COMMIT"), env!("GIT_BRANCH"));
            println!("built: {}", env!("AWSC_BUILD_DATE"));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_panic_handler();

    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::info!("awsc {} starting", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    install_ctrl_c(cancel.clone());

    let result = run(cli, cancel).await;
    if let Err(e) = &result {
        tracing::error!("Command failed: {:#}", e);
    }
    result
}
