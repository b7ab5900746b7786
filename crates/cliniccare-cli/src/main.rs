//! ClinicCare CLI - command-line access to the ClinicCare records system.
//!
//! Sessions persist between invocations: `login` stores the refresh cookie
//! in the OS keychain and leaves a session marker in the cache directory, so
//! later commands restore the session with a silent refresh.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use cliniccare_core::auth::{FileMarker, KeychainCookieStore};
use cliniccare_core::models::{ListQuery, LoginRequest, SortDirection};
use cliniccare_core::utils::{format_date, format_datetime, format_optional, truncate_string};
use cliniccare_core::{
    ApiClient, ApiError, Config, HttpTransport, Navigation, Route, RouterGuard, SessionStore,
};

// ============================================================================
// Constants
// ============================================================================

/// Environment variables consulted by `login`
const EMAIL_ENV: &str = "CLINICCARE_EMAIL";
const PASSWORD_ENV: &str = "CLINICCARE_PASSWORD";

/// Log file name in cache directory
const LOG_FILE: &str = "cliniccare.log";

/// Column width for free-text columns in table output
const TEXT_COLUMN_WIDTH: usize = 40;

/// Command-line access to the ClinicCare records system
#[derive(Parser, Debug)]
#[command(name = "cliniccare", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and remember the session
    Login {
        /// Defaults to CLINICCARE_EMAIL, then the last email used
        email: Option<String>,
    },
    /// End the session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Show session state
    Status,
    /// Check the API server
    Health,
    /// List staff accounts (admin)
    Users {
        search: Option<String>,
    },
    /// List consultations, newest first
    Consultations {
        search: Option<String>,
    },
    /// Show one consultation
    Consultation {
        id: Uuid,
    },
    /// Search ICD-10 codes
    Diagnoses {
        search: Option<String>,
    },
}

type Session = SessionStore<HttpTransport>;
type Client = ApiClient<HttpTransport, Session>;

/// Initialize the tracing subscriber for logging.
///
/// Warnings go to stderr (override with RUST_LOG); everything at debug and
/// above is also written to a log file in the cache directory.
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(stderr_filter);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("cliniccare_core=debug,cliniccare_cli=debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    let log_dir = std::fs::create_dir_all(&cache_dir).ok().map(|_| cache_dir.clone());
    let _log_guard = init_tracing(log_dir.as_ref());

    info!(command = ?cli.command, api_url = %config.api_url, "ClinicCare CLI starting");

    let transport = Arc::new(HttpTransport::new(&config.api_url, config.request_timeout())?);
    let session = Arc::new(SessionStore::new(
        transport.clone(),
        Arc::new(FileMarker::new(cache_dir)),
        Arc::new(KeychainCookieStore::new(&config.api_url)),
    ));
    let client = ApiClient::new(transport, session.clone(), config.retry_policy());
    let guard = RouterGuard::new(session.clone());

    match cli.command {
        Command::Login { email } => login(config, &session, &guard, email).await?,
        Command::Logout => logout(&session, &guard).await?,
        Command::Status => status(&session, &guard).await?,
        Command::Health => return health(&client).await,
        Command::Whoami => {
            require(&guard, Route::Home).await?;
            whoami(&session)?
        }
        Command::Users { search } => {
            require(&guard, Route::Users).await?;
            users(&client, search.as_deref()).await?
        }
        Command::Consultations { search } => {
            require(&guard, Route::Consultations).await?;
            consultations(&client, search.as_deref()).await?
        }
        Command::Consultation { id } => {
            require(&guard, Route::Consultation(id)).await?;
            consultation(&client, id).await?
        }
        Command::Diagnoses { search } => {
            require(&guard, Route::Diagnoses).await?;
            diagnoses(&client, search.as_deref()).await?
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Run the route guard; a redirect to the login page becomes an error
async fn require(guard: &RouterGuard<HttpTransport>, route: Route) -> Result<()> {
    match guard.before_each(&route).await {
        Navigation::Allow => Ok(()),
        Navigation::Redirect(Route::Login) => Err(anyhow::anyhow!(
            "Not logged in. Run `cliniccare login` first."
        )),
        Navigation::Redirect(other) => Err(anyhow::anyhow!("Cannot open {}, redirected to {}", route, other)),
    }
}

/// Convert an API error into a user-facing message
fn describe(err: ApiError, default: &str) -> anyhow::Error {
    if matches!(err, ApiError::Refresh(_)) {
        return anyhow::anyhow!("Session expired. Please log in again.");
    }
    match err.detail() {
        Some(detail) => anyhow::anyhow!("{}: {}", default, detail),
        None => anyhow::Error::new(err).context(default.to_string()),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn login(
    mut config: Config,
    session: &Session,
    guard: &RouterGuard<HttpTransport>,
    email_arg: Option<String>,
) -> Result<()> {
    if guard.before_each(&Route::Login).await == Navigation::Redirect(Route::Home) {
        if let Some(user) = session.current_user() {
            println!("Already logged in as {}", user.email);
            return Ok(());
        }
    }

    let email = match email_arg
        .or_else(|| std::env::var(EMAIL_ENV).ok())
        .or_else(|| config.last_email.clone())
    {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(p) => p,
        Err(_) => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    if email.is_empty() || password.is_empty() {
        anyhow::bail!("Email and password required");
    }

    if !session.login(&LoginRequest::new(email.clone(), password)).await {
        anyhow::bail!("Login failed. Check your email and password.");
    }

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    match session.current_user() {
        Some(user) => println!("Logged in as {} ({})", user.display_name(), user.role.display_name()),
        None => println!("Logged in"),
    }
    Ok(())
}

async fn logout(session: &Session, guard: &RouterGuard<HttpTransport>) -> Result<()> {
    // Restore first so the server-side session is invalidated too
    let _ = guard.before_each(&Route::Home).await;
    session.logout().await;
    println!("Logged out");
    Ok(())
}

async fn status(session: &Session, guard: &RouterGuard<HttpTransport>) -> Result<()> {
    let _ = guard.before_each(&Route::Home).await;
    let state = session.snapshot();

    if !state.is_authenticated() {
        println!("Not logged in");
        return Ok(());
    }

    let who = state
        .current_user
        .as_ref()
        .map(|u| u.email.clone())
        .unwrap_or_else(|| "unknown user".to_string());
    match state.minutes_until_expiry() {
        Some(minutes) => println!("Logged in as {} (access token expires in {}m)", who, minutes),
        None => println!("Logged in as {}", who),
    }
    Ok(())
}

fn whoami(session: &Session) -> Result<()> {
    let user = session
        .current_user()
        .ok_or_else(|| anyhow::anyhow!("Current user unknown"))?;

    println!("Name:   {}", user.display_name());
    println!("Email:  {}", user.email);
    println!("Role:   {}", user.role.display_name());
    println!("Status: {}", user.status_display());
    Ok(())
}

async fn health(client: &Client) -> Result<ExitCode> {
    let status = client
        .health()
        .await
        .map_err(|e| describe(e, "Health check failed"))?;
    println!("API status: {}", status.status);
    if !status.is_ok() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn users(client: &Client, search: Option<&str>) -> Result<()> {
    let query = ListQuery::default()
        .sort_by("full_name", SortDirection::Asc)
        .search(search.unwrap_or_default());
    let page = client
        .list_users(&query)
        .await
        .map_err(|e| describe(e, "Failed to load users"))?;

    println!("{:<30} {:<36} {:<8} {}", "Full Name", "Email", "Role", "Status");
    for user in &page.data {
        println!(
            "{:<30} {:<36} {:<8} {}",
            truncate_string(&format_optional(&user.full_name, "-"), 30),
            truncate_string(&user.email, 36),
            user.role.display_name(),
            user.status_display()
        );
    }
    println!("\n{} of {} users", page.data.len(), page.count);
    Ok(())
}

async fn consultations(client: &Client, search: Option<&str>) -> Result<()> {
    let query = ListQuery::default()
        .sort_by("consultation_date", SortDirection::Desc)
        .search(search.unwrap_or_default());
    let page = client
        .list_consultations(&query)
        .await
        .map_err(|e| describe(e, "Failed to load consultations"))?;

    println!("{:<36} {:<30} {:<14} {}", "Id", "Patient Name", "Date", "Diagnoses");
    for c in &page.data {
        println!(
            "{:<36} {:<30} {:<14} {}",
            c.id,
            truncate_string(&c.patient_full_name, 30),
            format_date(&c.consultation_date),
            c.diagnosis_summary()
        );
    }
    println!("\n{} of {} consultations", page.data.len(), page.count);
    Ok(())
}

async fn consultation(client: &Client, id: Uuid) -> Result<()> {
    let c = client
        .get_consultation(id)
        .await
        .map_err(|e| describe(e, "Failed to load consultation"))?;

    println!("Patient:  {}", c.patient_full_name);
    println!("Date:     {}", format_datetime(&c.consultation_date));
    println!("Recorded: {}", format_datetime(&c.created_at));
    if !c.notes.is_empty() {
        println!("Notes:    {}", c.notes);
    }
    println!("Diagnoses:");
    if c.diagnoses.is_empty() {
        println!("  (none)");
    }
    for d in &c.diagnoses {
        println!("  {:<8} {}", d.code, d.description);
    }
    Ok(())
}

async fn diagnoses(client: &Client, search: Option<&str>) -> Result<()> {
    let query = ListQuery::default()
        .sort_by("code", SortDirection::Asc)
        .search(search.unwrap_or_default());
    let page = client
        .search_diagnoses(&query)
        .await
        .map_err(|e| describe(e, "Failed to search diagnoses"))?;

    println!("{:<8} {}", "Code", "Description");
    for d in &page.data {
        println!("{:<8} {}", d.code, truncate_string(&d.description, TEXT_COLUMN_WIDTH));
    }
    println!("\n{} of {} codes", page.data.len(), page.count);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
