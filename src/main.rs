use std::path::Path;
use std::sync::Arc;

use auth::backend::AuthBackend;
use auth::backend::gotrue::GoTrueBackend;
use auth::backend::memory::MemoryBackend;
use auth::config::ConfigError;
use auth::federated::{IdToken, PreissuedTokenProvider, ProviderRegistry};
use auth::guards::{GuardDecision, RequireAuth, Route, RouteGuard, route_after_sign_up};
use auth::storage::{FileStorage, SnapshotPersister};
use auth::{AuthConfig, AuthError, AuthGateway, AuthState, ErrorCode, ProviderKind, SessionStore, User};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("backend setup failed: {0}")]
    Backend(#[from] auth::backend::BackendError),
    #[error("{} ({})", .0, .0.error_code())]
    Auth(#[from] AuthError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("--id-token is required for federated sign-in")]
    MissingIdToken,
}

#[derive(Parser, Debug)]
#[command(name = "divetribe", about = "DiveTribe account session CLI")]
struct Cli {
    /// Run against an in-process backend instead of the hosted service.
    #[arg(long, env = "DIVETRIBE_OFFLINE")]
    offline: bool,

    /// Identity token for `federated`, obtained from the native flow.
    #[arg(long, env = "DIVETRIBE_ID_TOKEN", hide_env_values = true)]
    id_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current phase and the route the app would open on.
    Status,
    SignIn {
        email: String,
        #[arg(long, env = "DIVETRIBE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SignUp {
        email: String,
        #[arg(long, env = "DIVETRIBE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign in with `--id-token` issued by a native provider flow.
    Federated {
        #[arg(long)]
        provider: ProviderKind,
    },
    SignOut,
    Refresh,
    ResetPassword {
        email: String,
    },
    ResendVerification {
        email: String,
    },
    /// Fetch the signed-in user from the backend.
    Whoami,
    /// Print every state change until interrupted.
    Watch,
}

/// Snapshot entry for `--offline`, kept apart from the hosted session.
const OFFLINE_STORAGE_KEY: &str = "divetribe-auth-storage-offline";

/// Placeholder connection values for `--offline`, which never dials out.
fn offline_default(key: &str) -> Option<String> {
    match key {
        "SUPABASE_URL" => Some("http://localhost".into()),
        "SUPABASE_ANON_KEY" => Some("offline".into()),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = if cli.offline {
        AuthConfig::from_lookup(|key| std::env::var(key).ok().or_else(|| offline_default(key)))?
    } else {
        AuthConfig::from_env()?
    };

    let mut providers = ProviderRegistry::new(config.platform);
    if let Command::Federated { provider } = &cli.command {
        let token = cli.id_token.clone().ok_or(CliError::MissingIdToken)?;
        providers = providers.with(Arc::new(PreissuedTokenProvider::new(*provider, IdToken::new(token))));
    }

    let (backend, _refresh): (Arc<dyn AuthBackend>, _) = if cli.offline {
        (Arc::new(MemoryBackend::new()) as Arc<dyn AuthBackend>, None)
    } else {
        let gotrue = Arc::new(GoTrueBackend::new(&config)?);
        let refresh = gotrue.spawn_auto_refresh(config.refresh);
        (gotrue as Arc<dyn AuthBackend>, Some(refresh))
    };

    let gateway = AuthGateway::from_config(&config, backend, providers);
    let persister = snapshot_persister(&config.storage_dir, cli.offline);
    let store = SessionStore::open(gateway, persister).await;
    store.initialize().await;
    tracing::debug!(phase = ?store.phase(), "session store ready");

    run(&store, cli.command).await
}

fn snapshot_persister(storage_dir: &Path, offline: bool) -> SnapshotPersister {
    let persister = SnapshotPersister::new(Arc::new(FileStorage::new(storage_dir)));
    if offline {
        persister.with_key(OFFLINE_STORAGE_KEY)
    } else {
        persister
    }
}

async fn run(store: &SessionStore, command: Command) -> Result<(), CliError> {
    match command {
        Command::Status => print_status(&store.state()),
        Command::SignIn { email, password } => {
            store.sign_in(&email, &password).await?;
            print_status(&store.state());
        }
        Command::SignUp { email, password } => {
            let outcome = store.sign_up(&email, &password).await?;
            if outcome.needs_verification {
                eprintln!("check {email} for a confirmation link");
            }
            println!("next: {}", route_after_sign_up(outcome));
        }
        Command::Federated { provider } => {
            store.sign_in_with_provider(provider).await?;
            print_status(&store.state());
        }
        Command::SignOut => {
            if let Err(e) = store.sign_out().await {
                eprintln!("backend sign out failed: {e}; local session cleared");
            }
            print_status(&store.state());
        }
        Command::Refresh => {
            store.refresh_session().await?;
            print_status(&store.state());
        }
        Command::ResetPassword { email } => {
            store.reset_password(&email).await?;
            println!("password reset email sent to {email}");
        }
        Command::ResendVerification { email } => {
            store.resend_verification(&email).await?;
            println!("verification email sent to {email}");
        }
        Command::Whoami => match store.current_user().await? {
            Some(user) => print_user(&user)?,
            None => println!("not signed in"),
        },
        Command::Watch => watch(store).await,
    }
    Ok(())
}

async fn watch(store: &SessionStore) {
    let mut rx = store.watch();
    print_status(&rx.borrow_and_update());
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        print_status(&rx.borrow_and_update());
    }
}

fn print_status(state: &AuthState) {
    let route = match RequireAuth.decide(state.into()) {
        GuardDecision::Loading => "loading".to_string(),
        GuardDecision::Redirect(route) => route.to_string(),
        GuardDecision::Render => Route::MainTabs.to_string(),
    };
    let email = state.user.as_ref().map_or("-", |user| user.email.as_str());
    println!("phase={:?} user={email} route={route}", state.phase());
}

fn print_user(user: &User) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
