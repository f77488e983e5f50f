use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::broadcast;

use mailsort::classifier::{Classifier, OllamaService};
use mailsort::config::{load_settings, Settings};
use mailsort::connector::{
    ConnectorError, Credentials, OAuth2Credentials, OAuth2Provider, OAuthTokenClient,
    ProviderConnectorFactory,
};
use mailsort::db::{account_repo, message_repo, Database, RecordStore};
use mailsort::error::{ConfigError, MailsortError, Result};
use mailsort::logging;
use mailsort::model::ProviderKind;
use mailsort::pipeline::{PipelineConfig, PipelineDriver};
use mailsort::rules::{load_rules, RuleRegistry};
use mailsort::scheduler::{Scheduler, SchedulerCommand};
use mailsort::secrets::CredentialVault;

const USAGE: &str = "\
Usage: mailsort [--config <path>] <command>

Commands:
  run                         Run the scheduler until interrupted (default)
  once                        Run every account once and print the summaries
  check-rules <path>          Validate a rule document
  generate-key                Print a new credential vault key
  add-account <id> <name> <kind> <credentials.json>
                              Enroll an account (kind: password_imap, oauth2_imap, oauth2_rest)
  authorize <id> <name> <gmail|outlook> <kind> <username>
                              Enroll an OAuth2 account through the device flow
  stats [hours]               Print message counts recorded in the last hours (default 24)";

const DEFAULT_STATS_HOURS: i64 = 24;

enum Command {
    Run,
    Once,
    CheckRules(PathBuf),
    GenerateKey,
    AddAccount {
        id: String,
        name: String,
        kind: ProviderKind,
        credentials_file: PathBuf,
    },
    Authorize {
        id: String,
        name: String,
        provider: OAuth2Provider,
        kind: ProviderKind,
        username: String,
    },
    Stats {
        hours: i64,
    },
    Help,
}

struct Invocation {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_provider(value: &str) -> std::result::Result<OAuth2Provider, String> {
    match value {
        "gmail" => Ok(OAuth2Provider::Gmail),
        "outlook" => Ok(OAuth2Provider::Outlook),
        other => Err(format!("unknown OAuth2 provider '{}'", other)),
    }
}

fn parse_kind(value: &str) -> std::result::Result<ProviderKind, String> {
    ProviderKind::parse(value).ok_or_else(|| format!("unknown provider kind '{}'", value))
}

fn parse_args(args: &[String]) -> std::result::Result<Invocation, String> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => positional.insert(0, "help".to_string()),
            _ => positional.push(arg.clone()),
        }
    }

    let name = positional.first().map(String::as_str).unwrap_or("run");
    let rest = positional.get(1..).unwrap_or(&[]);
    let command = match (name, rest) {
        ("run", []) => Command::Run,
        ("once", []) => Command::Once,
        ("check-rules", [path]) => Command::CheckRules(PathBuf::from(path)),
        ("generate-key", []) => Command::GenerateKey,
        ("add-account", [id, name, kind, file]) => Command::AddAccount {
            id: id.clone(),
            name: name.clone(),
            kind: parse_kind(kind)?,
            credentials_file: PathBuf::from(file),
        },
        ("authorize", [id, name, provider, kind, username]) => Command::Authorize {
            id: id.clone(),
            name: name.clone(),
            provider: parse_provider(provider)?,
            kind: parse_kind(kind)?,
            username: username.clone(),
        },
        ("stats", []) => Command::Stats {
            hours: DEFAULT_STATS_HOURS,
        },
        ("stats", [hours]) => Command::Stats {
            hours: hours
                .parse()
                .ok()
                .filter(|h: &i64| *h > 0)
                .ok_or_else(|| format!("invalid hour count '{}'", hours))?,
        },
        ("help", _) => Command::Help,
        (other, _) => return Err(format!("unknown command or wrong arguments: {}", other)),
    };

    Ok(Invocation { config, command })
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("{}\n\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(invocation)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(invocation: Invocation) -> Result<()> {
    let command = match invocation.command {
        Command::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
        Command::CheckRules(path) => return check_rules(&path),
        Command::GenerateKey => {
            println!("{}", CredentialVault::generate_key()?);
            return Ok(());
        }
        other => other,
    };

    let settings = load_settings(invocation.config.as_deref())?;
    logging::init(&settings.log_level, settings.log_json)?;
    info!("mailsort v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Command::Run => run_daemon(&settings).await,
        Command::Once => run_once(&settings).await,
        Command::AddAccount {
            id,
            name,
            kind,
            credentials_file,
        } => {
            let content = std::fs::read_to_string(&credentials_file).map_err(|e| {
                ConfigError::ReadFile {
                    path: credentials_file.clone(),
                    source: e,
                }
            })?;
            let credentials: Credentials =
                serde_json::from_str(&content).map_err(|e| ConfigError::InvalidValue {
                    key: credentials_file.display().to_string(),
                    reason: e.to_string(),
                })?;
            enroll(&settings, &id, &name, kind, &credentials)
        }
        Command::Authorize {
            id,
            name,
            provider,
            kind,
            username,
        } => authorize(&settings, &id, &name, provider, kind, username).await,
        Command::Stats { hours } => print_stats(&settings, hours),
        Command::Help | Command::CheckRules(_) | Command::GenerateKey => Ok(()),
    }
}

fn check_rules(path: &Path) -> Result<()> {
    let rules = load_rules(path)?;
    for rule in rules.rules() {
        println!("{:>6}  {:<30} -> {}", rule.priority, rule.name, rule.category);
    }
    println!("{} rules OK", rules.len());
    Ok(())
}

fn print_stats(settings: &Settings, hours: i64) -> Result<()> {
    let db = Database::open(&settings.database_path)?;
    let stats = message_repo::activity_since(&db, Utc::now() - chrono::Duration::hours(hours))?;
    info!("{} messages recorded in the last {}h", stats.total, hours);
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Could not encode stats: {}", e),
    }
    Ok(())
}

fn token_client(settings: &Settings) -> Result<OAuthTokenClient> {
    let mut client = OAuthTokenClient::new(settings.oauth.tenant.clone())?;
    if let Some(gmail) = &settings.oauth.gmail {
        client = client.with_client(OAuth2Provider::Gmail, gmail.resolve()?);
    }
    if let Some(outlook) = &settings.oauth.outlook {
        client = client.with_client(OAuth2Provider::Outlook, outlook.resolve()?);
    }
    Ok(client)
}

fn build_driver(settings: &Settings) -> Result<Arc<PipelineDriver>> {
    let db = Database::open(&settings.database_path)?;
    let vault = Arc::new(settings.vault.open()?);
    let registry = Arc::new(RuleRegistry::from_path(&settings.rules_path)?);
    let service = OllamaService::new(settings.classifier.ollama_config())?;
    let classifier = Arc::new(Classifier::new(
        registry,
        Arc::new(service),
        settings.classifier.max_concurrent,
    ));
    let factory = ProviderConnectorFactory::new(
        Arc::new(token_client(settings)?),
        settings.connector_options(),
    );

    Ok(Arc::new(PipelineDriver::new(
        Arc::new(db),
        vault,
        Arc::new(factory),
        classifier,
        PipelineConfig::from_settings(settings),
        settings.actions.permanent_delete,
    )))
}

async fn run_daemon(settings: &Settings) -> Result<()> {
    let driver = build_driver(settings)?;
    let scheduler = Scheduler::new(
        driver,
        settings.scheduler.interval(),
        settings.scheduler.max_concurrent_accounts,
    );
    let (commands, receiver) = broadcast::channel(16);

    let shutdown = scheduler.shutdown_handle();
    let wake = commands.clone();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Release);
        let _ = wake.send(SchedulerCommand::RunNow);
    })
    .map_err(|e| ConfigError::Validation {
        message: format!("Failed to install signal handler: {}", e),
    })?;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::hangup()) {
            Ok(mut hangup) => {
                let reload = commands.clone();
                tokio::spawn(async move {
                    while hangup.recv().await.is_some() {
                        let _ = reload.send(SchedulerCommand::ReloadRules);
                    }
                });
            }
            Err(e) => warn!("SIGHUP rule reload unavailable: {}", e),
        }
    }

    info!(
        "Scheduler started: every {}s, up to {} accounts at once",
        settings.scheduler.interval_secs, settings.scheduler.max_concurrent_accounts
    );
    scheduler.run(receiver).await;
    Ok(())
}

async fn run_once(settings: &Settings) -> Result<()> {
    let driver = build_driver(settings)?;
    let scheduler = Scheduler::new(
        driver,
        settings.scheduler.interval(),
        settings.scheduler.max_concurrent_accounts,
    );

    for (account_id, result) in scheduler.run_pass().await {
        match result {
            Ok(summary) => match serde_json::to_string(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Could not encode summary for {}: {}", account_id, e),
            },
            Err(e) => println!(
                "{}",
                serde_json::json!({ "account_id": account_id, "error": e.to_string() })
            ),
        }
    }
    Ok(())
}

fn enroll(
    settings: &Settings,
    id: &str,
    name: &str,
    kind: ProviderKind,
    credentials: &Credentials,
) -> Result<()> {
    let compatible = matches!(
        (kind, credentials),
        (ProviderKind::PasswordImap, Credentials::Password(_))
            | (ProviderKind::OAuth2Imap | ProviderKind::OAuth2Rest, Credentials::OAuth2(_))
    );
    if !compatible {
        return Err(ConnectorError::Credentials(format!(
            "{} accounts cannot use these credentials",
            kind
        ))
        .into());
    }

    let db = Database::open(&settings.database_path)?;
    let vault = settings.vault.open()?;
    let blob = credentials.seal(&vault)?;

    if db.get_account(id)?.is_some() {
        account_repo::replace_credentials(&db, id, &blob)?;
        info!("Replaced credentials for account {}", id);
    } else {
        account_repo::insert(&db, id, name, kind, &blob)?;
        info!("Enrolled account {} ({})", id, kind);
    }
    println!("Account {} ready", id);
    Ok(())
}

async fn authorize(
    settings: &Settings,
    id: &str,
    name: &str,
    provider: OAuth2Provider,
    kind: ProviderKind,
    username: String,
) -> Result<()> {
    if !kind.uses_oauth() {
        return Err(MailsortError::Config(ConfigError::InvalidValue {
            key: "kind".to_string(),
            reason: "device authorization needs oauth2_imap or oauth2_rest".to_string(),
        }));
    }

    let client = token_client(settings)?;
    let device = client.request_device_code(provider, kind).await?;
    println!(
        "Open {} and enter code {}",
        device
            .verification_uri_complete
            .as_deref()
            .unwrap_or(&device.verification_uri),
        device.user_code
    );

    let token = client.poll_for_token(provider, &device).await?;
    let now = Utc::now();
    let mut credentials = OAuth2Credentials {
        provider,
        username,
        host: None,
        port: None,
        access_token: String::new(),
        refresh_token: None,
        expires_at: now,
        token_url: None,
        trash_folder: None,
    };
    credentials.apply_token(&token, now);
    if credentials.refresh_token.is_none() {
        warn!("No refresh token issued; the account must be re-authorized when the token expires");
    }

    enroll(settings, id, name, kind, &Credentials::OAuth2(credentials))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_command_is_run() {
        let invocation = parse_args(&[]).unwrap();
        assert!(matches!(invocation.command, Command::Run));
        assert!(invocation.config.is_none());
    }

    #[test]
    fn test_config_flag_anywhere() {
        let invocation = parse_args(&args(&["once", "--config", "/etc/mailsort.yaml"])).unwrap();
        assert!(matches!(invocation.command, Command::Once));
        assert_eq!(invocation.config, Some(PathBuf::from("/etc/mailsort.yaml")));
    }

    #[test]
    fn test_add_account_arguments() {
        let invocation = parse_args(&args(&[
            "add-account",
            "work",
            "Work",
            "oauth2_rest",
            "creds.json",
        ]))
        .unwrap();
        match invocation.command {
            Command::AddAccount { id, kind, .. } => {
                assert_eq!(id, "work");
                assert_eq!(kind, ProviderKind::OAuth2Rest);
            }
            _ => panic!("expected add-account"),
        }
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(parse_args(&args(&["check-rules"])).is_err());
        assert!(parse_args(&args(&["add-account", "a", "b", "pop3", "c"])).is_err());
        assert!(parse_args(&args(&["authorize", "a", "b", "yahoo", "oauth2_imap", "me"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["stats", "0"])).is_err());
        assert!(parse_args(&args(&["stats", "yesterday"])).is_err());
    }

    #[test]
    fn test_stats_window() {
        let invocation = parse_args(&args(&["stats"])).unwrap();
        assert!(matches!(invocation.command, Command::Stats { hours: 24 }));
        let invocation = parse_args(&args(&["stats", "168"])).unwrap();
        assert!(matches!(invocation.command, Command::Stats { hours: 168 }));
    }
}
