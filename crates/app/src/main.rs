use std::fmt;

use amigo_core::model::{LessonId, LessonStatus, SessionId, StepId, UserId};
use serde_json::json;
use services::{AppServices, Clock, RequestContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArg { what: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidId { what: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArg { what } => write!(f, "missing {what}"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidId { what, raw } => write!(f, "invalid {what}: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_id<T: std::str::FromStr>(raw: Option<String>, what: &'static str) -> Result<T, ArgsError> {
    let raw = raw.ok_or(ArgsError::MissingArg { what })?;
    raw.parse().map_err(|_| ArgsError::InvalidId { what, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  amigo [--db <sqlite_url>] [--token <token>] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  login <user-id>                    issue a session token");
    eprintln!("  seed                               create the demo lesson (authenticated)");
    eprintln!("  lessons [--published]              list lessons");
    eprintln!("  step <step-id>                     show a step and its sandbox files");
    eprintln!("  start <lesson-id>                  start or resume a session (authenticated)");
    eprintln!("  progress <lesson-id>               show session progress (authenticated)");
    eprintln!("  complete <step-id> [--session <id>] complete a step (authenticated)");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:amigo.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  AMIGO_DB_URL, AMIGO_SESSION_TOKEN, RUST_LOG");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Login { user: UserId },
    Seed,
    Lessons { published: bool },
    Step { id: StepId },
    Start { lesson: LessonId },
    Progress { lesson: LessonId },
    Complete { step: StepId, session: Option<SessionId> },
}

struct Args {
    db_url: String,
    token: Option<String>,
    command: Command,
}

impl Args {
    fn parse(argv: impl IntoIterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut db_url = std::env::var("AMIGO_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("amigo.sqlite3".into()), normalize_sqlite_url);
        let mut token = std::env::var("AMIGO_SESSION_TOKEN").ok();
        let mut published = false;
        let mut session = None;
        let mut positional = Vec::new();

        let mut args = argv.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--token" => token = Some(require_value(&mut args, "--token")?),
                "--session" => {
                    session = Some(parse_id(
                        Some(require_value(&mut args, "--session")?),
                        "session id",
                    )?);
                }
                "--published" => published = true,
                "--help" | "-h" => return Ok(None),
                _ if arg.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let name = positional.next().ok_or(ArgsError::MissingArg { what: "command" })?;
        let command = match name.as_str() {
            "login" => Command::Login {
                user: parse_id(positional.next(), "user id")?,
            },
            "seed" => Command::Seed,
            "lessons" => Command::Lessons { published },
            "step" => Command::Step {
                id: parse_id(positional.next(), "step id")?,
            },
            "start" => Command::Start {
                lesson: parse_id(positional.next(), "lesson id")?,
            },
            "progress" => Command::Progress {
                lesson: parse_id(positional.next(), "lesson id")?,
            },
            "complete" => Command::Complete {
                step: parse_id(positional.next(), "step id")?,
                session,
            },
            _ => return Err(ArgsError::UnknownCommand(name)),
        };
        if let Some(extra) = positional.next() {
            return Err(ArgsError::UnknownArg(extra));
        }

        Ok(Some(Self {
            db_url,
            token,
            command,
        }))
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(
    app: &AppServices,
    ctx: &RequestContext,
    command: Command,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let value = match command {
        Command::Login { user } => {
            let token = app.auth().login(user).await?;
            json!({ "user": user, "token": token })
        }
        Command::Seed => serde_json::to_value(app.seed_demo(ctx).await?)?,
        Command::Lessons { published } => {
            let status = published.then_some(LessonStatus::Published);
            serde_json::to_value(app.lessons().lessons(status).await?)?
        }
        Command::Step { id } => {
            let sandbox = app.steps().sandbox(id).await?;
            let step = app.steps().get_step(id).await?;
            json!({ "step": step, "sandbox": sandbox })
        }
        Command::Start { lesson } => {
            serde_json::to_value(app.sessions().start_session(ctx, lesson).await?)?
        }
        Command::Progress { lesson } => {
            serde_json::to_value(app.sessions().progress(ctx, lesson).await?)?
        }
        Command::Complete { step, session } => {
            serde_json::to_value(app.progression().complete_step(ctx, step, session).await?)?
        }
    };
    Ok(value)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let parsed = match Args::parse(std::env::args().skip(1)) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            print_usage();
            return Ok(());
        }
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            return Err(e.into());
        }
    };

    prepare_sqlite_file(&parsed.db_url)?;
    let app = AppServices::new_sqlite(&parsed.db_url, Clock::system()).await?;
    let ctx = app.auth().context(parsed.token.as_deref()).await?;
    tracing::debug!(authenticated = ctx.is_authenticated(), "request context resolved");

    let output = execute(&app, &ctx, parsed.command).await?;
    print_json(&output)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "app=info,services=info,storage=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
