use clap::{Parser, Subcommand, ValueEnum};
use chrono::Local;
use tombola_config::Config;
use tombola_models::{QuestionChoice, Role};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

mod api;
mod auth;

use api::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("TOMBOLA_GIT_HASH");

/// Actor recorded in the audit log for operations run from the terminal.
const CLI_ACTOR: Option<&str> = Some("cli");

pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH})")
}

// --- CLI definition ---

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TokenRole {
    User,
    Admin,
    SuperAdmin,
}

impl From<TokenRole> for Role {
    fn from(role: TokenRole) -> Self {
        match role {
            TokenRole::User => Role::User,
            TokenRole::Admin => Role::Admin,
            TokenRole::SuperAdmin => Role::SuperAdmin,
        }
    }
}

#[derive(Parser)]
#[command(name = "tombola")]
#[command(about = "UK prize competition platform")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TOMBOLA_GIT_HASH"), ")"))]
struct Cli {
    /// Log level (overrides config file)
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Display log timestamps in UTC (default: local time)
    #[arg(long, global = true)]
    utc: bool,

    /// Database URL (overrides config file)
    #[arg(long, global = true)]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create a competition in DRAFT
    CreateCompetition {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        total_tickets: i64,
        /// Ticket price in pence
        #[arg(long)]
        ticket_price: i64,
        #[arg(long, default_value_t = 50)]
        max_tickets_per_user: i64,
        /// Scheduled draw, "YYYY-MM-DD HH:MM:SS" UTC
        #[arg(long)]
        draw_date: String,
        /// Skill question text
        #[arg(long)]
        question: String,
        /// Answer choice; repeat for each option
        #[arg(long = "choice")]
        choices: Vec<String>,
        /// The correct choice, must match one of --choice
        #[arg(long)]
        answer: String,
    },
    /// Activate a competition and mint its ticket pool
    Activate { id: i64 },
    /// Grant a free postal entry
    FreeEntry {
        id: i64,
        #[arg(long)]
        user: String,
    },
    /// Execute the draw for a competition
    Draw { id: i64 },
    /// Void an unclaimed win so the competition can be redrawn
    VoidWin {
        win_id: i64,
        #[arg(long)]
        reason: String,
    },
    /// Cancel a competition and refund its orders
    Cancel {
        id: i64,
        #[arg(long)]
        reason: String,
    },
    /// List all competitions
    ListCompetitions,
    /// Show the most recent audit log entries
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Mint a session token for testing
    MintToken {
        user: String,
        #[arg(long, value_enum, default_value_t = TokenRole::User)]
        role: TokenRole,
    },
}

// --- Logging ---

fn init_logging(level: &str, utc: bool) {
    let filter = EnvFilter::new(level);

    if utc {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(OffsetTime::new(
                time::UtcOffset::UTC,
                time::macros::format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
                ),
            ))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(LocalTimer)
            .init();
    }
}

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

// --- Server ---

async fn run_server(port: u16, state: AppState) -> anyhow::Result<()> {
    info!("Tombola v{}", version_string());

    let app = api::router(state);

    let addr = format!("0.0.0.0:{port}");
    info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Main ---

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::load();
    if let Some(level) = &cli.log_level {
        cfg.log_level = level.to_string();
    }
    if cli.utc {
        cfg.utc = true;
    }
    if let Some(db_url) = &cli.db_url {
        cfg.db_url = db_url.clone();
    }
    init_logging(&cfg.log_level, cfg.utc);

    let pool = tombola_db::connect(&cfg.db_url).await?;
    tombola_db::migrate(&pool).await?;

    match cli.command {
        Commands::Serve { port } => {
            let state = AppState {
                pool,
                payments: tombola_payments::StripeClient::new(
                    &cfg.stripe_api_base,
                    &cfg.stripe_secret_key,
                ),
                mailer: tombola_notify::Mailer::new(
                    &cfg.resend_api_base,
                    &cfg.resend_api_key,
                    &cfg.email_from,
                ),
                auth_secret: cfg.auth_secret.clone(),
                reservation_ttl_secs: cfg.reservation_ttl_secs,
                claim_grace_days: cfg.claim_grace_days,
                bonus_tiers: cfg.bonus_tiers.clone(),
            };
            run_server(port.unwrap_or(cfg.port), state).await?;
        }
        Commands::CreateCompetition {
            slug,
            title,
            description,
            total_tickets,
            ticket_price,
            max_tickets_per_user,
            draw_date,
            question,
            choices,
            answer,
        } => {
            let choices: Vec<QuestionChoice> = choices
                .into_iter()
                .map(|label| {
                    let correct = label.trim().eq_ignore_ascii_case(answer.trim());
                    QuestionChoice { label, correct }
                })
                .collect();
            let new = tombola_db::NewCompetition {
                slug,
                title,
                description,
                total_tickets,
                ticket_price,
                max_tickets_per_user,
                draw_date,
                question,
                choices,
            };
            let comp = tombola_db::create_competition(&pool, &new).await?;
            println!("Created competition {} ({}) in DRAFT", comp.id, comp.slug);
            println!("Activate it with `tombola activate {}`", comp.id);
        }
        Commands::Activate { id } => {
            let tickets = tombola_db::activate_competition(&pool, id, CLI_ACTOR).await?;
            println!("Competition {id} is ACTIVE with {tickets} tickets");
        }
        Commands::FreeEntry { id, user } => {
            let number = tombola_db::grant_free_entry(&pool, id, &user, CLI_ACTOR).await?;
            println!("Free entry for {user}: ticket {number} in competition {id}");
        }
        Commands::Draw { id } => {
            let outcome = tombola_db::execute_draw(&pool, id, CLI_ACTOR).await?;
            println!(
                "Competition {id} drawn from {} entries: ticket {} held by {}",
                outcome.entry_count, outcome.win.ticket_number, outcome.win.user_id
            );
        }
        Commands::VoidWin { win_id, reason } => {
            let win = tombola_db::get_win(&pool, win_id).await?;
            tombola_db::void_win(&pool, win_id, &reason, CLI_ACTOR, cfg.claim_grace_days).await?;
            println!(
                "Win {win_id} voided; competition {} is open for a redraw",
                win.competition_id
            );
        }
        Commands::Cancel { id, reason } => {
            let provider = tombola_payments::StripeClient::new(
                &cfg.stripe_api_base,
                &cfg.stripe_secret_key,
            );
            let summary =
                tombola_db::cancel_competition(&pool, id, &reason, CLI_ACTOR, &provider).await?;
            println!(
                "Competition {id} cancelled: {} orders refunded ({}p), {} refund failures",
                summary.refunded_count, summary.refunded_amount, summary.refund_failures
            );
        }
        Commands::ListCompetitions => {
            let comps = tombola_db::list_competitions(&pool, None).await?;
            if comps.is_empty() {
                println!("No competitions. Use `tombola create-competition` to add one.");
            } else {
                println!(
                    "{:<4} {:<24} {:<10} {:>8} {:>8} {:<20} {:>7}",
                    "ID", "Slug", "Status", "Tickets", "Price", "Draw date", "Winner"
                );
                println!("{}", "-".repeat(90));
                for c in &comps {
                    let winner = c
                        .winning_ticket_number
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<4} {:<24} {:<10} {:>8} {:>8} {:<20} {:>7}",
                        c.id, c.slug, c.status, c.total_tickets, c.ticket_price, c.draw_date, winner
                    );
                }
                println!("\n{} competition(s) total", comps.len());
            }
        }
        Commands::Audit { limit } => {
            let entries = tombola_db::audit::list(&pool, limit).await?;
            if entries.is_empty() {
                println!("Audit log is empty.");
            } else {
                println!(
                    "{:<6} {:<20} {:<22} {:<12} {:<10} {}",
                    "ID", "When", "Action", "Entity", "Actor", "Metadata"
                );
                println!("{}", "-".repeat(110));
                for e in &entries {
                    println!(
                        "{:<6} {:<20} {:<22} {:<12} {:<10} {}",
                        e.id,
                        e.created_at,
                        e.action,
                        format!("{}:{}", e.entity, e.entity_id),
                        e.actor_user_id.as_deref().unwrap_or("-"),
                        e.metadata,
                    );
                }
            }
        }
        Commands::MintToken { user, role } => {
            let token = auth::issue_token(&cfg.auth_secret, &user, role.into(), 86_400)?;
            println!("{token}");
        }
    }

    Ok(())
}
