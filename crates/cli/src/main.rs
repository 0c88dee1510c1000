// dealboard CLI - headless access to the deal reporting pipeline
// Tables go to stdout (or --out); logs, warnings and errors go to stderr.

mod exit_codes;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dealboard_config::connection::BASE_URL_ENV;
use dealboard_config::secrets::TOKEN_ENV;
use dealboard_config::{resolve_connection, ConnectionOverrides, Settings};
use dealboard_crm::cache::DataRepository;
use dealboard_crm::integration::{Dashboard, DataRequest};
use dealboard_crm::query::DEFAULT_PAGE_LIMIT;
use dealboard_crm::{Cell, Connection, CrmClient, DealQuery, Outcome, OutcomeStatus, Reconciler};

use exit_codes::{EXIT_CRM_NOT_AUTH, EXIT_CRM_NO_DATA, EXIT_ERROR, EXIT_IO, EXIT_SUCCESS, EXIT_USAGE};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "dealboard")]
#[command(about = "Deal pipeline reports from the CRM reporting endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// CRM reporting endpoint (default: BITRIX_BASE_URL env, then settings)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Write output to a file instead of stdout (CSV unless --format json)
    #[arg(long, short = 'o', global = true)]
    out: Option<PathBuf>,

    /// Exit 54 when the result has no rows
    #[arg(long, global = true)]
    fail_on_empty: bool,

    /// Settings file (default: <config dir>/dealboard/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more on stderr (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Deals of one pipeline created in a date range
    #[command(after_help = "\
Examples:
  dealboard deals --from 2025-01-01 --to 2025-01-31
  dealboard deals --from 2025-01-01 --to 2025-01-31 --category 32 --format csv
  BITRIX_TOKEN=... dealboard deals --from 2025-01-01 --to 2025-01-31 --base-url https://crm.example/pbi.php")]
    Deals {
        /// Start date inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// End date inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Deal pipeline (default: BITRIX_CATEGORY_ID env, settings, then 34)
        #[arg(long)]
        category: Option<i64>,

        /// Page size sent with the query
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,

        /// Page offset sent with the query
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Extended attributes (custom fields) of the given deals
    #[command(after_help = "\
Examples:
  dealboard custom-fields --ids 10,11,12
  dealboard custom-fields --ids 10 --format json")]
    CustomFields {
        /// Deal IDs, comma-separated
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
    },

    /// Deals joined with their extended attributes, through the result cache
    #[command(after_help = "\
Examples:
  dealboard combined
  dealboard combined --from 2025-01-01 --to 2025-03-31 --process
  dealboard combined --refresh --out outputs/deals.csv")]
    Combined {
        /// Start date inclusive (default: data.defaultDays before --to)
        #[arg(long)]
        from: Option<String>,

        /// End date inclusive (default: today)
        #[arg(long)]
        to: Option<String>,

        /// Deal pipeline (default: BITRIX_CATEGORY_ID env, settings, then 34)
        #[arg(long)]
        category: Option<i64>,

        /// Add meeting, stage and time-metric columns
        #[arg(long)]
        process: bool,

        /// Neither read nor write the result cache
        #[arg(long)]
        no_cache: bool,

        /// Ignore cached results and refetch
        #[arg(long)]
        refresh: bool,
    },

    /// Manage the result cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Remove cached results
    Clear {
        /// Remove only this entry
        #[arg(long)]
        key: Option<String>,
    },
}

/// Flags shared by every command, resolved once.
struct Common {
    base_url: Option<String>,
    format: OutputFormat,
    out: Option<PathBuf>,
    fail_on_empty: bool,
    settings: Settings,
    settings_path: String,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (settings, settings_path) = match &cli.config {
        Some(path) => (Settings::load_from(path), path.display().to_string()),
        None => (Settings::load(), Settings::config_path_display()),
    };
    let common = Common {
        base_url: cli.base_url,
        format: cli.format,
        out: cli.out,
        fail_on_empty: cli.fail_on_empty,
        settings,
        settings_path,
    };

    let result = match cli.command {
        Commands::Deals {
            from,
            to,
            category,
            limit,
            offset,
        } => cmd_deals(&common, &from, &to, category, limit, offset),
        Commands::CustomFields { ids } => cmd_custom_fields(&common, ids),
        Commands::Combined {
            from,
            to,
            category,
            process,
            no_cache,
            refresh,
        } => cmd_combined(&common, from, to, category, process, no_cache, refresh),
        Commands::Cache(CacheCommands::Clear { key }) => cmd_cache_clear(&common, key),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// shared plumbing
// ============================================================================

fn parse_date(flag: &str, value: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::args(format!("invalid {} date {:?}: {}", flag, value, e)))
}

fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), CliError> {
    if start > end {
        return Err(CliError::args(format!(
            "--from ({}) must not be after --to ({})",
            start, end,
        )));
    }
    Ok(())
}

/// Build the client connection from flags, environment, keychain and settings.
fn connect(common: &Common, category_id: Option<i64>) -> Result<Connection, CliError> {
    let overrides = ConnectionOverrides {
        base_url: common.base_url.clone(),
        category_id,
    };
    let resolved = resolve_connection(&overrides, &common.settings);
    debug!(
        base_url_source = resolved.base_url_source.as_str(),
        token_source = resolved.token.source.as_str(),
        category_id = resolved.category_id,
        category_source = resolved.category_source.as_str(),
        "resolved connection"
    );

    let Some(base_url) = resolved.base_url else {
        return Err(CliError::args("no CRM base URL configured").with_hint(format!(
            "pass --base-url, set {} or add \"crm.baseUrl\" to {}",
            BASE_URL_ENV, common.settings_path,
        )));
    };
    let Some(token) = resolved.token.token else {
        return Err(CliError {
            code: EXIT_CRM_NOT_AUTH,
            message: "missing CRM token".to_string(),
            hint: Some(format!("store it in the system keychain or set {}", TOKEN_ENV)),
        });
    };

    Ok(Connection::new(base_url, token)
        .with_category(resolved.category_id)
        .with_timeout(resolved.timeout))
}

fn reconciler(connection: &Connection) -> Result<Reconciler<CrmClient>, CliError> {
    let client = CrmClient::new(connection).map_err(|e| CliError {
        code: EXIT_ERROR,
        message: e.to_string(),
        hint: None,
    })?;
    Ok(Reconciler::new(client, connection.default_category_id))
}

fn repository(settings: &Settings) -> DataRepository {
    DataRepository::new(settings.effective_cache_dir(), settings.cache_duration_hours)
}

/// Report diagnostics on stderr, then write the table.
fn finish(outcome: Outcome, common: &Common) -> Result<(), CliError> {
    for d in &outcome.diagnostics {
        eprintln!("warning: [{}] {}: {}", d.stage, d.kind, d.message);
    }
    if outcome.status == OutcomeStatus::Partial {
        eprintln!(
            "warning: partial result ({} rows); some extended attributes are missing",
            outcome.table.len(),
        );
    }

    if outcome.is_empty() && common.fail_on_empty {
        return Err(CliError {
            code: EXIT_CRM_NO_DATA,
            message: "no rows returned".to_string(),
            hint: Some("run with -v to see each request; warnings above name the failing stage".to_string()),
        });
    }

    output::emit(&outcome.table, common.format, common.out.as_deref())
}

// ============================================================================
// commands
// ============================================================================

fn cmd_deals(
    common: &Common,
    from: &str,
    to: &str,
    category: Option<i64>,
    limit: u32,
    offset: u32,
) -> Result<(), CliError> {
    let start = parse_date("--from", from)?;
    let end = parse_date("--to", to)?;
    check_range(start, end)?;

    let connection = connect(common, category)?;
    let query = DealQuery::new(start, end, connection.default_category_id).with_page(limit, offset);
    let outcome = reconciler(&connection)?.get_crm_deals(&query);
    finish(outcome, common)
}

fn cmd_custom_fields(common: &Common, ids: Vec<String>) -> Result<(), CliError> {
    let ids: Vec<Cell> = ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(Cell::from)
        .collect();
    if ids.is_empty() {
        return Err(CliError::args("--ids needs at least one deal ID"));
    }

    let connection = connect(common, None)?;
    let outcome = reconciler(&connection)?.get_crm_deal_uf(&ids);
    finish(outcome, common)
}

fn cmd_combined(
    common: &Common,
    from: Option<String>,
    to: Option<String>,
    category: Option<i64>,
    process: bool,
    no_cache: bool,
    refresh: bool,
) -> Result<(), CliError> {
    let start = from.as_deref().map(|v| parse_date("--from", v)).transpose()?;
    let end = to.as_deref().map(|v| parse_date("--to", v)).transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        check_range(start, end)?;
    }

    let connection = connect(common, category)?;
    let dashboard = Dashboard::new(reconciler(&connection)?, repository(&common.settings))
        .with_default_days(common.settings.default_days);
    let outcome = dashboard.get_data(&DataRequest {
        start,
        end,
        category_id: Some(connection.default_category_id),
        use_cache: !no_cache,
        force_refresh: refresh,
        process,
    });
    finish(outcome, common)
}

fn cmd_cache_clear(common: &Common, key: Option<String>) -> Result<(), CliError> {
    let repository = repository(&common.settings);
    let removed = repository
        .delete(key.as_deref())
        .map_err(|e| CliError::io(format!("cannot clear cache: {}", e)))?;
    eprintln!(
        "removed {} cache entr{} from {}",
        removed,
        if removed == 1 { "y" } else { "ies" },
        repository.dir().display(),
    );
    Ok(())
}
