//! medlogic command-line interface

use clap::{Parser, Subcommand};
use medlogic::cli::eval::{self, EvalConfig};
use medlogic::cli::output;
use medlogic::cli::session::SessionConfig;
use medlogic::cli::tokens::{self, RuleConfig, TokensConfig};
use std::path::PathBuf;

/// Clinical rule evaluation tool
#[derive(Parser)]
#[command(name = "medlogic")]
#[command(author, version, about = "Evaluate clinical rules against patient data", long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data bundle with concepts, patients and observations (JSON)
    #[arg(short, long, global = true)]
    data: Option<PathBuf>,

    /// Index date evaluations are relative to (YYYY-MM-DD or RFC 3339)
    #[arg(long, global = true)]
    index_date: Option<String>,

    /// Output format (json, table, pretty)
    #[arg(short = 'f', long, global = true)]
    format: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate tokens for one patient or every patient in the bundle
    Eval {
        /// Tokens to evaluate
        #[arg(required_unless_present = "query")]
        tokens: Vec<String>,

        /// Criteria in text form, e.g. "LAST 2 {CD4 COUNT} WITHIN 1 year"
        #[arg(short, long)]
        query: Vec<String>,

        /// Patient id (default: every patient)
        #[arg(short, long)]
        patient: Option<i64>,

        /// Rule arguments (name=value, dates as name=@YYYY-MM-DD)
        #[arg(short, long = "arg")]
        args: Vec<String>,

        /// Aggregation (latest, earliest, last:N, first:N, count, exists,
        /// not_exists, average, max, min, distinct)
        #[arg(long)]
        aggregate: Option<String>,

        /// Ignore readings after this date
        #[arg(long)]
        as_of: Option<String>,

        /// Only readings before this date
        #[arg(long)]
        before: Option<String>,

        /// Only readings after this date
        #[arg(long)]
        after: Option<String>,

        /// Only readings within this duration of the index date (e.g. "6 months")
        #[arg(long)]
        within: Option<String>,

        /// Only numeric readings greater than this value (combines with --lt)
        #[arg(long)]
        gt: Option<f64>,

        /// Only numeric readings less than this value
        #[arg(long)]
        lt: Option<f64>,

        /// Evaluate patients concurrently
        #[arg(long)]
        concurrent: bool,
    },

    /// List registered tokens or tags
    Tokens {
        /// Only entries containing this text (case-sensitive)
        #[arg(long)]
        find: Option<String>,

        /// Only tokens carrying this tag
        #[arg(short, long)]
        tag: Option<String>,

        /// List tags instead of tokens
        #[arg(long)]
        tags: bool,
    },

    /// Describe the rule behind a token
    Rule {
        /// Token to describe
        token: String,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    output::setup_colors(&cli.color);
    init_logging(cli.verbose);

    let session = SessionConfig {
        config: cli.config.clone(),
        data: cli.data.clone(),
        index_date: cli.index_date.clone(),
    };

    let result = match cli.command {
        Commands::Eval {
            tokens,
            query,
            patient,
            args,
            aggregate,
            as_of,
            before,
            after,
            within,
            gt,
            lt,
            concurrent,
        } => {
            let config = EvalConfig {
                session,
                tokens,
                queries: query,
                patient,
                args,
                aggregate,
                as_of,
                before,
                after,
                within,
                gt,
                lt,
                concurrent,
                output_format: cli.format.clone(),
                output_file: cli.output.clone(),
            };
            eval::eval(config).await
        }

        Commands::Tokens { find, tag, tags } => {
            let config = TokensConfig {
                session,
                find,
                tag,
                tags,
                output_format: cli.format.clone(),
                output_file: cli.output.clone(),
            };
            tokens::tokens(config)
        }

        Commands::Rule { token } => {
            let config = RuleConfig {
                session,
                token,
                output_format: cli.format.clone(),
                output_file: cli.output.clone(),
            };
            tokens::describe(config)
        }
    };

    if let Err(e) = result {
        eprintln!("{}", output::format_error(&e));
        std::process::exit(1);
    }
}
