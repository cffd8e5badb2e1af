pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use expensely_core::approvals::RequiredApproverPolicy;
use expensely_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "expensely",
    about = "Expensely approval engine CLI",
    long_about = "Inspect configuration, apply migrations, validate approval rules and replay decision scripts.",
    after_help = "Examples:\n  expensely config\n  expensely rule-check rules/travel.toml\n  expensely simulate rules/travel.toml decisions.json --policy hold-until-decided"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate an approval rule file (TOML or JSON)")]
    RuleCheck {
        #[arg(help = "Path to the rule draft")]
        path: PathBuf,
    },
    #[command(about = "Replay a decision script against a rule and print each evaluation")]
    Simulate {
        #[arg(help = "Path to the rule draft")]
        rule: PathBuf,
        #[arg(help = "Path to the decision script")]
        events: PathBuf,
        #[arg(long, value_enum, help = "Override approvals.required_approver_policy")]
        policy: Option<PolicyArg>,
        #[arg(long, help = "Manager of the submitter, used when the rule gates on the manager")]
        manager: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    VetoOnly,
    HoldUntilDecided,
}

impl From<PolicyArg> for RequiredApproverPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::VetoOnly => Self::VetoOnly,
            PolicyArg::HoldUntilDecided => Self::HoldUntilDecided,
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::RuleCheck { path } => commands::rule_check::run(&path),
        Command::Simulate { rule, events, policy, manager } => commands::simulate::run(
            &rule,
            &events,
            commands::simulate::SimulateOptions { policy: policy.map(Into::into), manager_id: manager },
        ),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a clean JSON stream. Invalid config falls
/// back to defaults here; the command itself reports the config error.
fn init_logging() {
    use expensely_core::config::LogFormat::*;
    use tracing::Level;

    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_max_level(log_level)
                .compact()
                .init();
        }
        Pretty => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_max_level(log_level)
                .pretty()
                .init();
        }
        Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_max_level(log_level)
                .json()
                .init();
        }
    }
}
