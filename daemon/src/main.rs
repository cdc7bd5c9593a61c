use {
    clap::{Parser, Subcommand},
    commands::{rules::RuleArgs, run::RunArgs},
    log::error,
    std::{path::PathBuf, process::exit},
    taskpin_thread_pinner::{config, MatchType},
};

mod commands;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Parser)]
#[command(version, name = "taskpin", about, long_about = None)]
struct Cli {
    /// Rule file [default: ~/.config/taskpin.conf when present, otherwise /etc/taskpin.conf]
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write log output to FILE instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch processes and apply rules to their threads (default)
    Run(RunArgs),
    /// Print the detected CPU topology and the CPU keywords
    Topology,
    /// Add a rule, or replace the rule with the same type and pattern
    Save(RuleArgs),
    /// Replace an existing rule
    Update(RuleArgs),
    /// Remove the rules with the given type and pattern
    Remove {
        pattern: String,

        #[arg(long = "type", default_value_t = MatchType::ProcessName)]
        match_type: MatchType,
    },
    /// Print the rules of the rule file
    List,
}

fn main() {
    let cli = Cli::parse();
    match &cli.log {
        Some(logfile) => {
            solana_logger::setup_file_with_default(&logfile.to_string_lossy(), DEFAULT_LOG_FILTER)
        }
        None => solana_logger::setup_with_default(DEFAULT_LOG_FILTER),
    }

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let result = match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => commands::run::run(&config_path, &args),
        Command::Topology => {
            commands::topology::print_topology();
            Ok(())
        }
        Command::Save(args) => commands::rules::save(&config_path, &args),
        Command::Update(args) => commands::rules::update(&config_path, &args),
        Command::Remove {
            pattern,
            match_type,
        } => commands::rules::remove(&config_path, match_type, &pattern),
        Command::List => commands::rules::list(&config_path),
    };

    if let Err(err) = result {
        error!("{err:#}");
        exit(1);
    }
}
