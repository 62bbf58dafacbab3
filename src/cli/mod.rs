// FILE: src/cli/mod.rs

mod config;
mod handlers;

use crate::error::{EngineError, Result};
use clap::{Arg, ArgAction, Command, ValueEnum};
use std::future::Future;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub struct VarexCli {
    config: config::ConfigFile,
    start_time: Instant,
}

impl VarexCli {
    pub fn new() -> Self {
        Self {
            config: config::ConfigFile::default(),
            start_time: Instant::now(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.start_time = Instant::now();
        let matches = self.build_cli().get_matches();

        if let Some(config_path) = matches.get_one::<String>("config") {
            self.config = config::load(config_path)?;
        }

        self.setup_logging(matches.get_count("verbose"))?;

        let result = match matches.subcommand() {
            Some(("resolve", sub_matches)) => handlers::handle_resolve_command(self, sub_matches),
            Some(("run", sub_matches)) => handlers::handle_run_command(self, sub_matches),
            Some(("graph", sub_matches)) => handlers::handle_graph_command(self, sub_matches),
            Some(("check", sub_matches)) => handlers::handle_check_command(sub_matches),
            _ => {
                println!("No subcommand specified. Use --help for usage information.");
                Ok(())
            }
        };
        log::debug!("Finished in {}ms", self.start_time.elapsed().as_millis());
        result
    }

    fn build_cli(&self) -> Command {
        Command::new(crate::NAME)
            .version(crate::VERSION)
            .about(crate::DESCRIPTION)
            .author("Varex Development Team")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Settings file path (.toml or .json)")
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .help("Increase verbosity (can be used multiple times)")
                    .action(ArgAction::Count),
            )
            .subcommand(
                Command::new("resolve")
                    .about("Resolve every variable of a sheet and print the values")
                    .arg(Arg::new("input").help("Sheet file (.toml or .json)").required(true).index(1))
                    .arg(Arg::new("page").short('p').long("page").value_name("PAGE").help("Page to resolve (defaults to the global scope)"))
                    .arg(Arg::new("format").short('f').long("format").value_parser(clap::value_parser!(OutputFormat)).help("Output format"))
                    .arg(Arg::new("state").short('s').long("state").value_name("FILE").help("JSON state file with stored overrides"))
                    .arg(Arg::new("watch").short('w').long("watch").help("Watch the sheet and re-resolve on change").action(ArgAction::SetTrue)),
            )
            .subcommand(
                Command::new("run")
                    .about("Run a command script against a scope and show what changed")
                    .arg(Arg::new("input").help("Sheet file (.toml or .json)").required(true).index(1))
                    .arg(Arg::new("page").short('p').long("page").value_name("PAGE").help("Page to run in (defaults to the global scope)"))
                    .arg(Arg::new("command").long("command").value_name("NAME").help("Name of a command declared by the page").conflicts_with("script"))
                    .arg(Arg::new("script").short('e').long("script").value_name("TEXT").help("Inline command script"))
                    .arg(Arg::new("state").short('s').long("state").value_name("FILE").help("JSON state file to persist modified values to"))
                    .arg(Arg::new("format").short('f').long("format").value_parser(clap::value_parser!(OutputFormat)).help("Output format")),
            )
            .subcommand(
                Command::new("graph")
                    .about("Show the dependency graph and evaluation order of a scope")
                    .arg(Arg::new("input").help("Sheet file (.toml or .json)").required(true).index(1))
                    .arg(Arg::new("page").short('p').long("page").value_name("PAGE").help("Page to inspect (defaults to the global scope)")),
            )
            .subcommand(
                Command::new("check")
                    .about("Check sheet files for invalid definitions and syntax errors")
                    .arg(Arg::new("input").help("Sheet file or directory").required(true).index(1))
                    .arg(Arg::new("recursive").short('r').long("recursive").help("Check all sheets in the directory recursively").action(ArgAction::SetTrue)),
            )
    }

    fn setup_logging(&self, verbose_count: u8) -> Result<()> {
        let log_level = match verbose_count {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp_secs()
            .init();
        Ok(())
    }

    /// Output format from the flag, falling back to the settings file.
    pub fn output_format(&self, matches: &clap::ArgMatches) -> Result<OutputFormat> {
        if let Some(format) = matches.get_one::<OutputFormat>("format") {
            return Ok(*format);
        }
        match self.config.format.as_deref() {
            None | Some("text") => Ok(OutputFormat::Text),
            Some("json") => Ok(OutputFormat::Json),
            Some(other) => Err(EngineError::InvalidFormat {
                message: format!("Unknown output format in settings: {}", other),
            }),
        }
    }

    pub fn state_file(&self, matches: &clap::ArgMatches) -> Option<String> {
        matches
            .get_one::<String>("state")
            .cloned()
            .or_else(|| self.config.state_file.clone())
    }

    pub fn page(&self, matches: &clap::ArgMatches) -> Option<String> {
        matches
            .get_one::<String>("page")
            .cloned()
            .or_else(|| self.config.default_page.clone())
    }
}

impl Default for VarexCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives an engine future to completion on a current-thread runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    Ok(runtime.block_on(future))
}
