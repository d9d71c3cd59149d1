use std::io::Write;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::error::Result;
use crate::mapping::{CommandDefinition, ReqFile, DEFAULT_CONFIG_FILE, DEFAULT_STAGE};
use crate::resolver::{execute_command, Invocation};
use crate::template::Variables;
use crate::{ExecutionConfig, Transport, DEFAULT_CONN_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};

/// Argument ids owned by the global options; command params may not reuse them.
const RESERVED_ARG_IDS: [&str; 7] = [
    "config",
    "verbose",
    "stage",
    "timeout",
    "conn-timeout",
    "help",
    "version",
];

/// Global options shared by every command.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalOptions {
    pub config_file: String,
    pub verbose: bool,
    pub stage: String,
    pub timeout_secs: f64,
    pub conn_timeout_secs: f64,
}

impl GlobalOptions {
    /// Flags win over the `config` section, which wins over built-in defaults.
    #[must_use]
    pub fn from_matches(matches: &ArgMatches, file: &ReqFile) -> Self {
        Self {
            config_file: matches
                .get_one::<String>("config")
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string()),
            verbose: matches.get_flag("verbose"),
            stage: matches
                .get_one::<String>("stage")
                .cloned()
                .unwrap_or_else(|| DEFAULT_STAGE.to_string()),
            timeout_secs: matches
                .get_one::<f64>("timeout")
                .copied()
                .or(file.settings.timeout)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            conn_timeout_secs: matches
                .get_one::<f64>("conn-timeout")
                .copied()
                .or(file.settings.conn_timeout)
                .unwrap_or(DEFAULT_CONN_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn execution_config<'a>(&self, user_agent: &'a str) -> ExecutionConfig<'a> {
        ExecutionConfig {
            conn_timeout_secs: Some(self.conn_timeout_secs),
            request_timeout_secs: Some(self.timeout_secs),
            user_agent,
        }
    }
}

/// Find the value of the first of `keys` in raw arguments, before clap runs.
/// Accepts both `--key value` and `--key=value`.
#[must_use]
pub fn pre_scan_value(args: &[String], keys: &[&str]) -> Option<String> {
    for i in 0..args.len() {
        for key in keys {
            if args[i] == *key && i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
            if let Some(rest) = args[i].strip_prefix(&format!("{key}=")) {
                return Some(rest.to_string());
            }
        }
    }
    None
}

/// Short options that take a value; a cluster like `-sv` ends at the first one.
const VALUE_SHORTS: [char; 3] = ['c', 's', 't'];

/// True when any of `keys` appears as a bare flag, or a short key appears
/// inside a cluster of short flags such as `-vs`.
#[must_use]
pub fn pre_scan_flag(args: &[String], keys: &[&str]) -> bool {
    let shorts: Vec<char> = keys
        .iter()
        .filter_map(|k| k.strip_prefix('-'))
        .filter_map(|k| {
            let mut chars = k.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c != '-' => Some(c),
                _ => None,
            }
        })
        .collect();
    args.iter().any(|a| {
        if keys.contains(&a.as_str()) {
            return true;
        }
        let Some(cluster) = a.strip_prefix('-').filter(|c| !c.starts_with('-')) else {
            return false;
        };
        for c in cluster.chars() {
            if shorts.contains(&c) {
                return true;
            }
            if VALUE_SHORTS.contains(&c) {
                break;
            }
        }
        false
    })
}

fn usable_param(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.chars().any(char::is_whitespace)
        && !RESERVED_ARG_IDS.contains(&name)
}

/// Params of `def` that can be exposed as `--flag`s, in declaration order.
fn flag_params(def: &CommandDefinition) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for p in def.params.iter().map(String::as_str) {
        if usable_param(p) && !seen.contains(&p) {
            seen.push(p);
        }
    }
    seen
}

fn build_subcommand(def: &CommandDefinition) -> Command {
    for p in def.params.iter().filter(|p| !usable_param(p)) {
        log::warn!("command '{}': ignoring parameter '{}'", def.name, p);
    }
    let mut cmd = Command::new(def.name.clone()).about(format!("Execute {} command", def.name));
    for p in flag_params(def) {
        cmd = cmd.arg(
            Arg::new(p.to_string())
                .long(p.to_string())
                .value_name("value")
                .help(format!("{p} parameter"))
                .num_args(1),
        );
    }
    cmd
}

/// Build the CLI from the command table.
#[must_use]
pub fn build_cli(file: &ReqFile) -> Command {
    let mut app = Command::new("req")
        .about("CLI tool for making HTTP requests based on YAML configuration")
        .version(env!("CARGO_PKG_VERSION"))
        .disable_help_subcommand(true)
        .allow_external_subcommands(true)
        // Global options
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Config file path")
                .value_name("file")
                .default_value(DEFAULT_CONFIG_FILE)
                .num_args(1)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Verbose mode - show request and response details")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("stage")
                .long("stage")
                .short('s')
                .help("Stage to use for variables")
                .value_name("name")
                .default_value(DEFAULT_STAGE)
                .num_args(1)
                .global(true),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .short('t')
                .help("Request timeout in seconds, 0 disables it [default: 300]")
                .num_args(1)
                .value_parser(clap::value_parser!(f64))
                .global(true),
        )
        .arg(
            Arg::new("conn-timeout")
                .long("conn-timeout")
                .help("Connection timeout in seconds, 0 disables it [default: 30]")
                .num_args(1)
                .value_parser(clap::value_parser!(f64))
                .global(true),
        );

    for def in file.commands.values() {
        app = app.subcommand(build_subcommand(def));
    }
    app
}

/// CLI variables for `def`: only flags that were actually given a value.
#[must_use]
pub fn collect_params(def: &CommandDefinition, leaf: &ArgMatches) -> Variables {
    let mut vars = Variables::new();
    for p in flag_params(def) {
        if let Ok(Some(val)) = leaf.try_get_one::<String>(p) {
            if !val.is_empty() {
                vars.insert(p.to_string(), val.clone());
            }
        }
    }
    vars
}

/// Run the selected command and write its output to `out`.
///
/// Returns the process exit code; failures come back as errors.
pub fn drive_command(
    file: &ReqFile,
    matches: &ArgMatches,
    env: &Variables,
    transport: &dyn Transport,
    out: &mut dyn Write,
) -> Result<i32> {
    let options = GlobalOptions::from_matches(matches, file);
    let Some((name, leaf)) = matches.subcommand() else {
        let mut app = build_cli(file);
        writeln!(out, "{}", app.render_help())?;
        return Ok(0);
    };

    let def = file.command(name)?;
    let invocation = Invocation {
        command: name.to_string(),
        params: collect_params(def, leaf),
        stage: options.stage.clone(),
        verbose: options.verbose,
    };
    let outcome = execute_command(file, &invocation, env, transport)?;
    writeln!(out, "{}", outcome.render(options.verbose))?;
    Ok(0)
}
