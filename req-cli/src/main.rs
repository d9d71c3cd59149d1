use std::env;
use std::io::{self, Write};

use anyhow::{Context, Result};
use reqlib::cli::{build_cli, drive_command, pre_scan_flag, pre_scan_value, GlobalOptions};
use reqlib::mapping::DEFAULT_CONFIG_FILE;
use reqlib::ReqwestTransport;

const APP_NAME: &str = "req";

fn main() {
    if let Err(err) = real_main() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logger(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_module("reqlib", log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn real_main() -> Result<()> {
    // The command table depends on the config file, so find it before clap runs
    let args: Vec<String> = env::args().collect();
    init_logger(pre_scan_flag(&args, &["-v", "--verbose"]));
    let config_file = pre_scan_value(&args, &["--config", "-c"])
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    let file = reqlib::load_req_file(&config_file)?;
    reqlib::load_env_file(&file.settings)?;
    let env_vars = reqlib::env_snapshot();

    let matches = build_cli(&file).get_matches_from(&args);
    let options = GlobalOptions::from_matches(&matches, &file);
    log::debug!("using config file {} and stage {}", options.config_file, options.stage);

    let user_agent = format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION"));
    let transport = ReqwestTransport::new(&options.execution_config(&user_agent))
        .context("HTTP client setup failed")?;

    let mut stdout = io::stdout().lock();
    let exit_code = drive_command(&file, &matches, &env_vars, &transport, &mut stdout)?;
    stdout.flush()?;
    std::process::exit(exit_code);
}
