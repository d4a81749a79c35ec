use clap::{Arg, Command};
use log::LevelFilter;
use phish_scout::analyzer::UrlAnalyzer;
use phish_scout::config::Config;
use phish_scout::errors::AnalysisError;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("phish-scout")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Heuristic phishing URL analyzer backed by a pre-trained ensemble scorer")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("phish-scout.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a default configuration file and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .value_name("URL")
                .help("Analyze a single URL and print the result as JSON")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("batch")
                .long("batch")
                .value_name("FILE")
                .help("Analyze newline-separated URLs from a file (max 10)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("history")
                .long("history")
                .help("Print recent analysis history and aggregate counts")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("health")
                .long("health")
                .help("Report whether the scoring model is loaded")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        let config = Config::default();
        if let Err(e) = config.save(path) {
            eprintln!("Failed to generate config: {e:#}");
            process::exit(1);
        }
        println!("Default configuration written to {path}");
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            process::exit(1);
        }
    };

    let analyzer = match UrlAnalyzer::new(&config) {
        Ok(analyzer) => Arc::new(analyzer),
        Err(e) => {
            eprintln!("Failed to initialize analyzer: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("health") {
        print_json(&analyzer.health());
        return;
    }

    if matches.get_flag("history") {
        match analyzer.history_summary() {
            Ok(summary) => print_json(&summary),
            Err(e) => {
                eprintln!("Failed to read history: {e:#}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(url) = matches.get_one::<String>("check") {
        match analyzer.check(url).await {
            Ok(record) => print_json(&record),
            Err(e) => exit_with_error(e),
        }
        return;
    }

    if let Some(path) = matches.get_one::<String>("batch") {
        let urls = match read_url_list(path) {
            Ok(urls) => urls,
            Err(e) => {
                eprintln!("Failed to read URL list: {e:#}");
                process::exit(1);
            }
        };
        match analyzer.clone().check_batch(&urls).await {
            Ok(outcomes) => print_json(&outcomes),
            Err(e) => exit_with_error(e),
        }
        return;
    }

    eprintln!("Nothing to do. Try --check URL, --batch FILE, --history, or --health.");
    process::exit(2);
}

fn read_url_list(path: &str) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize output: {e}");
            process::exit(1);
        }
    }
}

fn exit_with_error(error: AnalysisError) {
    let payload = serde_json::json!({ "error": error.to_string() });
    eprintln!("{payload}");
    let code = match error {
        AnalysisError::Validation(_) | AnalysisError::BatchTooLarge { .. } => 2,
        _ => 1,
    };
    process::exit(code);
}
