//! Rates - windowed event counts per domain as JSON
//!
//! This is the read API the dashboard polls. Output goes to stdout, logs to
//! stderr.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin rates -- en.wikipedia.org pt.wikipedia.org
//! cargo run --bin rates -- --watch en.wikipedia.org    # refresh every interval
//! cargo run --bin rates -- --domains                   # known-domain registry
//! cargo run --bin rates -- --global                    # all domains combined
//! ```

use serde_json::json;
use std::env;
use wikiflow::config::AppConfig;
use wikiflow::logging::init_logger;
use wikiflow::query::QueryService;
use wikiflow::runtime::open_counter_store;
use wikiflow::shutdown;

const DEFAULT_DOMAINS: [&str; 2] = ["en.wikipedia.org", "pt.wikipedia.org"];

#[derive(Debug, Default, PartialEq)]
struct RatesArgs {
    watch: bool,
    list_domains: bool,
    global: bool,
    domains: Vec<String>,
}

fn parse_args(args: &[String]) -> RatesArgs {
    let mut parsed = RatesArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--watch" => parsed.watch = true,
            "--domains" => parsed.list_domains = true,
            "--global" => parsed.global = true,
            // consumed by AppConfig
            "--backend" => {
                iter.next();
            }
            other => parsed.domains.push(other.to_string()),
        }
    }
    if parsed.domains.is_empty() {
        parsed.domains = DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect();
    }
    parsed
}

async fn print_once(service: &QueryService, args: &RatesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let now = chrono::Utc::now().timestamp();

    let output = if args.list_domains {
        json!({ "known_domains": service.known_domains().await? })
    } else if args.global {
        json!({ "global": service.global_rates(now).await? })
    } else {
        json!(service.event_rates(&args.domains, now).await?)
    };

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_logger(&config.rust_log);

    let args: Vec<String> = env::args().skip(1).collect();
    let args = parse_args(&args);

    let store = open_counter_store(&config).await?;
    let service = QueryService::new(store, config.bucket_clock());

    if !args.watch {
        return print_once(&service, &args).await;
    }

    let (trigger, mut signal) = shutdown::channel();
    tokio::spawn(shutdown::trigger_on_ctrl_c(trigger));

    let mut ticker = tokio::time::interval(service.refresh_interval());
    loop {
        tokio::select! {
            biased;
            _ = signal.wait() => break,
            _ = ticker.tick() => {
                // a failed poll is reported and the next tick tries again
                if let Err(e) = print_once(&service, &args).await {
                    log::error!("❌ Query failed: {}", e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_defaults() {
        let parsed = parse_args(&[]);
        assert!(!parsed.watch);
        assert_eq!(parsed.domains, args(&DEFAULT_DOMAINS));
    }

    #[test]
    fn test_parse_flags_and_domains() {
        let parsed = parse_args(&args(&["--watch", "--backend", "sqlite", "de.wikipedia.org"]));
        assert!(parsed.watch);
        assert_eq!(parsed.domains, args(&["de.wikipedia.org"]));
    }
}
