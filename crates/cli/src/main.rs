use std::io::Read;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{info, warn};
use xflink_compose::application::ApplicationConfig;
use xflink_compose::config::CommonConfig;
use xflink_compose::{ConfigReader, RenderOptions, Renderer};
use xflink_core::status::FixedClock;
use xflink_core::RunFunctionRequest;

#[derive(Parser, Debug)]
#[command(name = "xflinkctl", version, about = "Render managed Flink compositions offline")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one function request and print the response
    Render {
        /// Request document (JSON or YAML); "-" reads stdin
        request: String,
        /// Pin the clock (epoch millis) for reproducible activation decisions
        #[arg(long = "now-millis", env = "XFLINK_NOW_MILLIS")]
        now_millis: Option<i64>,
    },
    /// Print the configuration a composite resolves to, defaults included
    Config {
        /// Composite document (JSON or YAML); "-" reads stdin
        composite: String,
    },
}

fn max_request_bytes() -> usize {
    std::env::var("XFLINK_MAX_REQUEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(4 * 1024 * 1024) // 4 MiB default
}

fn max_request_nodes() -> usize {
    std::env::var("XFLINK_MAX_REQUEST_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur > max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur > max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr {
                    if *cur > max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count > max
}

fn init_tracing() {
    let env = std::env::var("XFLINK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn read_source(source: &str) -> Result<String> {
    let limit = max_request_bytes();
    let mut buf = String::new();
    if source == "-" {
        std::io::stdin().take(limit as u64 + 1).read_to_string(&mut buf).context("reading stdin")?;
    } else {
        let len = std::fs::metadata(source).with_context(|| format!("reading {}", source))?.len();
        if len > limit as u64 {
            return Err(anyhow!("document too large (>{} bytes)", limit));
        }
        buf = std::fs::read_to_string(source).with_context(|| format!("reading {}", source))?;
    }
    Ok(buf)
}

/// JSON is a subset of YAML, so one parser covers both input formats.
fn parse_document(text: &str) -> Result<Json> {
    if text.len() > max_request_bytes() {
        return Err(anyhow!("document too large (>{} bytes)", max_request_bytes()));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(text).context("parsing YAML")?;
    let json = serde_json::to_value(val).context("converting YAML to JSON")?;
    if json_node_budget_exceeded(&json, max_request_nodes()) {
        return Err(anyhow!("document too complex (>{} nodes)", max_request_nodes()));
    }
    Ok(json)
}

fn print<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Human => print!("{}", serde_yaml::to_string(value)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EffectiveConfig {
    common: CommonConfig,
    application: ApplicationConfig,
}

fn effective_config(composite: &Json) -> Result<EffectiveConfig> {
    let reader = ConfigReader::new(composite);
    let common = CommonConfig::resolve(&reader)?;
    let application = ApplicationConfig::resolve(&reader, &common.region)?;
    Ok(EffectiveConfig { common, application })
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { request, now_millis } => {
            let doc = parse_document(&read_source(&request)?)?;
            let req: RunFunctionRequest = serde_json::from_value(doc).context("decoding RunFunctionRequest")?;
            let options = RenderOptions::from_env();
            info!(tag = %req.meta.tag, ttl_secs = options.ttl.as_secs(), "render invoked");
            let rsp = match now_millis {
                Some(now) => Renderer::with_clock(FixedClock(now), options).run_function(&req),
                None => Renderer::new(options).run_function(&req),
            };
            if rsp.is_fatal() {
                warn!("response carries a fatal result");
            }
            print(cli.output, &rsp)?;
        }
        Commands::Config { composite } => {
            let doc = parse_document(&read_source(&composite)?)?;
            print(cli.output, &effective_config(&doc)?)?;
        }
    }
    Ok(())
}
