use bytes::Bytes;
use clap::{Parser, Subcommand};
use http::{HeaderMap, HeaderName, HeaderValue, Request};
use log::{error, info, warn};
use serde_json::json;
use std::error::Error;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use waf_inspect::config::{GeoDbWatcher, WafConfig};
use waf_inspect::geo::store::GeoStore;
use waf_inspect::geo::{GeoManager, IpFamily};
use waf_inspect::inspector::{Inspector, RequestContext};
use waf_inspect::metrics::MetricsCollector;
use waf_inspect::rules::{check_rule_available, test_rule, RuleEngine, RuleTestRequest};
use waf_inspect::waf::{should_auto_jump_https, RedirectTarget};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/waf.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the loaded geolocation databases
    Status,

    /// Install a geolocation database (.xdb or .mmdb) for a family
    Install { family: IpFamily, file: PathBuf },

    /// Reload the geolocation databases from the data directory
    Reload,

    /// Resolve an IP address
    Lookup { ip: String },

    /// Check that a rule file compiles and evaluates
    CheckRule { file: PathBuf },

    /// Report which rules in a file match a synthetic request
    TestRule {
        file: PathBuf,
        #[arg(long, default_value = "127.0.0.1")]
        src_ip: String,
        #[arg(long, default_value = "/")]
        url: String,
        #[arg(long, default_value = "")]
        host: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long, default_value = "")]
        user_agent: String,
        #[arg(long, default_value = "")]
        referer: String,
        #[arg(long, default_value = "")]
        cookies: String,
        #[arg(long, default_value = "")]
        body: String,
    },

    /// Decode a captured HTTP body
    Decode {
        body_file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        content_encoding: Option<String>,
        #[arg(long)]
        transfer_encoding: Option<String>,
    },

    /// Run a synthetic request through the full inspection pipeline
    Inspect {
        url: String,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Extra header as "Name: value", repeatable
        #[arg(long = "header")]
        headers: Vec<String>,
        #[arg(long)]
        body_file: Option<PathBuf>,
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        peer: IpAddr,
        #[arg(long)]
        tls: bool,
        #[arg(long, default_value = "80")]
        listen_port: u16,
    },

    /// Evaluate the HTTPS auto-redirect policy
    AutoJump {
        request_host: String,
        configured_host: String,
        path: String,
        #[arg(long)]
        no_ssl: bool,
        #[arg(long)]
        no_auto_jump: bool,
    },

    /// Watch the data directory and reload databases on change
    Watch,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(config: &WafConfig, metrics: Option<Arc<MetricsCollector>>) -> GeoStore {
    let store = GeoStore::new(Arc::new(GeoManager::new()), &config.geolocation);
    let store = match metrics {
        Some(metrics) => store.with_metrics(metrics),
        None => store,
    };
    if let Err(e) = store.reload() {
        warn!("Geolocation databases not loaded: {}", e);
    }
    store
}

fn header_map(pairs: &[(&str, Option<&String>)]) -> Result<HeaderMap, Box<dyn Error>> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let Some(value) = value {
            headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
        }
    }
    Ok(headers)
}

fn run(args: Args, config: WafConfig, config_dir: &Path) -> Result<(), Box<dyn Error>> {
    match args.command {
        Command::Status => {
            let store = open_store(&config, None);
            print_json(&store.status())?;
        }
        Command::Install { family, file } => {
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or("database path has no file name")?
                .to_string();
            let bytes = fs::read(&file)?;
            let store = GeoStore::new(Arc::new(GeoManager::new()), &config.geolocation);
            let path = store.install(family, &file_name, bytes)?;
            println!("Installed {} database at {}", family, path.display());
            print_json(&store.status())?;
        }
        Command::Reload => {
            let store = GeoStore::new(Arc::new(GeoManager::new()), &config.geolocation);
            let families = store.reload()?;
            println!("Reloaded: {:?}", families);
        }
        Command::Lookup { ip } => {
            let store = open_store(&config, None);
            print_json(&store.manager().lookup(&ip))?;
        }
        Command::CheckRule { file } => {
            let text = fs::read_to_string(&file)?;
            check_rule_available(&text)?;
            println!("{}: ok", file.display());
        }
        Command::TestRule {
            file,
            src_ip,
            url,
            host,
            method,
            user_agent,
            referer,
            cookies,
            body,
        } => {
            let text = fs::read_to_string(&file)?;
            let store = open_store(&config, None);
            let request = RuleTestRequest {
                test_src_ip: src_ip,
                host,
                url,
                method,
                user_agent,
                referer,
                cookies,
                body,
                ..RuleTestRequest::default()
            };
            let matched = test_rule(&text, &request, store.manager())?;
            print_json(&matched)?;
        }
        Command::Decode {
            body_file,
            content_type,
            content_encoding,
            transfer_encoding,
        } => {
            let body = fs::read(&body_file)?;
            let headers = header_map(&[
                ("content-type", content_type.as_ref()),
                ("content-encoding", content_encoding.as_ref()),
                ("transfer-encoding", transfer_encoding.as_ref()),
            ])?;
            let decoded = waf_inspect::content::decode(&headers, &body)?;
            eprintln!(
                "charset={} coding={} chunked={} bytes={}",
                decoded.charset,
                decoded.coding,
                decoded.chunked,
                decoded.content.len()
            );
            println!("{}", decoded.text());
        }
        Command::Inspect {
            url,
            host,
            method,
            headers,
            body_file,
            peer,
            tls,
            listen_port,
        } => {
            let metrics = Arc::new(MetricsCollector::new()?);
            let store = open_store(&config, Some(metrics.clone()));
            let engine = Arc::new(RuleEngine::new(config.rules.max_cycles).with_metrics(metrics.clone()));
            let rules = config.load_rule_configs(config_dir)?;
            if !rules.is_empty() {
                engine.load_rules(&rules)?;
            }
            let inspector = Inspector::new(&config, store.manager().clone(), engine).with_metrics(metrics);

            let body = match body_file {
                Some(path) => fs::read(path)?,
                None => Vec::new(),
            };
            let mut builder = Request::builder().method(method.as_str()).uri(url.as_str()).header("host", host.as_str());
            for line in &headers {
                let (name, value) = line
                    .split_once(':')
                    .ok_or_else(|| format!("header '{}' is not 'Name: value'", line))?;
                builder = builder.header(name.trim(), value.trim());
            }
            let mut request = builder.body(Bytes::from(body))?;

            let ctx = RequestContext::new(peer, tls, listen_port);
            let inspection = inspector.inspect_request(&ctx, &mut request);
            print_json(&inspection)?;
        }
        Command::AutoJump {
            request_host,
            configured_host,
            path,
            no_ssl,
            no_auto_jump,
        } => {
            let (jump, domain) = should_auto_jump_https(
                &request_host,
                &configured_host,
                &path,
                !no_auto_jump,
                !no_ssl,
                &config.https.acme_challenge_path,
            );
            let location = jump.then(|| RedirectTarget::https(domain.as_str(), &path).location());
            print_json(&json!({ "jump": jump, "domain": domain, "location": location }))?;
        }
        Command::Watch => {
            let store = Arc::new(open_store(&config, None));
            let mut watcher = GeoDbWatcher::new(store.data_dir());
            let events = watcher.start_watching(store.clone())?;
            for families in events {
                info!("Reloaded geolocation databases: {:?}", families);
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    info!("Loading configuration from: {}", args.config);
    let config = WafConfig::from_file(&args.config).unwrap_or_else(|e| {
        error!("Failed to load configuration from {}: {}", args.config, e);
        error!("Using default configuration");
        WafConfig::default()
    });
    let config_dir = Path::new(&args.config)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    if let Err(e) = run(args, config, &config_dir) {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
