//! beeconnect CLI - inspect file-backed connection state
//!
//!   beeconnect status            → {"connected": true, "wallet": "injected", "cache": {...}}
//!   beeconnect cache             → persisted query-cache snapshot
//!   beeconnect clear             → remove snapshot and connection flags
//!
//! Storage location:
//!   $BEECONNECT_ROOT/<app>/data/storage.json, or the platform data dir
//!
//! Output format:
//!   --json     Output compact JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use anyhow::{bail, Context, Result};
use beeconnect::core::keys::{env as env_keys, storage as keys};
use beeconnect::logging::{init_logging_with, LogConfig};
use beeconnect::persist::{ClientStorage, FileStorage, PersistedClient};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_APP: &str = "beeconnect";

fn main() {
    // stdout carries command output; keep stderr quiet unless asked.
    init_logging_with(&LogConfig::from_env().with_default_directives("beeconnect=warn,error"));

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("beeconnect {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("status") => cmd_status(&opts),
        Some("cache") => cmd_cache(&opts),
        Some("clear") => cmd_clear(&opts),
        Some(cmd) => Err(anyhow::anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = !opts.json && (opts.pretty || std::io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{:#}", e)}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    app: Option<String>,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--app" | "-a" => {
                    if i + 1 < args.len() {
                        opts.app = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        if opts.app.is_none() {
            opts.app = env::var(env_keys::APP).ok().filter(|s| !s.is_empty());
        }
        opts
    }

    fn app(&self) -> &str {
        self.app.as_deref().unwrap_or(DEFAULT_APP)
    }
}

fn open_storage(opts: &ParsedArgs) -> Result<(Arc<FileStorage>, ClientStorage)> {
    let app = opts.app();
    if app.is_empty() || app.contains(['/', '\\']) {
        bail!("invalid app name: {:?}", app);
    }
    let file = Arc::new(FileStorage::open(app).with_context(|| format!("opening storage for {}", app))?);
    debug!(path = %file.path().display(), "storage opened");
    Ok((file.clone(), ClientStorage::new(file)))
}

fn cache_summary(snapshot: Option<&PersistedClient>) -> Value {
    match snapshot {
        Some(s) => json!({
            "present": true,
            "timestamp": s.timestamp,
            "buster": s.buster,
            "queries": s.client_state.queries.len(),
        }),
        None => json!({"present": false}),
    }
}

fn cmd_status(opts: &ParsedArgs) -> Result<Value> {
    let (file, storage) = open_storage(opts)?;
    let snapshot = storage.get_item::<PersistedClient>(keys::CACHE);
    Ok(json!({
        "app": opts.app(),
        "path": file.path().display().to_string(),
        "connected": storage.get_item::<bool>(keys::CONNECTED).unwrap_or(false),
        "wallet": storage.get_item::<String>(keys::WALLET),
        "cache": cache_summary(snapshot.as_ref()),
    }))
}

fn cmd_cache(opts: &ParsedArgs) -> Result<Value> {
    let (_, storage) = open_storage(opts)?;
    match storage.get_item::<PersistedClient>(keys::CACHE) {
        Some(snapshot) => Ok(serde_json::to_value(&snapshot)?),
        None => Ok(Value::Null),
    }
}

fn cmd_clear(opts: &ParsedArgs) -> Result<Value> {
    let (_, storage) = open_storage(opts)?;
    for key in keys::ALL {
        storage.remove_item(key);
    }
    Ok(json!({"cleared": keys::ALL.iter().map(|k| storage.key(k)).collect::<Vec<_>>()}))
}

fn print_usage() {
    println!(
        r#"beeconnect - wallet connection state inspector

USAGE:
    beeconnect <command> [options]

COMMANDS:
    status                  Connection flags and cache summary
    cache                   Print the persisted query-cache snapshot
    clear                   Remove the snapshot and connection flags

OPTIONS:
    --app, -a <name>        Application name (default: beeconnect, env: BEECONNECT_APP)
    --json                  Compact JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

ENVIRONMENT:
    BEECONNECT_ROOT         Storage root (default: platform data dir)
    BEECONNECT_LOG_FORMAT   Log format: text, pretty or json (default: text)
    BEECONNECT_LOG_JSON     Set to 1 for JSON logs when no format is named
    RUST_LOG                Log filter (default: beeconnect=warn,error)
"#
    );
}
