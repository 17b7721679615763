pub mod models {
    pub mod connected_drive;
}

pub mod channels;
pub mod charge_profile;
pub mod client;
pub mod config;
pub mod handler;
pub mod status;
pub mod units;
pub mod services {
    pub mod commands;
    pub mod poller;
}

use crate::channels::LogSink;
use crate::client::ConnectedDriveClient;
use crate::config::Config;
use crate::handler::VehicleChannelHandler;
use crate::services::{commands, poller::Poller};
use log::{error, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (region={:?}, vehicle_type={:?}, units={:?}, refresh_interval={}s, request_timeout={}s)",
        cfg.region,
        cfg.vehicle_type,
        cfg.units,
        cfg.refresh_interval.as_secs(),
        cfg.request_timeout.as_secs()
    );

    // 2) Authenticate
    let client = ConnectedDriveClient::new(&cfg)
        .map_err(|e| format!("ConnectedDrive auth failed (credentials or client auth wrong?): {}", e))?;
    info!("Authenticated to ConnectedDrive at {}", cfg.region.server());

    // 3) Command input
    let commands = commands::spawn_stdin_reader()?;

    // 4) Poll loop (steady cadence)
    let handler = VehicleChannelHandler::new(cfg.units, cfg.vehicle_type.capabilities(), cfg.vin.clone());
    let mut poller = Poller::new(client, handler);
    info!("Starting poll loop: interval={}s", cfg.refresh_interval.as_secs());
    poller.run_loop(cfg.refresh_interval, &commands, &mut LogSink)
}

/// Pick the `.env` file named by `--env-file`, else `./.env` if present, and load it.
fn configure_env_from_args<I>(args: I) -> Result<Option<LoadedEnvFile>, String>
where
    I: IntoIterator<Item = OsString>,
{
    match env_file_from_args(args)? {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            load_env_file(&path)?;
            Ok(Some(LoadedEnvFile { path, explicit: true }))
        }
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let path = cwd.join(".env");
            if !path.is_file() {
                return Ok(None);
            }
            load_env_file(&path)?;
            Ok(Some(LoadedEnvFile { path, explicit: false }))
        }
    }
}

/// Arguments after the program name.
fn env_file_from_args<I>(args: I) -> Result<Option<PathBuf>, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        let value = match arg.to_str() {
            Some("--env-file") => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            Some(s) if s.starts_with("--env-file=") => match &s["--env-file=".len()..] {
                "" => return Err("`--env-file` requires a path argument".to_string()),
                path => PathBuf::from(path),
            },
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        };
        if env_file.replace(value).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }
    Ok(env_file)
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in content.lines().enumerate() {
        let Some((key, value)) =
            parse_env_assignment(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Values already in the process environment win.
        if std::env::var_os(&key).is_none() {
            // Mutating the process environment is unsafe once other threads run; no thread exists yet.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// `KEY=value`, optionally prefixed with `export`. `None` for blanks and comments.
fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw_value) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    Ok(Some((key.to_string(), parse_env_value(raw_value)?)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    match trimmed.chars().next() {
        None => Ok(String::new()),
        Some(quote @ ('"' | '\'')) => parse_quoted(&trimmed[1..], quote),
        Some(_) => Ok(trimmed.split('#').next().unwrap_or_default().trim_end().to_string()),
    }
}

/// Body of a quoted value after the opening quote. Escapes apply inside double quotes only.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let kind = if quote == '"' { "double" } else { "single" };
    let mut result = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == quote {
            let remainder = chars.as_str().trim();
            if remainder.is_empty() || remainder.starts_with('#') {
                return Ok(result);
            }
            return Err(format!("unexpected characters after closing {} quote", kind));
        }
        if ch == '\\' && quote == '"' {
            let escaped = chars
                .next()
                .ok_or_else(|| "unterminated escape sequence in double-quoted value".to_string())?;
            result.push(match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            continue;
        }
        result.push(ch);
    }

    Err(format!("unterminated {}-quoted value", kind))
}

fn main() {
    let loaded_env = match configure_env_from_args(std::env::args_os().skip(1)) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "connected-drive {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
