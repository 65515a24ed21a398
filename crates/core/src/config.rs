//! Configuration sources and the resolved settings built from them.
//!
//! Settings live in a TOML document with dotted-key access
//! (`notifier.silent`, `smtp.host`, ...). `TATTLE_*` environment variables
//! override file values; a `.env` file is honoured via [`load_dotenv`].
//! The notifier never reads the environment itself: it asks a
//! [`ConfigProvider`] and resolves typed settings on each capture.

use std::path::{Path, PathBuf};
use std::time::Duration;

use toml::{Table, Value};

use crate::error::ConfigError;
use crate::types::TypeRegistry;

/// Dotted keys understood by the resolvers below.
pub mod keys {
    pub const SILENT: &str = "notifier.silent";
    pub const CAPTURE: &str = "notifier.capture";
    pub const IGNORE_DUPLICATES: &str = "notifier.ignore_duplicates";
    pub const IGNORED_BOTS: &str = "notifier.ignored_bots";
    pub const RECIPIENTS: &str = "notifier.to";
    pub const TYPES: &str = "notifier.types";

    pub const LEDGER_DIR: &str = "ledger.dir";
    pub const LEDGER_LOCK_TIMEOUT_MS: &str = "ledger.lock_timeout_ms";

    pub const SMTP_HOST: &str = "smtp.host";
    pub const SMTP_PORT: &str = "smtp.port";
    pub const SMTP_TLS: &str = "smtp.tls";
    pub const SMTP_FROM: &str = "smtp.from";

    pub const TEMPLATE_SUBJECT: &str = "template.subject";
    pub const TEMPLATE_BODY: &str = "template.body";
}

/// Crawler tokens ignored when `notifier.ignored_bots` is not configured.
pub const DEFAULT_IGNORED_BOTS: &[&str] = &["googlebot", "bingbot", "slurp", "ia_archiver"];

pub const DEFAULT_LEDGER_DIR: &str = "data/ledger";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Key/value lookup used by the notifier to resolve its settings.
pub trait ConfigProvider: Send + Sync {
    /// Value at a dotted key, or `None` when unset.
    fn get(&self, key: &str) -> Option<Value>;
}

// ── TOML-backed provider ──────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TomlConfig {
    root: Table,
}

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Bool,
    Int,
    Str,
    List,
}

/// `TATTLE_*` variable → dotted key.
const ENV_OVERRIDES: &[(&str, &str, EnvKind)] = &[
    ("TATTLE_SILENT", keys::SILENT, EnvKind::Bool),
    ("TATTLE_CAPTURE", keys::CAPTURE, EnvKind::List),
    ("TATTLE_IGNORE_DUPLICATES", keys::IGNORE_DUPLICATES, EnvKind::Bool),
    ("TATTLE_IGNORED_BOTS", keys::IGNORED_BOTS, EnvKind::List),
    ("TATTLE_TO", keys::RECIPIENTS, EnvKind::List),
    ("TATTLE_LEDGER_DIR", keys::LEDGER_DIR, EnvKind::Str),
    ("TATTLE_LEDGER_LOCK_TIMEOUT_MS", keys::LEDGER_LOCK_TIMEOUT_MS, EnvKind::Int),
    ("TATTLE_SMTP_HOST", keys::SMTP_HOST, EnvKind::Str),
    ("TATTLE_SMTP_PORT", keys::SMTP_PORT, EnvKind::Int),
    ("TATTLE_SMTP_TLS", keys::SMTP_TLS, EnvKind::Bool),
    ("TATTLE_SMTP_FROM", keys::SMTP_FROM, EnvKind::Str),
];

impl TomlConfig {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let root: Table = toml::from_str(toml_str)?;
        Ok(Self { root })
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Set a dotted key, creating intermediate tables as needed.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let mut parts: Vec<&str> = key.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };

        let mut table = &mut self.root;
        for part in parts {
            let entry = table
                .entry(part)
                .or_insert_with(|| Value::Table(Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(Table::new());
            }
            table = match entry {
                Value::Table(inner) => inner,
                _ => return,
            };
        }
        table.insert(last.to_string(), value.into());
    }

    /// Apply `TATTLE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `TATTLE_*` overrides from the given variables.
    ///
    /// Lists are comma separated. Unparseable values are skipped with a warning.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, raw) in vars {
            let Some((_, key, kind)) = ENV_OVERRIDES.iter().find(|(n, _, _)| *n == name) else {
                continue;
            };

            let value = match kind {
                EnvKind::Str => Some(Value::String(raw.clone())),
                EnvKind::Bool => parse_bool(&raw).map(Value::Boolean),
                EnvKind::Int => raw.trim().parse::<i64>().ok().map(Value::Integer),
                EnvKind::List => Some(Value::Array(
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| Value::String(s.to_string()))
                        .collect(),
                )),
            };

            match value {
                Some(v) => self.set(key, v),
                None => tracing::warn!(var = %name, value = %raw, "ignoring unparseable override"),
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let mut current = self.root.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }
}

impl ConfigProvider for TomlConfig {
    fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key).cloned()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Typed accessors ───────────────────────────────────────────

fn bool_or<P: ConfigProvider + ?Sized>(p: &P, key: &str, default: bool) -> Result<bool, ConfigError> {
    match p.get(key) {
        None => Ok(default),
        Some(Value::Boolean(b)) => Ok(b),
        Some(_) => Err(ConfigError::invalid(key, "boolean")),
    }
}

fn opt_string<P: ConfigProvider + ?Sized>(p: &P, key: &str) -> Result<Option<String>, ConfigError> {
    match p.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ConfigError::invalid(key, "string")),
    }
}

fn required_string<P: ConfigProvider + ?Sized>(p: &P, key: &str) -> Result<String, ConfigError> {
    opt_string(p, key)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn opt_u64<P: ConfigProvider + ?Sized>(p: &P, key: &str) -> Result<Option<u64>, ConfigError> {
    match p.get(key) {
        None => Ok(None),
        Some(Value::Integer(i)) if i >= 0 => Ok(Some(i as u64)),
        Some(_) => Err(ConfigError::invalid(key, "non-negative integer")),
    }
}

/// A single string is accepted as a one-element list.
fn string_list<P: ConfigProvider + ?Sized>(
    p: &P,
    key: &str,
    default: &[&str],
) -> Result<Vec<String>, ConfigError> {
    match p.get(key) {
        None => Ok(default.iter().map(|s| s.to_string()).collect()),
        Some(value) => value_to_strings(key, value),
    }
}

fn value_to_strings(key: &str, value: Value) -> Result<Vec<String>, ConfigError> {
    match value {
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(ConfigError::invalid(key, "list of strings")),
            })
            .collect(),
        _ => Err(ConfigError::invalid(key, "list of strings")),
    }
}

// ── Type registry ─────────────────────────────────────────────

impl TypeRegistry {
    /// Resolve `[notifier.types]` (`kind = [parents]`). Unset means empty.
    ///
    /// This walks the whole parent graph, so callers resolve it once and
    /// keep the result.
    pub fn from_provider<P: ConfigProvider + ?Sized>(p: &P) -> Result<Self, ConfigError> {
        match p.get(keys::TYPES) {
            None => Ok(Self::new()),
            Some(Value::Table(table)) => {
                let mut edges = Vec::with_capacity(table.len());
                for (kind, parents) in table {
                    let key = format!("{}.{}", keys::TYPES, kind);
                    edges.push((kind, value_to_strings(&key, parents)?));
                }
                Ok(Self::from_parents(edges))
            }
            Some(_) => Err(ConfigError::invalid(keys::TYPES, "table of kind = [parents]")),
        }
    }
}

// ── Notifier ──────────────────────────────────────────────────

/// Resolved notifier settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Global kill-switch: nothing is checked, recorded or sent.
    pub silent: bool,
    /// Kinds to notify; `"*"` captures everything.
    pub capture: Vec<String>,
    /// Suppress repeats of the same fingerprint within a day.
    pub ignore_duplicates: bool,
    /// Lower-cased user-agent substrings identifying crawlers.
    pub ignored_bots: Vec<String>,
    pub recipients: Vec<String>,
}

impl NotifierConfig {
    /// Read only the silent flag. Defaults to `true` so an unconfigured
    /// deployment never sends mail.
    pub fn is_silent<P: ConfigProvider + ?Sized>(p: &P) -> Result<bool, ConfigError> {
        bool_or(p, keys::SILENT, true)
    }

    pub fn from_provider<P: ConfigProvider + ?Sized>(p: &P) -> Result<Self, ConfigError> {
        let ignored_bots = string_list(p, keys::IGNORED_BOTS, DEFAULT_IGNORED_BOTS)?
            .into_iter()
            .map(|bot| bot.trim().to_lowercase())
            .filter(|bot| !bot.is_empty())
            .collect();

        Ok(Self {
            silent: Self::is_silent(p)?,
            capture: string_list(p, keys::CAPTURE, &[])?,
            ignore_duplicates: bool_or(p, keys::IGNORE_DUPLICATES, true)?,
            ignored_bots,
            recipients: string_list(p, keys::RECIPIENTS, &[])?,
        })
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            silent = self.silent,
            capture = ?self.capture,
            ignore_duplicates = self.ignore_duplicates,
            ignored_bots = self.ignored_bots.len(),
            recipients = self.recipients.len(),
            "notifier config loaded"
        );
    }
}

// ── Ledger ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub dir: PathBuf,
    pub lock_timeout: Duration,
}

impl LedgerConfig {
    pub fn from_provider<P: ConfigProvider + ?Sized>(p: &P) -> Result<Self, ConfigError> {
        let dir = opt_string(p, keys::LEDGER_DIR)?.unwrap_or_else(|| DEFAULT_LEDGER_DIR.to_string());
        let timeout_ms = opt_u64(p, keys::LEDGER_LOCK_TIMEOUT_MS)?.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);
        Ok(Self {
            dir: PathBuf::from(dir),
            lock_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LEDGER_DIR),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

// ── SMTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    /// Defaults to 587 when unset.
    pub port: Option<u16>,
    /// `None` means STARTTLS.
    pub tls: Option<bool>,
    pub from: String,
}

impl SmtpConfig {
    pub fn from_provider<P: ConfigProvider + ?Sized>(p: &P) -> Result<Self, ConfigError> {
        let port = opt_u64(p, keys::SMTP_PORT)?
            .map(|port| u16::try_from(port).map_err(|_| ConfigError::invalid(keys::SMTP_PORT, "port number")))
            .transpose()?;
        let tls = match p.get(keys::SMTP_TLS) {
            None => None,
            Some(Value::Boolean(b)) => Some(b),
            Some(_) => return Err(ConfigError::invalid(keys::SMTP_TLS, "boolean")),
        };

        Ok(Self {
            host: required_string(p, keys::SMTP_HOST)?,
            port,
            tls,
            from: required_string(p, keys::SMTP_FROM)?,
        })
    }
}

// ── Templates ─────────────────────────────────────────────────

/// Optional overrides for the built-in mail templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateConfig {
    pub subject: Option<String>,
    pub body: Option<String>,
}

impl TemplateConfig {
    pub fn from_provider<P: ConfigProvider + ?Sized>(p: &P) -> Result<Self, ConfigError> {
        Ok(Self {
            subject: opt_string(p, keys::TEMPLATE_SUBJECT)?,
            body: opt_string(p, keys::TEMPLATE_BODY)?,
        })
    }
}
