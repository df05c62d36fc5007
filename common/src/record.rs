//! Parseo de líneas `TIMESTAMP LEVEL MESSAGE`.
//!
//! Sólo nos interesan tres cosas de cada línea: el timestamp, el nivel y
//! las métricas numéricas que aparezcan en el mensaje. Una línea que no
//! parsea no es un error fatal: se devuelve como `MalformedRecord`.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Nombre de la métrica de tiempo de respuesta en `LogRecord::metrics`.
pub const RESPONSE_TIME_METRIC: &str = "response_time_ms";

/// Claves key=value que también cuentan como tiempo de respuesta.
const RESPONSE_TIME_ALIASES: [&str; 3] = ["response_time_ms", "duration_ms", "latency_ms"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// Acepta "INFO", "info", "[ERROR]", "WARN:" ...
    pub fn parse(token: &str) -> Option<Level> {
        let t = token
            .trim_start_matches('[')
            .trim_end_matches(':')
            .trim_end_matches(']')
            .to_ascii_uppercase();
        match t.as_str() {
            "TRACE" => Some(Level::Trace),
            "DEBUG" => Some(Level::Debug),
            "INFO" => Some(Level::Info),
            "WARN" | "WARNING" => Some(Level::Warn),
            "ERROR" => Some(Level::Error),
            "FATAL" | "CRITICAL" => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Level::Error | Level::Fatal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
}

/// Línea sin timestamp o sin nivel reconocible.
///
/// Si al menos tiene nivel, igual cuenta para errores y tiempos de respuesta.
/// Si tiene timestamp, cuenta como línea de su segundo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRecord {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Option<Level>,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Record(LogRecord),
    Malformed(MalformedRecord),
}

impl ParsedLine {
    pub fn level(&self) -> Option<Level> {
        match self {
            ParsedLine::Record(r) => Some(r.level),
            ParsedLine::Malformed(m) => m.level,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            ParsedLine::Record(r) => Some(r.timestamp),
            ParsedLine::Malformed(m) => m.timestamp,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParsedLine::Record(r) => &r.message,
            ParsedLine::Malformed(m) => &m.message,
        }
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        match self {
            ParsedLine::Record(r) => &r.metrics,
            ParsedLine::Malformed(m) => &m.metrics,
        }
    }

    pub fn response_time_ms(&self) -> Option<f64> {
        self.metrics().get(RESPONSE_TIME_METRIC).copied()
    }

    /// Un request es una línea que trae su tiempo de respuesta
    /// ("Request processed in 12ms", `duration_ms=12`, ...).
    pub fn is_request(&self) -> bool {
        self.response_time_ms().is_some()
    }
}

fn processed_in_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bprocessed in\s+(\d+(?:\.\d+)?)\s*ms\b").unwrap())
}

fn key_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)=(-?\d+(?:\.\d+)?)(?:ms)?\b").unwrap()
    })
}

/// Separa el primer token (hasta whitespace) del resto de la línea.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// RFC 3339 en el primer token, o "YYYY-MM-DD HH:MM:SS[.fff]" en los dos primeros.
fn parse_timestamp(line: &str) -> Option<(DateTime<Utc>, &str)> {
    let (first, rest) = split_token(line);
    if let Ok(ts) = DateTime::parse_from_rfc3339(first) {
        return Some((ts.with_timezone(&Utc), rest));
    }

    let (second, rest) = split_token(rest);
    let joined = format!("{} {}", first, second);
    let naive = NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some((naive.and_utc(), rest))
}

/// Extrae las métricas numéricas del mensaje.
pub fn extract_metrics(message: &str) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();

    for cap in key_value_re().captures_iter(message) {
        if let Ok(v) = cap[2].parse::<f64>() {
            metrics.insert(cap[1].to_string(), v);
        }
    }

    if let Some(cap) = processed_in_re().captures(message) {
        if let Ok(v) = cap[1].parse::<f64>() {
            metrics.insert(RESPONSE_TIME_METRIC.to_string(), v);
        }
    }

    if !metrics.contains_key(RESPONSE_TIME_METRIC) {
        let alias = RESPONSE_TIME_ALIASES
            .iter()
            .find_map(|k| metrics.get(*k).copied());
        if let Some(v) = alias {
            metrics.insert(RESPONSE_TIME_METRIC.to_string(), v);
        }
    }

    metrics
}

/// Parsea una línea. Devuelve `None` para líneas vacías.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some((timestamp, rest)) = parse_timestamp(line) {
        let (level_tok, message) = split_token(rest);
        if let Some(level) = Level::parse(level_tok) {
            return Some(ParsedLine::Record(LogRecord {
                timestamp,
                level,
                message: message.to_string(),
                metrics: extract_metrics(message),
            }));
        }
        return Some(ParsedLine::Malformed(MalformedRecord {
            timestamp: Some(timestamp),
            level: None,
            message: rest.to_string(),
            metrics: extract_metrics(rest),
        }));
    }

    // Sin timestamp: rescatamos el nivel si la línea empieza con uno
    let (first, rest) = split_token(line);
    let (level, message) = match Level::parse(first) {
        Some(level) => (Some(level), rest),
        None => (None, line),
    };

    Some(ParsedLine::Malformed(MalformedRecord {
        timestamp: None,
        level,
        message: message.to_string(),
        metrics: extract_metrics(message),
    }))
}
