//! Canonical well identifiers.
//!
//! Each source declares the identifier format it uses. Normalization is a
//! pure function of `(raw, format)`: anchored patterns only, so a partial
//! match is never accepted.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::ReconError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierFormat {
    /// Dominion Land Survey UWI, formatted or compact.
    Uwi,
    /// US API well number, 10/12/14 digits.
    Api,
    /// Operator label such as `W-001`.
    Label,
    /// Try `Uwi`, `Api`, `Label` in that order.
    Auto,
}

impl Default for IdentifierFormat {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for IdentifierFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uwi => write!(f, "uwi"),
            Self::Api => write!(f, "api"),
            Self::Label => write!(f, "label"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

pub const DEFAULT_LABEL_WIDTH: usize = 3;

fn uwi_formatted() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9][0-9A-Z]{2})/(\d{1,2})-(\d{1,2})-(\d{1,3})-(\d{1,2})W(\d)/(\d{1,2})$")
            .unwrap()
    })
}

fn uwi_compact() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9][0-9A-Z]{2})(\d{2})(\d{2})(\d{3})(\d{2})W(\d)(\d{2})$").unwrap()
    })
}

fn api_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{2})-?(\d{3})-?(\d{5})(?:-?(\d{2}))?(?:-?(\d{2}))?$").unwrap()
    })
}

fn label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]+)[-_ ]?(\d+)$").unwrap())
}

/// Normalize `raw` according to `format`.
///
/// `source` only labels the error.
pub fn normalize(
    raw: &str,
    format: IdentifierFormat,
    label_width: usize,
    source: &str,
) -> Result<String, ReconError> {
    let trimmed = raw.trim();
    let malformed = |reason: &str| ReconError::MalformedIdentifier {
        source_name: source.to_string(),
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(malformed("empty identifier"));
    }

    match format {
        IdentifierFormat::Uwi => normalize_uwi(trimmed).map_err(|r| malformed(&r)),
        IdentifierFormat::Api => normalize_api(trimmed).map_err(|r| malformed(&r)),
        IdentifierFormat::Label => normalize_label(trimmed, label_width).map_err(|r| malformed(&r)),
        IdentifierFormat::Auto => normalize_uwi(trimmed)
            .or_else(|_| normalize_api(trimmed))
            .or_else(|_| normalize_label(trimmed, label_width))
            .map_err(|_| malformed("matches no known identifier format")),
    }
}

fn normalize_uwi(s: &str) -> Result<String, String> {
    let upper = s.to_ascii_uppercase();
    let caps = uwi_formatted()
        .captures(&upper)
        .or_else(|| uwi_compact().captures(&upper))
        .ok_or_else(|| "not a DLS UWI".to_string())?;

    let num = |i: usize| -> u32 { caps[i].parse().unwrap_or(0) };
    let (lsd, sec, twp, rge, mer, es) = (num(2), num(3), num(4), num(5), num(6), num(7));

    if !(1..=16).contains(&lsd) {
        return Err(format!("legal subdivision {lsd} out of range 1-16"));
    }
    if !(1..=36).contains(&sec) {
        return Err(format!("section {sec} out of range 1-36"));
    }
    if !(1..=126).contains(&twp) {
        return Err(format!("township {twp} out of range 1-126"));
    }
    if !(1..=34).contains(&rge) {
        return Err(format!("range {rge} out of range 1-34"));
    }
    if !(1..=6).contains(&mer) {
        return Err(format!("meridian {mer} out of range 1-6"));
    }

    Ok(format!(
        "{}{lsd:02}{sec:02}{twp:03}{rge:02}W{mer}{es:02}",
        &caps[1]
    ))
}

fn normalize_api(s: &str) -> Result<String, String> {
    let caps = api_number()
        .captures(s)
        .ok_or_else(|| "not an API well number".to_string())?;

    if &caps[1] == "00" {
        return Err("API state code 00 is not assigned".into());
    }

    let sidetrack = caps.get(4).map_or("00", |m| m.as_str());
    let event = caps.get(5).map_or("00", |m| m.as_str());
    Ok(format!("{}{}{}{sidetrack}{event}", &caps[1], &caps[2], &caps[3]))
}

fn normalize_label(s: &str, width: usize) -> Result<String, String> {
    let caps = label()
        .captures(s)
        .ok_or_else(|| "not a well label".to_string())?;
    let number: u64 = caps[2]
        .parse()
        .map_err(|_| format!("label number '{}' too large", &caps[2]))?;
    Ok(format!(
        "{}-{number:0width$}",
        caps[1].to_ascii_uppercase()
    ))
}
