//! The type registry: a closed set of normalized data types that make
//! heterogeneous raw values comparable without any fuzzy matching. Each type
//! knows how to parse raw JSON into a canonical form and how to compare two
//! canonical forms, optionally under a tolerance.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use wav_core::url::{normalize_query, QueryParams};

/// Default duration tolerance: max(3 minutes, 10% of the larger value).
pub const DURATION_ABS_TOLERANCE_SECS: f64 = 180.0;
pub const DURATION_REL_TOLERANCE: f64 = 0.10;
/// Default distance tolerance: max(10 meters, 2% of the larger value).
pub const DISTANCE_ABS_TOLERANCE_METERS: f64 = 10.0;
pub const DISTANCE_REL_TOLERANCE: f64 = 0.02;
/// Default per-axis coordinate tolerance in degrees (~11 m at the equator).
pub const COORDINATE_TOLERANCE_DEGREES: f64 = 1e-4;

const NUMBER_EPSILON: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown type identifier: '{0}'")]
    UnknownType(String),
    #[error("cannot parse {type_id} from {value}: {reason}")]
    Invalid {
        type_id: &'static str,
        value: String,
        reason: String,
    },
    #[error("alternatives require 2+ items, got {0}")]
    BadAlternatives(usize),
}

fn invalid(type_id: &'static str, value: &Value, reason: &str) -> ParseError {
    ParseError::Invalid {
        type_id,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Closed enumeration of normalized types. Stateless and shared freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Date,
    Currency,
    Duration,
    Distance,
    Coordinates,
    FullAddress,
    Url,
    Boolean,
    String,
    Number,
    Null,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Currency => "currency",
            Self::Duration => "duration",
            Self::Distance => "distance",
            Self::Coordinates => "coordinates",
            Self::FullAddress => "full_address",
            Self::Url => "url",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Number => "number",
            Self::Null => "null",
        }
    }

    /// Resolve a type identifier. Unknown identifiers fail fast: they are a
    /// configuration error, never silently treated as `string`.
    pub fn parse_id(id: &str) -> Result<Self, ParseError> {
        match id.trim().to_ascii_lowercase().as_str() {
            "date" | "month" => Ok(Self::Date),
            "currency" => Ok(Self::Currency),
            "duration" => Ok(Self::Duration),
            "distance" => Ok(Self::Distance),
            "coordinates" => Ok(Self::Coordinates),
            "full_address" | "address" => Ok(Self::FullAddress),
            "url" => Ok(Self::Url),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "number" | "integer" => Ok(Self::Number),
            "null" => Ok(Self::Null),
            other => Err(ParseError::UnknownType(other.to_string())),
        }
    }

    /// Pick the type for a raw JSON scalar when no schema entry exists.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            _ => Self::String,
        }
    }

    /// Parse and canonicalize a raw value. A JSON array (for scalar-shaped
    /// types) denotes acceptable alternatives and must carry 2+ entries.
    pub fn normalize(self, raw: &Value) -> Result<Normalized, ParseError> {
        if raw.is_null() {
            return Ok(Normalized::one(self, Canonical::Null));
        }
        if let Value::Array(items) = raw {
            if self != Self::Coordinates || !is_coordinate_pair(items) {
                if items.len() < 2 {
                    return Err(ParseError::BadAlternatives(items.len()));
                }
                let alternatives = items
                    .iter()
                    .map(|item| self.parse_scalar(item))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Normalized {
                    data_type: self,
                    alternatives,
                });
            }
        }
        Ok(Normalized::one(self, self.parse_scalar(raw)?))
    }

    fn parse_scalar(self, raw: &Value) -> Result<Canonical, ParseError> {
        match self {
            Self::Date => parse_date(raw),
            Self::Currency => parse_currency(raw),
            Self::Duration => parse_duration(raw),
            Self::Distance => parse_distance(raw),
            Self::Coordinates => parse_coordinates(raw),
            Self::FullAddress => parse_address(raw),
            Self::Url => parse_url(raw),
            Self::Boolean => parse_boolean(raw),
            Self::String => Ok(parse_text(raw)),
            Self::Number => parse_number(raw),
            Self::Null => match raw {
                Value::Null => Ok(Canonical::Null),
                other => Err(invalid("null", other, "only null matches the null type")),
            },
        }
    }
}

/// Canonical value forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    Date(String),
    Currency(f64),
    DurationSecs(f64),
    DistanceMeters(f64),
    Coordinates { lat: f64, lon: f64 },
    Address(BTreeMap<String, String>),
    Url {
        base_url: String,
        query_params: QueryParams,
    },
    Boolean(bool),
    Text {
        normalized: String,
        /// Lightly normalized form (trim + lowercase + collapsed spaces)
        /// used for regex-pattern matching, where dash/quote munging would
        /// corrupt pattern syntax.
        pattern_input: String,
    },
    Number(f64),
    Null,
}

impl Canonical {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Date(s) => json!(s),
            Self::Currency(x) => json!(x),
            Self::DurationSecs(x) => json!(x),
            Self::DistanceMeters(x) => json!(x),
            Self::Coordinates { lat, lon } => json!({"latitude": lat, "longitude": lon}),
            Self::Address(fields) => {
                let map: Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect();
                Value::Object(map)
            }
            Self::Url {
                base_url,
                query_params,
            } => json!({"base_url": base_url, "query_params": query_params}),
            Self::Boolean(b) => json!(b),
            Self::Text { normalized, .. } => json!(normalized),
            Self::Number(x) => {
                if x.fract() == 0.0 && x.abs() < 9e15 {
                    json!(*x as i64)
                } else {
                    json!(x)
                }
            }
            Self::Null => Value::Null,
        }
    }
}

/// A parsed value with one or more acceptable alternatives. Two normalized
/// values match when any pair of alternatives matches.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub data_type: DataType,
    pub alternatives: Vec<Canonical>,
}

impl Normalized {
    fn one(data_type: DataType, canonical: Canonical) -> Self {
        Self {
            data_type,
            alternatives: vec![canonical],
        }
    }

    pub fn primary(&self) -> &Canonical {
        &self.alternatives[0]
    }

    pub fn is_null(&self) -> bool {
        self.alternatives.iter().all(|c| matches!(c, Canonical::Null))
    }

    pub fn to_value(&self) -> Value {
        self.primary().to_value()
    }

    pub fn matches(&self, other: &Normalized, tolerance: Option<f64>) -> bool {
        self.alternatives.iter().any(|a| {
            other
                .alternatives
                .iter()
                .any(|b| canonical_matches(a, b, tolerance))
        })
    }
}

/// Contract entry point: parse, canonicalize, compare.
pub fn compare(
    data_type: DataType,
    actual: &Value,
    expected: &Value,
    tolerance: Option<f64>,
) -> Result<bool, ParseError> {
    let actual = data_type.normalize(actual)?;
    let expected = data_type.normalize(expected)?;
    Ok(actual.matches(&expected, tolerance))
}

fn within(a: f64, b: f64, abs_tol: f64, rel_tol: f64, override_tol: Option<f64>) -> bool {
    let tol = override_tol.unwrap_or_else(|| abs_tol.max(rel_tol * a.abs().max(b.abs())));
    (a - b).abs() <= tol
}

fn canonical_matches(a: &Canonical, b: &Canonical, tolerance: Option<f64>) -> bool {
    match (a, b) {
        (Canonical::Null, Canonical::Null) => true,
        (Canonical::Date(x), Canonical::Date(y)) => x == y,
        (Canonical::Currency(x), Canonical::Currency(y)) => {
            (x * 100.0).round() == (y * 100.0).round()
        }
        (Canonical::DurationSecs(x), Canonical::DurationSecs(y)) => within(
            *x,
            *y,
            DURATION_ABS_TOLERANCE_SECS,
            DURATION_REL_TOLERANCE,
            tolerance,
        ),
        (Canonical::DistanceMeters(x), Canonical::DistanceMeters(y)) => within(
            *x,
            *y,
            DISTANCE_ABS_TOLERANCE_METERS,
            DISTANCE_REL_TOLERANCE,
            tolerance,
        ),
        (
            Canonical::Coordinates { lat: alat, lon: alon },
            Canonical::Coordinates { lat: blat, lon: blon },
        ) => {
            let tol = tolerance.unwrap_or(COORDINATE_TOLERANCE_DEGREES);
            (alat - blat).abs() <= tol && (alon - blon).abs() <= tol
        }
        (Canonical::Address(x), Canonical::Address(y)) => x == y,
        (
            Canonical::Url {
                base_url: xb,
                query_params: xq,
            },
            Canonical::Url {
                base_url: yb,
                query_params: yq,
            },
        ) => xb == yb && xq == yq,
        (Canonical::Boolean(x), Canonical::Boolean(y)) => x == y,
        (Canonical::Number(x), Canonical::Number(y)) => {
            (x - y).abs() <= NUMBER_EPSILON * x.abs().max(y.abs()).max(1.0)
        }
        (Canonical::Text { .. }, Canonical::Text { .. }) => text_matches(a, b),
        _ => false,
    }
}

fn is_regex_pattern(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('^') && s.ends_with('$')
}

fn text_matches(a: &Canonical, b: &Canonical) -> bool {
    let (Canonical::Text { normalized: an, pattern_input: ap },
         Canonical::Text { normalized: bn, pattern_input: bp }) = (a, b)
    else {
        return false;
    };
    for (pattern, input) in [(ap, bp), (bp, ap)] {
        if is_regex_pattern(pattern) {
            if let Ok(re) = Regex::new(&format!("^(?:{})$", &pattern[1..pattern.len() - 1])) {
                if re.is_match(input) {
                    return true;
                }
                continue;
            }
        }
    }
    an == bn
}

// ---------------------------------------------------------------------------
// Per-type parsers
// ---------------------------------------------------------------------------

const MONTHS_FULL: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];
const MONTHS_ABBR: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    MONTHS_FULL
        .iter()
        .position(|m| *m == lower)
        .or_else(|| MONTHS_ABBR.iter().position(|m| *m == lower))
        .map(|idx| idx as u32 + 1)
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

fn parse_date(raw: &Value) -> Result<Canonical, ParseError> {
    if let Some(n) = raw.as_u64() {
        if (1..=12).contains(&n) {
            return Ok(Canonical::Date(format!("{:02}", n)));
        }
        if (1000..=2999).contains(&n) {
            return Ok(Canonical::Date(n.to_string()));
        }
        return Err(invalid("date", raw, "number is neither a month nor a year"));
    }
    let Some(text) = raw.as_str() else {
        return Err(invalid("date", raw, "expected a string or number"));
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid("date", raw, "empty string"));
    }
    // Date-time strings: keep the calendar-date part.
    let date_part = text.split(['T']).next().unwrap_or(text);
    for format in DATE_FORMATS {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, format) {
            return Ok(Canonical::Date(date.format("%Y-%m-%d").to_string()));
        }
    }
    // Year-month forms: "2024-01", "January 2024", "Jan 2024".
    if let Some((year, month)) = parse_year_month(date_part) {
        return Ok(Canonical::Date(format!("{:04}-{:02}", year, month)));
    }
    // Month-only: "January", "jan", "1", "01".
    if let Some(month) = month_number(date_part) {
        return Ok(Canonical::Date(format!("{:02}", month)));
    }
    if let Ok(n) = date_part.parse::<u32>() {
        if (1..=12).contains(&n) {
            return Ok(Canonical::Date(format!("{:02}", n)));
        }
        if (1000..=2999).contains(&n) {
            return Ok(Canonical::Date(n.to_string()));
        }
    }
    Err(invalid("date", raw, "unrecognized date format"))
}

fn parse_year_month(text: &str) -> Option<(u32, u32)> {
    if let Some((year, month)) = text.split_once('-') {
        let year: u32 = year.trim().parse().ok()?;
        let month: u32 = month.trim().parse().ok()?;
        if (1000..=2999).contains(&year) && (1..=12).contains(&month) {
            return Some((year, month));
        }
        return None;
    }
    let (name, year) = text.rsplit_once(' ')?;
    let month = month_number(name.trim())?;
    let year: u32 = year.trim().parse().ok()?;
    if (1000..=2999).contains(&year) {
        Some((year, month))
    } else {
        None
    }
}

fn parse_currency(raw: &Value) -> Result<Canonical, ParseError> {
    if let Some(x) = raw.as_f64() {
        return Ok(Canonical::Currency((x * 100.0).round() / 100.0));
    }
    let Some(text) = raw.as_str() else {
        return Err(invalid("currency", raw, "expected a string or number"));
    };
    let mut cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥') && !c.is_whitespace())
        .collect();
    let negative = cleaned.contains('-');
    cleaned.retain(|c| c != '-' && c != '+');
    if cleaned.is_empty() {
        return Err(invalid("currency", raw, "no digits"));
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');
    let digits = if has_dot && has_comma {
        // The rightmost separator is the decimal point.
        if cleaned.rfind(',') > cleaned.rfind('.') {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if has_comma {
        // A lone comma followed by 1-2 digits is a decimal comma (European
        // style); otherwise commas group thousands.
        let after = cleaned.rsplit(',').next().unwrap_or("");
        if cleaned.matches(',').count() == 1 && (1..=2).contains(&after.len()) {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned
    };

    let amount: f64 = digits
        .parse()
        .map_err(|_| invalid("currency", raw, "not a decimal amount"))?;
    let amount = if negative { -amount } else { amount };
    Ok(Canonical::Currency((amount * 100.0).round() / 100.0))
}

fn parse_duration(raw: &Value) -> Result<Canonical, ParseError> {
    if let Some(x) = raw.as_f64() {
        return Ok(Canonical::DurationSecs(x));
    }
    let Some(text) = raw.as_str() else {
        return Err(invalid("duration", raw, "expected a string or number"));
    };
    let text = text.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err(invalid("duration", raw, "empty string"));
    }

    // Colon form: H:MM or H:MM:SS.
    let colon = Regex::new(r"^(\d+):(\d{1,2})(?::(\d{1,2}))?$").unwrap();
    if let Some(caps) = colon.captures(&text) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps
            .get(3)
            .map(|m| m.as_str().parse().unwrap_or(0.0))
            .unwrap_or(0.0);
        return Ok(Canonical::DurationSecs(
            hours * 3600.0 + minutes * 60.0 + seconds,
        ));
    }

    let hour_re = Regex::new(r"(\d+(?:\.\d+)?)\s*h(?:r|our)?s?").unwrap();
    let minute_re = Regex::new(r"(\d+(?:\.\d+)?)\s*m(?:in|inute)?s?").unwrap();
    let second_re = Regex::new(r"(\d+(?:\.\d+)?)\s*s(?:ec|econd)?s?").unwrap();

    let mut total = 0.0;
    let mut matched = false;
    if let Some(caps) = hour_re.captures(&text) {
        total += caps[1].parse::<f64>().unwrap_or(0.0) * 3600.0;
        matched = true;
    }
    if let Some(caps) = minute_re.captures(&text) {
        total += caps[1].parse::<f64>().unwrap_or(0.0) * 60.0;
        matched = true;
    }
    if let Some(caps) = second_re.captures(&text) {
        total += caps[1].parse::<f64>().unwrap_or(0.0);
        matched = true;
    }
    if matched {
        return Ok(Canonical::DurationSecs(total));
    }
    if let Ok(secs) = text.parse::<f64>() {
        return Ok(Canonical::DurationSecs(secs));
    }
    Err(invalid("duration", raw, "unrecognized duration format"))
}

fn parse_distance(raw: &Value) -> Result<Canonical, ParseError> {
    if let Some(x) = raw.as_f64() {
        return Ok(Canonical::DistanceMeters(x));
    }
    let Some(text) = raw.as_str() else {
        return Err(invalid("distance", raw, "expected a string or number"));
    };
    let text = text.trim().to_ascii_lowercase();
    let re = Regex::new(r"^([\d,]+(?:\.\d+)?)\s*(km|kilometers?|kilometres?|mi|miles?|m|meters?|metres?)?$")
        .unwrap();
    let Some(caps) = re.captures(&text) else {
        return Err(invalid("distance", raw, "unrecognized distance format"));
    };
    let amount: f64 = caps[1]
        .replace(',', "")
        .parse()
        .map_err(|_| invalid("distance", raw, "not a number"))?;
    let meters = match caps.get(2).map(|m| m.as_str()) {
        Some(unit) if unit.starts_with('k') => amount * 1000.0,
        Some(unit) if unit.starts_with("mi") => amount * 1609.34,
        Some(_) => amount,
        None => amount,
    };
    Ok(Canonical::DistanceMeters(meters))
}

fn coordinate_component(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_coordinate_pair(items: &[Value]) -> bool {
    items.len() == 2 && items.iter().all(|v| coordinate_component(v).is_some())
}

fn parse_coordinates(raw: &Value) -> Result<Canonical, ParseError> {
    match raw {
        Value::Object(map) => {
            let mut lat = None;
            let mut lon = None;
            for (key, value) in map {
                match key.to_ascii_lowercase().as_str() {
                    "latitude" | "lat" => lat = coordinate_component(value),
                    "longitude" | "lon" | "lng" => lon = coordinate_component(value),
                    _ => {}
                }
            }
            match (lat, lon) {
                (Some(lat), Some(lon)) => Ok(Canonical::Coordinates { lat, lon }),
                _ => Err(invalid(
                    "coordinates",
                    raw,
                    "expected latitude/longitude fields",
                )),
            }
        }
        Value::Array(items) if is_coordinate_pair(items) => Ok(Canonical::Coordinates {
            lat: coordinate_component(&items[0]).unwrap(),
            lon: coordinate_component(&items[1]).unwrap(),
        }),
        Value::String(s) => {
            let parts: Vec<&str> = s.split(',').map(str::trim).collect();
            if parts.len() == 2 {
                if let (Ok(lat), Ok(lon)) = (parts[0].parse(), parts[1].parse()) {
                    return Ok(Canonical::Coordinates { lat, lon });
                }
            }
            Err(invalid("coordinates", raw, "expected 'lat, lon'"))
        }
        other => Err(invalid(
            "coordinates",
            other,
            "expected an object, pair, or string",
        )),
    }
}

/// USPS state abbreviation table; both directions normalize to the full name.
const US_STATES: &[(&str, &str)] = &[
    ("al", "alabama"),
    ("ak", "alaska"),
    ("az", "arizona"),
    ("ar", "arkansas"),
    ("ca", "california"),
    ("co", "colorado"),
    ("ct", "connecticut"),
    ("de", "delaware"),
    ("fl", "florida"),
    ("ga", "georgia"),
    ("hi", "hawaii"),
    ("id", "idaho"),
    ("il", "illinois"),
    ("in", "indiana"),
    ("ia", "iowa"),
    ("ks", "kansas"),
    ("ky", "kentucky"),
    ("la", "louisiana"),
    ("me", "maine"),
    ("md", "maryland"),
    ("ma", "massachusetts"),
    ("mi", "michigan"),
    ("mn", "minnesota"),
    ("ms", "mississippi"),
    ("mo", "missouri"),
    ("mt", "montana"),
    ("ne", "nebraska"),
    ("nv", "nevada"),
    ("nh", "new hampshire"),
    ("nj", "new jersey"),
    ("nm", "new mexico"),
    ("ny", "new york"),
    ("nc", "north carolina"),
    ("nd", "north dakota"),
    ("oh", "ohio"),
    ("ok", "oklahoma"),
    ("or", "oregon"),
    ("pa", "pennsylvania"),
    ("ri", "rhode island"),
    ("sc", "south carolina"),
    ("sd", "south dakota"),
    ("tn", "tennessee"),
    ("tx", "texas"),
    ("ut", "utah"),
    ("vt", "vermont"),
    ("va", "virginia"),
    ("wa", "washington"),
    ("wv", "west virginia"),
    ("wi", "wisconsin"),
    ("wy", "wyoming"),
    ("dc", "district of columbia"),
];

fn expand_state(value: &str) -> String {
    US_STATES
        .iter()
        .find(|(abbr, _)| *abbr == value)
        .map(|(_, full)| full.to_string())
        .unwrap_or_else(|| value.to_string())
}

fn parse_address(raw: &Value) -> Result<Canonical, ParseError> {
    match raw {
        Value::Object(map) => {
            let mut fields = BTreeMap::new();
            for (key, value) in map {
                let normalized = match value {
                    Value::String(s) => normalize_text(s),
                    Value::Number(n) => n.to_string(),
                    Value::Null => String::new(),
                    other => {
                        return Err(invalid("full_address", other, "unsupported field value"))
                    }
                };
                let key_lower = key.to_ascii_lowercase();
                let normalized = if key_lower == "state" {
                    expand_state(&normalized)
                } else {
                    normalized
                };
                fields.insert(key_lower, normalized);
            }
            Ok(Canonical::Address(fields))
        }
        Value::String(s) => {
            let mut fields = BTreeMap::new();
            fields.insert("address".to_string(), normalize_text(s));
            Ok(Canonical::Address(fields))
        }
        other => Err(invalid("full_address", other, "expected an object or string")),
    }
}

fn parse_url(raw: &Value) -> Result<Canonical, ParseError> {
    let Some(text) = raw.as_str() else {
        return Err(invalid("url", raw, "expected a string"));
    };
    Ok(canonicalize_url(text))
}

/// Canonical URL form: lowercased scheme/host, default ports dropped,
/// fragment dropped, query split off into normalized parameters.
pub fn canonicalize_url(text: &str) -> Canonical {
    let trimmed = text.trim();
    let without_fragment = trimmed.split_once('#').map(|(u, _)| u).unwrap_or(trimmed);
    let (without_query, query) = match without_fragment.split_once('?') {
        Some((u, q)) => (u, q),
        None => (without_fragment, ""),
    };
    let base_url = match without_query.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = scheme.to_ascii_lowercase();
            let (authority, path) = match rest.split_once('/') {
                Some((authority, path)) => (authority, format!("/{}", path)),
                None => (rest, "/".to_string()),
            };
            let mut authority = authority.to_ascii_lowercase();
            let default_port = match scheme.as_str() {
                "http" => Some(":80"),
                "https" => Some(":443"),
                _ => None,
            };
            if let Some(port) = default_port {
                if let Some(stripped) = authority.strip_suffix(port) {
                    authority = stripped.to_string();
                }
            }
            format!("{}://{}{}", scheme, authority, path)
        }
        None => without_query.to_string(),
    };
    Canonical::Url {
        base_url,
        query_params: normalize_query(query),
    }
}

const TRUTHY: &[&str] = &["true", "yes", "y", "1", "on"];
const FALSY: &[&str] = &["false", "no", "n", "0", "off"];

fn parse_boolean(raw: &Value) -> Result<Canonical, ParseError> {
    match raw {
        Value::Bool(b) => Ok(Canonical::Boolean(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Ok(Canonical::Boolean(true)),
            Some(x) if x == 0.0 => Ok(Canonical::Boolean(false)),
            _ => Err(invalid("boolean", raw, "only 0 and 1 are boolean numbers")),
        },
        Value::String(s) => {
            let lower = s.trim().to_ascii_lowercase();
            if TRUTHY.contains(&lower.as_str()) {
                Ok(Canonical::Boolean(true))
            } else if FALSY.contains(&lower.as_str()) {
                Ok(Canonical::Boolean(false))
            } else {
                Err(invalid("boolean", raw, "not a recognized boolean literal"))
            }
        }
        other => Err(invalid("boolean", other, "expected a boolean-like value")),
    }
}

const NUMBER_WORDS: &[&str] = &[
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen", "twenty",
];

fn parse_number(raw: &Value) -> Result<Canonical, ParseError> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .map(Canonical::Number)
            .ok_or_else(|| invalid("number", raw, "not representable as f64")),
        Value::String(s) => {
            let trimmed = s.trim();
            let lower = trimmed.to_ascii_lowercase();
            if let Some(idx) = NUMBER_WORDS.iter().position(|w| *w == lower) {
                return Ok(Canonical::Number(idx as f64));
            }
            trimmed
                .replace(',', "")
                .parse::<f64>()
                .map(Canonical::Number)
                .map_err(|_| invalid("number", raw, "not numeric"))
        }
        other => Err(invalid("number", other, "expected a number or numeric string")),
    }
}

/// Full text normalization for literal comparison. Regex-pattern values keep
/// a lighter form (see `Canonical::Text::pattern_input`).
pub fn normalize_text(text: &str) -> String {
    let mut s = text.trim().to_string();
    // One pair of surrounding quotes.
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            s = s[1..s.len() - 1].to_string();
            break;
        }
    }
    let mut s = s.trim().to_string();
    if s.len() > 1 && s.ends_with('.') {
        s.pop();
    }
    let replaced: String = s
        .chars()
        .map(|c| match c {
            '\t' | '-' | '\u{2010}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' => ' ',
            other => other,
        })
        .collect();
    let lowered = replaced.to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn pattern_input_form(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_text(raw: &Value) -> Canonical {
    let text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Canonical::Text {
        normalized: normalize_text(&text),
        pattern_input: pattern_input_form(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(data_type: DataType, raw: Value) -> Normalized {
        data_type
            .normalize(&raw)
            .unwrap_or_else(|e| panic!("normalize {:?} failed: {}", raw, e))
    }

    fn assert_match(data_type: DataType, a: Value, b: Value) {
        assert!(
            compare(data_type, &a, &b, None).expect("compare"),
            "{:?} should match {:?} as {}",
            a,
            b,
            data_type.as_str()
        );
        // Comparison symmetry.
        assert!(compare(data_type, &b, &a, None).expect("compare"));
    }

    fn assert_no_match(data_type: DataType, a: Value, b: Value) {
        assert!(
            !compare(data_type, &a, &b, None).expect("compare"),
            "{:?} should not match {:?} as {}",
            a,
            b,
            data_type.as_str()
        );
        assert!(!compare(data_type, &b, &a, None).expect("compare"));
    }

    #[test]
    fn unknown_type_identifier_fails_fast() {
        let err = DataType::parse_id("fuzzy").expect_err("unknown id");
        assert!(matches!(err, ParseError::UnknownType(_)));
    }

    #[test]
    fn date_formats_are_interchangeable() {
        assert_match(DataType::Date, json!("Jan 5 2023"), json!("2023-01-05"));
        assert_match(DataType::Date, json!("January 5, 2023"), json!("2023-01-05"));
        assert_match(DataType::Date, json!("01/05/2023"), json!("2023-01-05"));
        assert_match(DataType::Date, json!("1/5/2023"), json!("2023-01-05"));
        assert_no_match(DataType::Date, json!("2023-01-06"), json!("2023-01-05"));
    }

    #[test]
    fn month_only_dates_normalize_to_month_number() {
        assert_match(DataType::Date, json!("january"), json!("Jan"));
        assert_match(DataType::Date, json!("January"), json!("01"));
        assert_match(DataType::Date, json!("1"), json!("Jan"));
        assert_no_match(DataType::Date, json!("Feb"), json!("Jan"));
    }

    #[test]
    fn eu_date_parses_when_unambiguous() {
        // Day 15 cannot be a month, so 15/01/2024 resolves as EU.
        assert_match(DataType::Date, json!("15/01/2024"), json!("2024-01-15"));
    }

    #[test]
    fn date_normalization_is_idempotent() {
        let once = norm(DataType::Date, json!("Jan 5 2023"));
        let twice = norm(DataType::Date, once.to_value());
        assert!(once.matches(&twice, None));
    }

    #[test]
    fn currency_strips_symbols_and_separators() {
        assert_match(DataType::Currency, json!("$1,234.56"), json!(1234.56));
        assert_match(DataType::Currency, json!("1234.56"), json!("$1234.56"));
        assert_match(DataType::Currency, json!("€1.234,56"), json!(1234.56));
        assert_match(DataType::Currency, json!("€100,00"), json!(100));
        assert_match(DataType::Currency, json!("-$5.00"), json!(-5));
        assert_no_match(DataType::Currency, json!("$1,234.56"), json!(1234.57));
    }

    #[test]
    fn duration_formats_and_tolerance() {
        assert_match(DataType::Duration, json!("1h 30m"), json!("90min"));
        assert_match(DataType::Duration, json!("2hr 30min"), json!("2 hours 30 minutes"));
        assert_match(DataType::Duration, json!("2h30m"), json!("2:30"));
        // 1 minute apart: inside the 3-minute default tolerance.
        assert_match(DataType::Duration, json!("30m"), json!("31m"));
        // Double the duration: far outside tolerance.
        assert_no_match(DataType::Duration, json!("30m"), json!("60m"));
        // Explicit zero tolerance restores exactness.
        assert!(!compare(DataType::Duration, &json!("30m"), &json!("31m"), Some(0.0))
            .expect("compare"));
    }

    #[test]
    fn distance_units_convert_to_meters() {
        assert_match(DataType::Distance, json!("10.5km"), json!("10500m"));
        assert_match(DataType::Distance, json!("10.5 km"), json!("10.5km"));
        // 6.5 mi == 10460.71 m, within 2% of 10.5 km.
        assert_match(DataType::Distance, json!("6.524mi"), json!("10.5km"));
        assert_match(DataType::Distance, json!("500m"), json!("505m"));
        assert_no_match(DataType::Distance, json!("500m"), json!("1000m"));
    }

    #[test]
    fn coordinates_accept_many_shapes() {
        let expected = json!({"latitude": 40.4416, "longitude": -79.9900});
        assert_match(DataType::Coordinates, json!({"lat": 40.4416, "lon": -79.99}), expected.clone());
        assert_match(DataType::Coordinates, json!([40.4416, -79.99]), expected.clone());
        assert_match(DataType::Coordinates, json!("40.4416, -79.9900"), expected.clone());
        assert_match(
            DataType::Coordinates,
            json!({"LATITUDE": "40.4416", "LONGITUDE": "-79.99"}),
            expected.clone(),
        );
        assert_no_match(DataType::Coordinates, json!([40.5, -79.99]), expected);
    }

    #[test]
    fn full_address_unifies_state_spellings() {
        let a = json!({"street": "5000 Forbes Ave", "city": "Pittsburgh", "state": "PA"});
        let b = json!({"street": "5000 forbes ave", "city": "PITTSBURGH", "state": "Pennsylvania"});
        assert_match(DataType::FullAddress, a, b);
        assert_no_match(
            DataType::FullAddress,
            json!({"city": "Pittsburgh", "state": "PA"}),
            json!({"city": "Philadelphia", "state": "PA"}),
        );
    }

    #[test]
    fn url_comparison_ignores_query_order_and_fragment() {
        assert_match(
            DataType::Url,
            json!("http://example.com/path?a=1&b=2"),
            json!("http://EXAMPLE.com:80/path?b=2&a=1#section"),
        );
        assert_no_match(
            DataType::Url,
            json!("http://example.com/path?a=1"),
            json!("https://example.com/path?a=1"),
        );
        assert_no_match(
            DataType::Url,
            json!("http://example.com/path?a=1&extra=x"),
            json!("http://example.com/path?a=1"),
        );
    }

    #[test]
    fn boolean_literal_forms() {
        assert_match(DataType::Boolean, json!("yes"), json!("true"));
        assert_match(DataType::Boolean, json!("Y"), json!(true));
        assert_match(DataType::Boolean, json!(1), json!("on"));
        assert_match(DataType::Boolean, json!("0"), json!("off"));
        assert_no_match(DataType::Boolean, json!("yes"), json!("no"));
        assert!(compare(DataType::Boolean, &json!("maybe"), &json!(true), None).is_err());
    }

    #[test]
    fn number_accepts_words_and_separators() {
        assert_match(DataType::Number, json!("six"), json!(6));
        assert_match(DataType::Number, json!("6.0"), json!(6));
        assert_match(DataType::Number, json!("1,234"), json!(1234));
        assert_no_match(DataType::Number, json!(42), json!(99));
    }

    #[test]
    fn string_normalization_is_generous_but_literal() {
        assert_match(DataType::String, json!("  Hello   World  "), json!("hello world"));
        assert_match(DataType::String, json!("'success'"), json!("success"));
        assert_match(DataType::String, json!("done."), json!("Done"));
        assert_match(DataType::String, json!("well—known"), json!("well known"));
        assert_match(DataType::String, json!("well-known"), json!("well known"));
        assert_no_match(DataType::String, json!("success"), json!("failure"));
    }

    #[test]
    fn string_regex_patterns_full_match() {
        assert_match(DataType::String, json!("^success$"), json!("SUCCESS"));
        assert_match(DataType::String, json!("^success.*$"), json!("success: done"));
        assert_match(DataType::String, json!(r"^\d{3}-\d{4}$"), json!("123-4567"));
        assert_no_match(DataType::String, json!("^success$"), json!("success!"));
        assert_no_match(DataType::String, json!("^test$"), json!("testing"));
        // Invalid pattern falls back to literal comparison.
        assert_match(DataType::String, json!("^[invalid($"), json!("^[invalid($"));
    }

    #[test]
    fn alternatives_match_on_any_overlap() {
        assert_match(DataType::String, json!(["success", "ok"]), json!("ok"));
        assert_match(DataType::Number, json!([100, 200]), json!(200));
        assert_match(DataType::String, json!(["success", "ok"]), json!(["ok", "done"]));
        assert_no_match(DataType::String, json!(["success", "ok"]), json!("failure"));
    }

    #[test]
    fn single_item_alternatives_are_rejected() {
        assert!(matches!(
            DataType::String.normalize(&json!(["only"])),
            Err(ParseError::BadAlternatives(1))
        ));
        assert!(matches!(
            DataType::Number.normalize(&json!([])),
            Err(ParseError::BadAlternatives(0))
        ));
    }

    #[test]
    fn coordinate_pair_is_not_treated_as_alternatives() {
        let normalized = norm(DataType::Coordinates, json!([40.44, -79.99]));
        assert_eq!(normalized.alternatives.len(), 1);
        assert!(matches!(
            normalized.primary(),
            Canonical::Coordinates { .. }
        ));
    }

    #[test]
    fn null_matches_only_null() {
        assert_match(DataType::Null, Value::Null, Value::Null);
        assert!(DataType::Null.normalize(&json!("x")).is_err());
        // Null raw under any type normalizes to the null canonical.
        assert!(norm(DataType::String, Value::Null).is_null());
    }

    #[test]
    fn normalization_is_idempotent_across_types() {
        let cases = [
            (DataType::Currency, json!("$1,234.56")),
            (DataType::Duration, json!("1h 30m")),
            (DataType::Distance, json!("10.5km")),
            (DataType::Boolean, json!("yes")),
            (DataType::Number, json!("1,234")),
            (DataType::String, json!("  Mixed   CASE  ")),
        ];
        for (data_type, raw) in cases {
            let once = norm(data_type, raw.clone());
            let twice = norm(data_type, once.to_value());
            assert!(
                once.matches(&twice, None),
                "{} normalization not idempotent for {:?}",
                data_type.as_str(),
                raw
            );
        }
    }
}
