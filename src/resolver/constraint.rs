use crate::error::Error;
use crate::naming::Source;
use semver::{Version, VersionReq};
use std::fmt;
use std::str::FromStr;

/// A parsed version constraint.
///
/// Registry constraints are semver ranges (possibly an `||` union); GitHub
/// dependencies are pinned to a tag and match only that exact string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Any(Vec<VersionReq>),
    Tag(String),
}

impl Constraint {
    pub fn parse(source: Source, name: &str, raw: &str) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidConstraint {
            name: name.to_string(),
            constraint: raw.to_string(),
            reason,
        };
        match source {
            Source::Github => {
                let tag = raw.trim();
                if tag.is_empty() || tag.contains(char::is_whitespace) {
                    return Err(invalid("GitHub dependencies need a single tag".into()));
                }
                if tag.contains("..")
                    || tag.contains('\\')
                    || tag.starts_with('/')
                    || tag.ends_with('/')
                    || tag.contains("//")
                {
                    return Err(invalid(format!("'{tag}' is not a valid git tag")));
                }
                Ok(Constraint::Tag(tag.to_string()))
            }
            Source::Poac => {
                let mut reqs = Vec::new();
                for part in raw.split("||").map(str::trim) {
                    if part.is_empty() && raw.contains("||") {
                        continue;
                    }
                    let canon = canonicalize_range(part);
                    let req = if canon == "*" {
                        VersionReq::STAR
                    } else {
                        VersionReq::from_str(&canon).map_err(|e| {
                            invalid(format!("'{canon}' is not a valid range: {e}"))
                        })?
                    };
                    reqs.push(req);
                }
                if reqs.is_empty() {
                    return Err(invalid("empty range".into()));
                }
                Ok(Constraint::Any(reqs))
            }
        }
    }

    /// Whether a concrete version string satisfies this constraint.
    pub fn matches(&self, version: &str) -> bool {
        match self {
            Constraint::Tag(tag) => tag == version,
            Constraint::Any(reqs) => match Version::parse(version) {
                Ok(v) => reqs.iter().any(|r| r.matches(&v)),
                Err(_) => false,
            },
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Tag(tag) => f.write_str(tag),
            Constraint::Any(reqs) => {
                let parts: Vec<String> = reqs.iter().map(|r| r.to_string()).collect();
                f.write_str(&parts.join(" || "))
            }
        }
    }
}

/// Rewrite a human-written range into the comma-separated comparator syntax the
/// `semver` crate accepts. `||` unions are split by the caller.
pub fn canonicalize_range(input: &str) -> String {
    let s = input.trim();
    if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("latest") {
        return "*".into();
    }

    if Version::parse(s).is_ok() {
        return format!("={s}");
    }

    // "1.2.3 - 2.3.4" => ">=1.2.3, <=2.3.4"
    if let Some(idx) = s.find(" - ") {
        let (a, b) = s.split_at(idx);
        let left = a.trim();
        let right = b[3..].trim();
        if is_version_like(left) && is_version_like(right) {
            return format!(">={left}, <={right}");
        }
    }

    // ">=1.0.0 and <2.0.0", ">= 1.0.0 < 2", ">=1.0.0, <2.0.0"
    let tokens: Vec<&str> = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("and"))
        .collect();
    if tokens.len() > 1 {
        let mut comps: Vec<String> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let t = tokens[i];
            if is_op(t) {
                match tokens.get(i + 1) {
                    Some(ver) => {
                        comps.push(format!("{t}{}", pad_version(ver)));
                        i += 2;
                        continue;
                    }
                    None => return s.to_string(),
                }
            }
            if let Some((op, ver)) = split_op(t) {
                comps.push(format!("{op}{}", pad_version(ver)));
                i += 1;
                continue;
            }
            if is_version_like(t) {
                comps.push(format!("={t}"));
                i += 1;
                continue;
            }
            return s.to_string();
        }
        return comps.join(", ");
    }

    if is_numeric(s) {
        return format!("^{s}.0.0");
    }
    if count_dots(s) == 1 && s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        let mut parts = s.split('.');
        if let (Some(maj), Some(min)) = (parts.next(), parts.next()) {
            if let Ok(min_i) = min.parse::<u64>() {
                return format!(">={maj}.{min}.0, <{maj}.{}.0", min_i + 1);
            }
        }
    }
    if s.ends_with(".x") || s.ends_with(".X") || s.ends_with(".*") {
        return expand_wildcard(s);
    }
    if let Some((op, ver)) = split_op(s) {
        return format!("{op}{}", pad_version(ver));
    }
    s.to_string()
}

fn is_op(t: &str) -> bool {
    matches!(t, ">" | "<" | ">=" | "<=" | "=" | "^" | "~")
}

/// `>=1.0` => (">=", "1.0")
fn split_op(t: &str) -> Option<(&str, &str)> {
    for op in [">=", "<=", ">", "<", "=", "^", "~"] {
        if let Some(rest) = t.strip_prefix(op) {
            if is_version_like(rest) {
                return Some((op, rest));
            }
        }
    }
    None
}

/// Comparison operators in `semver` accept partial versions, but keep full
/// triples when the input is purely numeric so the output reads uniformly.
fn pad_version(v: &str) -> String {
    if !v.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return v.to_string();
    }
    match count_dots(v) {
        0 => format!("{v}.0.0"),
        1 => format!("{v}.0"),
        _ => v.to_string(),
    }
}

fn is_numeric(t: &str) -> bool {
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

fn count_dots(t: &str) -> usize {
    t.chars().filter(|&c| c == '.').count()
}

fn is_version_like(t: &str) -> bool {
    let mut has_digit = false;
    for c in t.chars() {
        if c.is_ascii_digit() {
            has_digit = true;
            continue;
        }
        if !matches!(c, '.' | '-' | '+' | 'x' | 'X' | '*' | 'a'..='z' | 'A'..='Z') {
            return false;
        }
    }
    has_digit
}

fn expand_wildcard(pattern: &str) -> String {
    let parts: Vec<&str> = pattern.split('.').collect();
    let wild = |p: &str| p.eq_ignore_ascii_case("x") || p == "*";
    if parts.len() == 2 && wild(parts[1]) {
        if let Ok(maj) = parts[0].parse::<u64>() {
            return format!(">={maj}.0.0, <{}.0.0", maj + 1);
        }
    }
    if parts.len() == 3 && wild(parts[2]) {
        if let (Ok(maj), Ok(min)) = (parts[0].parse::<u64>(), parts[1].parse::<u64>()) {
            return format!(">={maj}.{min}.0, <{maj}.{}.0", min + 1);
        }
    }
    pattern.to_string()
}
