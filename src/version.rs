//! Maven version ordering and version-range syntax.
//!
//! The ordering follows the rules of Maven's `ComparableVersion` closely enough
//! to pick the highest published release: numeric segments compare as numbers,
//! well-known qualifiers rank `alpha < beta < milestone < rc < snapshot < release < sp`,
//! and trailing zero/release segments are ignored so `1`, `1.0` and `1.0.0` are equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::coordinate::is_path_segment;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Number(String),
    Qualifier(String),
}

impl Item {
    fn parse(token: &str) -> Self {
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            let trimmed = token.trim_start_matches('0');
            Item::Number(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
        } else {
            Item::Qualifier(canonical_qualifier(token))
        }
    }

    fn is_null(&self) -> bool {
        match self {
            Item::Number(n) => n == "0",
            Item::Qualifier(q) => q.is_empty(),
        }
    }
}

fn canonical_qualifier(token: &str) -> String {
    match token {
        "a" => "alpha".to_string(),
        "b" => "beta".to_string(),
        "m" => "milestone".to_string(),
        "cr" => "rc".to_string(),
        "ga" | "final" | "release" => String::new(),
        other => other.to_string(),
    }
}

fn qualifier_rank(q: &str) -> usize {
    match q {
        "alpha" => 0,
        "beta" => 1,
        "milestone" => 2,
        "rc" => 3,
        "snapshot" => 4,
        "" => 5,
        "sp" => 6,
        _ => 7,
    }
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_qualifiers(a: &str, b: &str) -> Ordering {
    qualifier_rank(a)
        .cmp(&qualifier_rank(b))
        .then_with(|| a.cmp(b))
}

fn compare_items(a: Option<&Item>, b: Option<&Item>) -> Ordering {
    let zero = Item::Number("0".to_string());
    let release = Item::Qualifier(String::new());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(item), None) => match item {
            Item::Number(_) => compare_items(Some(item), Some(&zero)),
            Item::Qualifier(_) => compare_items(Some(item), Some(&release)),
        },
        (None, Some(item)) => compare_items(Some(item), None).reverse(),
        (Some(Item::Number(x)), Some(Item::Number(y))) => compare_numbers(x, y),
        (Some(Item::Qualifier(x)), Some(Item::Qualifier(y))) => compare_qualifiers(x, y),
        (Some(Item::Number(_)), Some(Item::Qualifier(_))) => Ordering::Greater,
        (Some(Item::Qualifier(_)), Some(Item::Number(_))) => Ordering::Less,
    }
}

/// A version string together with its parsed ordering key.
#[derive(Debug, Clone)]
pub struct MavenVersion {
    raw: String,
    items: Vec<Item>,
}

impl MavenVersion {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        let mut items = Vec::new();
        let mut token = String::new();
        let mut last_digit: Option<bool> = None;
        let mut segment_start = 0usize;

        for ch in lower.chars() {
            if ch == '.' || ch == '-' || ch == '_' {
                if !token.is_empty() {
                    items.push(Item::parse(&token));
                    token.clear();
                }
                if ch == '-' {
                    // `1.0.0-rc` and `1-rc` are the same version.
                    while items.len() > segment_start + 1
                        && items.last().is_some_and(|i| matches!(i, Item::Number(n) if n == "0"))
                    {
                        items.pop();
                    }
                    segment_start = items.len();
                }
                last_digit = None;
                continue;
            }
            let digit = ch.is_ascii_digit();
            if last_digit.is_some_and(|d| d != digit) && !token.is_empty() {
                items.push(Item::parse(&token));
                token.clear();
            }
            token.push(ch);
            last_digit = Some(digit);
        }
        if !token.is_empty() {
            items.push(Item::parse(&token));
        }

        while items.last().is_some_and(Item::is_null) {
            items.pop();
        }

        Self {
            raw: raw.trim().to_string(),
            items,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for MavenVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MavenVersion {}

impl PartialOrd for MavenVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MavenVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.items.len().max(other.items.len());
        for idx in 0..len {
            let ord = compare_items(self.items.get(idx), other.items.get(idx));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for MavenVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionRangeError {
    #[error("empty version range")]
    Empty,
    #[error("unbalanced brackets in version range '{0}'")]
    Unbalanced(String),
    #[error("version range '{0}' must have at most two bounds")]
    TooManyBounds(String),
    #[error("single-version range '{0}' must be closed on both sides")]
    OpenSingleVersion(String),
    #[error("lower bound is greater than upper bound in '{0}'")]
    Inverted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: MavenVersion,
    inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Restriction {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl Restriction {
    fn contains(&self, version: &MavenVersion) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(b) if b.inclusive => version >= &b.version,
            Some(b) => version > &b.version,
        };
        let below_upper = match &self.upper {
            None => true,
            Some(b) if b.inclusive => version <= &b.version,
            Some(b) => version < &b.version,
        };
        above_lower && below_upper
    }
}

/// Maven interval notation: `[1.0,2.0)`, `[0,)`, `(,1.0]`, `[1.5]`, and unions
/// such as `[1,2),[3,4)`. A bare version (`1.0`) is a soft requirement that only
/// matches that exact version when resolving against an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    spec: String,
    restrictions: Vec<Restriction>,
}

impl VersionRange {
    /// `[0,)`: every published version.
    pub fn any() -> Self {
        Self {
            spec: "[0,)".to_string(),
            restrictions: vec![Restriction {
                lower: Some(Bound {
                    version: MavenVersion::parse("0"),
                    inclusive: true,
                }),
                upper: None,
            }],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.spec
    }

    pub fn contains(&self, version: &MavenVersion) -> bool {
        self.restrictions.iter().any(|r| r.contains(version))
    }

    /// Picks the highest of `versions` that satisfies the range. Entries that
    /// could not serve as a directory name are never candidates.
    pub fn highest_match<'a, I>(&self, versions: I) -> Option<MavenVersion>
    where
        I: IntoIterator<Item = &'a str>,
    {
        versions
            .into_iter()
            .filter(|v| is_path_segment(v.trim()))
            .map(MavenVersion::parse)
            .filter(|v| self.contains(v))
            .max()
    }

    fn parse_restriction(spec: &str, part: &str) -> Result<Restriction, VersionRangeError> {
        let lower_inclusive = part.starts_with('[');
        let upper_inclusive = part.ends_with(']');
        let inner = &part[1..part.len() - 1];

        let bounds: Vec<&str> = inner.split(',').map(str::trim).collect();
        match bounds.as_slice() {
            [single] => {
                if !lower_inclusive || !upper_inclusive || single.is_empty() {
                    return Err(VersionRangeError::OpenSingleVersion(spec.to_string()));
                }
                let version = MavenVersion::parse(single);
                Ok(Restriction {
                    lower: Some(Bound {
                        version: version.clone(),
                        inclusive: true,
                    }),
                    upper: Some(Bound {
                        version,
                        inclusive: true,
                    }),
                })
            }
            [lower, upper] => {
                let lower = (!lower.is_empty()).then(|| Bound {
                    version: MavenVersion::parse(lower),
                    inclusive: lower_inclusive,
                });
                let upper = (!upper.is_empty()).then(|| Bound {
                    version: MavenVersion::parse(upper),
                    inclusive: upper_inclusive,
                });
                if let (Some(l), Some(u)) = (&lower, &upper)
                    && l.version > u.version
                {
                    return Err(VersionRangeError::Inverted(spec.to_string()));
                }
                Ok(Restriction { lower, upper })
            }
            _ => Err(VersionRangeError::TooManyBounds(spec.to_string())),
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        if spec.is_empty() {
            return Err(VersionRangeError::Empty);
        }

        if !spec.starts_with(['[', '(']) {
            let version = MavenVersion::parse(spec);
            return Ok(Self {
                spec: spec.to_string(),
                restrictions: vec![Restriction {
                    lower: Some(Bound {
                        version: version.clone(),
                        inclusive: true,
                    }),
                    upper: Some(Bound {
                        version,
                        inclusive: true,
                    }),
                }],
            });
        }

        let mut restrictions = Vec::new();
        let mut rest = spec;
        while !rest.is_empty() {
            if !rest.starts_with(['[', '(']) {
                return Err(VersionRangeError::Unbalanced(spec.to_string()));
            }
            let close = rest
                .find([']', ')'])
                .ok_or_else(|| VersionRangeError::Unbalanced(spec.to_string()))?;
            let part = &rest[..=close];
            if part[1..].contains(['[', '(']) {
                return Err(VersionRangeError::Unbalanced(spec.to_string()));
            }
            restrictions.push(Self::parse_restriction(spec, part)?);

            rest = rest[close + 1..].trim_start();
            if let Some(next) = rest.strip_prefix(',') {
                rest = next.trim_start();
                if rest.is_empty() {
                    return Err(VersionRangeError::Unbalanced(spec.to_string()));
                }
            }
        }

        Ok(Self {
            spec: spec.to_string(),
            restrictions,
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}
