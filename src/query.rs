//! Query name parsing.
//!
//! A query name is first stripped of its owning zone; the remaining labels are
//! read nearest-to-record first:
//!
//! ```text
//! api.svc.cluster.local   (zone cluster.local)
//!   → relative "api.svc"
//!   → A/AAAA: hostname = "api"
//!   → SRV:    cluster  = "api"
//! ```
//!
//! Only the first relative label is interpreted. Trailing labels are kept in
//! [`LogicalQuery::labels`] but are not consumed by resolution.

use hickory_proto::rr::RecordType;
use thiserror::Error;

/// Pseudo-label for service queries.
pub const SVC: &str = "svc";
/// Pseudo-label for pod queries.
pub const POD: &str = "pod";

/// Query types handled by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// IPv4 address query.
    A,
    /// IPv6 address query.
    Aaaa,
    /// Service location query.
    Srv,
}

impl QueryKind {
    /// Map a record type to a handled kind, `None` for anything else.
    pub fn from_record_type(rtype: RecordType) -> Option<Self> {
        match rtype {
            RecordType::A => Some(QueryKind::A),
            RecordType::AAAA => Some(QueryKind::Aaaa),
            RecordType::SRV => Some(QueryKind::Srv),
            _ => None,
        }
    }
}

/// Query name parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The name cannot be interpreted as a resolver query.
    #[error("invalid query name {0:?}")]
    Invalid(String),
}

/// Structured form of an incoming query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalQuery {
    /// Full query name, lowercase, without the trailing dot.
    pub name: String,
    /// Zone-relative labels, nearest-to-record first.
    pub labels: Vec<String>,
    /// Target hostname (A/AAAA).
    pub hostname: Option<String>,
    /// Target cluster/field (SRV).
    pub cluster: Option<String>,
}

impl LogicalQuery {
    /// True for apex queries, which carry no further structure.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Exposed-name keys to try against the spec index, most specific first.
    pub fn lookup_keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(2);
        if !self.name.is_empty() {
            keys.push(self.name.as_str());
        }
        if let Some(host) = self.hostname.as_deref() {
            if host != self.name {
                keys.push(host);
            }
        }
        keys
    }
}

/// Lowercase `name` and drop any trailing dot.
pub fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Strip `zone` from the end of `name` (both normalized).
///
/// Returns the relative part (`""` when `name` is the zone apex), or `None`
/// if `name` is not inside `zone`. An empty zone is the root.
pub fn trim_zone<'a>(name: &'a str, zone: &str) -> Option<&'a str> {
    if zone.is_empty() {
        return Some(name);
    }
    if name == zone {
        return Some("");
    }
    name.strip_suffix(zone)?.strip_suffix('.')
}

/// Parse a zone-relative name for the given query kind.
pub fn parse(name: &str, relative: &str, kind: QueryKind) -> Result<LogicalQuery, QueryError> {
    let mut query = LogicalQuery {
        name: normalize(name),
        ..Default::default()
    };

    // Apex queries resolve to NODATA.
    if relative.is_empty() || relative == SVC || relative == POD {
        return Ok(query);
    }

    let labels: Vec<String> = relative.split('.').map(str::to_string).collect();
    if labels.iter().any(|l| l.is_empty() || l == "_") {
        return Err(QueryError::Invalid(relative.to_string()));
    }

    let first = labels[0].clone();
    match kind {
        QueryKind::A | QueryKind::Aaaa => query.hostname = Some(first),
        QueryKind::Srv => query.cluster = Some(first),
    }
    query.labels = labels;

    Ok(query)
}
