//! Answer synthesis: endpoint list → candidate records → one selected record.

use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::query::QueryKind;

/// Candidate records for one query and the record actually answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Answer {
    /// Every record built from the endpoints.
    pub candidates: Vec<Record>,
    /// The single record returned to the client.
    pub selected: Option<Record>,
}

impl Answer {
    /// True when nothing will be answered.
    pub fn is_empty(&self) -> bool {
        self.selected.is_none()
    }

    /// Records to place in the answer section.
    pub fn records(&self) -> &[Record] {
        self.selected.as_slice()
    }
}

/// Builds records for resolved endpoints.
#[derive(Debug, Clone, Copy)]
pub struct AnswerSynthesizer {
    ttl: u32,
}

impl AnswerSynthesizer {
    /// Create a synthesizer issuing records with `ttl`.
    pub fn new(ttl: u32) -> Self {
        Self { ttl }
    }

    /// Build candidates and pick one with a per-request time-seeded RNG.
    pub fn synthesize(
        &self,
        name: &Name,
        class: DNSClass,
        kind: QueryKind,
        endpoints: &[IpAddr],
    ) -> Answer {
        self.synthesize_with(name, class, kind, endpoints, &mut request_rng())
    }

    /// Build candidates and pick one using `rng`.
    pub fn synthesize_with<R: Rng>(
        &self,
        name: &Name,
        class: DNSClass,
        kind: QueryKind,
        endpoints: &[IpAddr],
        rng: &mut R,
    ) -> Answer {
        let candidates = self.build_records(name, class, kind, endpoints);
        let selected = select_one(&candidates, rng).cloned();
        Answer {
            candidates,
            selected,
        }
    }

    /// One record per endpoint. Only A queries produce records, from IPv4
    /// endpoints.
    pub fn build_records(
        &self,
        name: &Name,
        class: DNSClass,
        kind: QueryKind,
        endpoints: &[IpAddr],
    ) -> Vec<Record> {
        if kind != QueryKind::A {
            return Vec::new();
        }

        endpoints
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .map(|v4| {
                let mut record = Record::from_rdata(name.clone(), self.ttl, RData::A(A::from(v4)));
                record.set_dns_class(class);
                record
            })
            .collect()
    }
}

/// Pick one record uniformly at random.
pub fn select_one<'a, R: Rng>(records: &'a [Record], rng: &mut R) -> Option<&'a Record> {
    if records.is_empty() {
        return None;
    }
    records.get(rng.random_range(0..records.len()))
}

fn request_rng() -> StdRng {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    StdRng::seed_from_u64(seed)
}
