//! Hickory request handler running the resolution pipeline.
//!
//! ```text
//! query → zone? → type? → parse? → ready? → spec/component? → fields? → endpoints → answer
//!          └─ no: next handler ─┘   │        └─ no: empty AA ─┘   └─ no: SERVFAIL
//!                                   └─ no: SERVFAIL
//! ```

use async_trait::async_trait;
use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_server::authority::{Catalog, MessageResponseBuilder};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::io;
use std::iter;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::answer::{Answer, AnswerSynthesizer};
use crate::bindings::{locate_component, BindingResolver};
use crate::config::DnsConfig;
use crate::endpoints::EndpointResolver;
use crate::index::SpecIndex;
use crate::metrics::{self, QueryResult, Timer};
use crate::query::{self, QueryKind};

/// Result of running the pipeline for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not handled here; forward to the next handler.
    Decline,
    /// Authoritative NOERROR answer, possibly without records.
    Answer(Answer),
    /// Server failure.
    ServFail,
}

/// Resolves multi-cluster service names, forwarding everything else to `N`.
pub struct CrossDnsHandler<N = Catalog> {
    zones: Vec<String>,
    index: SpecIndex,
    bindings: BindingResolver,
    endpoints: EndpointResolver,
    synthesizer: AnswerSynthesizer,
    readiness_timeout: Duration,
    next: N,
}

impl CrossDnsHandler {
    /// Create a handler whose next handler is an empty catalog.
    pub fn new(
        config: &DnsConfig,
        index: SpecIndex,
        bindings: BindingResolver,
        endpoints: EndpointResolver,
    ) -> Self {
        let mut zones: Vec<String> = config.zones.iter().map(|z| query::normalize(z)).collect();
        // Longest zone wins.
        zones.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        zones.dedup();

        Self {
            zones,
            index,
            bindings,
            endpoints,
            synthesizer: AnswerSynthesizer::new(config.ttl),
            readiness_timeout: config.readiness_timeout(),
            next: Catalog::new(),
        }
    }
}

impl<N> CrossDnsHandler<N> {
    /// Replace the next handler.
    pub fn with_next<M: RequestHandler>(self, next: M) -> CrossDnsHandler<M> {
        CrossDnsHandler {
            zones: self.zones,
            index: self.index,
            bindings: self.bindings,
            endpoints: self.endpoints,
            synthesizer: self.synthesizer,
            readiness_timeout: self.readiness_timeout,
            next,
        }
    }

    /// Configured zones, longest first.
    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    /// Zone-relative part of a normalized `name` for the longest matching zone.
    pub fn match_zone<'a>(&self, name: &'a str) -> Option<&'a str> {
        self.zones
            .iter()
            .find_map(|zone| query::trim_zone(name, zone))
    }

    /// Run the pipeline for one question.
    pub async fn resolve(&self, name: &Name, rtype: RecordType, class: DNSClass) -> Outcome {
        let timer = Timer::start();
        let rtype_str = rtype.to_string();
        let qname = query::normalize(&name.to_ascii());

        let Some(relative) = self.match_zone(&qname) else {
            trace!(name = %qname, "outside configured zones");
            metrics::record_query(&rtype_str, QueryResult::Declined, timer.elapsed());
            return Outcome::Decline;
        };

        let Some(kind) = QueryKind::from_record_type(rtype) else {
            trace!(name = %qname, rtype = %rtype_str, "unsupported record type");
            metrics::record_query(&rtype_str, QueryResult::Declined, timer.elapsed());
            return Outcome::Decline;
        };

        let logical = match query::parse(&qname, relative, kind) {
            Ok(q) => q,
            Err(e) => {
                debug!(name = %qname, error = %e, "declining unparseable query");
                metrics::record_query(&rtype_str, QueryResult::Declined, timer.elapsed());
                return Outcome::Decline;
            }
        };

        if logical.is_empty() {
            metrics::record_query(&rtype_str, QueryResult::Empty, timer.elapsed());
            return Outcome::Answer(Answer::default());
        }

        if self.index.wait_ready(self.readiness_timeout).await.is_err() {
            warn!(name = %qname, "spec index not ready, returning SERVFAIL");
            metrics::record_query(&rtype_str, QueryResult::NotReady, timer.elapsed());
            return Outcome::ServFail;
        }

        let target = match locate_component(&self.index, &logical.lookup_keys()) {
            Ok(t) => t,
            Err(miss) => {
                debug!(name = %qname, ?miss, "no component for name");
                metrics::record_query(&rtype_str, QueryResult::Empty, timer.elapsed());
                return Outcome::Answer(Answer::default());
            }
        };

        let fields = match self.bindings.active_fields(&target.spec, &target.component) {
            Ok(f) => f,
            Err(e) => {
                warn!(name = %qname, error = %e, "field resolution failed, returning SERVFAIL");
                metrics::record_query(&rtype_str, QueryResult::ServFail, timer.elapsed());
                return Outcome::ServFail;
            }
        };

        let endpoints = self.endpoints.resolve(&fields).await;
        let answer = self.synthesizer.synthesize(name, class, kind, &endpoints);
        metrics::record_candidates(answer.candidates.len());

        let result = if answer.is_empty() {
            QueryResult::Empty
        } else {
            QueryResult::Answered
        };
        debug!(
            name = %qname,
            spec = %target.spec,
            component = %target.component,
            candidates = answer.candidates.len(),
            answered = !answer.is_empty(),
            "resolved query"
        );
        metrics::record_query(&rtype_str, result, timer.elapsed());

        Outcome::Answer(answer)
    }
}

#[async_trait]
impl<N: RequestHandler> RequestHandler for CrossDnsHandler<N> {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let header = request.header();
        if header.message_type() != MessageType::Query || header.op_code() != OpCode::Query {
            return self.next.handle_request(request, response_handle).await;
        }

        let Some(question) = request.queries().first() else {
            return self.next.handle_request(request, response_handle).await;
        };

        let outcome = self
            .resolve(
                question.original().name(),
                question.query_type(),
                question.query_class(),
            )
            .await;

        let builder = MessageResponseBuilder::from_message_request(request);
        let sent = match outcome {
            Outcome::Decline => return self.next.handle_request(request, response_handle).await,
            Outcome::Answer(answer) => {
                let mut response_header = Header::response_from_request(header);
                response_header.set_authoritative(true);
                response_header.set_response_code(ResponseCode::NoError);
                let response = builder.build(
                    response_header,
                    answer.records().iter(),
                    iter::empty(),
                    iter::empty(),
                    iter::empty(),
                );
                response_handle.send_response(response).await
            }
            Outcome::ServFail => {
                let response = builder.error_msg(header, ResponseCode::ServFail);
                response_handle.send_response(response).await
            }
        };

        sent.unwrap_or_else(|e| write_failed(header, e))
    }
}

fn write_failed(request_header: &Header, e: io::Error) -> ResponseInfo {
    error!(id = request_header.id(), error = %e, "failed to write DNS response");
    let mut header = Header::response_from_request(request_header);
    header.set_response_code(ResponseCode::ServFail);
    header.into()
}
