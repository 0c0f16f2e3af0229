//! Shared test infrastructure for resolution integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse, MessageResponseBuilder};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use crossdns::bindings::BindingResolver;
use crossdns::cluster::{
    Binding, Component, FieldReplicas, MemoryCluster, SpecPhase, Specification,
    MERGED_NAMESPACE, RESERVED_NAMESPACE, SPEC_LABEL, STATUS_LABEL,
};
use crossdns::config::{DnsConfig, EndpointConfig};
use crossdns::endpoints::{
    EndpointError, EndpointResolver, MetricsBackend, QueryResponse, RangeQuery, RpcError,
    SampleStream,
};
use crossdns::{CrossDnsHandler, SpecIndex};

// --- Constants ---

pub const ZONE: &str = "cluster.local";
pub const DEFAULT_IP: Ipv4Addr = Ipv4Addr::new(172, 17, 2, 35);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and
/// stored as raw wire-format bytes, which can then be parsed with
/// `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(io::Error::other)?;
        Ok(info)
    }
}

/// A response handler whose writes always fail.
#[derive(Clone)]
pub struct BrokenResponseHandler;

#[async_trait]
impl ResponseHandler for BrokenResponseHandler {
    async fn send_response<'a>(
        &mut self,
        _response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }
}

// --- Next handler ---

/// Stand-in for the next handler in the chain: counts hits and answers NXDOMAIN.
#[derive(Clone, Default)]
pub struct NextHandler {
    hits: Arc<AtomicUsize>,
}

impl NextHandler {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for NextHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let response = MessageResponseBuilder::from_message_request(request)
            .error_msg(request.header(), ResponseCode::NXDomain);
        response_handle
            .send_response(response)
            .await
            .expect("next handler failed to respond")
    }
}

// --- Telemetry backend ---

/// How the fake telemetry backend behaves.
#[derive(Clone)]
pub enum BackendMode {
    /// Return these `(field_flag, node_ip)` series.
    Series(Vec<(String, String)>),
    /// Answer with an HTTP-level error.
    Fail,
    /// Never answer.
    Hang,
}

/// In-process telemetry backend counting its calls.
pub struct FakeBackend {
    mode: BackendMode,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(mode: BackendMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
        })
    }

    /// Backend returning `(field, ip)` series.
    pub fn with_series(series: &[(&str, &str)]) -> Arc<Self> {
        Self::new(BackendMode::Series(
            series
                .iter()
                .map(|(f, ip)| (f.to_string(), ip.to_string()))
                .collect(),
        ))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsBackend for FakeBackend {
    async fn query_range(&self, _query: &RangeQuery) -> Result<QueryResponse, EndpointError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            BackendMode::Series(series) => Ok(QueryResponse {
                matrix: Some(
                    series
                        .iter()
                        .map(|(field, ip)| SampleStream {
                            metric: [
                                ("field_flag".to_string(), field.clone()),
                                ("node_ip".to_string(), ip.clone()),
                            ]
                            .into_iter()
                            .collect(),
                        })
                        .collect(),
                ),
            }),
            BackendMode::Fail => Err(EndpointError::Status {
                status: 503,
                error: RpcError {
                    code: 1,
                    message: "unavailable".to_string(),
                    reference: String::new(),
                },
            }),
            BackendMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(QueryResponse::default())
            }
        }
    }
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:5353".parse().unwrap(),
        zones: vec![ZONE.to_string()],
        ttl: 5,
        readiness_timeout_ms: 50,
        reserved_namespace: RESERVED_NAMESPACE.to_string(),
        merged_namespace: MERGED_NAMESPACE.to_string(),
    }
}

pub fn test_endpoint_config() -> EndpointConfig {
    EndpointConfig {
        default_ip: IpAddr::V4(DEFAULT_IP),
        timeout_ms: 100,
        ..EndpointConfig::default()
    }
}

// --- Cluster fixture builder ---

pub struct TestClusterBuilder {
    cluster: MemoryCluster,
    index: SpecIndex,
    spec_counter: u32,
    binding_counter: u32,
}

impl TestClusterBuilder {
    pub fn new() -> Self {
        Self {
            cluster: MemoryCluster::new(),
            index: SpecIndex::new(),
            spec_counter: 0,
            binding_counter: 0,
        }
    }

    /// Add a scheduled specification exposing `component` as `fqdn`.
    pub fn add_spec(&mut self, spec_name: &str, component: &str, fqdn: &str) -> &mut Self {
        self.spec_counter += 1;
        self.index.upsert(Specification {
            namespace: RESERVED_NAMESPACE.to_string(),
            name: spec_name.to_string(),
            uid: format!("uid-{}", self.spec_counter),
            phase: SpecPhase::Scheduled,
            deleting: false,
            components: vec![Component {
                name: component.to_string(),
                fqdn: Some(fqdn.to_string()),
            }],
        });
        self
    }

    /// Add a binding for `spec_name` with `(field, component, replicas)` assignments.
    pub fn add_binding(
        &mut self,
        spec_name: &str,
        status: &str,
        assignments: &[(&str, &str, i32)],
    ) -> &mut Self {
        self.binding_counter += 1;
        self.cluster.upsert_binding(Binding {
            namespace: MERGED_NAMESPACE.to_string(),
            name: format!("rb-{}", self.binding_counter),
            labels: [
                (SPEC_LABEL.to_string(), spec_name.to_string()),
                (STATUS_LABEL.to_string(), status.to_string()),
            ]
            .into_iter()
            .collect(),
            fields: assignments
                .iter()
                .map(|(field, component, n)| FieldReplicas {
                    field: field.to_string(),
                    replicas: [(component.to_string(), *n)].into_iter().collect(),
                })
                .collect(),
        });
        self
    }

    /// The binding store behind the fixture.
    pub fn cluster(&self) -> MemoryCluster {
        self.cluster.clone()
    }

    /// Mark the index ready and build a handler over `backend`.
    pub fn build(&self, backend: Arc<dyn MetricsBackend>) -> CrossDnsHandler {
        self.index.mark_ready();
        self.build_not_ready(backend)
    }

    /// Build a handler WITHOUT marking the index ready.
    pub fn build_not_ready(&self, backend: Arc<dyn MetricsBackend>) -> CrossDnsHandler {
        CrossDnsHandler::new(
            &test_dns_config(),
            self.index.clone(),
            BindingResolver::new(Arc::new(self.cluster.clone()), MERGED_NAMESPACE),
            EndpointResolver::new(backend, test_endpoint_config()),
        )
    }
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a fixed client address.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "10.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query<H: RequestHandler>(
    handler: &H,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let response = TestResponseHandler::new();
    handler.handle_request(&request, response.clone()).await;
    response.into_message()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert an authoritative NOERROR response without records.
pub fn assert_empty_authoritative(msg: &Message) {
    assert_response_code(msg, ResponseCode::NoError);
    assert!(msg.header().authoritative(), "expected AA flag");
    assert!(msg.answers().is_empty(), "unexpected answers: {:?}", msg.answers());
}

/// Assert an authoritative answer carrying exactly one A record from `allowed`.
pub fn assert_single_a(msg: &Message, allowed: &[Ipv4Addr]) -> Ipv4Addr {
    assert_response_code(msg, ResponseCode::NoError);
    assert!(msg.header().authoritative(), "expected AA flag");
    let ips = extract_a_ips(msg);
    assert_eq!(ips.len(), 1, "expected a single A record, got {:?}", ips);
    assert!(
        allowed.contains(&ips[0]),
        "{} not among candidates {:?}",
        ips[0],
        allowed
    );
    ips[0]
}
