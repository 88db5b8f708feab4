//! The core of the machine: classifies a query against the cluster
//! domain, resolves it against the registry, and answers from the
//! wire cache whenever possible. Exposes `name`/`serve_dns`/`stats` as
//! inherent methods rather than a trait impl, since the outer chain
//! this plugs into is an external collaborator whose trait shape we
//! don't get to see.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use kubedns_proto::packet::header::update_message_id;
use kubedns_proto::packet::question::{DnsClass, Question};
use kubedns_proto::packet::record::Record;
use kubedns_proto::packet::{DnsPacket, QueryType};
use kubedns_registry::Registry;
use kubedns_resolver::{Query, ResolverConfig};
#[cfg(feature = "killer")]
use tokio::sync::mpsc;

use super::chain::{Next, Request, Writer};

#[cfg(feature = "killer")]
use kubedns_cache::wire::MAX_WIRE_SIZE;
#[cfg(feature = "killer")]
use kubedns_cache::WireCache;
#[cfg(feature = "killer")]
use kubedns_predictor::{Predictor, PrefetchCandidate, ServiceRef};

enum CacheBackend {
    Standard(kubedns_cache::MessageCache),
    #[cfg(feature = "killer")]
    Killer(Arc<WireCache>),
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    prefetches: AtomicU64,
    errors: AtomicU64,
    pack_errors: AtomicU64,
    write_errors: AtomicU64,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Queries and resolves against a Kubernetes cluster domain; defers
/// anything else to the next stage in the chain.
pub struct KubernetesMiddleware {
    registry: Option<Arc<dyn Registry>>,
    resolver_cfg: ResolverConfig,
    cache: CacheBackend,
    #[cfg(feature = "killer")]
    predictor: Option<Arc<Predictor>>,
    #[cfg(feature = "killer")]
    prefetch_tx: Option<mpsc::Sender<PrefetchCandidate>>,
    counters: Arc<Counters>,
}

impl KubernetesMiddleware {
    /// `registry` is `None` when the middleware is disabled
    /// (`dns.enabled = false`): every query is deferred and no
    /// subsystem is built.
    pub fn new(
        registry: Option<Arc<dyn Registry>>,
        resolver_cfg: ResolverConfig,
        cache_cfg: kubedns_cache::Config,
        predictor_cfg: kubedns_predictor::Config,
        killer_mode: bool,
    ) -> Self {
        let counters = Arc::new(Counters::default());

        #[cfg(feature = "killer")]
        {
            if killer_mode {
                let cache = Arc::new(WireCache::new());
                let predictor = Arc::new(predictor_cfg.build());
                let prefetch_tx = registry.as_ref().map(|registry| {
                    spawn_prefetch_worker(registry.clone(), cache.clone(), resolver_cfg.clone(), counters.clone())
                });
                return Self {
                    registry,
                    resolver_cfg,
                    cache: CacheBackend::Killer(cache),
                    predictor: Some(predictor),
                    prefetch_tx,
                    counters,
                };
            }
        }
        #[cfg(not(feature = "killer"))]
        {
            let _ = (&predictor_cfg, killer_mode);
        }

        Self {
            registry,
            resolver_cfg,
            cache: CacheBackend::Standard(cache_cfg.build()),
            #[cfg(feature = "killer")]
            predictor: None,
            #[cfg(feature = "killer")]
            prefetch_tx: None,
            counters,
        }
    }

    pub fn name(&self) -> &'static str {
        "kubernetes"
    }

    pub async fn serve_dns<W, R, N>(&self, writer: &mut W, request: &R, next: &N)
    where
        W: Writer,
        R: Request,
        N: Next,
    {
        let Some(registry) = &self.registry else {
            next.next().await;
            return;
        };

        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let message = request.message();
        let Some(question) = message.questions.first() else {
            next.next().await;
            return;
        };

        let mut qname = question.name.to_ascii_lowercase();
        if !qname.ends_with('.') {
            qname.push('.');
        }
        let qtype = question.qtype;

        let query = match kubedns_resolver::classify(&qname, &self.resolver_cfg.cluster_domain) {
            Some(query) => query,
            None => {
                next.next().await;
                return;
            }
        };

        #[cfg(feature = "killer")]
        if let CacheBackend::Killer(cache) = &self.cache {
            let now = unix_now();
            let mut buf = [0u8; MAX_WIRE_SIZE];
            if let Some(len) = cache.get(&qname, qtype.into_num(), now, &mut buf) {
                update_message_id(&mut buf[..len], message.header.id);
                if let Err(err) = writer.write(&buf[..len]) {
                    tracing::warn!(error = %err, "cache-hit write failed");
                    self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.observe_and_prefetch(&query, qtype, writer.remote_ip());
                return;
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let resolution = kubedns_resolver::resolve(registry.as_ref(), &qname, qtype, &self.resolver_cfg);
        if !resolution.handled {
            next.next().await;
            return;
        }

        let mut response =
            DnsPacket::response_from(message.header.id, question.clone()).with_answers(resolution.answer.records.clone());
        response.resources.extend(resolution.answer.extra.clone());
        response.header.response_code = resolution.rcode;
        let min_ttl = resolution.answer.records.iter().map(Record::ttl).min().unwrap_or(0);

        match response.create_buffer() {
            Ok(buffer) => {
                if let Err(err) = writer.write(&buffer.buf[..buffer.pos]) {
                    tracing::warn!(error = %err, "response write failed");
                    self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                match &self.cache {
                    CacheBackend::Standard(cache) => {
                        cache.persist(&qname, qtype, resolution.answer.records).await;
                    }
                    #[cfg(feature = "killer")]
                    CacheBackend::Killer(cache) => {
                        let now = unix_now();
                        cache.store(&qname, qtype.into_num(), &buffer.buf[..buffer.pos], min_ttl, now);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "packing response failed");
                self.counters.pack_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = writer.write_msg(&response) {
                    tracing::warn!(error = %err, "fallback write_msg failed");
                    self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    #[cfg(feature = "killer")]
    fn observe_and_prefetch(&self, query: &Query, qtype: QueryType, client: std::net::SocketAddr) {
        let Query::Service { namespace, name } = query else {
            return;
        };
        let Some(predictor) = &self.predictor else {
            return;
        };
        let service = ServiceRef::new(namespace.clone(), name.clone());
        let now = SystemTime::now();
        let client = client.ip();
        predictor.observe(client, service.clone(), qtype, now);
        let predictions = predictor.predict(client, &service, now);
        for candidate in predictor.prefetch_candidates(predictions, qtype) {
            if let Some(tx) = &self.prefetch_tx {
                let _ = tx.try_send(candidate);
            }
        }
    }

    #[cfg(not(feature = "killer"))]
    #[allow(dead_code)]
    fn observe_and_prefetch(&self, _query: &Query, _qtype: QueryType, _client: std::net::SocketAddr) {}

    pub fn stats(&self) -> HashMap<String, u64> {
        let mut out = HashMap::new();
        out.insert("queries".into(), self.counters.queries.load(Ordering::Relaxed));
        out.insert("cache_hits".into(), self.counters.cache_hits.load(Ordering::Relaxed));
        out.insert("cache_misses".into(), self.counters.cache_misses.load(Ordering::Relaxed));
        out.insert("prefetches".into(), self.counters.prefetches.load(Ordering::Relaxed));
        out.insert("errors".into(), self.counters.errors.load(Ordering::Relaxed));
        out.insert("pack_errors".into(), self.counters.pack_errors.load(Ordering::Relaxed));
        out.insert("write_errors".into(), self.counters.write_errors.load(Ordering::Relaxed));

        if let Some(registry) = &self.registry {
            let stats = registry.stats();
            out.insert("registry_services".into(), stats.services as u64);
            out.insert("registry_pods".into(), stats.pods as u64);
            out.insert("registry_endpoint_sets".into(), stats.endpoint_sets as u64);
        }

        #[cfg(feature = "killer")]
        if let Some(predictor) = &self.predictor {
            let stats = predictor.stats();
            out.insert("predictor_edges".into(), stats.edges as u64);
            out.insert("predictor_clients".into(), stats.clients as u64);
            out.insert("predictor_predictions_emitted".into(), stats.predictions_emitted);
            out.insert("predictor_prefetches".into(), stats.prefetches);
        }

        match &self.cache {
            CacheBackend::Standard(cache) => {
                let stats = cache.stats();
                out.insert("cache_occupancy".into(), stats.occupancy as u64);
            }
            #[cfg(feature = "killer")]
            CacheBackend::Killer(cache) => {
                let stats = cache.stats();
                out.insert("cache_occupancy".into(), stats.occupancy as u64);
                out.insert("cache_capacity".into(), stats.capacity as u64);
                out.insert("cache_wire_hits".into(), stats.hits);
                out.insert("cache_wire_misses".into(), stats.misses);
                out.insert("cache_wire_stores".into(), stats.stores);
            }
        }

        out
    }
}

/// Background consumer for predicted follow-up queries: resolves and
/// warms the wire cache for each candidate, off the request path, the
/// same independent-task shape a server's background stream consumer
/// would take.
#[cfg(feature = "killer")]
fn spawn_prefetch_worker(
    registry: Arc<dyn Registry>,
    cache: Arc<WireCache>,
    cfg: ResolverConfig,
    counters: Arc<Counters>,
) -> mpsc::Sender<PrefetchCandidate> {
    let (tx, mut rx) = mpsc::channel::<PrefetchCandidate>(256);

    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            for qtype in candidate.qtypes.clone() {
                let qname = format!(
                    "{}.{}.svc.{}.",
                    candidate.service.name, candidate.service.namespace, cfg.cluster_domain
                );
                let resolution = kubedns_resolver::resolve(registry.as_ref(), &qname, qtype, &cfg);
                if !resolution.handled || resolution.answer.records.is_empty() {
                    continue;
                }

                let mut packet = DnsPacket::response_from(
                    0,
                    Question {
                        name: qname.clone(),
                        qtype,
                        qclass: DnsClass::Internet,
                    },
                )
                .with_answers(resolution.answer.records.clone());
                packet.resources.extend(resolution.answer.extra.clone());

                let Ok(buffer) = packet.create_buffer() else {
                    continue;
                };
                let min_ttl = resolution.answer.records.iter().map(Record::ttl).min().unwrap_or(0);
                let now = unix_now();
                if cache.store(&qname, qtype.into_num(), &buffer.buf[..buffer.pos], min_ttl, now) {
                    counters.prefetches.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::chain::{Next, Request, Writer};
    use kubedns_proto::packet::header::{Header, ResponseCode};
    use kubedns_proto::packet::question::Question;
    use kubedns_registry::{standard::StandardRegistry, Endpoint, IpFamily, Pod, Port, Protocol, Service, ServiceType};
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

    fn client_socket() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 53000))
    }

    struct TestWriter {
        written: Vec<u8>,
        remote: SocketAddr,
    }

    impl TestWriter {
        fn new() -> Self {
            Self {
                written: Vec::new(),
                remote: client_socket(),
            }
        }

        fn response(&self) -> DnsPacket {
            let buffer = kubedns_proto::buffer::BytePacketBuffer::new({
                let mut buf = [0u8; kubedns_proto::buffer::MAX_WIRE_SIZE];
                buf[..self.written.len()].copy_from_slice(&self.written);
                buf
            });
            DnsPacket::try_from(buffer).expect("written bytes should parse as a DNS message")
        }
    }

    impl Writer for TestWriter {
        fn write(&mut self, wire: &[u8]) -> std::io::Result<()> {
            self.written = wire.to_vec();
            Ok(())
        }

        fn write_msg(&mut self, msg: &DnsPacket) -> std::io::Result<()> {
            let mut msg = msg.clone();
            let buffer = msg.create_buffer()?;
            self.written = buffer.buf[..buffer.pos].to_vec();
            Ok(())
        }

        fn remote_ip(&self) -> SocketAddr {
            self.remote
        }
    }

    struct TestRequest(DnsPacket);

    impl Request for TestRequest {
        fn message(&self) -> &DnsPacket {
            &self.0
        }
    }

    fn request_for(name: &str, qtype: QueryType) -> TestRequest {
        TestRequest(DnsPacket::new(Header::question(1)).with_question(Question::new(name.into(), qtype)))
    }

    #[derive(Default)]
    struct TestNext {
        called: AtomicU64,
    }

    #[async_trait::async_trait]
    impl Next for TestNext {
        async fn next(&self) {
            self.called.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn standard_middleware(registry: Arc<dyn Registry>) -> KubernetesMiddleware {
        KubernetesMiddleware::new(
            Some(registry),
            ResolverConfig::default(),
            kubedns_cache::Config::default(),
            kubedns_predictor::Config::default(),
            false,
        )
    }

    fn kubernetes_service() -> Service {
        Service {
            namespace: "default".into(),
            name: "kubernetes".into(),
            service_type: ServiceType::ClusterIP,
            cluster_ips: vec![std::net::IpAddr::V4(Ipv4Addr::new(10, 96, 0, 1))],
            ip_families: vec![IpFamily::IPv4],
            external_name: None,
            headless: false,
            ports: vec![Port {
                name: "https".into(),
                port: 443,
                protocol: Protocol::TCP,
            }],
        }
    }

    #[tokio::test]
    async fn s1_resolves_a_clusterip_service() {
        let registry = Arc::new(StandardRegistry::new());
        registry.add_service(kubernetes_service());
        let middleware = standard_middleware(registry);

        let mut writer = TestWriter::new();
        let request = request_for("kubernetes.default.svc.cluster.local.", QueryType::A);
        let next = TestNext::default();
        middleware.serve_dns(&mut writer, &request, &next).await;

        assert_eq!(next.called.load(Ordering::Relaxed), 0);
        let response = writer.response();
        assert_eq!(response.header.response_code, ResponseCode::NoError);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(
            response.answers[0],
            Record::A {
                domain: "kubernetes.default.svc.cluster.local.".into(),
                addr: Ipv4Addr::new(10, 96, 0, 1),
                ttl: 30,
            }
        );
    }

    #[tokio::test]
    async fn s2_resolves_a_service_srv_record() {
        let registry = Arc::new(StandardRegistry::new());
        registry.add_service(kubernetes_service());
        let middleware = standard_middleware(registry);

        let mut writer = TestWriter::new();
        let request = request_for("_https._tcp.kubernetes.default.svc.cluster.local.", QueryType::SRV);
        let next = TestNext::default();
        middleware.serve_dns(&mut writer, &request, &next).await;

        let response = writer.response();
        assert_eq!(response.header.response_code, ResponseCode::NoError);
        assert_eq!(
            response.answers,
            vec![Record::SRV {
                domain: "_https._tcp.kubernetes.default.svc.cluster.local.".into(),
                priority: 0,
                weight: 100,
                port: 443,
                target: "kubernetes.default.svc.cluster.local.".into(),
                ttl: 30,
            }]
        );
    }

    #[tokio::test]
    async fn s3_headless_service_lists_ready_endpoints_only() {
        let registry = Arc::new(StandardRegistry::new());
        registry.add_service(Service {
            namespace: "default".into(),
            name: "myapp".into(),
            service_type: ServiceType::ClusterIP,
            cluster_ips: vec![],
            ip_families: vec![],
            external_name: None,
            headless: true,
            ports: vec![],
        });
        registry.set_endpoints(
            "default",
            "myapp",
            vec![
                Endpoint {
                    addresses: vec![
                        std::net::IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)),
                        std::net::IpAddr::V6(Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 1)),
                    ],
                    hostname: None,
                    ready: true,
                    target_ref: None,
                },
                Endpoint {
                    addresses: vec![std::net::IpAddr::V4(Ipv4Addr::new(10, 1, 1, 2))],
                    hostname: None,
                    ready: true,
                    target_ref: None,
                },
                Endpoint {
                    addresses: vec![std::net::IpAddr::V4(Ipv4Addr::new(10, 1, 1, 3))],
                    hostname: None,
                    ready: false,
                    target_ref: None,
                },
            ],
        );
        let middleware = standard_middleware(registry);

        let mut writer = TestWriter::new();
        let next = TestNext::default();
        middleware
            .serve_dns(&mut writer, &request_for("myapp.default.svc.cluster.local.", QueryType::A), &next)
            .await;
        let response = writer.response();
        assert_eq!(response.header.response_code, ResponseCode::NoError);
        assert_eq!(
            response.answers,
            vec![
                Record::A {
                    domain: "myapp.default.svc.cluster.local.".into(),
                    addr: Ipv4Addr::new(10, 1, 1, 1),
                    ttl: 30,
                },
                Record::A {
                    domain: "myapp.default.svc.cluster.local.".into(),
                    addr: Ipv4Addr::new(10, 1, 1, 2),
                    ttl: 30,
                },
            ]
        );

        let mut writer = TestWriter::new();
        middleware
            .serve_dns(&mut writer, &request_for("myapp.default.svc.cluster.local.", QueryType::AAAA), &next)
            .await;
        let response = writer.response();
        assert_eq!(
            response.answers,
            vec![Record::AAAA {
                domain: "myapp.default.svc.cluster.local.".into(),
                addr: Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 1),
                ttl: 30,
            }]
        );
    }

    #[tokio::test]
    async fn s4_resolves_pod_by_encoded_ip_and_rejects_wrong_namespace() {
        let registry = Arc::new(StandardRegistry::new());
        registry.add_pod(Pod {
            namespace: "default".into(),
            name: "test".into(),
            ips: vec![std::net::IpAddr::V4(Ipv4Addr::new(10, 244, 1, 1))],
            hostname: None,
            subdomain: None,
        });
        let middleware = standard_middleware(registry);

        let mut writer = TestWriter::new();
        let next = TestNext::default();
        middleware
            .serve_dns(&mut writer, &request_for("10-244-1-1.default.pod.cluster.local.", QueryType::A), &next)
            .await;
        let response = writer.response();
        assert_eq!(response.header.response_code, ResponseCode::NoError);
        assert_eq!(
            response.answers,
            vec![Record::A {
                domain: "10-244-1-1.default.pod.cluster.local.".into(),
                addr: Ipv4Addr::new(10, 244, 1, 1),
                ttl: 30,
            }]
        );

        let mut writer = TestWriter::new();
        middleware
            .serve_dns(&mut writer, &request_for("10-244-1-1.other.pod.cluster.local.", QueryType::A), &next)
            .await;
        assert_eq!(writer.response().header.response_code, ResponseCode::NameError);
        assert_eq!(next.called.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn non_cluster_query_is_deferred() {
        let registry = Arc::new(StandardRegistry::new());
        let middleware = standard_middleware(registry);
        let mut writer = TestWriter::new();
        let next = TestNext::default();
        middleware
            .serve_dns(&mut writer, &request_for("example.com.", QueryType::A), &next)
            .await;
        assert_eq!(next.called.load(Ordering::Relaxed), 1);
        assert!(writer.written.is_empty());
    }

    #[tokio::test]
    async fn disabled_middleware_defers_everything() {
        let middleware = KubernetesMiddleware::new(
            None,
            ResolverConfig::default(),
            kubedns_cache::Config::default(),
            kubedns_predictor::Config::default(),
            false,
        );
        let mut writer = TestWriter::new();
        let next = TestNext::default();
        middleware
            .serve_dns(&mut writer, &request_for("kubernetes.default.svc.cluster.local.", QueryType::A), &next)
            .await;
        assert_eq!(next.called.load(Ordering::Relaxed), 1);
    }

    #[cfg(feature = "killer")]
    #[tokio::test]
    async fn s5_second_identical_query_is_served_from_the_wire_cache() {
        let registry = Arc::new(StandardRegistry::new());
        registry.add_service(kubernetes_service());
        let middleware = KubernetesMiddleware::new(
            Some(registry),
            ResolverConfig::default(),
            kubedns_cache::Config::default(),
            kubedns_predictor::Config::default(),
            true,
        );
        let next = TestNext::default();
        let request = request_for("kubernetes.default.svc.cluster.local.", QueryType::A);

        let mut first = TestWriter::new();
        middleware.serve_dns(&mut first, &request, &next).await;
        assert_eq!(middleware.counters.cache_misses.load(Ordering::Relaxed), 1);

        let mut second = TestWriter::new();
        middleware.serve_dns(&mut second, &request, &next).await;
        assert_eq!(middleware.counters.cache_hits.load(Ordering::Relaxed), 1);

        assert_eq!(first.written[2..], second.written[2..]);
    }

    #[cfg(feature = "killer")]
    #[tokio::test]
    async fn s6_repeated_sequence_schedules_prefetches_for_its_companions() {
        let registry = Arc::new(StandardRegistry::new());
        for name in ["app", "db", "cache"] {
            registry.add_service(Service {
                namespace: "default".into(),
                name: name.into(),
                service_type: ServiceType::ClusterIP,
                cluster_ips: vec![std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1))],
                ip_families: vec![IpFamily::IPv4],
                external_name: None,
                headless: false,
                ports: vec![],
            });
        }
        let middleware = KubernetesMiddleware::new(
            Some(registry),
            ResolverConfig::default(),
            kubedns_cache::Config::default(),
            kubedns_predictor::Config::default(),
            true,
        );
        let next = TestNext::default();

        for _ in 0..10 {
            for name in ["app", "db", "cache"] {
                let qname = format!("{name}.default.svc.cluster.local.");
                let mut writer = TestWriter::new();
                writer.remote = client_socket();
                middleware.serve_dns(&mut writer, &request_for(&qname, QueryType::A), &next).await;
            }
        }

        let mut writer = TestWriter::new();
        writer.remote = client_socket();
        middleware
            .serve_dns(&mut writer, &request_for("app.default.svc.cluster.local.", QueryType::A), &next)
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let CacheBackend::Killer(cache) = &middleware.cache else {
            unreachable!("killer mode always builds a wire cache");
        };
        let now = unix_now();
        let mut buf = [0u8; kubedns_cache::wire::MAX_WIRE_SIZE];
        assert!(cache.get("db.default.svc.cluster.local.", QueryType::A.into_num(), now, &mut buf).is_some());
        assert!(cache.get("cache.default.svc.cluster.local.", QueryType::A.into_num(), now, &mut buf).is_some());
    }
}
