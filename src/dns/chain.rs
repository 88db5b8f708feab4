//! The minimal surface `KubernetesMiddleware` expects from the outer
//! recursive server it is mounted into. These traits describe an
//! external collaborator's shape; nothing here is implemented by this
//! crate, only consumed by `middleware::KubernetesMiddleware::serve_dns`.

use std::net::SocketAddr;

use kubedns_proto::packet::DnsPacket;

/// The response sink handed to the middleware for the lifetime of one
/// request. Single-consumer: at most one stage in the chain writes a
/// response.
pub trait Writer: Send {
    fn write(&mut self, wire: &[u8]) -> std::io::Result<()>;
    fn write_msg(&mut self, msg: &DnsPacket) -> std::io::Result<()>;
    fn remote_ip(&self) -> SocketAddr;
}

/// The already-parsed request handed down the chain.
pub trait Request: Send + Sync {
    fn message(&self) -> &DnsPacket;
}

/// Defers handling to the next stage in the chain.
#[async_trait::async_trait]
pub trait Next: Send + Sync {
    async fn next(&self);
}
