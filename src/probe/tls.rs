//! The TLS handshake probe.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, SignatureScheme};
use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use super::{Handshake, Outcome, Policy, Probe, ProbeResult, TlsVersion};
use crate::address::{Host, HostKind, Resolver};
use crate::geo::GeoLookup;

/// ALPN offer, in preference order.
const ALPN: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Dials a host, completes a TLS handshake and classifies what it saw.
///
/// Certificates are never verified: the point is to see what a host
/// negotiates, not whether it should be trusted.
pub struct TlsProbe {
    port: u16,
    timeout: Duration,
    policy: Policy,
    connector: TlsConnector,
    resolver: Resolver,
    geo: Arc<dyn GeoLookup>,
}

impl TlsProbe {
    pub fn new(
        port: u16,
        timeout: Duration,
        policy: Policy,
        resolver: Resolver,
        geo: Arc<dyn GeoLookup>,
    ) -> Result<Self, rustls::Error> {
        Ok(Self {
            port,
            timeout,
            policy,
            connector: TlsConnector::from(Arc::new(client_config()?)),
            resolver,
            geo,
        })
    }

    /// Connects with the configured timeout.
    async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        time::timeout(self.timeout, TcpStream::connect(socket)).await?
    }

    async fn handshake(&self, host: &Host, ip: IpAddr) -> Outcome {
        let socket = SocketAddr::new(ip, self.port);
        let stream = match self.connect(socket).await {
            Ok(stream) => stream,
            Err(e) => return Outcome::Unreachable(e.to_string()),
        };

        let server_name = server_name(host, ip);
        let mut tls = match time::timeout(self.timeout, self.connector.connect(server_name, stream))
            .await
        {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Outcome::HandshakeFailed(e.to_string()),
            Err(_) => return Outcome::HandshakeFailed("handshake timed out".to_owned()),
        };

        let (_, connection) = tls.get_ref();
        let version = connection.protocol_version().and_then(tls_version);
        let alpn = connection
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default();
        let (cert_domain, cert_issuer) = connection
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|leaf| leaf_fields(leaf))
            .unwrap_or_default();

        // best-effort close_notify
        let _ = time::timeout(self.timeout, tls.shutdown()).await;

        let mut handshake = Handshake {
            version,
            alpn,
            cert_domain,
            cert_issuer,
            geo: self.geo.country_of(ip),
            feasible: false,
        };
        handshake.feasible = self.policy.is_feasible(&handshake);
        Outcome::Negotiated(handshake)
    }
}

#[async_trait]
impl Probe for TlsProbe {
    async fn probe(&self, host: Host) -> ProbeResult {
        let (host, ip) = match host.address() {
            Some(ip) => (host, ip),
            None => match self.resolver.resolve(host.origin()).await {
                Ok(ip) => (host.with_address(ip), ip),
                Err(e) => return ProbeResult::new(host, Outcome::Unresolvable(e)),
            },
        };
        let outcome = self.handshake(&host, ip).await;
        ProbeResult::new(host, outcome)
    }
}

/// SNI is only sent for domain targets; everything else handshakes by IP.
fn server_name(host: &Host, ip: IpAddr) -> ServerName<'static> {
    if host.kind() == HostKind::Domain {
        if let Ok(name) = ServerName::try_from(host.origin().to_owned()) {
            return name;
        }
    }
    ServerName::IpAddress(ip.into())
}

fn tls_version(version: ProtocolVersion) -> Option<TlsVersion> {
    match version {
        ProtocolVersion::TLSv1_0 => Some(TlsVersion::V1_0),
        ProtocolVersion::TLSv1_1 => Some(TlsVersion::V1_1),
        ProtocolVersion::TLSv1_2 => Some(TlsVersion::V1_2),
        ProtocolVersion::TLSv1_3 => Some(TlsVersion::V1_3),
        _ => None,
    }
}

/// Subject CN and `", "`-joined issuer organisations of a DER certificate.
/// Unparseable certificates yield empty strings.
pub(crate) fn leaf_fields(der: &[u8]) -> (String, String) {
    let Ok((_, cert)) = parse_x509_certificate(der) else {
        return (String::new(), String::new());
    };
    let domain = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_owned();
    let issuer = cert
        .issuer()
        .iter_organization()
        .filter_map(|o| o.as_str().ok())
        .join(", ");
    (domain, issuer)
}

fn client_config() -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth();
    config.alpn_protocols = ALPN.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

/// Accepts every certificate chain while still checking handshake
/// signatures, so the connection itself is well-formed.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
