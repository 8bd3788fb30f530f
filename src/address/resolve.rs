//! Name resolution for domain targets.
//!
//! Domains are only resolved when a worker is about to probe them, never
//! while enumerating. The system resolver is tried first and the hickory
//! resolver derived from `--resolver` (or the system config, or Cloudflare)
//! is the fallback.
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use tokio::{fs, io};

/// Resolves a host name to the first address allowed by the IPv6 policy.
#[derive(Clone)]
pub struct Resolver {
    backup: TokioAsyncResolver,
    ipv6: bool,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").field("ipv6", &self.ipv6).finish_non_exhaustive()
    }
}

impl Resolver {
    /// Builds the resolver from the optional `--resolver` value.
    pub async fn new(resolver: Option<&str>, ipv6: bool) -> Self {
        Self {
            backup: get_resolver(resolver).await,
            ipv6,
        }
    }

    /// Returns the first address of `name` that the policy accepts, or why
    /// there is none.
    pub async fn resolve(&self, name: &str) -> Result<IpAddr, String> {
        let candidates = self.lookup(name).await?;
        pick_address(candidates, self.ipv6)
            .ok_or_else(|| format!("no usable address (ipv6 enabled: {})", self.ipv6))
    }

    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, String> {
        if let Ok(addrs) = tokio::net::lookup_host((name, 443)).await {
            let addrs: Vec<IpAddr> = addrs.map(|x| x.ip()).collect();
            if !addrs.is_empty() {
                return Ok(addrs);
            }
        }
        self.backup
            .lookup_ip(name)
            .await
            .map(|addrs| addrs.iter().collect())
            .map_err(|e| e.to_string())
    }
}

/// First IPv4 address, or first address of any family when IPv6 is enabled.
pub(crate) fn pick_address(candidates: Vec<IpAddr>, ipv6: bool) -> Option<IpAddr> {
    candidates.into_iter().find(|ip| ip.is_ipv4() || ipv6)
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
async fn get_resolver(resolver: Option<&str>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses a file of resolver IPs, one per line.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::{pick_address, read_resolver_from_file, Resolver};
    use std::io::Write;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn pick_skips_ipv6_when_disabled() {
        let candidates = vec![ip("2001:db8::1"), ip("192.0.2.7")];
        assert_eq!(pick_address(candidates, false), Some(ip("192.0.2.7")));
    }

    #[test]
    fn pick_keeps_resolver_order_when_ipv6_enabled() {
        let candidates = vec![ip("2001:db8::1"), ip("192.0.2.7")];
        assert_eq!(pick_address(candidates, true), Some(ip("2001:db8::1")));
    }

    #[test]
    fn pick_yields_nothing_for_ipv6_only_names() {
        assert_eq!(pick_address(vec![ip("2001:db8::1")], false), None);
        assert_eq!(pick_address(vec![], true), None);
    }

    #[tokio::test]
    async fn resolver_file_ignores_garbage_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.1.1.1\nnot-an-ip\n 8.8.8.8 ").unwrap();

        let ips = read_resolver_from_file(file.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(ips, [ip("1.1.1.1"), ip("8.8.8.8")]);
    }

    #[tokio::test]
    async fn localhost_resolves_to_loopback() {
        let resolver = Resolver::new(None, false).await;
        let addr = resolver.resolve("localhost").await;
        assert_eq!(addr, Ok(ip("127.0.0.1")));
    }
}
