//! Public and tunneled address resolution.
//!
//! The public address comes from an external IP-echo service behind the
//! [`PublicIpSource`] trait. The tunneled address is never looked up; it is
//! whatever the session was assigned, and only while the session is
//! connected.

use crate::catalog::Server;
use crate::error::{Result, VpnError};
use crate::session::{Session, SessionState};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use url::Url;

/// Looks up the client's public address.
pub trait PublicIpSource: Send + Sync {
    /// Performs one lookup.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::Resolution`] if the lookup failed.
    fn lookup(&self) -> Result<IpAddr>;
}

/// IP-echo service reached with a blocking HTTP GET.
///
/// The service must answer 2xx with a JSON body containing an `ip` field,
/// e.g. `{"ip":"203.0.113.7"}`.
pub struct HttpIpSource {
    client: reqwest::blocking::Client,
    endpoint: Url,
}

impl HttpIpSource {
    /// Creates a source querying `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::Resolution`] if the HTTP client cannot be built.
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(crate::constants::HTTP_TIMEOUT)
            .user_agent(concat!("veil/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VpnError::Resolution(format!("http client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

impl PublicIpSource for HttpIpSource {
    fn lookup(&self) -> Result<IpAddr> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .map_err(|e| VpnError::Resolution(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VpnError::Resolution(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }

        let body = response
            .text()
            .map_err(|e| VpnError::Resolution(e.to_string()))?;
        parse_ip_body(&body)
    }
}

#[derive(Deserialize)]
struct IpBody {
    ip: String,
}

/// Extracts the `ip` field of an IP-echo response.
fn parse_ip_body(body: &str) -> Result<IpAddr> {
    let parsed: IpBody = serde_json::from_str(body)
        .map_err(|e| VpnError::Resolution(format!("malformed response: {e}")))?;
    parsed
        .ip
        .trim()
        .parse()
        .map_err(|_| VpnError::Resolution(format!("invalid address {:?}", parsed.ip)))
}

/// Resolves the client's real and tunneled addresses.
pub struct IpResolver {
    source: Box<dyn PublicIpSource>,
    last_public: Mutex<Option<IpAddr>>,
}

impl IpResolver {
    pub fn new(source: Box<dyn PublicIpSource>) -> Self {
        Self {
            source,
            last_public: Mutex::new(None),
        }
    }

    /// Looks up the public address once. No retries; a failure forgets the
    /// previously known address.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::Resolution`] if the lookup failed.
    pub fn resolve_public(&self) -> Result<IpAddr> {
        let result = self.source.lookup();
        let mut last = self
            .last_public
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(addr) => {
                tracing::debug!(%addr, "public address resolved");
                *last = Some(*addr);
            }
            Err(e) => {
                tracing::warn!(error = %e, "public address lookup failed");
                *last = None;
            }
        }
        result
    }

    /// Last successfully resolved public address.
    pub fn last_public(&self) -> Option<IpAddr> {
        *self
            .last_public
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Address assigned inside the tunnel to `server`. `None` unless the
    /// session is connected to that server.
    pub fn resolve_tunnel(&self, server: &Server, session: &Session) -> Option<IpAddr> {
        let on_server = session.server.as_ref().is_some_and(|s| s.id == server.id);
        if session.state == SessionState::Connected && on_server {
            session.tunnel_address
        } else {
            None
        }
    }

    /// Address traffic currently appears from: the tunnel address while
    /// connected, the real one otherwise.
    pub fn effective_address(&self, session: &Session) -> Option<IpAddr> {
        match session.state {
            SessionState::Connected => session.tunnel_address,
            _ => self.last_public(),
        }
    }
}

/// Renders an optional address, with a placeholder when it is unknown.
pub fn display_address(addr: Option<IpAddr>) -> String {
    addr.map_or_else(
        || crate::constants::MSG_UNKNOWN.to_string(),
        |a| a.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::HealthStatus;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::Arc;
    use std::thread;

    struct FixedSource(Option<IpAddr>);

    impl PublicIpSource for FixedSource {
        fn lookup(&self) -> Result<IpAddr> {
            self.0
                .ok_or_else(|| VpnError::Resolution("offline".to_string()))
        }
    }

    /// Serves one HTTP response on a local port and returns its URL.
    fn serve_once(status: &str, body: &str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = stream.write_all(response.as_bytes());
            }
        });
        Url::parse(&format!("http://{addr}/?format=json")).unwrap()
    }

    fn connected_session(server: &Arc<Server>, addr: IpAddr) -> Session {
        Session {
            state: SessionState::Connected,
            server: Some(Arc::clone(server)),
            tunnel_address: Some(addr),
            ..Session::default()
        }
    }

    #[test]
    fn test_parse_ip_body() {
        assert_eq!(
            parse_ip_body(r#"{"ip":"203.0.113.7"}"#).unwrap(),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))
        );
        assert!(parse_ip_body(r#"{"ip":"2001:db8::1"}"#).unwrap().is_ipv6());
    }

    #[test]
    fn test_parse_ip_body_malformed() {
        assert!(matches!(parse_ip_body("<html>"), Err(VpnError::Resolution(_))));
        assert!(matches!(parse_ip_body(r#"{"addr":"1.2.3.4"}"#), Err(VpnError::Resolution(_))));
        assert!(matches!(parse_ip_body(r#"{"ip":""}"#), Err(VpnError::Resolution(_))));
        assert!(matches!(parse_ip_body(r#"{"ip":"not-an-ip"}"#), Err(VpnError::Resolution(_))));
    }

    #[test]
    fn test_http_source_success() {
        let url = serve_once("200 OK", r#"{"ip":"198.51.100.23"}"#);
        let source = HttpIpSource::new(url).unwrap();
        assert_eq!(
            source.lookup().unwrap(),
            IpAddr::V4(Ipv4Addr::new(198, 51, 100, 23))
        );
    }

    #[test]
    fn test_http_source_non_success_status() {
        let url = serve_once("503 Service Unavailable", r#"{"ip":"198.51.100.23"}"#);
        let source = HttpIpSource::new(url).unwrap();
        let err = source.lookup().unwrap_err();
        assert!(matches!(err, VpnError::Resolution(ref m) if m.contains("503")));
    }

    #[test]
    fn test_http_source_malformed_body() {
        let url = serve_once("200 OK", "ip=198.51.100.23");
        let source = HttpIpSource::new(url).unwrap();
        assert!(matches!(source.lookup(), Err(VpnError::Resolution(_))));
    }

    #[test]
    fn test_http_source_connection_refused() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let source = HttpIpSource::new(url).unwrap();
        assert!(matches!(source.lookup(), Err(VpnError::Resolution(_))));
    }

    #[test]
    fn test_resolve_public_remembers_and_forgets() {
        let addr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let resolver = IpResolver::new(Box::new(FixedSource(Some(addr))));
        assert_eq!(resolver.resolve_public().unwrap(), addr);
        assert_eq!(resolver.last_public(), Some(addr));

        let failing = IpResolver::new(Box::new(FixedSource(None)));
        assert!(failing.resolve_public().is_err());
        assert_eq!(failing.last_public(), None);
        assert_eq!(display_address(failing.last_public()), "Unknown");
    }

    #[test]
    fn test_resolve_tunnel_only_when_connected_to_server() {
        let resolver = IpResolver::new(Box::new(FixedSource(None)));
        let paris = Arc::new(Server::new("Europe", "Paris", HealthStatus::Online));
        let tokyo = Server::new("Asia", "Tokyo", HealthStatus::Online);
        let tunneled = IpAddr::V4(Ipv4Addr::new(10, 8, 0, 2));

        let mut session = connected_session(&paris, tunneled);
        assert_eq!(resolver.resolve_tunnel(&paris, &session), Some(tunneled));
        assert_eq!(resolver.resolve_tunnel(&tokyo, &session), None);

        session.state = SessionState::Connecting;
        assert_eq!(resolver.resolve_tunnel(&paris, &session), None);
    }

    #[test]
    fn test_effective_address() {
        let real = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let tunneled = IpAddr::V4(Ipv4Addr::new(10, 8, 0, 2));
        let resolver = IpResolver::new(Box::new(FixedSource(Some(real))));
        resolver.resolve_public().unwrap();

        let paris = Arc::new(Server::new("Europe", "Paris", HealthStatus::Online));
        let session = connected_session(&paris, tunneled);
        assert_eq!(resolver.effective_address(&session), Some(tunneled));
        assert_eq!(resolver.effective_address(&Session::default()), Some(real));
        assert_eq!(display_address(Some(real)), "192.0.2.1");
    }
}
