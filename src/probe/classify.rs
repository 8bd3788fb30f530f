use super::{Handshake, TlsVersion};

/// ALPN value a feasible host must agree on.
pub const REQUIRED_ALPN: &str = "h2";

/// Acceptance policy for a completed handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    /// When set, the negotiated version must match it exactly.
    pub target_version: Option<TlsVersion>,
}

impl Policy {
    pub const fn new(target_version: Option<TlsVersion>) -> Self {
        Self { target_version }
    }

    /// A handshake is feasible when it negotiated the newest TLS version and
    /// h2, presented a leaf certificate with both a subject CN and an issuer
    /// organisation, and matches the configured version filter if any.
    pub fn is_feasible(&self, handshake: &Handshake) -> bool {
        let Some(version) = handshake.version else {
            return false;
        };
        version == TlsVersion::LATEST
            && handshake.alpn == REQUIRED_ALPN
            && !handshake.cert_domain.is_empty()
            && !handshake.cert_issuer.is_empty()
            && self.target_version.is_none_or(|target| target == version)
    }
}

#[cfg(test)]
mod tests {
    use super::{Policy, TlsVersion};
    use crate::probe::Handshake;

    fn good() -> Handshake {
        Handshake {
            version: Some(TlsVersion::V1_3),
            alpn: "h2".to_owned(),
            cert_domain: "www.example.com".to_owned(),
            cert_issuer: "DigiCert Inc".to_owned(),
            geo: "US".to_owned(),
            feasible: false,
        }
    }

    #[test]
    fn newest_version_with_h2_and_cert_is_feasible() {
        assert!(Policy::default().is_feasible(&good()));
    }

    #[test]
    fn older_version_is_infeasible() {
        let handshake = Handshake {
            version: Some(TlsVersion::V1_2),
            ..good()
        };
        assert!(!Policy::default().is_feasible(&handshake));
    }

    #[test]
    fn unknown_version_is_infeasible() {
        let handshake = Handshake {
            version: None,
            ..good()
        };
        assert!(!Policy::default().is_feasible(&handshake));
    }

    #[test]
    fn http1_alpn_is_infeasible() {
        let handshake = Handshake {
            alpn: "http/1.1".to_owned(),
            ..good()
        };
        assert!(!Policy::default().is_feasible(&handshake));

        let handshake = Handshake {
            alpn: String::new(),
            ..good()
        };
        assert!(!Policy::default().is_feasible(&handshake));
    }

    #[test]
    fn missing_common_name_is_infeasible() {
        let handshake = Handshake {
            cert_domain: String::new(),
            ..good()
        };
        assert!(!Policy::default().is_feasible(&handshake));
    }

    #[test]
    fn missing_issuer_is_infeasible() {
        let handshake = Handshake {
            cert_issuer: String::new(),
            ..good()
        };
        assert!(!Policy::default().is_feasible(&handshake));
    }

    #[test]
    fn matching_version_filter_is_feasible() {
        assert!(Policy::new(Some(TlsVersion::V1_3)).is_feasible(&good()));
    }

    #[test]
    fn mismatched_version_filter_is_infeasible() {
        assert!(!Policy::new(Some(TlsVersion::V1_2)).is_feasible(&good()));
    }
}
