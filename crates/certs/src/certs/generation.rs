//! One certificate generation and the three slots it can occupy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where a generation sits in the rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Previous,
    Current,
    Next,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Previous, Slot::Current, Slot::Next];

    /// Label used in file names
    pub fn label(&self) -> &'static str {
        match self {
            Slot::Previous => "previous",
            Slot::Current => "current",
            Slot::Next => "next",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tri-state validity as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Unknown,
    Valid,
    Invalid,
}

/// Where a generation is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    /// Nothing stored
    Empty,
    /// Key and CSR exist, CSR not yet sent
    CsrPending,
    /// CSR sent, waiting for the signed certificate
    Submitted,
    /// Signed and not expired
    Signed,
    /// Signed but past its expiry
    Expired,
    /// Artifacts do not fit together (e.g. a key with neither CSR nor cert)
    Incomplete,
}

impl GenerationState {
    pub fn validity(self) -> Validity {
        match self {
            GenerationState::Empty => Validity::Unknown,
            GenerationState::Signed => Validity::Valid,
            _ => Validity::Invalid,
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationState::Empty => "empty",
            GenerationState::CsrPending => "csr_pending",
            GenerationState::Submitted => "submitted",
            GenerationState::Signed => "signed",
            GenerationState::Expired => "expired",
            GenerationState::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Key material and timestamps of one certificate generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub key: Option<String>,
    pub cert: Option<String>,
    pub chain: Option<String>,
    pub csr: Option<String>,
    /// SHA-256 hex of `csr`
    pub csr_hash: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Gateway FQDN at the time the CSR was generated
    pub fqdn: Option<String>,
    pub status: Option<String>,
    pub status_msg: Option<String>,
}

impl Generation {
    /// A fresh, unsubmitted generation holding a new key and CSR
    pub fn pending(
        key_pem: String,
        csr_pem: String,
        fqdn: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: Some(key_pem),
            csr_hash: Some(yombo_common::sha256_hex(&csr_pem)),
            csr: Some(csr_pem),
            created_at: Some(now),
            fqdn,
            status: Some("new".to_string()),
            ..Self::default()
        }
    }

    /// No artifacts at all
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.cert.is_none() && self.chain.is_none() && self.csr.is_none()
    }

    pub fn state(&self, now: DateTime<Utc>) -> GenerationState {
        if self.is_empty() {
            return GenerationState::Empty;
        }

        let signed = self.key.is_some()
            && self.cert.is_some()
            && self.chain.is_some()
            && self.signed_at.is_some();

        if signed {
            return match self.expires_at {
                Some(expires) if now < expires => GenerationState::Signed,
                Some(_) => GenerationState::Expired,
                None => GenerationState::Incomplete,
            };
        }

        if self.key.is_some() && self.csr.is_some() && self.cert.is_none() {
            return if self.submitted_at.is_some() {
                GenerationState::Submitted
            } else {
                GenerationState::CsrPending
            };
        }

        GenerationState::Incomplete
    }

    pub fn validity(&self, now: DateTime<Utc>) -> Validity {
        self.state(now).validity()
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.validity(now) == Validity::Valid
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Whether a current generation should be replaced
///
/// True when it is not valid, or when it expires before `now + renew_before`.
/// A window reaching past the representable range covers every expiry.
pub fn needs_renewal(
    current: &Generation,
    now: DateTime<Utc>,
    renew_before: chrono::Duration,
) -> bool {
    if !current.is_valid(now) {
        return true;
    }
    match current.expires_at {
        Some(expires) => match now.checked_add_signed(renew_before) {
            Some(deadline) => expires < deadline,
            None => true,
        },
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn signed(now: DateTime<Utc>, expires_in: Duration) -> Generation {
        Generation {
            key: Some("key".into()),
            cert: Some("cert".into()),
            chain: Some("chain".into()),
            created_at: Some(now - Duration::days(1)),
            signed_at: Some(now - Duration::days(1)),
            expires_at: Some(now + expires_in),
            ..Generation::default()
        }
    }

    #[test]
    fn test_states() {
        let now = Utc::now();
        assert_eq!(Generation::default().state(now), GenerationState::Empty);
        assert_eq!(Generation::default().validity(now), Validity::Unknown);

        let mut pending = Generation::pending("k".into(), "csr".into(), None, now);
        assert_eq!(pending.state(now), GenerationState::CsrPending);
        assert_eq!(pending.validity(now), Validity::Invalid);
        pending.submitted_at = Some(now);
        assert_eq!(pending.state(now), GenerationState::Submitted);

        assert_eq!(signed(now, Duration::days(10)).state(now), GenerationState::Signed);
        assert_eq!(signed(now, Duration::days(-1)).state(now), GenerationState::Expired);

        let key_only = Generation {
            key: Some("k".into()),
            ..Generation::default()
        };
        assert_eq!(key_only.state(now), GenerationState::Incomplete);
    }

    #[test]
    fn test_pending_hashes_csr() {
        let g = Generation::pending("k".into(), "abc".into(), Some("example.com".into()), Utc::now());
        assert_eq!(
            g.csr_hash.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(g.status.as_deref(), Some("new"));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let g = signed(now, Duration::zero());
        assert!(!g.is_valid(now));
        assert!(g.is_valid(now - Duration::seconds(1)));
    }

    #[test]
    fn test_needs_renewal_window() {
        let now = Utc::now();
        let window = Duration::days(30);
        assert!(needs_renewal(&Generation::default(), now, window));
        assert!(needs_renewal(&signed(now, Duration::days(29)), now, window));
        assert!(!needs_renewal(&signed(now, Duration::days(30)), now, window));
        assert!(!needs_renewal(&signed(now, Duration::days(200)), now, window));
    }

    #[test]
    fn test_needs_renewal_with_out_of_range_window() {
        let now = Utc::now();
        let huge = Duration::days(100_000_000);
        assert!(needs_renewal(&signed(now, Duration::days(200)), now, huge));
    }

    proptest! {
        #[test]
        fn validity_matches_field_presence(
            key in any::<bool>(),
            cert in any::<bool>(),
            chain in any::<bool>(),
            csr in any::<bool>(),
            signed_at in any::<bool>(),
            expires_offset in proptest::option::of(-1_000_000i64..1_000_000),
        ) {
            let now = Utc::now();
            let g = Generation {
                key: key.then(|| "k".to_string()),
                cert: cert.then(|| "c".to_string()),
                chain: chain.then(|| "ch".to_string()),
                csr: csr.then(|| "r".to_string()),
                signed_at: signed_at.then_some(now),
                expires_at: expires_offset.map(|s| now + Duration::seconds(s)),
                ..Generation::default()
            };
            let expected = key
                && cert
                && chain
                && signed_at
                && expires_offset.map(|s| s > 0).unwrap_or(false);
            prop_assert_eq!(g.is_valid(now), expected);
            if !key && !cert && !chain && !csr {
                prop_assert_eq!(g.validity(now), Validity::Unknown);
            }
        }
    }
}
