//! Certificate chain checks

use chrono::{DateTime, Duration, Utc};
use sdk::validation::{CertificateInfo, ValidationCode, ValidationResult};

use crate::config::SecurityConfig;
use crate::hashing::sha256_hex;

/// Lowercase hex SHA-256 fingerprint of `cert`.
///
/// Computed from the DER bytes when present, otherwise the supplied
/// fingerprint with separators removed.
pub fn fingerprint(cert: &CertificateInfo) -> String {
    match &cert.der {
        Some(der) => sha256_hex(der),
        None => cert
            .fingerprint_sha256
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect::<String>()
            .to_ascii_lowercase(),
    }
}

/// Match `hostname` against a certificate name; `*.` covers one label
pub fn hostname_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.trim().trim_end_matches('.').to_ascii_lowercase();
    let hostname = hostname.trim().trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => hostname
            .split_once('.')
            .map(|(label, rest)| !label.is_empty() && rest == suffix)
            .unwrap_or(false),
        None => pattern == hostname,
    }
}

fn subject_common_name(subject: &str) -> &str {
    subject
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("CN="))
        .unwrap_or(subject)
}

/// Evaluate a leaf-first chain for `hostname` at time `now`
pub fn check_chain(
    chain: &[CertificateInfo],
    hostname: &str,
    policy: &SecurityConfig,
    now: DateTime<Utc>,
) -> ValidationResult {
    let Some(leaf) = chain.first() else {
        return ValidationResult::failed(ValidationCode::EmptyChain, "Certificate chain is empty");
    };
    let leaf_fingerprint = fingerprint(leaf);

    let mut result = ValidationResult::passed("Certificate chain accepted")
        .with_metadata("subject", leaf.subject.clone())
        .with_metadata("fingerprint", leaf_fingerprint.clone());

    if now < leaf.not_before {
        result = result.merge(ValidationResult::failed(
            ValidationCode::CertificateNotYetValid,
            format!("Certificate for {} is not valid before {}", hostname, leaf.not_before),
        ));
    } else if now > leaf.not_after {
        result = result.merge(ValidationResult::failed(
            ValidationCode::CertificateExpired,
            format!("Certificate for {} expired at {}", hostname, leaf.not_after),
        ));
    } else if leaf.not_after - now < Duration::days(policy.certificate_expiry_warning_days) {
        result = result.merge(
            ValidationResult::warning(
                ValidationCode::CertificateExpiring,
                format!("Certificate for {} expires at {}", hostname, leaf.not_after),
            )
            .with_metadata("not_after", leaf.not_after.to_rfc3339()),
        );
    }

    let names_match = if leaf.subject_alt_names.is_empty() {
        hostname_matches(subject_common_name(&leaf.subject), hostname)
    } else {
        leaf.subject_alt_names
            .iter()
            .any(|name| hostname_matches(name, hostname))
    };
    if !names_match {
        result = result.merge(ValidationResult::failed(
            ValidationCode::HostnameMismatch,
            format!("Certificate does not cover {}", hostname),
        ));
    }

    let host_key = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    let pinned = policy.pinned_fingerprints.get(&host_key).map(|pins| {
        chain
            .iter()
            .map(fingerprint)
            .any(|fp| pins.iter().any(|pin| *pin == fp))
    });
    if pinned == Some(false) {
        result = result.merge(ValidationResult::failed(
            ValidationCode::PinMismatch,
            format!("No certificate in the chain matches the pins for {}", hostname),
        ));
    }

    // A pinned leaf is trusted even when self-signed.
    if leaf.is_self_signed() && pinned != Some(true) {
        let message = format!("Self-signed certificate for {}", hostname);
        result = result.merge(if policy.allow_self_signed {
            ValidationResult::warning(ValidationCode::SelfSigned, message)
        } else {
            ValidationResult::failed(ValidationCode::SelfSigned, message)
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::validation::ValidationLevel;

    fn cert(now: DateTime<Utc>) -> CertificateInfo {
        CertificateInfo {
            subject: "CN=plugins.example.com".into(),
            issuer: "CN=Example CA".into(),
            not_before: now - Duration::days(30),
            not_after: now + Duration::days(365),
            fingerprint_sha256: String::new(),
            subject_alt_names: vec!["plugins.example.com".into(), "*.cdn.example.com".into()],
            der: Some(b"leaf certificate".to_vec()),
        }
    }

    #[test]
    fn test_valid_chain_passes() {
        let now = Utc::now();
        let result = check_chain(&[cert(now)], "plugins.example.com", &SecurityConfig::default(), now);
        assert_eq!(result.level, ValidationLevel::Passed);
        assert_eq!(
            result.metadata.get("fingerprint"),
            Some(&sha256_hex(b"leaf certificate"))
        );
    }

    #[test]
    fn test_empty_chain() {
        let result = check_chain(&[], "plugins.example.com", &SecurityConfig::default(), Utc::now());
        assert_eq!(result.code, Some(ValidationCode::EmptyChain));
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let policy = SecurityConfig::default();

        let mut expired = cert(now);
        expired.not_after = now - Duration::days(1);
        let result = check_chain(&[expired], "plugins.example.com", &policy, now);
        assert_eq!(result.code, Some(ValidationCode::CertificateExpired));

        let mut future = cert(now);
        future.not_before = now + Duration::days(1);
        let result = check_chain(&[future], "plugins.example.com", &policy, now);
        assert_eq!(result.code, Some(ValidationCode::CertificateNotYetValid));

        let mut expiring = cert(now);
        expiring.not_after = now + Duration::days(2);
        let result = check_chain(&[expiring], "plugins.example.com", &policy, now);
        assert_eq!(result.level, ValidationLevel::Warning);
        assert_eq!(result.code, Some(ValidationCode::CertificateExpiring));
    }

    #[test]
    fn test_hostname_rules() {
        assert!(hostname_matches("*.cdn.example.com", "eu.cdn.example.com"));
        assert!(!hostname_matches("*.cdn.example.com", "a.b.cdn.example.com"));
        assert!(!hostname_matches("*.cdn.example.com", "cdn.example.com"));
        assert!(hostname_matches("Plugins.Example.com", "plugins.example.com."));

        let now = Utc::now();
        let result = check_chain(&[cert(now)], "evil.example.org", &SecurityConfig::default(), now);
        assert_eq!(result.code, Some(ValidationCode::HostnameMismatch));
    }

    #[test]
    fn test_self_signed_policy() {
        let now = Utc::now();
        let mut leaf = cert(now);
        leaf.issuer = leaf.subject.clone();

        let mut policy = SecurityConfig::default();
        let strict = check_chain(&[leaf.clone()], "plugins.example.com", &policy, now);
        assert_eq!(strict.level, ValidationLevel::Failed);
        assert_eq!(strict.code, Some(ValidationCode::SelfSigned));

        policy.allow_self_signed = true;
        let relaxed = check_chain(&[leaf.clone()], "plugins.example.com", &policy, now);
        assert_eq!(relaxed.level, ValidationLevel::Warning);

        policy.allow_self_signed = false;
        policy
            .pinned_fingerprints
            .insert("plugins.example.com".into(), vec![fingerprint(&leaf)]);
        let pinned = check_chain(&[leaf], "plugins.example.com", &policy, now);
        assert_eq!(pinned.level, ValidationLevel::Passed);
    }

    #[test]
    fn test_pin_mismatch() {
        let now = Utc::now();
        let mut policy = SecurityConfig::default();
        policy
            .pinned_fingerprints
            .insert("plugins.example.com".into(), vec!["00".repeat(32)]);

        let result = check_chain(&[cert(now)], "plugins.example.com", &policy, now);
        assert_eq!(result.code, Some(ValidationCode::PinMismatch));
    }

    #[test]
    fn test_fingerprint_without_der() {
        let mut leaf = cert(Utc::now());
        leaf.der = None;
        leaf.fingerprint_sha256 = "AB:CD:EF".into();
        assert_eq!(fingerprint(&leaf), "abcdef");
    }
}
