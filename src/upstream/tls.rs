//! TLS client configuration for upstream connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::config::UpstreamTlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build the client config used for `https` upstreams.
///
/// Trusts the web PKI roots plus the optional CA bundle, and presents a
/// client certificate when one is configured.
pub fn build_client_config(cfg: &UpstreamTlsConfig) -> Result<Arc<ClientConfig>, TlsConfigError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(ca_path) = &cfg.ca_cert_path {
        let certs = load_certs(Path::new(ca_path))?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        tracing::info!(path = %ca_path, added, ignored, "Loaded upstream CA bundle");
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

    let config = match (&cfg.client_cert_path, &cfg.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let chain = load_certs(Path::new(cert_path))?;
            let key = load_private_key(Path::new(key_path))?;
            builder.with_client_auth_cert(chain, key)?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsConfigError::Read {
            path: path.display().to_string(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsConfigError::Read {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsConfigError::NoPrivateKey(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_uses_web_roots() {
        let config = build_client_config(&UpstreamTlsConfig::default()).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn missing_ca_file_is_read_error() {
        let cfg = UpstreamTlsConfig {
            ca_cert_path: Some("/no/such/ca.pem".into()),
            ..Default::default()
        };
        let err = build_client_config(&cfg).unwrap_err();
        assert!(matches!(err, TlsConfigError::Read { .. }));
    }

    #[test]
    fn empty_ca_file_has_no_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a pem file").unwrap();
        let cfg = UpstreamTlsConfig {
            ca_cert_path: Some(file.path().display().to_string()),
            ..Default::default()
        };
        let err = build_client_config(&cfg).unwrap_err();
        assert!(matches!(err, TlsConfigError::NoCertificates(_)));
    }
}
