// src/tls.rs
/* TLS termination for client connections (NNTPS). The upstream leg stays plain TCP. */

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsFiles;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid(format!("invalid certificate in {}", path.display())))?;
    if certs.is_empty() {
        return Err(invalid(format!("no certificate found in {}", path.display())));
    }
    Ok(certs)
}

// PKCS#8, PKCS#1 and SEC1 keys are all accepted; the first one in the file wins.
fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|_| invalid(format!("invalid private key in {}", path.display())))?
        .ok_or_else(|| invalid(format!("no private key found in {}", path.display())))
}

pub fn load_tls_config(files: &TlsFiles) -> io::Result<TlsAcceptor> {
    let certs = load_certs(&files.cert)?;
    let key = load_key(&files.key)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| invalid(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
