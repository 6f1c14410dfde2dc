use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use newsgate::auth::Credential;
use newsgate::session::SessionConfig;
use newsgate::upstream::Endpoint;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn fake_upstream() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::new("127.0.0.1", port))
}

async fn spawn_proxy(config: SessionConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        newsgate::proxy::start(listener, Arc::new(config)).await.unwrap();
    });
    addr
}

fn with_login(endpoint: Endpoint, password: &str) -> SessionConfig {
    let mut config = SessionConfig::new(endpoint);
    config.credential = Some(Credential::new("reader", password));
    config
}

/// Reads until the peer closes; a reset counts as closed.
async fn drain(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let _ = timeout(WAIT, stream.read_to_end(&mut received))
        .await
        .expect("connection was not closed");
    received
}

#[tokio::test]
async fn relays_command_and_reply() {
    let (upstream, endpoint) = fake_upstream().await;
    let proxy = spawn_proxy(SessionConfig::new(endpoint)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let (server, _) = upstream.accept().await.unwrap();
    let mut server = BufReader::new(server);

    client.write_all(b"HELP\r\n").await.unwrap();
    let mut line = String::new();
    server.read_line(&mut line).await.unwrap();
    assert_eq!(line, "HELP\r\n");

    server.get_mut().write_all(b"200 ok\r\n").await.unwrap();
    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"200 ok\r\n");
}

#[tokio::test]
async fn lines_arrive_in_order_both_ways() {
    let (upstream, endpoint) = fake_upstream().await;
    let proxy = spawn_proxy(SessionConfig::new(endpoint)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let (mut server, _) = upstream.accept().await.unwrap();

    let mut long_line = vec![b'z'; 1500];
    long_line.extend_from_slice(b"\r\n");
    let mut sent = b"GROUP alt.binaries.test\r\nXOVER 1-10\r\n".to_vec();
    sent.extend_from_slice(&long_line);
    sent.extend_from_slice(b"QUIT\r\n");

    client.write_all(&sent).await.unwrap();
    let mut buf = vec![0u8; sent.len()];
    timeout(WAIT, server.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(buf, sent);

    let mut reply = b"224 overview follows\r\n".to_vec();
    reply.extend_from_slice(&long_line);
    reply.extend_from_slice(b".\r\n205 bye\r\n");
    server.write_all(&reply).await.unwrap();
    let mut buf = vec![0u8; reply.len()];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(buf, reply);
}

#[tokio::test]
async fn login_is_invisible_to_the_client() {
    let (upstream, endpoint) = fake_upstream().await;
    let proxy = spawn_proxy(with_login(endpoint, "s3cret")).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    // Sent before the login has happened; must not overtake it.
    client.write_all(b"LIST\r\n").await.unwrap();

    let (server, _) = upstream.accept().await.unwrap();
    let (r, mut w) = server.into_split();
    let mut lines = BufReader::new(r).lines();

    w.write_all(b"200 news ready\r\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "AUTHINFO USER reader");
    w.write_all(b"381 password required\r\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "AUTHINFO PASS s3cret");
    w.write_all(b"281 authentication accepted\r\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "LIST");

    w.write_all(b"215 list follows\r\n.\r\n").await.unwrap();
    let expected = b"200 news ready\r\n215 list follows\r\n.\r\n";
    let mut buf = vec![0u8; expected.len()];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..], &expected[..]);
}

#[tokio::test]
async fn failed_login_closes_client_silently() {
    let (upstream, endpoint) = fake_upstream().await;
    let proxy = spawn_proxy(with_login(endpoint, "wrong")).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let (server, _) = upstream.accept().await.unwrap();
    let (r, mut w) = server.into_split();
    let mut lines = BufReader::new(r).lines();

    w.write_all(b"200 news ready\r\n").await.unwrap();
    lines.next_line().await.unwrap();
    w.write_all(b"381 password required\r\n").await.unwrap();
    lines.next_line().await.unwrap();
    w.write_all(b"481 auth failed\r\n").await.unwrap();

    assert!(drain(&mut client).await.is_empty());
    // The upstream connection goes away too.
    assert_eq!(timeout(WAIT, lines.next_line()).await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn rejected_username_closes_client_silently() {
    let (upstream, endpoint) = fake_upstream().await;
    let proxy = spawn_proxy(with_login(endpoint, "s3cret")).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let (server, _) = upstream.accept().await.unwrap();
    let (r, mut w) = server.into_split();
    let mut lines = BufReader::new(r).lines();

    w.write_all(b"200 news ready\r\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "AUTHINFO USER reader");
    w.write_all(b"482 unknown user\r\n").await.unwrap();

    assert!(drain(&mut client).await.is_empty());
    // No password is offered after the username was refused.
    assert_eq!(timeout(WAIT, lines.next_line()).await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn idle_session_is_closed() {
    let (upstream, endpoint) = fake_upstream().await;
    let mut config = SessionConfig::new(endpoint);
    config.idle_timeout = Duration::from_millis(200);
    let proxy = spawn_proxy(config).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let (mut server, _) = upstream.accept().await.unwrap();

    assert!(drain(&mut client).await.is_empty());
    assert!(drain(&mut server).await.is_empty());
}

#[tokio::test]
async fn unreachable_upstream_closes_client() {
    let (upstream, endpoint) = fake_upstream().await;
    drop(upstream);
    let proxy = spawn_proxy(SessionConfig::new(endpoint)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    assert!(drain(&mut client).await.is_empty());
}

#[tokio::test]
async fn upstream_hangup_ends_session() {
    let (upstream, endpoint) = fake_upstream().await;
    let proxy = spawn_proxy(SessionConfig::new(endpoint)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let (mut server, _) = upstream.accept().await.unwrap();
    server.write_all(b"205 closing connection\r\n").await.unwrap();
    drop(server);

    assert_eq!(drain(&mut client).await, b"205 closing connection\r\n");
}

#[tokio::test]
async fn failing_session_leaves_others_running() {
    let (upstream, endpoint) = fake_upstream().await;
    let proxy = spawn_proxy(SessionConfig::new(endpoint)).await;

    let mut healthy = TcpStream::connect(proxy).await.unwrap();
    let (mut healthy_server, _) = upstream.accept().await.unwrap();
    let mut doomed = TcpStream::connect(proxy).await.unwrap();
    let (doomed_server, _) = upstream.accept().await.unwrap();

    drop(doomed_server);
    assert!(drain(&mut doomed).await.is_empty());

    healthy.write_all(b"DATE\r\n").await.unwrap();
    let mut buf = [0u8; 6];
    timeout(WAIT, healthy_server.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"DATE\r\n");
    healthy_server.write_all(b"111 20261018120000\r\n").await.unwrap();
    let mut buf = [0u8; 20];
    timeout(WAIT, healthy.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"111 20261018120000\r\n");

    // New clients are still accepted.
    let _late = TcpStream::connect(proxy).await.unwrap();
    timeout(WAIT, upstream.accept()).await.unwrap().unwrap();
}

#[cfg(feature = "tls")]
mod tls {
    use super::*;
    use std::io::Write;

    use newsgate::config::TlsFiles;
    use rustls::pki_types::{CertificateDer, ServerName};
    use rustls::{ClientConfig, RootCertStore};
    use tempfile::NamedTempFile;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::TlsConnector;

    struct TestCert {
        cert: NamedTempFile,
        key: NamedTempFile,
        der: CertificateDer<'static>,
    }

    fn self_signed() -> TestCert {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file.write_all(certified.cert.pem().as_bytes()).unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        key_file
            .write_all(certified.signing_key.serialize_pem().as_bytes())
            .unwrap();
        TestCert {
            cert: cert_file,
            key: key_file,
            der: certified.cert.der().clone(),
        }
    }

    async fn spawn_tls_proxy(config: SessionConfig, cert: &TestCert) -> SocketAddr {
        let acceptor = newsgate::tls::load_tls_config(&TlsFiles {
            cert: cert.cert.path().to_path_buf(),
            key: cert.key.path().to_path_buf(),
        })
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            newsgate::proxy::start_tls(listener, Arc::new(config), acceptor)
                .await
                .unwrap();
        });
        addr
    }

    async fn tls_connect(proxy: SocketAddr, cert: &TestCert) -> TlsStream<TcpStream> {
        let mut roots = RootCertStore::empty();
        roots.add(cert.der.clone()).unwrap();
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let tcp = TcpStream::connect(proxy).await.unwrap();
        TlsConnector::from(Arc::new(config))
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn relays_over_tls() {
        let cert = self_signed();
        let (upstream, endpoint) = fake_upstream().await;
        let proxy = spawn_tls_proxy(SessionConfig::new(endpoint), &cert).await;

        let mut client = tls_connect(proxy, &cert).await;
        let (mut server, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();

        client.write_all(b"HELP\r\n").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 6];
        timeout(WAIT, server.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"HELP\r\n");

        server.write_all(b"100 help follows\r\n").await.unwrap();
        let mut buf = [0u8; 18];
        timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"100 help follows\r\n");

        drop(server);
        let mut rest = Vec::new();
        let _ = timeout(WAIT, client.read_to_end(&mut rest))
            .await
            .expect("TLS client was not closed");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn stalled_tls_client_is_torn_down() {
        let cert = self_signed();
        let (upstream, endpoint) = fake_upstream().await;
        let mut config = SessionConfig::new(endpoint);
        config.idle_timeout = Duration::from_millis(200);
        let proxy = spawn_tls_proxy(config, &cert).await;

        // Completes the handshake, then never reads again.
        let _client = tls_connect(proxy, &cert).await;
        let (server, _) = timeout(WAIT, upstream.accept()).await.unwrap().unwrap();
        let (mut server_r, mut server_w) = server.into_split();

        // Flood until the proxy stops taking data.
        tokio::spawn(async move {
            let chunk = [b'x'; 64 * 1024];
            while server_w.write_all(&chunk).await.is_ok() {}
        });

        // The upstream is closed only after the stuck client shutdown is abandoned.
        let mut buf = [0u8; 64];
        let closed = timeout(Duration::from_secs(10), server_r.read(&mut buf))
            .await
            .expect("session stayed open behind a stalled TLS client");
        assert!(matches!(closed, Ok(0) | Err(_)));
    }
}
