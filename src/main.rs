/* Tie everything together: load settings, initialize logging, check the upstream, and serve. */

use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};
use newsgate::{config, logging::init, proxy, upstream};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> ExitCode {
    init();

    let settings = match config::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // An upstream that cannot be resolved at all is a startup failure, not a per-session one.
    let upstream = &settings.session.upstream;
    match upstream::resolve(upstream).await {
        Ok(addrs) => info!("Upstream {} resolves to {:?}", upstream, addrs),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let listener = match TcpListener::bind(settings.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", settings.listen, e);
            return ExitCode::FAILURE;
        }
    };
    if settings.session.credential.is_some() {
        info!("Logging in to {} on behalf of clients", upstream);
    }

    let session_config = Arc::new(settings.session.clone());
    let serve = async {
        #[cfg(feature = "tls")]
        {
            if let Some(files) = &settings.tls {
                let acceptor = newsgate::tls::load_tls_config(files)?;
                info!("Accepting NNTPS on {}, forwarding to {}", settings.listen, upstream);
                return proxy::start_tls(listener, session_config, acceptor).await;
            }
        }

        info!("Accepting NNTP on {}, forwarding to {}", settings.listen, upstream);
        proxy::start(listener, session_config).await
    };

    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                error!("Proxy stopped: {}", e);
            }
            ExitCode::FAILURE
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            ExitCode::SUCCESS
        }
    }
}
