use tracing::{error, info, warn};

use crate::config::Config;
use crate::http::connection::ConnectionHandler;
use crate::server::acceptor::{AcceptorOptions, ConnectionAcceptor};

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let (host, port) = cfg.server.host_port()?;

    let mut acceptor = ConnectionAcceptor::new(AcceptorOptions {
        reuse_address: cfg.server.reuse_address,
    });
    acceptor.bind(&host, port).await?;
    let mut incoming = acceptor.listen(cfg.server.backlog)?;
    info!("Listening on {}", cfg.server.listen_addr);

    while let Some(accepted) = incoming.next().await {
        let conn = accepted?;
        let peer = conn.peer_addr();
        info!("Accepted connection from {}", peer);

        let parser_config = cfg.parser;
        tokio::spawn(async move {
            let mut handler = ConnectionHandler::new(conn, parser_config);
            if let Err(e) = handler.run().await {
                error!("Connection error from {}: {}", peer, e);
            }
        });
    }

    warn!("Accept stream ended");
    Ok(())
}
