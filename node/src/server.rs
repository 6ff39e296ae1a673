use std::{io, net::SocketAddr, sync::Arc};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Fault, FaultKind, Msg, Reply},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

use crate::{config::NodeConfig, handler::Handler};

/// A listening node, every accepted connection is served on its own task.
pub struct Node {
    listener: TcpListener,
    handler: Arc<Handler>,
}

impl Node {
    /// Binds the node to the address in `config`.
    pub async fn bind(config: NodeConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.addr()).await?;
        Ok(Self {
            listener,
            handler: Arc::new(Handler::new(config)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            info!("client connected from {addr}");

            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                let (rx, tx) = stream.into_split();
                let (rx, tx) = comms::channel(rx, tx);

                match serve(rx, tx, &handler).await {
                    Ok(()) => info!("client {addr} disconnected"),
                    Err(e) => warn!("connection with {addr} failed: {e}"),
                }
            });
        }
    }
}

/// Answers the requests of a single client until it disconnects.
///
/// # Arguments
/// * `rx` - The receiving end of the connection.
/// * `tx` - The sending end of the connection.
/// * `handler` - Executes the received commands.
///
/// # Returns
/// `Ok` once the client disconnects or hangs up, the io error otherwise.
pub async fn serve<R, W>(
    mut rx: OnoReceiver<R>,
    mut tx: OnoSender<W>,
    handler: &Handler,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = match rx.recv::<Msg>().await {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("received a malformed frame: {e}");
                let fault = Fault {
                    id: None,
                    kind: FaultKind::Invalid,
                    detail: e.to_string(),
                };
                tx.send(&Msg::Err(fault)).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let (id, cmd) = match msg {
            Msg::Control { id, cmd } => (id, cmd),
            other => {
                warn!("expected a control message, got {other:?}");
                let fault = Fault {
                    id: other.id(),
                    kind: FaultKind::Invalid,
                    detail: "expected a control message".into(),
                };
                tx.send(&Msg::Err(fault)).await?;
                continue;
            }
        };

        if let Command::Disconnect = cmd {
            tx.send(&Msg::Reply { id, reply: Reply::Ack }).await?;
            return Ok(());
        }

        let name = cmd.name();
        debug!(id = id; "handling {name}");

        let response = match handler.handle(cmd).await {
            Ok(reply) => Msg::Reply { id, reply },
            Err(e) => {
                warn!(id = id; "{name} failed: {e}");
                Msg::Err(e.into_fault(Some(id)))
            }
        };

        tx.send(&response).await?;
    }
}
