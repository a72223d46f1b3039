use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::vectordb::engine::Engine;
use crate::vectordb::protocol::{decode_request, encode_failure, encode_response, Status, MAX_FRAME};

pub struct EngineServer {
    engine: Arc<Engine>,
}

impl EngineServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, root = %self.engine.root().display(), "vectordb listening");
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        debug!(%peer, "client connected");
                        if let Err(e) = handle_client(socket, engine).await {
                            // Disconnects mid-frame are routine.
                            if e.kind() != io::ErrorKind::UnexpectedEof {
                                warn!(%peer, error = %e, "client error");
                            }
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
    }
}

/// Serves `engine` from a background thread with its own runtime and returns the
/// bound address. Binding to port 0 picks a free port.
pub fn spawn(engine: Arc<Engine>, addr: &str) -> io::Result<SocketAddr> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local = listener.local_addr()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name(format!("vectordb-{local}"))
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!(error = %e, "could not adopt listener");
                        return;
                    }
                };
                if let Err(e) = EngineServer::new(engine).serve(listener).await {
                    error!(error = %e, "server stopped");
                }
            })
        })?;
    Ok(local)
}

async fn handle_client(mut stream: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    loop {
        // 1. OpCode
        let mut op_buf = [0u8; 1];
        if stream.read_exact(&mut op_buf).await.is_err() {
            return Ok(());
        }
        let opcode = op_buf[0];

        // 2. Length
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let length = u32::from_le_bytes(len_buf) as usize;
        if length > MAX_FRAME {
            warn!(length, "payload too large");
            let message = format!("payload of {length} bytes exceeds {MAX_FRAME}");
            stream.write_all(&encode_failure(Status::Invalid, &message)).await?;
            return Ok(());
        }

        // 3. Body
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await?;

        // 4. Execute off the reactor; engine calls block on locks and disk.
        let response = match decode_request(opcode, &body) {
            Err(message) => {
                warn!(opcode = format!("0x{opcode:02X}"), %message, "rejected request");
                encode_failure(Status::Invalid, &message)
            }
            Ok(request) => {
                let write = request.is_write();
                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || engine.execute(request)).await {
                    Ok(result) => {
                        if let Err(e) = &result {
                            debug!(opcode = format!("0x{opcode:02X}"), write, error = %e, "request failed");
                        }
                        encode_response(&result)
                    }
                    Err(e) => {
                        error!(error = %e, "engine task failed");
                        encode_failure(Status::Failed, "engine task failed")
                    }
                }
            }
        };
        stream.write_all(&response).await?;
        stream.flush().await?;
    }
}
