//! # uPMU Receiver Server
//!
//! Accepts device connections over TCP and runs one task per connection. Each task feeds
//! socket bytes to a `FrameDecoder`, hands completed frames to a `Session` and writes the
//! 4-byte acknowledgment back before the frame's records are windowed.
//!
//! ## Key Components
//!
//! - `Receiver`: Bound listener plus the shared `SessionContext`.
//! - `handle_connection`: The per-connection loop.
//! - `run_receiver`: Builds storage, sink, aliases and backup from a `ReceiverConfig` and
//!   serves forever.

use log::{error, info, warn};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use upmu_core::backup::BackupWriter;
use upmu_core::export::CsvSink;
use upmu_core::framing::{FrameDecoder, FrameLimits};
use upmu_core::session::{new_pending_states, Session, SessionContext};

use crate::config::ReceiverConfig;
use crate::sqlite_store::SqliteStore;

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct Receiver {
    listener: TcpListener,
    ctx: SessionContext,
    limits: FrameLimits,
}

impl Receiver {
    pub async fn bind(
        addr: SocketAddr,
        ctx: SessionContext,
        limits: FrameLimits,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Receiver {
            listener,
            ctx,
            limits,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        info!("Listening on {}", self.local_addr()?);
        match self.ctx.cycle_seconds {
            Some(seconds) => info!("Writing {} second windows", seconds),
            None => info!("Receive-only mode: frames are stored but not windowed"),
        }

        loop {
            let (socket, peer) = self.listener.accept().await?;
            info!("Connected: {}", peer);
            let ctx = self.ctx.clone();
            let limits = self.limits;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, peer, ctx, limits).await {
                    warn!("Connection {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

/// Serves one device connection until it closes or sends an invalid header.
pub async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
    limits: FrameLimits,
) -> io::Result<()> {
    let mut decoder = FrameDecoder::new(limits);
    let mut session = Session::new(ctx, peer.to_string());
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let result = loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        let frames = match decoder.feed(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                error!("{}: {}; closing connection", peer, e);
                break Ok(());
            }
        };
        let mut write_failed = None;
        for frame in frames {
            let (ack, staged) = session.accept_frame(frame).await;
            if let Err(e) = socket.write_all(&ack).await {
                write_failed = Some(e);
                break;
            }
            info!("Sent confirmation of receipt ({:?})", ack);
            if let Some(staged) = staged {
                session.ingest(staged).await;
            }
        }
        if let Some(e) = write_failed {
            break Err(e);
        }
        if let Some(e) = decoder.failure() {
            error!("{}: {}; closing connection", peer, e);
            break Ok(());
        }
    };

    if !decoder.is_idle() {
        warn!(
            "{}: connection closed with {} bytes of an incomplete frame",
            peer,
            decoder.buffered()
        );
    }
    session.close();
    result
}

/// Runs the receiver described by `config`.
pub async fn run_receiver(config: ReceiverConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    config.validate()?;
    let aliases = config.load_aliases()?;
    let storage = Arc::new(SqliteStore::open(&config.database)?);

    let mut ctx = SessionContext::new(storage, new_pending_states())
        .with_aliases(aliases.clone())
        .with_backup(Arc::new(BackupWriter::new(&config.backup_dir)));
    if let Some(seconds) = config.seconds {
        let sink = CsvSink::new(&config.output, config.depth, aliases);
        ctx = ctx.with_windowing(seconds, Arc::new(sink));
    }

    let receiver = Receiver::bind(config.listen_addr()?, ctx, config.frame_limits()).await?;
    receiver.run().await?;
    Ok(())
}
