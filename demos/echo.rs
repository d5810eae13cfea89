//! Echo over one multiplexed TCP connection.
//!
//! Starts a listener, connects to it, and runs several streams side by side.
//!
//! ```text
//! RUST_LOG=muxwire=debug cargo run --example echo
//! ```

use muxwire::{connect, MuxListener, Session, Stream};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const STREAMS: usize = 8;

async fn echo(stream: Stream) -> muxwire::Result<()> {
    loop {
        let chunk = stream.read(4096).await?;
        if chunk.is_empty() {
            break;
        }
        stream.write_bytes(chunk).await?;
    }
    stream.close().await
}

async fn serve(session: Session) {
    while let Some(stream) = session.accept_stream().await {
        tokio::spawn(async move {
            let id = stream.id();
            if let Err(e) = echo(stream).await {
                tracing::warn!(stream_id = id, error = %e, "echo failed");
            }
        });
    }
    info!("server session finished");
}

#[tokio::main]
async fn main() -> muxwire::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listener = MuxListener::bind("127.0.0.1:0", None).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let server = tokio::spawn(async move {
        match listener.accept().await {
            Ok((session, peer)) => {
                info!(%peer, "accepted connection");
                serve(session).await;
            }
            Err(e) => tracing::error!(error = %e, "accept failed"),
        }
    });

    let client = connect(addr, None).await?;

    let mut tasks = Vec::with_capacity(STREAMS);
    for n in 0..STREAMS {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let stream = client.connect_stream().await?;
            let message = format!("hello from stream {}", n);
            stream.write(message.as_bytes()).await?;
            stream.close().await?;

            let reply = stream.read_exact(message.len()).await?;
            info!(
                stream_id = stream.id(),
                reply = %String::from_utf8_lossy(&reply),
                "echoed"
            );
            Ok::<_, muxwire::MuxError>(())
        }));
    }

    for task in tasks {
        match task.await {
            Ok(result) => result?,
            Err(e) => tracing::error!(error = %e, "client task panicked"),
        }
    }

    client.close().await;
    let _ = server.await;
    Ok(())
}
