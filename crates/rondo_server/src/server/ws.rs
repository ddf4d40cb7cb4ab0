#![forbid(unsafe_code)]

use anyhow::Context as _;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::router::RouterEvent;
use super::session::{ConnId, OUTBOUND_QUEUE_CAPACITY, Outbound};

/// Accept websocket connections and feed them to the router.
pub async fn run_listener(bind: &str, events: mpsc::Sender<RouterEvent>) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await.with_context(|| format!("bind {bind}"))?;
	info!(%bind, "listening for websocket connections");

	let mut next_conn_id: ConnId = 0;
	loop {
		match listener.accept().await {
			Ok((stream, peer)) => {
				next_conn_id += 1;
				let conn_id = next_conn_id;
				let events = events.clone();
				tokio::spawn(async move {
					debug!(conn = conn_id, remote = %peer, "accepted connection");
					if let Err(err) = handle_connection(stream, conn_id, events).await {
						debug!(conn = conn_id, %err, "connection task ended with error");
					}
				});
			}
			Err(err) => {
				warn!(%err, "accept failed; continuing");
			}
		}
	}
}

async fn handle_connection(stream: TcpStream, conn_id: ConnId, events: mpsc::Sender<RouterEvent>) -> anyhow::Result<()> {
	let ws = accept_async(stream).await.context("websocket handshake")?;
	let (mut sink, mut source) = ws.split();

	let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
	if events
		.send(RouterEvent::Open {
			conn_id,
			outbound: outbound_tx,
		})
		.await
		.is_err()
	{
		return Ok(());
	}

	// Writer drains the router's outbound queue; it exits once the
	// router drops the session (sender closed) or the peer goes away.
	let writer = tokio::spawn(async move {
		while let Some(item) = outbound_rx.recv().await {
			match item {
				Outbound::Frame(frame) => {
					if sink.send(Message::text(frame)).await.is_err() {
						break;
					}
				}
				Outbound::Close => {
					let _ = sink.send(Message::Close(None)).await;
					break;
				}
			}
		}
	});

	while let Some(msg) = source.next().await {
		match msg {
			Ok(Message::Text(text)) => {
				if events
					.send(RouterEvent::Frame {
						conn_id,
						raw: text.to_string(),
					})
					.await
					.is_err()
				{
					break;
				}
			}
			Ok(Message::Close(_)) | Err(_) => break,
			Ok(_) => {}
		}
	}

	let _ = events.send(RouterEvent::Close { conn_id }).await;
	let _ = writer.await;
	Ok(())
}
