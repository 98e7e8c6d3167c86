//! The three long-running pumps of a session: server to client, client to
//! server, and the periodic latency report.

use crate::{
    protocol::{
        game::{GamePacket, Pool},
        Decoder, Header,
    },
    server::{packet::Latency, ServerMessage},
    session::{processor::Context, Session},
};
use anyhow::{anyhow, bail};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{select, task, time};

pub(crate) fn spawn_pumps(session: Arc<Session>) {
    task::spawn(run_server(Arc::clone(&session)));
    task::spawn(run_client(Arc::clone(&session)));
    task::spawn(run_latency(session));
}

/// Continuously reads packets from the downstream server and forwards them
/// to the client. When the current downstream dies, triggers the fallback.
async fn run_server(session: Arc<Session>) {
    loop {
        if session.ctx().is_cancelled() {
            break;
        }
        let Some((_, conn)) = session.server().await else {
            break;
        };

        let message = match conn.read_packet().await {
            Ok(message) => message,
            Err(err) => {
                // A concurrent transfer may already have swapped the
                // downstream; only the current one is worth recovering.
                if !session.is_current(&conn).await {
                    continue;
                }
                conn.close_with_error(err.context("failed to read packet from server"));
                if let Err(err) = session.fallback().await {
                    log_error(&session, "fallback failed", &err);
                    session
                        .close_with_error(err.context("fallback failed"))
                        .await;
                    break;
                }
                continue;
            }
        };

        match message {
            ServerMessage::Latency(pk) => session.record_server_latency(pk.latency),
            ServerMessage::Transfer(pk) => {
                if let Err(err) = session.transfer(&pk.addr).await {
                    log_error(&session, "failed to transfer", &err);
                }
            }
            ServerMessage::Flush => {
                let cancelled = session.with_processor(|processor| {
                    let mut ctx = Context::new();
                    processor.process_flush(&mut ctx);
                    ctx.cancelled()
                });
                if cancelled {
                    continue;
                }
                if let Err(err) = session.client().flush().await {
                    log_error(&session, "failed to flush client's buffer", &err);
                    session
                        .close_with_error(err.context("failed to flush client's buffer"))
                        .await;
                    break;
                }
            }
            ServerMessage::UpdateCache(pk) => {
                let mut cache = pk.cache;
                let cancelled = session.with_processor(|processor| {
                    let mut ctx = Context::new();
                    processor.process_cache(&mut ctx, &mut cache);
                    ctx.cancelled()
                });
                if !cancelled {
                    session.set_cache(cache);
                }
            }
            ServerMessage::Game(pk) => {
                if let Err(err) = handle_server_packet(&session, pk).await {
                    log_error(&session, "failed to write packet to client", &err);
                    session
                        .close_with_error(err.context("failed to write packet to client"))
                        .await;
                    break;
                }
            }
            ServerMessage::Raw(payload) => {
                let mut payload = payload;
                let cancelled = session.with_processor(|processor| {
                    let mut ctx = Context::new();
                    processor.process_server_encoded(&mut ctx, &mut payload);
                    ctx.cancelled()
                });
                if cancelled {
                    continue;
                }
                if let Err(err) = session.client().write_raw(&payload).await {
                    log_error(&session, "failed to write packet to client", &err);
                    session
                        .close_with_error(err.context("failed to write packet to client"))
                        .await;
                    break;
                }
            }
            // Only appears during the connection sequence; nothing to do
            // for the pump.
            ServerMessage::ConnectionResponse(_) => {}
        }
    }
}

/// Processes and forwards one decoded packet from the server to the client.
async fn handle_server_packet(session: &Arc<Session>, mut pk: GamePacket) -> anyhow::Result<()> {
    let cancelled = session.with_processor(|processor| {
        let mut ctx = Context::new();
        processor.process_server(&mut ctx, &mut pk);
        ctx.cancelled()
    });
    if cancelled {
        return Ok(());
    }

    // The tracker always sees the latest protocol's shape of the packet,
    // even when the downstream speaks the client's older revision.
    match session.client().translator() {
        Some(translator) if session.opts().sync_protocol => {
            for latest in translator.convert_to_latest(pk.clone()) {
                session.tracker().handle_packet(&latest).await;
            }
        }
        _ => session.tracker().handle_packet(&pk).await,
    }
    session.client().write_packet(&pk).await
}

/// Continuously reads packets from the client and forwards them to the
/// downstream server.
async fn run_client(session: Arc<Session>) {
    let pool = Pool::from_client();
    loop {
        if session.ctx().is_cancelled() {
            break;
        }

        let payload = match session.client().read_bytes().await {
            Ok(payload) => payload,
            Err(err) => {
                log_error(&session, "failed to read packet from client", &err);
                session
                    .close_with_error(err.context("failed to read packet from client"))
                    .await;
                break;
            }
        };

        if let Err(err) = handle_client_packet(&session, &pool, payload).await {
            // Write failures belong to the downstream; the server pump
            // notices the closed connection and recovers.
            if let Some((_, conn)) = session.server().await {
                conn.close_with_error(err.context("failed to write packet to server"));
            }
        }
    }
}

/// Processes and forwards one raw packet from the client to the server.
async fn handle_client_packet(
    session: &Arc<Session>,
    pool: &Pool,
    mut payload: Vec<u8>,
) -> anyhow::Result<()> {
    let header = Header::decode(&mut Decoder::new(&payload))
        .map_err(|_| anyhow!("failed to decode header"))?;

    if !session.opts().client_decode.contains(&header.id) {
        let cancelled = session.with_processor(|processor| {
            let mut ctx = Context::new();
            processor.process_client_encoded(&mut ctx, &mut payload);
            ctx.cancelled()
        });
        if cancelled {
            return Ok(());
        }
        let Some((_, conn)) = session.server().await else {
            return Ok(());
        };
        return conn.write_raw(&payload).await;
    }

    let pk = {
        let mut decoder = Decoder::new(&payload);
        let header = Header::decode(&mut decoder).map_err(anyhow::Error::from)?;
        let Some(factory) = pool.get(header.id) else {
            bail!("unknown packet {}", header.id);
        };
        catch_unwind(AssertUnwindSafe(|| factory(&mut decoder)))
            .map_err(|_| anyhow!("panic while decoding packet {}", header.id))??
    };

    let Some((_, conn)) = session.server().await else {
        return Ok(());
    };

    if session.opts().sync_protocol {
        let mut pk = pk;
        let cancelled = session.with_processor(|processor| {
            let mut ctx = Context::new();
            processor.process_client(&mut ctx, &mut pk);
            ctx.cancelled()
        });
        if cancelled {
            return Ok(());
        }
        return conn.write_packet(&pk).await;
    }

    let packets = match session.client().translator() {
        Some(translator) => translator.convert_to_latest(pk),
        None => vec![pk],
    };
    for mut latest in packets {
        let cancelled = session.with_processor(|processor| {
            let mut ctx = Context::new();
            processor.process_client(&mut ctx, &mut latest);
            ctx.cancelled()
        });
        if cancelled {
            break;
        }
        conn.write_packet(&latest).await?;
    }
    Ok(())
}

/// Periodically reports the client's current ping to the downstream server.
/// The client's latency is half of the RakNet round-trip time, so it is
/// doubled here; the server echoes back the total latency it measured.
async fn run_latency(session: Arc<Session>) {
    let period = Duration::from_millis(session.opts().latency_interval);
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    loop {
        select! {
            _ = session.ctx().cancelled() => break,
            _ = ticker.tick() => {
                let Some((_, conn)) = session.server().await else {
                    continue;
                };
                let latency = session.client().latency().as_millis() as i64 * 2;
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as i64;
                if let Err(err) = conn.write_packet(&Latency { latency, timestamp }).await {
                    log_error(&session, "failed to write latency packet", &err);
                }
            }
        }
    }
}

fn log_error(session: &Session, message: &str, err: &anyhow::Error) {
    if session.ctx().is_cancelled() {
        return;
    }
    tracing::error!(
        username = %session.client().identity().display_name,
        "{message}: {err:#}"
    );
}
