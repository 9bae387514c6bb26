//! HTTP client protocol actions.
//!
//! Each function here is the action bound to one state of the client state
//! machine. An action performs non-blocking I/O against the connection's
//! buffers, re-arming on would-block, and ends by returning a [`Flow`]
//! that either continues on the current worker, hands the connection to
//! another mask, parks it in the idle pool, or closes it.
//!
//! Failure handling follows the engine taxonomy: transport and framing
//! errors abort the connection and fail every queued request in submission
//! order; handler-reported failures stay local to one request whenever the
//! wire framing is still intact.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tokio::net::lookup_host;

use crate::conn::IoProgress;
use crate::engine::ThreadContext;
use crate::engine::mask::ThreadMask;
use crate::engine::pool::PoolEntry;
use crate::engine::state::{Action, Flow, StateId};
use crate::error::{Error, Result};
use crate::http::handler::{HandlerIo, RequestOutcome};
use crate::http::parser::{ParseError, parse_http_response};
use crate::http::request::{Method, Request};
use crate::http::{ActiveRequest, BodyFraming, CLIENT_NAME, CLIENT_VERSION, ClientConn};

/// Dispatch an action against a connection.
pub(crate) async fn execute(ctx: &ThreadContext, conn: &mut ClientConn, action: Action) -> Flow {
    match action {
        Action::ConnectHost => connect_host(ctx, conn).await,
        Action::ProcessTlsHandshake => process_tls_handshake(ctx, conn).await,
        Action::ProcessNextRequest => process_next_request(ctx, conn).await,
        Action::WriteClientBody => write_client_body(ctx, conn).await,
        Action::ReadServerResponse => read_server_response(ctx, conn).await,
        Action::ReadServerBody => read_server_body(ctx, conn).await,
        Action::KeepaliveWait => keepalive_wait_connection(ctx, conn),
    }
}

/// Bound `connection_timeout` around one I/O step.
async fn timed<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::ConnectionTimeout),
    }
}

async fn connect_host(ctx: &ThreadContext, conn: &mut ClientConn) -> Flow {
    let limit = ctx.shared.cfg.connection_duration();
    let target = conn.target.clone();

    let connect = async {
        let mut addrs = lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(Error::Io)?;
        let addr = addrs.next().ok_or_else(|| Error::HostNotFound(target.host.clone()))?;
        conn.conn.connect_to_host(addr).await
    };

    match timed(limit, connect).await {
        Ok(()) => {
            tracing::debug!(
                conn_id = conn.id(),
                host = %target.host,
                port = target.port,
                tls = target.tls,
                local = ?conn.conn.local_addr(),
                "connected"
            );
            if target.tls {
                conn.set_state(StateId::TlsHandshake);
                Flow::Continue(Action::ProcessTlsHandshake)
            } else {
                conn.set_state(StateId::ClientRequest);
                Flow::Forward(ThreadMask::WORKER, Action::ProcessNextRequest)
            }
        }
        Err(e) => abort_connection(conn, e),
    }
}

async fn process_tls_handshake(ctx: &ThreadContext, conn: &mut ClientConn) -> Flow {
    let limit = ctx.shared.cfg.connection_duration();
    let host = conn.target.host.clone();
    let tls_ctx = ctx.shared.tls.clone();

    match timed(limit, conn.conn.handshake_tls(&host, tls_ctx)).await {
        Ok(()) => {
            conn.set_state(StateId::ClientRequest);
            Flow::Forward(ThreadMask::WORKER, Action::ProcessNextRequest)
        }
        Err(e) => abort_connection(conn, e),
    }
}

async fn process_next_request(ctx: &ThreadContext, conn: &mut ClientConn) -> Flow {
    let Some(request) = conn.url_requests.pop_front() else {
        conn.set_state(StateId::Waiting);
        return Flow::Forward(ThreadMask::KEEPALIVE, Action::KeepaliveWait);
    };

    let mut active = ActiveRequest {
        method: request.method,
        url: request.url,
        handler: request.handler,
        failed: None,
        body: BodyFraming::None,
    };
    active.handler.init();

    let mut head = Request {
        method: active.method,
        path: target_path(&active.url),
        version: "HTTP/1.1".to_string(),
        headers: HashMap::new(),
    };
    head.set_header("Host", host_header(&conn.target.host, conn.target.port, conn.target.tls));
    head.set_header("User-Agent", format!("{CLIENT_NAME}/{CLIENT_VERSION}"));

    if !active.handler.populate_request(&mut head) {
        // Nothing has been written; the connection framing is intact and
        // the failure stays local to this request.
        active
            .handler
            .end_request(RequestOutcome::Failed("request rejected by handler".to_string()));
        return Flow::Continue(Action::ProcessNextRequest);
    }

    let has_body = head.content_length() > 0;
    let head_bytes = head.serialize_head();
    conn.current = Some(active);

    // Coalesce the head with a following body into as few segments as
    // the buffers allow.
    conn.conn.set_nopush(has_body);
    if let Err(e) = send_bytes(ctx, conn, &head_bytes).await {
        return abort_connection(conn, e);
    }

    if has_body {
        conn.set_state(StateId::ClientBody);
        Flow::Continue(Action::WriteClientBody)
    } else {
        conn.set_state(StateId::ServerResponse);
        Flow::Continue(Action::ReadServerResponse)
    }
}

async fn write_client_body(ctx: &ThreadContext, conn: &mut ClientConn) -> Flow {
    let mut chunk = vec![0u8; ctx.shared.cfg.io_buffer_size.min(8 * 1024)];
    loop {
        let io = match conn.current.as_mut() {
            Some(active) => active.handler.write_request_body(&mut chunk),
            None => return abort_connection(conn, Error::Framing("no request in flight".into())),
        };
        match io {
            HandlerIo::Count(n) => {
                if let Err(e) = send_bytes(ctx, conn, &chunk[..n]).await {
                    return abort_connection(conn, e);
                }
            }
            HandlerIo::Done => {
                conn.conn.set_nopush(false);
                break;
            }
            HandlerIo::Failed => {
                // The request head and part of the body are on the wire;
                // the framing cannot be recovered.
                return abort_connection(
                    conn,
                    Error::Framing("request body aborted mid-stream".into()),
                );
            }
        }
    }
    conn.set_state(StateId::ServerResponse);
    Flow::Continue(Action::ReadServerResponse)
}

async fn read_server_response(ctx: &ThreadContext, conn: &mut ClientConn) -> Flow {
    let limit = ctx.shared.cfg.connection_duration();
    let max_headers = ctx.shared.cfg.max_headers;
    let header_cap = ctx.shared.cfg.header_buffer_size;

    let response = loop {
        match parse_http_response(conn.conn.peek_recv(), max_headers) {
            Ok((response, consumed)) => {
                conn.conn.consume_recv(consumed);
                break response;
            }
            Err(ParseError::Incomplete) => {
                if conn.conn.peek_recv().len() >= header_cap {
                    return abort_connection(
                        conn,
                        Error::Framing("response head exceeds header buffer".into()),
                    );
                }
                match timed(limit, conn.conn.fill()).await {
                    Ok(IoProgress::Count(_)) => {}
                    Ok(IoProgress::Eof) => {
                        return abort_connection(
                            conn,
                            Error::Framing("connection closed before response head".into()),
                        );
                    }
                    Ok(IoProgress::WouldBlock) => {
                        return abort_connection(
                            conn,
                            Error::Framing("response head exceeds io buffer".into()),
                        );
                    }
                    Err(e) => return abort_connection(conn, e),
                }
            }
            Err(e) => return abort_connection(conn, Error::Framing(e.to_string())),
        }
    };

    let conn_peer = conn.conn.peer_addr();
    let body = {
        let Some(active) = conn.current.as_mut() else {
            return abort_connection(conn, Error::Framing("response without request".into()));
        };
        let body = if active.method == Method::HEAD || response.is_bodyless() {
            BodyFraming::None
        } else {
            match response.content_length() {
                Some(0) => BodyFraming::None,
                Some(n) => BodyFraming::Length(n),
                None => BodyFraming::Eof,
            }
        };

        if let Some(log) = &ctx.shared.log {
            let peer = conn_peer.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
            log.log(
                SystemTime::now(),
                &format!("{} {} {} {}", peer, active.method, active.url, response.status),
            );
        }

        if !active.handler.handle_response(&response) {
            active.failed = Some("response rejected by handler".to_string());
        }
        active.body = body;
        body
    };
    // An eof-delimited body can only end by closing the connection.
    if !response.keep_alive() || body == BodyFraming::Eof {
        conn.connection_close = true;
    }

    if body == BodyFraming::None {
        finish_request(conn).await
    } else {
        conn.set_state(StateId::ServerBody);
        Flow::Continue(Action::ReadServerBody)
    }
}

async fn read_server_body(ctx: &ThreadContext, conn: &mut ClientConn) -> Flow {
    let limit = ctx.shared.cfg.connection_duration();

    loop {
        let framing = match conn.current.as_ref() {
            Some(active) => active.body,
            None => return abort_connection(conn, Error::Framing("no request in flight".into())),
        };

        match framing {
            BodyFraming::None => break,
            BodyFraming::Length(0) => break,
            BodyFraming::Length(remaining) => {
                let buffered = conn.conn.peek_recv();
                if buffered.is_empty() {
                    match timed(limit, conn.conn.fill()).await {
                        Ok(IoProgress::Count(_)) | Ok(IoProgress::WouldBlock) => continue,
                        Ok(IoProgress::Eof) => {
                            return abort_connection(
                                conn,
                                Error::Framing("connection closed before full body".into()),
                            );
                        }
                        Err(e) => return abort_connection(conn, e),
                    }
                }
                let take = buffered.len().min(remaining);
                let chunk = buffered[..take].to_vec();
                conn.conn.consume_recv(take);
                deliver_body_chunk(conn, &chunk);
                if let Some(active) = conn.current.as_mut() {
                    active.body = BodyFraming::Length(remaining - take);
                }
            }
            BodyFraming::Eof => {
                let buffered = conn.conn.peek_recv();
                if !buffered.is_empty() {
                    let chunk = buffered.to_vec();
                    conn.conn.consume_recv(chunk.len());
                    deliver_body_chunk(conn, &chunk);
                    continue;
                }
                match timed(limit, conn.conn.fill()).await {
                    Ok(IoProgress::Count(_)) | Ok(IoProgress::WouldBlock) => continue,
                    Ok(IoProgress::Eof) => break,
                    Err(e) => return abort_connection(conn, e),
                }
            }
        }
    }

    finish_request(conn).await
}

fn keepalive_wait_connection(_ctx: &ThreadContext, conn: &mut ClientConn) -> Flow {
    conn.conn.touch();
    if conn.connection_close || conn.conn.is_closed() {
        Flow::Close
    } else {
        Flow::Release
    }
}

/// Deliver a body chunk to the current handler unless the request already
/// failed; draining continues either way so the framing stays intact.
fn deliver_body_chunk(conn: &mut ClientConn, chunk: &[u8]) {
    if let Some(active) = conn.current.as_mut() {
        if active.failed.is_none() {
            if let HandlerIo::Failed = active.handler.read_response_body(chunk) {
                active.failed = Some("response body rejected by handler".to_string());
            }
        }
    }
}

/// Complete the request at the head of the line and decide what the
/// connection does next.
async fn finish_request(conn: &mut ClientConn) -> Flow {
    let Some(mut active) = conn.current.take() else {
        return Flow::Close;
    };
    let outcome = match active.failed.take() {
        Some(reason) => RequestOutcome::Failed(reason),
        None => RequestOutcome::Complete,
    };
    let keepalive_safe = active.handler.end_request(outcome);
    conn.requests_processed += 1;
    conn.conn.touch();

    if conn.connection_close || !keepalive_safe {
        fail_queued(conn, "connection closing");
        conn.conn.start_lingering_close().await;
        return Flow::Close;
    }
    if !conn.url_requests.is_empty() {
        conn.set_state(StateId::ClientRequest);
        return Flow::Continue(Action::ProcessNextRequest);
    }
    conn.set_state(StateId::Waiting);
    Flow::Forward(ThreadMask::KEEPALIVE, Action::KeepaliveWait)
}

/// Connection-level failure: fail the in-flight request and every queued
/// request in submission order, then close.
fn abort_connection(conn: &mut ClientConn, err: Error) -> Flow {
    tracing::warn!(
        conn_id = conn.id(),
        error = %err,
        state = %conn.state(),
        "aborting connection"
    );
    let reason = err.to_string();
    if let Some(mut active) = conn.current.take() {
        active.handler.end_request(RequestOutcome::Failed(reason.clone()));
    }
    fail_queued(conn, &reason);
    conn.conn.close();
    Flow::Close
}

fn fail_queued(conn: &mut ClientConn, reason: &str) {
    while let Some(mut request) = conn.url_requests.pop_front() {
        request
            .handler
            .end_request(RequestOutcome::Failed(reason.to_string()));
    }
}

/// Write bytes through the connection's send buffer, re-arming on
/// would-block by draining to the transport.
async fn send_bytes(ctx: &ThreadContext, conn: &mut ClientConn, bytes: &[u8]) -> Result<()> {
    let limit = ctx.shared.cfg.connection_duration();
    let mut data = bytes;
    while !data.is_empty() {
        match conn.conn.write(data) {
            IoProgress::Count(n) => data = &data[n..],
            IoProgress::WouldBlock => timed(limit, conn.conn.flush_output()).await?,
            IoProgress::Eof => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "connection closed while writing",
                )));
            }
        }
    }
    timed(limit, conn.conn.flush_output()).await
}

fn target_path(url: &url::Url) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    match url.query() {
        Some(q) => format!("{path}?{q}"),
        None => path.to_string(),
    }
}

fn host_header(host: &str, port: u16, tls: bool) -> String {
    let default_port = if tls { 443 } else { 80 };
    if port == default_port {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}
