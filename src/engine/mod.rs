//! Generic protocol engine.
//!
//! The engine owns the pieces a protocol plugs into: role-tagged worker
//! pools, the immutable state table, the connection slot arena with its
//! host-keyed idle pool, and the timeout sweep. Connections travel between
//! workers inside work items; ownership of the connection value is the
//! only synchronization a dispatch needs, so no lock is ever held across
//! network I/O.

pub mod mask;
pub mod pool;
pub mod state;
pub mod sweep;
pub mod threads;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::handler::{FetchHandler, FetchResult};
use crate::http::request::Method;
use crate::http::{self, ClientConn, ClientRequest, RequestTarget, client};
use crate::logsink::LogSink;
use mask::ThreadMask;
use pool::{ConnPool, HostKey, PoolEntry};
use state::{Action, Flow, StateId, StateTable};
use threads::{Router, WorkItem, WorkerPool};

/// Everything the workers share. Immutable after startup except the
/// connection pool, which guards itself.
pub struct EngineShared {
    pub cfg: Config,
    pub tls: Arc<rustls::ClientConfig>,
    pub states: StateTable,
    pub pool: ConnPool<ClientConn>,
    pub router: Router<ClientConn>,
    pub log: Option<LogSink>,
}

/// Identity of the worker currently driving a connection.
pub struct ThreadContext {
    pub mask: ThreadMask,
    pub member: usize,
    pub shared: Arc<EngineShared>,
}

/// A running engine: worker tasks plus the shared dispatch state.
///
/// # Example
///
/// ```no_run
/// use courier::config::Config;
/// use courier::engine::Engine;
/// use courier::http::request::Method;
///
/// # async fn run() -> courier::error::Result<()> {
/// let engine = Engine::start(Config::default()).await?;
/// let result = engine.fetch(Method::GET, "http://example.com/").await?;
/// println!("{} ({} bytes)", result.response.status, result.body.len());
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    shared: Arc<EngineShared>,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Validate the configuration, register the protocol, and spawn the
    /// worker pools. Any configuration defect fails startup; the engine
    /// never comes up partially configured.
    pub async fn start(cfg: Config) -> Result<Engine> {
        cfg.validate(&[http::PROTOCOL_NAME])?;
        let states = http::client_states()?;

        let mut pools = Vec::new();
        let mut receiver_sets = Vec::new();
        for spec in &cfg.client_threads {
            let mask = ThreadMask::from_role(&spec.role)
                .ok_or_else(|| Error::UnknownRole(spec.role.clone()))?;
            if spec.count == 0 {
                continue;
            }
            let (pool, receivers) = WorkerPool::new(mask, spec.count);
            pools.push(pool);
            receiver_sets.push((mask, receivers));
        }
        let router = Router::new(pools);
        states.validate_coverage(router.available_mask())?;

        let tls = crate::tls::build_client_context(&cfg)?;
        let log = match &cfg.access_log {
            Some(path) => Some(LogSink::open(path, cfg.log_buffers).await.map_err(Error::Io)?),
            None => None,
        };
        let pool = ConnPool::new(cfg.client_connections);

        tracing::info!(
            connections = cfg.client_connections,
            roles = %router.available_mask(),
            "engine starting"
        );

        let shared = Arc::new(EngineShared { cfg, tls, states, pool, router, log });
        let (shutdown, _) = watch::channel(false);
        for (mask, receivers) in receiver_sets {
            for (member, rx) in receivers.into_iter().enumerate() {
                let ctx = ThreadContext { mask, member, shared: Arc::clone(&shared) };
                tokio::spawn(worker_main(ctx, rx, shutdown.subscribe()));
            }
        }

        Ok(Engine { shared, shutdown })
    }

    /// Submit a request for dispatch.
    ///
    /// Reuses an idle pooled connection to the request's host when one
    /// exists, otherwise allocates a slot and connects.
    pub fn submit_request(&self, request: ClientRequest) -> Result<()> {
        let target = RequestTarget::from_url(&request.url)?;
        self.dispatch(target, vec![request])
    }

    /// Submit several requests to one endpoint on a single connection.
    ///
    /// The requests are processed strictly in submission order; when the
    /// connection dies under them, the remaining requests fail in that
    /// same order rather than hanging.
    pub fn submit_batch(&self, requests: Vec<ClientRequest>) -> Result<()> {
        let Some(first) = requests.first() else {
            return Ok(());
        };
        let target = RequestTarget::from_url(&first.url)?;
        for request in &requests[1..] {
            if RequestTarget::from_url(&request.url)? != target {
                return Err(Error::InvalidUrl {
                    url: request.url.to_string(),
                    reason: "batch requests must share one endpoint".to_string(),
                });
            }
        }
        self.dispatch(target, requests)
    }

    fn dispatch(&self, target: RequestTarget, requests: Vec<ClientRequest>) -> Result<()> {
        let max = self.shared.cfg.max_requests_per_connection;

        if let Some(mut conn) = self.shared.pool.claim_idle(&target.host_key(), max) {
            let id = conn.id();
            tracing::debug!(conn_id = id, host = %target.host, "reusing idle connection");
            for request in requests {
                conn.enqueue(request);
            }
            conn.set_state(StateId::ClientRequest);
            return self.forward_or_free(
                id,
                ThreadMask::WORKER,
                WorkItem { conn, action: Action::ProcessNextRequest },
            );
        }

        let id = self.shared.pool.allocate().ok_or(Error::PoolExhausted)?;
        let mut conn = Box::new(ClientConn::new(id, &self.shared.cfg, target));
        tracing::debug!(conn_id = id, host = %conn.target.host, "opening connection");
        for request in requests {
            conn.enqueue(request);
        }
        self.forward_or_free(
            id,
            ThreadMask::CONNECT,
            WorkItem { conn, action: Action::ConnectHost },
        )
    }

    /// A submission that cannot be forwarded must not strand its slot.
    fn forward_or_free(
        &self,
        id: pool::ConnId,
        target: ThreadMask,
        item: WorkItem<ClientConn>,
    ) -> Result<()> {
        let result = self.shared.router.forward(target, item);
        if result.is_err() {
            self.shared.pool.free_slot(id);
        }
        result
    }

    /// Fetch a URL, buffering the whole response body in memory.
    pub async fn fetch(&self, method: Method, url: &str) -> Result<FetchResult> {
        let url = url::Url::parse(url).map_err(|e| Error::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let (handler, outcome) = FetchHandler::new(None, Vec::new());
        self.submit_request(ClientRequest::new(method, url, Box::new(handler)))?;
        match outcome.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(reason)) => Err(Error::RequestFailed(reason)),
            Err(_) => Err(Error::RequestFailed("request abandoned".to_string())),
        }
    }

    /// Idle pooled connections currently parked for `host:port`.
    pub fn idle_connections(&self, host: &str, port: u16) -> usize {
        self.shared
            .pool
            .idle_count(&HostKey { host: host.to_string(), port })
    }

    /// Free connection slots remaining in the arena.
    pub fn available_slots(&self) -> usize {
        self.shared.pool.available()
    }

    pub fn config(&self) -> &Config {
        &self.shared.cfg
    }

    /// Stop the worker pools. In-flight actions finish their current
    /// dispatch; nothing new is picked up.
    pub fn shutdown(&self) {
        if let Some(log) = &self.shared.log {
            let dropped = log.dropped();
            if dropped > 0 {
                tracing::warn!(dropped, "access log records lost to overflow");
            }
        }
        let _ = self.shutdown.send(true);
    }
}

async fn worker_main(
    ctx: ThreadContext,
    mut rx: mpsc::UnboundedReceiver<WorkItem<ClientConn>>,
    mut stop: watch::Receiver<bool>,
) {
    // One keepalive member doubles as the sweep timer.
    let sweeping = ctx.mask.intersects(ThreadMask::KEEPALIVE) && ctx.member == 0;
    let mut ticker =
        tokio::time::interval(sweep::sweep_interval(ctx.shared.cfg.keepalive_duration()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(mask = %ctx.mask, member = ctx.member, "worker up");
    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => run_item(&ctx, item).await,
                None => break,
            },
            _ = ticker.tick(), if sweeping => sweep::run_sweep(&ctx.shared),
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(mask = %ctx.mask, member = ctx.member, "worker down");
}

/// Drive one connection until it leaves this worker: verify the dispatch
/// against the state table, run the action, then follow the returned flow.
async fn run_item(ctx: &ThreadContext, item: WorkItem<ClientConn>) {
    let WorkItem { mut conn, mut action } = item;
    loop {
        match ctx.shared.states.action_for(conn.state(), ctx.mask) {
            Some(bound) if bound == action => {}
            bound => {
                tracing::error!(
                    conn_id = conn.id(),
                    state = %conn.state(),
                    mask = %ctx.mask,
                    bound = bound.map(Action::name).unwrap_or("none"),
                    dispatched = action.name(),
                    "dispatch does not match state table; dropping connection"
                );
                let id = conn.id();
                conn.close();
                ctx.shared.pool.free_slot(id);
                return;
            }
        }

        match client::execute(ctx, &mut conn, action).await {
            Flow::Continue(next) => action = next,
            Flow::Forward(target, next) => {
                let id = conn.id();
                if let Err(e) = ctx
                    .shared
                    .router
                    .forward(target, WorkItem { conn, action: next })
                {
                    tracing::error!(conn_id = id, error = %e, "forward failed");
                    ctx.shared.pool.free_slot(id);
                }
                return;
            }
            Flow::Release => {
                let key = conn.target.host_key();
                tracing::trace!(conn_id = conn.id(), host = %key.host, "parking idle connection");
                ctx.shared.pool.check_in_idle(key, conn);
                return;
            }
            Flow::Close => {
                let id = conn.id();
                conn.close();
                ctx.shared.pool.free_slot(id);
                return;
            }
        }
    }
}
