use std::convert::Infallible;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use futures::future::select;
use futures::{pin_mut, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use warp::filters::ws::{Message, WebSocket};
use warp::Filter;

use cardroom_game::lobby::{ResponseRx, ResponseTx};
use cardroom_game::model::{Identity, TableId, UserId};
use cardroom_game::protocol::{Request, Response};
use cardroom_game::server::Core;

use crate::settings;

/// Header carrying the authenticated user id, set by the front end that
/// performed authentication.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Optional header carrying the user's display name.
pub const DISPLAY_NAME_HEADER: &str = "x-display-name";

/// Execute the entire life-cycle of the cardroom server.
pub async fn run(
    server: settings::Server,
    game: cardroom_game::server::Settings,
    shutdown_rx: oneshot::Receiver<()>,
) -> anyhow::Result<Stats> {
    let core = Arc::new(Core::new(game));

    // Client tasks hold a sender each; the channel closes once they are all gone.
    let (terminated_tx, mut terminated_rx) = mpsc::channel::<()>(1);
    let (stopped_tx, stopped_rx) = watch::channel(false);

    // Keep track of some basic statistics.
    let total_accepted_connections = Arc::new(AtomicUsize::new(0));

    // Determine bind address
    let bind_addr = server
        .bind_addr
        .to_socket_addrs()
        .with_context(|| format!("invalid bind address {}", server.bind_addr))?
        .next()
        .ok_or_else(|| anyhow!("no address for {}", server.bind_addr))?;

    let handle = ClientHandle {
        core: core.clone(),
        stopped_rx: stopped_rx.clone(),
        terminated_tx,
    };
    let routes = routes(handle, total_accepted_connections.clone());

    // Start the HTTP & WebSocket server.
    let mut server_stopped_rx = stopped_rx;
    let (addr, web_server) =
        warp::serve(routes).try_bind_with_graceful_shutdown(bind_addr, async move {
            while !stopping(&server_stopped_rx) {
                if server_stopped_rx.changed().await.is_err() {
                    break;
                }
            }
            info!("received shutdown notice");
        })?;
    info!("running on {}", addr);
    let web_server = tokio::spawn(web_server);

    // Wait for shutdown, then begin graceful termination.
    if shutdown_rx.await.is_err() {
        warn!("shutdown sender went away; stopping");
    }
    stopped_tx.send(true).ok();
    if let Err(e) = web_server.await {
        error!("web server task: {}", e);
    }
    info!("web server stopped");

    // Handle graceful shutdown.
    info!("waiting for client tasks to terminate");
    terminated_rx.recv().await;

    Ok(Stats {
        total_accepted_connections: total_accepted_connections.load(Ordering::Acquire),
        games_started: core.games_started(),
    })
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stats {
    pub total_accepted_connections: usize,
    pub games_started: usize,
}

fn routes(
    handle: ClientHandle,
    total_accepted_connections: Arc<AtomicUsize>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    // Define our routes:

    // * List who is waiting at a table
    let core = handle.core.clone();
    let members = warp::get()
        .and(warp::path!("tables" / String / "members"))
        .and(warp::any().map(move || core.clone()))
        .and_then(list_members);

    // * Accept websocket connections from authenticated users
    let table = warp::path!("tables" / String)
        .and(warp::ws())
        .and(identity())
        .and(warp::addr::remote())
        .map(
            move |table: String, ws: warp::ws::Ws, identity: Identity, addr: Option<SocketAddr>| {
                let handle = handle.clone();
                let total_accepted_connections = total_accepted_connections.clone();
                let table_id = TableId(table);
                ws.on_upgrade(move |stream| async move {
                    if let Some(addr) = addr {
                        total_accepted_connections.fetch_add(1, Ordering::AcqRel);
                        info!(
                            "accepted connection from {} for {} at {}",
                            addr, identity.user_id, table_id
                        );
                        handle_client(handle, identity, table_id, stream, addr).await;
                    } else {
                        error!("no address for incoming connection")
                    }
                })
            },
        );

    members.or(table)
}

// The identity the authenticating front end attached to the request. A blank
// user id counts as no identity at all.
fn identity() -> impl Filter<Extract = (Identity,), Error = warp::Rejection> + Clone {
    warp::header::<String>(USER_ID_HEADER)
        .and(warp::header::optional::<String>(DISPLAY_NAME_HEADER))
        .and_then(|user_id: String, display_name: Option<String>| async move {
            let user_id = user_id.trim().to_string();
            if user_id.is_empty() {
                return Err(warp::reject());
            }
            let display_name = display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| user_id.clone());
            Ok(Identity {
                user_id: UserId(user_id),
                display_name,
            })
        })
}

async fn list_members(table: String, core: Arc<Core>) -> Result<impl warp::Reply, Infallible> {
    let members = core.members(&TableId(table)).await;
    Ok(warp::reply::json(&members))
}

// The limit of pending requests from a particular client.
const REQUEST_CAPACITY: usize = 2;

type RequestTx = mpsc::Sender<Request>;
type RequestRx = mpsc::Receiver<Request>;

async fn handle_client(
    handle: ClientHandle,
    identity: Identity,
    table_id: TableId,
    stream: WebSocket,
    addr: SocketAddr,
) {
    // setup communication channels
    let (core, stopped_rx, terminated_tx) = handle.split();
    let (response_tx, response_rx) = futures::channel::mpsc::unbounded();
    let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
    // setup task loops
    let connection = process_connection(stopped_rx.clone(), stream, addr, response_rx, request_tx);
    let request = handle_requests(
        &core,
        identity,
        table_id,
        stopped_rx,
        addr,
        request_rx,
        response_tx,
    );
    pin_mut!(connection, request);
    // run task loops interleaved, and wait for both to finish.
    select(connection, request).await.factor_first().1.await;
    info!("finished handling {}", addr);
    // notify main task that we're done.
    drop(terminated_tx);
}

async fn process_connection(
    mut stopped_rx: watch::Receiver<bool>,
    mut stream: WebSocket,
    addr: SocketAddr,
    mut response_rx: ResponseRx,
    request_tx: RequestTx,
) {
    debug!("starting connection processing loop for {}", addr);
    while !stopping(&stopped_rx) {
        tokio::select! {
            // Server shutting down
            changed = stopped_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            },
            // Write out response to socket
            Some(resp) = response_rx.next() =>
                send_response(&resp, &mut stream, &addr).await,
            // Receive request from socket
            msg = stream.next() =>
                if forward_request(msg, &request_tx, &addr).await {
                    break;
                }
        }
    }
}

async fn send_response(resp: &Response, stream: &mut WebSocket, addr: &SocketAddr) {
    match serde_json::to_string(resp) {
        Ok(data) => {
            if let Err(e) = stream.send(Message::text(data)).await {
                error!("while sending response to {}: {}", addr, e);
            }
        }
        Err(e) => error!("while serializing response to {}: {}", addr, e),
    }
}

// Returns whether the connection is finished.
async fn forward_request(
    msg: Option<Result<Message, warp::Error>>,
    request_tx: &RequestTx,
    addr: &SocketAddr,
) -> bool {
    let msg = match msg {
        None => return true,
        Some(Ok(msg)) => msg,
        Some(Err(e)) => {
            error!("reading message from {}: {}", addr, e);
            return true;
        }
    };
    if msg.is_close() {
        return true;
    }
    // pings and pongs are answered by the transport
    if !msg.is_text() {
        if msg.is_binary() {
            warn!("ignoring binary message from {}", addr);
        }
        return false;
    }
    let data = match msg.to_str() {
        Ok(data) => data,
        Err(()) => return false,
    };
    match serde_json::from_str(data) {
        Ok(req) => {
            if request_tx.send(req).await.is_err() {
                return true;
            }
        }
        Err(e) => error!("deserializing request from {}: {}", addr, e),
    }
    false
}

async fn handle_requests(
    core: &Core,
    identity: Identity,
    table_id: TableId,
    mut stopped_rx: watch::Receiver<bool>,
    addr: SocketAddr,
    mut request_rx: RequestRx,
    response_tx: ResponseTx,
) {
    let mut hard_stop = false;
    let mut context = core.connect(identity, table_id, response_tx);

    debug!(
        "starting request handling loop for {} as {} at {}",
        addr,
        context.player().connection_id,
        context.table_id()
    );
    loop {
        if stopping(&stopped_rx) {
            debug!("received notification to stop handling {}", addr);
            hard_stop = true;
            break;
        }
        tokio::select! {
            changed = stopped_rx.changed() => {
                if changed.is_err() {
                    hard_stop = true;
                    break;
                }
            },
            opt_request = request_rx.recv() => match opt_request {
                Some(req) => context.execute(req).await,
                None => {
                    debug!("apparent death of sibling task for {}", addr);
                    break;
                },
            }
        }
    }

    if !hard_stop {
        debug!("cleaning up {}", addr);
        context.cleanup().await;
    }
}

fn stopping(stopped_rx: &watch::Receiver<bool>) -> bool {
    *stopped_rx.borrow()
}

/// A handle to the core and shutdown notifications for new clients.
#[derive(Clone)]
struct ClientHandle {
    core: Arc<Core>,
    stopped_rx: watch::Receiver<bool>,
    terminated_tx: mpsc::Sender<()>,
}

impl ClientHandle {
    /// Consume the handle to acquire its members.
    fn split(self) -> (Arc<Core>, watch::Receiver<bool>, mpsc::Sender<()>) {
        (self.core, self.stopped_rx, self.terminated_tx)
    }
}
