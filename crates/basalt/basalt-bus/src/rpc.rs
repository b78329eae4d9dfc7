//! Request/response RPC framing.
//!
//! Requests, responses, and cancellations are ordinary committed frames
//! routed by header value:
//!
//! - client → server: `a0_rpc_type = "request"`, correlated by the packet id
//! - server → client: `a0_rpc_type = "response"` plus `a0_req_id`
//! - client → server: `a0_rpc_type = "cancel"` plus `a0_req_id`
//!
//! The server tracks nothing per request. The client keeps a
//! `request id → callback` map under its own lock and fires each callback
//! at most once when a matching response arrives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use basalt_arena::{ArenaFile, FileOptions};
use basalt_packet::{Packet, PacketView};
use basalt_transport::Transport;

use crate::worker::{Init, Worker};
use crate::{BusError, commit_packet, topic};

pub const RPC_TYPE_KEY: &str = "a0_rpc_type";
pub const RPC_TYPE_REQUEST: &str = "request";
pub const RPC_TYPE_RESPONSE: &str = "response";
pub const RPC_TYPE_CANCEL: &str = "cancel";
pub const REQ_ID_KEY: &str = "a0_req_id";

/// An in-flight request handed to the server's request callback.
pub struct Request<'a> {
    pub pkt: PacketView<'a>,
    transport: &'a Transport,
}

impl Request<'_> {
    /// Sends `resp` back to the requesting client.
    ///
    /// The response must be its own packet; reusing the request id would
    /// make the correlation headers ambiguous.
    pub fn reply(&self, mut resp: Packet) -> Result<(), BusError> {
        if resp.id() == self.pkt.id() {
            return Err(BusError::InvalidReply);
        }
        resp.push_header(RPC_TYPE_KEY, RPC_TYPE_RESPONSE);
        resp.push_header(REQ_ID_KEY, self.pkt.id());
        commit_packet(self.transport, &resp)
    }
}

/// Serves requests on one RPC topic.
pub struct RpcServer {
    worker: Option<Worker>,
}

impl RpcServer {
    /// Attaches to the topic and starts servicing requests.
    ///
    /// `on_request` runs on the worker thread with the transport lock
    /// released; replying from inside it is fine. `on_cancel` receives the
    /// id of a request the client no longer wants; it is best-effort and
    /// may fire after the request was already answered.
    pub fn open(
        name: &str,
        opts: &FileOptions,
        mut on_request: impl FnMut(Request<'_>) + Send + 'static,
        mut on_cancel: impl FnMut(&str) + Send + 'static,
    ) -> Result<RpcServer, BusError> {
        let file = ArenaFile::open(topic::rpc_path(name), opts)?;
        let transport = Arc::new(Transport::new(file.into_arena())?);
        let reply_transport = Arc::clone(&transport);

        let worker = Worker::spawn(
            transport,
            Init::MostRecent,
            move |buf| {
                let view = match PacketView::parse(buf) {
                    Ok(view) => view,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable frame");
                        return;
                    }
                };
                match view.find_header(RPC_TYPE_KEY) {
                    Some(RPC_TYPE_REQUEST) => on_request(Request {
                        pkt: view,
                        transport: reply_transport.as_ref(),
                    }),
                    Some(RPC_TYPE_CANCEL) => {
                        if let Some(req_id) = view.find_header(REQ_ID_KEY) {
                            on_cancel(req_id);
                        }
                    }
                    _ => {}
                }
            },
            |e| tracing::error!(error = %e, "rpc server worker failed"),
        )?;

        Ok(RpcServer { worker: Some(worker) })
    }

    /// Stops servicing and joins the worker thread.
    pub fn close(mut self) {
        self.close_impl();
    }

    fn close_impl(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.close_impl();
    }
}

type ReplyFn = Box<dyn FnOnce(PacketView<'_>) + Send>;

struct ClientState {
    outstanding: HashMap<String, ReplyFn>,
    closing: bool,
}

/// Issues requests on one RPC topic.
pub struct RpcClient {
    transport: Arc<Transport>,
    state: Arc<Mutex<ClientState>>,
    worker: Option<Worker>,
}

impl RpcClient {
    pub fn open(name: &str, opts: &FileOptions) -> Result<RpcClient, BusError> {
        let file = ArenaFile::open(topic::rpc_path(name), opts)?;
        let transport = Arc::new(Transport::new(file.into_arena())?);

        let state = Arc::new(Mutex::new(ClientState {
            outstanding: HashMap::new(),
            closing: false,
        }));
        let worker_state = Arc::clone(&state);

        let worker = Worker::spawn(
            Arc::clone(&transport),
            Init::MostRecent,
            move |buf| {
                let view = match PacketView::parse(buf) {
                    Ok(view) => view,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable frame");
                        return;
                    }
                };
                if view.find_header(RPC_TYPE_KEY) != Some(RPC_TYPE_RESPONSE) {
                    return;
                }
                let Some(req_id) = view.find_header(REQ_ID_KEY) else {
                    return;
                };

                let callback = {
                    let mut state = lock_state(&worker_state);
                    if state.closing {
                        return;
                    }
                    state.outstanding.remove(req_id)
                };
                // Invoked with both the transport lock and the client's own
                // lock released.
                if let Some(callback) = callback {
                    callback(view);
                }
            },
            |e| tracing::error!(error = %e, "rpc client worker failed"),
        )?;

        Ok(RpcClient { transport, state, worker: Some(worker) })
    }

    /// Sends `pkt` as a request. `on_reply` fires at most once, when a
    /// response correlated to this packet's id arrives.
    pub fn send(
        &self,
        pkt: Packet,
        on_reply: impl FnOnce(PacketView<'_>) + Send + 'static,
    ) -> Result<(), BusError> {
        {
            let mut state = lock_state(&self.state);
            if state.closing {
                return Err(BusError::Shutdown);
            }
            state.outstanding.insert(pkt.id().to_string(), Box::new(on_reply));
        }

        let mut pkt = pkt;
        pkt.push_header(RPC_TYPE_KEY, RPC_TYPE_REQUEST);
        let sent = commit_packet(&self.transport, &pkt);
        if sent.is_err() {
            lock_state(&self.state).outstanding.remove(pkt.id());
        }
        sent
    }

    /// Drops the reply callback for `req_id` and tells the server the
    /// request is no longer wanted.
    pub fn cancel(&self, req_id: &str) -> Result<(), BusError> {
        {
            let mut state = lock_state(&self.state);
            if state.closing {
                return Err(BusError::Shutdown);
            }
            state.outstanding.remove(req_id);
        }

        let mut pkt = Packet::new(Vec::new());
        pkt.push_header(RPC_TYPE_KEY, RPC_TYPE_CANCEL);
        pkt.push_header(REQ_ID_KEY, req_id);
        commit_packet(&self.transport, &pkt)
    }

    /// Stops the worker; outstanding callbacks never fire afterwards.
    pub fn close(mut self) {
        self.close_impl();
    }

    fn close_impl(&mut self) {
        lock_state(&self.state).closing = true;
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close_impl();
    }
}

fn lock_state(state: &Mutex<ClientState>) -> MutexGuard<'_, ClientState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
