//! Live-reload push channel.
//!
//! A small HTTP server on the reload port serves the embedded client script
//! at `/livereload.js` and upgrades WebSocket connections at `/livereload`.
//! After each successful rebuild the watcher calls [`ReloadHub::notify`],
//! which pushes the changed path to every connected browser; the client
//! script reloads the page on any message.
//!
//! Each client gets its own writer thread fed by an mpsc channel, so the hub
//! holds only senders and a slow client cannot block the watch dispatcher.

use crate::{config::ProjectConfig, log, tasks::CancelToken};
use anyhow::{Context, Result, anyhow};
use std::{
    io::{self, Read, Write},
    net::SocketAddr,
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        mpsc::{Receiver, Sender, channel},
    },
};
use tiny_http::{Header, ReadWrite, Request, Response, Server, StatusCode};
use tungstenite::{
    Message,
    handshake::derive_accept_key,
    protocol::{Role, WebSocket},
};

/// Live-reload client script (embedded at compile time)
const LIVERELOAD_JS: &str = include_str!("embed/livereload.js");

/// Fan-out point for reload notifications.
pub struct ReloadHub {
    clients: Mutex<Vec<Sender<String>>>,
}

impl ReloadHub {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Tell every connected client that `path` changed. Disconnected clients
    /// are pruned on the way.
    pub fn notify(&self, path: &Path) {
        let message = serde_json::json!({
            "command": "reload",
            "path": path.display().to_string(),
        })
        .to_string();

        let mut clients = self.lock_clients();
        clients.retain(|tx| tx.send(message.clone()).is_ok());
    }

    /// Drop every client sender; writer threads see the disconnect and
    /// close their sockets.
    pub fn close(&self) {
        self.lock_clients().clear();
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    fn subscribe(&self) -> Receiver<String> {
        let (tx, rx) = channel();
        self.lock_clients().push(tx);
        rx
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, Vec<Sender<String>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run the reload server until cancelled.
pub fn run_reload_server(
    config: &'static ProjectConfig,
    hub: Arc<ReloadHub>,
    token: CancelToken,
) -> Result<()> {
    let interface: std::net::IpAddr = config
        .serve
        .interface
        .parse()
        .context("Invalid serve interface")?;
    let addr = SocketAddr::new(interface, config.serve.reload_port);

    let server = Server::http(addr)
        .map_err(|err| anyhow!("Failed to bind reload server on {addr}: {err}"))?;
    let server = Arc::new(server);

    let server_for_cancel = Arc::clone(&server);
    let hub_for_cancel = Arc::clone(&hub);
    token.on_cancel(move || {
        hub_for_cancel.close();
        server_for_cancel.unblock();
    });

    log!("reload"; "ws://{addr}/livereload");

    for request in server.incoming_requests() {
        if token.is_cancelled() {
            break;
        }
        if let Err(err) = handle_request(request, config, &hub) {
            log!("reload"; "request error: {err:#}");
        }
    }

    Ok(())
}

fn handle_request(request: Request, config: &ProjectConfig, hub: &ReloadHub) -> Result<()> {
    let url_path = request.url().split('?').next().unwrap_or("").to_owned();

    match url_path.as_str() {
        "/livereload.js" => {
            let script =
                LIVERELOAD_JS.replace("{port}", &config.serve.reload_port.to_string());
            let response = Response::from_string(script).with_header(
                Header::from_bytes("Content-Type", "application/javascript; charset=utf-8")
                    .unwrap(),
            );
            request.respond(response)?;
            Ok(())
        }
        "/livereload" => upgrade_websocket(request, hub),
        _ => {
            request.respond(Response::from_string("404 Not Found").with_status_code(404))?;
            Ok(())
        }
    }
}

/// Complete the WebSocket handshake over tiny_http's connection upgrade and
/// hand the socket to a per-client writer thread.
fn upgrade_websocket(request: Request, hub: &ReloadHub) -> Result<()> {
    let key = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Sec-WebSocket-Key"))
        .map(|h| h.value.as_str().to_owned());

    let Some(key) = key else {
        request.respond(
            Response::from_string("missing Sec-WebSocket-Key").with_status_code(400),
        )?;
        return Ok(());
    };

    let accept = derive_accept_key(key.as_bytes());
    let response = Response::empty(StatusCode(101))
        .with_header(Header::from_bytes("Upgrade", "websocket").unwrap())
        .with_header(Header::from_bytes("Connection", "Upgrade").unwrap())
        .with_header(Header::from_bytes("Sec-WebSocket-Accept", accept).unwrap());

    let stream = request.upgrade("websocket", response);
    let messages = hub.subscribe();
    spawn_client_writer(ClientStream(stream), messages);

    Ok(())
}

fn spawn_client_writer(stream: ClientStream, messages: Receiver<String>) {
    std::thread::spawn(move || {
        let mut socket = WebSocket::from_raw_socket(stream, Role::Server, None);
        // recv fails once the hub drops the sender; close the socket then
        while let Ok(message) = messages.recv() {
            if socket.send(Message::Text(message.into())).is_err() {
                return;
            }
        }
        socket.close(None).ok();
        socket.flush().ok();
    });
}

/// Read/Write adapter for tiny_http's upgraded connection.
struct ClientStream(Box<dyn ReadWrite + Send>);

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

// ============================================================================
// Tests
// ============================================================================
