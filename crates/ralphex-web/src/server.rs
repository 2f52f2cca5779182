use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ralphex_core::CancelToken;

use crate::error::WebError;
use crate::handler::{handle_index, handle_plan, ApiState};
use crate::request::{parse_request, HttpMethod};
use crate::response::{error_response, write_response};
use crate::router::Router;
use crate::sse;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Synchronous dashboard server: a polling accept loop that observes the
/// cancellation token, one short-lived thread per connection.
pub struct DashboardServer {
    addr: String,
    state: ApiState,
    router: Router,
}

impl DashboardServer {
    pub fn new(host: &str, port: u16, state: ApiState) -> Self {
        let mut router = Router::new();
        router.add_route(HttpMethod::Get, "/", handle_index);
        router.add_route(HttpMethod::Get, "/api/plan", handle_plan);
        Self {
            addr: format!("{host}:{port}"),
            state,
            router,
        }
    }

    /// Bind the listener and run the accept loop on a background thread.
    /// Returns the bound address (useful with port 0) and the thread handle.
    pub fn start(self, cancel: CancelToken) -> Result<(SocketAddr, JoinHandle<()>), WebError> {
        let listener = TcpListener::bind(&self.addr).map_err(|source| WebError::Bind {
            addr: self.addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let handle = thread::spawn(move || self.accept_loop(listener, cancel));
        Ok((local_addr, handle))
    }

    fn accept_loop(self, listener: TcpListener, cancel: CancelToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let state = self.state.clone();
                    let router = self.router.clone();
                    let cancel = cancel.clone();
                    thread::spawn(move || {
                        if let Err(err) = handle_connection(stream, &state, &router, &cancel) {
                            eprintln!("warning: dashboard connection failed: {err}");
                        }
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if cancel.sleep(ACCEPT_POLL) {
                        return;
                    }
                }
                Err(err) => {
                    eprintln!("warning: dashboard accept failed: {err}");
                    if cancel.sleep(ACCEPT_POLL) {
                        return;
                    }
                }
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    state: &ApiState,
    router: &Router,
    cancel: &CancelToken,
) -> Result<(), WebError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let request = match parse_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            let response = error_response(400, &err.to_string());
            return write_response(&mut stream, &response);
        }
    };

    // the event stream outlives a single response; handled outside the router
    if request.method == HttpMethod::Get && request.path == "/api/events" {
        let events = state.bus.subscribe();
        return sse::stream_events(&mut stream, &events, cancel);
    }

    let response = match router.match_route(request.method, &request.path) {
        Some(handler) => handler(&request, state),
        None => error_response(404, "route not found"),
    };
    write_response(&mut stream, &response)
}

/// Host value browsers can connect to; wildcard binds map to localhost.
pub fn connect_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "::" | "" => "localhost",
        other => other,
    }
}
