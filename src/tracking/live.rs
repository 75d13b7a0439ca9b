//! Serves a run's metrics over HTTP while it trains.
//!
//! Routes:
//!   GET /run     run header as JSON (404 before `init`)
//!   GET /metrics every record logged so far, as a JSON array
//!   GET /events  Server-Sent Events: replays history as `metric` events,
//!                then streams new ones, pinging when idle; ends with `done`

use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::tracking::sink::{MetricRecord, RunInfo, TrackingSink};

const KEEPALIVE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct LiveState {
    run: Option<RunInfo>,
    records: Vec<MetricRecord>,
    finished: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LiveState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Serialize)]
struct Done {
    steps: u64,
}

/// A tracking sink backed by a tiny_http server. The listener runs on a
/// background thread until the sink is finished or dropped.
pub struct LiveSink {
    server: Arc<Server>,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
    steps: u64,
}

impl LiveSink {
    /// Binds `addr` (e.g. `127.0.0.1:7878`; port 0 picks a free one).
    pub fn bind(addr: &str) -> Result<LiveSink> {
        let server = Server::http(addr)
            .map_err(|e| Error::Tracking(format!("cannot bind {}: {}", addr, e)))?;
        let server = Arc::new(server);
        let shared = Arc::new(Shared::default());

        let acceptor = {
            let server = server.clone();
            let shared = shared.clone();
            std::thread::spawn(move || {
                // Each request gets its own thread so a long-lived event
                // stream does not stall other routes.
                for request in server.incoming_requests() {
                    let shared = shared.clone();
                    std::thread::spawn(move || dispatch(request, &shared));
                }
            })
        };

        let sink = LiveSink { server, shared, acceptor: Some(acceptor), steps: 0 };
        if let Some(local) = sink.local_addr() {
            info!(addr = %local, "live tracking server listening");
        }
        Ok(sink)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            state.finished = true;
        }
        self.shared.changed.notify_all();
        self.server.unblock();
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("live tracking acceptor thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for LiveSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSink")
            .field("addr", &self.local_addr())
            .field("steps", &self.steps)
            .finish()
    }
}

impl TrackingSink for LiveSink {
    fn init(&mut self, run: &RunInfo) -> Result<()> {
        let mut state = self.shared.lock();
        if state.run.is_some() {
            return Err(Error::Tracking("run already initialized".to_owned()));
        }
        state.run = Some(run.clone());
        Ok(())
    }

    fn log(&mut self, metrics: &[(&str, f64)]) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if state.run.is_none() {
                return Err(Error::Tracking("log called before init".to_owned()));
            }
            let step = self.steps;
            state.records.extend(metrics.iter().map(|&(name, value)| MetricRecord {
                step,
                name: name.to_owned(),
                value,
            }));
        }
        self.steps += 1;
        self.shared.changed.notify_all();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for LiveSink {
    fn drop(&mut self) {
        if self.acceptor.is_some() {
            self.shutdown();
        }
    }
}

fn json_header() -> Option<Header> {
    Header::from_bytes(b"Content-Type", b"application/json").ok()
}

fn respond_json<T: Serialize>(request: Request, value: &T) {
    let response = match serde_json::to_string(value) {
        Ok(body) => {
            let response = Response::from_string(body);
            match json_header() {
                Some(header) => response.with_header(header),
                None => response,
            }
        }
        Err(e) => Response::from_string(e.to_string()).with_status_code(500),
    };
    if let Err(e) = request.respond(response) {
        debug!(error = %e, "client went away");
    }
}

fn respond_status(request: Request, code: u16, body: &str) {
    let _ = request.respond(Response::from_string(body).with_status_code(code));
}

fn dispatch(request: Request, shared: &Shared) {
    let method = request.method().clone();
    let path = request.url().split('?').next().unwrap_or("").to_owned();
    match (method, path.as_str()) {
        (Method::Get, "/run") => {
            let run = shared.lock().run.clone();
            match run {
                Some(run) => respond_json(request, &run),
                None => respond_status(request, 404, "run not initialized"),
            }
        }
        (Method::Get, "/metrics") => {
            let records = shared.lock().records.clone();
            respond_json(request, &records);
        }
        (Method::Get, "/events") => stream_events(request, shared),
        _ => respond_status(request, 404, "not found"),
    }
}

fn format_event(name: &str, json: &str) -> String {
    format!("event: {}\ndata: {}\n\n", name, json)
}

fn write_frame<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(data)?;
    writer.flush()
}

/// `GET /events`: writes the status line and headers by hand on the raw
/// writer, then streams frames until the run finishes or the client leaves.
fn stream_events(request: Request, shared: &Shared) {
    let mut writer = request.into_writer();
    let header = "HTTP/1.1 200 OK\r\n\
                  Content-Type: text/event-stream\r\n\
                  Cache-Control: no-cache\r\n\
                  Connection: keep-alive\r\n\
                  X-Accel-Buffering: no\r\n\
                  \r\n";
    if write_frame(&mut writer, header.as_bytes()).is_err() {
        return;
    }

    let mut sent = 0;
    loop {
        let (pending, finished, steps) = {
            let mut state = shared.lock();
            if state.records.len() == sent && !state.finished {
                state = match shared.changed.wait_timeout(state, KEEPALIVE) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
            let pending = state.records[sent..].to_vec();
            let steps = state.records.last().map_or(0, |r| r.step + 1);
            (pending, state.finished, steps)
        };

        if pending.is_empty() && !finished {
            if write_frame(&mut writer, b": ping\n\n").is_err() {
                return;
            }
            continue;
        }
        for record in &pending {
            let Ok(json) = serde_json::to_string(record) else { continue };
            if write_frame(&mut writer, format_event("metric", &json).as_bytes()).is_err() {
                return;
            }
        }
        sent += pending.len();

        if finished {
            let json = serde_json::to_string(&Done { steps }).unwrap_or_else(|_| "{}".to_owned());
            let _ = write_frame(&mut writer, format_event("done", &json).as_bytes());
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::sink::sample_run;
    use std::io::Read;
    use std::net::TcpStream;

    /// Sends a GET and reads until `until` shows up, the peer closes, or a
    /// timeout hits.
    fn get(addr: SocketAddr, path: &str, until: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path).unwrap();
        let mut response = Vec::new();
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&response).contains(until) {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => response.extend_from_slice(&chunk[..n]),
            }
        }
        String::from_utf8_lossy(&response).into_owned()
    }

    #[test]
    fn serves_run_and_metrics() {
        let mut sink = LiveSink::bind("127.0.0.1:0").unwrap();
        let addr = sink.local_addr().unwrap();
        assert!(get(addr, "/run", "not initialized").starts_with("HTTP/1.1 404"));

        sink.init(&sample_run()).unwrap();
        sink.log(&[("train/loss", 0.5)]).unwrap();
        sink.log(&[("val/loss", 0.75)]).unwrap();

        let run = get(addr, "/run", "segmentation");
        assert!(run.contains("custom_unet-20240101[1200]"));
        let metrics = get(addr, "/metrics", "]");
        assert!(metrics.contains(r#""name":"val/loss""#));
        assert!(metrics.contains(r#""step":1"#));
        sink.finish().unwrap();
    }

    #[test]
    fn event_stream_replays_history_and_closes_on_finish() {
        let mut sink = LiveSink::bind("127.0.0.1:0").unwrap();
        let addr = sink.local_addr().unwrap();
        sink.init(&sample_run()).unwrap();
        sink.log(&[("train/loss", 0.5)]).unwrap();

        let reader = std::thread::spawn(move || get(addr, "/events", "event: done\ndata: {\"steps\":2}"));
        std::thread::sleep(Duration::from_millis(200));
        sink.log(&[("train/loss", 0.25)]).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        sink.finish().unwrap();

        let body = reader.join().unwrap();
        assert!(body.contains("text/event-stream"));
        assert_eq!(body.matches("event: metric").count(), 2);
        assert!(body.contains("event: done\ndata: {\"steps\":2}"));
    }
}
