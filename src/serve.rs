//! Development server with live reload
//!
//! Serves the destination root over HTTP. HTML responses get a small script
//! that long-polls `/__livereload`; the poll returns as soon as a task
//! finishes successfully, and the page reloads itself.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tokio::process::Command;

use crate::error::{AssetError, Result};
use crate::runner::{Runner, TaskEvent, TaskStatus};

const RELOAD_PATH: &str = "/__livereload";
const LONG_POLL: Duration = Duration::from_secs(25);

/// Characters left alone in a listing href segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const RELOAD_SCRIPT: &str = r#"<script>
(function () {
  var seen = null;
  function poll() {
    fetch('/__livereload?since=' + (seen === null ? '' : seen))
      .then(function (r) { return r.text(); })
      .then(function (t) {
        var gen = parseInt(t, 10);
        if (seen !== null && gen !== seen) { location.reload(); return; }
        seen = gen;
        poll();
      })
      .catch(function () { setTimeout(poll, 1000); });
  }
  poll();
})();
</script>"#;

/// Generation counter that long-poll requests wait on.
#[derive(Debug, Default)]
pub struct ReloadSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl ReloadSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wake every waiting browser.
    pub fn notify(&self) {
        if let Ok(mut generation) = self.generation.lock() {
            *generation += 1;
            self.changed.notify_all();
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.lock().map(|g| *g).unwrap_or_default()
    }

    /// Block until the generation moves past `since` or `timeout` elapses;
    /// returns the generation seen last.
    pub fn wait_past(&self, since: u64, timeout: Duration) -> u64 {
        let Ok(guard) = self.generation.lock() else {
            return since;
        };
        match self.changed.wait_timeout_while(guard, timeout, |g| *g <= since) {
            Ok((guard, _)) => *guard,
            Err(_) => since,
        }
    }
}

/// Poke the reload signal whenever a task finishes successfully.
pub fn forward_reloads(runner: &Runner, reload: Arc<ReloadSignal>) -> tokio::task::JoinHandle<()> {
    let mut events = runner.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TaskEvent::Finished {
                    status: TaskStatus::Succeeded,
                    task,
                }) => {
                    tracing::debug!(%task, "reloading browsers");
                    reload.notify();
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => reload.notify(),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Open `url` in the default browser and leave it running.
pub fn open_browser(url: &str) -> io::Result<()> {
    browser_command(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(drop)
}

fn browser_command(url: &str) -> Command {
    let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
        ("open", &[])
    } else if cfg!(windows) {
        ("cmd", &["/C", "start", ""])
    } else {
        ("xdg-open", &[])
    };
    let mut command = Command::new(program);
    command.args(args).arg(url);
    command
}

/// Dev server settings
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub livereload: bool,
    pub directory_listing: bool,
}

/// Bound server, not yet accepting requests.
pub struct DevServer {
    server: Arc<Server>,
    addr: SocketAddr,
    root: PathBuf,
    options: ServeOptions,
    reload: Arc<ReloadSignal>,
}

/// Running server; dropping it does not stop it, `shutdown` does.
pub struct ServerHandle {
    server: Arc<Server>,
    thread: JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(self) {
        self.server.unblock();
        let _ = self.thread.join();
    }
}

impl DevServer {
    pub fn bind(
        host: &str,
        port: u16,
        root: impl Into<PathBuf>,
        options: ServeOptions,
    ) -> Result<Self> {
        let fail = |message: String| AssetError::Serve { port, message };

        let server = Server::http((host, port)).map_err(|e| fail(e.to_string()))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| fail("not bound to an IP address".to_string()))?;

        Ok(Self {
            server: Arc::new(server),
            addr,
            root: root.into(),
            options,
            reload: ReloadSignal::new(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn reload_signal(&self) -> Arc<ReloadSignal> {
        Arc::clone(&self.reload)
    }

    /// Accept requests on a background thread, one thread per request so
    /// long polls never block file requests.
    pub fn spawn(self) -> ServerHandle {
        let server = Arc::clone(&self.server);
        let thread = std::thread::spawn(move || {
            let ctx = Arc::new(RequestContext {
                root: self.root,
                options: self.options,
                reload: self.reload,
            });
            for request in self.server.incoming_requests() {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    if let Err(e) = handle_request(request, &ctx) {
                        tracing::debug!(error = %e, "request error");
                    }
                });
            }
        });
        ServerHandle { server, thread }
    }
}

struct RequestContext {
    root: PathBuf,
    options: ServeOptions,
    reload: Arc<ReloadSignal>,
}

fn handle_request(request: Request, ctx: &RequestContext) -> io::Result<()> {
    let url = request.url().to_string();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));

    if path == RELOAD_PATH {
        let since = query
            .split('&')
            .find_map(|kv| kv.strip_prefix("since="))
            .and_then(|v| v.parse::<u64>().ok());
        let generation = match since {
            Some(since) => ctx.reload.wait_past(since, LONG_POLL),
            None => ctx.reload.generation(),
        };
        let body = generation.to_string().into_bytes();
        return send(request, 200, "text/plain; charset=utf-8", body);
    }

    if request.method() != &Method::Get && request.method() != &Method::Head {
        let body = b"405 Method Not Allowed".to_vec();
        return send(request, 405, "text/plain; charset=utf-8", body);
    }

    match resolve_path(path, &ctx.root) {
        Some(Resolved::File(file)) => {
            let content_type = content_type(&file);
            let mut body = fs::read(&file)?;
            if ctx.options.livereload && content_type.starts_with("text/html") {
                body = inject_reload_script(body);
            }
            send(request, 200, content_type, body)
        }
        Some(Resolved::Directory(dir)) if ctx.options.directory_listing => {
            let mut body = directory_listing(&dir, path)?.into_bytes();
            if ctx.options.livereload {
                body = inject_reload_script(body);
            }
            send(request, 200, "text/html; charset=utf-8", body)
        }
        _ => send(request, 404, "text/plain; charset=utf-8", b"404 Not Found".to_vec()),
    }
}

fn send(request: Request, status: u16, content_type: &str, body: Vec<u8>) -> io::Result<()> {
    let mut response = Response::from_data(body).with_status_code(StatusCode(status));
    if let Ok(header) = Header::from_bytes("Content-Type", content_type) {
        response.add_header(header);
    }
    if let Ok(header) = Header::from_bytes("Cache-Control", "no-store") {
        response.add_header(header);
    }
    request.respond(response)
}

#[derive(Debug, PartialEq, Eq)]
enum Resolved {
    File(PathBuf),
    Directory(PathBuf),
}

/// Map a URL path onto the serve root. Nothing outside the root is
/// reachable.
fn resolve_path(url_path: &str, root: &Path) -> Option<Resolved> {
    let decoded = percent_decode_str(url_path).decode_utf8().ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));

    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }

    let local = root.join(relative);
    let canonical = local.canonicalize().ok()?;
    if !canonical.starts_with(root.canonicalize().ok()?) {
        return None;
    }

    if canonical.is_file() {
        return Some(Resolved::File(canonical));
    }
    if canonical.is_dir() {
        let index = canonical.join("index.html");
        if index.is_file() {
            return Some(Resolved::File(index));
        }
        return Some(Resolved::Directory(canonical));
    }
    None
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Splice the reload script in before the last `</body>`, or append it.
/// The page's own bytes are left as they are, whatever their encoding.
fn inject_reload_script(mut body: Vec<u8>) -> Vec<u8> {
    let at = body
        .windows(b"</body>".len())
        .rposition(|w| w == b"</body>")
        .unwrap_or(body.len());
    body.splice(at..at, RELOAD_SCRIPT.bytes());
    body
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `url_path` is the request path as received, still percent-encoded.
fn directory_listing(dir: &Path, url_path: &str) -> io::Result<String> {
    let mut names: Vec<(String, bool)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path().is_dir()))
        .collect();
    names.sort();

    let base = if url_path.ends_with('/') {
        url_path.to_string()
    } else {
        format!("{url_path}/")
    };
    let href_base = escape_html(&base);
    let title = escape_html(&percent_decode_str(&base).decode_utf8_lossy());

    let mut html = format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head><body>\n<h1>{title}</h1>\n<ul>\n"
    );
    for (name, is_dir) in names {
        let slash = if is_dir { "/" } else { "" };
        let href = escape_html(&utf8_percent_encode(&name, SEGMENT).to_string());
        let label = escape_html(&name);
        html.push_str(&format!(
            "<li><a href=\"{href_base}{href}{slash}\">{label}{slash}</a></li>\n"
        ));
    }
    html.push_str("</ul>\n</body></html>\n");
    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("index.html"), "<html><body>hi</body></html>").unwrap();
        fs::write(dir.path().join("css/main.css"), "a{}").unwrap();
        dir
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(stream, "GET {path} HTTP/1.0\r\nHost: localhost\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_resolve_stays_inside_root() {
        let dir = site();
        let root = dir.path();

        assert!(matches!(resolve_path("/css/main.css", root), Some(Resolved::File(_))));
        assert!(matches!(resolve_path("/", root), Some(Resolved::File(p)) if p.ends_with("index.html")));
        assert!(matches!(resolve_path("/css", root), Some(Resolved::Directory(_))));
        assert_eq!(resolve_path("/../etc/passwd", root), None);
        assert_eq!(resolve_path("/%2e%2e/etc/passwd", root), None);
        assert_eq!(resolve_path("/missing.css", root), None);
    }

    #[test]
    fn test_inject_before_body_close() {
        let out = inject_reload_script(b"<html><body>x</body></html>".to_vec());
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("__livereload"));
        assert!(out.ends_with("</body></html>"));
    }

    #[test]
    fn test_inject_keeps_non_utf8_bytes() {
        let page = b"<html><body>caf\xe9</body></html>".to_vec();
        let out = inject_reload_script(page);

        assert!(out.starts_with(b"<html><body>caf\xe9<script>"));
        assert!(out.ends_with(b"</script></body></html>"));
    }

    #[test]
    fn test_inject_appends_without_body() {
        let out = inject_reload_script(b"<p>x</p>".to_vec());
        assert!(out.starts_with(b"<p>x</p><script>"));
    }

    #[test]
    fn test_listing_hrefs_are_encoded() {
        let dir = site();
        fs::write(dir.path().join("css/a#1 b.css"), "b{}").unwrap();
        fs::create_dir_all(dir.path().join("css/sub dir")).unwrap();

        let html = directory_listing(&dir.path().join("css"), "/css").unwrap();

        assert!(html.contains(r#"<a href="/css/a%231%20b.css">a#1 b.css</a>"#));
        assert!(html.contains(r#"<a href="/css/sub%20dir/">sub dir/</a>"#));
        assert!(html.contains(r#"<a href="/css/main.css">main.css</a>"#));
        assert!(matches!(
            resolve_path("/css/a%231%20b.css", dir.path()),
            Some(Resolved::File(p)) if p.ends_with("a#1 b.css")
        ));
    }

    #[test]
    fn test_resolve_rejects_invalid_utf8() {
        let dir = site();
        assert_eq!(resolve_path("/%ff.css", dir.path()), None);
    }

    #[test]
    fn test_browser_command_takes_url_last() {
        let command = browser_command("http://127.0.0.1:8000/");
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(args.last().copied(), Some(std::ffi::OsStr::new("http://127.0.0.1:8000/")));
    }

    #[test]
    fn test_wait_past_returns_on_notify() {
        let signal = ReloadSignal::new();
        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || signal.wait_past(0, Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(50));
        signal.notify();
        assert_eq!(waiter.join().unwrap(), 1);
    }

    #[test]
    fn test_wait_past_times_out() {
        let signal = ReloadSignal::new();
        assert_eq!(signal.wait_past(0, Duration::from_millis(20)), 0);
    }

    #[test]
    fn test_serves_files_and_listing() {
        let dir = site();
        let options = ServeOptions {
            livereload: true,
            directory_listing: true,
        };
        let server = DevServer::bind("127.0.0.1", 0, dir.path(), options).unwrap();
        let addr = server.addr();
        let handle = server.spawn();

        let index = get(addr, "/");
        assert!(index.starts_with("HTTP/1.0 200") || index.starts_with("HTTP/1.1 200"));
        assert!(index.contains("__livereload"));

        let css = get(addr, "/css/main.css");
        assert!(css.contains("text/css"));
        assert!(css.ends_with("a{}"));

        let listing = get(addr, "/css/");
        assert!(listing.contains("main.css"));

        assert!(get(addr, "/nope.js").contains("404"));
        assert!(get(addr, "/__livereload").ends_with("0"));

        handle.shutdown();
    }
}
