//! Preview server and serve-mode coordinator.
//!
//! [`serve_templates`] owns the whole serve lifecycle: it wires the Ctrl+C
//! handler to a shared [`CancelToken`], spawns the static server, the reload
//! server and the watch dispatcher as [`TaskGroup`] members, and waits for
//! the group to unwind. The first member to fail, or the interrupt signal,
//! cancels all the others.
//!
//! The static server itself is a plain `tiny_http` file server over the
//! output directory with `index.html` resolution and a directory listing.

use crate::{
    config::ProjectConfig,
    log,
    paths::TemplateId,
    reload::{self, ReloadHub},
    tasks::{CancelToken, TaskGroup},
    watch,
};
use anyhow::{Context, Result, anyhow};
use std::{
    fs,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tiny_http::{Header, Request, Response, Server};

/// Directory listing HTML template (embedded at compile time)
const DIRECTORY_TEMPLATE: &str = include_str!("embed/directory.html");

// ============================================================================
// Serve Coordinator
// ============================================================================

/// Serve the output directory, optionally watching sources for rebuilds.
///
/// Blocks until Ctrl+C or a task failure. A clean interrupt returns Ok.
pub fn serve_templates(config: &'static ProjectConfig, templates: Vec<TemplateId>) -> Result<()> {
    let token = CancelToken::new();
    let mut group = TaskGroup::new(token.clone());

    let signal_token = token.clone();
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        signal_token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    if config.serve.watch {
        let hub = Arc::new(ReloadHub::new());

        let reload_hub = Arc::clone(&hub);
        group.spawn("reload", move |token| {
            reload::run_reload_server(config, reload_hub, token)
        })?;

        group.spawn("watch", move |token| {
            watch::watch_for_changes(config, &templates, &hub, token)
        })?;
    }

    group.spawn("serve", move |token| run_static_server(config, token))?;

    group.wait()?;
    log!("serve"; "bye!");
    Ok(())
}

// ============================================================================
// Static Server
// ============================================================================

/// Run the static file server until cancelled.
///
/// Binds exactly once; a taken port is a hard error so the reload URL
/// injected into the pages can never go stale.
fn run_static_server(config: &'static ProjectConfig, token: CancelToken) -> Result<()> {
    let interface: std::net::IpAddr = config
        .serve
        .interface
        .parse()
        .context("Invalid serve interface")?;
    let addr = SocketAddr::new(interface, config.serve.port);

    let server =
        Server::http(addr).map_err(|err| anyhow!("Failed to bind on {addr}: {err}"))?;
    let server = Arc::new(server);

    let server_for_cancel = Arc::clone(&server);
    token.on_cancel(move || server_for_cancel.unblock());

    log!("serve"; "http://{addr}");

    for request in server.incoming_requests() {
        if token.is_cancelled() {
            break;
        }
        if let Err(err) = handle_request(request, config) {
            log!("serve"; "request error: {err:#}");
        }
    }

    Ok(())
}

/// Handle a single HTTP request.
///
/// Request resolution order:
/// 1. Exact file match → serve file
/// 2. Directory with index.html → serve index.html
/// 3. Directory without index.html → generate listing
/// 4. Nothing found → 404
fn handle_request(request: Request, config: &ProjectConfig) -> Result<()> {
    let serve_root = &config.build.output;

    // Decode URL-encoded characters (e.g., %20 → space)
    let url_path = urlencoding::decode(request.url())
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();

    // Strip query string before resolving path
    let path_without_query = url_path.split('?').next().unwrap_or(&url_path);
    let request_path = path_without_query.trim_matches('/').to_owned();

    let Some(relative) = sanitize_request_path(&request_path) else {
        return serve_not_found(request);
    };
    let local_path = serve_root.join(relative);

    // Try to serve the file directly
    if local_path.is_file() {
        return serve_file(request, &local_path);
    }

    // If it's a directory, try index.html or generate listing
    if local_path.is_dir() {
        let index_path = local_path.join("index.html");
        if index_path.is_file() {
            return serve_file(request, &index_path);
        }

        if let Ok(listing) = generate_directory_listing(&local_path, &request_path) {
            return serve_html(request, listing);
        }
    }

    serve_not_found(request)
}

/// Reject any request path that could escape the output directory.
fn sanitize_request_path(raw: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(clean)
}

// ============================================================================
// Response Helpers
// ============================================================================

/// Serve a file with appropriate content type.
fn serve_file(request: Request, path: &Path) -> Result<()> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content_type = guess_content_type(path);

    let response = Response::from_data(content)
        .with_header(Header::from_bytes("Content-Type", content_type).unwrap());

    request.respond(response)?;
    Ok(())
}

/// Serve HTML content.
fn serve_html(request: Request, content: String) -> Result<()> {
    let response = Response::from_string(content)
        .with_header(Header::from_bytes("Content-Type", "text/html; charset=utf-8").unwrap());
    request.respond(response)?;
    Ok(())
}

/// Serve 404 Not Found response.
fn serve_not_found(request: Request) -> Result<()> {
    let response = Response::from_string("404 Not Found")
        .with_status_code(404)
        .with_header(Header::from_bytes("Content-Type", "text/plain").unwrap());
    request.respond(response)?;
    Ok(())
}

/// Guess MIME content type from file extension.
///
/// Returns `application/octet-stream` for unknown extensions.
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Directory Listing
// ============================================================================

/// Generate HTML directory listing for browsing rendered templates.
///
/// Only shows directories and `.html` files; hidden entries are filtered.
fn generate_directory_listing(dir_path: &Path, request_path: &str) -> std::io::Result<String> {
    let mut entries: Vec<_> = fs::read_dir(dir_path)?
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let is_hidden = name_str.starts_with('.');
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            !is_hidden && (is_dir || name_str.ends_with(".html"))
        })
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            (name, is_dir)
        })
        .collect();
    entries.sort();

    let entries: Vec<String> = entries
        .into_iter()
        .map(|(name, is_dir)| {
            let icon = if is_dir { "📁" } else { "📄" };
            let href = if request_path.is_empty() {
                format!("/{name}")
            } else {
                format!("/{request_path}/{name}")
            };
            format!(r#"<li><span class="icon">{icon}</span><a href="{href}">{name}</a></li>"#)
        })
        .collect();

    // Generate parent link if not at root
    let parent_link = if request_path.is_empty() {
        String::new()
    } else {
        let parent_path = Path::new(request_path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent_href = if parent_path.is_empty() {
            "/".to_string()
        } else {
            format!("/{parent_path}")
        };
        format!(
            r#"<li class="parent"><span class="icon">📂</span><a href="{parent_href}">..</a></li>"#
        )
    };

    #[allow(clippy::literal_string_with_formatting_args)]
    // These are template placeholders, not format args
    Ok(DIRECTORY_TEMPLATE
        .replace("{path}", request_path)
        .replace("{parent_link}", &parent_link)
        .replace("{entries}", &entries.join("\n        ")))
}

// ============================================================================
// Tests
// ============================================================================
