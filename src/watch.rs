//! Watch-and-rebuild loop.
//!
//! Two `notify` watchers (template sources, data files) funnel their events
//! into one mpsc channel with provenance tags; cancellation is injected into
//! the same channel. A single dispatcher thread consumes the merged stream,
//! resolves each event path back to its identifier, re-renders exactly that
//! identifier and pushes a reload notification on success.
//!
//! The watched file set is fixed at startup; files added later are not
//! picked up. There is no debouncing: every relevant event rebuilds
//! independently, which is acceptable because rebuilds are cheap and
//! idempotent.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌─────────────┐
//! │ src watcher│   │data watcher│   │ cancel hook │
//! └─────┬──────┘   └─────┬──────┘   └──────┬──────┘
//!       │ Source(..)     │ Data(..)        │ Cancelled
//!       └────────────────┼─────────────────┘
//!                        ▼
//!               merged mpsc channel
//!                        │
//!                        ▼
//!               dispatcher thread ──► rebuild one id ──► ReloadHub::notify
//! ```

use crate::{
    build::{BuildMode, build_batch},
    config::ProjectConfig,
    log,
    paths::{self, TemplateId},
    reload::ReloadHub,
    tasks::CancelToken,
};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::{
    path::Path,
    sync::mpsc::{Receiver, channel},
};

/// One entry of the merged event stream, tagged by provenance.
enum WatchSignal {
    Source(notify::Result<Event>),
    Data(notify::Result<Event>),
    Cancelled,
}

/// Which root directory owns an event path.
#[derive(Debug, Clone, Copy)]
enum Provenance {
    Source,
    Data,
}

impl Provenance {
    fn root<'a>(self, config: &'a ProjectConfig) -> &'a Path {
        match self {
            Self::Source => &config.build.src,
            Self::Data => &config.build.data,
        }
    }
}

/// Only writes are worth a rebuild; access events would re-trigger on the
/// rebuild's own reads on some platforms.
const fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
}

/// Watch the discovered template and data files until cancelled.
///
/// Blocks on the merged event stream; returns on cancellation or on the
/// first fatal error (which fails the whole task group).
pub fn watch_for_changes(
    config: &'static ProjectConfig,
    templates: &[TemplateId],
    hub: &ReloadHub,
    token: CancelToken,
) -> Result<()> {
    let (tx, rx) = channel();

    let src_tx = tx.clone();
    let mut src_watcher = notify::recommended_watcher(move |event| {
        src_tx.send(WatchSignal::Source(event)).ok();
    })
    .context("Failed to create source watcher")?;

    let data_tx = tx.clone();
    let mut data_watcher = notify::recommended_watcher(move |event| {
        data_tx.send(WatchSignal::Data(event)).ok();
    })
    .context("Failed to create data watcher")?;

    register_watches(&mut src_watcher, &mut data_watcher, config, templates)?;

    token.on_cancel(move || {
        tx.send(WatchSignal::Cancelled).ok();
    });

    log!("watch"; "waiting for changes...");
    run_dispatcher(config, hub, &rx)
}

/// Register one watch per discovered file.
///
/// Data files are optional, so a missing data path is skipped; a missing
/// source path is an error.
fn register_watches(
    src_watcher: &mut impl Watcher,
    data_watcher: &mut impl Watcher,
    config: &ProjectConfig,
    templates: &[TemplateId],
) -> Result<()> {
    for id in templates {
        let source = paths::source_path(config, id);
        src_watcher
            .watch(&source, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", source.display()))?;

        let data = paths::data_path(config, id);
        if let Err(err) = data_watcher.watch(&data, RecursiveMode::NonRecursive) {
            if !is_not_found(&err) {
                return Err(err)
                    .with_context(|| format!("Failed to watch {}", data.display()));
            }
        }
    }

    log!("watch"; "watching {} templates", templates.len());
    Ok(())
}

fn is_not_found(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io_err) => io_err.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

/// Consume the merged stream until cancellation or a fatal error.
fn run_dispatcher(
    config: &ProjectConfig,
    hub: &ReloadHub,
    signals: &Receiver<WatchSignal>,
) -> Result<()> {
    loop {
        match signals.recv() {
            Ok(WatchSignal::Source(event)) => {
                handle_event(config, hub, event, Provenance::Source)?;
            }
            Ok(WatchSignal::Data(event)) => {
                handle_event(config, hub, event, Provenance::Data)?;
            }
            // Disconnect can only happen after the cancel hook consumed tx
            Ok(WatchSignal::Cancelled) | Err(_) => return Ok(()),
        }
    }
}

/// Rebuild exactly the identifier behind one filesystem event.
///
/// Watcher backend errors, path-resolution failures and non-template render
/// errors are all fatal here and tear down the loop.
fn handle_event(
    config: &ProjectConfig,
    hub: &ReloadHub,
    event: notify::Result<Event>,
    provenance: Provenance,
) -> Result<()> {
    let event = event.context("File watcher error")?;
    if !is_relevant(&event) {
        return Ok(());
    }

    let root = provenance.root(config);
    for path in &event.paths {
        let id = paths::resolve_event_path(root, path)?;
        log!("watch"; "{id} changed, rebuilding");

        build_batch(config, std::slice::from_ref(&id), BuildMode::Live)?;
        hub.notify(path);
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventAttributes, ModifyKind};
    use std::{fs, path::PathBuf};

    const GREETING_TEMPLATE: &str = "<mjml><mj-body><mj-section><mj-column>\
        <mj-text>Hello {{ name | default(value=\"there\") }}</mj-text>\
        </mj-column></mj-section></mj-body></mjml>";

    fn test_config(root: &Path) -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.build.root = Some(root.to_path_buf());
        config.build.src = root.join("src");
        config.build.data = root.join("data");
        config.build.output = root.join("output");
        config
    }

    fn write_template(config: &ProjectConfig, id: &TemplateId, content: &str) {
        let path = paths::source_path(config, id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn modify_event(path: PathBuf) -> notify::Result<Event> {
        Ok(Event {
            kind: EventKind::Modify(ModifyKind::Any),
            paths: vec![path],
            attrs: EventAttributes::new(),
        })
    }

    #[test]
    fn test_dispatcher_rebuilds_on_source_signal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);
        let hub = ReloadHub::new();

        let id = TemplateId::new("hello");
        write_template(&config, &id, GREETING_TEMPLATE);

        let (tx, rx) = channel();
        tx.send(WatchSignal::Source(modify_event(paths::source_path(
            &config, &id,
        ))))
        .unwrap();
        tx.send(WatchSignal::Cancelled).unwrap();

        run_dispatcher(&config, &hub, &rx).unwrap();

        let html = fs::read_to_string(paths::output_path(&config, &id)).unwrap();
        assert!(html.contains("Hello there"));
        assert!(html.contains("livereload.js"));
    }

    #[test]
    fn test_dispatcher_rebuilds_on_data_signal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);
        let hub = ReloadHub::new();

        let id = TemplateId::new("hello");
        write_template(&config, &id, GREETING_TEMPLATE);
        let data_path = paths::data_path(&config, &id);
        fs::create_dir_all(data_path.parent().unwrap()).unwrap();
        fs::write(&data_path, r#"{"name": "Bob"}"#).unwrap();

        let (tx, rx) = channel();
        tx.send(WatchSignal::Data(modify_event(data_path))).unwrap();
        tx.send(WatchSignal::Cancelled).unwrap();

        run_dispatcher(&config, &hub, &rx).unwrap();

        let html = fs::read_to_string(paths::output_path(&config, &id)).unwrap();
        assert!(html.contains("Hello Bob"));
    }

    #[test]
    fn test_dispatcher_stops_cleanly_on_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let hub = ReloadHub::new();

        let (tx, rx) = channel();
        tx.send(WatchSignal::Cancelled).unwrap();

        assert!(run_dispatcher(&config, &hub, &rx).is_ok());
    }

    #[test]
    fn test_dispatcher_fails_on_foreign_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);
        let hub = ReloadHub::new();

        let (tx, rx) = channel();
        tx.send(WatchSignal::Source(modify_event(PathBuf::from(
            "/elsewhere/x.mjml",
        ))))
        .unwrap();

        assert!(run_dispatcher(&config, &hub, &rx).is_err());
    }

    #[test]
    fn test_dispatcher_fails_on_watcher_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let hub = ReloadHub::new();

        let (tx, rx) = channel();
        tx.send(WatchSignal::Source(Err(notify::Error::generic("boom"))))
            .unwrap();

        assert!(run_dispatcher(&config, &hub, &rx).is_err());
    }

    #[test]
    fn test_dispatcher_degrades_broken_template() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);
        let hub = ReloadHub::new();

        let id = TemplateId::new("broken");
        write_template(&config, &id, "<mjml>{{ unclosed</mjml>");

        let (tx, rx) = channel();
        tx.send(WatchSignal::Source(modify_event(paths::source_path(
            &config, &id,
        ))))
        .unwrap();
        tx.send(WatchSignal::Cancelled).unwrap();

        // the loop survives the syntax error and writes the banner page
        run_dispatcher(&config, &hub, &rx).unwrap();

        let html = fs::read_to_string(paths::output_path(&config, &id)).unwrap();
        assert!(html.contains("<h1>Error building template</h1>"));
    }

    #[test]
    fn test_dispatcher_ignores_access_events() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);
        let hub = ReloadHub::new();

        let id = TemplateId::new("hello");
        write_template(&config, &id, GREETING_TEMPLATE);

        let (tx, rx) = channel();
        tx.send(WatchSignal::Source(Ok(Event {
            kind: EventKind::Access(notify::event::AccessKind::Any),
            paths: vec![paths::source_path(&config, &id)],
            attrs: EventAttributes::new(),
        })))
        .unwrap();
        tx.send(WatchSignal::Cancelled).unwrap();

        run_dispatcher(&config, &hub, &rx).unwrap();
        // no rebuild happened
        assert!(!paths::output_path(&config, &id).exists());
    }

    #[test]
    fn test_create_events_are_relevant() {
        let event = Event {
            kind: EventKind::Create(CreateKind::File),
            paths: vec![],
            attrs: EventAttributes::new(),
        };
        assert!(is_relevant(&event));
    }

    #[test]
    fn test_repeated_events_rebuild_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let config = test_config(&root);
        let hub = ReloadHub::new();

        let id = TemplateId::new("hello");
        write_template(&config, &id, GREETING_TEMPLATE);

        let (tx, rx) = channel();
        let source = paths::source_path(&config, &id);
        tx.send(WatchSignal::Source(modify_event(source.clone())))
            .unwrap();
        tx.send(WatchSignal::Source(modify_event(source))).unwrap();
        tx.send(WatchSignal::Cancelled).unwrap();

        run_dispatcher(&config, &hub, &rx).unwrap();

        let html = fs::read_to_string(paths::output_path(&config, &id)).unwrap();
        assert!(html.contains("Hello there"));
        assert!(!html.contains("Error building template"));
    }
}
