//! Change sources: where fills come from.
//!
//! A [`ChangeSource`] blocks until changes are available and then writes them
//! into the session's [`RawChangeBuffer`] as change records. The session never
//! looks behind this seam; it only parses what was filled.
//!
//! # Architecture
//!
//! [`NotifySource`] subscribes to a directory with the [`notify`] crate. The
//! notify callback is kept lightweight: it translates each raw event into
//! `(action, relative name)` notices and sends them through a bounded channel.
//! [`NotifySource::next_fill`] waits for the first notice, then packs every
//! notice that is already queued into the buffer.
//!
//! Events are lost, and the next fill is marked [`FillStatus::Overflowed`],
//! when the channel is full, when the backend asks for a rescan, or when a
//! single record is larger than the whole buffer. A record that merely does
//! not fit behind the others is carried over to the next fill.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify::{
    event::{MetadataKind, ModifyKind, RenameMode},
    Config, Event, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::RawChangeBuffer;
use crate::types::EventKind;

/// Capacity of the channel between the notify callback and the session.
const NOTICE_CHANNEL_CAPACITY: usize = 1000;

/// Errors that can occur while subscribing to or reading changes.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The watch directory does not exist.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// The watch path exists but is not a directory.
    #[error("watch path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The watch directory could not be resolved to an absolute path.
    #[error("failed to resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The platform refused the change subscription.
    #[error("failed to subscribe to changes in {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The subscription stopped delivering changes.
    #[error("change subscription closed")]
    Disconnected,
}

/// Whether a fill holds every change since the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// All changes are in the buffer.
    Complete,
    /// Some changes were lost; the buffer holds only what survived.
    Overflowed,
}

/// Delivers fills of change records.
#[allow(async_fn_in_trait)]
pub trait ChangeSource {
    /// Waits for changes and writes them into `buffer`, replacing its
    /// previous contents.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the subscription can no longer deliver
    /// changes. Such errors are fatal to the session.
    async fn next_fill(&mut self, buffer: &mut RawChangeBuffer) -> Result<FillStatus, SourceError>;
}

/// One translated change, named relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Change {
    action: u32,
    name: String,
}

/// Messages from the notify callback.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Notice {
    Change(Change),
    Overflow,
}

/// Directory subscription backed by the platform's native watcher.
///
/// Dropping the source drops the watcher, which releases the subscription.
#[derive(Debug)]
pub struct NotifySource {
    /// Kept alive to maintain the subscription.
    #[allow(dead_code)]
    watcher: RecommendedWatcher,

    root: PathBuf,
    recursive: bool,
    notices: mpsc::Receiver<Notice>,

    /// A change that did not fit behind the previous fill's records.
    carry: Option<Change>,

    /// Set by the callback when a notice could not be queued.
    overflowed: Arc<AtomicBool>,
}

impl NotifySource {
    /// Subscribes to name, size and last-write changes under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `root` does not exist or is not a directory
    /// - `root` cannot be canonicalized
    /// - the platform watcher cannot be created or refuses the path
    pub fn open(root: &Path, recursive: bool) -> Result<Self, SourceError> {
        if !root.exists() {
            return Err(SourceError::DirectoryNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(SourceError::NotADirectory(root.to_path_buf()));
        }

        let root = root.canonicalize().map_err(|source| SourceError::Resolve {
            path: root.to_path_buf(),
            source,
        })?;

        let (tx, notices) = mpsc::channel::<Notice>(NOTICE_CHANNEL_CAPACITY);
        let overflowed = Arc::new(AtomicBool::new(false));
        let watcher = create_watcher(&root, recursive, tx, Arc::clone(&overflowed))?;

        info!(
            root = %root.display(),
            recursive,
            "Subscribed to directory changes"
        );

        Ok(Self {
            watcher,
            root,
            recursive,
            notices,
            carry: None,
            overflowed,
        })
    }

    #[must_use]
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }
}

impl ChangeSource for NotifySource {
    async fn next_fill(&mut self, buffer: &mut RawChangeBuffer) -> Result<FillStatus, SourceError> {
        buffer.clear();

        let first = match self.carry.take() {
            Some(change) => Notice::Change(change),
            None => self
                .notices
                .recv()
                .await
                .ok_or(SourceError::Disconnected)?,
        };

        let mut overflowed = false;
        let mut next = Some(first);
        while let Some(notice) = next.take() {
            match notice {
                Notice::Overflow => overflowed = true,
                Notice::Change(change) => match buffer.push_record(change.action, &change.name) {
                    Ok(()) => {}
                    Err(err) if buffer.is_empty() => {
                        warn!(name = %change.name, error = %err, "Change record larger than the fill buffer, dropped");
                        overflowed = true;
                    }
                    Err(_) => {
                        trace!(name = %change.name, "Fill buffer full, carrying change over");
                        self.carry = Some(change);
                        break;
                    }
                },
            }
            next = self.notices.try_recv().ok();
        }

        if self.overflowed.swap(false, Ordering::AcqRel) {
            overflowed = true;
        }

        debug!(bytes = buffer.filled_len(), overflowed, "Fill ready");

        Ok(if overflowed {
            FillStatus::Overflowed
        } else {
            FillStatus::Complete
        })
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        debug!(root = %self.root.display(), "Released change subscription");
    }
}

/// Creates the notify watcher with a lightweight callback.
fn create_watcher(
    root: &Path,
    recursive: bool,
    tx: mpsc::Sender<Notice>,
    overflowed: Arc<AtomicBool>,
) -> Result<RecommendedWatcher, SourceError> {
    let callback_root = root.to_path_buf();
    let subscribe_error = |source: notify::Error| SourceError::Subscribe {
        path: root.to_path_buf(),
        source,
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            handle_notify_event(res, &callback_root, &tx, &overflowed);
        },
        Config::default(),
    )
    .map_err(subscribe_error)?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(root, mode).map_err(subscribe_error)?;

    Ok(watcher)
}

/// Handles events from the notify crate.
///
/// Only translates and queues; never blocks the notify thread.
fn handle_notify_event(
    res: notify::Result<Event>,
    root: &Path,
    tx: &mpsc::Sender<Notice>,
    overflowed: &AtomicBool,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    for notice in translate(&event, root) {
        match tx.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                overflowed.store(true, Ordering::Release);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

/// Translates a notify event into change notices for paths under `root`.
fn translate(event: &Event, root: &Path) -> Vec<Notice> {
    if event.need_rescan() {
        return vec![Notice::Overflow];
    }

    event
        .paths
        .iter()
        .filter_map(|path| {
            let action = action_for(&event.kind, path)?;
            let name = relative_name(path, root)?;
            Some(Notice::Change(Change { action, name }))
        })
        .collect()
}

/// Maps a notify event kind to a change action code.
///
/// Returns `None` for kinds outside the name, size and last-write filter.
fn action_for(kind: &NotifyKind, path: &Path) -> Option<u32> {
    match kind {
        NotifyKind::Create(_) => Some(EventKind::ADDED),
        NotifyKind::Remove(_) => Some(EventKind::REMOVED),
        NotifyKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => Some(EventKind::RENAMED_OLD),
            RenameMode::To => Some(EventKind::RENAMED_NEW),
            // backends that pair renames also report both halves
            RenameMode::Both => None,
            RenameMode::Any | RenameMode::Other => Some(if path.exists() {
                EventKind::RENAMED_NEW
            } else {
                EventKind::RENAMED_OLD
            }),
        },
        NotifyKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime | MetadataKind::Any)) => {
            Some(EventKind::MODIFIED)
        }
        NotifyKind::Modify(ModifyKind::Metadata(_)) => None,
        NotifyKind::Modify(_) => Some(EventKind::MODIFIED),
        NotifyKind::Access(_) | NotifyKind::Any | NotifyKind::Other => None,
    }
}

/// Names `path` relative to `root`; `None` for the root itself.
fn relative_name(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let name = relative.to_string_lossy();
    (!name.is_empty()).then(|| name.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, Flag, RemoveKind};

    fn root() -> PathBuf {
        PathBuf::from("/watched")
    }

    fn change(action: u32, name: &str) -> Notice {
        Notice::Change(Change {
            action,
            name: name.to_string(),
        })
    }

    #[test]
    fn create_and_remove_map_to_added_and_removed() {
        let created = Event::new(NotifyKind::Create(CreateKind::File)).add_path(root().join("a.txt"));
        let removed = Event::new(NotifyKind::Remove(RemoveKind::Any)).add_path(root().join("b.txt"));

        assert_eq!(translate(&created, &root()), vec![change(1, "a.txt")]);
        assert_eq!(translate(&removed, &root()), vec![change(2, "b.txt")]);
    }

    #[test]
    fn data_and_write_time_changes_are_modifications() {
        let data = Event::new(NotifyKind::Modify(ModifyKind::Data(DataChange::Size)))
            .add_path(root().join("sub/c.txt"));
        let write_time = Event::new(NotifyKind::Modify(ModifyKind::Metadata(
            MetadataKind::WriteTime,
        )))
        .add_path(root().join("d.txt"));

        let sub_name = Path::new("sub").join("c.txt").to_string_lossy().into_owned();
        assert_eq!(translate(&data, &root()), vec![change(3, &sub_name)]);
        assert_eq!(translate(&write_time, &root()), vec![change(3, "d.txt")]);
    }

    #[test]
    fn rename_halves_map_to_old_and_new() {
        let from = Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(root().join("old.txt"));
        let to = Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(root().join("new.txt"));
        let both = Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root().join("old.txt"))
            .add_path(root().join("new.txt"));

        assert_eq!(translate(&from, &root()), vec![change(4, "old.txt")]);
        assert_eq!(translate(&to, &root()), vec![change(5, "new.txt")]);
        assert!(translate(&both, &root()).is_empty());
    }

    #[test]
    fn access_and_permission_changes_are_ignored() {
        let access = Event::new(NotifyKind::Access(AccessKind::Any)).add_path(root().join("a"));
        let perms = Event::new(NotifyKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions,
        )))
        .add_path(root().join("a"));

        assert!(translate(&access, &root()).is_empty());
        assert!(translate(&perms, &root()).is_empty());
    }

    #[test]
    fn rescan_flag_is_an_overflow() {
        let event = Event::new(NotifyKind::Other).set_flag(Flag::Rescan);
        assert_eq!(translate(&event, &root()), vec![Notice::Overflow]);
    }

    #[test]
    fn root_itself_is_not_reported() {
        let event = Event::new(NotifyKind::Modify(ModifyKind::Any)).add_path(root());
        assert!(translate(&event, &root()).is_empty());
    }

    #[test]
    fn source_error_display() {
        let err = SourceError::DirectoryNotFound(PathBuf::from("/test/path"));
        assert_eq!(err.to_string(), "watch directory does not exist: /test/path");

        assert_eq!(
            SourceError::Disconnected.to_string(),
            "change subscription closed"
        );
    }

    #[tokio::test]
    async fn open_missing_directory_fails() {
        let result = NotifySource::open(Path::new("/nonexistent/path"), false);
        assert!(matches!(result, Err(SourceError::DirectoryNotFound(_))));
    }

    #[tokio::test]
    async fn open_file_is_not_a_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = NotifySource::open(file.path(), false);
        assert!(matches!(result, Err(SourceError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn queued_notices_are_packed_and_carried_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = NotifySource::open(dir.path(), false).unwrap();
        // Replace the live channel with one we control.
        let (tx, rx) = mpsc::channel(16);
        source.notices = rx;

        tx.send(change(1, "aaaa")).await.unwrap(); // 20 bytes
        tx.send(change(3, "bbbb")).await.unwrap(); // 20 bytes, needs 40 in total
        tx.send(Notice::Overflow).await.unwrap();

        let mut buffer = RawChangeBuffer::new(32);
        let status = source.next_fill(&mut buffer).await.unwrap();
        assert_eq!(status, FillStatus::Complete);
        assert_eq!(buffer.filled_len(), 20);

        let status = source.next_fill(&mut buffer).await.unwrap();
        assert_eq!(status, FillStatus::Overflowed);
        let events = crate::parser::parse_fill(&buffer).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "bbbb");
    }

    #[tokio::test]
    async fn oversized_record_is_dropped_as_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = NotifySource::open(dir.path(), false).unwrap();
        let (tx, rx) = mpsc::channel(16);
        source.notices = rx;

        tx.send(change(1, &"x".repeat(64))).await.unwrap();

        let mut buffer = RawChangeBuffer::new(32);
        let status = source.next_fill(&mut buffer).await.unwrap();
        assert_eq!(status, FillStatus::Overflowed);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn closed_channel_is_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = NotifySource::open(dir.path(), false).unwrap();
        let (tx, rx) = mpsc::channel(1);
        source.notices = rx;
        drop(tx);

        let mut buffer = RawChangeBuffer::new(32);
        let result = source.next_fill(&mut buffer).await;
        assert!(matches!(result, Err(SourceError::Disconnected)));
    }
}
