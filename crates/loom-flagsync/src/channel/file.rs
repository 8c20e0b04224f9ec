// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Offline flag source backed by a local JSON file.
//!
//! The file's directory is watched with `notify`, so editors that replace the
//! file through a rename are seen as events on the same name. Events are
//! debounced, then the file is re-read and delivered only when its contents
//! changed. The file is also re-read every poll interval in case the platform
//! watcher misses an event.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loom_flagsync_core::{SyncMetadata, SyncPayload};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SyncChannel, SyncMessage, SyncSession};
use crate::error::SyncError;

const DEBOUNCE: Duration = Duration::from_millis(50);

type Changes = mpsc::Receiver<notify::Result<()>>;

#[derive(Debug, Clone)]
pub struct FileSyncChannel {
	path: PathBuf,
	poll_interval: Duration,
}

impl FileSyncChannel {
	pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
		Self {
			path: path.into(),
			poll_interval,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

struct FileContents {
	raw: String,
	version: Option<String>,
}

impl FileContents {
	async fn read(path: &Path) -> Result<Self, SyncError> {
		let raw = tokio::fs::read_to_string(path).await?;
		let version = tokio::fs::metadata(path)
			.await?
			.modified()
			.ok()
			.map(|modified| DateTime::<Utc>::from(modified).to_rfc3339());
		debug!(path = %path.display(), bytes = raw.len(), "Loaded flag file");
		Ok(Self { raw, version })
	}

	fn to_message(&self, path: &Path) -> SyncMessage {
		let metadata = SyncMetadata::new()
			.with("source", "file")
			.with("path", path.display().to_string());
		let mut payload = SyncPayload::full(self.raw.clone()).with_metadata(metadata);
		if let Some(version) = &self.version {
			payload = payload.with_version(version.clone());
		}
		SyncMessage::Configuration(payload)
	}
}

fn touches(event: &notify::Event, file_name: &OsStr) -> bool {
	matches!(
		event.kind,
		EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
	) && event
		.paths
		.iter()
		.any(|p| p.file_name() == Some(file_name))
}

/// Watches the directory holding `path`. The receiver gets one wake-up per
/// burst of events on the file, or the watcher's error.
fn watch(path: &Path) -> Result<(RecommendedWatcher, Changes), SyncError> {
	let file_name: OsString = path
		.file_name()
		.map(OsStr::to_os_string)
		.ok_or_else(|| {
			std::io::Error::new(
				std::io::ErrorKind::InvalidInput,
				format!("{} does not name a file", path.display()),
			)
		})?;
	let dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
		_ => PathBuf::from("."),
	};

	let (tx, rx) = mpsc::channel(1);
	let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
		let signal = match res {
			Ok(event) if touches(&event, &file_name) => Ok(()),
			Ok(_) => return,
			Err(e) => Err(e),
		};
		// A full channel already holds a pending wake-up.
		let _ = tx.try_send(signal);
	})?;
	watcher.watch(&dir, RecursiveMode::NonRecursive)?;
	Ok((watcher, rx))
}

#[async_trait]
impl SyncChannel for FileSyncChannel {
	fn kind(&self) -> &'static str {
		"file"
	}

	async fn open(&self, cancel: &CancellationToken) -> Result<SyncSession, SyncError> {
		if cancel.is_cancelled() {
			return Err(SyncError::Cancelled);
		}
		// Watch before the first read so no edit falls between the two.
		let (watcher, mut changes) = watch(&self.path)?;
		let first = FileContents::read(&self.path).await?;
		info!(path = %self.path.display(), "Watching flag file");

		let path = self.path.clone();
		let interval = self.poll_interval.max(DEBOUNCE);
		let session = async_stream::stream! {
			let _watcher = watcher;
			let mut current = first.raw.clone();
			yield Ok(first.to_message(&path));

			loop {
				let woke = tokio::select! {
					signal = changes.recv() => signal,
					_ = tokio::time::sleep(interval) => Some(Ok(())),
				};
				match woke {
					Some(Ok(())) => {}
					Some(Err(e)) => {
						warn!(path = %path.display(), error = %e, "Flag file watcher failed");
						yield Err(SyncError::Watch(e));
						break;
					}
					None => {
						yield Err(SyncError::Closed);
						break;
					}
				}

				tokio::time::sleep(DEBOUNCE).await;
				while changes.try_recv().is_ok() {}

				match FileContents::read(&path).await {
					Ok(contents) if contents.raw == current => {}
					Ok(contents) => {
						info!(path = %path.display(), "Flag file changed");
						current = contents.raw.clone();
						yield Ok(contents.to_message(&path));
					}
					Err(e) => {
						warn!(path = %path.display(), error = %e, "Flag file unavailable");
						yield Err(e);
						break;
					}
				}
			}
		};

		Ok(Box::pin(session))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::StreamExt;
	use loom_flagsync_core::PayloadContent;
	use std::io::Write;

	const WAIT: Duration = Duration::from_secs(5);

	fn toggle(default_variant: &str) -> String {
		serde_json::json!({
			"flags": {
				"t": {
					"state": "ENABLED",
					"variants": {"on": true, "no": false},
					"defaultVariant": default_variant
				}
			}
		})
		.to_string()
	}

	#[tokio::test]
	async fn test_open_delivers_file_contents() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "{{\"flags\":{{}}}}").unwrap();

		let channel = FileSyncChannel::new(file.path(), Duration::from_secs(5));
		let mut session = channel.open(&CancellationToken::new()).await.unwrap();

		let Some(Ok(SyncMessage::Configuration(payload))) = session.next().await else {
			panic!("expected configuration");
		};
		assert_eq!(payload.content, PayloadContent::Full("{\"flags\":{}}".to_string()));
		assert_eq!(payload.metadata.get("source"), Some("file"));
		assert!(payload.version.is_some());
	}

	#[tokio::test]
	async fn test_missing_file_fails_open() {
		let dir = tempfile::tempdir().unwrap();
		let channel = FileSyncChannel::new(dir.path().join("absent.json"), Duration::from_secs(5));
		assert!(matches!(
			channel.open(&CancellationToken::new()).await,
			Err(SyncError::Io(_))
		));
	}

	#[tokio::test]
	async fn test_change_is_redelivered() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flags.json");
		std::fs::write(&path, "{\"flags\":{}}").unwrap();

		let channel = FileSyncChannel::new(&path, Duration::from_secs(60));
		let mut session = channel.open(&CancellationToken::new()).await.unwrap();
		assert!(session.next().await.is_some());

		std::fs::write(&path, "{\"flags\":{},\"metadata\":{\"rev\":\"2\"}}").unwrap();

		let next = tokio::time::timeout(WAIT, session.next()).await.unwrap();
		let Some(Ok(SyncMessage::Configuration(payload))) = next else {
			panic!("expected configuration");
		};
		assert!(payload.content.raw().contains("rev"));
	}

	#[tokio::test]
	async fn test_same_size_rewrite_is_redelivered() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flags.json");
		std::fs::write(&path, toggle("on")).unwrap();

		let channel = FileSyncChannel::new(&path, Duration::from_secs(60));
		let mut session = channel.open(&CancellationToken::new()).await.unwrap();
		assert!(session.next().await.is_some());

		// Same length, and usually the same mtime second.
		std::fs::write(&path, toggle("no")).unwrap();

		let next = tokio::time::timeout(WAIT, session.next()).await.unwrap();
		let Some(Ok(SyncMessage::Configuration(payload))) = next else {
			panic!("expected configuration");
		};
		assert_eq!(payload.content.raw(), toggle("no"));
	}

	#[tokio::test]
	async fn test_identical_rewrite_is_not_redelivered() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flags.json");
		std::fs::write(&path, toggle("on")).unwrap();

		let channel = FileSyncChannel::new(&path, Duration::from_secs(60));
		let mut session = channel.open(&CancellationToken::new()).await.unwrap();
		assert!(session.next().await.is_some());

		std::fs::write(&path, toggle("on")).unwrap();
		assert!(
			tokio::time::timeout(Duration::from_millis(300), session.next())
				.await
				.is_err()
		);
	}

	#[tokio::test]
	async fn test_deleted_file_ends_session_with_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("flags.json");
		std::fs::write(&path, "{\"flags\":{}}").unwrap();

		let channel = FileSyncChannel::new(&path, Duration::from_secs(60));
		let mut session = channel.open(&CancellationToken::new()).await.unwrap();
		assert!(session.next().await.is_some());

		std::fs::remove_file(&path).unwrap();
		let next = tokio::time::timeout(WAIT, session.next()).await.unwrap();
		assert!(matches!(next, Some(Err(SyncError::Io(_)))));
	}
}
