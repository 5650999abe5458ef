//! Media mirroring for block-bearing records.
//!
//! Remote media URLs are signed and expire, so images and uploaded videos
//! are copied into local storage the first time a record references them.
//! An [`Attachment`](crate::store::Attachment) row remembers the mapping
//! from the URL without its query string to the stored file.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Url;
use rusqlite::Connection;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::contract::{MediaFetcher, MediaHandler};
use crate::error::{Result, SyncError};
use crate::store::{self, OwnerRef};

/// Local media directory. Paths handed out are relative to `root`.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Write `bytes` under `name`, replacing any previous file atomically.
    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path(name);
        let parent = target.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.persist(&target).map_err(|e| SyncError::Io(e.error))?;
        debug!(path = %target.display(), size = bytes.len(), "Stored media file");
        Ok(())
    }
}

/// Query and fragment stripped: the dedup key for an attachment.
pub fn base_url(url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url)
        .map_err(|e| SyncError::MalformedDocument(format!("bad media url '{url}': {e}")))?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed)
}

fn file_name(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::MalformedDocument(format!("media url '{url}' has no file name")))
}

/// Media settings for one collection: where files go and how they are fetched.
pub struct MediaMirror<'a> {
    pub storage: &'a MediaStorage,
    pub fetcher: &'a dyn MediaFetcher,
    /// Directory under the storage root, e.g. `newsletter`.
    pub prefix: &'a str,
}

impl<'a> MediaMirror<'a> {
    pub fn new(storage: &'a MediaStorage, fetcher: &'a dyn MediaFetcher, prefix: &'a str) -> Self {
        Self {
            storage,
            fetcher,
            prefix,
        }
    }

    /// Handler bound to one record inside its open transaction.
    pub fn for_record<'c>(&'c self, conn: &'c Connection, owner: OwnerRef) -> RecordMedia<'c> {
        RecordMedia {
            mirror: self,
            conn,
            owner,
        }
    }
}

/// [`MediaHandler`] for a single owner.
pub struct RecordMedia<'c> {
    mirror: &'c MediaMirror<'c>,
    conn: &'c Connection,
    owner: OwnerRef,
}

#[async_trait(?Send)]
impl MediaHandler for RecordMedia<'_> {
    async fn handle_media(&self, url: &str) -> Result<String> {
        let base = base_url(url)?;
        let storage = self.mirror.storage;

        let media = match store::find_attachment(self.conn, self.owner, base.as_str())? {
            Some(existing) if storage.exists(&existing.media) => {
                debug!(media = %existing.media, "Attachment already mirrored");
                return Ok(existing.media);
            }
            Some(existing) => {
                warn!(
                    media = %existing.media,
                    "Attachment file missing from storage, fetching again"
                );
                store::delete_attachment(self.conn, existing.id)?;
                existing.media
            }
            None => self.available_name(&file_name(&base)?)?,
        };

        info!(url = %base, media = %media, "Downloading media");
        let bytes = self.mirror.fetcher.fetch(url).await?;
        storage.save(&media, &bytes)?;
        store::create_attachment(self.conn, self.owner, base.as_str(), &media)?;
        Ok(media)
    }
}

impl RecordMedia<'_> {
    /// `{prefix}/{owner_id}/{file_name}`, suffixed `_1`, `_2`, … before the
    /// extension while another file or attachment holds that name.
    fn available_name(&self, file_name: &str) -> Result<String> {
        let dir = format!("{}/{}", self.mirror.prefix, self.owner.owner_id);
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
            _ => (file_name, String::new()),
        };
        let mut candidate = format!("{dir}/{file_name}");
        let mut n = 1;
        while self.mirror.storage.exists(&candidate) || store::media_in_use(self.conn, &candidate)? {
            candidate = format!("{dir}/{stem}_{n}{ext}");
            n += 1;
        }
        Ok(candidate)
    }
}
