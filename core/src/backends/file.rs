//! JSON Lines backend: one append-only file per group, or one shared file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;

use super::{effective_limit, ensure_group, sort_by_timestamp, validate_groups, EventBackend, Query};
use crate::errors::{EventItError, Result};
use crate::events::{Event, EventSchema};

pub const DEFAULT_FILENAME: &str = "eventit.log";
const GROUP_EXTENSION: &str = "log";

#[derive(Debug, Clone)]
pub struct FileBackendOptions {
    pub directory: PathBuf,
    pub groups: Vec<String>,
    /// `{group}.log` per group when set, otherwise every group shares
    /// `filename`.
    pub separate_files: bool,
    pub filename: String,
    pub exclude_none: bool,
    /// Sync file data to disk after every append, not just to the OS.
    pub fsync: bool,
}

impl Default for FileBackendOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            groups: vec![crate::config::DEFAULT_GROUP.to_string()],
            separate_files: true,
            filename: DEFAULT_FILENAME.to_string(),
            exclude_none: true,
            fsync: false,
        }
    }
}

#[derive(Debug)]
pub struct FileBackend {
    directory: PathBuf,
    groups: Vec<String>,
    separate_files: bool,
    exclude_none: bool,
    fsync: bool,
    paths: HashMap<String, PathBuf>,
    handles: HashMap<String, Arc<Mutex<File>>>,
}

impl FileBackend {
    /// Create the directory if needed and open an append handle per file.
    pub fn open(options: FileBackendOptions) -> Result<Self> {
        validate_groups(&options.groups)?;
        if options.separate_files {
            for group in &options.groups {
                ensure_file_name(&format!("{group}.{GROUP_EXTENSION}"))?;
            }
        } else {
            ensure_file_name(&options.filename)?;
        }

        fs::create_dir_all(&options.directory).map_err(|err| {
            EventItError::Config(format!(
                "failed to create log directory {}: {err}",
                options.directory.display()
            ))
        })?;
        let directory = options.directory.canonicalize().map_err(|err| {
            EventItError::Config(format!(
                "failed to resolve log directory {}: {err}",
                options.directory.display()
            ))
        })?;

        let mut paths = HashMap::new();
        let mut handles = HashMap::new();
        let shared = if options.separate_files {
            None
        } else {
            let path = directory.join(&options.filename);
            Some((path.clone(), Arc::new(Mutex::new(open_append(&path)?))))
        };
        for group in &options.groups {
            let (path, handle) = match &shared {
                Some((path, handle)) => (path.clone(), Arc::clone(handle)),
                None => {
                    let path = directory.join(format!("{group}.{GROUP_EXTENSION}"));
                    let handle = Arc::new(Mutex::new(open_append(&path)?));
                    (path, handle)
                }
            };
            log::debug!("group {group} logs to {}", path.display());
            paths.insert(group.clone(), path);
            handles.insert(group.clone(), handle);
        }

        Ok(Self {
            directory,
            groups: options.groups,
            separate_files: options.separate_files,
            exclude_none: options.exclude_none,
            fsync: options.fsync,
            paths,
            handles,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn separate_files(&self) -> bool {
        self.separate_files
    }

    pub fn exclude_none(&self) -> bool {
        self.exclude_none
    }

    pub fn path_for(&self, group: &str) -> Option<&Path> {
        self.paths.get(group).map(PathBuf::as_path)
    }

    /// Scan the group's file in write order, keeping parseable records the
    /// predicate accepts, until `limit` of them were found.
    fn scan<F>(
        &self,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
        mut keep: F,
    ) -> Result<Vec<Event>>
    where
        F: FnMut(&Event) -> bool,
    {
        ensure_group(&self.groups, group)?;
        schema.ensure_event_schema()?;
        let path = self
            .paths
            .get(group)
            .ok_or_else(|| EventItError::InvalidArgument(format!("unknown group `{group}`")))?;
        let limit = effective_limit(limit);

        let reader = BufReader::new(File::open(path)?);
        let mut found = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            if limit.is_some_and(|limit| found.len() >= limit) {
                break;
            }
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = match Event::from_json_str(schema, &line) {
                Ok(event) => event,
                Err(err) => {
                    log::warn!(
                        "skipping line {} of {} for schema {}: {err}",
                        idx + 1,
                        path.display(),
                        schema.name()
                    );
                    continue;
                }
            };
            // A shared file holds every group; skip records tagged with another one.
            if !self.separate_files && event.group().is_some_and(|g| g != group) {
                continue;
            }
            if keep(&event) {
                found.push(event);
            }
        }
        sort_by_timestamp(&mut found);
        Ok(found)
    }
}

impl EventBackend for FileBackend {
    fn groups(&self) -> &[String] {
        &self.groups
    }

    fn append(&self, event: &Event, group: &str) -> Result<()> {
        ensure_group(&self.groups, group)?;
        let handle = self
            .handles
            .get(group)
            .ok_or_else(|| EventItError::InvalidArgument(format!("unknown group `{group}`")))?;
        let mut line = event.to_json_line(self.exclude_none)?;
        line.push('\n');

        let mut file = handle.lock();
        // Append mode puts every write at the end; the lock keeps lines whole.
        file.write_all(line.as_bytes())?;
        file.flush()?;
        if self.fsync {
            file.sync_data()?;
        }
        log::trace!("appended event {} to group {group}", event.id());
        Ok(())
    }

    fn search_by_timestamp(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        self.scan(group, schema, limit, |event| {
            event.timestamp() >= start && event.timestamp() <= end
        })
    }

    fn search_by_query(
        &self,
        query: &Query,
        group: &str,
        schema: &Arc<EventSchema>,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        ensure_group(&self.groups, group)?;
        let query = query.validate(schema)?;
        self.scan(group, schema, limit, |event| query.matches(event))
    }

    fn count_by_query(&self, query: &Query, group: &str, schema: &Arc<EventSchema>) -> Result<usize> {
        self.search_by_query(query, group, schema, None)
            .map(|events| events.len())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| EventItError::Config(format!("failed to open {}: {err}", path.display())))
}

/// Reject names that would escape the log directory.
fn ensure_file_name(name: &str) -> Result<()> {
    let valid = !name.trim().is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
        && !name.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(EventItError::Config(format!("`{name}` is not a valid log file name")))
    }
}
