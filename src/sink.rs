//! This module contains the [`TraceSink`] interface through which traces are
//! persisted, along with the sinks provided by the library.

use std::{
    cell::RefCell,
    fmt::{Debug, Display, Formatter},
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    rc::Rc,
};

use tracing::debug;

use crate::{
    constant::{TRACE_RECORD_BASE_NAME, TRACE_RECORD_SUFFIX},
    error::persist::{Error, Result},
    trace::record::TraceRecord,
    tracker::PathId,
};

/// Identifies which trace a persisted record belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum RecordTag {
    /// The final record of the path that was live when tracing finished.
    Final,

    /// A record of the path with the provided identifier.
    Path(PathId),
}

impl RecordTag {
    /// Gets the name of the file that a record with this tag is stored in.
    #[must_use]
    pub fn file_name(&self) -> String {
        match self {
            Self::Final => format!("{TRACE_RECORD_BASE_NAME}{TRACE_RECORD_SUFFIX}"),
            Self::Path(id) => format!("{TRACE_RECORD_BASE_NAME}_{id}{TRACE_RECORD_SUFFIX}"),
        }
    }
}

impl Display for RecordTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Final => write!(f, "final"),
            Self::Path(id) => write!(f, "path {id}"),
        }
    }
}

/// The interface to an object that can persist trace records.
///
/// Persistence is best-effort. A failing sink never stops tracing, and its
/// errors are only collected for later inspection.
pub trait TraceSink
where
    Self: Debug,
{
    /// Persists `record` under `tag`, replacing any record previously
    /// persisted under the same tag.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the record could not be serialized or written.
    fn persist(&mut self, tag: RecordTag, record: &TraceRecord) -> Result<()>;
}

/// A sink that writes each record as pretty-printed JSON into a file in a
/// directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    /// Constructs a sink writing into `directory`, which is created on the
    /// first write if it does not exist.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self { directory }
    }

    /// Gets the directory that records are written into.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Gets the path of the file that a record tagged with `tag` is written
    /// to.
    #[must_use]
    pub fn path_for(&self, tag: RecordTag) -> PathBuf {
        self.directory.join(tag.file_name())
    }
}

impl TraceSink for DirectorySink {
    fn persist(&mut self, tag: RecordTag, record: &TraceRecord) -> Result<()> {
        let json = record.to_json_pretty()?;
        fs::create_dir_all(&self.directory).map_err(|e| Error::io(&self.directory, e))?;

        let path = self.path_for(tag);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        file.write_all(json.as_bytes()).map_err(|e| Error::io(&path, e))?;

        debug!("Persisted {tag} trace to {}", path.display());
        Ok(())
    }
}

/// A sink that keeps every record in memory.
///
/// Clones of a memory sink share the same buffer, so a clone kept aside can be
/// used to observe what was persisted through another.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Rc<RefCell<Vec<(RecordTag, TraceRecord)>>>,
}

impl MemorySink {
    /// Constructs a new, empty memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a copy of every record persisted so far, in the order they were
    /// persisted.
    #[must_use]
    pub fn records(&self) -> Vec<(RecordTag, TraceRecord)> {
        self.records.borrow().clone()
    }

    /// Gets the most recent record persisted under `tag`.
    #[must_use]
    pub fn latest(&self, tag: RecordTag) -> Option<TraceRecord> {
        self.records
            .borrow()
            .iter()
            .rev()
            .find(|(t, _)| *t == tag)
            .map(|(_, record)| record.clone())
    }

    /// Gets the number of records persisted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    /// Checks if nothing has been persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceSink for MemorySink {
    fn persist(&mut self, tag: RecordTag, record: &TraceRecord) -> Result<()> {
        self.records.borrow_mut().push((tag, record.clone()));
        Ok(())
    }
}

/// A sink that discards everything.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn persist(&mut self, _tag: RecordTag, _record: &TraceRecord) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        sink::{MemorySink, NullSink, RecordTag, TraceSink},
        trace::record::TraceRecord,
    };

    #[test]
    fn file_names_follow_the_tag() {
        assert_eq!(RecordTag::Final.file_name(), "traceInfo.json");
        assert_eq!(RecordTag::Path(7).file_name(), "traceInfo_7.json");
    }

    #[test]
    fn memory_sink_clones_share_records() -> anyhow::Result<()> {
        let observer = MemorySink::new();
        let mut sink = observer.clone();
        let record = TraceRecord {
            entries: vec![0x10],
            ..TraceRecord::default()
        };

        sink.persist(RecordTag::Path(1), &record)?;
        sink.persist(RecordTag::Final, &TraceRecord::default())?;

        assert_eq!(observer.len(), 2);
        assert_eq!(observer.latest(RecordTag::Path(1)), Some(record));
        assert_eq!(observer.records()[1].0, RecordTag::Final);

        Ok(())
    }

    #[test]
    fn null_sink_accepts_everything() -> anyhow::Result<()> {
        NullSink.persist(RecordTag::Final, &TraceRecord::default())?;
        Ok(())
    }
}
