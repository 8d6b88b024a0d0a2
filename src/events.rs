//! Columnar event tables and the seam towards the column-store reader
//!
//! The engine never deals with on-disk event formats directly. It asks an
//! `EventSource` for the events of a chunk, restricted to the branches that
//! the analysis declared, and gets back an in-memory `EventTable`.

use crate::{
    error::{Error, Result},
    numeric::Float,
};

use serde::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

/// Name of the tree that holds events, unless configured otherwise
pub const DEFAULT_TREE: &str = "Events";

/// One column of an event table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    /// One number per event
    Scalar(Vec<Float>),

    /// A variable-length list of numbers per event
    Jagged(Vec<Vec<Float>>),
}
//
impl Column {
    /// Number of events in this column
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(values) => values.len(),
            Column::Jagged(lists) => lists.len(),
        }
    }

    /// Truth that this column holds no event
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filter(&self, mask: &[bool]) -> Self {
        fn keep<T: Clone>(items: &[T], mask: &[bool]) -> Vec<T> {
            items
                .iter()
                .zip(mask)
                .filter_map(|(item, &keep)| keep.then(|| item.clone()))
                .collect()
        }
        match self {
            Column::Scalar(values) => Column::Scalar(keep(values, mask)),
            Column::Jagged(lists) => Column::Jagged(keep(lists, mask)),
        }
    }

    fn slice(&self, start: usize, stop: usize) -> Self {
        match self {
            Column::Scalar(values) => Column::Scalar(values[start..stop].to_vec()),
            Column::Jagged(lists) => Column::Jagged(lists[start..stop].to_vec()),
        }
    }

    /// Append the events of another column
    ///
    /// An empty column has no definite shape, so it takes that of the other.
    fn extend(&mut self, other: &Column, name: &str) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        match (self, other) {
            (Column::Scalar(values), Column::Scalar(more)) => values.extend_from_slice(more),
            (Column::Jagged(lists), Column::Jagged(more)) => lists.extend_from_slice(more),
            _ => {
                return Err(Error::Config(format!(
                    "column {name:?} is scalar in some files and jagged in others"
                )))
            }
        }
        Ok(())
    }
}

/// A set of events, stored column by column
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Column>", into = "BTreeMap<String, Column>")]
pub struct EventTable {
    num_events: usize,
    columns: BTreeMap<String, Column>,
}
//
impl EventTable {
    /// Build an event table from a set of columns of equal length
    pub fn new(columns: impl IntoIterator<Item = (String, Column)>) -> Result<Self> {
        let mut table = Self::default();
        for (idx, (name, column)) in columns.into_iter().enumerate() {
            if idx == 0 {
                table.num_events = column.len();
            }
            table.insert(name, column)?;
        }
        Ok(table)
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.num_events
    }

    /// Truth that there are no events
    pub fn is_empty(&self) -> bool {
        self.num_events == 0
    }

    /// Names of the available columns
    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.keys().map(String::as_str)
    }

    /// Access a column of any shape
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| Error::MissingColumn(name.to_owned()))
    }

    /// Access a column which holds one number per event
    pub fn scalar(&self, name: &str) -> Result<&[Float]> {
        match self.column(name)? {
            Column::Scalar(values) => Ok(values),
            Column::Jagged(lists) if lists.is_empty() => Ok(&[]),
            Column::Jagged(_) => Err(Error::Config(format!("column {name:?} is not scalar"))),
        }
    }

    /// Access a column which holds a list of numbers per event
    pub fn jagged(&self, name: &str) -> Result<&[Vec<Float>]> {
        match self.column(name)? {
            Column::Jagged(lists) => Ok(lists),
            // Empty JSON arrays are read as scalar columns
            Column::Scalar(values) if values.is_empty() => Ok(&[]),
            Column::Scalar(_) => Err(Error::Config(format!("column {name:?} is not jagged"))),
        }
    }

    /// Add or replace a column, which must have one entry per event
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if column.len() != self.num_events {
            return Err(Error::ColumnLength {
                what: format!("column {name:?}"),
                expected: self.num_events,
                found: column.len(),
            });
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Keep only the requested branches, all of which must exist
    pub fn select(&self, branches: &[String]) -> Result<Self> {
        let columns = branches
            .iter()
            .map(|name| Ok((name.clone(), self.column(name)?.clone())))
            .collect::<Result<_>>()?;
        Ok(Self {
            num_events: self.num_events,
            columns,
        })
    }

    /// Keep only the events for which the mask is true
    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.num_events {
            return Err(Error::ColumnLength {
                what: "event mask".to_owned(),
                expected: self.num_events,
                found: mask.len(),
            });
        }
        Ok(Self {
            num_events: mask.iter().filter(|&&keep| keep).count(),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.filter(mask)))
                .collect(),
        })
    }

    /// Keep only the events in the `start..stop` entry range
    pub fn slice(&self, start: usize, stop: usize) -> Self {
        let stop = stop.min(self.num_events);
        let start = start.min(stop);
        Self {
            num_events: stop - start,
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.slice(start, stop)))
                .collect(),
        }
    }

    /// Append the events of another table with the same columns
    pub fn concat(&mut self, other: &EventTable) -> Result<()> {
        if self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if !self.columns.keys().eq(other.columns.keys()) {
            return Err(Error::Config(
                "cannot concatenate event tables with different columns".to_owned(),
            ));
        }
        for (name, column) in &mut self.columns {
            column.extend(&other.columns[name], name)?;
        }
        self.num_events += other.num_events;
        Ok(())
    }
}
//
impl TryFrom<BTreeMap<String, Column>> for EventTable {
    type Error = Error;

    fn try_from(columns: BTreeMap<String, Column>) -> Result<Self> {
        Self::new(columns)
    }
}
//
impl From<EventTable> for BTreeMap<String, Column> {
    fn from(table: EventTable) -> Self {
        table.columns
    }
}

/// Description of the events that one unit of work should process
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkDescriptor {
    /// Read and concatenate all events of several files
    Files {
        /// Files to read
        paths: Vec<PathBuf>,
        /// Tree holding the events
        tree: String,
    },

    /// Read the `start..stop` entry range of a single file
    Range {
        /// File to read
        path: PathBuf,
        /// Tree holding the events
        tree: String,
        /// First entry
        start: usize,
        /// Entry past the last one
        stop: usize,
    },
}
//
impl ChunkDescriptor {
    /// Files which this chunk reads from
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            ChunkDescriptor::Files { paths, .. } => paths.iter().map(PathBuf::as_path).collect(),
            ChunkDescriptor::Range { path, .. } => vec![path.as_path()],
        }
    }
}
//
impl std::fmt::Display for ChunkDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkDescriptor::Files { paths, tree } => {
                write!(f, "{} file(s) [{tree}] starting at {:?}", paths.len(), paths.first())
            }
            ChunkDescriptor::Range {
                path,
                tree,
                start,
                stop,
            } => write!(f, "{path:?} [{tree}] entries {start}..{stop}"),
        }
    }
}

/// Column-store reader, which turns chunk descriptors into event tables
pub trait EventSource: Sync {
    /// Read the events of one file
    fn read_file(&self, path: &Path, tree: &str) -> Result<EventTable>;

    /// Read the events of a chunk, keeping only the requested branches
    fn read(&self, chunk: &ChunkDescriptor, branches: &[String]) -> Result<EventTable> {
        match chunk {
            ChunkDescriptor::Files { paths, tree } => {
                let mut events = EventTable::default();
                for path in paths {
                    events.concat(&self.read_file(path, tree)?.select(branches)?)?;
                }
                Ok(events)
            }
            ChunkDescriptor::Range {
                path,
                tree,
                start,
                stop,
            } => Ok(self.read_file(path, tree)?.select(branches)?.slice(*start, *stop)),
        }
    }
}

/// Event source which serves pre-loaded event tables
#[derive(Default)]
pub struct MemorySource {
    files: HashMap<PathBuf, EventTable>,
}
//
impl MemorySource {
    /// Start with no file
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the events of a (virtual) file
    pub fn add_file(&mut self, path: impl Into<PathBuf>, events: EventTable) {
        self.files.insert(path.into(), events);
    }
}
//
impl EventSource for MemorySource {
    fn read_file(&self, path: &Path, _tree: &str) -> Result<EventTable> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::MissingFile(path.to_owned()))
    }
}

/// Event source reading JSON files, each holding an object which maps column
/// names to arrays (scalar columns) or arrays of arrays (jagged columns)
///
/// A file may alternatively map tree names to such objects, in which case the
/// requested tree is picked.
pub struct JsonSource;
//
impl EventSource for JsonSource {
    fn read_file(&self, path: &Path, tree: &str) -> Result<EventTable> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum JsonFile {
            Table(EventTable),
            Trees(BTreeMap<String, EventTable>),
        }

        if !path.exists() {
            return Err(Error::MissingFile(path.to_owned()));
        }
        match serde_json::from_str::<JsonFile>(&fs::read_to_string(path)?)? {
            JsonFile::Table(table) => Ok(table),
            JsonFile::Trees(mut trees) => trees
                .remove(tree)
                .ok_or_else(|| Error::MissingColumn(format!("{}:{tree}", path.display()))),
        }
    }
}
