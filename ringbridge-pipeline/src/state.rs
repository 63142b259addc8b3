use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ringbridge_protocol::SequenceNumber;
use tracing::{debug, info, warn};

/// Network/station pair keying a resume cursor.
pub type StationKey = (String, String);

/// Resume-sequence cursors, optionally persisted to a state file.
///
/// The on-disk form is one `NETWORK STATION SEQUENCE` line per stream.
/// Persistence failures degrade resume behavior but never stop the
/// pipeline, so every file operation here is log-and-continue.
pub struct StateStore {
    path: Option<PathBuf>,
    delete_on_stop: bool,
    cursors: HashMap<StationKey, SequenceNumber>,
}

impl StateStore {
    /// Open the store: optionally purge the file, then recover any cursors
    /// it holds.
    pub fn open(path: Option<&Path>, delete_on_start: bool, delete_on_stop: bool) -> Self {
        let mut cursors = HashMap::new();
        if let Some(path) = path {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && let Err(error) = std::fs::create_dir_all(parent)
            {
                warn!(%error, path = %parent.display(), "could not create state file directory");
            }
            if delete_on_start && path.exists() {
                info!(path = %path.display(), "purging state file");
                if let Err(error) = std::fs::remove_file(path) {
                    warn!(%error, path = %path.display(), "failed to remove state file");
                }
            } else if path.exists() {
                cursors = Self::load(path);
            }
        }
        Self {
            path: path.map(Path::to_path_buf),
            delete_on_stop,
            cursors,
        }
    }

    pub fn enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn cursor(&self, network: &str, station: &str) -> Option<SequenceNumber> {
        self.cursors
            .get(&(network.to_owned(), station.to_owned()))
            .copied()
    }

    pub fn track(&mut self, key: StationKey, sequence: SequenceNumber) {
        self.cursors.insert(key, sequence);
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    fn load(path: &Path) -> HashMap<StationKey, SequenceNumber> {
        let mut cursors = HashMap::new();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) => {
                warn!(%error, path = %path.display(), "failed to read state file");
                return cursors;
            }
        };
        for line in contents.lines() {
            let mut parts = line.split_whitespace();
            let (Some(network), Some(station), Some(sequence)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            match SequenceNumber::from_v4_decimal(sequence) {
                Ok(sequence) => {
                    cursors.insert((network.to_owned(), station.to_owned()), sequence);
                }
                Err(error) => warn!(%error, line, "skipping malformed state file line"),
            }
        }
        info!(path = %path.display(), streams = cursors.len(), "recovered state file");
        cursors
    }

    /// Write the cursors out; failures are warnings only.
    pub fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let mut contents = String::new();
        for ((network, station), sequence) in &self.cursors {
            contents.push_str(&format!(
                "{network} {station} {}\n",
                sequence.to_v4_decimal()
            ));
        }
        match std::fs::write(path, contents) {
            Ok(()) => debug!(path = %path.display(), streams = self.cursors.len(), "state file saved"),
            Err(error) => warn!(%error, path = %path.display(), "failed to write state file"),
        }
    }

    /// Final shutdown step: persist, then optionally delete the file.
    pub fn close(&self) {
        let Some(path) = &self.path else {
            return;
        };
        self.persist();
        if self.delete_on_stop && path.exists() {
            info!(path = %path.display(), "purging state file on stop");
            if let Err(error) = std::fs::remove_file(path) {
                warn!(%error, path = %path.display(), "failed to purge state file");
            }
        }
    }
}
