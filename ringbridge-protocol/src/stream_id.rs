use crate::error::{ProtocolError, Result};

/// Canonical network/station/channel/location tuple addressing one seismic
/// stream.
///
/// Fields are stored stripped of whitespace and upper-cased. The location
/// code is the odd one out: it may be empty, but "empty" and "never set" are
/// distinct states. The canonical string `NET.STA.CHA[.LOC]` is cached and
/// rebuilt by the setters; equality and ordering are defined on it.
#[derive(Clone, Debug, Default)]
pub struct StreamIdentifier {
    network: String,
    station: String,
    channel: String,
    location: String,
    has_location: bool,
    canonical: String,
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<String>().to_uppercase()
}

impl StreamIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fully-populated identifier in one call.
    pub fn from_parts(network: &str, station: &str, channel: &str, location: &str) -> Result<Self> {
        let mut id = Self::new();
        id.set_network(network)?;
        id.set_station(station)?;
        id.set_channel(channel)?;
        id.set_location_code(location)?;
        Ok(id)
    }

    // -- Network --

    pub fn set_network(&mut self, network: &str) -> Result<()> {
        let s = normalize(network);
        if s.is_empty() {
            return Err(ProtocolError::InvalidArgument("network is empty".into()));
        }
        self.network = s;
        self.rebuild();
        Ok(())
    }

    pub fn network(&self) -> Result<&str> {
        if !self.has_network() {
            return Err(ProtocolError::NotSet("network"));
        }
        Ok(&self.network)
    }

    pub fn has_network(&self) -> bool {
        !self.network.is_empty()
    }

    // -- Station --

    pub fn set_station(&mut self, station: &str) -> Result<()> {
        let s = normalize(station);
        if s.is_empty() {
            return Err(ProtocolError::InvalidArgument("station is empty".into()));
        }
        self.station = s;
        self.rebuild();
        Ok(())
    }

    pub fn station(&self) -> Result<&str> {
        if !self.has_station() {
            return Err(ProtocolError::NotSet("station"));
        }
        Ok(&self.station)
    }

    pub fn has_station(&self) -> bool {
        !self.station.is_empty()
    }

    // -- Channel --

    pub fn set_channel(&mut self, channel: &str) -> Result<()> {
        let s = normalize(channel);
        if s.is_empty() {
            return Err(ProtocolError::InvalidArgument("channel is empty".into()));
        }
        self.channel = s;
        self.rebuild();
        Ok(())
    }

    pub fn channel(&self) -> Result<&str> {
        if !self.has_channel() {
            return Err(ProtocolError::NotSet("channel"));
        }
        Ok(&self.channel)
    }

    pub fn has_channel(&self) -> bool {
        !self.channel.is_empty()
    }

    // -- Location code --

    /// Sets the location code. An empty (or all-blank) input is legal and
    /// records an empty-but-set location.
    pub fn set_location_code(&mut self, location: &str) -> Result<()> {
        self.location = normalize(location);
        self.has_location = true;
        self.rebuild();
        Ok(())
    }

    pub fn location_code(&self) -> Result<&str> {
        if !self.has_location {
            return Err(ProtocolError::NotSet("location code"));
        }
        Ok(&self.location)
    }

    pub fn has_location_code(&self) -> bool {
        self.has_location
    }

    // -- Rendering --

    /// The canonical `NET.STA.CHA[.LOC]` form; the location segment is
    /// omitted when the location code is empty.
    pub fn canonical(&self) -> Result<&str> {
        if self.canonical.is_empty() {
            self.require_complete()?;
        }
        Ok(&self.canonical)
    }

    /// The DataLink stream identifier `NET_STA_LOC_CHA/MSEED`. An empty
    /// location yields the bare `__` between station and channel.
    pub fn data_link_name(&self) -> Result<String> {
        self.require_complete()?;
        Ok(format!(
            "{}_{}_{}_{}/MSEED",
            self.network, self.station, self.location, self.channel
        ))
    }

    fn require_complete(&self) -> Result<()> {
        if !self.has_network() {
            return Err(ProtocolError::NotSet("network"));
        }
        if !self.has_station() {
            return Err(ProtocolError::NotSet("station"));
        }
        if !self.has_channel() {
            return Err(ProtocolError::NotSet("channel"));
        }
        if !self.has_location {
            return Err(ProtocolError::NotSet("location code"));
        }
        Ok(())
    }

    fn rebuild(&mut self) {
        self.canonical.clear();
        if self.has_network() && self.has_station() && self.has_channel() && self.has_location {
            self.canonical = format!("{}.{}.{}", self.network, self.station, self.channel);
            if !self.location.is_empty() {
                self.canonical.push('.');
                self.canonical.push_str(&self.location);
            }
        }
    }
}

impl PartialEq for StreamIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for StreamIdentifier {}

impl PartialOrd for StreamIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamIdentifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl std::hash::Hash for StreamIdentifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_location_code() {
        let mut id = StreamIdentifier::new();
        id.set_network(" uu ").unwrap();
        id.set_station("ftu").unwrap();
        id.set_channel("hhn").unwrap();
        id.set_location_code("01").unwrap();

        assert_eq!(id.network().unwrap(), "UU");
        assert_eq!(id.station().unwrap(), "FTU");
        assert_eq!(id.channel().unwrap(), "HHN");
        assert_eq!(id.location_code().unwrap(), "01");
        assert_eq!(id.canonical().unwrap(), "UU.FTU.HHN.01");
        assert_eq!(id.data_link_name().unwrap(), "UU_FTU_01_HHN/MSEED");
    }

    #[test]
    fn empty_location_code() {
        let id = StreamIdentifier::from_parts("UU", "FTU", "HHN", "").unwrap();
        assert_eq!(id.location_code().unwrap(), "");
        assert_eq!(id.canonical().unwrap(), "UU.FTU.HHN");
        assert_eq!(id.data_link_name().unwrap(), "UU_FTU__HHN/MSEED");
    }

    #[test]
    fn canonical_stable_under_reapplication() {
        let mut id = StreamIdentifier::from_parts("UU", "FTU", "HHN", "01").unwrap();
        let first = id.canonical().unwrap().to_owned();
        id.set_network("uu").unwrap();
        id.set_station(" FTU").unwrap();
        id.set_channel("hHn ").unwrap();
        id.set_location_code(" 01 ").unwrap();
        assert_eq!(id.canonical().unwrap(), first);
    }

    #[test]
    fn empty_fields_rejected() {
        let mut id = StreamIdentifier::new();
        assert!(id.set_network("   ").is_err());
        assert!(id.set_station("").is_err());
        assert!(id.set_channel(" ").is_err());
        // Location is the exception.
        assert!(id.set_location_code("  ").is_ok());
    }

    #[test]
    fn getters_before_set() {
        let id = StreamIdentifier::new();
        assert!(matches!(
            id.network().unwrap_err(),
            ProtocolError::NotSet("network")
        ));
        assert!(matches!(
            id.location_code().unwrap_err(),
            ProtocolError::NotSet("location code")
        ));
        assert!(id.canonical().is_err());
        assert!(id.data_link_name().is_err());
    }

    #[test]
    fn canonical_requires_location_presence() {
        let mut id = StreamIdentifier::new();
        id.set_network("UU").unwrap();
        id.set_station("FTU").unwrap();
        id.set_channel("HHN").unwrap();
        assert!(matches!(
            id.canonical().unwrap_err(),
            ProtocolError::NotSet("location code")
        ));
    }

    #[test]
    fn equality_and_ordering_by_canonical() {
        let a = StreamIdentifier::from_parts("UU", "FTU", "HHN", "01").unwrap();
        let b = StreamIdentifier::from_parts(" uu", "ftu ", "hhn", "01").unwrap();
        let c = StreamIdentifier::from_parts("UU", "FTU", "HHZ", "01").unwrap();
        assert_eq!(a, b);
        assert!(a < c);
    }
}
