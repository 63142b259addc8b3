use crate::error::{ProtocolError, Result};

/// Which record types a selector admits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectorKind {
    /// Everything the server has for the pattern.
    All,
    /// Waveform data records only (`.D` suffix on the wire).
    Data,
}

impl SelectorKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::All => "",
            Self::Data => ".D",
        }
    }
}

/// One SEEDLink stream subscription: a network, a station pattern, and a
/// channel/location wildcard selector.
///
/// The wire selector string follows the SEEDLink convention
/// `LLCCC[.T]`: two location characters, the channel pattern, and an
/// optional type letter. An unset location renders as `??` and an unset
/// channel as `*`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSelector {
    network: Option<String>,
    station: Option<String>,
    selector: Option<String>,
}

impl StreamSelector {
    pub fn new() -> Self {
        Self {
            network: None,
            station: None,
            selector: None,
        }
    }

    pub fn set_network(&mut self, network: &str) -> Result<()> {
        let s = network.trim().to_uppercase();
        if s.is_empty() {
            return Err(ProtocolError::InvalidArgument("network is empty".into()));
        }
        self.network = Some(s);
        Ok(())
    }

    pub fn network(&self) -> Result<&str> {
        self.network
            .as_deref()
            .ok_or(ProtocolError::NotSet("network"))
    }

    pub fn has_network(&self) -> bool {
        self.network.is_some()
    }

    pub fn set_station(&mut self, station: &str) -> Result<()> {
        let s = station.trim().to_uppercase();
        if s.is_empty() {
            return Err(ProtocolError::InvalidArgument("station is empty".into()));
        }
        self.station = Some(s);
        Ok(())
    }

    /// The station pattern; `*` when none was set.
    pub fn station(&self) -> &str {
        self.station.as_deref().unwrap_or("*")
    }

    /// Builds the wire selector from a channel pattern, a location pattern,
    /// and a record-type kind. Empty channel defaults to `*`, empty location
    /// to `??`.
    pub fn set_selector(&mut self, channel: &str, location: &str, kind: SelectorKind) {
        let channel = channel.trim();
        let channel = if channel.is_empty() { "*" } else { channel };
        let location = location.trim();
        let location = if location.is_empty() { "??" } else { location };
        self.selector = Some(format!(
            "{}{}{}",
            location.to_uppercase(),
            channel.to_uppercase(),
            kind.suffix()
        ));
    }

    /// The wire selector string; `*` when none was set.
    pub fn selector(&self) -> &str {
        self.selector.as_deref().unwrap_or("*")
    }

    /// The `NET_STA` station identifier used when registering this
    /// subscription.
    pub fn station_id(&self) -> Result<String> {
        Ok(format!("{}_{}", self.network()?, self.station()))
    }
}

impl Default for StreamSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_location_code() {
        let mut selector = StreamSelector::new();
        selector.set_network("UU").unwrap();
        selector.set_station("*").unwrap();
        selector.set_selector("HH?", "", SelectorKind::Data);
        assert_eq!(selector.network().unwrap(), "UU");
        assert_eq!(selector.station(), "*");
        assert_eq!(selector.selector(), "??HH?.D");
    }

    #[test]
    fn location_code_without_channel() {
        let mut selector = StreamSelector::new();
        selector.set_network("UU").unwrap();
        selector.set_selector("", "01", SelectorKind::Data);
        assert_eq!(selector.selector(), "01*.D");
    }

    #[test]
    fn all_kind_has_no_suffix() {
        let mut selector = StreamSelector::new();
        selector.set_network("GE").unwrap();
        selector.set_selector("BHZ", "00", SelectorKind::All);
        assert_eq!(selector.selector(), "00BHZ");
    }

    #[test]
    fn defaults() {
        let mut selector = StreamSelector::new();
        selector.set_network("IU").unwrap();
        assert_eq!(selector.station(), "*");
        assert_eq!(selector.selector(), "*");
        assert_eq!(selector.station_id().unwrap(), "IU_*");
    }

    #[test]
    fn network_required() {
        let mut selector = StreamSelector::new();
        assert!(selector.set_network("  ").is_err());
        assert!(selector.network().is_err());
        assert!(selector.station_id().is_err());
    }
}
