//! INI configuration for the ringbridge executable.
//!
//! Recognized sections: `[General]`, `[SEEDLink]` (with
//! `data_selector_1..N`), `[DataLink]` or `[DataLink_1..N]`, and the two
//! OTel collector endpoint sections. Unknown keys are ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};
use ringbridge_pipeline::{DataLinkOptions, PipelineOptions, SeedLinkOptions};
use ringbridge_protocol::{SelectorKind, StreamSelector};
use tracing::warn;

pub const APPLICATION_NAME: &str = "ringbridge";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("missing required key {key}")]
    MissingKey { key: &'static str },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// An OTel collector HTTP endpoint; its presence enables the associated
/// export path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtelEndpoint {
    pub url: String,
    pub suffix: String,
}

/// Everything the daemon needs to build a pipeline.
#[derive(Clone, Debug)]
pub struct ProgramOptions {
    pub application_name: String,
    /// 1..4: error, warn, info, debug.
    pub verbosity: u8,
    pub seedlink: SeedLinkOptions,
    pub datalinks: Vec<DataLinkOptions>,
    pub pipeline: PipelineOptions,
    pub metrics_endpoint: Option<OtelEndpoint>,
    pub log_endpoint: Option<OtelEndpoint>,
}

fn normalize_host(key: &str, raw: &str) -> Result<String> {
    let host: String = raw.split_whitespace().collect::<String>().to_lowercase();
    if host.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_owned(),
            message: "host is empty".into(),
        });
    }
    Ok(host)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_owned(),
            message: format!("{other:?} is not a boolean"),
        }),
    }
}

fn parse_port(key: &str, raw: &str) -> Result<u16> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_owned(),
        message: format!("{raw:?} is not a port number"),
    })
}

/// Parse one `data_selector_N` value: pipe/comma separated entries of
/// `NET [STA [CHA [LOC [TYPE]]]]`.
fn parse_selectors(value: &str, options: &mut SeedLinkOptions) -> Result<()> {
    for entry in value.split(['|', ',']) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let fields: Vec<&str> = entry.split_whitespace().collect();

        let mut selector = StreamSelector::new();
        selector
            .set_network(fields[0])
            .map_err(|e| ConfigError::InvalidValue {
                key: "SEEDLink.data_selector".into(),
                message: e.to_string(),
            })?;
        if let Some(station) = fields.get(1) {
            selector
                .set_station(station)
                .map_err(|e| ConfigError::InvalidValue {
                    key: "SEEDLink.data_selector".into(),
                    message: e.to_string(),
                })?;
        }
        let channel = fields.get(2).copied().unwrap_or("*");
        let location = fields.get(3).copied().unwrap_or("??");
        let kind = match fields.get(4).copied() {
            Some("D") => SelectorKind::Data,
            Some("A") | None => SelectorKind::All,
            Some(other) => {
                warn!(entry, record_type = other, "unknown selector type, using A");
                SelectorKind::All
            }
        };
        selector.set_selector(channel, location, kind);

        options
            .add_selector(selector)
            .map_err(|e| ConfigError::InvalidValue {
                key: "SEEDLink.data_selector".into(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}

fn parse_seedlink(section: &Properties) -> Result<SeedLinkOptions> {
    let mut options = SeedLinkOptions::default();

    let host = section
        .get("host")
        .ok_or(ConfigError::MissingKey { key: "SEEDLink.host" })?;
    options.host = normalize_host("SEEDLink.host", host)?;
    if let Some(port) = section.get("port") {
        options.port = parse_port("SEEDLink.port", port)?;
    }

    if let Some(state_file) = section.get("stateFile")
        && !state_file.trim().is_empty()
    {
        options.state_file = Some(PathBuf::from(state_file.trim()));
        if let Some(value) = section.get("deleteStateFileOnStart") {
            options.delete_state_file_on_start =
                parse_bool("SEEDLink.deleteStateFileOnStart", value)?;
        }
        if let Some(value) = section.get("deleteStateFileOnStop") {
            options.delete_state_file_on_stop =
                parse_bool("SEEDLink.deleteStateFileOnStop", value)?;
        }
    }

    for index in 1..=32768 {
        let key = format!("data_selector_{index}");
        let Some(value) = section.get(key.as_str()) else {
            break;
        };
        parse_selectors(value, &mut options)?;
    }
    Ok(options)
}

fn parse_datalink(
    section: &Properties,
    section_name: &str,
    default_name: String,
) -> Result<DataLinkOptions> {
    let mut options = DataLinkOptions::default();

    let host = section
        .get("host")
        .ok_or(ConfigError::MissingKey { key: "DataLink.host" })?;
    options.host = normalize_host(&format!("{section_name}.host"), host)?;
    if let Some(port) = section.get("port") {
        options.port = parse_port(&format!("{section_name}.port"), port)?;
    }
    if let Some(value) = section.get("writeMiniSEED3") {
        options.write_mseed3 = parse_bool(&format!("{section_name}.writeMiniSEED3"), value)?;
    }
    let name = section.get("name").map(str::trim).unwrap_or_default();
    let name = if name.is_empty() { &default_name } else { name };
    options
        .set_name(name)
        .map_err(|e| ConfigError::InvalidValue {
            key: format!("{section_name}.name"),
            message: e.to_string(),
        })?;
    Ok(options)
}

fn parse_otel_endpoint(ini: &Ini, section_name: &str, default_suffix: &str) -> Option<OtelEndpoint> {
    let section = ini.section(Some(section_name))?;
    let host = section.get("host")?.trim();
    if host.is_empty() {
        return None;
    }
    let port: u16 = section
        .get("port")
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(4318);
    let url = format!("{host}:{port}");

    let mut suffix = section
        .get("suffix")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_suffix)
        .to_owned();
    if !url.ends_with('/') && !suffix.starts_with('/') {
        suffix.insert(0, '/');
    }
    Some(OtelEndpoint { url, suffix })
}

/// Load and validate the whole configuration file.
pub fn parse_ini_file(path: &Path) -> Result<ProgramOptions> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let ini = Ini::load_from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut application_name = APPLICATION_NAME.to_owned();
    let mut verbosity = 3u8;
    if let Some(general) = ini.section(Some("General")) {
        if let Some(name) = general.get("applicationName")
            && !name.trim().is_empty()
        {
            application_name = name.trim().to_owned();
        }
        if let Some(value) = general.get("verbosity") {
            verbosity = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "General.verbosity".into(),
                message: format!("{value:?} is not a number"),
            })?;
        }
    }

    let seedlink = match ini.section(Some("SEEDLink")) {
        Some(section) => parse_seedlink(section)?,
        None => return Err(ConfigError::MissingKey { key: "SEEDLink.host" }),
    };

    let mut datalinks = Vec::new();
    if let Some(section) = ini.section(Some("DataLink")) {
        datalinks.push(parse_datalink(
            section,
            "DataLink",
            format!("{application_name}-DALIWriter"),
        )?);
    } else {
        for index in 1..32768 {
            let section_name = format!("DataLink_{index}");
            let Some(section) = ini.section(Some(section_name.as_str())) else {
                break;
            };
            datalinks.push(parse_datalink(
                section,
                &section_name,
                format!("{application_name}-DALIWriter-{index}"),
            )?);
        }
    }
    if datalinks.is_empty() {
        return Err(ConfigError::MissingKey { key: "DataLink.host" });
    }

    let metrics_endpoint = parse_otel_endpoint(&ini, "OTelHTTPMetricsOptions", "/v1/metrics");
    let log_endpoint = parse_otel_endpoint(&ini, "OTelHTTPLogOptions", "/v1/logs");

    let pipeline = PipelineOptions {
        export_metrics: metrics_endpoint.is_some(),
        metrics_interval: Duration::from_secs(60),
        ..PipelineOptions::default()
    };

    Ok(ProgramOptions {
        application_name,
        verbosity,
        seedlink,
        datalinks,
        pipeline,
        metrics_endpoint,
        log_endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_configuration() {
        let file = write_ini(
            "[SEEDLink]\nhost = rtserve.iris.washington.edu\n\n\
             [DataLink]\nhost = localhost\n",
        );
        let options = parse_ini_file(file.path()).unwrap();

        assert_eq!(options.application_name, "ringbridge");
        assert_eq!(options.verbosity, 3);
        assert_eq!(options.seedlink.host, "rtserve.iris.washington.edu");
        assert_eq!(options.seedlink.port, 18000);
        assert!(options.seedlink.state_file.is_none());
        assert_eq!(options.datalinks.len(), 1);
        assert_eq!(options.datalinks[0].host, "localhost");
        assert_eq!(options.datalinks[0].port, 16000);
        assert_eq!(options.datalinks[0].name, "ringbridge-DALIWriter");
        assert!(!options.datalinks[0].write_mseed3);
        assert!(!options.pipeline.export_metrics);
    }

    #[test]
    fn full_configuration() {
        let file = write_ini(
            "[General]\napplicationName = uuBridge\nverbosity = 4\n\n\
             [SEEDLink]\nhost = EQ.Example.EDU\nport = 18001\n\
             stateFile = /tmp/ringbridge/seedlink.state\n\
             deleteStateFileOnStart = true\ndeleteStateFileOnStop = false\n\
             data_selector_1 = UU FORK HH? 01 D | UU CTU EN? 01 D\n\
             data_selector_2 = GE\n\n\
             [DataLink]\nhost = Ring.Example.EDU\nport = 16001\n\
             writeMiniSEED3 = true\nname = uuBridgeWriter\n\n\
             [OTelHTTPMetricsOptions]\nhost = collector\nport = 4318\nsuffix = v1/metrics\n",
        );
        let options = parse_ini_file(file.path()).unwrap();

        assert_eq!(options.application_name, "uuBridge");
        assert_eq!(options.verbosity, 4);
        assert_eq!(options.seedlink.host, "eq.example.edu");
        assert_eq!(options.seedlink.port, 18001);
        assert!(options.seedlink.delete_state_file_on_start);
        assert!(!options.seedlink.delete_state_file_on_stop);

        let selectors = &options.seedlink.selectors;
        assert_eq!(selectors.len(), 3);
        assert_eq!(selectors[0].station_id().unwrap(), "UU_FORK");
        assert_eq!(selectors[0].selector(), "01HH?.D");
        assert_eq!(selectors[1].station_id().unwrap(), "UU_CTU");
        assert_eq!(selectors[1].selector(), "01EN?.D");
        assert_eq!(selectors[2].station_id().unwrap(), "GE_*");
        assert_eq!(selectors[2].selector(), "??*");

        assert_eq!(options.datalinks[0].host, "ring.example.edu");
        assert_eq!(options.datalinks[0].port, 16001);
        assert!(options.datalinks[0].write_mseed3);
        assert_eq!(options.datalinks[0].name, "uuBridgeWriter");

        assert!(options.pipeline.export_metrics);
        assert_eq!(
            options.metrics_endpoint,
            Some(OtelEndpoint {
                url: "collector:4318".into(),
                suffix: "/v1/metrics".into(),
            })
        );
        assert!(options.log_endpoint.is_none());
    }

    #[test]
    fn numbered_datalink_sections() {
        let file = write_ini(
            "[SEEDLink]\nhost = upstream\n\n\
             [DataLink_1]\nhost = ring1\n\n\
             [DataLink_2]\nhost = ring2\nport = 16002\n",
        );
        let options = parse_ini_file(file.path()).unwrap();
        assert_eq!(options.datalinks.len(), 2);
        assert_eq!(options.datalinks[0].name, "ringbridge-DALIWriter-1");
        assert_eq!(options.datalinks[1].name, "ringbridge-DALIWriter-2");
        assert_eq!(options.datalinks[1].port, 16002);
    }

    #[test]
    fn missing_seedlink_host_is_an_error() {
        let file = write_ini("[DataLink]\nhost = localhost\n");
        assert!(matches!(
            parse_ini_file(file.path()).unwrap_err(),
            ConfigError::MissingKey { key: "SEEDLink.host" }
        ));
    }

    #[test]
    fn missing_datalink_section_is_an_error() {
        let file = write_ini("[SEEDLink]\nhost = upstream\n");
        assert!(matches!(
            parse_ini_file(file.path()).unwrap_err(),
            ConfigError::MissingKey { key: "DataLink.host" }
        ));
    }

    #[test]
    fn duplicate_selector_is_an_error() {
        let file = write_ini(
            "[SEEDLink]\nhost = upstream\n\
             data_selector_1 = UU FORK HH? 01 D, UU FORK HH? 01 D\n\n\
             [DataLink]\nhost = localhost\n",
        );
        assert!(matches!(
            parse_ini_file(file.path()).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            parse_ini_file(Path::new("/nonexistent/ringbridge.ini")).unwrap_err(),
            ConfigError::Io { .. }
        ));
    }

    #[test]
    fn blank_otel_host_disables_export() {
        let file = write_ini(
            "[SEEDLink]\nhost = upstream\n\n[DataLink]\nhost = localhost\n\n\
             [OTelHTTPMetricsOptions]\nhost =\n",
        );
        let options = parse_ini_file(file.path()).unwrap();
        assert!(options.metrics_endpoint.is_none());
        assert!(!options.pipeline.export_metrics);
    }
}
