//! Provides a means to read, parse and hold configuration options for scans.
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_derive::Deserialize;
use thiserror::Error;

use crate::output::ExtraField;
use crate::probe::TlsVersion;

const DEFAULT_PORT: u16 = 443;
const DEFAULT_GEO_DB: &str = "Country.mmdb";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tlsreach",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// TLS reachability scanner.
/// Finds hosts that negotiate TLS 1.3 with h2 and present a certificate.
/// Given a single IP or domain it keeps walking outward from it until stopped.
pub struct Opts {
    /// A single IP, CIDR or domain. A lone IP or domain starts an endless
    /// walk outward from it unless --no-walk is given.
    #[arg(short, long, conflicts_with_all = ["file", "url"])]
    pub addr: Option<String>,

    /// A file of newline-separated IPs, CIDRs or domains.
    #[arg(short, long, conflicts_with = "url")]
    pub file: Option<PathBuf>,

    /// A web page whose linked domains are scanned.
    #[arg(short, long)]
    pub url: Option<String>,

    /// The port to probe.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Number of concurrent workers (and walkers in endless mode).
    #[arg(short, long, alias = "thread", default_value = "2")]
    pub workers: usize,

    /// Seconds to wait for the TCP connect and, separately, the TLS handshake.
    #[arg(short, long, default_value = "10")]
    pub timeout: u64,

    /// Also scan and resolve to IPv6 addresses.
    #[arg(long = "ipv6", short = '6')]
    pub ipv6: bool,

    /// Only report hosts that negotiated exactly this TLS version.
    #[arg(long = "tls-version")]
    pub tls_version: Option<TlsVersion>,

    /// Write results to this CSV file instead of stdout.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Extra CSV columns appended to every record. Example: port,tls,alpn
    #[arg(long, value_enum, value_delimiter = ',')]
    pub fields: Vec<ExtraField>,

    /// MaxMind country database used for the GEO_CODE column.
    #[arg(long, default_value = DEFAULT_GEO_DB)]
    pub geo_db: PathBuf,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Stop each direction of an endless walk after this many addresses.
    #[arg(long)]
    pub walk_limit: Option<u64>,

    /// Probe a lone IP or domain once instead of walking outward from it.
    #[arg(long)]
    pub no_walk: bool,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(long)]
    pub ulimit: Option<u64>,

    /// Log every probe, including failures.
    #[arg(short, long)]
    pub verbose: bool,

    /// Hide the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merge values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(port, workers, timeout, ipv6, fields, geo_db, verbose);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(tls_version, resolver, walk_limit, ulimit);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addr: None,
            file: None,
            url: None,
            port: DEFAULT_PORT,
            workers: 2,
            timeout: 10,
            ipv6: false,
            tls_version: None,
            out: None,
            fields: vec![],
            geo_db: PathBuf::from(DEFAULT_GEO_DB),
            resolver: None,
            walk_limit: None,
            no_walk: false,
            ulimit: None,
            verbose: false,
            no_banner: false,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Deserialize)]
pub struct Config {
    port: Option<u16>,
    workers: Option<usize>,
    timeout: Option<u64>,
    ipv6: Option<bool>,
    tls_version: Option<TlsVersion>,
    fields: Option<Vec<ExtraField>>,
    geo_db: Option<PathBuf>,
    resolver: Option<String>,
    walk_limit: Option<u64>,
    ulimit: Option<u64>,
    verbose: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no target given, use one of --addr, --file or --url")]
    NoTarget,
    #[error("only one of --addr, --file or --url may be given")]
    ConflictingTargets,
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("timeout must be at least 1 second")]
    NoTimeout,
    #[error("found {0} in configuration file")]
    Parse(#[from] toml::de::Error),
    #[error("cannot read configuration file: {0}")]
    Read(#[from] std::io::Error),
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file is an empty configuration.
    ///
    /// # Format
    ///
    /// port = 8443
    /// workers = 64
    /// timeout = 5
    /// tls_version = "1.3"
    /// fields = ["port", "alpn"]
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        let content = if config_path.exists() {
            fs::read_to_string(config_path)?
        } else {
            String::new()
        };

        Ok(toml::from_str(&content)?)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let mut config_path = dirs::home_dir().unwrap_or_default();
    config_path.push(".tlsreach.toml");
    config_path
}

/// Where the targets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    Address(String),
    File(PathBuf),
    Url(String),
}

/// Validated settings threaded into the enumerator, probe and engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub source: TargetSource,
    pub port: u16,
    pub workers: NonZeroUsize,
    pub timeout: Duration,
    pub ipv6: bool,
    pub target_version: Option<TlsVersion>,
    pub output: Option<PathBuf>,
    pub fields: Vec<ExtraField>,
    pub geo_db: PathBuf,
    pub resolver: Option<String>,
    pub walk: bool,
    pub walk_limit: Option<u64>,
}

impl TryFrom<&Opts> for ScanConfig {
    type Error = ConfigError;

    fn try_from(opts: &Opts) -> Result<Self, Self::Error> {
        let mut sources = [
            opts.addr.clone().map(TargetSource::Address),
            opts.file.clone().map(TargetSource::File),
            opts.url.clone().map(TargetSource::Url),
        ]
        .into_iter()
        .flatten();
        let source = sources.next().ok_or(ConfigError::NoTarget)?;
        if sources.next().is_some() {
            return Err(ConfigError::ConflictingTargets);
        }

        let workers = NonZeroUsize::new(opts.workers).ok_or(ConfigError::NoWorkers)?;
        if opts.timeout == 0 {
            return Err(ConfigError::NoTimeout);
        }

        Ok(Self {
            source,
            port: opts.port,
            workers,
            timeout: Duration::from_secs(opts.timeout),
            ipv6: opts.ipv6,
            target_version: opts.tls_version,
            output: opts.out.clone(),
            fields: opts.fields.clone(),
            geo_db: opts.geo_db.clone(),
            resolver: opts.resolver.clone(),
            walk: !opts.no_walk,
            walk_limit: opts.walk_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use parameterized::parameterized;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{Config, ConfigError, Opts, ScanConfig, TargetSource};
    use crate::output::ExtraField;
    use crate::probe::TlsVersion;

    impl Config {
        fn default() -> Self {
            Self {
                port: Some(8443),
                workers: Some(64),
                timeout: Some(3),
                ipv6: Some(true),
                tls_version: None,
                fields: Some(vec![ExtraField::Port]),
                geo_db: None,
                resolver: None,
                walk_limit: None,
                ulimit: None,
                verbose: Some(true),
            }
        }
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[parameterized(input = {
        vec!["tlsreach", "--addr", "1.2.3.4"],
        vec!["tlsreach", "-a", "example.com", "-p", "8443"],
        vec!["tlsreach", "--file", "hosts.txt", "--thread", "16"],
        vec!["tlsreach", "-u", "https://example.com", "--tls-version", "1.3"],
    }, expected = {
        TargetSource::Address("1.2.3.4".to_owned()),
        TargetSource::Address("example.com".to_owned()),
        TargetSource::File(PathBuf::from("hosts.txt")),
        TargetSource::Url("https://example.com".to_owned()),
    })]
    fn parse_target_sources(input: Vec<&str>, expected: TargetSource) {
        let opts = Opts::parse_from(input);
        let config = ScanConfig::try_from(&opts).unwrap();

        assert_eq!(config.source, expected);
    }

    #[test]
    fn defaults_match_the_original_tool() {
        let opts = Opts::parse_from(["tlsreach", "-a", "1.2.3.4"]);
        let config = ScanConfig::try_from(&opts).unwrap();

        assert_eq!(config.port, 443);
        assert_eq!(config.workers.get(), 2);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.walk);
        assert!(!config.ipv6);
        assert_eq!(config.target_version, None);
        assert_eq!(config.output, None);
    }

    #[test]
    fn parses_fields_and_version() {
        let opts = Opts::parse_from([
            "tlsreach",
            "-a",
            "1.2.3.4",
            "--fields",
            "port,tls,alpn",
            "--tls-version",
            "1.2",
            "--no-walk",
        ]);
        let config = ScanConfig::try_from(&opts).unwrap();

        assert_eq!(
            config.fields,
            [ExtraField::Port, ExtraField::Tls, ExtraField::Alpn]
        );
        assert_eq!(config.target_version, Some(TlsVersion::V1_2));
        assert!(!config.walk);
    }

    #[test]
    fn conflicting_sources_are_rejected_by_the_parser() {
        let result = Opts::try_parse_from(["tlsreach", "-a", "1.2.3.4", "-f", "hosts.txt"]);
        assert!(result.is_err());
    }

    #[test]
    fn no_target_is_a_configuration_error() {
        let err = ScanConfig::try_from(&Opts::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoTarget));
    }

    #[test]
    fn more_than_one_target_is_a_configuration_error() {
        let opts = Opts {
            addr: Some("1.2.3.4".to_owned()),
            url: Some("https://example.com".to_owned()),
            ..Opts::default()
        };
        let err = ScanConfig::try_from(&opts).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingTargets));
    }

    #[test]
    fn zero_workers_or_timeout_are_rejected() {
        let opts = Opts {
            addr: Some("1.2.3.4".to_owned()),
            workers: 0,
            ..Opts::default()
        };
        assert!(matches!(
            ScanConfig::try_from(&opts),
            Err(ConfigError::NoWorkers)
        ));

        let opts = Opts {
            addr: Some("1.2.3.4".to_owned()),
            timeout: 0,
            ..Opts::default()
        };
        assert!(matches!(
            ScanConfig::try_from(&opts),
            Err(ConfigError::NoTimeout)
        ));
    }

    #[test]
    fn opts_no_merge_when_config_is_ignored() {
        let mut opts = Opts::default();
        let config = Config::default();

        opts.merge(&config);

        assert_eq!(opts.port, 443);
        assert_eq!(opts.workers, 2);
        assert!(!opts.ipv6);
    }

    #[test]
    fn opts_merge_required_arguments() {
        let mut opts = Opts::default();
        let config = Config::default();

        opts.merge_required(&config);

        assert_eq!(opts.port, config.port.unwrap());
        assert_eq!(opts.workers, config.workers.unwrap());
        assert_eq!(opts.timeout, config.timeout.unwrap());
        assert_eq!(opts.ipv6, config.ipv6.unwrap());
        assert_eq!(opts.fields, config.fields.unwrap());
        assert!(opts.verbose);
    }

    #[test]
    fn opts_merge_optional_arguments() {
        let mut opts = Opts::default();
        let mut config = Config::default();
        config.tls_version = Some(TlsVersion::V1_3);
        config.walk_limit = Some(1_000);
        config.resolver = Some("1.1.1.1".to_owned());

        opts.merge_optional(&config);

        assert_eq!(opts.tls_version, Some(TlsVersion::V1_3));
        assert_eq!(opts.walk_limit, Some(1_000));
        assert_eq!(opts.resolver, config.resolver);
        assert_eq!(opts.ulimit, None);
    }

    #[test]
    fn config_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 8443\nworkers = 32\ntls_version = \"1.3\"\nfields = [\"port\", \"alpn\"]"
        )
        .unwrap();

        let config = Config::read(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.port, Some(8443));
        assert_eq!(config.workers, Some(32));
        assert_eq!(config.tls_version, Some(TlsVersion::V1_3));
        assert_eq!(config.fields, Some(vec![ExtraField::Port, ExtraField::Alpn]));
    }

    #[test]
    fn missing_config_file_is_empty() {
        let config = Config::read(Some(PathBuf::from("/no/such/.tlsreach.toml"))).unwrap();
        assert_eq!(config.port, None);
    }

    #[test]
    fn broken_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        let err = Config::read(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
