mod logging_config;
pub mod config;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

pub use config::{Config, ConfigError};
pub use logging_config::{LogLevel, LoggingConfig};

/// Command line of the tool
#[derive(Parser, Debug, Clone)]
#[command(
    name = "storescu",
    version,
    about = "Send a DICOM file to a Storage SCP"
)]
pub struct Cli {
    /// Hostname of DICOM peer
    pub peer: String,

    /// TCP/IP port number of peer
    pub port: u16,

    /// DICOM file to be transmitted
    #[arg(value_name = "dcmfile-in")]
    pub dcmfile_in: PathBuf,

    /// Set my calling AE title [default: STORESCU]
    #[arg(long = "calling-aet", value_name = "aetitle")]
    pub calling_aet: Option<String>,

    /// Set called AE title of peer
    #[arg(long = "called-aet", value_name = "aetitle", default_value = "ANY-SCP")]
    pub called_aet: String,

    /// Print the parsed command line arguments
    #[arg(long)]
    pub arguments: bool,

    /// Quiet mode, print no warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode, print processing details
    #[arg(short, long)]
    pub verbose: bool,

    /// Debug mode, print debug information
    #[arg(short, long)]
    pub debug: bool,

    /// Use level for the logger
    #[arg(long = "log-level", value_enum, value_name = "level")]
    pub log_level: Option<LogLevel>,

    /// Configuration file (TOML), also read for the logger settings
    #[arg(long, visible_alias = "log-config", value_name = "file")]
    pub config: Option<PathBuf>,

    /// Read unrecognised transfer syntaxes as explicit VR big endian
    #[arg(long = "ts-fallback")]
    pub ts_fallback: bool,

    /// Maximum PDU length to receive, in bytes
    #[arg(long = "max-pdu", value_name = "bytes")]
    pub max_pdu: Option<u32>,
}

impl Cli {
    /// Parse the process arguments
    pub fn from_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    /// Parse from an explicit argument list, the program name first
    pub fn try_from_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    /// Log level implied by the flags, if any were given
    pub fn requested_level(&self) -> Option<LogLevel> {
        if let Some(level) = self.log_level {
            Some(level)
        } else if self.debug {
            Some(LogLevel::Debug)
        } else if self.verbose {
            Some(LogLevel::Info)
        } else if self.quiet {
            Some(LogLevel::Off)
        } else {
            None
        }
    }
}

/// Accept the single dash `-aet`, `-aec`, `-ll` and `-lc` spellings
fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-aet") => OsString::from("--calling-aet"),
            Some("-aec") => OsString::from("--called-aet"),
            Some("-ll") => OsString::from("--log-level"),
            Some("-lc") => OsString::from("--log-config"),
            _ => arg,
        })
        .collect()
}
