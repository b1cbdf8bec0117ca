//! CLI arguments and the validated configuration derived from them.

use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Raw CLI arguments, parsed with `clap`.
#[derive(Debug, Parser)]
#[command(name = "mjpegd", about = "V4L2 MJPEG streaming server")]
pub struct CliArgs {
    /// Run as a daemon. Accepted for compatibility, has no effect.
    #[arg(short, long)]
    pub daemon: bool,

    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u32,

    /// Path to the V4L2 capture device.
    #[arg(short, long, default_value = "/dev/video0")]
    pub camera: String,

    /// Minimum log level.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

/// Server configuration after CLI validation.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub camera_path: String,
    pub log_level: LogLevel,
}

impl From<CliArgs> for ServerConfig {
    fn from(args: CliArgs) -> Self {
        let port = args.port.clamp(1, 65535) as u16;
        Self {
            port,
            camera_path: args.camera,
            log_level: args.log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_clamps_to_valid_range() {
        let args = CliArgs {
            daemon: false,
            port: 0,
            camera: "/dev/video0".into(),
            log_level: LogLevel::Info,
        };
        assert_eq!(ServerConfig::from(args).port, 1);

        let args = CliArgs {
            daemon: false,
            port: 999_999,
            camera: "/dev/video0".into(),
            log_level: LogLevel::Info,
        };
        assert_eq!(ServerConfig::from(args).port, 65535);
    }

    #[test]
    fn port_in_range_is_unchanged() {
        let args = CliArgs {
            daemon: false,
            port: 8080,
            camera: "/dev/video0".into(),
            log_level: LogLevel::Info,
        };
        assert_eq!(ServerConfig::from(args).port, 8080);
    }
}
