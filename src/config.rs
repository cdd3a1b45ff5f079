//! Daemon configuration, parsed from the command line.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "udisksd-linux-provider",
    about = "Linux object registry for a storage-device daemon"
)]
pub struct Config {
    /// Interval, in seconds, between housekeeping passes over all drives.
    #[arg(long, default_value = "600", value_parser = parse_seconds)]
    pub housekeeping_interval: Duration,

    /// Kernel subsystems to subscribe to uevents for. Only `block` is ever
    /// acted on by this crate; other subsystems are accepted for the
    /// benefit of collaborators outside this crate's scope.
    #[arg(long, value_delimiter = ',', default_value = "block")]
    pub watched_subsystems: Vec<String>,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

fn parse_seconds(value: &str) -> std::result::Result<Duration, std::num::ParseIntError> {
    value.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_housekeeping_cadence() {
        let config = Config::parse_from(["udisksd-linux-provider"]);
        assert_eq!(config.housekeeping_interval, Duration::from_secs(600));
        assert_eq!(config.watched_subsystems, vec!["block".to_string()]);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn watched_subsystems_accepts_a_comma_separated_list() {
        let config = Config::parse_from([
            "udisksd-linux-provider",
            "--watched-subsystems",
            "block,scsi,iscsi_connection",
        ]);
        assert_eq!(
            config.watched_subsystems,
            vec!["block", "scsi", "iscsi_connection"]
        );
    }
}
