use std::net::IpAddr;

use tracing::Level;

/// Everything this process reads from the environment, loaded once at
/// startup before any other component is constructed.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_ip_dns: IpAddr,
    pub dns_port: u16,
    pub http_port: u16,
    pub logging_level: Level,
}

const DEFAULT_BIND_IP: &str = "127.0.0.1";

impl Config {
    /// Parses `BIND_IP_DNS` eagerly -- an invalid literal is a startup-time
    /// programmer/operator error and panics, matching the non-zero exit code
    /// contract for bootstrap failures. `LOGGING_LEVEL` is parsed leniently:
    /// an unrecognised value falls back to `info` rather than aborting.
    pub fn from_env() -> Self {
        let bind_ip_raw =
            std::env::var("BIND_IP_DNS").unwrap_or_else(|_| DEFAULT_BIND_IP.to_string());
        let bind_ip_dns: IpAddr =
            bind_ip_raw.parse().unwrap_or_else(|_| panic!("Invalid DNS bind ip: {bind_ip_raw}"));

        let logging_level = match std::env::var("LOGGING_LEVEL").as_deref() {
            Ok("debug") => Level::DEBUG,
            Ok("info") => Level::INFO,
            Ok("warn") => Level::WARN,
            Ok("error") => Level::ERROR,
            _ => Level::INFO,
        };

        Config { bind_ip_dns, dns_port: 53, http_port: 80, logging_level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_ip() {
        std::env::remove_var("BIND_IP_DNS");
        std::env::remove_var("LOGGING_LEVEL");
        let config = Config::from_env();
        assert_eq!(config.bind_ip_dns, DEFAULT_BIND_IP.parse::<IpAddr>().unwrap());
        assert_eq!(config.logging_level, Level::INFO);
    }

    #[test]
    #[should_panic(expected = "Invalid DNS bind ip")]
    fn test_invalid_bind_ip_panics() {
        std::env::set_var("BIND_IP_DNS", "not-an-ip");
        Config::from_env();
        std::env::remove_var("BIND_IP_DNS");
    }

    #[test]
    fn test_unknown_logging_level_falls_back_to_info() {
        std::env::remove_var("BIND_IP_DNS");
        std::env::set_var("LOGGING_LEVEL", "nonsense");
        let config = Config::from_env();
        assert_eq!(config.logging_level, Level::INFO);
        std::env::remove_var("LOGGING_LEVEL");
    }
}
