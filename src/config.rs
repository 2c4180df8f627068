//! Configuration file parsing and data paths

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use crate::error::NsLinkError;

/// Configuration loaded from config.txt
#[derive(Debug, Clone)]
pub struct Config {
    /// Nightscout host name or address
    pub host: String,
    /// Nightscout port
    pub port: u16,
    /// Use wss:// instead of ws://
    pub secure: bool,
    /// API secret; hashed before it goes on the wire
    pub secret: Option<String>,
    /// Override for the SQLite fact database path
    pub database_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1337,
            secure: false,
            secret: None,
            database_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NsLinkError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut config = Config::default();

        for line in reader.lines() {
            let line = line?;

            // Skip empty lines and comments
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Parse "key value" or "key value # comment"
            if let Some((key, rest)) = Self::parse_line(line) {
                // Extract value before any comment
                let value = rest.split('#').next().unwrap_or("").trim();
                match key {
                    "host" => config.host = value.to_string(),
                    "port" => {
                        if let Ok(port) = value.parse() {
                            config.port = port;
                        }
                    }
                    "secure" => config.secure = value == "1" || value == "true",
                    "secret" => {
                        if !value.is_empty() {
                            config.secret = Some(value.to_string());
                        }
                    }
                    "database" => config.database_path = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        Ok(config)
    }

    /// Parse a single config line, returning (key, value)
    fn parse_line(line: &str) -> Option<(&str, &str)> {
        // Find first whitespace to separate key from value
        let mut parts = line.splitn(2, |c: char| c.is_whitespace());
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();

        if key.is_empty() || value.is_empty() {
            return None;
        }

        Some((key, value))
    }

    /// Write a commented default config for first runs
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<(), NsLinkError> {
        let mut file = File::create(path)?;
        writeln!(file, "# nslink configuration")?;
        writeln!(file, "# host      Nightscout host name or address")?;
        writeln!(file, "# port      Nightscout port")?;
        writeln!(file, "# secure    1 to connect with wss://")?;
        writeln!(file, "# secret    API secret (hashed before use)")?;
        writeln!(file, "# database  path to the fact database")?;
        writeln!(file)?;
        writeln!(file, "host localhost")?;
        writeln!(file, "port 1337")?;
        writeln!(file, "secure 0")?;
        Ok(())
    }

    /// Websocket URL for the live socket endpoint
    pub fn socket_url(&self) -> String {
        format!(
            "{}://{}:{}/socket.io/?EIO=3&transport=websocket",
            if self.secure { "wss" } else { "ws" },
            self.host,
            self.port
        )
    }
}

/// OS-specific data directory for nslink
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nslink")
}

/// Make sure the data directory exists
pub fn ensure_data_dir() -> std::io::Result<()> {
    std::fs::create_dir_all(get_data_dir())
}

/// Default location of the fact database
pub fn default_database_path() -> PathBuf {
    get_data_dir().join("facts.db")
}

/// Default location of the config file
pub fn config_file_path() -> PathBuf {
    get_data_dir().join("config.txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config() {
        let dir = std::env::temp_dir().join("nslink-test-config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.txt");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "host ns.example.org").unwrap();
        writeln!(file, "port 8080  # behind a proxy").unwrap();
        writeln!(file, "secure 1").unwrap();
        writeln!(file, "secret hunter2").unwrap();
        drop(file);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.host, "ns.example.org");
        assert_eq!(config.port, 8080);
        assert!(config.secure);
        assert_eq!(config.secret.as_deref(), Some("hunter2"));
        assert_eq!(
            config.socket_url(),
            "wss://ns.example.org:8080/socket.io/?EIO=3&transport=websocket"
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(
            config.socket_url(),
            "ws://localhost:1337/socket.io/?EIO=3&transport=websocket"
        );
        assert!(config.secret.is_none());
    }
}
