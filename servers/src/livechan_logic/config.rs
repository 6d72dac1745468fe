use clap::Parser;
use lib_livechan::{ClientSettings, HubSettings, PollTuning};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_livechan.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live imageboard post relay over WebSockets", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "LIVECHAN_HOST", help = "Address to bind the HTTP/WebSocket server to.")]
    pub host: Option<String>,

    #[clap(long, env = "LIVECHAN_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "LIVECHAN_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LIVECHAN_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LIVECHAN_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LIVECHAN_LOG_KEEP", help = "Run log files kept in the log directory, the current one included.")]
    pub log_keep: Option<usize>,

    #[clap(long, env = "LIVECHAN_UPSTREAM_URL", help = "Base URL of the upstream board API.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "LIVECHAN_DIRECTORY_PATH", help = "Path of the board directory, relative to the upstream URL.")]
    pub directory_path: Option<String>,

    #[clap(long, env = "LIVECHAN_INDEX_PATH", help = "Path of a board index page; {board} is replaced by the board key.")]
    pub index_path: Option<String>,

    #[clap(long, env = "LIVECHAN_REQUEST_COOLDOWN_MS", help = "Minimum milliseconds between two upstream requests.")]
    pub request_cooldown_ms: Option<u64>,

    #[clap(long, env = "LIVECHAN_HTTP_RETRIES", help = "Retries on transient upstream failures.")]
    pub http_retries: Option<u32>,

    #[clap(long, env = "LIVECHAN_REQUEST_TIMEOUT_SECS", help = "Timeout in seconds for one upstream request.")]
    pub request_timeout_secs: Option<u64>,

    #[clap(long, env = "LIVECHAN_DIRECTORY_REFRESH_SECS", help = "Seconds between two board directory reloads.")]
    pub directory_refresh_secs: Option<u64>,

    #[clap(long, env = "LIVECHAN_STATUS_DEBOUNCE_MS", help = "Minimum milliseconds between two status broadcasts.")]
    pub status_debounce_ms: Option<u64>,

    #[clap(long, env = "LIVECHAN_LISTENER_QUEUE", help = "Frames a listener may fall behind before it is disconnected.")]
    pub listener_queue: Option<usize>,

    #[clap(long, env = "LIVECHAN_HISTORY_LEN", help = "Posts kept per board for rate estimation.")]
    pub history_len: Option<usize>,

    #[clap(long, env = "LIVECHAN_TARGET_BACKLOG", help = "New posts the next poll of a board should find.")]
    pub target_backlog: Option<u32>,

    #[clap(long, env = "LIVECHAN_MAX_SLEEP_SECS", help = "Longest wait in seconds between two polls of a watched board.")]
    pub max_sleep_secs: Option<u64>,

    #[clap(long, env = "LIVECHAN_SEED_WINDOW_SECS", help = "Age in seconds of posts replayed on a board's first poll.")]
    pub seed_window_secs: Option<u64>,

    #[clap(long, env = "LIVECHAN_RETRY_DELAY_SECS", help = "Seconds before a failed board poll is retried.")]
    pub retry_delay_secs: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_keep: other.log_keep.or(self.log_keep),
            upstream_url: other.upstream_url.or(self.upstream_url),
            directory_path: other.directory_path.or(self.directory_path),
            index_path: other.index_path.or(self.index_path),
            request_cooldown_ms: other.request_cooldown_ms.or(self.request_cooldown_ms),
            http_retries: other.http_retries.or(self.http_retries),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            directory_refresh_secs: other.directory_refresh_secs.or(self.directory_refresh_secs),
            status_debounce_ms: other.status_debounce_ms.or(self.status_debounce_ms),
            listener_queue: other.listener_queue.or(self.listener_queue),
            history_len: other.history_len.or(self.history_len),
            target_backlog: other.target_backlog.or(self.target_backlog),
            max_sleep_secs: other.max_sleep_secs.or(self.max_sleep_secs),
            seed_window_secs: other.seed_window_secs.or(self.seed_window_secs),
            retry_delay_secs: other.retry_delay_secs.or(self.retry_delay_secs),
        }
    }

    /// Built-in values for every field.
    pub fn defaults() -> Config {
        let client = ClientSettings::default();
        let tuning = PollTuning::default();
        Config {
            host: Some("0.0.0.0".to_string()),
            port: Some(3939),
            config_path: None,
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_keep: Some(5),
            upstream_url: Some(client.base_url),
            directory_path: Some(client.directory_path),
            index_path: Some(client.index_path),
            request_cooldown_ms: Some(client.cooldown.as_millis() as u64),
            http_retries: Some(client.retries),
            request_timeout_secs: Some(client.timeout.as_secs()),
            directory_refresh_secs: Some(3600),
            status_debounce_ms: Some(HubSettings::default().status_debounce.as_millis() as u64),
            listener_queue: Some(256),
            history_len: Some(tuning.history_len),
            target_backlog: Some(tuning.target_backlog),
            max_sleep_secs: Some(tuning.max_sleep.as_secs()),
            seed_window_secs: Some(tuning.seed_window.as_secs()),
            retry_delay_secs: Some(tuning.retry_delay.as_secs()),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let host = self.host.as_deref().unwrap_or("0.0.0.0");
        let port = self.port.unwrap_or(3939);
        Ok(format!("{}:{}", host, port).parse()?)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    pub fn log_keep(&self) -> usize {
        self.log_keep.unwrap_or(5)
    }

    pub fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_secs.unwrap_or(3600))
    }

    pub fn listener_queue(&self) -> usize {
        self.listener_queue.unwrap_or(256)
    }

    pub fn client_settings(&self) -> ClientSettings {
        let base = ClientSettings::default();
        ClientSettings {
            base_url: self.upstream_url.clone().unwrap_or(base.base_url),
            directory_path: self.directory_path.clone().unwrap_or(base.directory_path),
            index_path: self.index_path.clone().unwrap_or(base.index_path),
            cooldown: self.request_cooldown_ms.map(Duration::from_millis).unwrap_or(base.cooldown),
            retries: self.http_retries.unwrap_or(base.retries),
            timeout: self.request_timeout_secs.map(Duration::from_secs).unwrap_or(base.timeout),
            user_agent: base.user_agent,
        }
    }

    pub fn poll_tuning(&self) -> PollTuning {
        let base = PollTuning::default();
        PollTuning {
            history_len: self.history_len.unwrap_or(base.history_len).max(1),
            target_backlog: self.target_backlog.unwrap_or(base.target_backlog),
            max_sleep: self.max_sleep_secs.map(Duration::from_secs).unwrap_or(base.max_sleep),
            seed_window: self.seed_window_secs.map(Duration::from_secs).unwrap_or(base.seed_window),
            retry_delay: self.retry_delay_secs.map(Duration::from_secs).unwrap_or(base.retry_delay),
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        let base = HubSettings::default();
        HubSettings {
            status_debounce: self
                .status_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(base.status_debounce),
        }
    }
}

pub fn load_config() -> Config {
    // CLI arguments already include the environment variables.
    load_config_from(Config::parse())
}

/// Layers defaults < config file < `cli`.
pub fn load_config_from(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli)
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let config_str = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&config_str) {
        Ok(file_config) => Some(file_config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let config = load_config_from(Config {
            config_path: Some(PathBuf::from("/nonexistent/server_livechan.conf")),
            ..Config::default()
        });

        assert_eq!(config.port, Some(3939));
        assert_eq!(config.upstream_url.as_deref(), Some("https://a.4cdn.org/"));
        assert_eq!(config.index_path.as_deref(), Some("{board}/1.json"));
        assert_eq!(config.client_settings().cooldown, Duration::from_millis(1000));
        assert_eq!(config.poll_tuning().max_sleep, Duration::from_secs(1200));
        assert_eq!(config.hub_settings().status_debounce, Duration::from_millis(1000));
        assert_eq!(config.listener_queue(), 256);
        assert_eq!(config.log_keep(), 5);
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let file = write_config(r#"{ "port": 8080, "logLevel": "debug", "logKeep": 2, "requestCooldownMs": 250, "historyLen": 50 }"#);

        let config = load_config_from(Config {
            config_path: Some(file.path().to_path_buf()),
            port: Some(9000),
            ..Config::default()
        });

        assert_eq!(config.port, Some(9000));
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.log_keep(), 2);
        assert_eq!(config.client_settings().cooldown, Duration::from_millis(250));
        assert_eq!(config.poll_tuning().history_len, 50);
        assert_eq!(config.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn malformed_file_is_ignored() {
        let file = write_config("{ this is not json");

        let config = load_config_from(Config {
            config_path: Some(file.path().to_path_buf()),
            ..Config::default()
        });

        assert_eq!(config.port, Some(3939));
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let config = Config {
            host: Some("127.0.0.1".to_string()),
            port: Some(4000),
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:4000".parse().unwrap());

        let broken = Config { host: Some("not a host".to_string()), ..Config::default() };
        assert!(broken.bind_addr().is_err());
    }
}
