use std::path::PathBuf;

use reqwest::Url;

use crate::error::AppError;

pub const DEFAULT_RELAY_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Server configuration loaded explicitly from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to listen on, e.g. "0.0.0.0:3000".
    pub listen_addr: String,
    /// Root of the CKAN instance, e.g. "http://ckan.example.org".
    pub ckan_base_url: String,
    /// Datastore resource holding the rental property rows.
    pub property_resource_id: String,
    /// Row limit for property fetches.
    pub property_limit: u32,
    /// Directory containing `<province>.geojson` grid files.
    pub grid_data_dir: PathBuf,
    /// Hosts the CORS relay may fetch from. `None` allows every host.
    pub allowed_hosts: Option<Vec<String>>,
    /// Largest upstream body the relays will buffer.
    pub relay_max_body_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CKAN_BASE_URL`
    /// - `CKAN_PROPERTY_RESOURCE_ID`
    ///
    /// Optional:
    /// - `LISTEN_ADDR` (default "0.0.0.0:3000")
    /// - `CKAN_PROPERTY_LIMIT` (default 1000)
    /// - `GRID_DATA_DIR` (default "data/grids")
    /// - `PROXY_ALLOWED_HOSTS` (comma-separated)
    /// - `PROXY_MAX_BODY_BYTES` (default 10 MiB)
    pub fn from_env() -> Result<Self, AppError> {
        let ckan_base_url = std::env::var("CKAN_BASE_URL").map_err(|_| {
            AppError::Config("CKAN_BASE_URL environment variable is required".to_string())
        })?;
        if !(ckan_base_url.starts_with("http://") || ckan_base_url.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "CKAN_BASE_URL must be an http(s) URL, got {ckan_base_url}"
            )));
        }

        let property_resource_id = std::env::var("CKAN_PROPERTY_RESOURCE_ID").map_err(|_| {
            AppError::Config(
                "CKAN_PROPERTY_RESOURCE_ID environment variable is required".to_string(),
            )
        })?;

        let property_limit = match std::env::var("CKAN_PROPERTY_LIMIT") {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                AppError::Config(format!("CKAN_PROPERTY_LIMIT must be a number, got {raw}"))
            })?,
            Err(_) => 1_000,
        };

        let relay_max_body_bytes = match std::env::var("PROXY_MAX_BODY_BYTES") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                AppError::Config(format!("PROXY_MAX_BODY_BYTES must be a number, got {raw}"))
            })?,
            Err(_) => DEFAULT_RELAY_MAX_BODY_BYTES,
        };

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            ckan_base_url,
            property_resource_id,
            property_limit,
            grid_data_dir: std::env::var("GRID_DATA_DIR")
                .unwrap_or_else(|_| "data/grids".to_string())
                .into(),
            allowed_hosts: std::env::var("PROXY_ALLOWED_HOSTS")
                .ok()
                .map(|raw| parse_host_list(&raw))
                .filter(|hosts| !hosts.is_empty()),
            relay_max_body_bytes,
        })
    }

    /// Whether the relay may fetch `url`: http(s) only, and the host must be on the
    /// allow-list when one is configured.
    pub fn relay_target_allowed(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && self.host_allowed(url.host_str().unwrap_or_default())
    }

    pub fn host_allowed(&self, host: &str) -> bool {
        match &self.allowed_hosts {
            None => true,
            Some(hosts) => hosts.iter().any(|h| h.eq_ignore_ascii_case(host)),
        }
    }
}

fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_list_is_trimmed_and_lowercased() {
        assert_eq!(
            parse_host_list(" Data.Example.org, ,overpass-api.de "),
            vec!["data.example.org".to_string(), "overpass-api.de".to_string()]
        );
    }

    #[test]
    fn host_allowed_without_list() {
        let mut config = Config {
            listen_addr: "127.0.0.1:0".to_string(),
            ckan_base_url: "http://ckan.local".to_string(),
            property_resource_id: "res".to_string(),
            property_limit: 10,
            grid_data_dir: "data/grids".into(),
            allowed_hosts: None,
            relay_max_body_bytes: DEFAULT_RELAY_MAX_BODY_BYTES,
        };
        assert!(config.host_allowed("anything.example"));

        config.allowed_hosts = Some(vec!["ckan.local".to_string()]);
        assert!(config.host_allowed("CKAN.local"));
        assert!(!config.host_allowed("evil.example"));
    }

    #[test]
    fn relay_targets_need_http_scheme_and_listed_host() {
        let config = Config {
            listen_addr: "127.0.0.1:0".to_string(),
            ckan_base_url: "http://ckan.local".to_string(),
            property_resource_id: "res".to_string(),
            property_limit: 10,
            grid_data_dir: "data/grids".into(),
            allowed_hosts: Some(vec!["ckan.local".to_string()]),
            relay_max_body_bytes: DEFAULT_RELAY_MAX_BODY_BYTES,
        };
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(config.relay_target_allowed(&url("https://ckan.local/api")));
        assert!(!config.relay_target_allowed(&url("ftp://ckan.local/file")));
        assert!(!config.relay_target_allowed(&url("http://internal.local/")));
    }
}
