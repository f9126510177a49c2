//! Runtime configuration from environment variables
//!
//! Every variable has a default; a value that does not parse is logged and
//! replaced by the default so the frame always boots.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::slideshow::ResetCause;

/// Largest accepted base64 upload body
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Supported boards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    Inkplate6,
    Inkplate10,
}

impl Model {
    pub fn name(&self) -> &'static str {
        match self {
            Model::Inkplate6 => "Inkplate 6",
            Model::Inkplate10 => "Inkplate 10",
        }
    }

    /// Panel size in landscape
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Model::Inkplate6 => (800, 600),
            Model::Inkplate10 => (1200, 825),
        }
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace([' ', '-', '_'], "").as_str() {
            "inkplate6" => Ok(Model::Inkplate6),
            "inkplate10" => Ok(Model::Inkplate10),
            other => Err(format!("unknown model: {}", other)),
        }
    }
}

/// Access point MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Access point SSID, unique per device
    pub fn ssid(&self) -> String {
        format!("InkArt{:02x}{:02x}", self.0[2], self.0[3])
    }

    /// Access point WPA password
    pub fn password(&self) -> String {
        format!("iNKaRT{:02x}{:02x}", self.0[4], self.0[5])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("MAC too short: {}", s))?;
            *byte = u8::from_str_radix(part, 16).map_err(|e| format!("bad MAC {}: {}", s, e))?;
        }
        if parts.next().is_some() {
            return Err(format!("MAC too long: {}", s));
        }
        Ok(MacAddress(bytes))
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub photo_dir: PathBuf,
    pub settings_path: PathBuf,
    pub frame_output: PathBuf,
    pub model: Model,
    pub mac: MacAddress,
    pub ipv4: Ipv4Addr,
    pub storage_capacity: u64,
    pub max_upload_bytes: usize,
    /// Deep sleep between wakes; `false` keeps the API up permanently
    pub sleep_cycle: bool,
    pub wake_cause: ResetCause,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            photo_dir: PathBuf::from("./sdcard"),
            settings_path: PathBuf::from("./nvs.json"),
            frame_output: PathBuf::from("./frame.png"),
            model: Model::default(),
            mac: MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            ipv4: Ipv4Addr::new(192, 168, 4, 1),
            storage_capacity: 4_000_000_000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            sleep_cycle: true,
            wake_cause: ResetCause::PowerOn,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let parsed = |name: &str| -> Option<String> { lookup(name).filter(|v| !v.trim().is_empty()) };

        Self {
            port: var(&parsed, "PORT", defaults.port),
            photo_dir: parsed("PHOTO_DIR").map(PathBuf::from).unwrap_or(defaults.photo_dir),
            settings_path: parsed("SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            frame_output: parsed("FRAME_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or(defaults.frame_output),
            model: var(&parsed, "MODEL", defaults.model),
            mac: var(&parsed, "AP_MAC", defaults.mac),
            ipv4: var(&parsed, "AP_IPV4", defaults.ipv4),
            storage_capacity: var(&parsed, "STORAGE_CAPACITY", defaults.storage_capacity),
            max_upload_bytes: var(&parsed, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            sleep_cycle: var(&parsed, "SLEEP_CYCLE", defaults.sleep_cycle),
            wake_cause: var(&parsed, "WAKE_CAUSE", defaults.wake_cause),
        }
    }
}

/// Parse one variable, warning and keeping the default on failure
fn var<T, E>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr<Err = E> + fmt::Debug,
    E: fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}; using {:?}", name, raw, e, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.model.dimensions(), (800, 600));
        assert!(config.sleep_cycle);
        assert_eq!(config.wake_cause, ResetCause::PowerOn);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "9000"),
            ("MODEL", "Inkplate 10"),
            ("AP_MAC", "24-0A-C4-1B-2C-3D"),
            ("SLEEP_CYCLE", "false"),
            ("WAKE_CAUSE", "timer"),
            ("PHOTO_DIR", "/mnt/sd"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.model, Model::Inkplate10);
        assert_eq!(config.model.dimensions(), (1200, 825));
        assert_eq!(config.mac.to_string(), "24:0a:c4:1b:2c:3d");
        assert!(!config.sleep_cycle);
        assert_eq!(config.wake_cause, ResetCause::DeepSleepTimer);
        assert_eq!(config.photo_dir, PathBuf::from("/mnt/sd"));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = config(&[("PORT", "eighty"), ("AP_MAC", "00:11"), ("MODEL", "kindle")]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.mac, Config::default().mac);
        assert_eq!(config.model, Model::Inkplate6);
    }

    #[test]
    fn test_ssid_and_password() {
        let mac = MacAddress([0, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.ssid(), "InkArt2233");
        assert_eq!(mac.password(), "iNKaRT4455");
    }
}
