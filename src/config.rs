use crate::error::Error;
use crate::framing::MessageNames;
use ::config::Config;

/// Default upper bound for a single payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Construction options shared by [`Server`](crate::Server) and
/// [`Client`](crate::Client).
///
/// # Configuration Keys
///
/// - `max_payload_size`: largest payload accepted from a peer or queued for
///   sending (defaults to 1 MiB, at most `u32::MAX`)
/// - `unlink_stale_socket`: remove an existing socket file before binding
///   (defaults to `true`, server only)
///
/// # Example
///
/// ```toml
/// # Global default
/// max_payload_size = 1048576
///
/// # Specific to the "agentd" instance
/// [agentd]
/// socket_path = "/run/agentd.sock"
/// max_payload_size = 65536
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Diagnostic names for message types, used only for logging.
    pub names: MessageNames,
    /// Largest payload accepted in either direction.
    pub max_payload_size: usize,
    /// Remove a leftover socket file before binding.
    pub unlink_stale_socket: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            names: MessageNames::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            unlink_stale_socket: true,
        }
    }
}

impl Options {
    /// Reads options with configuration namespacing.
    ///
    /// Configuration lookup follows this priority:
    /// 1. `{name}.{key}` (e.g., `agentd.max_payload_size`)
    /// 2. `{key}` (e.g., `max_payload_size`)
    /// 3. Hard-coded default
    pub fn new_named(config: &Config, name: &str) -> Self {
        let defaults = Self::default();
        Self {
            names: defaults.names,
            max_payload_size: get_namespaced_usize(config, name, "max_payload_size")
                .unwrap_or(defaults.max_payload_size),
            unlink_stale_socket: get_namespaced_bool(config, name, "unlink_stale_socket")
                .unwrap_or(defaults.unlink_stale_socket),
        }
    }

    /// Replaces the diagnostic type-name table.
    pub fn with_names(mut self, names: MessageNames) -> Self {
        self.names = names;
        self
    }

    /// Replaces the payload size limit.
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }
}

/// Looks up the required `socket_path` key.
pub(crate) fn socket_path(config: &Config, name: &str) -> Result<String, Error> {
    Ok(get_namespaced_string(config, name, "socket_path")?)
}

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, config::ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<usize, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key))
}

pub(crate) fn get_namespaced_bool(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<bool, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_bool)
}

pub(crate) fn get_namespaced_string(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<String, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_string)
}
