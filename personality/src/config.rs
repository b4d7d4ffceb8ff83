//! Startup configuration for the personality layer.
//!
//! Plain data; nothing here touches the filesystem or environment except
//! [`Config::from_env`] itself.

use std::path::PathBuf;

pub const DEFAULT_FUTEX_BUCKETS: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of hash buckets in the futex core. 256 by default;
    /// overridable only so tests can exercise collisions with a small
    /// bucket count.
    pub futex_buckets: usize,
    /// Root directory under which [`crate::host::special_file`]'s default
    /// implementation resolves UNIX-socket rendezvous paths.
    pub winfs_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            futex_buckets: DEFAULT_FUTEX_BUCKETS,
            winfs_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl Config {
    /// Builds a [`Config`] from the process environment, falling back to
    /// defaults for anything unset.
    ///
    /// - `LINUX_PERSONALITY_FUTEX_BUCKETS`: overrides the bucket count.
    /// - `LINUX_PERSONALITY_WINFS_ROOT`: overrides the WinFS root.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(buckets) = std::env::var("LINUX_PERSONALITY_FUTEX_BUCKETS") {
            if let Ok(n) = buckets.parse::<usize>() {
                if n > 0 {
                    config.futex_buckets = n;
                }
            } else {
                log::warn!("LINUX_PERSONALITY_FUTEX_BUCKETS={buckets:?} is not a positive integer, ignoring");
            }
        }
        if let Ok(root) = std::env::var("LINUX_PERSONALITY_WINFS_ROOT") {
            config.winfs_root = PathBuf::from(root);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_256_buckets() {
        assert_eq!(Config::default().futex_buckets, DEFAULT_FUTEX_BUCKETS);
    }
}
