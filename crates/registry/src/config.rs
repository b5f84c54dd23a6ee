//! Runtime options for the registry.

use std::path::PathBuf;

/// Ambient configuration, usually derived from the host environment.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
	/// Directory holding the four cache files; `None` disables persistence.
	pub cache_dir: Option<PathBuf>,
	/// Bypasses the cache entirely: never adopted, never saved.
	pub no_registry_cache: bool,
	/// Faults every cached record in at adoption instead of lazily.
	pub no_lazy_cache_loading: bool,
	/// Enables content-stamp validation; without it the wildcard stamp is
	/// used and any cache matches.
	pub check_config: bool,
	/// Subscribes a listener tracing every change event.
	pub debug_events: bool,
	/// Content stamp of the contributing manifests; see [`crate::stamp`].
	pub stamp: i64,
}

impl RegistryConfig {
	/// Reads the toggles from the process environment.
	pub fn from_env() -> Self {
		Self {
			cache_dir: std::env::var_os("PLEXUS_REGISTRY_CACHE_DIR").map(PathBuf::from),
			no_registry_cache: env_flag("PLEXUS_NO_REGISTRY_CACHE"),
			no_lazy_cache_loading: env_flag("PLEXUS_NO_LAZY_CACHE_LOADING"),
			check_config: env_flag("PLEXUS_CHECK_CONFIG"),
			debug_events: env_flag("PLEXUS_DEBUG_REGISTRY_EVENTS"),
			stamp: 0,
		}
	}

	/// Points the registry at a cache directory.
	pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.cache_dir = Some(dir.into());
		self
	}

	/// Sets the manifest content stamp and enables its validation.
	pub fn with_stamp(mut self, stamp: i64) -> Self {
		self.stamp = stamp;
		self.check_config = true;
		self
	}

	/// The stamp used for cache validation; zero unless checking is on.
	pub fn effective_stamp(&self) -> i64 {
		if self.check_config {
			self.stamp
		} else {
			0
		}
	}
}

fn env_flag(name: &str) -> bool {
	std::env::var(name)
		.map(|value| value.eq_ignore_ascii_case("true") || value == "1")
		.unwrap_or(false)
}
