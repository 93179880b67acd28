use std::fmt;

/// Static build metadata, printed on startup and exposed on the admin
/// surface so operators can tell which build is answering requests.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
	pub version: &'static str,
	pub rust_version: &'static str,
	pub profile: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
	version: env!("CARGO_PKG_VERSION"),
	rust_version: env!("CARGO_PKG_RUST_VERSION"),
	profile: if cfg!(debug_assertions) {
		"debug"
	} else {
		"release"
	},
};

impl fmt::Display for BuildInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"v{} (rustc {}, {})",
			self.version, self.rust_version, self.profile
		)
	}
}
