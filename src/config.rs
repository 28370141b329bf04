use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Where `uiautomator dump` writes on the device unless configured otherwise.
pub const DEFAULT_DUMP_PATH: &str = "/sdcard/window_dump.xml";

#[derive(Clone, Debug)]
pub struct AdbConfig {
    pub binary: String,         // env ADB_PATH
    pub serial: Option<String>, // env ANDROID_SERIAL
    pub command_timeout: Duration,
    pub dump_path: String, // where `uiautomator dump` writes on the device
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            binary: env::var("ADB_PATH").unwrap_or_else(|_| "adb".into()),
            serial: env::var("ANDROID_SERIAL").ok().filter(|s| !s.trim().is_empty()),
            command_timeout: Duration::from_secs(30),
            dump_path: DEFAULT_DUMP_PATH.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub controller_name: String,
    pub profile_name: String,
    /// Root under which `<controller>/<profile>/` is created. env DROIDSCRAPE_SCREENS
    pub screens_root: PathBuf,
    /// TTL used when refreshing a menu that has no recorded state.
    pub default_ttl: u64,
    pub adb: AdbConfig,
}

impl ControllerConfig {
    pub fn new(controller_name: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            controller_name: controller_name.into(),
            profile_name: profile_name.into(),
            ..Default::default()
        }
    }

    pub fn with_screens_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.screens_root = root.into();
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: "default".into(),
            profile_name: "default".into(),
            screens_root: env::var("DROIDSCRAPE_SCREENS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("screens")),
            default_ttl: 150,
            adb: AdbConfig::default(),
        }
    }
}
