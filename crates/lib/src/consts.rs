/// Application name used for config/data directory lookups.
pub const APP_NAME: &str = "fleetsync";

/// Registry file name searched for in the working directory and config dir.
pub const CONFIG_FILENAME: &str = "fleet.toml";

/// Environment variable that points at an explicit registry file.
pub const CONFIG_ENV: &str = "FLEETSYNC_CONFIG";

/// Environment variable that overrides the data directory.
pub const DATA_ENV: &str = "FLEETSYNC_DATA";

/// Fleet-wide lock file, kept directly under the fleet root.
pub const FLEET_LOCK_FILENAME: &str = ".fleetsync.lock";

/// Prefix of side directories holding staged trees (self-update and deploy unpack).
pub const STAGING_PREFIX: &str = ".staging-";

/// Prefix of side directories holding the previous live tree during a self-update.
pub const BACKUP_PREFIX: &str = ".backup-";

/// Suffix of the pending update descriptor, `.<code_root>.pending_update.json`.
pub const PENDING_UPDATE_SUFFIX: &str = ".pending_update.json";

/// Suffix of the last applied update record, `.<code_root>.last_update_applied.json`.
pub const LAST_APPLIED_SUFFIX: &str = ".last_update_applied.json";

/// Maximum number of paths kept in a change summary sample.
pub const CHANGE_SAMPLE_LIMIT: usize = 20;

/// Baselines retained by default after recording a new one.
pub const DEFAULT_BASELINE_KEEP: usize = 10;
