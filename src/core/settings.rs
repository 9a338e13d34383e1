use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::model::{EpochMillis, ObligationKind, UserId};

/// Allowed range for the due-soon window, in hours.
const MIN_WINDOW_HOURS: i64 = 1;
const MAX_WINDOW_HOURS: i64 = 168;

const MS_PER_HOUR: i64 = 3_600_000;

/// Per-user notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    /// How far ahead of a deadline the due-soon reminder fires, in hours.
    pub due_soon_window_hours: i64,
    /// When false, overdue triggers are suppressed entirely.
    pub enable_overdue_alerts: bool,
    /// Optional per-kind window overrides.
    #[serde(default)]
    pub kind_window_hours: HashMap<ObligationKind, i64>,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            due_soon_window_hours: 24,
            enable_overdue_alerts: true,
            kind_window_hours: HashMap::new(),
        }
    }
}

impl NotifySettings {
    /// Resolve the due-soon window for an obligation kind, in milliseconds.
    /// Out-of-range hour values are clamped to [1, 168] rather than rejected.
    pub fn due_soon_window_ms(&self, kind: ObligationKind) -> EpochMillis {
        let hours = self
            .kind_window_hours
            .get(&kind)
            .copied()
            .unwrap_or(self.due_soon_window_hours);
        hours.clamp(MIN_WINDOW_HOURS, MAX_WINDOW_HOURS) * MS_PER_HOUR
    }
}

/// Loads and saves per-user settings files under a data directory.
pub struct SettingsStore {
    data_dir: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn settings_path(&self, user_id: &str) -> PathBuf {
        self.data_dir.join(format!("settings_{}.json", user_id))
    }

    /// Load a user's settings, falling back to defaults if the file is
    /// missing or unreadable.
    pub fn load(&self, user_id: &UserId) -> NotifySettings {
        let path = self.settings_path(user_id);
        if path.exists() {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(settings) = serde_json::from_str(&content) {
                    return settings;
                }
            }
        }
        NotifySettings::default()
    }

    pub fn save(&self, user_id: &UserId, settings: &NotifySettings) -> io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(user_id), content)
    }
}
