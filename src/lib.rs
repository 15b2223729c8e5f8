// Library interface for rehabrs modules
// The CLI binary and the integration tests both build on this

pub mod achievements;
pub mod challenges;
pub mod config;
pub mod dates;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod logging;
pub mod models;
pub mod notify;
pub mod preferences;
pub mod protocol;
pub mod sanitize;
pub mod score;
pub mod store;
pub mod streak;
pub mod tips;

// Re-export commonly used types for convenience
pub use models::*;
pub use achievements::{AchievementEngine, AchievementMetrics, LevelInfo, UnlockEvent};
pub use challenges::{ChallengeInput, DailyChallengeSelector, DailyChallenges};
pub use config::AppConfig;
pub use dates::{Clock, DateFilter, FixedClock, SystemClock};
pub use engine::{EngineSettings, EngineSnapshot, QueryToken, RecoveryEngine};
pub use error::{RehabError, Result};
pub use forecast::{ForecastProjector, RecoveryForecast, RomBand, Trajectory};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use preferences::{PreferenceState, PreferenceStore, Preferences};
pub use protocol::RehabProtocol;
pub use score::{DayLogs, RecoveryScore, RecoveryScoreCalculator, SupplementCatalog};
pub use store::{ChangeSignal, LogStore, LogStoreExt, MemoryLogStore, SqliteLogStore};
pub use streak::{FreezePolicy, StreakCalculator, StreakStats};
pub use tips::{SmartTip, SmartTipsEngine, TipContext, TipRule};
