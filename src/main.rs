use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tracing::debug;

use rehabrs::achievements::AchievementEngine;
use rehabrs::config::AppConfig;
use rehabrs::dates::{parse_local_date, Clock, FixedClock, SystemClock};
use rehabrs::engine::{EngineSettings, EngineSnapshot, RecoveryEngine};
use rehabrs::error::RehabError;
use rehabrs::forecast::{Trajectory, FUNCTIONAL_ARC, NORMAL_ARC};
use rehabrs::logging::{init_logging, LogFormat, LogLevel};
use rehabrs::models::{
    ExerciseSessionLog, JournalEntry, LogRecord, MeasuredBy, MoodEntry, PainEntry,
    RomMeasurement, SleepLog, SupplementLog, SupplementSlot,
};
use rehabrs::notify::TracingDispatcher;
use rehabrs::preferences::{JsonFilePreferenceStore, PreferenceState};
use rehabrs::score::{PAIN_MAX, ROM_MAX, SESSIONS_MAX, SLEEP_MAX, SUPPLEMENTS_MAX};
use rehabrs::store::SqliteLogStore;

/// RehabRS - Recovery analytics for elbow rehabilitation
///
/// Log exercise sessions, supplements, sleep, pain and range of motion, and
/// get a daily recovery score, a ROM forecast, tips, challenges and
/// achievements derived from those logs.
#[derive(Parser)]
#[command(name = "rehabrs")]
#[command(author = "RehabRS Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Recovery analytics and gamification CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Evaluate as of this local date (YYYY-MM-DD) instead of today
    #[arg(short, long, value_name = "DATE", value_parser = parse_date_arg)]
    date: Option<NaiveDate>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override the configured log level
    #[arg(long, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Override the configured console log format
    #[arg(long, value_enum, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a record to the log store
    Log {
        #[command(subcommand)]
        record: LogCommand,
    },

    /// Show the full daily overview
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show today's recovery score breakdown
    Score,

    /// Show the range-of-motion forecast
    Forecast,

    /// Show the exercise streak and freezes
    Streak,

    /// Show today's smart tips
    Tips,

    /// Show today's daily challenges
    Challenges {
        /// Mark today's breathing exercise as done
        #[arg(long)]
        breathing_done: bool,
    },

    /// List achievements and the current level
    Achievements,

    /// List session reminders that are due
    Reminders,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum LogCommand {
    /// Log one exercise within a scheduled session
    Session {
        /// Session slot (1-5)
        #[arg(short, long)]
        slot: u8,

        /// Exercise identifier
        #[arg(short, long)]
        exercise: String,

        /// Pain before the exercise (0-10)
        #[arg(long)]
        pain_before: Option<u8>,

        /// Pain after the exercise (0-10)
        #[arg(long)]
        pain_after: Option<u8>,
    },

    /// Log a supplement dose
    Supplement {
        /// Supplement identifier from the configured plan
        #[arg(short, long)]
        id: String,

        /// Timing slot (fasting, breakfast, lunch, dinner, bedtime)
        #[arg(short, long)]
        slot: SupplementSlot,

        /// Record the dose as skipped
        #[arg(long)]
        skipped: bool,
    },

    /// Log last night's sleep
    Sleep {
        /// Total hours slept
        #[arg(long)]
        hours: f64,

        /// Bedtime as HH:MM
        #[arg(long)]
        bed: String,
    },

    /// Log a pain entry
    Pain {
        /// Pain level (0-10)
        #[arg(short, long)]
        level: u8,

        /// Crepitation noticed
        #[arg(long)]
        crepitation: bool,

        /// Numbness at 45 degrees
        #[arg(long)]
        numbness: bool,

        /// Trigger, may be repeated
        #[arg(short, long)]
        trigger: Vec<String>,
    },

    /// Log a range-of-motion measurement
    Rom {
        /// Flexion in degrees
        #[arg(short, long)]
        flexion: f64,

        /// Extension deficit in degrees
        #[arg(short, long, default_value = "0")]
        deficit: f64,

        /// Pronation in degrees
        #[arg(long)]
        pronation: Option<f64>,

        /// Supination in degrees
        #[arg(long)]
        supination: Option<f64>,

        /// Who measured (manual, camera, therapist)
        #[arg(long, default_value = "manual")]
        by: MeasuredBy,
    },

    /// Log mood and energy
    Mood {
        /// Mood (1-5)
        #[arg(short, long)]
        mood: u8,

        /// Energy (1-5)
        #[arg(short, long)]
        energy: u8,
    },

    /// Add a journal entry
    Journal {
        /// Entry text
        text: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_date_arg(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_local_date(s).map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<RehabError>() {
            Some(err) => eprintln!("{} {}", "Error:".red().bold(), err.user_message()),
            None => eprintln!("{} {:#}", "Error:".red().bold(), e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_or_default(cli.config.as_deref());

    let mut logging = config.logging.clone();
    if let Some(level) = cli.log_level {
        logging.level = level;
    }
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    init_logging(&logging.with_verbosity(cli.verbose)).context("Failed to initialize logging")?;

    let clock: Arc<dyn Clock> = match cli.date {
        Some(date) => Arc::new(FixedClock::at_date(date)),
        None => Arc::new(SystemClock),
    };
    debug!(today = %clock.today(), "Resolved evaluation date");

    match cli.command {
        Commands::Config { action } => run_config(action, cli.config.as_deref(), config),
        Commands::Log { record } => {
            let engine = open_engine(&config, clock.clone())?;
            let record = build_record(record, clock.as_ref());
            let kind = record.record_type();
            let id = engine.store().add(record).context("Failed to store record")?;
            println!("{} {} record {}", "✓".green().bold(), kind, id.to_string().dimmed());

            let snapshot = engine.recompute()?;
            print_unlocks(&snapshot);
            Ok(())
        }
        command => {
            let engine = open_engine(&config, clock)?;
            if matches!(command, Commands::Challenges { breathing_done: true }) {
                engine.set_breathing_done(true);
            }
            let snapshot = engine.recompute()?;

            match command {
                Commands::Status { json: true } => {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
                Commands::Status { json: false } => print_status(&snapshot),
                Commands::Score => print_score(&snapshot),
                Commands::Forecast => print_forecast(&snapshot),
                Commands::Streak => print_streak(&snapshot),
                Commands::Tips => print_tips(&snapshot),
                Commands::Challenges { .. } => print_challenges(&snapshot),
                Commands::Achievements => print_achievements(&engine, &snapshot),
                Commands::Reminders => print_reminders(&snapshot),
                Commands::Log { .. } | Commands::Config { .. } => {}
            }

            print_unlocks(&snapshot);
            Ok(())
        }
    }
}

fn open_engine(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<RecoveryEngine> {
    let settings = &config.settings;
    fs::create_dir_all(&settings.data_dir).with_context(|| {
        format!("Failed to create data directory: {}", settings.data_dir.display())
    })?;

    let db_path = settings.database_path();
    let store = SqliteLogStore::open(&db_path)
        .with_context(|| format!("Failed to open log database: {}", db_path.display()))?;
    let prefs = PreferenceState::open(Box::new(JsonFilePreferenceStore::new(
        settings.preferences_path(),
    )));
    let engine_settings =
        EngineSettings::from_program(&config.program).context("Invalid rehab program")?;

    Ok(RecoveryEngine::new(
        Arc::new(store),
        Arc::new(prefs),
        clock,
        Arc::new(TracingDispatcher),
        engine_settings,
    ))
}

fn build_record(command: LogCommand, clock: &dyn Clock) -> LogRecord {
    let date = clock.today();

    match command {
        LogCommand::Session {
            slot,
            exercise,
            pain_before,
            pain_after,
        } => ExerciseSessionLog {
            date,
            session_slot: slot,
            exercise_id: exercise,
            pain_before,
            pain_after,
        }
        .into(),
        LogCommand::Supplement { id, slot, skipped } => SupplementLog {
            date,
            slot,
            supplement_id: id,
            taken: !skipped,
            taken_at: (!skipped).then(|| clock.now()),
        }
        .into(),
        LogCommand::Sleep { hours, bed } => SleepLog {
            date,
            total_hours: hours,
            bed_time: bed,
        }
        .into(),
        LogCommand::Pain {
            level,
            crepitation,
            numbness,
            trigger,
        } => PainEntry {
            date,
            level,
            crepitation: Some(crepitation),
            triggers: trigger,
            numbness_45: Some(numbness),
        }
        .into(),
        LogCommand::Rom {
            flexion,
            deficit,
            pronation,
            supination,
            by,
        } => RomMeasurement {
            pronation,
            supination,
            ..RomMeasurement::from_angles(date, flexion, deficit, by)
        }
        .into(),
        LogCommand::Mood { mood, energy } => MoodEntry { date, mood, energy }.into(),
        LogCommand::Journal { text } => JournalEntry { date, text }.into(),
    }
}

fn run_config(action: ConfigCommand, path: Option<&Path>, mut config: AppConfig) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        ConfigCommand::Init { force } => {
            let target = path
                .map(Path::to_path_buf)
                .unwrap_or_else(AppConfig::default_config_path);
            if target.exists() && !force {
                println!(
                    "{} {} already exists (use --force to overwrite)",
                    "!".yellow().bold(),
                    target.display()
                );
                return Ok(());
            }
            config.save_to_file(&target)?;
            println!("{} Wrote {}", "✓".green().bold(), target.display());
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Component")]
    component: &'static str,
    #[tabled(rename = "Points")]
    points: u8,
    #[tabled(rename = "Max")]
    max: u8,
}

#[derive(Tabled)]
struct ChallengeRow {
    #[tabled(rename = "")]
    done: &'static str,
    #[tabled(rename = "Challenge")]
    title: String,
    #[tabled(rename = "XP")]
    xp: u32,
}

#[derive(Tabled)]
struct AchievementRow {
    #[tabled(rename = "")]
    status: &'static str,
    #[tabled(rename = "Achievement")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "XP")]
    xp: u32,
    #[tabled(rename = "Unlocked")]
    unlocked: String,
}

fn render<R: Tabled>(rows: Vec<R>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn print_status(snapshot: &EngineSnapshot) {
    println!(
        "{} {}",
        "Recovery status for".bold(),
        snapshot.today.to_string().cyan().bold()
    );
    if let Some(phase) = &snapshot.phase {
        println!(
            "Phase {}: {} (target {})",
            phase.number,
            phase.name.bold(),
            phase.target
        );
    }
    println!();
    print_score(snapshot);
    println!();
    print_streak(snapshot);
    println!();
    print_forecast(snapshot);
    println!();
    print_tips(snapshot);
    println!();
    print_challenges(snapshot);
    println!();
    println!("{} {} XP", snapshot.level.to_string().magenta().bold(), snapshot.level.total_xp);
}

fn print_score(snapshot: &EngineSnapshot) {
    let score = &snapshot.recovery_score;
    let total = score.to_string();
    let colored_total = match score.total {
        70..=100 => total.green(),
        40..=69 => total.yellow(),
        _ => total.red(),
    };
    println!("{} {}", "Recovery score:".bold(), colored_total.bold());

    let row = |component, points, max| ScoreRow { component, points, max };
    let rows = vec![
        row("Sessions", score.sessions, SESSIONS_MAX),
        row("Supplements", score.supplements, SUPPLEMENTS_MAX),
        row("Sleep", score.sleep, SLEEP_MAX),
        row("Pain", score.pain, PAIN_MAX),
        row("Range of motion", score.rom, ROM_MAX),
    ];
    println!("{}", render(rows));
}

fn print_forecast(snapshot: &EngineSnapshot) {
    let forecast = &snapshot.forecast;
    println!("{}", "Range of motion".bold());

    let Some(current) = forecast.current_arc else {
        println!("  No measurements yet. Log one with `rehabrs log rom`.");
        return;
    };

    let trajectory = forecast.trajectory.to_string();
    let trajectory = match forecast.trajectory {
        Trajectory::Ahead => trajectory.green(),
        Trajectory::OnTrack => trajectory.cyan(),
        Trajectory::Behind => trajectory.red(),
        Trajectory::Unknown => trajectory.dimmed(),
    };

    println!("  Current arc:   {:.0}° ({})", current, trajectory);
    println!("  Weekly gain:   {:+.1}°", forecast.weekly_gain);
    if let Some(projected) = forecast.projected_arc {
        println!("  In 4 weeks:    {:.0}°", projected);
    }

    let weeks = |w: Option<u32>| match w {
        Some(0) => "reached".green().to_string(),
        Some(w) => format!("~{} weeks", w),
        None => "-".dimmed().to_string(),
    };
    println!("  {:.0}° functional: {}", FUNCTIONAL_ARC, weeks(forecast.weeks_to_functional));
    println!("  {:.0}° normal:     {}", NORMAL_ARC, weeks(forecast.weeks_to_normal));
    println!("  Based on {} measurement(s)", forecast.measurements);
}

fn print_streak(snapshot: &EngineSnapshot) {
    let streak = &snapshot.streak;
    let mut line = format!(
        "{} {} day(s)",
        "Streak:".bold(),
        streak.display_streak.to_string().yellow().bold()
    );
    if streak.frozen {
        line.push_str(&format!(" {}", "(frozen)".cyan()));
    }
    if !streak.has_today {
        line.push_str(&format!(" {}", "- no session logged today".dimmed()));
    }
    println!("{}", line);
    println!(
        "  Freezes available: {}   Sessions: {}   Active days: {}",
        streak.freezes_available, streak.total_sessions, streak.active_days
    );
}

fn print_tips(snapshot: &EngineSnapshot) {
    println!("{}", "Tips".bold());
    if snapshot.tips.is_empty() {
        println!("  {}", "Nothing to flag today. Keep it up!".green());
        return;
    }
    for tip in &snapshot.tips {
        println!("  {} [{}] {}", tip.icon, tip.category.to_string().cyan(), tip.text);
    }
}

fn print_challenges(snapshot: &EngineSnapshot) {
    println!(
        "{} ({} XP earned)",
        "Daily challenges".bold(),
        snapshot.challenges.earned_xp()
    );
    let rows = snapshot
        .challenges
        .challenges
        .iter()
        .map(|c| ChallengeRow {
            done: if c.completed { "✓" } else { " " },
            title: c.title.clone(),
            xp: c.xp,
        })
        .collect();
    println!("{}", render::<ChallengeRow>(rows));
}

fn print_achievements(engine: &RecoveryEngine, snapshot: &EngineSnapshot) {
    let prefs = engine.preferences().get();
    let catalog = AchievementEngine::new();

    let level = &snapshot.level;
    println!("{} {} XP", level.to_string().magenta().bold(), level.total_xp);
    if let Some(next) = level.xp_to_next {
        println!("  {} XP to the next level", next);
    }

    let rows = catalog
        .catalog()
        .iter()
        .map(|def| {
            let unlocked_at = prefs.unlocked_achievements.get(def.id);
            AchievementRow {
                status: if unlocked_at.is_some() { "★" } else { "·" },
                name: def.name.to_string(),
                category: def.category.to_string(),
                xp: def.xp,
                unlocked: unlocked_at
                    .map(|at| at.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| def.description.to_string()),
            }
        })
        .collect();
    println!("{}", render::<AchievementRow>(rows));
}

fn print_reminders(snapshot: &EngineSnapshot) {
    if snapshot.reminders.is_empty() {
        println!("{}", "No sessions due.".green());
        return;
    }
    for reminder in &snapshot.reminders {
        let notification = reminder.to_notification();
        println!("{} {}: {}", "⏰".yellow(), notification.title.bold(), notification.body);
    }
}

fn print_unlocks(snapshot: &EngineSnapshot) {
    for unlock in &snapshot.unlocks {
        println!(
            "{} Achievement unlocked: {} (+{} XP)",
            "★".yellow().bold(),
            unlock.name.bold(),
            unlock.xp
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_flags_override_config() {
        let cli = Cli::try_parse_from([
            "rehabrs",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "score",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(matches!(cli.command, Commands::Score));

        assert!(Cli::try_parse_from(["rehabrs", "--log-format", "xml", "score"]).is_err());
    }
}
