use std::env;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::history::UndoStack;
use crate::placement::PlacementConfig;
use crate::scenario::ScenarioOptions;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub log: LogConfig,
    pub placement: PlacementSettings,
    pub scenario: ScenarioConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    ///
    /// Warnings about invalid values are emitted through `tracing`, so the
    /// subscriber should be installed from [`LogConfig::from_env`] first.
    pub fn from_env() -> Self {
        Self {
            log: LogConfig::from_env(),
            placement: PlacementSettings::from_env(),
            scenario: ScenarioConfig::from_env(),
        }
    }

    pub fn scenario_options(&self) -> ScenarioOptions {
        ScenarioOptions {
            placement: self.placement.placement_config(),
            history_limit: self.placement.history_limit(),
            stop_on_error: self.scenario.stop_on_error(),
        }
    }
}

/// Filter directive for the log output.
#[derive(Clone, Debug)]
pub struct LogConfig {
    filter: String,
}

impl LogConfig {
    const DEFAULT_FILTER: &'static str = "info";
    const FILTER_VAR: &'static str = "STACK_IT_NOW_LOG";

    pub fn from_env() -> Self {
        let filter = env_string(Self::FILTER_VAR).unwrap_or_else(|| Self::DEFAULT_FILTER.to_string());
        Self { filter }
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Tolerances of the placement engine and the undo depth.
#[derive(Clone, Debug)]
pub struct PlacementSettings {
    placement: PlacementConfig,
    history_limit: usize,
}

impl PlacementSettings {
    const CELL_SIZE_VAR: &'static str = "STACK_IT_NOW_CELL_SIZE";
    const HEIGHT_EPSILON_VAR: &'static str = "STACK_IT_NOW_HEIGHT_EPSILON";
    const DRAG_OFFSET_VAR: &'static str = "STACK_IT_NOW_DRAG_OFFSET";
    const HISTORY_LIMIT_VAR: &'static str = "STACK_IT_NOW_HISTORY_LIMIT";

    fn from_env() -> Self {
        let cell_size = load_f64_with_warning(
            Self::CELL_SIZE_VAR,
            PlacementConfig::DEFAULT_CELL_SIZE,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted cell size must match the cell size the models were built with",
        );

        let height_epsilon = load_f64_with_warning(
            Self::HEIGHT_EPSILON_VAR,
            PlacementConfig::DEFAULT_HEIGHT_EPSILON,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted height tolerance may merge or split support levels",
        );

        let drag_offset = load_f64_with_warning(
            Self::DRAG_OFFSET_VAR,
            PlacementConfig::DEFAULT_DRAG_OFFSET,
            |value| value >= 0.0,
            "must not be negative",
            "Adjusted drag lift",
        );

        let history_limit = match env_string(Self::HISTORY_LIMIT_VAR) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(value) if value >= 1 => value,
                Ok(_) => {
                    warn!(
                        "{} must be at least 1. Using {}.",
                        Self::HISTORY_LIMIT_VAR,
                        UndoStack::<()>::DEFAULT_LIMIT
                    );
                    UndoStack::<()>::DEFAULT_LIMIT
                }
                Err(err) => {
                    warn!(
                        "Could not parse {} ('{}'): {}. Using {}.",
                        Self::HISTORY_LIMIT_VAR,
                        raw,
                        err,
                        UndoStack::<()>::DEFAULT_LIMIT
                    );
                    UndoStack::<()>::DEFAULT_LIMIT
                }
            },
            None => UndoStack::<()>::DEFAULT_LIMIT,
        };

        let placement = PlacementConfig::builder()
            .cell_size(cell_size)
            .height_epsilon(height_epsilon)
            .drag_offset(drag_offset)
            .build();

        Self {
            placement,
            history_limit,
        }
    }

    pub fn placement_config(&self) -> PlacementConfig {
        self.placement
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }
}

/// Where to find a scenario when none is given on the command line.
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    path: Option<PathBuf>,
    stop_on_error: bool,
}

impl ScenarioConfig {
    const PATH_VAR: &'static str = "STACK_IT_NOW_SCENARIO";
    const STOP_ON_ERROR_VAR: &'static str = "STACK_IT_NOW_STOP_ON_ERROR";

    fn from_env() -> Self {
        let path = env_string(Self::PATH_VAR).map(PathBuf::from);
        let stop_on_error = env_string(Self::STOP_ON_ERROR_VAR)
            .and_then(|raw| parse_bool(&raw, Self::STOP_ON_ERROR_VAR))
            .unwrap_or(false);
        Self {
            path,
            stop_on_error,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn stop_on_error(&self) -> bool {
        self.stop_on_error
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!("Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            warn!(
                "Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name, other
            );
            None
        }
    }
}

fn parse_f64_with_warning(
    var_name: &str,
    raw: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    notice: &str,
) -> f64 {
    match raw.parse::<f64>() {
        Ok(value) if !value.is_finite() || !validator(value) => {
            warn!(
                "{} contains invalid value '{}': {}. Using {}.",
                var_name, raw, invalid_hint, default
            );
            default
        }
        Ok(value) => {
            let tolerance = (default.abs().max(1.0)) * 1e-9;
            if (value - default).abs() > tolerance {
                info!("{} ({} = {}).", notice, var_name, value);
            }
            value
        }
        Err(err) => {
            warn!(
                "Could not parse {} ('{}') as number: {}. Using {}.",
                var_name, raw, err, default
            );
            default
        }
    }
}

fn load_f64_with_warning(
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    notice: &str,
) -> f64 {
    match env_string(var_name) {
        Some(raw) => parse_f64_with_warning(var_name, &raw, default, validator, invalid_hint, notice),
        None => default,
    }
}
