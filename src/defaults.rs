pub const DEFAULT_SCENARIO_DIR: &str = "samples/wuerzburg";

pub const DEFAULT_LOGS_DIR: &str = "./logs";

/// Clock ticks per real second
pub const DEFAULT_FREQUENCY: f64 = 1.0;

/// Simulated seconds per real second at one tick per second
pub const DEFAULT_WARP: f64 = 1.0;

pub const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Positions buffered per vehicle in streaming mode
pub const POSITION_BUFFER: usize = 64;
