use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use crate::{lattice::Grid, params::DEFAULT_VISCOSITY, velocity::StrokeTuning, Float};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// User actions replayed by the headless driver
    #[serde(default)]
    pub script: Vec<ScriptedAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    pub viscosity: Float,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self { viscosity: DEFAULT_VISCOSITY }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub frames: u64,
    pub dt: Float,
    pub backend: BackendKind,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            dt: 0.016,
            backend: BackendKind::Gpu,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub paint_radius: Float,
    pub paint_value: Float,
    pub stroke_radius: Float,
    pub stroke_gain: Float,
    pub max_stroke_strength: Float,
    pub min_pointer_motion: Float,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        let tuning = StrokeTuning::default();
        Self {
            paint_radius: 20.5,
            paint_value: 1.0,
            stroke_radius: tuning.radius,
            stroke_gain: tuning.gain,
            max_stroke_strength: tuning.max_strength,
            min_pointer_motion: tuning.min_motion,
        }
    }
}

impl InteractionConfig {
    pub fn stroke_tuning(&self) -> StrokeTuning {
        StrokeTuning {
            min_motion: self.min_pointer_motion,
            gain: self.stroke_gain,
            max_strength: self.max_stroke_strength,
            radius: self.stroke_radius,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_directory: String,
    pub output_frequency: u64,
    pub write_collection: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_directory: "output".to_string(),
            output_frequency: 60,
            write_collection: true,
        }
    }
}

/// A user action applied just before the given frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedAction {
    pub frame: u64,
    #[serde(flatten)]
    pub action: UserAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum UserAction {
    /// Click: paint with the configured brush unless overridden
    Paint {
        x: Float,
        y: Float,
        radius: Option<Float>,
        value: Option<Float>,
    },
    /// Pointer move
    Pointer { x: Float, y: Float },
    /// Slider
    Viscosity { value: Float },
    /// Button
    Reset,
}

impl Config {
    /// Defaults for a `width × height` grid.
    pub fn with_grid(width: u32, height: u32) -> Self {
        Self {
            grid: GridConfig { width, height },
            physics: PhysicsConfig::default(),
            simulation: SimulationConfig::default(),
            interaction: InteractionConfig::default(),
            output: OutputConfig::default(),
            script: Vec::new(),
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grid.width == 0 || self.grid.height == 0 {
            bail!("grid must be at least 1x1, got {}x{}", self.grid.width, self.grid.height);
        }
        let viscosity = self.physics.viscosity;
        if !viscosity.is_finite() || viscosity <= 0.0 {
            bail!("viscosity must be positive and finite, got {}", viscosity);
        }
        if !self.simulation.dt.is_finite() || self.simulation.dt <= 0.0 {
            bail!("dt must be positive, got {}", self.simulation.dt);
        }
        if self.output.output_frequency == 0 {
            bail!("output_frequency must be at least 1");
        }
        Ok(())
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.grid.width, self.grid.height)
    }

    /// Actions scheduled for `frame`, in file order.
    pub fn actions_at(&self, frame: u64) -> impl Iterator<Item = &UserAction> {
        self.script
            .iter()
            .filter(move |scripted| scripted.frame == frame)
            .map(|scripted| &scripted.action)
    }
}
