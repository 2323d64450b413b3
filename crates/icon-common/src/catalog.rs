//! ICON model catalog: run schedules and parameter tables.
//!
//! The built-in catalog covers the DWD ICON family (`icon-global`, `icon-eu`,
//! `icon-d2`). Additional models, or overrides of the built-in ones, can be
//! loaded from a directory of YAML files with one model per file.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CatalogError, CatalogResult};
use crate::level::Level;
use crate::query::FieldQuery;
use crate::run::RunSchedule;

/// GRIB2 parameter identity (section 0 discipline, section 4 category/number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GribIdentity {
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
}

impl GribIdentity {
    pub const fn new(discipline: u8, category: u8, number: u8) -> Self {
        Self {
            discipline,
            category,
            number,
        }
    }
}

/// One entry of a model's parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// DWD short-name, e.g. `t_2m`.
    pub short_name: String,
    pub grib: GribIdentity,
    pub default_level: Level,
    /// Levels the parameter is published on. Empty means any level of the
    /// default level's kind.
    #[serde(default)]
    pub levels: Vec<Level>,
    #[serde(default)]
    pub units: String,
    /// Whether the parameter ships as a single-level file on the DWD server.
    #[serde(default = "default_true")]
    pub single_level: bool,
}

fn default_true() -> bool {
    true
}

impl ParameterDefinition {
    fn single(short_name: &str, grib: GribIdentity, level: Level, units: &str) -> Self {
        Self {
            short_name: short_name.to_string(),
            grib,
            default_level: level,
            levels: vec![level],
            units: units.to_string(),
            single_level: true,
        }
    }

    /// Whether `level` is one the parameter is published on.
    pub fn supports_level(&self, level: &Level) -> bool {
        if self.levels.is_empty() {
            return std::mem::discriminant(level) == std::mem::discriminant(&self.default_level);
        }
        self.levels.contains(level)
    }
}

/// DWD open-data naming for a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwdNaming {
    /// Directory below `weather/nwp/`, e.g. `icon-eu`.
    pub directory: String,
    /// File name template. Placeholders: `{run_id}` (YYYYMMDDHH), `{step}`
    /// (zero-padded to three digits), `{var}` and `{VAR}` (lower/upper case
    /// short-name).
    pub file_template: String,
    /// Template of per-level files for model-level parameters; the same
    /// placeholders plus `{level}`. `None` when the model publishes none.
    #[serde(default)]
    pub model_level_template: Option<String>,
}

impl DwdNaming {
    pub fn file_name(&self, run_id: &str, step: u32, variable: &str) -> String {
        fill_template(&self.file_template, run_id, step, variable)
    }

    /// File holding `variable` on model level `level`.
    pub fn model_level_file_name(
        &self,
        run_id: &str,
        step: u32,
        level: u32,
        variable: &str,
    ) -> Option<String> {
        let template = self.model_level_template.as_ref()?;
        Some(fill_template(template, run_id, step, variable).replace("{level}", &level.to_string()))
    }
}

fn fill_template(template: &str, run_id: &str, step: u32, variable: &str) -> String {
    template
        .replace("{run_id}", run_id)
        .replace("{step}", &format!("{:03}", step))
        .replace("{var}", &variable.to_ascii_lowercase())
        .replace("{VAR}", &variable.to_ascii_uppercase())
}

/// Everything known about one ICON model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    pub schedule: RunSchedule,
    /// Longest forecast step in hours.
    pub max_step: u32,
    /// Last hourly step; later steps come every `coarse_step_hours`.
    /// `None` means hourly up to `max_step`.
    #[serde(default)]
    pub hourly_until: Option<u32>,
    #[serde(default = "default_coarse_step_hours")]
    pub coarse_step_hours: u32,
    pub dwd: DwdNaming,
    pub parameters: Vec<ParameterDefinition>,
}

fn default_coarse_step_hours() -> u32 {
    3
}

impl ModelDefinition {
    pub fn parameter(&self, short_name: &str) -> Option<&ParameterDefinition> {
        self.parameters
            .iter()
            .find(|p| p.short_name.eq_ignore_ascii_case(short_name))
    }

    /// Find the parameter a decoded GRIB message belongs to.
    ///
    /// Several ICON parameters share one GRIB identity and differ only by
    /// level (`t_2m`, `t_g`, `t`), so the level is used to disambiguate when
    /// known. Falls back to the first identity match.
    pub fn identify(&self, grib: GribIdentity, level: Option<&Level>) -> Option<&ParameterDefinition> {
        let mut candidates = self.parameters.iter().filter(|p| p.grib == grib);
        let first = candidates.clone().next();
        match level {
            Some(level) => candidates.find(|p| p.supports_level(level)).or(first),
            None => first,
        }
    }

    /// Whether the model publishes output at `step`.
    pub fn is_published_step(&self, step: u32) -> bool {
        if step > self.max_step {
            return false;
        }
        match self.hourly_until {
            Some(hourly) if step > hourly => (step - hourly) % self.coarse_step_hours.max(1) == 0,
            _ => true,
        }
    }

    pub fn check_step(&self, step: u32) -> CatalogResult<()> {
        if step > self.max_step {
            return Err(CatalogError::InvalidStep(format!(
                "step {} exceeds {}'s maximum of {}",
                step, self.name, self.max_step
            )));
        }
        if !self.is_published_step(step) {
            return Err(CatalogError::InvalidStep(format!(
                "{} publishes every {} h after step {}, not at step {}",
                self.name,
                self.coarse_step_hours,
                self.hourly_until.unwrap_or(self.max_step),
                step
            )));
        }
        Ok(())
    }

    /// Published steps within `from..=to`, ascending.
    pub fn published_steps(&self, from: u32, to: u32) -> Vec<u32> {
        (from..=to.min(self.max_step))
            .filter(|step| self.is_published_step(*step))
            .collect()
    }

    /// The step of the run at `reference_time` that is valid at `valid_time`.
    pub fn step_for_valid_time(
        &self,
        reference_time: DateTime<Utc>,
        valid_time: DateTime<Utc>,
    ) -> CatalogResult<u32> {
        let lead = (valid_time - reference_time).num_seconds();
        if lead < 0 {
            return Err(CatalogError::InvalidStep(format!(
                "valid time {} is before run {}",
                valid_time.to_rfc3339(),
                reference_time.to_rfc3339()
            )));
        }
        if lead % 3600 != 0 {
            return Err(CatalogError::InvalidStep(format!(
                "valid time {} is not a whole number of hours after run {}",
                valid_time.to_rfc3339(),
                reference_time.to_rfc3339()
            )));
        }
        let step = u32::try_from(lead / 3600).map_err(|_| {
            CatalogError::InvalidStep(format!("valid time {} is out of range", valid_time.to_rfc3339()))
        })?;
        self.check_step(step)?;
        Ok(step)
    }

    /// Short-names of the parameters shipped as single-level DWD files.
    pub fn single_level_parameters(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters.iter().filter(|p| p.single_level)
    }
}

/// A query resolved against the catalog: parameter definition plus the
/// concrete level to look up.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub parameter: ParameterDefinition,
    pub level: Level,
}

/// Collection of model definitions keyed by model name.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, ModelDefinition>,
}

impl ModelCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in ICON family catalog.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(icon_global());
        catalog.insert(icon_eu());
        catalog.insert(icon_d2());
        catalog
    }

    /// Built-in catalog extended with every `*.yaml`/`*.yml` in `dir`.
    ///
    /// A missing directory is not an error; the built-in catalog is returned.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> CatalogResult<Self> {
        let dir = dir.as_ref();
        let mut catalog = Self::builtin();

        if !dir.exists() {
            warn!(dir = %dir.display(), "Model catalog directory does not exist, using built-in models");
            return Ok(catalog);
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| CatalogError::Load(format!("{}: {}", dir.display(), e)))?;

        for entry in entries {
            let path = entry
                .map_err(|e| CatalogError::Load(e.to_string()))?
                .path();
            let is_yaml = path
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            let content = std::fs::read_to_string(&path)
                .map_err(|e| CatalogError::Load(format!("{}: {}", path.display(), e)))?;
            let model: ModelDefinition = serde_yaml::from_str(&content)
                .map_err(|e| CatalogError::Load(format!("{}: {}", path.display(), e)))?;

            info!(
                model = %model.name,
                parameters = model.parameters.len(),
                path = %path.display(),
                "Loaded model definition"
            );
            catalog.insert(model);
        }

        Ok(catalog)
    }

    /// Add or replace a model definition.
    pub fn insert(&mut self, model: ModelDefinition) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn model(&self, name: &str) -> CatalogResult<&ModelDefinition> {
        self.models
            .get(name)
            .ok_or_else(|| CatalogError::UnknownModel(name.to_string()))
    }

    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a query's parameter and level against a model's table.
    ///
    /// Fails with `UnknownModel`, `UnknownParameter` or `UnsupportedLevel`;
    /// never touches the network or the file system.
    pub fn resolve(&self, model: &str, query: &FieldQuery) -> CatalogResult<ResolvedField> {
        let definition = self.model(model)?;
        let parameter = definition.parameter(&query.parameter).ok_or_else(|| {
            CatalogError::UnknownParameter {
                model: model.to_string(),
                parameter: query.parameter.clone(),
            }
        })?;

        let level = query.level.unwrap_or(parameter.default_level);
        if !parameter.supports_level(&level) {
            return Err(CatalogError::UnsupportedLevel {
                parameter: parameter.short_name.clone(),
                level: level.to_string(),
            });
        }

        Ok(ResolvedField {
            parameter: parameter.clone(),
            level,
        })
    }
}

/// Single-level parameters published for every ICON model.
fn common_parameters() -> Vec<ParameterDefinition> {
    use Level::*;
    vec![
        ParameterDefinition::single("t_2m", GribIdentity::new(0, 0, 0), HeightAboveGround(2), "K"),
        ParameterDefinition::single("td_2m", GribIdentity::new(0, 0, 6), HeightAboveGround(2), "K"),
        ParameterDefinition::single("t_g", GribIdentity::new(0, 0, 0), Surface, "K"),
        ParameterDefinition::single("relhum_2m", GribIdentity::new(0, 1, 1), HeightAboveGround(2), "%"),
        ParameterDefinition::single("tot_prec", GribIdentity::new(0, 1, 52), Surface, "kg m-2"),
        ParameterDefinition::single("u_10m", GribIdentity::new(0, 2, 2), HeightAboveGround(10), "m s-1"),
        ParameterDefinition::single("v_10m", GribIdentity::new(0, 2, 3), HeightAboveGround(10), "m s-1"),
        ParameterDefinition::single("vmax_10m", GribIdentity::new(0, 2, 22), HeightAboveGround(10), "m s-1"),
        ParameterDefinition::single("ps", GribIdentity::new(0, 3, 0), Surface, "Pa"),
        ParameterDefinition::single("pmsl", GribIdentity::new(0, 3, 1), MeanSeaLevel, "Pa"),
        ParameterDefinition::single("clct", GribIdentity::new(0, 6, 1), Surface, "%"),
        ParameterDefinition::single("aswdir_s", GribIdentity::new(0, 4, 198), Surface, "W m-2"),
        ParameterDefinition::single("aswdifd_s", GribIdentity::new(0, 4, 199), Surface, "W m-2"),
    ]
}

fn model_level_temperature(default_level: u32) -> ParameterDefinition {
    ParameterDefinition {
        short_name: "t".to_string(),
        grib: GribIdentity::new(0, 0, 0),
        default_level: Level::ModelLevel(default_level),
        levels: Vec::new(),
        units: "K".to_string(),
        single_level: false,
    }
}

fn icon_global() -> ModelDefinition {
    let mut parameters = common_parameters();
    parameters.push(model_level_temperature(120));
    ModelDefinition {
        name: "icon-global".to_string(),
        schedule: RunSchedule::new(6, 4),
        max_step: 180,
        hourly_until: Some(78),
        coarse_step_hours: 3,
        dwd: DwdNaming {
            directory: "icon".to_string(),
            file_template: "icon_global_icosahedral_single-level_{run_id}_{step}_{VAR}.grib2.bz2"
                .to_string(),
            model_level_template: Some(
                "icon_global_icosahedral_model-level_{run_id}_{step}_{level}_{VAR}.grib2.bz2"
                    .to_string(),
            ),
        },
        parameters,
    }
}

fn icon_eu() -> ModelDefinition {
    let mut parameters = common_parameters();
    parameters.push(model_level_temperature(74));
    ModelDefinition {
        name: "icon-eu".to_string(),
        schedule: RunSchedule::new(3, 2),
        max_step: 120,
        hourly_until: Some(78),
        coarse_step_hours: 3,
        dwd: DwdNaming {
            directory: "icon-eu".to_string(),
            file_template:
                "icon-eu_europe_regular-lat-lon_single-level_{run_id}_{step}_{VAR}.grib2.bz2"
                    .to_string(),
            model_level_template: Some(
                "icon-eu_europe_regular-lat-lon_model-level_{run_id}_{step}_{level}_{VAR}.grib2.bz2"
                    .to_string(),
            ),
        },
        parameters,
    }
}

fn icon_d2() -> ModelDefinition {
    let mut parameters = common_parameters();
    parameters.push(model_level_temperature(65));
    ModelDefinition {
        name: "icon-d2".to_string(),
        schedule: RunSchedule::new(3, 2),
        max_step: 48,
        hourly_until: None,
        coarse_step_hours: 1,
        dwd: DwdNaming {
            directory: "icon-d2".to_string(),
            file_template:
                "icon-d2_germany_regular-lat-lon_single-level_{run_id}_{step}_2d_{var}.grib2.bz2"
                    .to_string(),
            model_level_template: Some(
                "icon-d2_germany_regular-lat-lon_model-level_{run_id}_{step}_{level}_{var}.grib2.bz2"
                    .to_string(),
            ),
        },
        parameters,
    }
}
