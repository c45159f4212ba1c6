use std::path::{Path, PathBuf};

use serde::Serialize;

/// Whether a metric drives window discovery or is only merged afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Core,
    Additional,
}

/// How a metric's value is rendered in a unified row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Numeric,
    Flag,
}

/// Subsystem a metric belongs to, derived from its name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricGroup {
    Bms,
    Pcs,
    Aux,
    Env,
    Safety,
    Other,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 5] = [
        MetricGroup::Bms,
        MetricGroup::Pcs,
        MetricGroup::Aux,
        MetricGroup::Env,
        MetricGroup::Safety,
    ];

    pub fn of(metric: &str) -> Self {
        match metric.split('_').next() {
            Some("bms") => MetricGroup::Bms,
            Some("pcs") => MetricGroup::Pcs,
            Some("aux") => MetricGroup::Aux,
            Some("env") => MetricGroup::Env,
            Some("safety") => MetricGroup::Safety,
            _ => MetricGroup::Other,
        }
    }
}

/// One logical metric and the per-device file it is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub file: &'static str,
    pub tier: Tier,
    pub kind: MetricKind,
}

impl MetricSpec {
    pub const fn core(name: &'static str, file: &'static str) -> Self {
        Self {
            name,
            file,
            tier: Tier::Core,
            kind: MetricKind::Numeric,
        }
    }

    pub const fn additional(name: &'static str, file: &'static str) -> Self {
        Self {
            name,
            file,
            tier: Tier::Additional,
            kind: MetricKind::Numeric,
        }
    }

    pub const fn flag(self) -> Self {
        Self {
            kind: MetricKind::Flag,
            ..self
        }
    }
}

/// A metric resolved against a concrete device directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSource {
    pub spec: MetricSpec,
    pub path: PathBuf,
}

const BESS_CORE: &[MetricSpec] = &[
    // BMS headline KPIs
    MetricSpec::core("bms_soc", "bms1_soc.csv"),
    MetricSpec::core("bms_soh", "bms1_soh.csv"),
    MetricSpec::core("bms_voltage", "bms1_v.csv"),
    MetricSpec::core("bms_current", "bms1_c.csv"),
    MetricSpec::core("bms_cell_ave_v", "bms1_cell_ave_v.csv"),
    MetricSpec::core("bms_cell_ave_t", "bms1_cell_ave_t.csv"),
    // PCS
    MetricSpec::core("pcs_apparent_power", "pcs1_ap.csv"),
    MetricSpec::core("pcs_dc_voltage", "pcs1_dcv.csv"),
    MetricSpec::core("pcs_dc_current", "pcs1_dcc.csv"),
    MetricSpec::core("pcs_ac_current_a", "pcs1_ia.csv"),
    MetricSpec::core("pcs_ac_voltage_ab", "pcs1_uab.csv"),
    MetricSpec::core("pcs_temp_igbt", "pcs1_t_igbt.csv"),
    // Environment and thermal
    MetricSpec::core("aux_outside_temp", "ac1_outside_t.csv"),
    MetricSpec::core("env_humidity", "dh1_humi.csv"),
    MetricSpec::core("env_temperature", "dh1_temp.csv"),
];

const BESS_ADDITIONAL: &[MetricSpec] = &[
    MetricSpec::additional("bms_cell_max_v", "bms1_cell_max_v.csv"),
    MetricSpec::additional("bms_cell_min_v", "bms1_cell_min_v.csv"),
    MetricSpec::additional("bms_cell_v_diff", "bms1_cell_v_diff.csv"),
    MetricSpec::additional("bms_cell_t_diff", "bms1_cell_t_diff.csv"),
    MetricSpec::additional("pcs_ac_current_b", "pcs1_ib.csv"),
    MetricSpec::additional("pcs_ac_current_c", "pcs1_ic.csv"),
    MetricSpec::additional("pcs_ac_voltage_bc", "pcs1_ubc.csv"),
    MetricSpec::additional("pcs_ac_voltage_ca", "pcs1_uca.csv"),
    MetricSpec::additional("pcs_temp_environment", "pcs1_t_env.csv"),
    MetricSpec::additional("aux_outwater_temp", "ac1_outwater_t.csv"),
    MetricSpec::additional("aux_return_water_pressure", "ac1_rtnwater_pre.csv"),
    MetricSpec::additional("aux_power_apparent", "aux_m_ap.csv"),
    MetricSpec::additional("safety_smoke_flag", "fa1_smokeFlag.csv").flag(),
];

/// Static mapping from logical metric name to per-device CSV file.
///
/// The core and additional sets are disjoint; only core metrics take part in
/// automatic window discovery.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    core: Vec<MetricSpec>,
    additional: Vec<MetricSpec>,
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::bess()
    }
}

impl MetricCatalog {
    /// Catalog of the standard BESS deployment.
    pub fn bess() -> Self {
        Self::new(BESS_CORE.iter().chain(BESS_ADDITIONAL).copied())
    }

    /// Split specs into tiers by their `tier`, keeping declaration order. A
    /// name declared in both tiers is kept only in the core tier.
    pub fn new(specs: impl IntoIterator<Item = MetricSpec>) -> Self {
        let (core, additional): (Vec<MetricSpec>, Vec<MetricSpec>) =
            specs.into_iter().partition(|spec| spec.tier == Tier::Core);
        let additional = additional
            .into_iter()
            .filter(|spec| !core.iter().any(|c| c.name == spec.name))
            .collect();
        Self { core, additional }
    }

    pub fn core(&self) -> &[MetricSpec] {
        &self.core
    }

    pub fn additional(&self) -> &[MetricSpec] {
        &self.additional
    }

    /// Core metrics first, then additional ones, in declaration order.
    pub fn all(&self) -> impl Iterator<Item = &MetricSpec> {
        self.core.iter().chain(self.additional.iter())
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.additional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<&MetricSpec> {
        self.all().find(|spec| spec.name == name)
    }

    /// Resolve every metric to its file under `device_dir`. Whether the file
    /// exists is left to the loader.
    pub fn resolve(&self, device_dir: &Path) -> Vec<MetricSource> {
        self.all()
            .map(|spec| MetricSource {
                spec: *spec,
                path: device_dir.join(spec.file),
            })
            .collect()
    }

    pub fn resolve_core(&self, device_dir: &Path) -> Vec<MetricSource> {
        self.core
            .iter()
            .map(|spec| MetricSource {
                spec: *spec,
                path: device_dir.join(spec.file),
            })
            .collect()
    }
}
