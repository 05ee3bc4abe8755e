//! Named query templates.
//!
//! Each query family starts from a template the builder clones and fills
//! in. Built-in templates ship with the crate; a deployment may override any
//! of them with `<family>.json` in a templates directory.

use std::fmt;
use std::path::Path;

use tracing::info;

use crate::dsl::DslQuery;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateFamily {
    GroupedQps,
    RoleDetail,
    HostDetail,
    HostPerfCurve,
}

impl TemplateFamily {
    pub const ALL: [TemplateFamily; 4] = [
        TemplateFamily::GroupedQps,
        TemplateFamily::RoleDetail,
        TemplateFamily::HostDetail,
        TemplateFamily::HostPerfCurve,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TemplateFamily::GroupedQps => "grouped_qps",
            TemplateFamily::RoleDetail => "role_detail",
            TemplateFamily::HostDetail => "host_detail",
            TemplateFamily::HostPerfCurve => "host_perf_curve",
        }
    }

    fn builtin_json(self) -> &'static str {
        match self {
            TemplateFamily::GroupedQps => include_str!("../templates/grouped_qps.json"),
            TemplateFamily::RoleDetail => include_str!("../templates/role_detail.json"),
            TemplateFamily::HostDetail => include_str!("../templates/host_detail.json"),
            TemplateFamily::HostPerfCurve => include_str!("../templates/host_perf_curve.json"),
        }
    }
}

impl fmt::Display for TemplateFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The four templates, one per family.
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    grouped_qps: DslQuery,
    role_detail: DslQuery,
    host_detail: DslQuery,
    host_perf_curve: DslQuery,
}

impl QueryTemplates {
    /// The templates compiled into the crate.
    pub fn builtin() -> Result<Self> {
        let builtin = |family: TemplateFamily| parse(family, family.builtin_json());
        Ok(Self {
            grouped_qps: builtin(TemplateFamily::GroupedQps)?,
            role_detail: builtin(TemplateFamily::RoleDetail)?,
            host_detail: builtin(TemplateFamily::HostDetail)?,
            host_perf_curve: builtin(TemplateFamily::HostPerfCurve)?,
        })
    }

    /// Built-in templates, each replaced by `<dir>/<family>.json` when that
    /// file exists.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut templates = Self::builtin()?;
        let Some(dir) = dir else {
            return Ok(templates);
        };

        for family in TemplateFamily::ALL {
            let path = dir.join(format!("{}.json", family.name()));
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::configuration(format!("cannot read {}: {e}", path.display()))
            })?;
            templates = templates.with_template(family, parse(family, &text)?);
            info!(template = %family, path = %path.display(), "query template overridden");
        }
        Ok(templates)
    }

    /// The template for `family`. Callers clone before filling it in.
    pub fn get(&self, family: TemplateFamily) -> &DslQuery {
        match family {
            TemplateFamily::GroupedQps => &self.grouped_qps,
            TemplateFamily::RoleDetail => &self.role_detail,
            TemplateFamily::HostDetail => &self.host_detail,
            TemplateFamily::HostPerfCurve => &self.host_perf_curve,
        }
    }

    /// Replace one family's template.
    pub fn with_template(mut self, family: TemplateFamily, template: DslQuery) -> Self {
        let slot = match family {
            TemplateFamily::GroupedQps => &mut self.grouped_qps,
            TemplateFamily::RoleDetail => &mut self.role_detail,
            TemplateFamily::HostDetail => &mut self.host_detail,
            TemplateFamily::HostPerfCurve => &mut self.host_perf_curve,
        };
        *slot = template;
        self
    }
}

fn parse(family: TemplateFamily, text: &str) -> Result<DslQuery> {
    serde_json::from_str(text)
        .map_err(|e| PipelineError::configuration(format!("template {family} is not valid: {e}")))
}
