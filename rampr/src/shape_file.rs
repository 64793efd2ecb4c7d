use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use rampr_core::{CapacityThresholds, PayloadMetric, Preset, StageDef};
use serde::Deserialize;

/// On-disk load shape definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ShapeFile {
    pub name: String,

    /// The single target, or the defaults every entry of `targets` inherits.
    #[serde(default)]
    pub target: TargetYaml,

    /// Named endpoints each virtual user rotates through, one request per target.
    #[serde(default)]
    pub targets: Vec<NamedTargetYaml>,

    #[serde(default)]
    pub preset: Option<String>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub thresholds: CapacityThresholds,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TargetYaml {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request bodies, sent round-robin. Relative paths resolve against the shape file.
    #[serde(default)]
    pub body_files: Vec<PathBuf>,

    /// Inline body, used when `body_files` is empty.
    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub size_sample: Option<SizeSampleYaml>,

    /// Pause between a virtual user's requests, drawn uniformly from `[min, max]`.
    #[serde(default)]
    pub think_time: Option<ThinkTimeYaml>,
}

impl Default for TargetYaml {
    fn default() -> Self {
        Self {
            url: None,
            method: default_method(),
            headers: BTreeMap::new(),
            body_files: Vec::new(),
            body: None,
            timeout: None,
            size_sample: None,
            think_time: None,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// One endpoint of a rotation. Unset fields fall back to `target`; `headers` are merged
/// over `target.headers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NamedTargetYaml {
    pub name: String,

    /// Absolute `http://` URL, or a reference resolved against `target.url` like a link.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body_files: Vec<PathBuf>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub size_sample: Option<SizeSampleYaml>,
}

/// Where in each JSON request body the size sample lives, and how to measure it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SizeSampleYaml {
    /// JSON pointer, e.g. `/audio/0/audioContent`.
    pub pointer: String,
    pub metric: PayloadMetric,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ThinkTimeYaml {
    pub min: YamlDuration,
    pub max: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub label: String,
    /// Offset from run start at which the stage ends.
    pub end_offset: YamlDuration,
    pub target_concurrency: u64,
    pub ramp_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 2m), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|_| E::custom(format!("invalid duration in seconds: {v}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v.trim())
                    .map(YamlDuration)
                    .map_err(|e| E::custom(format!("invalid duration `{v}`: {e}")))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// One request target after CLI overrides, still unread from disk.
#[derive(Debug, Clone)]
pub(crate) struct TargetSpec {
    /// Set when the shape rotates over named targets.
    pub name: Option<String>,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body_files: Vec<PathBuf>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
    pub size_sample: Option<SizeSampleYaml>,
}

/// A shape file with overrides applied and thresholds validated.
#[derive(Debug, Clone)]
pub(crate) struct LoadShape {
    pub name: String,
    pub stages: Vec<StageDef>,
    pub thresholds: CapacityThresholds,
    pub target: TargetYaml,
    pub targets: Vec<NamedTargetYaml>,
    /// Directory relative body paths resolve against.
    pub base_dir: PathBuf,
}

impl LoadShape {
    /// The requests to send, in rotation order. Fails when a target has no URL.
    pub(crate) fn target_specs(&self) -> anyhow::Result<Vec<TargetSpec>> {
        if self.targets.is_empty() {
            let url = self.target.url.clone().with_context(|| {
                "no target URL: set `target.url`, pass --url, or export RAMPR_TARGET_URL"
            })?;
            return Ok(vec![TargetSpec {
                name: None,
                url,
                method: self.target.method.clone(),
                headers: self
                    .target
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                body_files: self.body_paths(&self.target.body_files),
                body: self.target.body.clone(),
                timeout: self.target.timeout.map(YamlDuration::into_inner),
                size_sample: self.target.size_sample.clone(),
            }]);
        }

        self.targets.iter().map(|t| self.named_spec(t)).collect()
    }

    fn named_spec(&self, t: &NamedTargetYaml) -> anyhow::Result<TargetSpec> {
        let url = resolve_url(self.target.url.as_deref(), t.url.as_deref())
            .with_context(|| format!("target `{}`", t.name))?;

        let mut headers = self.target.headers.clone();
        headers.extend(t.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let (body_files, body) = if t.body_files.is_empty() && t.body.is_none() {
            (&self.target.body_files, self.target.body.clone())
        } else {
            (&t.body_files, t.body.clone())
        };

        Ok(TargetSpec {
            name: Some(t.name.clone()),
            url,
            method: t.method.clone().unwrap_or_else(|| self.target.method.clone()),
            headers: headers.into_iter().collect(),
            body_files: self.body_paths(body_files),
            body,
            timeout: t.timeout.or(self.target.timeout).map(YamlDuration::into_inner),
            size_sample: t.size_sample.clone().or_else(|| self.target.size_sample.clone()),
        })
    }

    fn body_paths(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths.iter().map(|p| self.base_dir.join(p)).collect()
    }

    pub(crate) fn think_time(&self) -> anyhow::Result<Option<(Duration, Duration)>> {
        match self.target.think_time {
            Some(t) if t.min > t.max => {
                anyhow::bail!("`target.think_time.min` must not exceed `max`")
            }
            Some(t) => Ok(Some((t.min.into_inner(), t.max.into_inner()))),
            None => Ok(None),
        }
    }

    /// The one size metric of the run; `resolve` guarantees every target agrees on it.
    pub(crate) fn payload_metric(&self) -> Option<PayloadMetric> {
        self.size_samples().next().map(|s| s.metric)
    }

    fn size_samples(&self) -> impl Iterator<Item = &SizeSampleYaml> {
        self.target
            .size_sample
            .iter()
            .chain(self.targets.iter().filter_map(|t| t.size_sample.as_ref()))
    }

    /// One line naming what the run sends traffic to.
    pub(crate) fn describe_target(&self) -> String {
        match self.targets.as_slice() {
            [] => match &self.target.url {
                Some(url) => format!("{} {url}", self.target.method),
                None => "(not set; pass --url or RAMPR_TARGET_URL)".to_string(),
            },
            targets => {
                let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
                format!("{} targets in rotation: {}", targets.len(), names.join(", "))
            }
        }
    }

    fn validate_targets(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for t in &self.targets {
            anyhow::ensure!(!t.name.trim().is_empty(), "target names must not be empty");
            anyhow::ensure!(
                seen.insert(t.name.as_str()),
                "target `{}` is defined twice",
                t.name
            );
        }

        let mut metrics = self.size_samples().map(|s| s.metric);
        if let Some(first) = metrics.next()
            && let Some(other) = metrics.find(|m| *m != first)
        {
            anyhow::bail!(
                "all size samples must use one metric, found both `{first}` and `{other}`"
            );
        }
        Ok(())
    }
}

/// `entry` as given when absolute, otherwise resolved against `base`.
fn resolve_url(base: Option<&str>, entry: Option<&str>) -> anyhow::Result<String> {
    match (base, entry) {
        (_, Some(entry)) if entry.contains("://") => Ok(entry.to_string()),
        (Some(base), Some(entry)) => {
            let base = url::Url::parse(base).with_context(|| format!("invalid url `{base}`"))?;
            Ok(base
                .join(entry)
                .with_context(|| format!("invalid url `{entry}`"))?
                .to_string())
        }
        (Some(base), None) => Ok(base.to_string()),
        (None, _) => anyhow::bail!(
            "no URL: set an absolute `url`, or a base in `target.url` (or --url / RAMPR_TARGET_URL)"
        ),
    }
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<ShapeFile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read shape file: {}", path.display()))?;
    parse(&raw).with_context(|| format!("invalid shape file: {}", path.display()))
}

pub(crate) fn parse(raw: &str) -> anyhow::Result<ShapeFile> {
    Ok(serde_yaml::from_str(raw)?)
}

impl ShapeFile {
    /// Applies CLI overrides. `preset` beats the file's `preset`/`stages`, `url` beats
    /// `target.url`.
    pub(crate) fn resolve(
        self,
        shape_path: &Path,
        preset: Option<Preset>,
        url: Option<&str>,
    ) -> anyhow::Result<LoadShape> {
        self.thresholds.validate()?;

        let stages = match (preset, self.preset.as_deref(), self.stages.is_empty()) {
            (Some(p), _, _) => p.stages(),
            (None, Some(_), false) => {
                anyhow::bail!("shape `{}` sets both `preset` and `stages`", self.name)
            }
            (None, Some(name), true) => name
                .parse::<Preset>()
                .map_err(|_| rampr_core::Error::UnknownPreset(name.to_string()))?
                .stages(),
            (None, None, _) => self
                .stages
                .iter()
                .map(|s| {
                    StageDef::new(
                        s.label.clone(),
                        s.end_offset.into_inner().as_secs_f64(),
                        s.target_concurrency,
                        s.ramp_rate,
                    )
                })
                .collect(),
        };

        let mut target = self.target;
        if let Some(url) = url {
            target.url = Some(url.to_string());
        }

        let shape = LoadShape {
            name: self.name,
            stages,
            thresholds: self.thresholds,
            target,
            targets: self.targets,
            base_dir: shape_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        shape.validate_targets()?;
        Ok(shape)
    }
}
