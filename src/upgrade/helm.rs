//! Helm release storage decoding, values merging and `HelmChart` builders.

use std::collections::BTreeMap;
use std::io::Read;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::GzDecoder;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::Settings;
use crate::crd::ReleaseChart;
use crate::error::{Result, RuoError};
use crate::external::{HelmChart, HelmChartSpec};

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const BACKOFF_LIMIT: i32 = 6;

/// The parts of an installed Helm release the operator needs.
#[derive(Clone, Debug, PartialEq)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    pub revision: i64,
    pub chart_version: String,
    /// User supplied values of the installed revision.
    pub config: Map<String, Value>,
}

#[derive(Deserialize)]
struct StoredRelease {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    version: i64,
    chart: Option<StoredChart>,
    #[serde(default)]
    config: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct StoredChart {
    metadata: Option<StoredMetadata>,
}

#[derive(Deserialize)]
struct StoredMetadata {
    #[serde(default)]
    version: String,
}

/// Label selector matching every stored revision of a release.
pub fn storage_selector(release: &str) -> String {
    format!("owner=helm,name={release}")
}

/// Decode a Helm v3 storage Secret (base64, optionally gzipped JSON).
pub fn decode_release(release: &str, secret: &Secret) -> Result<HelmRelease> {
    let fail = |reason: String| RuoError::HelmRelease {
        release: release.to_string(),
        reason,
    };

    let payload = secret
        .data
        .as_ref()
        .and_then(|d| d.get("release"))
        .ok_or_else(|| fail("storage secret has no 'release' key".to_string()))?;

    let encoded: Vec<u8> = payload
        .0
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let mut raw = BASE64
        .decode(encoded)
        .map_err(|e| fail(format!("base64: {e}")))?;

    if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|e| fail(format!("gzip: {e}")))?;
        raw = inflated;
    }

    let stored: StoredRelease =
        serde_json::from_slice(&raw).map_err(|e| fail(format!("json: {e}")))?;

    Ok(HelmRelease {
        name: stored.name,
        namespace: stored.namespace,
        revision: stored.version,
        chart_version: stored
            .chart
            .and_then(|c| c.metadata)
            .map(|m| m.version)
            .unwrap_or_default(),
        config: stored.config.unwrap_or_default(),
    })
}

/// Decode the highest revision among the storage Secrets of a release.
pub fn latest_release(release: &str, secrets: &[Secret]) -> Result<Option<HelmRelease>> {
    secrets
        .iter()
        .max_by_key(|s| {
            s.labels()
                .get("version")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or_default()
        })
        .map(|s| decode_release(release, s))
        .transpose()
}

/// Values already applied to a chart, before the release and user layers.
pub enum BaseValues<'a> {
    /// `valuesContent` of an existing `HelmChart`.
    Yaml(&'a str),
    /// Config of the installed Helm release.
    Map(&'a Map<String, Value>),
}

fn as_object(value: Option<&Value>, layer: &str) -> Result<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(RuoError::ChartValues(format!(
            "{layer} values must be an object, got {other}"
        ))),
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        if let Value::Object(overlay_inner) = value {
            if let Some(Value::Object(inner)) = base.get_mut(&key) {
                merge_maps(inner, overlay_inner);
                continue;
            }
            base.insert(key, Value::Object(overlay_inner));
        } else {
            base.insert(key, value);
        }
    }
}

/// Merge base, release and user values (later layers win) into YAML.
/// Returns an empty string when there are no values at all.
pub fn merge_values(
    base: &BaseValues<'_>,
    release: Option<&Value>,
    user: Option<&Value>,
) -> Result<String> {
    let mut values = match base {
        BaseValues::Map(map) => (*map).clone(),
        BaseValues::Yaml(yaml) if yaml.trim().is_empty() => Map::new(),
        BaseValues::Yaml(yaml) => {
            let parsed: Value = serde_yaml::from_str(yaml)?;
            as_object(Some(&parsed), "installed")?
        }
    };

    merge_maps(&mut values, as_object(release, "release")?);
    merge_maps(&mut values, as_object(user, "user")?);

    if values.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_yaml::to_string(&Value::Object(values))?)
}

fn chart_annotations(
    settings: &Settings,
    identity: BTreeMap<String, String>,
    release_version: &str,
) -> BTreeMap<String, String> {
    let mut annotations = identity;
    annotations.insert(settings.keys.release.clone(), release_version.to_string());
    annotations
}

/// New `HelmChart` taking over an installed release.
pub fn new_helm_chart(
    settings: &Settings,
    installed: &HelmRelease,
    chart: &ReleaseChart,
    values_content: String,
    identity: BTreeMap<String, String>,
    release_version: &str,
) -> HelmChart {
    HelmChart {
        metadata: ObjectMeta {
            name: Some(installed.name.clone()),
            namespace: Some(settings.chart_namespace.clone()),
            annotations: Some(chart_annotations(settings, identity, release_version)),
            ..Default::default()
        },
        spec: HelmChartSpec {
            target_namespace: installed.namespace.clone(),
            chart: chart.name.clone(),
            version: chart.version.clone(),
            repo: chart.repository.clone(),
            values_content,
            back_off_limit: Some(BACKOFF_LIMIT),
            ..Default::default()
        },
        status: None,
    }
}

/// Point an existing `HelmChart` at the release's chart version.
pub fn update_helm_chart(
    settings: &Settings,
    existing: &HelmChart,
    chart: &ReleaseChart,
    values_content: String,
    identity: BTreeMap<String, String>,
    release_version: &str,
) -> HelmChart {
    let mut updated = existing.clone();
    let annotations = updated.metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.extend(chart_annotations(settings, identity, release_version));

    updated.spec.chart_content = String::new();
    updated.spec.chart = chart.name.clone();
    updated.spec.version = chart.version.clone();
    updated.spec.repo = chart.repository.clone();
    updated.spec.values_content = values_content;
    updated.spec.back_off_limit = Some(BACKOFF_LIMIT);
    updated
}
