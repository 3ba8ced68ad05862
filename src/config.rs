//! Loading the application catalog from `config.yaml` (or a JSON file).
//!
//! Field names are camelCase. A malformed field never rejects the file: it
//! is logged and replaced by its default.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::app_spec::ApplicationSpec;
use crate::constants;

/// A folder (no path) or an application of the catalog tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub name: String,
    pub path: Option<PathBuf>,
    pub arguments: String,
    pub work_directory: Option<PathBuf>,
    pub resize: bool,
    pub multiple: bool,
    pub max_load_time: Duration,
    pub items: Vec<CatalogItem>,
}

impl Default for CatalogItem {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: None,
            arguments: String::new(),
            work_directory: None,
            resize: true,
            multiple: false,
            max_load_time: constants::DEFAULT_MAX_LOAD_TIME,
            items: Vec::new(),
        }
    }
}

impl CatalogItem {
    pub fn is_folder(&self) -> bool {
        self.path
            .as_ref()
            .is_none_or(|p| p.to_string_lossy().trim().is_empty())
    }

    /// The launch descriptor of an application entry; `None` for folders.
    pub fn to_spec(&self) -> Option<Arc<ApplicationSpec>> {
        if self.is_folder() {
            return None;
        }
        let path = self.path.clone()?;
        let mut spec = ApplicationSpec::new(self.name.clone(), path)
            .with_arguments(self.arguments.clone())
            .with_resize(self.resize)
            .with_allow_multiple(self.multiple)
            .with_max_load_time(self.max_load_time);
        if let Some(dir) = &self.work_directory {
            spec = spec.with_work_directory(dir.clone());
        }
        Some(Arc::new(spec))
    }

    /// Every application below (and including) this item, depth first.
    pub fn applications(&self) -> Vec<Arc<ApplicationSpec>> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<Arc<ApplicationSpec>>) {
        out.extend(self.to_spec());
        for child in &self.items {
            child.collect(out);
        }
    }
}

/// Flattens a whole catalog into its applications.
pub fn applications(items: &[CatalogItem]) -> Vec<Arc<ApplicationSpec>> {
    items.iter().flat_map(CatalogItem::applications).collect()
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the catalog at `path`. A missing file yields an empty catalog.
    pub fn load(path: &Path) -> Result<Vec<CatalogItem>> {
        if !path.exists() {
            info!("[Config] {} not found; starting with an empty catalog", path.display());
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let root = if is_json {
            Self::parse_json(&text)
        } else {
            Self::parse_yaml(&text)
        }
        .with_context(|| format!("parsing catalog {}", path.display()))?;
        let items = Self::from_value(&root);
        info!(
            "[Config] Loaded {} top-level item(s), {} application(s) from {}",
            items.len(),
            applications(&items).len(),
            path.display()
        );
        Ok(items)
    }

    pub fn parse_yaml(text: &str) -> Result<Value> {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn parse_json(text: &str) -> Result<Value> {
        Ok(serde_json::from_str(text)?)
    }

    /// Accepts either a bare list of items or a map with an `items` list.
    pub fn from_value(root: &Value) -> Vec<CatalogItem> {
        match root {
            Value::Null => Vec::new(),
            Value::Array(_) => read_items(root, "<root>"),
            Value::Object(map) => map
                .get("items")
                .map(|v| read_items(v, "<root>"))
                .unwrap_or_default(),
            other => {
                warn!("[Config] Unexpected catalog root {}; ignoring", other);
                Vec::new()
            }
        }
    }
}

fn read_items(value: &Value, parent: &str) -> Vec<CatalogItem> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(list) => list
            .iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(read_item(map)),
                other => {
                    warn!("[Config] Skipping non-map entry {} under '{}'", other, parent);
                    None
                }
            })
            .collect(),
        other => {
            warn!("[Config] 'items' of '{}' is not a list: {}", parent, other);
            Vec::new()
        }
    }
}

/// One catalog entry as written. Every field is kept raw so a bad value
/// only costs that field; unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawItem {
    name: Value,
    path: Value,
    arguments: Value,
    work_directory: Value,
    resize: Value,
    multiple: Value,
    max_load_time: Value,
    items: Value,
}

fn read_item(map: &Map<String, Value>) -> CatalogItem {
    let raw: RawItem = match serde_json::from_value(Value::Object(map.clone())) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("[Config] Unreadable entry {:?}: {}", map, e);
            RawItem::default()
        }
    };
    let defaults = CatalogItem::default();
    let name = string_field(&raw.name, "name", "").unwrap_or_default();
    let ctx = name.as_str();
    CatalogItem {
        path: string_field(&raw.path, "path", ctx).map(PathBuf::from),
        arguments: string_field(&raw.arguments, "arguments", ctx).unwrap_or_default(),
        work_directory: string_field(&raw.work_directory, "workDirectory", ctx)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        resize: bool_field(&raw.resize, "resize", ctx).unwrap_or(defaults.resize),
        multiple: bool_field(&raw.multiple, "multiple", ctx).unwrap_or(defaults.multiple),
        max_load_time: match &raw.max_load_time {
            Value::Null => defaults.max_load_time,
            v => parse_load_time(v).unwrap_or_else(|| {
                warn!("[Config] '{}': ignoring malformed maxLoadTime {}", ctx, v);
                defaults.max_load_time
            }),
        },
        items: read_items(&raw.items, ctx),
        name,
    }
}

fn string_field(value: &Value, key: &str, item: &str) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => {
            warn!("[Config] '{}': ignoring malformed {} {}", item, key, other);
            None
        }
    }
}

fn bool_field(value: &Value, key: &str, item: &str) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        other => {
            warn!("[Config] '{}': ignoring malformed {} {}", item, key, other);
            None
        }
    }
}

/// `"hh:mm:ss[.fff]"`, whole seconds, or `"<n>ms"` / `"<n>s"`.
pub fn parse_load_time(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_u64().map(Duration::from_secs),
        Value::String(s) => parse_duration_str(s.trim()),
        _ => None,
    }
}

fn parse_duration_str(s: &str) -> Option<Duration> {
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse::<f64>().ok().and_then(seconds);
    }
    let parts: Vec<&str> = s.split(':').collect();
    match parts.as_slice() {
        [h, m, sec] => {
            let h: u64 = h.parse().ok()?;
            let m: u64 = m.parse().ok()?;
            if m >= 60 {
                return None;
            }
            let sec: f64 = sec.parse().ok()?;
            if !(0.0..60.0).contains(&sec) {
                return None;
            }
            let whole = h.checked_mul(3600)?.checked_add(m * 60)?;
            seconds(sec)?.checked_add(Duration::from_secs(whole))
        }
        [whole] => whole.parse().ok().map(Duration::from_secs),
        _ => None,
    }
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SAMPLE: &str = r#"
items:
  - name: Editors
    items:
      - name: Notepad
        path: notepad.exe
      - name: Wordpad
        path: C:\Program Files\Windows NT\Accessories\wordpad.exe
        arguments: /p readme.txt
        resize: false
        multiple: true
        maxLoadTime: "00:00:10"
  - name: Calculator
    path: calc.exe
    workDirectory: C:\Temp
    maxLoadTime: 1500ms
"#;

    #[test]
    fn yaml_catalog_builds_folder_tree() {
        let items = ConfigLoader::from_value(&ConfigLoader::parse_yaml(SAMPLE).unwrap());
        assert_eq!(items.len(), 2);
        assert!(items[0].is_folder());
        assert_eq!(items[0].items.len(), 2);

        let wordpad = &items[0].items[1];
        assert!(!wordpad.is_folder());
        assert!(!wordpad.resize);
        assert!(wordpad.multiple);
        assert_eq!(wordpad.arguments, "/p readme.txt");
        assert_eq!(wordpad.max_load_time, Duration::from_secs(10));

        let calc = items[1].to_spec().unwrap();
        assert_eq!(calc.work_directory, Some(PathBuf::from(r"C:\Temp")));
        assert_eq!(calc.max_load_time, Duration::from_millis(1500));
        assert!(calc.resize);
        assert!(!calc.allow_multiple);
    }

    #[test]
    fn applications_are_flattened_depth_first() {
        let items = ConfigLoader::from_value(&ConfigLoader::parse_yaml(SAMPLE).unwrap());
        let names: Vec<_> = applications(&items).iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["Notepad", "Wordpad", "Calculator"]);
    }

    #[test]
    fn malformed_fields_fall_back_to_defaults() {
        let root = json!([{
            "name": "Broken",
            "path": "app.exe",
            "resize": [1, 2],
            "multiple": "maybe",
            "maxLoadTime": "soon",
            "items": "nope"
        }, 42]);
        let items = ConfigLoader::from_value(&root);
        assert_eq!(items.len(), 1);
        let broken = &items[0];
        assert!(broken.resize);
        assert!(!broken.multiple);
        assert_eq!(broken.max_load_time, constants::DEFAULT_MAX_LOAD_TIME);
        assert!(broken.items.is_empty());
    }

    #[test]
    fn blank_path_is_a_folder() {
        let items = ConfigLoader::from_value(&json!({ "items": [{ "name": "Tools", "path": "  " }] }));
        assert!(items[0].path.is_some());
        assert!(items[0].to_spec().is_none());
    }

    #[test]
    fn load_time_formats() {
        assert_eq!(parse_load_time(&json!(7)), Some(Duration::from_secs(7)));
        assert_eq!(parse_load_time(&json!("2s")), Some(Duration::from_secs(2)));
        assert_eq!(parse_load_time(&json!("250ms")), Some(Duration::from_millis(250)));
        assert_eq!(parse_load_time(&json!("00:01:02.5")), Some(Duration::from_millis(62_500)));
        assert_eq!(parse_load_time(&json!("00:61:00")), None);
        assert_eq!(parse_load_time(&json!(-1)), None);
        assert_eq!(parse_load_time(&json!(true)), None);
        assert_eq!(parse_load_time(&json!("18446744073709551615:00:00")), None);
        assert_eq!(parse_load_time(&json!("1e300s")), None);
    }

    #[test]
    fn missing_file_is_an_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let items = ConfigLoader::load(&dir.path().join("config.yaml")).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn loads_json_and_yaml_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("catalog.json");
        let mut f = fs::File::create(&json_path).unwrap();
        write!(f, r#"{{"items":[{{"name":"Paint","path":"mspaint.exe","maxLoadTime":3}}]}}"#).unwrap();
        let items = ConfigLoader::load(&json_path).unwrap();
        assert_eq!(items[0].max_load_time, Duration::from_secs(3));

        let yaml_path = dir.path().join("config.yaml");
        fs::write(&yaml_path, SAMPLE).unwrap();
        assert_eq!(applications(&ConfigLoader::load(&yaml_path).unwrap()).len(), 3);

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(ConfigLoader::load(&bad).is_err());
    }

    #[test]
    fn oversized_load_time_in_file_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "- name: Huge\n  path: huge.exe\n  maxLoadTime: \"18446744073709551615:00:00\"\n",
        )
        .unwrap();
        let items = ConfigLoader::load(&path).unwrap();
        assert_eq!(items[0].max_load_time, constants::DEFAULT_MAX_LOAD_TIME);
    }
}
