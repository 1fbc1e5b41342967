//! Copy configuration: how many records of each collection a snapshot keeps
//!
//! Raw configuration is user-supplied JSON and is never rejected. Every
//! invalid value degrades to [`CopyMode::All`] (or is clamped) and produces
//! exactly one warning through the caller's sink.

use std::collections::BTreeMap;

use envswitch_store::Document;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::adapter::ModelRegistry;
use crate::schema::{EntityConfig, SchemaRegistry};

/// Upper bound for [`CopyMode::LatestX`].
pub const MAX_LATEST_X: u32 = 100;

/// Shared collection every global document is stored in.
pub const DEFAULT_GLOBALS_COLLECTION: &str = "globals";

/// Field of a global document naming the global it belongs to.
pub const GLOBAL_TYPE_FIELD: &str = "globalType";

/// Retention policy for one group of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    #[default]
    All,
    None,
    LatestX(u32),
}

impl Serialize for CopyMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CopyMode::All => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("mode", "all")?;
                map.end()
            }
            CopyMode::None => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("mode", "none")?;
                map.end()
            }
            CopyMode::LatestX(x) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("mode", "latest-x")?;
                map.serialize_entry("x", x)?;
                map.end()
            }
        }
    }
}

/// Default mode plus per-slug overrides for one copy target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyTarget {
    pub default: CopyMode,
    pub collections: BTreeMap<String, CopyMode>,
    pub globals: BTreeMap<String, CopyMode>,
}

impl CopyTarget {
    pub fn collection_mode(&self, slug: &str) -> CopyMode {
        self.collections.get(slug).copied().unwrap_or(self.default)
    }

    pub fn global_mode(&self, slug: &str) -> CopyMode {
        self.globals.get(slug).copied().unwrap_or(self.default)
    }
}

/// Normalized copy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedCopyConfig {
    /// Plain collection and global documents
    pub documents: CopyTarget,
    /// Version-history collections
    pub versions: CopyTarget,
}

/// Warning sink that forwards to `tracing`.
pub fn log_warning(message: String) {
    tracing::warn!(target: "envswitch::copy", "{}", message);
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize the raw `copy` configuration value.
pub fn normalize_copy_config(raw: Option<&Value>, mut warn: impl FnMut(String)) -> ResolvedCopyConfig {
    let empty = Map::new();
    let root = raw.and_then(Value::as_object).unwrap_or(&empty);

    ResolvedCopyConfig {
        documents: normalize_target(root.get("documents"), "copy.documents", &mut warn),
        versions: normalize_target(root.get("versions"), "copy.versions", &mut warn),
    }
}

fn normalize_target(raw: Option<&Value>, prefix: &str, warn: &mut dyn FnMut(String)) -> CopyTarget {
    let empty = Map::new();
    let target = raw.and_then(Value::as_object).unwrap_or(&empty);

    let default = match target.get("default") {
        None | Some(Value::Null) => CopyMode::All,
        Some(value) => normalize_mode(value, &format!("{}.default", prefix), warn),
    };

    CopyTarget {
        default,
        collections: normalize_overrides(
            target.get("collections"),
            &format!("{}.collections", prefix),
            warn,
        ),
        globals: normalize_overrides(target.get("globals"), &format!("{}.globals", prefix), warn),
    }
}

fn normalize_overrides(
    raw: Option<&Value>,
    prefix: &str,
    warn: &mut dyn FnMut(String),
) -> BTreeMap<String, CopyMode> {
    let Some(overrides) = raw.and_then(Value::as_object) else {
        return BTreeMap::new();
    };

    overrides
        .iter()
        .filter(|(_, mode)| !mode.is_null())
        .map(|(slug, mode)| {
            let context = format!("{}.{}", prefix, slug);
            (slug.clone(), normalize_mode(mode, &context, warn))
        })
        .collect()
}

/// Normalize one mode value. `context` is the dotted config path used in warnings.
pub fn normalize_mode(value: &Value, context: &str, warn: &mut dyn FnMut(String)) -> CopyMode {
    let Some(tag) = value.get("mode").and_then(Value::as_str) else {
        warn(format!(
            "`{}` must be a valid copy mode. Falling back to {{ mode: 'all' }}.",
            context
        ));
        return CopyMode::All;
    };

    match tag {
        "all" => CopyMode::All,
        "none" => CopyMode::None,
        "latest-x" => match value.get("x").and_then(integer_value) {
            Some(x) if x >= 1 && x <= i64::from(MAX_LATEST_X) => CopyMode::LatestX(x as u32),
            Some(x) if x > i64::from(MAX_LATEST_X) => {
                warn(format!(
                    "`{}.x` ({}) exceeds the internal maximum ({}). Clamping to {}.",
                    context, x, MAX_LATEST_X, MAX_LATEST_X
                ));
                CopyMode::LatestX(MAX_LATEST_X)
            }
            _ => {
                warn(format!(
                    "`{}.x` must be an integer greater than or equal to 1. Falling back to {{ mode: 'all' }}.",
                    context
                ));
                CopyMode::All
            }
        },
        _ => {
            warn(format!(
                "`{}.mode` must be one of: \"all\", \"latest-x\", \"none\". Falling back to {{ mode: 'all' }}.",
                context
            ));
            CopyMode::All
        }
    }
}

/// Integral JSON number (`5` or `5.0`), saturating at the i64 range.
fn integer_value(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(x) = number.as_i64() {
        return Some(x);
    }
    if number.as_u64().is_some() {
        return Some(i64::MAX);
    }
    number
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

// ---------------------------------------------------------------------------
// Schema validation
// ---------------------------------------------------------------------------

/// Warn about overrides that name unknown slugs, and version overrides on
/// entities without version tracking. Never rejects.
pub fn warn_on_invalid_override_targets(
    config: &ResolvedCopyConfig,
    schema: &SchemaRegistry,
    mut warn: impl FnMut(String),
) {
    let checks: [(&BTreeMap<String, CopyMode>, &[EntityConfig], &str, &str, bool); 4] = [
        (&config.documents.collections, schema.collections.as_slice(), "collection", "copy.documents.collections", false),
        (&config.documents.globals, schema.globals.as_slice(), "global", "copy.documents.globals", false),
        (&config.versions.collections, schema.collections.as_slice(), "collection", "copy.versions.collections", true),
        (&config.versions.globals, schema.globals.as_slice(), "global", "copy.versions.globals", true),
    ];

    for (overrides, entities, entity_name, prefix, require_versions) in checks {
        for slug in overrides.keys() {
            match entities.iter().find(|e| &e.slug == slug) {
                None => warn(format!(
                    "`{}.{}` does not match any configured {} slug.",
                    prefix, slug, entity_name
                )),
                Some(entity) if require_versions && !entity.versions => warn(format!(
                    "`{}.{}` is set, but {} \"{}\" does not have versions enabled.",
                    prefix, slug, entity_name, slug
                )),
                Some(_) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Physical name resolution
// ---------------------------------------------------------------------------

/// Physical version-history collection → mode, one entry per
/// version-enabled collection and global.
pub fn resolve_version_group_modes(
    schema: &SchemaRegistry,
    models: &ModelRegistry,
    config: &ResolvedCopyConfig,
) -> BTreeMap<String, CopyMode> {
    let collections = schema
        .collections
        .iter()
        .filter(|c| c.versions)
        .map(|c| (c, config.versions.collection_mode(&c.slug)));
    let globals = schema
        .globals
        .iter()
        .filter(|g| g.versions)
        .map(|g| (g, config.versions.global_mode(&g.slug)));

    collections
        .chain(globals)
        .map(|(entity, mode)| {
            let physical = models
                .versions(&entity.slug)
                .map(str::to_string)
                .unwrap_or_else(|| entity.default_versions_name());
            (physical, mode)
        })
        .collect()
}

/// A document selection within one physical collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionScope {
    pub mode: CopyMode,
    /// Top-level field equality filter; `None` matches every document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<BTreeMap<String, Value>>,
}

impl CollectionScope {
    pub fn unfiltered(mode: CopyMode) -> Self {
        Self { mode, filter: None }
    }

    pub fn filtered(mode: CopyMode, field: impl Into<String>, value: Value) -> Self {
        let mut filter = BTreeMap::new();
        filter.insert(field.into(), value);
        Self {
            mode,
            filter: Some(filter),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        match &self.filter {
            None => true,
            Some(filter) => filter
                .iter()
                .all(|(field, expected)| document.get(field) == Some(expected)),
        }
    }
}

/// Physical base collection → document scopes. Globals share one collection
/// and are told apart by [`GLOBAL_TYPE_FIELD`].
pub fn resolve_document_scopes(
    schema: &SchemaRegistry,
    models: &ModelRegistry,
    config: &ResolvedCopyConfig,
) -> BTreeMap<String, Vec<CollectionScope>> {
    let mut scopes: BTreeMap<String, Vec<CollectionScope>> = BTreeMap::new();

    for collection in &schema.collections {
        let physical = models
            .collection(&collection.slug)
            .map(str::to_string)
            .unwrap_or_else(|| collection.storage_name());
        scopes
            .entry(physical)
            .or_default()
            .push(CollectionScope::unfiltered(
                config.documents.collection_mode(&collection.slug),
            ));
    }

    let globals_collection = models
        .globals()
        .unwrap_or(DEFAULT_GLOBALS_COLLECTION)
        .to_string();
    for global in &schema.globals {
        scopes
            .entry(globals_collection.clone())
            .or_default()
            .push(CollectionScope::filtered(
                config.documents.global_mode(&global.slug),
                GLOBAL_TYPE_FIELD,
                Value::String(global.slug.clone()),
            ));
    }

    scopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect_warnings(raw: Value) -> (ResolvedCopyConfig, Vec<String>) {
        let mut warnings = Vec::new();
        let config = normalize_copy_config(Some(&raw), |w| warnings.push(w));
        (config, warnings)
    }

    #[test]
    fn missing_config_is_all() {
        let mut warnings = Vec::new();
        let config = normalize_copy_config(None, |w| warnings.push(w));
        assert_eq!(config, ResolvedCopyConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn valid_modes_pass_through() {
        let (config, warnings) = collect_warnings(json!({
            "versions": {
                "default": {"mode": "latest-x", "x": 10},
                "collections": {"posts": {"mode": "none"}, "pages": {"mode": "latest-x", "x": 5.0}}
            },
            "documents": {"globals": {"header": {"mode": "all"}}}
        }));

        assert!(warnings.is_empty());
        assert_eq!(config.versions.default, CopyMode::LatestX(10));
        assert_eq!(config.versions.collection_mode("posts"), CopyMode::None);
        assert_eq!(config.versions.collection_mode("pages"), CopyMode::LatestX(5));
        assert_eq!(config.versions.collection_mode("other"), CopyMode::LatestX(10));
        assert_eq!(config.documents.global_mode("header"), CopyMode::All);
    }

    #[test]
    fn out_of_range_x_warns_once_each() {
        let (config, warnings) = collect_warnings(json!({
            "versions": {
                "default": {"mode": "latest-x", "x": 0},
                "collections": {
                    "posts": {"mode": "latest-x", "x": 250},
                    "pages": {"mode": "latest-x", "x": -3},
                    "media": {"mode": "latest-x", "x": 2.5},
                    "users": {"mode": "latest-x"}
                }
            }
        }));

        assert_eq!(warnings.len(), 5);
        assert_eq!(config.versions.default, CopyMode::All);
        assert_eq!(config.versions.collection_mode("posts"), CopyMode::LatestX(MAX_LATEST_X));
        assert_eq!(config.versions.collection_mode("pages"), CopyMode::All);
        assert_eq!(config.versions.collection_mode("media"), CopyMode::All);
        assert_eq!(config.versions.collection_mode("users"), CopyMode::All);
        assert!(warnings.contains(&
            "`copy.versions.collections.posts.x` (250) exceeds the internal maximum (100). Clamping to 100."
                .to_string()
        ));
        assert!(warnings.contains(&
            "`copy.versions.default.x` must be an integer greater than or equal to 1. Falling back to { mode: 'all' }."
                .to_string()
        ));
    }

    #[test]
    fn malformed_modes_fall_back_to_all() {
        let (config, warnings) = collect_warnings(json!({
            "documents": {
                "default": "latest",
                "collections": {"posts": {"mode": "newest"}, "pages": null}
            }
        }));

        assert_eq!(
            warnings,
            vec![
                "`copy.documents.default` must be a valid copy mode. Falling back to { mode: 'all' }.".to_string(),
                "`copy.documents.collections.posts.mode` must be one of: \"all\", \"latest-x\", \"none\". Falling back to { mode: 'all' }.".to_string(),
            ]
        );
        assert_eq!(config.documents.default, CopyMode::All);
        assert!(!config.documents.collections.contains_key("pages"));
    }

    #[test]
    fn override_targets_are_checked_against_schema() {
        let schema = SchemaRegistry::new()
            .with_collection(EntityConfig::new("posts").with_versions(true))
            .with_collection(EntityConfig::new("tags"))
            .with_global(EntityConfig::new("header"));
        let (config, _) = collect_warnings(json!({
            "versions": {
                "collections": {"posts": {"mode": "all"}, "tags": {"mode": "all"}, "ghost": {"mode": "all"}},
                "globals": {"header": {"mode": "none"}}
            },
            "documents": {"collections": {"tags": {"mode": "none"}}}
        }));

        let mut warnings = Vec::new();
        warn_on_invalid_override_targets(&config, &schema, |w| warnings.push(w));

        assert_eq!(
            warnings,
            vec![
                "`copy.versions.collections.ghost` does not match any configured collection slug.".to_string(),
                "`copy.versions.collections.tags` is set, but collection \"tags\" does not have versions enabled.".to_string(),
                "`copy.versions.globals.header` is set, but global \"header\" does not have versions enabled.".to_string(),
            ]
        );
    }

    #[test]
    fn version_groups_resolve_physical_names() {
        let schema = SchemaRegistry::new()
            .with_collection(EntityConfig::new("posts").with_versions(true))
            .with_collection(EntityConfig::new("pages").with_versions(true).with_db_name("site_pages"))
            .with_collection(EntityConfig::new("tags"))
            .with_global(EntityConfig::new("footer").with_versions(true));
        let mut models = ModelRegistry::default();
        models.register_versions("posts", "posts_history");

        let (config, _) = collect_warnings(json!({
            "versions": {"default": {"mode": "latest-x", "x": 3}, "globals": {"footer": {"mode": "none"}}}
        }));
        let modes = resolve_version_group_modes(&schema, &models, &config);

        assert_eq!(modes.len(), 3);
        assert_eq!(modes["posts_history"], CopyMode::LatestX(3));
        assert_eq!(modes["_site_pages_versions"], CopyMode::LatestX(3));
        assert_eq!(modes["_footer_versions"], CopyMode::None);
    }

    #[test]
    fn globals_share_one_scoped_collection() {
        let schema = SchemaRegistry::new()
            .with_collection(EntityConfig::new("posts"))
            .with_global(EntityConfig::new("header"))
            .with_global(EntityConfig::new("footer"));
        let (config, _) = collect_warnings(json!({
            "documents": {"globals": {"footer": {"mode": "none"}}}
        }));

        let scopes = resolve_document_scopes(&schema, &ModelRegistry::default(), &config);

        assert_eq!(scopes["posts"], vec![CollectionScope::unfiltered(CopyMode::All)]);
        let globals = &scopes[DEFAULT_GLOBALS_COLLECTION];
        assert_eq!(globals.len(), 2);
        assert_eq!(globals[1].mode, CopyMode::None);

        let footer = Document::from_value(json!({"_id": 1, "globalType": "footer"})).unwrap();
        assert!(!globals[0].matches(&footer));
        assert!(globals[1].matches(&footer));
    }

    #[test]
    fn copy_mode_wire_form() {
        assert_eq!(serde_json::to_value(CopyMode::All).unwrap(), json!({"mode": "all"}));
        assert_eq!(
            serde_json::to_value(CopyMode::LatestX(5)).unwrap(),
            json!({"mode": "latest-x", "x": 5})
        );
    }
}
