//! Maps URL route prefixes to loaded dictionaries and resolves embedded
//! resources across all of them, with a filesystem fallback next to the
//! container files.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde_json::json;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{DictConfig, ServerConfig};
use crate::dictionary::{Dictionary, DictionaryOptions};
use crate::error::Result;
use crate::postprocess::DefinitionPostProcessor;

/// Where an embedded resource lives: which dictionary, and under which
/// exact container key.
#[derive(Debug, Clone)]
struct ResourceLocation {
    dict_id: String,
    key: String,
}

pub struct DictionaryRegistry {
    dicts: HashMap<String, Dictionary>,
    /// Registration order of loaded dictionaries.
    order: Vec<String>,
    configs: BTreeMap<String, DictConfig>,
    /// Route -> dictionary id. Routes are unique; the empty route is the
    /// default dictionary.
    routes: HashMap<String, String>,
    /// Normalized resource path -> location, first writer wins.
    resource_index: HashMap<String, ResourceLocation>,
    post: DefinitionPostProcessor,
}

impl DictionaryRegistry {
    /// Load every enabled dictionary. Containers that fail to open are
    /// logged and surface as `status: "error"` in the catalog; loading
    /// continues for the rest.
    pub fn from_config(config: &ServerConfig) -> Self {
        let opts = DictionaryOptions {
            force_rebuild: false,
            check_blocks: false,
            cache_enabled: config.cache_enabled,
        };

        let mut dicts = HashMap::new();
        let mut order = Vec::new();
        let mut routes = HashMap::new();
        for (id, dict_config) in &config.dictionaries {
            if !dict_config.enabled {
                continue;
            }
            match Dictionary::open(&dict_config.path, &opts) {
                Ok(dict) => {
                    info!(%id, path = %dict_config.path, "loaded dictionary");
                    if routes.contains_key(&dict_config.route) {
                        warn!(
                            %id,
                            route = %dict_config.route,
                            "route already taken, dictionary reachable by id only"
                        );
                    } else {
                        routes.insert(dict_config.route.clone(), id.clone());
                    }
                    order.push(id.clone());
                    dicts.insert(id.clone(), dict);
                }
                Err(err) => {
                    error!(%id, path = %dict_config.path, error = %err, "failed to load dictionary");
                }
            }
        }

        let injection_html = load_injection_html(Path::new(&config.resource_directory));
        let resource_index = build_resource_index(&dicts, &order);

        Self {
            dicts,
            order,
            configs: config.dictionaries.clone(),
            routes,
            resource_index,
            post: DefinitionPostProcessor::new(injection_html),
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.dicts.len()
    }

    pub fn post_processor(&self) -> &DefinitionPostProcessor {
        &self.post
    }

    /// The dictionary with id `default`, or the one on the empty route, or
    /// the first loaded one.
    pub fn default_dictionary(&self) -> Option<&Dictionary> {
        if let Some(dict) = self.dicts.get("default") {
            return Some(dict);
        }
        if let Some(id) = self.routes.get("") {
            return self.dicts.get(id);
        }
        self.order.first().and_then(|id| self.dicts.get(id))
    }

    /// Resolve a route segment, falling back to dictionary ids so that an
    /// unrouted dictionary stays reachable.
    pub fn by_route(&self, route: &str) -> Option<&Dictionary> {
        if route.is_empty() {
            return self.default_dictionary();
        }
        if let Some(id) = self.routes.get(route) {
            return self.dicts.get(id);
        }
        self.dicts.get(route)
    }

    pub fn knows_route(&self, segment: &str) -> bool {
        self.routes.contains_key(segment) || self.dicts.contains_key(segment)
    }

    /// Look a word up in one dictionary and run the full post-processing
    /// pipeline. `None` means the word is not there.
    pub fn define(&self, dict: &Dictionary, word: &str) -> Result<Option<String>> {
        let records = dict.lookup_text(word)?;
        if records.is_empty() {
            return Ok(None);
        }
        let body = self.post.render(dict, records)?;
        Ok(Some(body))
    }

    /// Resource lookup across all dictionaries: the prebuilt index first,
    /// then a linear scan with legacy path variants, then the filesystem
    /// next to each container.
    pub fn find_resource(&self, path: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.indexed_resource(path) {
            return Some(bytes);
        }
        for id in &self.order {
            let dict = &self.dicts[id];
            if let Some(bytes) = lookup_resource_variants(dict, path) {
                return Some(bytes);
            }
        }
        for id in &self.order {
            if let Some(bytes) = filesystem_fallback(&self.dicts[id], path) {
                return Some(bytes);
            }
        }
        None
    }

    /// Resource lookup scoped to one routed dictionary, with the
    /// cross-dictionary index and that dictionary's directory as fallbacks.
    pub fn routed_resource(&self, route: &str, path: &str) -> Option<Vec<u8>> {
        let dict = self.by_route(route)?;
        if let Some(bytes) = lookup_resource_variants(dict, path) {
            return Some(bytes);
        }
        if let Some(bytes) = self.indexed_resource(path) {
            return Some(bytes);
        }
        filesystem_fallback(dict, path)
    }

    fn indexed_resource(&self, path: &str) -> Option<Vec<u8>> {
        let location = self.resource_index.get(&normalize_resource_path(path))?;
        let dict = self.dicts.get(&location.dict_id)?;
        match dict.lookup_resource(&location.key) {
            Ok(found) => found,
            Err(err) => {
                warn!(path, error = %err, "indexed resource read failed");
                None
            }
        }
    }

    /// The dictionary catalog served at `/`.
    pub fn catalog(&self) -> serde_json::Value {
        let dictionaries: Vec<serde_json::Value> = self
            .configs
            .iter()
            .map(|(id, dict_config)| {
                let status = if self.dicts.contains_key(id) {
                    "loaded"
                } else {
                    "error"
                };
                json!({
                    "id": id,
                    "name": dict_config.name,
                    "route": dict_config.route,
                    "path": dict_config.path,
                    "enabled": dict_config.enabled,
                    "status": status,
                })
            })
            .collect();
        json!({
            "dictionaries": dictionaries,
            "mode": "multi",
            "total": dictionaries.len(),
        })
    }
}

/// Normalize an MDD key or URL path for the cross-dictionary index:
/// forward slashes, no leading slash, no leading `html/` segment.
pub fn normalize_resource_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.trim_start_matches('/');
    path.strip_prefix("html/").unwrap_or(path).to_string()
}

/// Enumerate every loaded dictionary's resource keys once at startup,
/// verify each resource actually has content, and index it under its
/// normalized path. Later dictionaries do not override earlier ones.
fn build_resource_index(
    dicts: &HashMap<String, Dictionary>,
    order: &[String],
) -> HashMap<String, ResourceLocation> {
    let mut index = HashMap::new();
    for id in order {
        let dict = &dicts[id];
        let keys = match dict.mdd_keys("") {
            Ok(keys) => keys,
            Err(err) => {
                warn!(%id, error = %err, "resource key enumeration failed");
                continue;
            }
        };
        let mut added = 0usize;
        for key in keys {
            let normalized = normalize_resource_path(&key);
            if normalized.is_empty() || index.contains_key(&normalized) {
                continue;
            }
            match dict.lookup_resource(&key) {
                Ok(Some(_)) => {
                    index.insert(
                        normalized,
                        ResourceLocation {
                            dict_id: id.clone(),
                            key,
                        },
                    );
                    added += 1;
                }
                Ok(None) => {}
                Err(err) => warn!(%id, %key, error = %err, "resource probe failed"),
            }
        }
        if added > 0 {
            info!(%id, resources = added, "indexed resources");
        }
    }
    index
}

/// Legacy lookup forms for containers whose keys use backslash paths.
fn lookup_resource_variants(dict: &Dictionary, path: &str) -> Option<Vec<u8>> {
    let backslashed = path.trim_start_matches('/').replace('/', "\\");
    let variants = [
        format!("\\{backslashed}"),
        backslashed.clone(),
        format!("\\html\\{backslashed}"),
    ];
    for variant in variants {
        match dict.lookup_resource(&variant) {
            Ok(Some(bytes)) => return Some(bytes),
            Ok(None) => {}
            Err(err) => warn!(path = %variant, error = %err, "resource lookup failed"),
        }
    }
    None
}

/// Resolve a resource on disk next to the dictionary file when no container
/// holds it.
fn filesystem_fallback(dict: &Dictionary, path: &str) -> Option<Vec<u8>> {
    let dir = dict.path().parent()?;
    let clean = path
        .trim_start_matches(['/', '\\'])
        .replace('\\', "/");
    if clean.split('/').any(|segment| segment == "..") {
        return None;
    }
    let candidate = dir.join(&clean);
    if candidate.is_file() {
        fs::read(&candidate).ok()
    } else {
        None
    }
}

/// Concatenate every `.html` file under the overlay directory, read once at
/// startup and appended to every rendered entry.
fn load_injection_html(resource_dir: &Path) -> String {
    if !resource_dir.is_dir() {
        return String::new();
    }
    let mut files: Vec<_> = WalkDir::new(resource_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("html"))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    let mut html = String::new();
    for file in files {
        match fs::read_to_string(&file) {
            Ok(content) => html.push_str(&content),
            Err(err) => warn!(file = %file.display(), error = %err, "unreadable overlay file"),
        }
    }
    html
}
