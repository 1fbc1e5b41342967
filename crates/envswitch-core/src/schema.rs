//! Host schema introspection: which collections and globals exist, whether
//! they track versions, and what they are called in storage.

use std::fmt;
use std::sync::Arc;

/// Explicit storage name of an entity.
#[derive(Clone)]
pub enum DbName {
    Fixed(String),
    Derived(Arc<dyn Fn() -> String + Send + Sync>),
}

impl DbName {
    /// Resolve the name; `None` for an empty fixed string.
    pub fn resolve(&self) -> Option<String> {
        match self {
            DbName::Fixed(name) if name.is_empty() => None,
            DbName::Fixed(name) => Some(name.clone()),
            DbName::Derived(naming) => Some(naming()),
        }
    }
}

impl fmt::Debug for DbName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbName::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
            DbName::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// One collection or global as the host declares it.
#[derive(Debug, Clone)]
pub struct EntityConfig {
    pub slug: String,
    pub versions: bool,
    pub db_name: Option<DbName>,
    pub name: Option<String>,
    pub upload: bool,
}

impl EntityConfig {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            versions: false,
            db_name: None,
            name: None,
            upload: false,
        }
    }

    pub fn with_versions(mut self, versions: bool) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(DbName::Fixed(db_name.into()));
        self
    }

    pub fn with_db_name_fn(mut self, naming: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.db_name = Some(DbName::Derived(Arc::new(naming)));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_upload(mut self, upload: bool) -> Self {
        self.upload = upload;
        self
    }

    /// Base storage name: explicit db name, else non-empty `name`, else the slug.
    pub fn storage_name(&self) -> String {
        self.db_name
            .as_ref()
            .and_then(DbName::resolve)
            .or_else(|| self.name.clone().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| self.slug.clone())
    }

    /// Default version-history collection name: `_<storage name>_versions`.
    pub fn default_versions_name(&self) -> String {
        format!("_{}_versions", self.storage_name())
    }
}

/// Collections and globals declared by the host.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    pub collections: Vec<EntityConfig>,
    pub globals: Vec<EntityConfig>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: EntityConfig) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn with_global(mut self, global: EntityConfig) -> Self {
        self.globals.push(global);
        self
    }

    pub fn collection(&self, slug: &str) -> Option<&EntityConfig> {
        self.collections.iter().find(|c| c.slug == slug)
    }

    pub fn global(&self, slug: &str) -> Option<&EntityConfig> {
        self.globals.iter().find(|g| g.slug == slug)
    }

    /// Slugs of collections that store binary uploads.
    pub fn upload_collections(&self) -> impl Iterator<Item = &str> {
        self.collections
            .iter()
            .filter(|c| c.upload)
            .map(|c| c.slug.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_name_precedence() {
        let plain = EntityConfig::new("posts");
        assert_eq!(plain.storage_name(), "posts");

        let named = EntityConfig::new("posts").with_name("articles");
        assert_eq!(named.storage_name(), "articles");

        let fixed = EntityConfig::new("posts").with_name("articles").with_db_name("blog_posts");
        assert_eq!(fixed.storage_name(), "blog_posts");
        assert_eq!(fixed.default_versions_name(), "_blog_posts_versions");

        let derived = EntityConfig::new("posts").with_db_name_fn(|| "generated".to_string());
        assert_eq!(derived.storage_name(), "generated");
    }

    #[test]
    fn empty_names_fall_through_to_slug() {
        let entity = EntityConfig::new("media").with_db_name("").with_name("");
        assert_eq!(entity.storage_name(), "media");
    }
}
