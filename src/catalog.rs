//! Read-only metadata façade
//!
//! Translates catalog queries into wire response shapes. The catalog
//! itself is an external collaborator behind `CatalogReader`; this module
//! only filters and reshapes. Search patterns use SQL wildcards: `%` for
//! any run of characters, `_` for a single character, case-insensitive.

use std::sync::Arc;

use regex_lite::Regex;

use crate::error::{Result, ServerError};
use crate::wire::{EntityMeta, FunctionMeta, NamespaceMeta, TypeMeta};

/// Catalog/metadata store, queried read-only.
pub trait CatalogReader: Send + Sync + 'static {
    fn namespaces(&self) -> Vec<NamespaceMeta>;
    /// Entities of one namespace; fails with `UnknownNamespace`.
    fn entities(&self, namespace: &str) -> Result<Vec<EntityMeta>>;
    fn types(&self) -> Vec<TypeMeta>;
    fn table_types(&self) -> Vec<String>;
    /// Comma-separated list of non-standard SQL keywords.
    fn sql_keywords(&self) -> String;
    fn functions(&self) -> Vec<FunctionMeta>;
    /// Query-language tags the processor accepts, e.g. "sql", "mongo".
    fn supported_languages(&self) -> Vec<String>;
    fn server_version(&self) -> String;
}

/// Compile a SQL-style search pattern into an anchored regex. `None`
/// matches everything; an uncompilable pattern is a malformed request.
fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^'
            | '$' => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    Regex::new(&regex).map(Some).map_err(|e| {
        ServerError::MalformedRequest(format!("invalid search pattern '{}': {}", pattern, e))
    })
}

fn matches(regex: &Option<Regex>, name: &str) -> bool {
    regex.as_ref().map_or(true, |r| r.is_match(name))
}

/// Façade consumed by the message pump for metadata-search requests.
#[derive(Clone)]
pub struct MetadataFacade {
    catalog: Arc<dyn CatalogReader>,
}

impl MetadataFacade {
    pub fn new(catalog: Arc<dyn CatalogReader>) -> Self {
        MetadataFacade { catalog }
    }

    pub fn search_namespaces(&self, pattern: Option<&str>) -> Result<Vec<NamespaceMeta>> {
        let regex = compile_pattern(pattern)?;
        Ok(self
            .catalog
            .namespaces()
            .into_iter()
            .filter(|ns| matches(&regex, &ns.name))
            .collect())
    }

    /// Exact single-namespace lookup.
    pub fn get_namespace(&self, name: &str) -> Result<NamespaceMeta> {
        self.catalog
            .namespaces()
            .into_iter()
            .find(|ns| ns.name == name)
            .ok_or_else(|| ServerError::UnknownNamespace(name.to_string()))
    }

    pub fn search_entities(
        &self,
        namespace: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<EntityMeta>> {
        let regex = compile_pattern(pattern)?;
        Ok(self
            .catalog
            .entities(namespace)?
            .into_iter()
            .filter(|e| matches(&regex, &e.name))
            .collect())
    }

    pub fn types(&self) -> Vec<TypeMeta> {
        self.catalog.types()
    }

    pub fn table_types(&self) -> Vec<String> {
        self.catalog.table_types()
    }

    pub fn sql_keywords(&self) -> String {
        self.catalog.sql_keywords()
    }

    pub fn functions(&self, category: Option<&str>) -> Vec<FunctionMeta> {
        self.catalog
            .functions()
            .into_iter()
            .filter(|f| category.map_or(true, |c| f.category.eq_ignore_ascii_case(c)))
            .collect()
    }

    pub fn supported_languages(&self) -> Vec<String> {
        self.catalog.supported_languages()
    }

    pub fn server_version(&self) -> String {
        self.catalog.server_version()
    }

    /// Whether a namespace with this exact name exists. Used to validate
    /// connection-property updates before they take effect.
    pub fn namespace_exists(&self, name: &str) -> bool {
        self.get_namespace(name).is_ok()
    }
}
