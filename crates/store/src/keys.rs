//! Store key derivation.
//!
//! Collections live at `/<path>` (cluster-wide) or `/<path>/<namespace>`;
//! items at `/<path>/<namespace>/<name>`. Kinds without namespaces drop the
//! namespace segment.

use vessel_core::{Context, Error, Object};

/// Key layout for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBuilder {
    kind: &'static str,
    prefix: &'static str,
    namespaced: bool,
}

impl KeyBuilder {
    pub const fn new(kind: &'static str, prefix: &'static str, namespaced: bool) -> Self {
        Self { kind, prefix, namespaced }
    }

    pub const fn for_kind<R: Object>() -> Self {
        Self::new(R::KIND, R::PATH, R::NAMESPACED)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Collection key scoped to the context namespace, or cluster-wide when
    /// the context carries none.
    pub fn list_key(&self, ctx: &Context) -> String {
        match ctx.namespace() {
            Some(ns) if self.namespaced => format!("{}/{}", self.prefix, ns),
            _ => self.prefix.to_string(),
        }
    }

    /// Key of a single item.
    pub fn item_key(&self, ctx: &Context, name: &str) -> Result<String, Error> {
        check_segment(self.kind, "name", name)?;
        if !self.namespaced {
            return Ok(format!("{}/{}", self.prefix, name));
        }
        let ns = ctx.namespace().ok_or_else(|| Error::NamespaceRequired { kind: self.kind.to_string() })?;
        check_segment(self.kind, "namespace", ns)?;
        Ok(format!("{}/{}/{}", self.prefix, ns, name))
    }
}

fn check_segment(kind: &str, what: &str, segment: &str) -> Result<(), Error> {
    if segment.is_empty() {
        return Err(Error::BadRequest(format!("{kind} {what} may not be empty")));
    }
    if segment.contains('/') || segment == "." || segment == ".." {
        return Err(Error::BadRequest(format!("{kind} {what} {segment:?} is not a valid path segment")));
    }
    Ok(())
}

/// True when `key` is `prefix` itself or lies beneath it.
///
/// `/routes/al` does not contain `/routes/alfa/foo`: the separator is always required.
pub fn in_prefix(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
