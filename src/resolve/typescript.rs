use std::collections::HashSet;

use once_cell::sync::Lazy;

use super::{ResolveContext, Resolver};

pub struct TypeScriptResolver;

const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

static KNOWN_PACKAGES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "react", "react-dom", "next", "vue", "angular", "express", "lodash", "axios", "moment",
        "dayjs", "date-fns", "uuid", "zod", "yup",
    ]
    .into_iter()
    .collect()
});

static GLOBALS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "console", "JSON", "Math", "Object", "Array", "String", "Number", "Boolean", "Date",
        "Promise", "Map", "Set", "WeakMap", "WeakSet", "Symbol", "Error", "TypeError",
        "RangeError", "RegExp", "Reflect", "Proxy", "Intl", "BigInt", "parseInt",
        "parseFloat", "isNaN", "isFinite", "setTimeout", "clearTimeout", "setInterval",
        "clearInterval", "queueMicrotask", "structuredClone", "fetch", "URL",
        "URLSearchParams", "encodeURIComponent", "decodeURIComponent", "require", "process",
        "Buffer", "window", "document", "globalThis", "alert", "localStorage",
        "sessionStorage", "requestAnimationFrame", "AbortController", "FormData", "Headers",
        "Request", "Response", "TextEncoder", "TextDecoder",
    ]
    .into_iter()
    .collect()
});

/// `@scope/pkg/sub` → `@scope/pkg`, `lodash/fp` → `lodash`.
fn package_name(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => specifier,
        }
    } else {
        first
    }
}

/// Joins path segments, folding `.` and `..`. Returns None when `..` climbs past the root.
fn normalize(path: &str) -> Option<String> {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop()?;
            }
            _ => out.push(part),
        }
    }
    Some(out.join("/"))
}

fn parent_dir(file: &str) -> &str {
    file.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn join(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rel)
    }
}

impl TypeScriptResolver {
    /// Exact path, then each extension, then `index.<ext>` inside the directory.
    fn try_file(ctx: &ResolveContext, path: &str) -> Option<String> {
        let path = normalize(path)?;
        let has_ext = path
            .rsplit_once('.')
            .is_some_and(|(_, ext)| EXTENSIONS.contains(&ext));
        if has_ext && ctx.layout.contains(&path) {
            return Some(path);
        }
        for ext in EXTENSIONS {
            let candidate = format!("{}.{}", path, ext);
            if ctx.layout.contains(&candidate) {
                return Some(candidate);
            }
        }
        for ext in EXTENSIONS {
            let candidate = join(&path, &format!("index.{}", ext));
            if ctx.layout.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn matches_alias(ctx: &ResolveContext, specifier: &str) -> bool {
        ctx.config
            .typescript
            .paths
            .iter()
            .any(|alias| alias_rest(&alias.pattern, specifier).is_some())
    }

    fn via_base_url(ctx: &ResolveContext, specifier: &str) -> Option<String> {
        let base = ctx.config.typescript.base_url.as_deref()?;
        Self::try_file(ctx, &join(base, specifier))
    }
}

/// The part of `specifier` matched by `*` in `pattern`, or "" for an exact match.
fn alias_rest<'s>(pattern: &str, specifier: &'s str) -> Option<&'s str> {
    match pattern.strip_suffix('*') {
        Some(prefix) => specifier.strip_prefix(prefix),
        None => (pattern == specifier).then_some(""),
    }
}

impl Resolver for TypeScriptResolver {
    fn language(&self) -> &'static str {
        "typescript"
    }

    fn is_external(&self, ctx: &ResolveContext, specifier: &str) -> bool {
        if specifier.starts_with('.') || specifier.starts_with('/') {
            return false;
        }
        let package = package_name(specifier);
        if KNOWN_PACKAGES.contains(package)
            || specifier.starts_with("node:")
            || ctx.config.typescript.external_packages.iter().any(|p| p == package)
        {
            return true;
        }
        if Self::matches_alias(ctx, specifier) {
            return false;
        }
        Self::via_base_url(ctx, specifier).is_none()
    }

    fn locate_module(&self, ctx: &ResolveContext, specifier: &str) -> Option<String> {
        if specifier.starts_with('.') {
            let from_dir = parent_dir(&ctx.file.file_path);
            return Self::try_file(ctx, &join(from_dir, specifier));
        }
        if Self::matches_alias(ctx, specifier) {
            return self.resolve_alias(ctx, specifier);
        }
        Self::via_base_url(ctx, specifier)
    }

    /// First alias whose pattern matches wins; its targets are tried in order.
    fn resolve_alias(&self, ctx: &ResolveContext, specifier: &str) -> Option<String> {
        let ts = &ctx.config.typescript;
        let (alias, rest) = ts
            .paths
            .iter()
            .find_map(|alias| alias_rest(&alias.pattern, specifier).map(|rest| (alias, rest)))?;
        alias.targets.iter().find_map(|target| {
            let substituted = target.replace('*', rest);
            let path = match ts.base_url.as_deref() {
                Some(base) => join(base, &substituted),
                None => substituted,
            };
            Self::try_file(ctx, &path)
        })
    }

    fn builtin_target(&self, name: &str) -> Option<String> {
        let root = name.split('.').next().unwrap_or(name);
        GLOBALS
            .contains(root)
            .then(|| format!("globalThis.{}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathAlias, ProjectConfig};
    use crate::parser::ParsedFile;
    use crate::resolve::{ExportIndex, ProjectLayout};

    const FILES: &[&str] = &[
        "src/app.tsx",
        "src/utils.ts",
        "src/components/index.tsx",
        "src/lib/api.ts",
        "shared/api.ts",
    ];

    fn with_ctx(config: ProjectConfig, check: impl FnOnce(&ResolveContext)) {
        let layout = ProjectLayout::new(FILES.iter().map(|f| f.to_string()), &config);
        let exports = ExportIndex::new();
        let from = ParsedFile {
            file_path: "src/app.tsx".to_string(),
            ..Default::default()
        };
        let ctx = ResolveContext::new(&from, &exports, &layout, &config);
        check(&ctx);
    }

    fn alias(pattern: &str, target: &str) -> PathAlias {
        PathAlias {
            pattern: pattern.to_string(),
            targets: vec![target.to_string()],
        }
    }

    #[test]
    fn test_relative_with_extension_and_index_fallback() {
        with_ctx(ProjectConfig::default(), |ctx| {
            let r = TypeScriptResolver;
            assert_eq!(r.locate_module(ctx, "./utils").as_deref(), Some("src/utils.ts"));
            assert_eq!(r.locate_module(ctx, "./utils.ts").as_deref(), Some("src/utils.ts"));
            assert_eq!(r.locate_module(ctx, "./components").as_deref(), Some("src/components/index.tsx"));
            assert_eq!(r.locate_module(ctx, "../shared/api").as_deref(), Some("shared/api.ts"));
            assert_eq!(r.locate_module(ctx, "./missing"), None);
        });
    }

    #[test]
    fn test_first_matching_alias_wins() {
        let mut config = ProjectConfig::default();
        config.typescript.paths = vec![alias("@/lib/*", "shared/*"), alias("@/*", "src/*")];
        with_ctx(config, |ctx| {
            let r = TypeScriptResolver;
            assert_eq!(r.locate_module(ctx, "@/lib/api").as_deref(), Some("shared/api.ts"));
            assert_eq!(r.locate_module(ctx, "@/utils").as_deref(), Some("src/utils.ts"));
            assert!(!r.is_external(ctx, "@/utils"));
        });
    }

    #[test]
    fn test_base_url() {
        let mut config = ProjectConfig::default();
        config.typescript.base_url = Some("src".into());
        with_ctx(config, |ctx| {
            let r = TypeScriptResolver;
            assert_eq!(r.locate_module(ctx, "lib/api").as_deref(), Some("src/lib/api.ts"));
            assert!(!r.is_external(ctx, "lib/api"));
            assert!(r.is_external(ctx, "left-pad"));
        });
    }

    #[test]
    fn test_external_packages() {
        with_ctx(ProjectConfig::default(), |ctx| {
            let r = TypeScriptResolver;
            assert!(r.is_external(ctx, "react"));
            assert!(r.is_external(ctx, "lodash/fp"));
            assert!(r.is_external(ctx, "@tanstack/react-query"));
            assert!(r.is_external(ctx, "node:fs"));
            assert!(!r.is_external(ctx, "./utils"));
        });
        assert_eq!(package_name("@scope/pkg/deep"), "@scope/pkg");
        assert_eq!(TypeScriptResolver.builtin_target("console.log").as_deref(), Some("globalThis.console.log"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("src/./a/../b").as_deref(), Some("src/b"));
        assert_eq!(normalize("../x"), None);
    }
}
