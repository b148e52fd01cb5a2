use std::collections::HashSet;

use once_cell::sync::Lazy;

use super::{ResolveContext, Resolver};

pub struct PythonResolver;

static STDLIB_MODULES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "__future__", "abc", "argparse", "array", "ast", "asyncio", "atexit", "base64", "bdb",
        "binascii", "bisect", "builtins", "bz2", "calendar", "cmath", "cmd", "codecs",
        "collections", "colorsys", "concurrent", "configparser", "contextlib", "contextvars",
        "copy", "copyreg", "cProfile", "csv", "ctypes", "dataclasses", "datetime", "dbm",
        "decimal", "difflib", "dis", "email", "encodings", "enum", "errno", "faulthandler",
        "fcntl", "filecmp", "fileinput", "fnmatch", "fractions", "ftplib", "functools", "gc",
        "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib", "heapq",
        "hmac", "html", "http", "imaplib", "importlib", "inspect", "io", "ipaddress",
        "itertools", "json", "keyword", "linecache", "locale", "logging", "lzma", "mailbox",
        "marshal", "math", "mimetypes", "mmap", "multiprocessing", "netrc", "numbers",
        "operator", "optparse", "os", "pathlib", "pdb", "pickle", "pkgutil", "platform",
        "plistlib", "poplib", "posix", "pprint", "profile", "pstats", "pty", "pwd",
        "py_compile", "queue", "quopri", "random", "re", "readline", "reprlib", "resource",
        "runpy", "sched", "secrets", "select", "selectors", "shelve", "shlex", "shutil",
        "signal", "site", "smtplib", "socket", "socketserver", "sqlite3", "ssl", "stat",
        "statistics", "string", "stringprep", "struct", "subprocess", "symtable", "sys",
        "sysconfig", "syslog", "tabnanny", "tarfile", "tempfile", "termios", "textwrap",
        "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib", "trace",
        "traceback", "tracemalloc", "tty", "types", "typing", "typing_extensions",
        "unicodedata", "unittest", "urllib", "uuid", "venv", "warnings", "wave", "weakref",
        "webbrowser", "wsgiref", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib",
        "zoneinfo",
    ]
    .into_iter()
    .collect()
});

static BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool", "breakpoint",
        "bytearray", "bytes", "callable", "chr", "classmethod", "compile", "complex",
        "delattr", "dict", "dir", "divmod", "enumerate", "eval", "exec", "filter", "float",
        "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help", "hex", "id",
        "input", "int", "isinstance", "issubclass", "iter", "len", "list", "locals", "map",
        "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print",
        "property", "range", "repr", "reversed", "round", "set", "setattr", "slice",
        "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
        "None", "NotImplemented", "Ellipsis", "BaseException", "Exception", "ArithmeticError",
        "AssertionError", "AttributeError", "EOFError", "ImportError", "IndexError",
        "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError", "ModuleNotFoundError",
        "NameError", "NotImplementedError", "OSError", "OverflowError", "PermissionError",
        "RecursionError", "RuntimeError", "StopIteration", "StopAsyncIteration",
        "SyntaxError", "SystemExit", "TimeoutError", "TypeError", "UnicodeDecodeError",
        "UnicodeEncodeError", "ValueError", "ZeroDivisionError", "FileNotFoundError",
        "FileExistsError", "ConnectionError", "DeprecationWarning", "UserWarning",
    ]
    .into_iter()
    .collect()
});

impl PythonResolver {
    fn candidates(path: &str) -> [String; 2] {
        [format!("{}.py", path), format!("{}/__init__.py", path)]
    }

    fn find(ctx: &ResolveContext, path: &str) -> Option<String> {
        Self::candidates(path)
            .into_iter()
            .find(|candidate| ctx.layout.contains(candidate))
    }

    fn locate_relative(ctx: &ResolveContext, specifier: &str) -> Option<String> {
        let dots = specifier.chars().take_while(|c| *c == '.').count();
        let rest = &specifier[dots..];

        let mut dir: Vec<&str> = ctx.file.file_path.split('/').collect();
        dir.pop();
        for _ in 1..dots {
            dir.pop()?;
        }
        dir.extend(rest.split('.').filter(|p| !p.is_empty()));
        if dir.is_empty() {
            return None;
        }
        Self::find(ctx, &dir.join("/"))
    }
}

impl Resolver for PythonResolver {
    fn language(&self) -> &'static str {
        "python"
    }

    fn is_external(&self, ctx: &ResolveContext, specifier: &str) -> bool {
        if specifier.starts_with('.') {
            return false;
        }
        let root = specifier.split('.').next().unwrap_or(specifier);
        STDLIB_MODULES.contains(root) || !ctx.layout.python_packages.contains(root)
    }

    fn locate_module(&self, ctx: &ResolveContext, specifier: &str) -> Option<String> {
        if specifier.starts_with('.') {
            return Self::locate_relative(ctx, specifier);
        }
        let path = specifier.replace('.', "/");
        if let Some(found) = Self::find(ctx, &path) {
            return Some(found);
        }
        ctx.config
            .python
            .source_roots
            .iter()
            .find_map(|root| Self::find(ctx, &format!("{}/{}", root.trim_end_matches('/'), path)))
    }

    fn resolve_alias(&self, _ctx: &ResolveContext, _specifier: &str) -> Option<String> {
        None
    }

    fn builtin_target(&self, name: &str) -> Option<String> {
        let root = name.split('.').next().unwrap_or(name);
        BUILTINS
            .contains(root)
            .then(|| format!("builtins.{}", name))
    }

    fn has_submodules(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::parser::ParsedFile;
    use crate::resolve::{ExportIndex, ProjectLayout};

    fn layout(files: &[&str], config: &ProjectConfig) -> ProjectLayout {
        ProjectLayout::new(files.iter().map(|f| f.to_string()), config)
    }

    fn file(path: &str) -> ParsedFile {
        ParsedFile {
            file_path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_locate_absolute_and_package() {
        let config = ProjectConfig::default();
        let layout = layout(&["app.py", "pkg/__init__.py", "pkg/util.py"], &config);
        let exports = ExportIndex::new();
        let from = file("app.py");
        let ctx = ResolveContext::new(&from, &exports, &layout, &config);

        assert_eq!(PythonResolver.locate_module(&ctx, "pkg").as_deref(), Some("pkg/__init__.py"));
        assert_eq!(PythonResolver.locate_module(&ctx, "pkg.util").as_deref(), Some("pkg/util.py"));
        assert_eq!(PythonResolver.locate_module(&ctx, "pkg.none"), None);
    }

    #[test]
    fn test_locate_relative_climbs_dots() {
        let config = ProjectConfig::default();
        let layout = layout(&["a/b/c.py", "a/b/d.py", "a/e.py"], &config);
        let exports = ExportIndex::new();
        let from = file("a/b/c.py");
        let ctx = ResolveContext::new(&from, &exports, &layout, &config);

        assert_eq!(PythonResolver.locate_module(&ctx, ".d").as_deref(), Some("a/b/d.py"));
        assert_eq!(PythonResolver.locate_module(&ctx, "..e").as_deref(), Some("a/e.py"));
        assert_eq!(PythonResolver.locate_module(&ctx, "....x"), None);
    }

    #[test]
    fn test_source_roots() {
        let mut config = ProjectConfig::default();
        config.python.source_roots.push("src".into());
        let layout = layout(&["src/core/engine.py"], &config);
        let exports = ExportIndex::new();
        let from = file("tests/test_engine.py");
        let ctx = ResolveContext::new(&from, &exports, &layout, &config);

        assert!(!PythonResolver.is_external(&ctx, "core.engine"));
        assert_eq!(
            PythonResolver.locate_module(&ctx, "core.engine").as_deref(),
            Some("src/core/engine.py")
        );
    }

    #[test]
    fn test_external_detection() {
        let config = ProjectConfig::default();
        let layout = layout(&["app.py", "json_utils/__init__.py"], &config);
        let exports = ExportIndex::new();
        let from = file("app.py");
        let ctx = ResolveContext::new(&from, &exports, &layout, &config);

        assert!(PythonResolver.is_external(&ctx, "os.path"));
        assert!(PythonResolver.is_external(&ctx, "requests"));
        assert!(!PythonResolver.is_external(&ctx, "json_utils"));
        assert!(!PythonResolver.is_external(&ctx, ".sibling"));
        assert_eq!(PythonResolver.builtin_target("len").as_deref(), Some("builtins.len"));
        assert_eq!(PythonResolver.builtin_target("helper"), None);
    }
}
