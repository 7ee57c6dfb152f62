use std::{
    io,
    path::{Path, PathBuf},
};

const ROOT_MARKER: &str = "$ROOT";
const SYSTEM_MARKER: &str = "$SYSTEM";

/// Resolves `$SYSTEM` and `$ROOT` prefixed paths
#[derive(Debug, Clone)]
pub struct Paths {
    system_root: PathBuf,
    user_root: PathBuf,
}

impl Paths {
    fn find_dev_root(first_root: &Path) -> Option<PathBuf> {
        let bn = first_root.file_name().and_then(std::ffi::OsStr::to_str);

        if bn == Some("release") || bn == Some("debug") || bn == Some("deps") {
            // Inside a cargo target directory, use the directory holding it
            let mut current_root = first_root.parent();
            while let Some(root) = current_root {
                if root.file_name().and_then(std::ffi::OsStr::to_str) == Some("target") {
                    return root.parent().map(Path::to_owned);
                }

                current_root = root.parent();
            }
        }

        None
    }

    fn find_bin_root(first_root: &Path) -> Option<PathBuf> {
        let bn = first_root.file_name().and_then(std::ffi::OsStr::to_str);

        if bn == Some("bin") {
            return first_root
                .parent()
                .map(|path| path.join("share").join("pixbadge"));
        }

        None
    }

    fn default_user_root() -> io::Result<PathBuf> {
        dirs::config_dir()
            .map(|path| path.join("pixbadge"))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no configuration directory"))
    }

    pub fn new(user_root: Option<PathBuf>) -> io::Result<Self> {
        let proc = std::env::current_exe()?;
        let first_root = proc
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent"))?;

        let system_root = if let Some(dev_root) = Self::find_dev_root(first_root) {
            debug!(path = %dev_root.display(), "found development root");
            dev_root
        } else if let Some(bin_root) = Self::find_bin_root(first_root) {
            debug!(path = %bin_root.display(), "found production root");
            bin_root
        } else {
            debug!(path = %first_root.display(), "no root found, using binary");
            first_root.to_owned()
        };

        let user_root = match user_root {
            Some(user_root) => user_root,
            None => Self::default_user_root()?,
        };
        debug!(path = %user_root.display(), "found user root");

        Ok(Self {
            system_root,
            user_root,
        })
    }

    /// Explicit roots, bypassing the executable lookup
    pub fn with_roots(system_root: impl Into<PathBuf>, user_root: impl Into<PathBuf>) -> Self {
        Self {
            system_root: system_root.into(),
            user_root: user_root.into(),
        }
    }

    pub fn user_root(&self) -> &Path {
        &self.user_root
    }

    pub fn resolve_path(&self, p: impl Into<PathBuf>) -> PathBuf {
        let p: PathBuf = p.into();

        if p.is_absolute() {
            trace!(path = %p.display(), "left unchanged");
            return p;
        }

        let mut out_path = PathBuf::new();
        let mut components = p.components().peekable();

        if let Some(component) = components.peek() {
            let component = component.as_os_str().to_str();
            if component == Some(SYSTEM_MARKER) {
                out_path.push(&self.system_root);
                components.next();
            } else if component == Some(ROOT_MARKER) {
                out_path.push(&self.user_root);
                components.next();
            }
        }

        out_path.extend(components);

        trace!(src = %p.display(), dst = %out_path.display(), "remapped path");
        out_path
    }
}
