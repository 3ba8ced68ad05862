//! Descriptor of a launchable target.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants;

/// Everything needed to start an application and embed its window.
///
/// Instances share a spec through an `Arc`; editing a catalog entry builds a
/// new spec and leaves running instances untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSpec {
    /// The display name of the application.
    pub name: String,
    /// The path of the executable.
    pub path: PathBuf,
    /// The command line passed verbatim to the executable.
    pub arguments: String,
    /// Working directory; the executable's own directory when unset.
    pub work_directory: Option<PathBuf>,
    /// Fit the window to its container (`true`) or keep its native size.
    pub resize: bool,
    /// Whether the catalog entry may be running more than once.
    pub allow_multiple: bool,
    /// Upper bound for the window to appear after launch.
    pub max_load_time: Duration,
}

impl ApplicationSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            arguments: String::new(),
            work_directory: None,
            resize: true,
            allow_multiple: false,
            max_load_time: constants::DEFAULT_MAX_LOAD_TIME,
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    pub fn with_work_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_directory = Some(dir.into());
        self
    }

    pub fn with_resize(mut self, resize: bool) -> Self {
        self.resize = resize;
        self
    }

    pub fn with_allow_multiple(mut self, allow: bool) -> Self {
        self.allow_multiple = allow;
        self
    }

    pub fn with_max_load_time(mut self, max_load_time: Duration) -> Self {
        self.max_load_time = max_load_time;
        self
    }

    /// The directory the process is started in.
    ///
    /// Falls back to the executable's parent directory, and to `None` (inherit
    /// the host's directory) for bare names such as `notepad.exe`.
    pub fn effective_work_directory(&self) -> Option<&Path> {
        match &self.work_directory {
            Some(dir) if !dir.as_os_str().is_empty() => Some(dir.as_path()),
            _ => self
                .path
                .parent()
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// Two specs launch the same thing when path and arguments agree.
    pub fn same_target(&self, other: &ApplicationSpec) -> bool {
        self.path == other.path && self.arguments == other.arguments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_directory_defaults_to_executable_directory() {
        let spec = ApplicationSpec::new("Tool", "C:/tools/bin/tool.exe");
        assert_eq!(
            spec.effective_work_directory(),
            Some(Path::new("C:/tools/bin"))
        );

        let bare = ApplicationSpec::new("Notepad", "notepad.exe");
        assert_eq!(bare.effective_work_directory(), None);

        let explicit = bare.with_work_directory("D:/work");
        assert_eq!(explicit.effective_work_directory(), Some(Path::new("D:/work")));
    }

    #[test]
    fn defaults_match_catalog_defaults() {
        let spec = ApplicationSpec::new("Calc", "calc.exe");
        assert!(spec.resize);
        assert!(!spec.allow_multiple);
        assert_eq!(spec.max_load_time, Duration::from_secs(5));
    }

    #[test]
    fn same_target_ignores_display_name() {
        let a = ApplicationSpec::new("A", "app.exe").with_arguments("-x");
        let b = ApplicationSpec::new("B", "app.exe").with_arguments("-x");
        let c = ApplicationSpec::new("A", "app.exe").with_arguments("-y");
        assert!(a.same_target(&b));
        assert!(!a.same_target(&c));
    }
}
