//! Media backend detection and invocation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::SupervisorError;

/// Supported external players, in probe preference order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// mpv
    Mpv,
    /// ffplay from the ffmpeg suite
    Ffplay,
}

impl BackendKind {
    /// Fixed probe order
    pub const PREFERENCE: [BackendKind; 2] = [BackendKind::Mpv, BackendKind::Ffplay];

    /// Executable name looked up on the search path
    pub fn executable_name(self) -> &'static str {
        match self {
            Self::Mpv => "mpv",
            Self::Ffplay => "ffplay",
        }
    }

    /// Arguments playing `url` with no video and no terminal chatter
    pub fn play_args(self, url: &str) -> Vec<String> {
        let flags: &[&str] = match self {
            Self::Mpv => &["--no-video", "--quiet"],
            Self::Ffplay => &["-nodisp", "-autoexit", "-loglevel", "quiet"],
        };
        flags
            .iter()
            .map(|s| (*s).to_string())
            .chain(std::iter::once(url.to_string()))
            .collect()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable_name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mpv" => Ok(Self::Mpv),
            "ffplay" => Ok(Self::Ffplay),
            other => Err(format!("unknown backend '{other}' (expected mpv or ffplay)")),
        }
    }
}

/// A located backend executable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backend {
    kind: BackendKind,
    program: PathBuf,
}

impl Backend {
    /// Use `program` as the executable for `kind`
    pub fn new(kind: BackendKind, program: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            program: program.into(),
        }
    }

    /// Which player this is
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Resolved executable path
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Build the playback command for `url`
    ///
    /// All stdio is detached and the child is killed if its handle is
    /// dropped.
    pub(crate) fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.kind.play_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Finds a usable backend executable
///
/// Lookup order for each candidate kind: the executable search path (unless
/// disabled), then each search directory in order. The default directories
/// are the bootstrap install directory followed by platform-conventional
/// install locations.
#[derive(Clone, Debug)]
pub struct BackendLocator {
    preferred: Option<BackendKind>,
    search_dirs: Vec<PathBuf>,
    use_system_path: bool,
}

impl Default for BackendLocator {
    fn default() -> Self {
        let mut search_dirs = Vec::new();
        if let Some(dir) = bootstrap_dir() {
            search_dirs.push(dir);
        }
        search_dirs.extend(platform_dirs());
        Self {
            preferred: None,
            search_dirs,
            use_system_path: true,
        }
    }
}

impl BackendLocator {
    /// Locator with the default search order
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator that only looks in `dirs` and ignores the executable search path
    pub fn isolated(dirs: Vec<PathBuf>) -> Self {
        Self {
            preferred: None,
            search_dirs: dirs,
            use_system_path: false,
        }
    }

    /// Try `kind` before the fixed preference order
    #[must_use]
    pub fn prefer(mut self, kind: Option<BackendKind>) -> Self {
        self.preferred = kind;
        self
    }

    /// Consult `dirs` before the default directories
    #[must_use]
    pub fn with_search_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut combined: Vec<PathBuf> = dirs.into_iter().collect();
        combined.append(&mut self.search_dirs);
        self.search_dirs = combined;
        self
    }

    /// Candidate kinds in the order they are tried
    fn candidates(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::with_capacity(BackendKind::PREFERENCE.len());
        if let Some(kind) = self.preferred {
            kinds.push(kind);
        }
        for kind in BackendKind::PREFERENCE {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }

    /// Locate the first available backend
    pub fn locate(&self) -> Result<Backend, SupervisorError> {
        for kind in self.candidates() {
            if let Some(program) = self.find(kind) {
                tracing::info!(backend = %kind, program = ?program, "Media backend found");
                return Ok(Backend::new(kind, program));
            }
            tracing::debug!(backend = %kind, "Media backend not found");
        }
        Err(SupervisorError::BackendUnavailable)
    }

    fn find(&self, kind: BackendKind) -> Option<PathBuf> {
        let name = kind.executable_name();

        if self.use_system_path {
            if let Ok(path) = which::which(name) {
                return Some(path);
            }
        }

        self.search_dirs
            .iter()
            .filter(|dir| dir.is_dir())
            .find_map(|dir| which::which_in(name, Some(dir), dir).ok())
    }
}

/// Where the bootstrap installer drops backend binaries
///
/// Always `<user-config-dir>/valvefm/bin`; a relocated control directory
/// (`--control-dir`) only moves the endpoint, not this directory. Add other
/// locations through [`BackendLocator::with_search_dirs`].
pub fn bootstrap_dir() -> Option<PathBuf> {
    crate::endpoint::default_control_dir()
        .ok()
        .map(|dir| dir.join("bin"))
}

fn platform_dirs() -> Vec<PathBuf> {
    #[cfg(windows)]
    let dirs: &[&str] = &[
        r"C:\Program Files\mpv",
        r"C:\Program Files (x86)\mpv",
        r"C:\mpv",
    ];

    #[cfg(target_os = "macos")]
    let dirs: &[&str] = &[
        "/usr/local/bin",
        "/opt/homebrew/bin",
        "/Applications/mpv.app/Contents/MacOS",
    ];

    #[cfg(all(unix, not(target_os = "macos")))]
    let dirs: &[&str] = &["/usr/bin", "/usr/local/bin"];

    #[cfg(not(any(unix, windows)))]
    let dirs: &[&str] = &[];

    dirs.iter().map(PathBuf::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_play_args() {
        assert_eq!(
            BackendKind::Mpv.play_args("http://radio/stream"),
            vec!["--no-video", "--quiet", "http://radio/stream"]
        );
        assert_eq!(
            BackendKind::Ffplay.play_args("http://radio/stream"),
            vec!["-nodisp", "-autoexit", "-loglevel", "quiet", "http://radio/stream"]
        );
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("MPV".parse::<BackendKind>(), Ok(BackendKind::Mpv));
        assert_eq!(" ffplay ".parse::<BackendKind>(), Ok(BackendKind::Ffplay));
        assert!("vlc".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_candidate_order() {
        let locator = BackendLocator::isolated(Vec::new());
        assert_eq!(
            locator.candidates(),
            vec![BackendKind::Mpv, BackendKind::Ffplay]
        );

        let locator = locator.prefer(Some(BackendKind::Ffplay));
        assert_eq!(
            locator.candidates(),
            vec![BackendKind::Ffplay, BackendKind::Mpv]
        );
    }

    #[test]
    fn test_isolated_empty_is_unavailable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let locator = BackendLocator::isolated(vec![temp_dir.path().to_path_buf()]);
        assert!(matches!(
            locator.locate(),
            Err(SupervisorError::BackendUnavailable)
        ));
    }

    #[cfg(unix)]
    fn install_fake(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_mpv_preferred_over_ffplay() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        install_fake(temp_dir.path(), "ffplay");
        let mpv = install_fake(temp_dir.path(), "mpv");

        let backend = BackendLocator::isolated(vec![temp_dir.path().to_path_buf()])
            .locate()
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::Mpv);
        assert_eq!(backend.program(), mpv.as_path());
    }

    #[cfg(unix)]
    #[test]
    fn test_falls_back_to_ffplay() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        install_fake(temp_dir.path(), "ffplay");

        let backend = BackendLocator::isolated(vec![temp_dir.path().to_path_buf()])
            .locate()
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::Ffplay);
    }

    #[cfg(unix)]
    #[test]
    fn test_preferred_backend_wins() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        install_fake(temp_dir.path(), "ffplay");
        install_fake(temp_dir.path(), "mpv");

        let backend = BackendLocator::isolated(vec![temp_dir.path().to_path_buf()])
            .prefer(Some(BackendKind::Ffplay))
            .locate()
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::Ffplay);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_is_skipped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("mpv"), "not a program").unwrap();

        let result = BackendLocator::isolated(vec![temp_dir.path().to_path_buf()]).locate();
        assert!(matches!(result, Err(SupervisorError::BackendUnavailable)));
    }
}
