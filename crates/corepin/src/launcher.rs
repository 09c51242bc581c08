//! Hands control to an installed package manager

use crate::cache::{url_basename, InstallInfo};
use crate::config::BinSpec;
use crate::descriptor::Locator;
use crate::settings::{Settings, ROOT_ENV};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while launching
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The install does not provide the requested binary
    #[error("Assertion failed: {0}")]
    AssertionFailure(String),

    /// Spawning or waiting on the child failed
    #[error("Failed to run {program}: {error}")]
    IoError {
        program: String,
        error: std::io::Error,
    },

    /// Replacing the process image failed
    #[error("Failed to exec {program}: {error}")]
    ExecError {
        program: String,
        error: std::io::Error,
    },
}

/// Runs binaries of installed package managers
pub struct Launcher<'a> {
    settings: &'a Settings,
    env: &'a [(String, String)],
}

impl<'a> Launcher<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings, env: &[] }
    }

    /// Extra variables for the launched process
    pub fn with_env(mut self, env: &'a [(String, String)]) -> Self {
        self.env = env;
        self
    }

    /// Run `bin_name` from `install` with `args`
    ///
    /// On Unix the current process is replaced and this only returns on
    /// failure. With spawning (non-Unix or `COREPIN_SPAWN=1`) the child's exit
    /// code is returned, with 1 standing in for death by signal.
    pub fn run_version(
        &self,
        locator: &Locator,
        install: &InstallInfo,
        bin_name: &str,
        args: &[OsString],
    ) -> Result<i32, LaunchError> {
        let bin_path = resolve_bin_path(install, bin_name)?;
        let mut command = self.command(&bin_path, args);

        debug!(
            %locator,
            bin = bin_name,
            path = %bin_path.display(),
            interpreter = %self.settings.interpreter,
            "launching"
        );

        if self.settings.force_spawn || cfg!(not(unix)) {
            return self.spawn(command);
        }
        self.exec(&mut command)
    }

    fn command(&self, bin_path: &std::path::Path, args: &[OsString]) -> Command {
        let mut command = Command::new(&self.settings.interpreter);
        command
            .arg(bin_path)
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(root) = broker_root() {
            command.env(ROOT_ENV, root);
        }
        command
    }

    fn spawn(&self, mut command: Command) -> Result<i32, LaunchError> {
        let io_error = |error| LaunchError::IoError {
            program: self.settings.interpreter.clone(),
            error,
        };

        let mut child = command.spawn().map_err(io_error)?;
        // Installed after the spawn so the child keeps the default disposition
        let _interrupts = InterruptGuard::ignore();
        let status = child.wait().map_err(io_error)?;

        debug!(?status, "child exited");
        Ok(status.code().unwrap_or(1))
    }

    #[cfg(unix)]
    fn exec(&self, command: &mut Command) -> Result<i32, LaunchError> {
        use std::os::unix::process::CommandExt;

        let error = command.exec();
        Err(LaunchError::ExecError {
            program: self.settings.interpreter.clone(),
            error,
        })
    }

    #[cfg(not(unix))]
    fn exec(&self, command: &mut Command) -> Result<i32, LaunchError> {
        let command = std::mem::replace(command, Command::new(&self.settings.interpreter));
        self.spawn(command)
    }
}

/// Path of `bin_name` inside an install
pub fn resolve_bin_path(install: &InstallInfo, bin_name: &str) -> Result<PathBuf, LaunchError> {
    let missing = || {
        LaunchError::AssertionFailure(format!(
            "Expected {} to provide a binary named {}",
            install.location.display(),
            bin_name
        ))
    };

    match &install.bin {
        BinSpec::Map(map) => map
            .get(bin_name)
            .map(|relative| install.location.join(relative))
            .ok_or_else(missing),
        BinSpec::List(names) if names.iter().any(|n| n == bin_name) => {
            Ok(install.location.join(url_basename(&install.url)))
        }
        BinSpec::List(_) => Err(missing()),
    }
}

/// Directory holding the broker executable
fn broker_root() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
}

/// Ignores SIGINT while alive, restoring the previous disposition on drop
///
/// The delegated package manager receives the terminal's interrupt itself
/// and decides how to exit.
struct InterruptGuard {
    #[cfg(unix)]
    previous: Option<libc::sighandler_t>,
}

impl InterruptGuard {
    #[cfg(unix)]
    fn ignore() -> Self {
        // SAFETY: SIG_IGN is a valid disposition and the previous one is
        // restored verbatim on drop.
        let previous = unsafe { libc::signal(libc::SIGINT, libc::SIG_IGN) };
        Self {
            previous: (previous != libc::SIG_ERR).then_some(previous),
        }
    }

    #[cfg(not(unix))]
    fn ignore() -> Self {
        Self {}
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(previous) = self.previous {
            // SAFETY: restores the disposition returned by `signal`.
            unsafe {
                libc::signal(libc::SIGINT, previous);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn install(bin: BinSpec) -> InstallInfo {
        InstallInfo {
            location: PathBuf::from("/cache/yarn/4.0.0"),
            bin,
            url: "https://repo.yarnpkg.com/4.0.0/packages/yarnpkg-cli/bin/yarn.js".to_string(),
            hash: None,
        }
    }

    #[test]
    fn test_map_bins() {
        let info = install(BinSpec::Map(BTreeMap::from([(
            "yarn".to_string(),
            "bin/yarn.js".to_string(),
        )])));
        assert_eq!(
            resolve_bin_path(&info, "yarn").unwrap(),
            PathBuf::from("/cache/yarn/4.0.0/bin/yarn.js")
        );
        assert!(matches!(
            resolve_bin_path(&info, "yarnpkg"),
            Err(LaunchError::AssertionFailure(_))
        ));
    }

    #[test]
    fn test_list_bins_use_url_basename() {
        let info = install(BinSpec::List(vec!["yarn".to_string(), "yarnpkg".to_string()]));
        assert_eq!(
            resolve_bin_path(&info, "yarnpkg").unwrap(),
            PathBuf::from("/cache/yarn/4.0.0/yarn.js")
        );
        assert!(resolve_bin_path(&info, "npm").is_err());
    }

    // Spawning tests touch the process-wide SIGINT disposition
    #[cfg(unix)]
    static SPAWN: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[cfg(unix)]
    fn script(dir: &std::path::Path, body: &str) -> (Settings, InstallInfo) {
        std::fs::write(dir.join("pm.sh"), body).unwrap();

        let mut settings = Settings::with_install_root(dir);
        settings.interpreter = "sh".to_string();
        settings.force_spawn = true;

        let info = InstallInfo {
            location: dir.to_path_buf(),
            bin: BinSpec::Map(BTreeMap::from([("pm".to_string(), "pm.sh".to_string())])),
            url: String::new(),
            hash: None,
        };
        (settings, info)
    }

    #[cfg(unix)]
    fn sigint_disposition() -> libc::sighandler_t {
        // SAFETY: a null new action only reads the current one.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            assert_eq!(libc::sigaction(libc::SIGINT, std::ptr::null(), &mut action), 0);
            action.sa_sigaction
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_returns_exit_code() {
        let _serial = SPAWN.lock();
        let temp = tempfile::TempDir::new().unwrap();
        let (settings, info) = script(temp.path(), "exit 7\n");

        let code = Launcher::new(&settings)
            .run_version(&Locator::new("yarn", "1.0.0"), &info, "pm", &[])
            .unwrap();
        assert_eq!(code, 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupts_ignored_only_while_child_runs() {
        let _serial = SPAWN.lock();
        let temp = tempfile::TempDir::new().unwrap();
        let (settings, info) = script(temp.path(), "sleep 1\n");
        // Background shells start children with SIGINT ignored
        // SAFETY: SIG_DFL is valid and the original is restored below.
        let original = unsafe { libc::signal(libc::SIGINT, libc::SIG_DFL) };
        let before = sigint_disposition();
        assert_eq!(before, libc::SIG_DFL);

        let observed = std::thread::scope(|scope| {
            let child = scope.spawn(|| {
                Launcher::new(&settings).run_version(&Locator::new("yarn", "1.0.0"), &info, "pm", &[])
            });

            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
            let mut observed = false;
            while !child.is_finished() && std::time::Instant::now() < deadline {
                if sigint_disposition() == libc::SIG_IGN {
                    observed = true;
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }

            assert_eq!(child.join().unwrap().unwrap(), 0);
            observed
        });

        let after = sigint_disposition();
        // SAFETY: puts back what `signal` returned above.
        unsafe { libc::signal(libc::SIGINT, original) };

        assert!(observed, "SIGINT was not ignored while the child ran");
        assert_eq!(after, before);
    }

    #[cfg(unix)]
    #[test]
    fn test_extra_env_reaches_child() {
        let _serial = SPAWN.lock();
        let temp = tempfile::TempDir::new().unwrap();
        let (settings, info) = script(temp.path(), "test \"$COREPIN_GREETING\" = hello\n");
        let env = vec![("COREPIN_GREETING".to_string(), "hello".to_string())];

        let locator = Locator::new("yarn", "1.0.0");
        let plain = Launcher::new(&settings).run_version(&locator, &info, "pm", &[]);
        assert_eq!(plain.unwrap(), 1);

        let code = Launcher::new(&settings)
            .with_env(&env)
            .run_version(&locator, &info, "pm", &[])
            .unwrap();
        assert_eq!(code, 0);
    }
}
