use std::path::PathBuf;
use std::time::Duration;

use tb_core::ScriptLanguage;

use crate::executor::DEFAULT_TIMEOUT;

/// Placeholder replaced by the package path in installer argument templates.
pub const PACKAGE_PLACEHOLDER: &str = "{package}";

/// External tools used by the installer and script processors.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub installer: PathBuf,
    pub install_args: Vec<String>,
    pub uninstall_args: Vec<String>,
    pub powershell: PathBuf,
    pub shell: PathBuf,
    pub python: PathBuf,
    pub timeout: Duration,
}

impl Default for ToolConfig {
    #[cfg(windows)]
    fn default() -> Self {
        Self {
            installer: PathBuf::from("msiexec"),
            install_args: vec!["/i".into(), PACKAGE_PLACEHOLDER.into(), "/qn".into()],
            uninstall_args: vec!["/x".into(), PACKAGE_PLACEHOLDER.into(), "/qn".into()],
            powershell: PathBuf::from("powershell"),
            shell: PathBuf::from("cmd"),
            python: PathBuf::from("python"),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Installer packages are self-installing scripts taking an
    /// `install`/`uninstall` verb.
    #[cfg(not(windows))]
    fn default() -> Self {
        Self {
            installer: PathBuf::from("sh"),
            install_args: vec![PACKAGE_PLACEHOLDER.into(), "install".into()],
            uninstall_args: vec![PACKAGE_PLACEHOLDER.into(), "uninstall".into()],
            powershell: PathBuf::from("pwsh"),
            shell: PathBuf::from("sh"),
            python: PathBuf::from("python3"),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ToolConfig {
    pub fn interpreter(&self, language: ScriptLanguage) -> (PathBuf, Vec<String>) {
        match language {
            ScriptLanguage::PowerShell => (
                self.powershell.clone(),
                vec![
                    "-NoProfile".into(),
                    "-NonInteractive".into(),
                    "-ExecutionPolicy".into(),
                    "Bypass".into(),
                    "-File".into(),
                ],
            ),
            ScriptLanguage::Shell if cfg!(windows) => (self.shell.clone(), vec!["/C".into()]),
            ScriptLanguage::Shell => (self.shell.clone(), Vec::new()),
            ScriptLanguage::Python => (self.python.clone(), Vec::new()),
        }
    }

    pub(crate) fn expand(template: &[String], package: &std::path::Path) -> Vec<String> {
        let package = package.display().to_string();
        template
            .iter()
            .map(|arg| arg.replace(PACKAGE_PLACEHOLDER, &package))
            .collect()
    }
}
