use std::path::Path;

use crate::environment::{prepend_search_path, search_path_var};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Adjustments applied to every process launched inside a managed runtime.
pub trait RuntimeCommandExt {
    /// Suppress the console window Windows opens for captured child processes.
    fn hide_window(&mut self) -> &mut Self;

    /// Put `bin_dir` first on the child's search path, leaving every other
    /// inherited variable untouched.
    ///
    /// # Errors
    /// Returns an error when the resulting search path cannot be joined.
    fn prefer_bin_dir(&mut self, bin_dir: &Path) -> std::io::Result<&mut Self>;
}

impl RuntimeCommandExt for tokio::process::Command {
    #[cfg(windows)]
    fn hide_window(&mut self) -> &mut Self {
        self.creation_flags(CREATE_NO_WINDOW)
    }

    #[cfg(not(windows))]
    fn hide_window(&mut self) -> &mut Self {
        self
    }

    fn prefer_bin_dir(&mut self, bin_dir: &Path) -> std::io::Result<&mut Self> {
        let name = search_path_var();
        let current = std::env::var_os(&name);
        let value =
            prepend_search_path(bin_dir, current.as_deref()).map_err(std::io::Error::other)?;
        log::trace!("{} -> {}", name.to_string_lossy(), value.to_string_lossy());
        Ok(self.env(name, value))
    }
}
