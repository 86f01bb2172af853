use std::path::{Path, PathBuf};

/// Settings for opening a prevalence kernel.
///
/// ```
/// use rustprevalent::PrevalenceConfig;
///
/// let config = PrevalenceConfig::new("/var/lib/bank")
///     .context(String::from("eu-west"))
///     .skip_sanity_check(true);
/// assert_eq!(config.context, "eu-west");
/// ```
#[derive(Debug, Clone)]
pub struct PrevalenceConfig<X = ()> {
    /// Directory holding the command logs and snapshots. Created if missing.
    pub directory: PathBuf,

    /// Value handed to every command and query.
    pub context: X,

    /// Skip the process-wide sanity check (tests, in-memory file services).
    pub skip_sanity_check: bool,
}

impl PrevalenceConfig<()> {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            context: (),
            skip_sanity_check: false,
        }
    }
}

impl<X> PrevalenceConfig<X> {
    /// Set the context, possibly changing its type
    pub fn context<Y>(self, context: Y) -> PrevalenceConfig<Y> {
        PrevalenceConfig {
            directory: self.directory,
            context,
            skip_sanity_check: self.skip_sanity_check,
        }
    }

    pub fn skip_sanity_check(mut self, skip: bool) -> Self {
        self.skip_sanity_check = skip;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PrevalenceConfig::new("/data");
        assert_eq!(config.directory(), Path::new("/data"));
        assert!(!config.skip_sanity_check);
    }

    #[test]
    fn test_context_keeps_other_settings() {
        let config = PrevalenceConfig::new("/data")
            .skip_sanity_check(true)
            .context(42u32);
        assert_eq!(config.context, 42);
        assert!(config.skip_sanity_check);
    }
}
