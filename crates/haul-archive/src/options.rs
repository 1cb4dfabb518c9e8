use std::fmt;
use std::sync::Arc;

use crate::native::NativeLibrary;

pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Settings shared by every extractor.
#[derive(Clone, Default)]
pub struct ExtractOptions {
    /// Receives the overall completed fraction, in `[0, 1]`.
    pub on_progress: Option<ProgressFn>,
    /// Native library to decode with instead of [`NativeLibrary::shared`].
    pub library: Option<Arc<NativeLibrary>>,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn library(mut self, library: Arc<NativeLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub(crate) fn report(&self, progress: f64) {
        if let Some(callback) = &self.on_progress {
            callback(progress.clamp(0.0, 1.0));
        }
    }
}

impl fmt::Debug for ExtractOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("library", &self.library.is_some())
            .finish()
    }
}

/// Installer flavors a caller may already know the input to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallerHint {
    /// Linux installers that are zip payloads behind a shell stub.
    NativeLinux,
}

/// Input to [`probe`](crate::probe::probe).
#[derive(Clone, Debug, Default)]
pub struct ProbeParams {
    pub hint: Option<InstallerHint>,
    pub options: ExtractOptions,
}

impl ProbeParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hint(mut self, hint: InstallerHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn progress_is_clamped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = ExtractOptions::new().on_progress(move |p| sink.lock().unwrap().push(p));

        options.report(0.5);
        options.report(1.2);
        options.report(-0.1);
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0, 0.0]);
    }

    #[test]
    fn report_without_callback() {
        ExtractOptions::default().report(0.3);
    }

    #[test]
    fn probe_params_builder() {
        let params = ProbeParams::new().hint(InstallerHint::NativeLinux);
        assert_eq!(params.hint, Some(InstallerHint::NativeLinux));
        assert!(params.options.on_progress.is_none());
        assert!(format!("{:?}", params.options).contains("on_progress: false"));
    }
}
