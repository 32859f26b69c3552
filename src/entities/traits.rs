//! Collaborator traits.
//!
//! The layer model talks to the outside world (image filters, modal dialogs,
//! user prompts, file loading) only through these traits, so the engine can
//! run headless and tests can script every answer.

use std::fmt;
use std::path::{Path, PathBuf};

use super::attrs::Attrs;
use super::effects::Effect;
use super::frame::Frame;
use super::project_io::CompDesc;

/// Image-to-image operation usable as an adjustment layer or smart filter.
pub trait Filter: fmt::Debug {
    fn name(&self) -> &str;

    /// Pure transform; must not keep a reference to `src`.
    fn transform_image(&self, src: &Frame) -> Frame;

    /// Independent copy with the same settings.
    fn copy(&self) -> Box<dyn Filter>;

    /// Snapshot of the settings, if the filter has any.
    fn copy_state(&self) -> Option<Attrs> {
        None
    }

    fn set_state(&mut self, _state: &Attrs) {}

    /// Serializable form, for filters that can be saved.
    fn as_effect(&self) -> Option<&Effect> {
        None
    }
}

/// Modal editor for a filter. Writes its preview into `image` and returns
/// whether the user accepted.
pub trait FilterDialog {
    fn run(&mut self, filter: &mut dyn Filter, image: &mut Frame) -> bool;
}

/// Applies the filter as configured and accepts.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptDialog;

impl FilterDialog for AcceptDialog {
    fn run(&mut self, filter: &mut dyn Filter, image: &mut Frame) -> bool {
        *image = filter.transform_image(image);
        true
    }
}

/// Previews the filter, then cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct CancelDialog;

impl FilterDialog for CancelDialog {
    fn run(&mut self, filter: &mut dyn Filter, image: &mut Frame) -> bool {
        *image = filter.transform_image(image);
        false
    }
}

/// Yes/no questions asked while editing or reloading.
pub trait Prompter {
    /// A linked file changed on disk; reload it?
    fn confirm_reload(&mut self, path: &Path) -> bool;

    /// A linked file is missing. Return a replacement path, or `None` to
    /// keep transparent content.
    fn resolve_missing(&mut self, path: &Path) -> Option<PathBuf>;

    /// Pasting would replace an existing smart filter; go ahead?
    fn confirm_replace_filter(&mut self, existing: &str, incoming: &str) -> bool;
}

/// Fixed answers, for headless runs.
#[derive(Debug, Clone, Default)]
pub struct AutoPrompter {
    pub reload: bool,
    pub replace: bool,
    pub search_dir: Option<PathBuf>,
}

impl AutoPrompter {
    pub fn yes() -> Self {
        Self { reload: true, replace: true, search_dir: None }
    }

    pub fn no() -> Self {
        Self::default()
    }
}

impl Prompter for AutoPrompter {
    fn confirm_reload(&mut self, path: &Path) -> bool {
        log::debug!("Auto-answering reload of {}: {}", path.display(), self.reload);
        self.reload
    }

    /// Looks for a file with the same name in `search_dir`.
    fn resolve_missing(&mut self, path: &Path) -> Option<PathBuf> {
        let dir = self.search_dir.as_ref()?;
        let candidate = dir.join(path.file_name()?);
        candidate.exists().then_some(candidate)
    }

    fn confirm_replace_filter(&mut self, _existing: &str, _incoming: &str) -> bool {
        self.replace
    }
}

/// Reads a composition description from disk. Runs on worker threads.
pub trait CompLoader: Send + Sync {
    fn load(&self, path: &Path) -> anyhow::Result<CompDesc>;
}
