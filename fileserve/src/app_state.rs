use chrono::FixedOffset;
use std::sync::Arc;

use crate::config::Config;
use crate::files::content::ContentNegotiator;
use crate::files::mutation::MutationService;
use crate::files::thumbnail::ThumbnailGenerator;
use crate::files::tree::FileTree;
use crate::files::SandboxRoot;

/// Immutable per-process state; every request reads the live filesystem.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    root: SandboxRoot,
    tree: FileTree,
    content: ContentNegotiator,
    mutations: MutationService,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            SandboxRoot::new(&config.sandbox_root),
            config.utc_offset,
            ThumbnailGenerator::with_converters(
                config.converter_binaries.clone(),
                config.converter_timeout,
            ),
        )
    }

    pub fn from_parts(
        root: SandboxRoot,
        utc_offset: FixedOffset,
        thumbnails: ThumbnailGenerator,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                tree: FileTree::new(root.clone(), utc_offset),
                content: ContentNegotiator::new(thumbnails),
                mutations: MutationService::new(root.clone()),
                root,
            }),
        }
    }

    pub fn root(&self) -> &SandboxRoot {
        &self.inner.root
    }

    pub fn tree(&self) -> &FileTree {
        &self.inner.tree
    }

    pub fn content(&self) -> &ContentNegotiator {
        &self.inner.content
    }

    pub fn mutations(&self) -> &MutationService {
        &self.inner.mutations
    }
}
