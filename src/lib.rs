pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod media;
pub mod selection;
pub mod serial;
pub mod tagmap;
pub mod web;

pub mod state {
    use crate::{
        config::AppConfig, dispatch::TagDispatcher, selection::SelectionState, tagmap::TagMapStore,
    };
    use std::sync::Arc;

    #[derive(Clone)]
    pub struct AppState {
        pub config: Arc<AppConfig>,
        pub tag_map: Arc<TagMapStore>,
        pub selection: Arc<SelectionState>,
        pub dispatcher: Arc<TagDispatcher>,
    }

    impl AppState {
        /// Build the shared state, loading the tag map named by `config`
        pub fn new(config: AppConfig) -> Self {
            let tag_map = Arc::new(TagMapStore::new(&config.rfid.map_file));
            Self::with_tag_map(config, tag_map)
        }

        fn with_tag_map(config: AppConfig, tag_map: Arc<TagMapStore>) -> Self {
            let selection = Arc::new(SelectionState::new());
            let dispatcher = Arc::new(TagDispatcher::new(
                tag_map.clone(),
                selection.clone(),
                config.media.directory.clone(),
            ));
            Self {
                config: Arc::new(config),
                tag_map,
                selection,
                dispatcher,
            }
        }
    }
}
