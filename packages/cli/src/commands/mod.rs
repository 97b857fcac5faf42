pub mod apply;
pub mod init;
pub mod migrate;
pub mod new;
pub mod set;
pub mod show;

pub use apply::{apply, ApplyArgs};
pub use init::{init, InitArgs};
pub use migrate::{migrate, MigrateArgs};
pub use new::{new, NewArgs};
pub use set::{set, SetArgs};
pub use show::{show, ShowArgs};

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use trellis_editor::{Codec, FileStore, TypeRegistry};

/// Store and codec configured from the project config in `cwd`
pub(crate) fn open_project(cwd: &str) -> Result<(Config, FileStore, Codec)> {
    let config = Config::load(cwd)?;
    let store = FileStore::open(config.get_store_dir(cwd))?;
    let codec = Codec::new(Arc::new(TypeRegistry::standard())).with_config(config.document.clone());
    Ok((config, store, codec))
}
