pub mod codec;
pub mod config;
pub mod container;
pub mod dictionary;
pub mod error;
pub mod index;
pub mod postprocess;
pub mod registry;
pub mod server;

pub use config::{DictConfig, ServerConfig};
pub use container::{ContainerKind, ContainerReader, IndexRow, RecordBlockType};
pub use dictionary::{Dictionary, DictionaryOptions};
pub use error::{MdxError, Result};
pub use index::IndexStore;
pub use postprocess::DefinitionPostProcessor;
pub use registry::DictionaryRegistry;
